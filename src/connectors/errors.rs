use std::fmt;
use thiserror::Error;

/// Capability a connector registration provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectorRole {
    Action,
    Precondition,
    /// Resolved and evaluated exactly like a precondition
    Guard,
}

impl fmt::Display for ConnectorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Precondition => write!(f, "precondition"),
            Self::Guard => write!(f, "guard"),
        }
    }
}

/// Failure raised by an entry action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Action execution failed: {reason}")]
    Failed { reason: String },

    #[error("External service error: {service} - {reason}")]
    ExternalServiceError { service: String, reason: String },

    /// The send driving the action was cancelled while it ran
    #[error("Action was cancelled")]
    Cancelled,
}

/// Failure raised while evaluating a precondition or guard.
///
/// A precondition that simply rejects the transition returns `Ok(false)`;
/// these errors mean the decision itself could not be made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Missing required setting: {setting}")]
    MissingSetting { setting: String },

    #[error("Guard evaluation failed: {reason}")]
    EvaluationFailed { reason: String },
}

/// Connector lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No {role} connector registered for key '{connector_key}'")]
    NotFound {
        connector_key: String,
        role: ConnectorRole,
    },

    #[error("{registrations} {role} connectors registered for key '{connector_key}'")]
    Ambiguous {
        connector_key: String,
        role: ConnectorRole,
        registrations: usize,
    },
}

pub type ActionResult<T> = Result<T, ActionError>;
pub type GuardResult<T> = Result<T, GuardError>;
pub type ResolutionResult<T> = Result<T, ResolutionError>;

/// Helper function to create a plain action failure
pub fn action_failed(reason: impl Into<String>) -> ActionError {
    ActionError::Failed {
        reason: reason.into(),
    }
}

/// Helper function to create a missing-setting guard error
pub fn missing_setting(setting: impl Into<String>) -> GuardError {
    GuardError::MissingSetting {
        setting: setting.into(),
    }
}
