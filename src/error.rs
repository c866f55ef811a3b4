//! Error types for the schematic engine.
//!
//! Each layer owns a narrow error enum ([`SchematicError`], [`StoreError`],
//! [`ActionError`], [`GuardError`], [`ConfigurationError`]); everything a
//! caller of the engine sees is an [`EngineError`].

use crate::config::ConfigurationError;
use crate::connectors::{ActionError, ConnectorRole, GuardError, ResolutionError};
use crate::schematic::SchematicError;
use crate::store::StoreError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Machine {machine_id} has no transition for input {input} from state {state}")]
    NoMatchingTransition {
        machine_id: String,
        state: String,
        input: String,
    },

    #[error("Precondition '{connector_key}' rejected input {input} for machine {machine_id}")]
    PreconditionNotSatisfied {
        machine_id: String,
        connector_key: String,
        input: String,
    },

    #[error("Precondition '{connector_key}' failed for machine {machine_id}: {source}")]
    PreconditionError {
        machine_id: String,
        connector_key: String,
        #[source]
        source: GuardError,
    },

    #[error("State conflict on machine {machine_id} after {attempts} attempt(s): expected commit tag {expected}")]
    StateConflict {
        machine_id: String,
        expected: Uuid,
        actual: Option<Uuid>,
        attempts: u32,
    },

    #[error("No {role} connector registered for key '{connector_key}'")]
    ConnectorNotFound {
        connector_key: String,
        role: ConnectorRole,
    },

    #[error("{registrations} {role} connectors registered for key '{connector_key}'")]
    AmbiguousConnector {
        connector_key: String,
        role: ConnectorRole,
        registrations: usize,
    },

    /// The commit identified by `commit_tag` stands; only the entry action failed
    #[error("Entry action '{connector_key}' failed on machine {machine_id} in state {state} (commit {commit_tag}): {source}")]
    ActionFailed {
        machine_id: String,
        connector_key: String,
        state: String,
        commit_tag: Uuid,
        #[source]
        source: ActionError,
    },

    /// The commit identified by `commit_tag` stands; its entry action could not be resolved
    #[error("Entry action for machine {machine_id} in state {state} (commit {commit_tag}) could not be resolved: {source}")]
    EntryActionUnresolved {
        machine_id: String,
        state: String,
        commit_tag: Uuid,
        #[source]
        source: ResolutionError,
    },

    /// The commit identified by `commit_tag` stands; the fallback input sent
    /// after its entry action failed did not commit
    #[error("Fallback {fallback_input} on machine {machine_id} (commit {commit_tag}) failed: {source}")]
    FallbackFailed {
        machine_id: String,
        commit_tag: Uuid,
        fallback_input: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("Fallback transitions on machine {machine_id} nested deeper than {max_depth}")]
    FallbackDepthExceeded { machine_id: String, max_depth: u32 },

    #[error("Machine {machine_id} not found")]
    MachineNotFound { machine_id: String },

    #[error("Machine {machine_id} already exists")]
    MachineAlreadyExists { machine_id: String },

    #[error("Schematic {schematic_name} not found")]
    SchematicNotFound { schematic_name: String },

    #[error("A different schematic named {schematic_name} is already stored")]
    SchematicAlreadyExists { schematic_name: String },

    #[error("Invalid schematic: {0}")]
    InvalidSchematic(#[from] SchematicError),

    #[error("Operation {operation} cancelled")]
    Cancelled { operation: String },

    #[error("Type mismatch for {role}: expected {expected}, received {actual}")]
    TypeMismatch {
        role: String,
        expected: String,
        actual: String,
    },

    #[error("Store error: {reason}")]
    Store { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl EngineError {
    /// Whether repeating the same call may succeed without any other change
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }

    /// Whether the machine's state was committed before this error was raised
    pub fn is_post_commit(&self) -> bool {
        matches!(
            self,
            Self::ActionFailed { .. }
                | Self::EntryActionUnresolved { .. }
                | Self::FallbackFailed { .. }
                | Self::FallbackDepthExceeded { .. }
        )
    }

    pub(crate) fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::MachineNotFound { machine_id } => Self::MachineNotFound { machine_id },
            StoreError::MachineAlreadyExists { machine_id } => {
                Self::MachineAlreadyExists { machine_id }
            }
            StoreError::SchematicNotFound { schematic_name } => {
                Self::SchematicNotFound { schematic_name }
            }
            StoreError::SchematicAlreadyExists { schematic_name } => {
                Self::SchematicAlreadyExists { schematic_name }
            }
            StoreError::StateConflict {
                machine_id,
                expected,
                actual,
            } => Self::StateConflict {
                machine_id,
                expected,
                actual: Some(actual),
                attempts: 1,
            },
            StoreError::InvalidSchematic(error) => Self::InvalidSchematic(error),
            StoreError::Backend { reason } => Self::Store { reason },
        }
    }
}

impl From<ResolutionError> for EngineError {
    fn from(error: ResolutionError) -> Self {
        match error {
            ResolutionError::NotFound {
                connector_key,
                role,
            } => Self::ConnectorNotFound {
                connector_key,
                role,
            },
            ResolutionError::Ambiguous {
                connector_key,
                role,
                registrations,
            } => Self::AmbiguousConnector {
                connector_key,
                role,
                registrations,
            },
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
