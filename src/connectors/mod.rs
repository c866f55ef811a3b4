//! # Connectors
//!
//! Pluggable code that runs around a transition, bound to a schematic by a
//! string key and resolved at call time.
//!
//! - [`Action`] runs after a machine commits into a state (entry action). It
//!   may cause effects and may fail.
//! - [`Precondition`] decides whether a transition may proceed. Registered
//!   either as a precondition or as a guard; both resolve identically.
//!
//! Connectors receive a [`ConnectorContext`] holding the schematic, the
//! machine status they are judging (or that was just committed), the input,
//! the payload and the binding's settings.

pub mod builtin;
pub mod errors;
pub mod registry;

pub use builtin::{LogAction, StateBagEqualsPrecondition};
pub use errors::{
    action_failed, missing_setting, ActionError, ActionResult, ConnectorRole, GuardError,
    GuardResult, ResolutionError, ResolutionResult,
};
pub use registry::{ConnectorRegistry, RegistryStats};

use crate::schematic::{MachineValue, Schematic};
use crate::status::MachineStatus;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a connector gets to see about the transition it serves
#[derive(Debug, Clone)]
pub struct ConnectorContext<S, I> {
    pub schematic: Arc<Schematic<S, I>>,
    pub status: MachineStatus<S>,
    pub input: I,
    pub payload: Option<Value>,
    pub settings: HashMap<String, String>,
    pub cancellation: CancellationToken,
}

impl<S: MachineValue, I: MachineValue> ConnectorContext<S, I> {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn machine_id(&self) -> &str {
        &self.status.machine_id
    }
}

/// Entry action invoked after a machine commits into a state
#[async_trait]
pub trait Action<S: MachineValue, I: MachineValue>: Send + Sync {
    /// Execute the action
    async fn execute(&self, context: &ConnectorContext<S, I>) -> ActionResult<()>;

    /// Get a description of this action for logging
    fn description(&self) -> &str {
        "entry action"
    }
}

/// Decision gate evaluated before a transition commits
#[async_trait]
pub trait Precondition<S: MachineValue, I: MachineValue>: Send + Sync {
    /// Check if the transition is allowed
    async fn check(&self, context: &ConnectorContext<S, I>) -> GuardResult<bool>;

    /// Get a description of this precondition for logging
    fn description(&self) -> &str {
        "precondition"
    }
}

/// Adapter turning an async closure into an [`Action`]
pub struct FnAction<F> {
    description: String,
    func: F,
}

impl<F> FnAction<F> {
    pub fn new(description: impl Into<String>, func: F) -> Self {
        Self {
            description: description.into(),
            func,
        }
    }
}

#[async_trait]
impl<S, I, F, Fut> Action<S, I> for FnAction<F>
where
    S: MachineValue,
    I: MachineValue,
    F: Fn(ConnectorContext<S, I>) -> Fut + Send + Sync,
    Fut: Future<Output = ActionResult<()>> + Send,
{
    async fn execute(&self, context: &ConnectorContext<S, I>) -> ActionResult<()> {
        (self.func)(context.clone()).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Adapter turning an async closure into a [`Precondition`]
pub struct FnPrecondition<F> {
    description: String,
    func: F,
}

impl<F> FnPrecondition<F> {
    pub fn new(description: impl Into<String>, func: F) -> Self {
        Self {
            description: description.into(),
            func,
        }
    }
}

#[async_trait]
impl<S, I, F, Fut> Precondition<S, I> for FnPrecondition<F>
where
    S: MachineValue,
    I: MachineValue,
    F: Fn(ConnectorContext<S, I>) -> Fut + Send + Sync,
    Fut: Future<Output = GuardResult<bool>> + Send,
{
    async fn check(&self, context: &ConnectorContext<S, I>) -> GuardResult<bool> {
        (self.func)(context.clone()).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}
