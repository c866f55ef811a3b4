//! # Machine Events
//!
//! Creation, transition and deletion events fanned out to listeners without
//! blocking the code that caused them.
//!
//! Each listener gets its own bounded queue and worker task (see
//! [`EventDispatcher`]), so a slow or failing listener never delays a
//! `send` or another listener.

pub mod dispatcher;
pub mod types;

pub use dispatcher::{DispatcherStats, EventDispatcher, ListenerStats};
pub use types::MachineEvent;

use crate::schematic::MachineValue;
use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

/// Failure reported by a listener; logged and counted, never propagated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Listener failed: {reason}")]
    Failed { reason: String },
}

impl ListenerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Observer of machine events
#[async_trait]
pub trait EventListener<S: MachineValue, I: MachineValue>: Send + Sync {
    /// Name used in logs and statistics
    fn name(&self) -> &str;

    async fn on_event(&self, event: &MachineEvent<S, I>) -> Result<(), ListenerError>;
}

/// Adapter turning an async closure into an [`EventListener`]
pub struct FnListener<F> {
    name: String,
    func: F,
}

impl<F> FnListener<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<S, I, F, Fut> EventListener<S, I> for FnListener<F>
where
    S: MachineValue,
    I: MachineValue,
    F: Fn(MachineEvent<S, I>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ListenerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: &MachineEvent<S, I>) -> Result<(), ListenerError> {
        (self.func)(event.clone()).await
    }
}
