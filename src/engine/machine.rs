//! # Machine Handle
//!
//! [`Machine`] drives one machine instance through its schematic.
//!
//! A `send` is a read-modify-write cycle against the status store:
//!
//! 1. load the current status
//! 2. resolve the transition for the input, walking the parent chain
//! 3. evaluate the edge's precondition, or the target state's own
//! 4. commit with `set_state`, fenced by the commit tag read in step 1
//! 5. on a lost race, back off and start over while the schematic's
//!    retry policy allows it
//! 6. publish a `Transitioned` event, then run the target state's entry action
//! 7. when the action fails and names an `on_failure_input`, send that input
//!    through this same cycle
//!
//! Errors raised after step 4 carry the commit tag that stands and report
//! `is_post_commit()`.
//!
//! The handle itself holds no machine state; every operation reads the store.

use super::StateEngine;
use crate::config::EngineConfig;
use crate::connectors::{ActionError, ConnectorContext, ConnectorRole};
use crate::error::{EngineError, EngineResult};
use crate::events::MachineEvent;
use crate::logging::log_connector_operation;
use crate::schematic::{
    ActionBinding, ConflictRetryPolicy, MachineValue, PreconditionBinding, Schematic,
};
use crate::status::MachineStatus;
use crate::store::StoreError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Optional parts of a `send`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Handed to the precondition and the entry action
    pub payload: Option<Value>,
    /// Merged into the state bag as part of the commit
    pub state_bag_updates: Option<HashMap<String, String>>,
    /// Commit only on top of this exact version; a mismatch is returned
    /// immediately instead of being retried
    pub expected_commit_tag: Option<Uuid>,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_state_bag_update(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.state_bag_updates
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn expecting_commit_tag(mut self, commit_tag: Uuid) -> Self {
        self.expected_commit_tag = Some(commit_tag);
        self
    }
}

/// Handle to one machine instance
pub struct Machine<S, I> {
    machine_id: String,
    schematic: Arc<Schematic<S, I>>,
    engine: StateEngine<S, I>,
}

/// Outcome of the commit phase of a send
struct Committed<S> {
    from_state: S,
    status: MachineStatus<S>,
}

impl<S: MachineValue, I: MachineValue> Machine<S, I> {
    pub(crate) fn new(
        machine_id: String,
        schematic: Arc<Schematic<S, I>>,
        engine: StateEngine<S, I>,
    ) -> Self {
        Self {
            machine_id,
            schematic,
            engine,
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn schematic(&self) -> &Arc<Schematic<S, I>> {
        &self.schematic
    }

    /// Same machine, observing `cancellation` instead of the engine's token
    pub fn with_cancellation(&self, cancellation: CancellationToken) -> Self {
        Self {
            machine_id: self.machine_id.clone(),
            schematic: Arc::clone(&self.schematic),
            engine: self.engine.clone().with_cancellation(cancellation),
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.engine.cancellation()
    }

    pub fn engine_config(&self) -> &EngineConfig {
        self.engine.config()
    }

    pub async fn status(&self) -> EngineResult<MachineStatus<S>> {
        Ok(self.engine.statuses.get_status(&self.machine_id).await?)
    }

    pub async fn current_state(&self) -> EngineResult<S> {
        Ok(self.status().await?.state)
    }

    pub async fn metadata(&self) -> EngineResult<HashMap<String, String>> {
        Ok(self.status().await?.metadata)
    }

    /// Apply `input` to the machine
    pub async fn send(&self, input: I) -> EngineResult<MachineStatus<S>> {
        self.send_with(input, SendOptions::default()).await
    }

    /// Apply `input`, handing `payload` to the connectors involved
    pub async fn send_with_payload(
        &self,
        input: I,
        payload: Value,
    ) -> EngineResult<MachineStatus<S>> {
        self.send_with(input, SendOptions::new().with_payload(payload))
            .await
    }

    #[instrument(
        skip(self, options),
        fields(machine_id = %self.machine_id, schematic = %self.schematic.name)
    )]
    pub async fn send_with(
        &self,
        input: I,
        options: SendOptions,
    ) -> EngineResult<MachineStatus<S>> {
        self.send_inner(input, options, 0).await
    }

    /// Entry point shared by callers and failure fallbacks
    fn send_inner(
        &self,
        input: I,
        options: SendOptions,
        fallback_depth: u32,
    ) -> BoxFuture<'_, EngineResult<MachineStatus<S>>> {
        async move {
            let Committed { from_state, status } = self.commit(&input, &options).await?;

            debug!(
                machine_id = %self.machine_id,
                from = ?from_state,
                to = ?status.state,
                input = ?input,
                commit_tag = %status.commit_tag,
                "Transition committed"
            );

            self.engine.events.dispatch(MachineEvent::transitioned(
                from_state,
                &status,
                input.clone(),
                options.payload.clone(),
            ));

            let entry_action = self
                .schematic
                .state(&status.state)
                .and_then(|definition| definition.entry_action.clone());

            match entry_action {
                Some(binding) => {
                    self.run_entry_action(binding, status, input, options.payload, fallback_depth)
                        .await
                }
                None => Ok(status),
            }
        }
        .boxed()
    }

    async fn commit(&self, input: &I, options: &SendOptions) -> EngineResult<Committed<S>> {
        let policy = self.schematic.conflict_retry_policy;
        let started = Instant::now();
        let mut retries: u32 = 0;

        loop {
            self.ensure_not_cancelled()?;

            let current = self.engine.statuses.get_status(&self.machine_id).await?;

            if let Some(expected) = options.expected_commit_tag {
                if current.commit_tag != expected {
                    return Err(self.conflict(expected, Some(current.commit_tag), 1));
                }
            }

            let resolved = self
                .schematic
                .resolve_transition(&current.state, input)
                .ok_or_else(|| EngineError::NoMatchingTransition {
                    machine_id: self.machine_id.clone(),
                    state: format!("{:?}", current.state),
                    input: format!("{input:?}"),
                })?;
            let target = resolved.transition.resultant_state.clone();

            let precondition = resolved.transition.precondition.as_ref().or_else(|| {
                self.schematic
                    .state(&target)
                    .and_then(|definition| definition.precondition.as_ref())
            });
            if let Some(binding) = precondition {
                self.check_precondition(binding, &current, input, options.payload.as_ref())
                    .await?;
            }

            // Last point at which cancellation may stop the send
            self.ensure_not_cancelled()?;

            let attempt = self
                .engine
                .statuses
                .set_state(
                    &self.machine_id,
                    target,
                    options.state_bag_updates.clone(),
                    current.commit_tag,
                )
                .await;

            match attempt {
                Ok(status) => {
                    return Ok(Committed {
                        from_state: current.state,
                        status,
                    })
                }
                Err(StoreError::StateConflict {
                    expected, actual, ..
                }) => {
                    let attempts = retries + 1;
                    if options.expected_commit_tag.is_some() || !policy.allows_retry(retries) {
                        return Err(self.conflict(expected, Some(actual), attempts));
                    }
                    if policy == ConflictRetryPolicy::Unbounded {
                        if let Some(limit) = self.engine.config.unbounded_retry_timeout() {
                            if started.elapsed() >= limit {
                                warn!(
                                    machine_id = %self.machine_id,
                                    attempts,
                                    elapsed_ms = started.elapsed().as_millis() as u64,
                                    "Giving up on unbounded conflict retry"
                                );
                                return Err(self.conflict(expected, Some(actual), attempts));
                            }
                        }
                    }

                    let delay = self.engine.config.conflict_backoff(retries);
                    debug!(
                        machine_id = %self.machine_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Commit conflict, retrying"
                    );
                    retries += 1;

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancellation().cancelled() => {
                            return Err(EngineError::cancelled(format!(
                                "send on {}",
                                self.machine_id
                            )));
                        }
                    }
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn check_precondition(
        &self,
        binding: &PreconditionBinding,
        current: &MachineStatus<S>,
        input: &I,
        payload: Option<&Value>,
    ) -> EngineResult<()> {
        let precondition = self
            .engine
            .connectors
            .resolve_precondition(&binding.connector_key)?;

        let context = ConnectorContext {
            schematic: Arc::clone(&self.schematic),
            status: current.clone(),
            input: input.clone(),
            payload: payload.cloned(),
            settings: binding.settings.clone(),
            cancellation: self.cancellation().clone(),
        };

        let verdict = tokio::select! {
            verdict = precondition.check(&context) => verdict,
            _ = self.cancellation().cancelled() => {
                return Err(EngineError::cancelled(format!("send on {}", self.machine_id)));
            }
        };

        match verdict {
            Ok(true) => Ok(()),
            Ok(false) => {
                debug!(
                    machine_id = %self.machine_id,
                    connector_key = %binding.connector_key,
                    "Precondition not satisfied"
                );
                Err(EngineError::PreconditionNotSatisfied {
                    machine_id: self.machine_id.clone(),
                    connector_key: binding.connector_key.clone(),
                    input: format!("{input:?}"),
                })
            }
            Err(source) => Err(EngineError::PreconditionError {
                machine_id: self.machine_id.clone(),
                connector_key: binding.connector_key.clone(),
                source,
            }),
        }
    }

    async fn run_entry_action(
        &self,
        binding: ActionBinding<I>,
        status: MachineStatus<S>,
        input: I,
        payload: Option<Value>,
        fallback_depth: u32,
    ) -> EngineResult<MachineStatus<S>> {
        let action = self
            .engine
            .connectors
            .resolve_action(&binding.connector_key)
            .map_err(|source| EngineError::EntryActionUnresolved {
                machine_id: self.machine_id.clone(),
                state: format!("{:?}", status.state),
                commit_tag: status.commit_tag,
                source,
            })?;

        let context = ConnectorContext {
            schematic: Arc::clone(&self.schematic),
            status,
            input,
            payload,
            settings: binding.settings.clone(),
            cancellation: self.cancellation().clone(),
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            outcome = action.execute(&context) => outcome,
            _ = self.cancellation().cancelled() => Err(ActionError::Cancelled),
        };
        let duration_ms = Some(started.elapsed().as_millis() as u64);
        let ConnectorContext { status, input, .. } = context;

        let error = match outcome {
            Ok(()) => return Ok(status),
            Err(error) => error,
        };

        log_connector_operation(
            "execute",
            &binding.connector_key,
            &ConnectorRole::Action.to_string(),
            Some(&self.machine_id),
            "failed",
            duration_ms,
        );

        // A cancelled send never starts a fallback
        let fallback_input = match binding.on_failure_input {
            Some(fallback) if error != ActionError::Cancelled => fallback,
            _ => {
                return Err(EngineError::ActionFailed {
                    machine_id: self.machine_id.clone(),
                    connector_key: binding.connector_key,
                    state: format!("{:?}", status.state),
                    commit_tag: status.commit_tag,
                    source: error,
                })
            }
        };

        let max_depth = self.engine.config.max_fallback_depth;
        if fallback_depth >= max_depth {
            warn!(
                machine_id = %self.machine_id,
                connector_key = %binding.connector_key,
                max_depth,
                "Fallback nesting limit reached"
            );
            return Err(EngineError::FallbackDepthExceeded {
                machine_id: self.machine_id.clone(),
                max_depth,
            });
        }

        warn!(
            machine_id = %self.machine_id,
            connector_key = %binding.connector_key,
            error = %error,
            fallback_input = ?fallback_input,
            "Entry action failed, sending fallback input"
        );

        let failure = json!({
            "failed_state": status.state,
            "failed_input": input,
            "connector_key": binding.connector_key,
            "error": error.to_string(),
            "commit_tag": status.commit_tag,
        });

        match self
            .send_inner(
                fallback_input.clone(),
                SendOptions::new().with_payload(failure),
                fallback_depth + 1,
            )
            .await
        {
            Ok(status) => Ok(status),
            // Deeper failures already name the commit that stands
            Err(error) if error.is_post_commit() => Err(error),
            Err(error) => Err(EngineError::FallbackFailed {
                machine_id: self.machine_id.clone(),
                commit_tag: status.commit_tag,
                fallback_input: format!("{fallback_input:?}"),
                source: Box::new(error),
            }),
        }
    }

    fn ensure_not_cancelled(&self) -> EngineResult<()> {
        if self.cancellation().is_cancelled() {
            return Err(EngineError::cancelled(format!("send on {}", self.machine_id)));
        }
        Ok(())
    }

    fn conflict(&self, expected: Uuid, actual: Option<Uuid>, attempts: u32) -> EngineError {
        EngineError::StateConflict {
            machine_id: self.machine_id.clone(),
            expected,
            actual,
            attempts,
        }
    }
}

impl<S, I> Clone for Machine<S, I> {
    fn clone(&self) -> Self {
        Self {
            machine_id: self.machine_id.clone(),
            schematic: Arc::clone(&self.schematic),
            engine: self.engine.clone(),
        }
    }
}

impl<S: MachineValue, I: MachineValue> fmt::Debug for Machine<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("machine_id", &self.machine_id)
            .field("schematic", &self.schematic.name)
            .finish()
    }
}
