//! # Machine-backed Semaphore
//!
//! A counting semaphore whose count is the state of a machine. States are
//! `0..=N`; input [`ENTER`] moves up one, [`EXIT`] moves down one. Because
//! the count lives in the status store, every process sharing that store
//! shares the semaphore.

use crate::engine::{Machine, StateEngine};
use crate::error::{EngineError, EngineResult};
use crate::logging::log_error;
use crate::schematic::{
    ConflictRetryPolicy, Schematic, SchematicBuilder, SchematicResult, StateDefinition,
};
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Engine type shared by the primitives: the state is the held-slot count
pub type PrimitiveEngine = StateEngine<u32, i32>;

pub const ENTER: i32 = 1;
pub const EXIT: i32 = -1;

/// Schematic name for a semaphore: `Semaphore{slots}` under the unbounded
/// policy, `Semaphore{slots}@{count}` under any other, so semaphores of the
/// same size but different policies can share one schematic store
pub fn semaphore_schematic_name(slots: u32, policy: ConflictRetryPolicy) -> String {
    match policy {
        ConflictRetryPolicy::Unbounded => format!("Semaphore{slots}"),
        other => format!("Semaphore{slots}@{}", other.as_count()),
    }
}

/// Schematic counting from 0 to `slots`, named by [`semaphore_schematic_name`]
pub fn semaphore_schematic(
    slots: u32,
    policy: ConflictRetryPolicy,
) -> SchematicResult<Schematic<u32, i32>> {
    let states = (0..=slots).map(|held| {
        let mut definition = StateDefinition::new(held)
            .with_description(format!("{held} of {slots} slots held"));
        if held < slots {
            definition = definition.with_transition(ENTER, held + 1);
        }
        if held > 0 {
            definition = definition.with_transition(EXIT, held - 1);
        }
        definition
    });

    SchematicBuilder::new(semaphore_schematic_name(slots, policy), 0)
        .conflict_retry_policy(policy)
        .with_states(states)
        .build()
}

#[derive(Clone, Debug)]
pub struct Semaphore {
    machine: Machine<u32, i32>,
    slots: u32,
}

impl Semaphore {
    /// Create a semaphore machine with an unbounded conflict retry policy
    pub async fn create(
        engine: &PrimitiveEngine,
        slots: u32,
        machine_id: Option<String>,
    ) -> EngineResult<Self> {
        Self::create_with_policy(engine, slots, machine_id, ConflictRetryPolicy::Unbounded).await
    }

    pub async fn create_with_policy(
        engine: &PrimitiveEngine,
        slots: u32,
        machine_id: Option<String>,
        policy: ConflictRetryPolicy,
    ) -> EngineResult<Self> {
        let schematic = semaphore_schematic(slots, policy)?;
        let machine = engine
            .create_machine_from_schematic(schematic, machine_id, HashMap::new())
            .await?;
        Ok(Self { machine, slots })
    }

    /// Attach to an existing semaphore machine
    pub async fn attach(engine: &PrimitiveEngine, machine_id: &str) -> EngineResult<Self> {
        let machine = engine.get_machine(machine_id).await?;
        let slots = machine.schematic().states.keys().copied().max().unwrap_or(0);
        Ok(Self { machine, slots })
    }

    pub fn machine(&self) -> &Machine<u32, i32> {
        &self.machine
    }

    pub fn machine_id(&self) -> &str {
        self.machine.machine_id()
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    /// Number of slots currently held
    pub async fn held(&self) -> EngineResult<u32> {
        self.machine.current_state().await
    }

    /// Take a slot if one is free; `Ok(false)` when all are held
    pub async fn try_enter(&self) -> EngineResult<bool> {
        Self::enter_once(&self.machine).await
    }

    /// Like [`try_enter`](Self::try_enter), returning a slot to release
    pub async fn try_acquire(&self) -> EngineResult<Option<SemaphoreSlot>> {
        Ok(self.try_enter().await?.then(|| SemaphoreSlot::new(self.clone())))
    }

    /// Wait for a slot until one frees up or `cancel` fires
    pub async fn enter(&self, cancel: &CancellationToken) -> EngineResult<SemaphoreSlot> {
        let machine = self.machine.with_cancellation(cancel.clone());
        let mut waits: u32 = 0;

        loop {
            match Self::enter_once(&machine).await {
                Ok(true) => return Ok(SemaphoreSlot::new(self.clone())),
                Ok(false) => {}
                Err(e) if e.is_retryable() => {}
                Err(e) => return Err(e),
            }

            let delay = self.backoff(waits);
            waits = waits.saturating_add(1);
            debug!(machine_id = %self.machine_id(), waits, "Semaphore full, waiting");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(EngineError::cancelled(format!("enter {}", self.machine_id())));
                }
            }
        }
    }

    /// Release one slot.
    ///
    /// Runs to completion regardless of any cancellation: conflicts are
    /// retried until the decrement lands.
    pub async fn exit(&self) -> EngineResult<()> {
        let machine = self.machine.with_cancellation(CancellationToken::new());
        let mut retries: u32 = 0;

        loop {
            match machine.send(EXIT).await {
                Ok(_) => return Ok(()),
                Err(e) if e.is_retryable() => {
                    let delay = self.backoff(retries);
                    retries = retries.saturating_add(1);
                    warn!(
                        machine_id = %self.machine_id(),
                        retries,
                        "Semaphore exit conflicted, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `f` while holding a slot; the slot is released before returning
    pub async fn with_slot<F, Fut, T>(&self, cancel: &CancellationToken, f: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = self.enter(cancel).await?;
        let value = f().await;
        slot.release().await?;
        Ok(value)
    }

    async fn enter_once(machine: &Machine<u32, i32>) -> EngineResult<bool> {
        match machine.send(ENTER).await {
            Ok(_) => Ok(true),
            Err(EngineError::NoMatchingTransition { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn backoff(&self, retry: u32) -> std::time::Duration {
        self.machine.engine_config().conflict_backoff(retry)
    }
}

/// A held semaphore slot.
///
/// Prefer [`release`](Self::release); a slot dropped without it schedules the
/// release on the current Tokio runtime.
#[must_use = "a slot is released when dropped; bind it to keep holding"]
#[derive(Debug)]
pub struct SemaphoreSlot {
    semaphore: Semaphore,
    released: bool,
}

impl SemaphoreSlot {
    fn new(semaphore: Semaphore) -> Self {
        Self {
            semaphore,
            released: false,
        }
    }

    pub fn machine_id(&self) -> &str {
        self.semaphore.machine_id()
    }

    /// Release the slot and wait for the decrement to commit
    pub async fn release(mut self) -> EngineResult<()> {
        self.released = true;
        self.semaphore.exit().await
    }
}

impl Drop for SemaphoreSlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let semaphore = self.semaphore.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = semaphore.exit().await {
                        log_error(
                            "semaphore",
                            "release_dropped_slot",
                            &e.to_string(),
                            Some(semaphore.machine_id()),
                        );
                    }
                });
            }
            Err(_) => {
                error!(
                    machine_id = %self.semaphore.machine_id(),
                    "Semaphore slot dropped outside a Tokio runtime, slot not released"
                );
            }
        }
    }
}
