//! # Store Contracts
//!
//! The engine keeps no machine state of its own. Everything mutable lives
//! behind [`StatusStore`], whose [`StatusStore::set_state`] is the single
//! atomicity boundary of a transition: the write lands only if the stored
//! commit tag still equals the one the caller read. Schematics are kept
//! behind [`SchematicStore`].
//!
//! Backends (SQL, Redis, ...) implement these traits; [`InMemoryRepository`]
//! is the reference implementation and implements both.

pub mod errors;
pub mod memory;

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryRepository;

use crate::schematic::{MachineValue, Schematic};
use crate::status::MachineStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Request to create a single machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMachine<S> {
    pub schematic_name: String,
    pub initial_state: S,
    /// Identifier to use; one is generated when absent
    pub machine_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl<S: MachineValue> NewMachine<S> {
    /// Creation request for a machine of `schematic` in its initial state
    pub fn for_schematic<I: MachineValue>(
        schematic: &Schematic<S, I>,
        machine_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            schematic_name: schematic.name.clone(),
            initial_state: schematic.initial_state.clone(),
            machine_id,
            metadata,
        }
    }
}

/// Persistence contract for machine status records
#[async_trait]
pub trait StatusStore<S: MachineValue>: Send + Sync {
    /// Load the current status of a machine
    async fn get_status(&self, machine_id: &str) -> StoreResult<MachineStatus<S>>;

    /// Atomically move a machine to `state` if its commit tag still equals
    /// `expected_commit_tag`, merging `state_bag_updates` into its bag.
    ///
    /// Returns [`StoreError::StateConflict`] without writing anything when the
    /// tag has moved on.
    async fn set_state(
        &self,
        machine_id: &str,
        state: S,
        state_bag_updates: Option<HashMap<String, String>>,
        expected_commit_tag: Uuid,
    ) -> StoreResult<MachineStatus<S>>;

    /// Create a machine with a fresh commit tag
    async fn create_machine(&self, request: NewMachine<S>) -> StoreResult<MachineStatus<S>>;

    /// Create several machines; all or none are created
    async fn bulk_create_machines(
        &self,
        requests: Vec<NewMachine<S>>,
    ) -> StoreResult<Vec<MachineStatus<S>>>;

    /// Remove a machine permanently
    async fn delete_machine(&self, machine_id: &str) -> StoreResult<()>;

    /// Machines of a schematic, most recently updated first
    async fn list_machines(
        &self,
        schematic_name: &str,
        limit: usize,
    ) -> StoreResult<Vec<MachineStatus<S>>>;
}

/// Persistence contract for schematics
#[async_trait]
pub trait SchematicStore<S: MachineValue, I: MachineValue>: Send + Sync {
    /// Store a schematic.
    ///
    /// Storing an identical schematic again is a no-op; a different
    /// definition under an existing name is rejected.
    async fn store_schematic(
        &self,
        schematic: Schematic<S, I>,
    ) -> StoreResult<Arc<Schematic<S, I>>>;

    async fn get_schematic(&self, schematic_name: &str) -> StoreResult<Arc<Schematic<S, I>>>;

    /// Names of all stored schematics, sorted
    async fn list_schematics(&self) -> StoreResult<Vec<String>>;
}
