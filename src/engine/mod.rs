//! # State Engine
//!
//! Entry point for machine lifecycles. A [`StateEngine`] ties together the
//! status and schematic stores, the connector registry and the event
//! dispatcher; [`Machine`] handles obtained from it perform transitions.
//!
//! The engine is stateless apart from those shared collaborators, so clones
//! are cheap and every clone sees the same machines.
//!
//! ```rust,no_run
//! use schematic_core::config::EngineConfig;
//! use schematic_core::engine::StateEngine;
//! use schematic_core::schematic::{SchematicBuilder, StateDefinition};
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = StateEngine::<String, String>::in_memory(EngineConfig::default());
//!
//! let schematic = SchematicBuilder::new("door", "closed".to_string())
//!     .with_state(
//!         StateDefinition::new("closed".to_string())
//!             .with_transition("open".to_string(), "opened".to_string()),
//!     )
//!     .with_state(
//!         StateDefinition::new("opened".to_string())
//!             .with_transition("close".to_string(), "closed".to_string()),
//!     )
//!     .build()?;
//! engine.store_schematic(schematic).await?;
//!
//! let door = engine.create_machine("door", None, HashMap::new()).await?;
//! let status = door.send("open".to_string()).await?;
//! assert_eq!(status.state, "opened");
//! # Ok(())
//! # }
//! ```

pub mod machine;

pub use machine::{Machine, SendOptions};

use crate::config::EngineConfig;
use crate::connectors::ConnectorRegistry;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventDispatcher, MachineEvent};
use crate::logging::log_machine_operation;
use crate::schematic::{MachineValue, Schematic};
use crate::status::MachineStatus;
use crate::store::{InMemoryRepository, NewMachine, SchematicStore, StatusStore};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// One machine in a bulk creation request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineRequest {
    /// Identifier to use; one is generated when absent
    pub machine_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl MachineRequest {
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: Some(machine_id.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub struct StateEngine<S, I> {
    pub(crate) statuses: Arc<dyn StatusStore<S>>,
    pub(crate) schematics: Arc<dyn SchematicStore<S, I>>,
    pub(crate) connectors: ConnectorRegistry<S, I>,
    pub(crate) events: EventDispatcher<S, I>,
    pub(crate) config: Arc<EngineConfig>,
    cancellation: CancellationToken,
}

impl<S: MachineValue, I: MachineValue> StateEngine<S, I> {
    pub fn new(
        statuses: Arc<dyn StatusStore<S>>,
        schematics: Arc<dyn SchematicStore<S, I>>,
        connectors: ConnectorRegistry<S, I>,
        config: EngineConfig,
    ) -> Self {
        let events = EventDispatcher::from_config(&config);
        Self {
            statuses,
            schematics,
            connectors,
            events,
            config: Arc::new(config),
            cancellation: CancellationToken::new(),
        }
    }

    /// Engine over a fresh [`InMemoryRepository`] with the built-in connectors
    pub fn in_memory(config: EngineConfig) -> Self {
        let repository = Arc::new(InMemoryRepository::<S, I>::new());
        Self::new(
            Arc::clone(&repository) as Arc<dyn StatusStore<S>>,
            repository,
            ConnectorRegistry::with_builtin_connectors(),
            config,
        )
    }

    /// Replace the event dispatcher, e.g. to share one across engines
    pub fn with_event_dispatcher(mut self, events: EventDispatcher<S, I>) -> Self {
        self.events = events;
        self
    }

    /// Bind every operation of this engine (and its machines) to `cancellation`
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn connectors(&self) -> &ConnectorRegistry<S, I> {
        &self.connectors
    }

    pub fn events(&self) -> &EventDispatcher<S, I> {
        &self.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[instrument(skip(self, schematic), fields(schematic = %schematic.name))]
    pub async fn store_schematic(
        &self,
        schematic: Schematic<S, I>,
    ) -> EngineResult<Arc<Schematic<S, I>>> {
        self.ensure_not_cancelled("store_schematic")?;
        Ok(self.schematics.store_schematic(schematic).await?)
    }

    pub async fn get_schematic(&self, schematic_name: &str) -> EngineResult<Arc<Schematic<S, I>>> {
        Ok(self.schematics.get_schematic(schematic_name).await?)
    }

    pub async fn list_schematics(&self) -> EngineResult<Vec<String>> {
        Ok(self.schematics.list_schematics().await?)
    }

    /// Create a machine of a stored schematic in its initial state
    #[instrument(skip(self, metadata))]
    pub async fn create_machine(
        &self,
        schematic_name: &str,
        machine_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> EngineResult<Machine<S, I>> {
        let schematic = self.schematics.get_schematic(schematic_name).await?;
        self.create_for(schematic, machine_id, metadata).await
    }

    /// Store `schematic` (idempotently) and create a machine of it
    pub async fn create_machine_from_schematic(
        &self,
        schematic: Schematic<S, I>,
        machine_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> EngineResult<Machine<S, I>> {
        let schematic = self.store_schematic(schematic).await?;
        self.create_for(schematic, machine_id, metadata).await
    }

    /// Create several machines of one schematic; all or none are created
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn bulk_create_machines(
        &self,
        schematic_name: &str,
        requests: Vec<MachineRequest>,
    ) -> EngineResult<Vec<Machine<S, I>>> {
        let schematic = self.schematics.get_schematic(schematic_name).await?;
        self.ensure_not_cancelled("bulk_create_machines")?;

        let new_machines = requests
            .into_iter()
            .map(|request| {
                NewMachine::for_schematic(&schematic, request.machine_id, request.metadata)
            })
            .collect();
        let created = self.statuses.bulk_create_machines(new_machines).await?;

        debug!(schematic = %schematic.name, count = created.len(), "Machines created");

        Ok(created
            .into_iter()
            .map(|status| {
                self.events.dispatch(MachineEvent::created(&status));
                Machine::new(status.machine_id, Arc::clone(&schematic), self.clone())
            })
            .collect())
    }

    /// Handle to an existing machine
    pub async fn get_machine(&self, machine_id: &str) -> EngineResult<Machine<S, I>> {
        let status = self.statuses.get_status(machine_id).await?;
        let schematic = self.schematics.get_schematic(&status.schematic_name).await?;
        Ok(Machine::new(status.machine_id, schematic, self.clone()))
    }

    #[instrument(skip(self))]
    pub async fn delete_machine(&self, machine_id: &str) -> EngineResult<()> {
        self.ensure_not_cancelled("delete_machine")?;
        let status = self.statuses.get_status(machine_id).await?;
        self.statuses.delete_machine(machine_id).await?;

        log_machine_operation("delete", machine_id, &status.schematic_name, "deleted", None);
        self.events
            .dispatch(MachineEvent::deleted(machine_id, status.schematic_name));
        Ok(())
    }

    /// Machines of a schematic, most recently updated first
    pub async fn list_machines(
        &self,
        schematic_name: &str,
        limit: usize,
    ) -> EngineResult<Vec<MachineStatus<S>>> {
        Ok(self.statuses.list_machines(schematic_name, limit).await?)
    }

    async fn create_for(
        &self,
        schematic: Arc<Schematic<S, I>>,
        machine_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> EngineResult<Machine<S, I>> {
        self.ensure_not_cancelled("create_machine")?;

        let status = self
            .statuses
            .create_machine(NewMachine::for_schematic(&schematic, machine_id, metadata))
            .await?;

        log_machine_operation(
            "create",
            &status.machine_id,
            &schematic.name,
            "created",
            None,
        );
        self.events.dispatch(MachineEvent::created(&status));

        Ok(Machine::new(status.machine_id, schematic, self.clone()))
    }

    fn ensure_not_cancelled(&self, operation: &str) -> EngineResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(EngineError::cancelled(operation));
        }
        Ok(())
    }
}

impl<S, I> Clone for StateEngine<S, I> {
    fn clone(&self) -> Self {
        Self {
            statuses: Arc::clone(&self.statuses),
            schematics: Arc::clone(&self.schematics),
            connectors: self.connectors.clone(),
            events: self.events.clone(),
            config: Arc::clone(&self.config),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<S: MachineValue, I: MachineValue> fmt::Debug for StateEngine<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateEngine")
            .field("connectors", &self.connectors)
            .field("events", &self.events)
            .field("config", &self.config)
            .finish()
    }
}
