#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Schematic Core
//!
//! Generic, pluggable finite-state-machine runtime.
//!
//! ## Overview
//!
//! Callers describe a machine's behavior once as a **schematic** (states,
//! transitions, preconditions and entry actions), create any number of
//! **machines** from it and drive them by sending **inputs**. The runtime
//! makes concurrent sends to one machine safe without locks: every commit is
//! a compare-and-swap on the machine's commit tag in the status store.
//!
//! ## Architecture
//!
//! A send loads the machine's status, resolves the transition (inheriting
//! edges from parent states), evaluates a precondition connector, commits
//! fenced by the commit tag it read, publishes a `Transitioned` event and
//! finally runs the target state's entry action. A failing entry action may
//! name a fallback input, which is sent through the same path.
//!
//! ## Module Organization
//!
//! - [`schematic`] - data model, validation, resolution, builder and DOT export
//! - [`status`] - the mutable per-machine record
//! - [`connectors`] - action and precondition traits plus their registry
//! - [`store`] - status and schematic store contracts, in-memory repository
//! - [`events`] - machine events and the per-listener dispatcher
//! - [`engine`] - [`StateEngine`] and the [`Machine`] send protocol
//! - [`primitives`] - semaphore and mutex built on machines
//! - [`transport`] - serialized request/response adapter
//! - [`config`] - layered [`EngineConfig`]
//! - [`error`] - [`EngineError`] taxonomy
//! - [`logging`] - structured logging bootstrap
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use schematic_core::prelude::*;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = PrimitiveEngine::in_memory(EngineConfig::default());
//! let semaphore = Semaphore::create(&engine, 2, None).await?;
//!
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let slot = semaphore.enter(&cancel).await?;
//! // ... guarded work ...
//! slot.release().await?;
//! # let _ = HashMap::<String, String>::new();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connectors;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod primitives;
pub mod schematic;
pub mod status;
pub mod store;
pub mod transport;

pub use config::{ConfigurationError, EngineConfig};
pub use connectors::{
    Action, ActionError, ConnectorContext, ConnectorRegistry, ConnectorRole, GuardError,
    Precondition,
};
pub use engine::{Machine, MachineRequest, SendOptions, StateEngine};
pub use error::{EngineError, EngineResult};
pub use events::{EventDispatcher, EventListener, ListenerError, MachineEvent};
pub use schematic::{
    ActionBinding, ConflictRetryPolicy, MachineValue, PreconditionBinding, Schematic,
    SchematicBuilder, SchematicError, StateDefinition, Transition,
};
pub use status::MachineStatus;
pub use store::{InMemoryRepository, SchematicStore, StatusStore, StoreError};

/// Commonly used types in one import
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::connectors::{
        Action, ActionResult, ConnectorContext, ConnectorRegistry, FnAction, FnPrecondition,
        GuardResult, Precondition,
    };
    pub use crate::engine::{Machine, SendOptions, StateEngine};
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::events::{EventListener, FnListener, MachineEvent};
    pub use crate::primitives::{Mutex, PrimitiveEngine, Semaphore};
    pub use crate::schematic::{
        ActionBinding, ConflictRetryPolicy, PreconditionBinding, Schematic, SchematicBuilder,
        StateDefinition,
    };
    pub use crate::status::MachineStatus;
}
