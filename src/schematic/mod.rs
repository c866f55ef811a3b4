//! # Schematics
//!
//! The immutable description of a machine: its states, transitions and the
//! connector bindings that run around a transition.
//!
//! - [`model`] - data model and the [`MachineValue`] identity bound
//! - [`validation`] - structural invariants and [`SchematicError`]
//! - [`resolution`] - transition lookup through the substate chain
//! - [`builder`] - value-level assembly with validation
//! - [`diagram`] - DOT rendering

pub mod builder;
pub mod diagram;
pub mod model;
pub mod resolution;
pub(crate) mod serde_support;
pub mod validation;

pub use builder::SchematicBuilder;
pub use model::{
    ActionBinding, ConflictRetryPolicy, MachineValue, PreconditionBinding, Schematic,
    StateDefinition, Transition,
};
pub use resolution::ResolvedTransition;
pub use validation::{SchematicError, SchematicResult};
