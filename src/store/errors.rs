use crate::schematic::SchematicError;
use thiserror::Error;
use uuid::Uuid;

/// Error types for status and schematic store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Machine {machine_id} not found")]
    MachineNotFound { machine_id: String },

    #[error("Machine {machine_id} already exists")]
    MachineAlreadyExists { machine_id: String },

    #[error("Schematic {schematic_name} not found")]
    SchematicNotFound { schematic_name: String },

    #[error("A different schematic named {schematic_name} is already stored")]
    SchematicAlreadyExists { schematic_name: String },

    #[error("Commit tag mismatch for machine {machine_id}: expected {expected}, found {actual}")]
    StateConflict {
        machine_id: String,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("Schematic rejected: {0}")]
    InvalidSchematic(#[from] SchematicError),

    #[error("Store backend failure: {reason}")]
    Backend { reason: String },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StateConflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
