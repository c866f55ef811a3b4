//! # Schematic Validation
//!
//! Structural invariants a schematic must satisfy before machines may be
//! created from it. Stores refuse schematics that fail [`Schematic::validate`].

use super::model::{MachineValue, Schematic};
use std::collections::HashSet;
use thiserror::Error;

/// Structural problems found in a schematic
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchematicError {
    #[error("Schematic name must not be empty")]
    EmptyName,

    #[error("Schematic {schematic} has no definition for its initial state {state}")]
    MissingInitialState { schematic: String, state: String },

    #[error("State {state} is declared more than once in schematic {schematic}")]
    DuplicateState { schematic: String, state: String },

    #[error("State map key {key} does not match the state value {value} it stores")]
    MismatchedStateKey { key: String, value: String },

    #[error("Transition map key {key} in state {state} does not match its input {input}")]
    MismatchedInputKey {
        state: String,
        key: String,
        input: String,
    },

    #[error("Transition {state} --{input}--> {resultant} targets an undefined state")]
    UnknownResultantState {
        state: String,
        input: String,
        resultant: String,
    },

    #[error("State {state} names undefined parent {parent}")]
    UnknownParent { state: String, parent: String },

    #[error("Parent chain starting at state {state} is cyclic")]
    ParentCycle { state: String },

    #[error("Entry action {connector_key} on state {state} falls back to input {input}, which the state does not accept")]
    UnresolvableFailureInput {
        state: String,
        connector_key: String,
        input: String,
    },

    #[error("Invalid conflict retry policy {value}: expected -1, 0 or a positive count")]
    InvalidRetryPolicy { value: i32 },
}

pub type SchematicResult<T> = Result<T, SchematicError>;

impl<S: MachineValue, I: MachineValue> Schematic<S, I> {
    /// Check every structural invariant, reporting the first violation found
    pub fn validate(&self) -> SchematicResult<()> {
        if self.name.trim().is_empty() {
            return Err(SchematicError::EmptyName);
        }

        if !self.states.contains_key(&self.initial_state) {
            return Err(SchematicError::MissingInitialState {
                schematic: self.name.clone(),
                state: format!("{:?}", self.initial_state),
            });
        }

        for (key, definition) in &self.states {
            if key != &definition.value {
                return Err(SchematicError::MismatchedStateKey {
                    key: format!("{key:?}"),
                    value: format!("{:?}", definition.value),
                });
            }

            if let Some(parent) = &definition.parent {
                if !self.states.contains_key(parent) {
                    return Err(SchematicError::UnknownParent {
                        state: format!("{key:?}"),
                        parent: format!("{parent:?}"),
                    });
                }
            }

            for (input, transition) in &definition.transitions {
                if input != &transition.input {
                    return Err(SchematicError::MismatchedInputKey {
                        state: format!("{key:?}"),
                        key: format!("{input:?}"),
                        input: format!("{:?}", transition.input),
                    });
                }

                if !self.states.contains_key(&transition.resultant_state) {
                    return Err(SchematicError::UnknownResultantState {
                        state: format!("{key:?}"),
                        input: format!("{input:?}"),
                        resultant: format!("{:?}", transition.resultant_state),
                    });
                }
            }
        }

        self.validate_parent_chains()?;
        self.validate_failure_inputs()
    }

    fn validate_parent_chains(&self) -> SchematicResult<()> {
        for start in self.states.keys() {
            let mut visited = HashSet::new();
            let mut current = Some(start);

            while let Some(state) = current {
                if !visited.insert(state) {
                    return Err(SchematicError::ParentCycle {
                        state: format!("{start:?}"),
                    });
                }
                current = self
                    .states
                    .get(state)
                    .and_then(|definition| definition.parent.as_ref());
            }
        }

        Ok(())
    }

    // Runs after parent validation so resolution is guaranteed to terminate.
    fn validate_failure_inputs(&self) -> SchematicResult<()> {
        for (state, definition) in &self.states {
            let Some(action) = &definition.entry_action else {
                continue;
            };
            let Some(input) = &action.on_failure_input else {
                continue;
            };

            if self.resolve_transition(state, input).is_none() {
                return Err(SchematicError::UnresolvableFailureInput {
                    state: format!("{state:?}"),
                    connector_key: action.connector_key.clone(),
                    input: format!("{input:?}"),
                });
            }
        }

        Ok(())
    }
}
