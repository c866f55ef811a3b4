//! Value-level assembly of a [`Schematic`].
//!
//! This is deliberately not a DSL: it collects state definitions, rejects
//! duplicates and runs [`Schematic::validate`] on the result.

use super::model::{ConflictRetryPolicy, MachineValue, Schematic, StateDefinition};
use super::validation::{SchematicError, SchematicResult};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct SchematicBuilder<S, I> {
    name: String,
    initial_state: S,
    conflict_retry_policy: ConflictRetryPolicy,
    states: Vec<StateDefinition<S, I>>,
}

impl<S: MachineValue, I: MachineValue> SchematicBuilder<S, I> {
    pub fn new(name: impl Into<String>, initial_state: S) -> Self {
        Self {
            name: name.into(),
            initial_state,
            conflict_retry_policy: ConflictRetryPolicy::default(),
            states: Vec::new(),
        }
    }

    pub fn conflict_retry_policy(mut self, policy: ConflictRetryPolicy) -> Self {
        self.conflict_retry_policy = policy;
        self
    }

    /// Set the policy from its integer encoding (`-1`, `0` or `N`)
    pub fn conflict_retry_count(mut self, count: i32) -> SchematicResult<Self> {
        self.conflict_retry_policy = ConflictRetryPolicy::from_count(count)?;
        Ok(self)
    }

    pub fn with_state(mut self, definition: StateDefinition<S, I>) -> Self {
        self.states.push(definition);
        self
    }

    pub fn with_states(
        mut self,
        definitions: impl IntoIterator<Item = StateDefinition<S, I>>,
    ) -> Self {
        self.states.extend(definitions);
        self
    }

    pub fn build(self) -> SchematicResult<Schematic<S, I>> {
        let mut states = HashMap::with_capacity(self.states.len());

        for definition in self.states {
            if states.contains_key(&definition.value) {
                return Err(SchematicError::DuplicateState {
                    schematic: self.name,
                    state: format!("{:?}", definition.value),
                });
            }
            states.insert(definition.value.clone(), definition);
        }

        let schematic = Schematic {
            name: self.name,
            initial_state: self.initial_state,
            conflict_retry_policy: self.conflict_retry_policy,
            states,
        };
        schematic.validate()?;

        Ok(schematic)
    }
}
