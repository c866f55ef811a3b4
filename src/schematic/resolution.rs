//! # Transition Resolution
//!
//! Finds the transition a machine takes for an input. A state that does not
//! declare the input defers to its parent, then the parent's parent, so a
//! family of substates can share common edges without repeating them.

use super::model::{MachineValue, Schematic, Transition};
use std::collections::HashMap;

/// A transition together with the state that declared it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTransition<'a, S, I> {
    /// The state whose definition carried the matching input
    pub declared_by: &'a S,
    pub transition: &'a Transition<S, I>,
}

impl<'a, S, I> ResolvedTransition<'a, S, I> {
    /// True when the edge came from an ancestor rather than the state itself
    pub fn is_inherited(&self, from: &S) -> bool
    where
        S: PartialEq,
    {
        self.declared_by != from
    }
}

impl<S: MachineValue, I: MachineValue> Schematic<S, I> {
    /// Resolve the transition for `input` starting at `state`, walking parents
    pub fn resolve_transition(&self, state: &S, input: &I) -> Option<ResolvedTransition<'_, S, I>> {
        // Hop bound keeps lookups finite even for a schematic that skipped validation.
        let mut remaining = self.states.len();
        let mut current = self.states.get(state);

        while let Some(definition) = current {
            if let Some(transition) = definition.transitions.get(input) {
                return Some(ResolvedTransition {
                    declared_by: &definition.value,
                    transition,
                });
            }

            if remaining == 0 {
                return None;
            }
            remaining -= 1;

            current = definition
                .parent
                .as_ref()
                .and_then(|parent| self.states.get(parent));
        }

        None
    }

    /// Parent chain of `state`, nearest first, excluding the state itself
    pub fn ancestors(&self, state: &S) -> Vec<&S> {
        let mut chain = Vec::new();
        let mut current = self.states.get(state).and_then(|d| d.parent.as_ref());

        while let Some(parent) = current {
            if chain.len() >= self.states.len() || chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = self.states.get(parent).and_then(|d| d.parent.as_ref());
        }

        chain
    }

    /// Whether `state` is `ancestor` or inherits from it
    pub fn is_substate_of(&self, state: &S, ancestor: &S) -> bool {
        state == ancestor || self.ancestors(state).contains(&ancestor)
    }

    /// Every input accepted from `state`, own declarations shadowing inherited ones
    pub fn available_inputs(&self, state: &S) -> HashMap<&I, &Transition<S, I>> {
        let mut inputs = HashMap::new();
        let chain = std::iter::once(state).chain(self.ancestors(state));

        for member in chain {
            if let Some(definition) = self.states.get(member) {
                for (input, transition) in &definition.transitions {
                    inputs.entry(input).or_insert(transition);
                }
            }
        }

        inputs
    }
}
