//! # Schematic Data Model
//!
//! Immutable definition of a machine's behavior: states, the transitions
//! leaving them, and the connector bindings (entry actions and preconditions)
//! that run around a transition.
//!
//! State and input identities are plain values. Anything that implements
//! [`MachineValue`] can be used, which in practice means a tagged enum or an
//! integer:
//!
//! ```rust
//! use schematic_core::schematic::{SchematicBuilder, StateDefinition};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
//! enum Door { Open, Closed }
//!
//! #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
//! enum Push { Open, Close }
//!
//! let schematic = SchematicBuilder::new("door", Door::Closed)
//!     .with_state(StateDefinition::new(Door::Closed).with_transition(Push::Open, Door::Open))
//!     .with_state(StateDefinition::new(Door::Open).with_transition(Push::Close, Door::Closed))
//!     .build()
//!     .expect("valid schematic");
//!
//! assert_eq!(schematic.states.len(), 2);
//! ```

use super::serde_support::{keyed_seq, Keyed};
use super::validation::SchematicError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Bounds shared by state and input identity types.
///
/// Blanket-implemented, so user types only need the derives.
pub trait MachineValue:
    Clone + Eq + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

impl<T> MachineValue for T where
    T: Clone + Eq + Hash + Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
}

/// How often a `send` may re-read and retry after losing a commit race.
///
/// On the wire this is an integer: `-1` retries without a count limit, `0`
/// never retries and `N > 0` retries up to `N` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum ConflictRetryPolicy {
    /// Fail on the first conflict
    Never,
    /// Retry up to the given number of times
    Limited(u32),
    /// Retry until the commit lands or the caller cancels
    Unbounded,
}

impl ConflictRetryPolicy {
    /// Build a policy from its integer encoding
    pub fn from_count(count: i32) -> Result<Self, SchematicError> {
        match count {
            -1 => Ok(Self::Unbounded),
            0 => Ok(Self::Never),
            n if n > 0 => Ok(Self::Limited(n as u32)),
            n => Err(SchematicError::InvalidRetryPolicy { value: n }),
        }
    }

    /// Integer encoding of this policy
    pub fn as_count(&self) -> i32 {
        match self {
            Self::Unbounded => -1,
            Self::Never => 0,
            Self::Limited(0) => 0,
            Self::Limited(n) => i32::try_from(*n).unwrap_or(i32::MAX),
        }
    }

    /// Whether another attempt is allowed after `retries_so_far` retries
    pub fn allows_retry(&self, retries_so_far: u32) -> bool {
        match self {
            Self::Never => false,
            Self::Limited(limit) => retries_so_far < *limit,
            Self::Unbounded => true,
        }
    }
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self::Limited(3)
    }
}

impl TryFrom<i32> for ConflictRetryPolicy {
    type Error = SchematicError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::from_count(value)
    }
}

impl From<ConflictRetryPolicy> for i32 {
    fn from(policy: ConflictRetryPolicy) -> Self {
        policy.as_count()
    }
}

/// Late-bound reference to a precondition (or guard) connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreconditionBinding {
    pub connector_key: String,
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl PreconditionBinding {
    pub fn new(connector_key: impl Into<String>) -> Self {
        Self {
            connector_key: connector_key.into(),
            settings: HashMap::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }
}

/// Late-bound reference to an entry action connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "I: MachineValue", deserialize = "I: MachineValue"))]
pub struct ActionBinding<I> {
    pub connector_key: String,
    #[serde(default)]
    pub settings: HashMap<String, String>,
    /// Input sent automatically when the action fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure_input: Option<I>,
}

impl<I: MachineValue> ActionBinding<I> {
    pub fn new(connector_key: impl Into<String>) -> Self {
        Self {
            connector_key: connector_key.into(),
            settings: HashMap::new(),
            on_failure_input: None,
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn on_failure(mut self, input: I) -> Self {
        self.on_failure_input = Some(input);
        self
    }
}

/// Edge leaving a state on a given input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: MachineValue, I: MachineValue",
    deserialize = "S: MachineValue, I: MachineValue"
))]
pub struct Transition<S, I> {
    pub input: I,
    pub resultant_state: S,
    /// Replaces the resultant state's own precondition for this edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<PreconditionBinding>,
}

impl<S, I: MachineValue> Keyed for Transition<S, I> {
    type Key = I;

    fn key(&self) -> &I {
        &self.input
    }
}

/// A single state and everything that leaves or guards it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: MachineValue, I: MachineValue",
    deserialize = "S: MachineValue, I: MachineValue"
))]
pub struct StateDefinition<S, I> {
    pub value: S,
    /// Substate back-reference, used only for transition lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<S>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_action: Option<ActionBinding<I>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precondition: Option<PreconditionBinding>,
    #[serde(default, with = "keyed_seq")]
    pub transitions: HashMap<I, Transition<S, I>>,
}

impl<S: MachineValue, I: MachineValue> StateDefinition<S, I> {
    pub fn new(value: S) -> Self {
        Self {
            value,
            parent: None,
            description: None,
            entry_action: None,
            precondition: None,
            transitions: HashMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: S) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_entry_action(mut self, action: ActionBinding<I>) -> Self {
        self.entry_action = Some(action);
        self
    }

    pub fn with_precondition(mut self, precondition: PreconditionBinding) -> Self {
        self.precondition = Some(precondition);
        self
    }

    /// Add (or replace) the transition taken on `input`
    pub fn with_transition(mut self, input: I, resultant_state: S) -> Self {
        self.transitions.insert(
            input.clone(),
            Transition {
                input,
                resultant_state,
                precondition: None,
            },
        );
        self
    }

    /// Add (or replace) a transition carrying its own precondition
    pub fn with_guarded_transition(
        mut self,
        input: I,
        resultant_state: S,
        precondition: PreconditionBinding,
    ) -> Self {
        self.transitions.insert(
            input.clone(),
            Transition {
                input,
                resultant_state,
                precondition: Some(precondition),
            },
        );
        self
    }
}

// Written by hand: the derive would only bound `S: PartialEq`, while the
// transition map needs hashable keys to compare.
impl<S: MachineValue, I: MachineValue> PartialEq for StateDefinition<S, I> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.parent == other.parent
            && self.description == other.description
            && self.entry_action == other.entry_action
            && self.precondition == other.precondition
            && self.transitions == other.transitions
    }
}

impl<S: MachineValue, I: MachineValue> Eq for StateDefinition<S, I> {}

impl<S: MachineValue, I> Keyed for StateDefinition<S, I> {
    type Key = S;

    fn key(&self) -> &S {
        &self.value
    }
}

/// Immutable definition of a machine's behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: MachineValue, I: MachineValue",
    deserialize = "S: MachineValue, I: MachineValue"
))]
pub struct Schematic<S, I> {
    pub name: String,
    pub initial_state: S,
    #[serde(default)]
    pub conflict_retry_policy: ConflictRetryPolicy,
    #[serde(with = "keyed_seq")]
    pub states: HashMap<S, StateDefinition<S, I>>,
}

impl<S: MachineValue, I: MachineValue> Schematic<S, I> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial_state(&self) -> &S {
        &self.initial_state
    }

    pub fn conflict_retry_policy(&self) -> ConflictRetryPolicy {
        self.conflict_retry_policy
    }

    pub fn state(&self, value: &S) -> Option<&StateDefinition<S, I>> {
        self.states.get(value)
    }

    pub fn contains_state(&self, value: &S) -> bool {
        self.states.contains_key(value)
    }
}

impl<S: MachineValue, I: MachineValue> PartialEq for Schematic<S, I> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.initial_state == other.initial_state
            && self.conflict_retry_policy == other.conflict_retry_policy
            && self.states == other.states
    }
}

impl<S: MachineValue, I: MachineValue> Eq for Schematic<S, I> {}
