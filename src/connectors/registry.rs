//! # Connector Registry
//!
//! Thread-safe map from connector key to registered implementations.
//!
//! Registration never fails: a key registered twice under the same role is
//! only reported when something tries to resolve it
//! ([`ResolutionError::Ambiguous`]). Resolution happens on every invocation,
//! so `replace_*` and `unregister` take effect for the next transition
//! without restarting anything.
//!
//! The registry is typed by the state and input types of the machines it
//! serves, which scopes keys to that pair.
//!
//! ## Usage
//!
//! ```rust
//! use schematic_core::connectors::{ActionError, ConnectorContext, ConnectorRegistry, FnAction};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let registry = ConnectorRegistry::<String, String>::with_builtin_connectors();
//!
//! registry.register_action(
//!     "notify",
//!     Arc::new(FnAction::new("notify", |_ctx: ConnectorContext<String, String>| async {
//!         Ok::<(), ActionError>(())
//!     })),
//! );
//! assert!(registry.resolve_action("notify").is_ok());
//!
//! // A second registration makes the key ambiguous until one is removed
//! registry.register_action(
//!     "notify",
//!     Arc::new(FnAction::new("notify again", |_ctx: ConnectorContext<String, String>| async {
//!         Ok::<(), ActionError>(())
//!     })),
//! );
//! assert!(registry.resolve_action("notify").is_err());
//! # });
//! ```

use super::builtin::{LogAction, StateBagEqualsPrecondition};
use super::errors::{ConnectorRole, ResolutionError, ResolutionResult};
use super::{Action, Precondition};
use crate::schematic::MachineValue;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

type ActionEntry<S, I> = Arc<dyn Action<S, I>>;

#[derive(Clone)]
struct PreconditionEntry<S, I> {
    role: ConnectorRole,
    connector: Arc<dyn Precondition<S, I>>,
}

struct RegistryInner<S, I> {
    actions: DashMap<String, Vec<ActionEntry<S, I>>>,
    preconditions: DashMap<String, Vec<PreconditionEntry<S, I>>>,
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub action_keys: usize,
    pub precondition_keys: usize,
    pub total_registrations: usize,
    pub ambiguous_keys: usize,
}

/// Cheaply cloneable handle to a shared set of connector registrations
pub struct ConnectorRegistry<S, I> {
    inner: Arc<RegistryInner<S, I>>,
}

impl<S: MachineValue, I: MachineValue> ConnectorRegistry<S, I> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                actions: DashMap::new(),
                preconditions: DashMap::new(),
            }),
        }
    }

    /// Create a registry pre-loaded with the built-in connectors
    pub fn with_builtin_connectors() -> Self {
        let registry = Self::new();
        registry.register_action(LogAction::KEY, Arc::new(LogAction));
        registry.register_precondition(
            StateBagEqualsPrecondition::KEY,
            Arc::new(StateBagEqualsPrecondition),
        );
        registry
    }

    pub fn register_action(&self, connector_key: impl Into<String>, action: Arc<dyn Action<S, I>>) {
        let connector_key = connector_key.into();
        debug!(
            connector_key = %connector_key,
            description = action.description(),
            "Registering action connector"
        );
        self.inner
            .actions
            .entry(connector_key)
            .or_default()
            .push(action);
    }

    pub fn register_precondition(
        &self,
        connector_key: impl Into<String>,
        precondition: Arc<dyn Precondition<S, I>>,
    ) {
        self.push_precondition(connector_key.into(), ConnectorRole::Precondition, precondition);
    }

    pub fn register_guard(
        &self,
        connector_key: impl Into<String>,
        guard: Arc<dyn Precondition<S, I>>,
    ) {
        self.push_precondition(connector_key.into(), ConnectorRole::Guard, guard);
    }

    /// Swap every action registered under `connector_key` for `action`
    pub fn replace_action(&self, connector_key: impl Into<String>, action: Arc<dyn Action<S, I>>) {
        let connector_key = connector_key.into();
        info!(connector_key = %connector_key, "Replacing action connector");
        self.inner.actions.insert(connector_key, vec![action]);
    }

    /// Swap every precondition or guard registered under `connector_key`
    pub fn replace_precondition(
        &self,
        connector_key: impl Into<String>,
        precondition: Arc<dyn Precondition<S, I>>,
    ) {
        let connector_key = connector_key.into();
        info!(connector_key = %connector_key, "Replacing precondition connector");
        self.inner.preconditions.insert(
            connector_key,
            vec![PreconditionEntry {
                role: ConnectorRole::Precondition,
                connector: precondition,
            }],
        );
    }

    /// Remove all registrations for `connector_key` under `role`.
    ///
    /// Returns the number of registrations removed.
    pub fn unregister(&self, connector_key: &str, role: ConnectorRole) -> usize {
        let removed = match role {
            ConnectorRole::Action => self
                .inner
                .actions
                .remove(connector_key)
                .map_or(0, |(_, entries)| entries.len()),
            ConnectorRole::Precondition | ConnectorRole::Guard => {
                let mut removed = 0;
                if let Some(mut entries) = self.inner.preconditions.get_mut(connector_key) {
                    let before = entries.len();
                    entries.retain(|entry| entry.role != role);
                    removed = before - entries.len();
                }
                self.inner
                    .preconditions
                    .remove_if(connector_key, |_, entries| entries.is_empty());
                removed
            }
        };

        if removed > 0 {
            info!(connector_key, role = %role, removed, "Unregistered connector");
        }
        removed
    }

    pub fn resolve_action(&self, connector_key: &str) -> ResolutionResult<Arc<dyn Action<S, I>>> {
        let entries = self.inner.actions.get(connector_key);
        match entries.as_deref().map(Vec::as_slice) {
            None | Some([]) => Err(ResolutionError::NotFound {
                connector_key: connector_key.to_string(),
                role: ConnectorRole::Action,
            }),
            Some([action]) => Ok(Arc::clone(action)),
            Some(many) => Err(ResolutionError::Ambiguous {
                connector_key: connector_key.to_string(),
                role: ConnectorRole::Action,
                registrations: many.len(),
            }),
        }
    }

    /// Resolve a precondition or guard; both roles share one key space
    pub fn resolve_precondition(
        &self,
        connector_key: &str,
    ) -> ResolutionResult<Arc<dyn Precondition<S, I>>> {
        let entries = self.inner.preconditions.get(connector_key);
        match entries.as_deref().map(Vec::as_slice) {
            None | Some([]) => Err(ResolutionError::NotFound {
                connector_key: connector_key.to_string(),
                role: ConnectorRole::Precondition,
            }),
            Some([entry]) => Ok(Arc::clone(&entry.connector)),
            Some(many) => Err(ResolutionError::Ambiguous {
                connector_key: connector_key.to_string(),
                role: many[0].role,
                registrations: many.len(),
            }),
        }
    }

    /// Registered keys for a role, sorted
    pub fn keys(&self, role: ConnectorRole) -> Vec<String> {
        let mut keys: Vec<String> = match role {
            ConnectorRole::Action => self.inner.actions.iter().map(|e| e.key().clone()).collect(),
            ConnectorRole::Precondition | ConnectorRole::Guard => self
                .inner
                .preconditions
                .iter()
                .filter(|e| e.value().iter().any(|entry| entry.role == role))
                .map(|e| e.key().clone())
                .collect(),
        };
        keys.sort();
        keys
    }

    pub fn stats(&self) -> RegistryStats {
        let action_registrations: usize = self.inner.actions.iter().map(|e| e.value().len()).sum();
        let precondition_registrations: usize = self
            .inner
            .preconditions
            .iter()
            .map(|e| e.value().len())
            .sum();
        let ambiguous_keys = self.inner.actions.iter().filter(|e| e.value().len() > 1).count()
            + self
                .inner
                .preconditions
                .iter()
                .filter(|e| e.value().len() > 1)
                .count();

        RegistryStats {
            action_keys: self.inner.actions.len(),
            precondition_keys: self.inner.preconditions.len(),
            total_registrations: action_registrations + precondition_registrations,
            ambiguous_keys,
        }
    }

    fn push_precondition(
        &self,
        connector_key: String,
        role: ConnectorRole,
        connector: Arc<dyn Precondition<S, I>>,
    ) {
        debug!(
            connector_key = %connector_key,
            role = %role,
            description = connector.description(),
            "Registering precondition connector"
        );
        self.inner
            .preconditions
            .entry(connector_key)
            .or_default()
            .push(PreconditionEntry { role, connector });
    }
}

impl<S: MachineValue, I: MachineValue> Default for ConnectorRegistry<S, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, I> Clone for ConnectorRegistry<S, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: MachineValue, I: MachineValue> fmt::Debug for ConnectorRegistry<S, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("actions", &self.keys(ConnectorRole::Action))
            .field("preconditions", &self.keys(ConnectorRole::Precondition))
            .field("guards", &self.keys(ConnectorRole::Guard))
            .finish()
    }
}
