//! # Machine Status
//!
//! The one mutable record per machine. Every successful transition replaces
//! `state`, `commit_tag` and `updated_time` together; `metadata` is fixed at
//! creation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::schematic::MachineValue;

/// Current status of a single machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(serialize = "S: MachineValue", deserialize = "S: MachineValue"))]
pub struct MachineStatus<S> {
    pub machine_id: String,
    pub schematic_name: String,
    pub state: S,
    /// Optimistic-concurrency fencing token, replaced on every commit
    pub commit_tag: Uuid,
    pub updated_time: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub state_bag: HashMap<String, String>,
}

impl<S: MachineValue> MachineStatus<S> {
    /// Fresh status for a newly created machine
    pub fn initial(
        machine_id: impl Into<String>,
        schematic_name: impl Into<String>,
        state: S,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            machine_id: machine_id.into(),
            schematic_name: schematic_name.into(),
            state,
            commit_tag: Uuid::new_v4(),
            updated_time: Utc::now(),
            metadata,
            state_bag: HashMap::new(),
        }
    }

    /// Status after committing a move to `state`.
    ///
    /// State-bag updates are merged key by key over the existing bag.
    pub fn committed(&self, state: S, state_bag_updates: Option<&HashMap<String, String>>) -> Self {
        let mut state_bag = self.state_bag.clone();
        if let Some(updates) = state_bag_updates {
            state_bag.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Self {
            machine_id: self.machine_id.clone(),
            schematic_name: self.schematic_name.clone(),
            state,
            commit_tag: Uuid::new_v4(),
            updated_time: Utc::now(),
            metadata: self.metadata.clone(),
            state_bag,
        }
    }
}

/// Allocate an identifier for a machine created without one
pub fn generate_machine_id() -> String {
    Uuid::new_v4().to_string()
}
