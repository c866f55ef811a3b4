use crate::schematic::MachineValue;
use crate::status::MachineStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Something that happened to a machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event_type",
    rename_all = "snake_case",
    bound(
        serialize = "S: MachineValue, I: MachineValue",
        deserialize = "S: MachineValue, I: MachineValue"
    )
)]
pub enum MachineEvent<S, I> {
    MachineCreated {
        machine_id: String,
        schematic_name: String,
        state: S,
        commit_tag: Uuid,
        occurred_at: DateTime<Utc>,
    },
    /// A commit landed; published before the target state's entry action runs
    Transitioned {
        machine_id: String,
        schematic_name: String,
        from_state: S,
        to_state: S,
        input: I,
        payload: Option<Value>,
        commit_tag: Uuid,
        occurred_at: DateTime<Utc>,
    },
    MachineDeleted {
        machine_id: String,
        schematic_name: String,
        occurred_at: DateTime<Utc>,
    },
}

impl<S: MachineValue, I: MachineValue> MachineEvent<S, I> {
    pub fn created(status: &MachineStatus<S>) -> Self {
        Self::MachineCreated {
            machine_id: status.machine_id.clone(),
            schematic_name: status.schematic_name.clone(),
            state: status.state.clone(),
            commit_tag: status.commit_tag,
            occurred_at: status.updated_time,
        }
    }

    pub fn transitioned(
        from_state: S,
        status: &MachineStatus<S>,
        input: I,
        payload: Option<Value>,
    ) -> Self {
        Self::Transitioned {
            machine_id: status.machine_id.clone(),
            schematic_name: status.schematic_name.clone(),
            from_state,
            to_state: status.state.clone(),
            input,
            payload,
            commit_tag: status.commit_tag,
            occurred_at: status.updated_time,
        }
    }

    pub fn deleted(machine_id: impl Into<String>, schematic_name: impl Into<String>) -> Self {
        Self::MachineDeleted {
            machine_id: machine_id.into(),
            schematic_name: schematic_name.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MachineCreated { .. } => "machine_created",
            Self::Transitioned { .. } => "transitioned",
            Self::MachineDeleted { .. } => "machine_deleted",
        }
    }

    pub fn machine_id(&self) -> &str {
        match self {
            Self::MachineCreated { machine_id, .. }
            | Self::Transitioned { machine_id, .. }
            | Self::MachineDeleted { machine_id, .. } => machine_id,
        }
    }

    pub fn schematic_name(&self) -> &str {
        match self {
            Self::MachineCreated { schematic_name, .. }
            | Self::Transitioned { schematic_name, .. }
            | Self::MachineDeleted { schematic_name, .. } => schematic_name,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::MachineCreated { occurred_at, .. }
            | Self::Transitioned { occurred_at, .. }
            | Self::MachineDeleted { occurred_at, .. } => *occurred_at,
        }
    }
}
