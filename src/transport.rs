//! # Remote Transport Boundary
//!
//! Transport-agnostic request/response envelopes for driving an engine from
//! another process. Whatever carries the bytes (HTTP, gRPC, a queue) hands a
//! [`WireSendRequest`] to a [`RemoteAdapter`] and ships the
//! [`WireSendResponse`] back.
//!
//! State and input values travel as JSON text alongside the Rust type names
//! they were encoded from, so a client built against different identity
//! types is rejected instead of misinterpreted.

use crate::engine::{SendOptions, StateEngine};
use crate::error::{EngineError, EngineResult};
use crate::schematic::{MachineValue, Schematic};
use crate::status::MachineStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSendRequest {
    pub state_type: String,
    pub input_type: String,
    pub machine_id: String,
    /// JSON encoding of the input value
    pub input: String,
    /// JSON payload handed to the connectors
    pub payload: Option<String>,
    #[serde(default)]
    pub state_bag_updates: Option<HashMap<String, String>>,
    pub expected_commit_tag: Option<Uuid>,
}

impl WireSendRequest {
    /// Encode a request for an engine over `S` and `I`
    pub fn new<S: MachineValue, I: MachineValue>(
        machine_id: impl Into<String>,
        input: &I,
    ) -> EngineResult<Self> {
        Ok(Self {
            state_type: type_name::<S>().to_string(),
            input_type: type_name::<I>().to_string(),
            machine_id: machine_id.into(),
            input: serde_json::to_string(input)?,
            payload: None,
            state_bag_updates: None,
            expected_commit_tag: None,
        })
    }

    pub fn with_payload(mut self, payload: &serde_json::Value) -> EngineResult<Self> {
        self.payload = Some(serde_json::to_string(payload)?);
        Ok(self)
    }

    pub fn expecting_commit_tag(mut self, commit_tag: Uuid) -> Self {
        self.expected_commit_tag = Some(commit_tag);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSendResponse {
    pub machine_id: String,
    /// JSON encoding of the state after the send
    pub state: String,
    pub commit_tag: Uuid,
    pub updated_time: DateTime<Utc>,
}

impl WireSendResponse {
    fn from_status<S: MachineValue>(status: &MachineStatus<S>) -> EngineResult<Self> {
        Ok(Self {
            machine_id: status.machine_id.clone(),
            state: serde_json::to_string(&status.state)?,
            commit_tag: status.commit_tag,
            updated_time: status.updated_time,
        })
    }

    /// Decode the state for a client over `S`
    pub fn decode_state<S: MachineValue>(&self) -> EngineResult<S> {
        Ok(serde_json::from_str(&self.state)?)
    }
}

/// Serves wire requests against an engine
#[derive(Clone)]
pub struct RemoteAdapter<S, I> {
    engine: StateEngine<S, I>,
}

impl<S: MachineValue, I: MachineValue> std::fmt::Debug for RemoteAdapter<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAdapter")
            .field("state_type", &type_name::<S>())
            .field("input_type", &type_name::<I>())
            .finish()
    }
}

impl<S: MachineValue, I: MachineValue> RemoteAdapter<S, I> {
    pub fn new(engine: StateEngine<S, I>) -> Self {
        Self { engine }
    }

    #[instrument(skip(self, request), fields(machine_id = %request.machine_id))]
    pub async fn handle_send(&self, request: WireSendRequest) -> EngineResult<WireSendResponse> {
        check_type::<S>("state", &request.state_type)?;
        check_type::<I>("input", &request.input_type)?;

        let input: I = serde_json::from_str(&request.input)?;
        let payload = request
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        let options = SendOptions {
            payload,
            state_bag_updates: request.state_bag_updates,
            expected_commit_tag: request.expected_commit_tag,
        };

        let machine = self.engine.get_machine(&request.machine_id).await?;
        let status = machine.send_with(input, options).await?;
        debug!(commit_tag = %status.commit_tag, "Remote send applied");

        WireSendResponse::from_status(&status)
    }

    /// Current status of a machine in wire form
    pub async fn handle_status(&self, machine_id: &str) -> EngineResult<WireSendResponse> {
        let machine = self.engine.get_machine(machine_id).await?;
        WireSendResponse::from_status(&machine.status().await?)
    }
}

fn check_type<T>(role: &str, received: &str) -> EngineResult<()> {
    let expected = type_name::<T>();
    if expected != received {
        return Err(EngineError::TypeMismatch {
            role: role.to_string(),
            expected: expected.to_string(),
            actual: received.to_string(),
        });
    }
    Ok(())
}

/// Serialize a schematic to JSON bytes
pub fn encode_schematic<S: MachineValue, I: MachineValue>(
    schematic: &Schematic<S, I>,
) -> EngineResult<Vec<u8>> {
    Ok(serde_json::to_vec(schematic)?)
}

/// Deserialize and validate a schematic from JSON bytes
pub fn decode_schematic<S: MachineValue, I: MachineValue>(
    bytes: &[u8],
) -> EngineResult<Schematic<S, I>> {
    let schematic: Schematic<S, I> = serde_json::from_slice(bytes)?;
    schematic.validate()?;
    Ok(schematic)
}
