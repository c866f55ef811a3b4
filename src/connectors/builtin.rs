//! Connectors available in every registry built with
//! [`ConnectorRegistry::with_builtin_connectors`](super::ConnectorRegistry::with_builtin_connectors).

use super::errors::{missing_setting, ActionResult, GuardResult};
use super::{Action, ConnectorContext, Precondition};
use crate::schematic::MachineValue;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Entry action that writes a tracing event.
///
/// Settings:
/// - `message`: text to log; `{machine_id}`, `{schematic}`, `{state}` and
///   `{input}` are substituted
/// - `level`: `debug`, `info` (default), `warn` or `error`
pub struct LogAction;

impl LogAction {
    pub const KEY: &'static str = "log";

    fn render<S: MachineValue, I: MachineValue>(context: &ConnectorContext<S, I>) -> String {
        let template = context
            .setting("message")
            .unwrap_or("Machine {machine_id} entered {state} on {input}");

        template
            .replace("{machine_id}", &context.status.machine_id)
            .replace("{schematic}", &context.status.schematic_name)
            .replace("{state}", &format!("{:?}", context.status.state))
            .replace("{input}", &format!("{:?}", context.input))
    }
}

#[async_trait]
impl<S: MachineValue, I: MachineValue> Action<S, I> for LogAction {
    async fn execute(&self, context: &ConnectorContext<S, I>) -> ActionResult<()> {
        let message = Self::render(context);
        let machine_id = context.machine_id();

        match context.setting("level").unwrap_or("info") {
            "debug" => debug!(machine_id, "{message}"),
            "warn" => warn!(machine_id, "{message}"),
            "error" => error!(machine_id, "{message}"),
            _ => info!(machine_id, "{message}"),
        }

        Ok(())
    }

    fn description(&self) -> &str {
        "Write a log entry when a state is entered"
    }
}

/// Precondition passing when every setting `key = value` is present in the
/// machine's state bag with the same value.
pub struct StateBagEqualsPrecondition;

impl StateBagEqualsPrecondition {
    pub const KEY: &'static str = "state-bag-equals";
}

#[async_trait]
impl<S: MachineValue, I: MachineValue> Precondition<S, I> for StateBagEqualsPrecondition {
    async fn check(&self, context: &ConnectorContext<S, I>) -> GuardResult<bool> {
        if context.settings.is_empty() {
            return Err(missing_setting("at least one state bag key"));
        }

        Ok(context
            .settings
            .iter()
            .all(|(key, expected)| context.status.state_bag.get(key) == Some(expected)))
    }

    fn description(&self) -> &str {
        "State bag must contain the configured values"
    }
}
