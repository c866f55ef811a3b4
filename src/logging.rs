//! # Structured Logging Module
//!
//! Environment-aware structured logging for machine lifecycles, transitions
//! and connector invocations.
//!
//! `RUST_LOG` wins when set; otherwise the directive follows `SCHEMATIC_ENV`
//! (falling back to `APP_ENV`), keeping dependencies at `warn`.
//! `SCHEMATIC_LOG_FORMAT=json` switches the console output to JSON lines.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call repeatedly and alongside a subscriber installed elsewhere.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = deployment_environment();
        let json = use_json_format();

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(&environment)));

        let console = if json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .try_init()
            .is_err()
        {
            tracing::debug!("Subscriber already installed, keeping it");
            return;
        }

        tracing::info!(
            environment = %environment,
            json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn deployment_environment() -> String {
    ["SCHEMATIC_ENV", "APP_ENV"]
        .iter()
        .find_map(|key| std::env::var(key).ok())
        .unwrap_or_else(|| "development".to_string())
}

/// Filter directive used when `RUST_LOG` is unset
fn default_directive(environment: &str) -> &'static str {
    match environment {
        "production" => "warn,schematic_core=info",
        _ => "warn,schematic_core=debug",
    }
}

fn use_json_format() -> bool {
    std::env::var("SCHEMATIC_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log structured data for machine lifecycle and transition operations
pub fn log_machine_operation(
    operation: &str,
    machine_id: &str,
    schematic: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        machine_id = %machine_id,
        schematic = %schematic,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "⚙️ MACHINE_OPERATION"
    );
}

/// Log structured data for connector resolution and invocation
pub fn log_connector_operation(
    operation: &str,
    connector_key: &str,
    role: &str,
    machine_id: Option<&str>,
    status: &str,
    duration_ms: Option<u64>,
) {
    tracing::info!(
        operation = %operation,
        connector_key = %connector_key,
        role = %role,
        machine_id = machine_id,
        status = %status,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "🔌 CONNECTOR_OPERATION"
    );
}

/// Log a failure that has no caller left to return it to
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
