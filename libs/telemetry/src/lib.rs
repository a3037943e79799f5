//! Tracing and metric helpers shared by the Greentic AMQP connector.
//!
//! Logging goes through `tracing`; metrics go through the `metrics` facade so the
//! embedding application decides which exporter (if any) receives them.

mod config;
mod context;
mod recorder;
mod tracing_init;

pub use config::TelemetryConfig;
pub use context::TelemetryLabels;
pub use recorder::{record_counter, record_gauge, record_histogram};
pub use tracing_init::init_telemetry;

/// Installs the shared subscriber configured from `RUST_LOG` and `LOG_FORMAT`.
pub fn install(service_name: &str) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}
