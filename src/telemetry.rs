use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable.
pub fn init_telemetry(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let json_layer = config.json_logs.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!config.json_logs).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    tracing::debug!("Lifecycle telemetry initialized");
    Ok(())
}

/// Generate a correlation ID for linking related operations
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one engine call
pub fn create_lifecycle_span(
    operation: &str,
    asset_id: Option<&str>,
    workflow_id: Option<&str>,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "lifecycle",
        operation = operation,
        asset_id = asset_id,
        workflow_id = workflow_id,
        correlation_id = correlation_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_uuids() {
        let id = generate_correlation_id();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, generate_correlation_id());
    }

    #[test]
    fn test_span_creation_without_subscriber() {
        let span = create_lifecycle_span("submit", Some("SRV-001"), None, "c-1");
        let _guard = span.enter();
    }
}
