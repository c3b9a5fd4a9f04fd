use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging with JSON output
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init()
        .wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!("lodestar JSON logging initialized");
    Ok(())
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(true),
        )
        .try_init()
        .wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!("lodestar console logging initialized");
    Ok(())
}

/// Initialize tracing with an explicit filter directive and output format
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    let installed = if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact().with_ansi(true))
            .try_init()
    };
    installed.wrap_err("Failed to install tracing subscriber")?;

    tracing::debug!(level, json_format, include_spans, "lodestar logging initialized");
    Ok(())
}

/// Span wrapping a discovery updater's polling task
pub fn create_updater_span(service_type: &str, pool: &str) -> tracing::Span {
    tracing::info_span!(
        "discovery_updater",
        service_type = service_type,
        pool = pool,
    )
}

/// Span wrapping one balanced logical request
pub fn create_balanced_request_span(service: &str, method: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "balanced_request",
        service = service,
        http.method = method,
        http.path = path,
        http.status_code = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_with_config() {
        // Only one global subscriber per test binary; a repeat install reports an error
        let first = init_tracing_with_config("debug", true, true);
        let second = init_tracing_with_config("info", false, false);
        assert!(first.is_err() || second.is_err());
    }

    #[test]
    fn test_create_updater_span() {
        let span = create_updater_span("storage", "general");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "discovery_updater");
        }
    }

    #[test]
    fn test_create_balanced_request_span() {
        let span = create_balanced_request_span("type=[storage]", "GET", "v1/items");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "balanced_request");
        }
    }
}
