use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ClientConfig;

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<ClientConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<ClientConfig> {
    let config_path = Path::new(config_path);

    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let client_config: ClientConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(client_config)
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Duration};

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
[discovery]
uri = "http://discovery.example:4111"
environment = "production"
poll_interval = "30s"

[http_client]
max_retries = 3
min_backoff = "20ms"

[services.storage]
pool = "archive"

[services.billing]
uris = ["http://10.0.0.1:8080", "http://10.0.0.2:8080"]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        let discovery = config.discovery.as_ref().unwrap();
        assert_eq!(discovery.environment, "production");
        assert_eq!(discovery.poll_interval, Duration::from_secs(30));
        assert_eq!(config.http_client.max_retries, 3);
        assert_eq!(config.http_client.min_backoff, Duration::from_millis(20));
        assert_eq!(config.http_client.max_backoff, Duration::from_secs(10));
        assert_eq!(config.pool_for("storage"), "archive");
        assert_eq!(
            config.services["billing"].uris.as_deref().unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "discovery": {
    "uri": "http://discovery.example:4111",
    "environment": "staging"
  },
  "services": {
    "storage": {}
  }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.discovery.unwrap().environment, "staging");
        assert_eq!(config.services.len(), 1);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let err = load_config("/nonexistent/lodestar.toml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to build config"));
    }
}
