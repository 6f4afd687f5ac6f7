//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error ({format}): {message}")]
    Parse { format: ConfigFormat, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("No configuration file to reload from")]
    NoSource,
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Document formats accepted for the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Format implied by a file extension. Unknown extensions are read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => ConfigFormat::Json,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
        })
    }
}

/// Load and validate configuration from a file; the format follows the extension.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, ConfigFormat::from_path(path))
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<GatewayConfig, ConfigError> {
    let parse_err = |message: String| ConfigError::Parse { format, message };

    let config: GatewayConfig = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string()))?,
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string()))?,
    };

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Dialect, RouteMode};
    use crate::config::schema::{AuthSource, RouteBackend};
    use std::io::Write;

    const YAML: &str = r#"
listeners:
  - name: main
    bindAddress: 127.0.0.1:3000
    routes:
      - name: openai
        pathPrefix: /openai
        backends: [openai-primary]
        policies:
          rateLimit: { requestsPerSecond: 5, burst: 10 }
      - name: anthropic
        pathPrefix: /anthropic
        backends:
          - name: claude
            protocol: anthropic
            model: claude-3-5-sonnet
            baseUrl: https://api.anthropic.com
            authInjection: { type: envRef, name: ANTHROPIC_API_KEY }
backends:
  - name: openai-primary
    protocol: openai
    model: gpt-4o-mini
    baseUrl: https://api.openai.com
    nativeRouteTable:
      /v1/chat/completions: passthrough
      /v1/messages: messages
    authInjection: { type: staticKey, value: sk-test }
    requestTimeoutMs: 1500
    retry: { enabled: true, maxAttempts: 2 }
"#;

    #[test]
    fn test_parse_yaml() {
        let config = parse_config(YAML, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.listeners.len(), 1);

        let routes = &config.listeners[0].routes;
        assert_eq!(routes[0].backends, vec![RouteBackend::Reference("openai-primary".into())]);
        assert_eq!(routes[0].policies.rate_limit.as_ref().unwrap().burst, 10);
        match &routes[1].backends[0] {
            RouteBackend::Inline(backend) => {
                assert_eq!(backend.protocol, Dialect::Anthropic);
                assert_eq!(
                    backend.auth_injection.source,
                    AuthSource::EnvRef { name: "ANTHROPIC_API_KEY".into() }
                );
            }
            other => panic!("expected inline backend, got {:?}", other),
        }

        let backend = &config.backends[0];
        assert_eq!(backend.request_timeout_ms, Some(1500));
        let retry = backend.retry.as_ref().unwrap();
        assert!(retry.enabled);
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.base_delay_ms, 100); // section default
        assert_eq!(
            backend.native_route_table.as_ref().unwrap().get("/v1/messages"),
            Some(&RouteMode::Messages)
        );
        // Globals fall back to defaults
        assert_eq!(config.timeouts.request_ms, 30_000);
    }

    #[test]
    fn test_parse_json_and_toml() {
        let json = r#"{
            "listeners": [{"bindAddress": "127.0.0.1:3001", "routes": [
                {"name": "r", "pathPrefix": "/", "backends": ["b"]}
            ]}],
            "backends": [{"name": "b", "protocol": "mcp", "baseUrl": "http://localhost:7000"}]
        }"#;
        let config = parse_config(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.listeners[0].effective_name(), "127.0.0.1:3001");

        let toml = r#"
[[listeners]]
name = "main"
bindAddress = "127.0.0.1:3002"

[[listeners.routes]]
name = "r"
pathPrefix = "/openai"
backends = ["b"]

[[backends]]
name = "b"
protocol = "openai"
baseUrl = "http://localhost:7001"
"#;
        let config = parse_config(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.backends[0].protocol, Dialect::OpenAi);
    }

    #[test]
    fn test_parse_error_names_format() {
        let err = parse_config("listeners: [", ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: ConfigFormat::Yaml, .. }));
        assert!(err.to_string().starts_with("Parse error (yaml)"));
    }

    #[test]
    fn test_validation_error_lists_every_problem() {
        let yaml = r#"
listeners:
  - bindAddress: 127.0.0.1:3000
    routes:
      - { name: a, pathPrefix: /a, backends: [missing-one] }
      - { name: b, pathPrefix: /b, backends: [missing-two] }
"#;
        let err = parse_config(yaml, ConfigFormat::Yaml).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("missing-one"));
        assert!(message.contains("missing-two"));
    }

    #[test]
    fn test_load_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.backends.len(), 1);

        assert_eq!(ConfigFormat::from_path(Path::new("gw.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("gw.toml")), ConfigFormat::Toml);
        assert!(matches!(
            load_config(Path::new("/definitely/not/here.yaml")),
            Err(ConfigError::Io(_))
        ));
    }
}
