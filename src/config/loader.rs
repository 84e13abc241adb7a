use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load configuration from a file, layered with environment overrides.
///
/// The file format is chosen by extension (TOML, YAML, JSON). On top of the
/// file, `BREAKWATER`-prefixed environment variables override nested keys
/// with `__` as the separator (e.g. `BREAKWATER_SERVER__LISTEN_ADDR`), and
/// the conventional deployment variables `JWT_SECRET`, `JWT_REFRESH_SECRET`
/// and `REDIS_URL` override the signing secrets and shared-store URL
/// directly.
pub fn load_config(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .add_source(Environment::with_prefix("BREAKWATER").separator("__"))
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    let mut gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    apply_secret_overrides(&mut gateway_config);

    Ok(gateway_config)
}

/// Apply the conventional secret environment variables over the file values.
fn apply_secret_overrides(config: &mut GatewayConfig) {
    if let Ok(secret) = std::env::var("JWT_SECRET") {
        config.tokens.access_secret = secret;
    }
    if let Ok(secret) = std::env::var("JWT_REFRESH_SECRET") {
        config.tokens.refresh_secret = secret;
    }
    if let Ok(url) = std::env::var("REDIS_URL") {
        config.rate_limits.store_url = Some(url);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn loads_toml_config() {
        let toml_content = r#"
[server]
listen_addr = "127.0.0.1:3000"
upstream_timeout = "10s"

[tokens]
access_secret = "file-access-secret"
refresh_secret = "file-refresh-secret"

[[routes]]
prefix = "/api/jobs"
service = "job-service"
backend_url = "http://localhost:5003/api/jobs"

[[routes]]
prefix = "/api/auth"
service = "auth-service"
backend_url = "http://localhost:5001/api/auth"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{toml_content}").unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.server.upstream_timeout, "10s");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[1].service, "auth-service");
    }

    #[test]
    fn loads_json_config() {
        let json_content = r#"
{
  "server": { "listen_addr": "0.0.0.0:8080" },
  "tokens": {
    "access_secret": "a-secret",
    "refresh_secret": "r-secret"
  },
  "routes": [
    {
      "prefix": "/api/payments",
      "service": "payment-service",
      "backend_url": "http://localhost:5004/api/payments",
      "requires_auth": true,
      "path_map": [{ "from": "/methods", "to": "/payment-methods" }]
    }
  ]
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{json_content}").unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.routes[0].path_map.len(), 1);
        assert!(config.routes[0].requires_auth);
    }

    #[test]
    fn missing_file_reports_its_path() {
        let err = load_config("/nonexistent/breakwater.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/breakwater.toml"));
    }
}
