//! Tool configuration: optional `serie.toml` plus environment override.

use serde::Deserialize;
use serie_common::prelude::{ConfigError, ConfigLoader, FlushConfig, LogLevel, SharedConfig};
use std::path::Path;

/// Contents of `serie.toml`
///
/// ```toml
/// [shared]
/// log_level = "info"
/// service_name = "serie-writer"
///
/// [flush]
/// refresh_wait_ms = 40
/// serve_interval_ms = 20
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Common settings
    pub shared: SharedConfig,
    /// Flush protocol timing
    #[serde(default)]
    pub flush: FlushConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig {
                log_level: LogLevel::default(),
                service_name: "serie".to_string(),
            },
            flush: FlushConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `path` if given, else defaults; then apply
    /// `SERIE_REFRESHWAITTIME` and validate.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.flush = config.flush.with_env_override()?;
        config.shared.validate()?;
        config.flush.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::default();
        assert_eq!(config.shared.service_name, "serie");
        assert_eq!(config.flush.refresh_wait_ms, 40);
    }

    #[test]
    fn test_load_file_with_flush_section() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "bench-writer"

[flush]
refresh_wait_ms = 100
serve_interval_ms = 5
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.flush.refresh_wait_ms, 100);
        assert_eq!(config.flush.serve_interval_ms, 5);
    }

    #[test]
    fn test_missing_flush_section_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[shared]\nservice_name = \"x\"").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.flush, FlushConfig::default());
    }

    #[test]
    fn test_zero_serve_interval_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[shared]\nservice_name = \"x\"\n[flush]\nserve_interval_ms = 0"
        )
        .unwrap();
        assert!(matches!(
            AppConfig::resolve(Some(file.path())),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        assert!(matches!(
            AppConfig::resolve(Some(Path::new("/nonexistent/serie.toml"))),
            Err(ConfigError::FileNotFound)
        ));
    }
}
