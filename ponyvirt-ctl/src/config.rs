//! Configuration management for ponyvirt-ctl.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::cli::Args;

/// Location tried when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ponyvirt/ctl.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hypervisor connection
    pub connection: ConnectionConfig,
    /// Domain template document for `define` (built-in when unset)
    pub template: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            template: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&content).with_context(|| "Failed to parse config file")?;

        Ok(config)
    }

    /// Load the explicit config file, or the default one if present.
    ///
    /// A missing default file is not an error; an explicit one is.
    pub fn resolve(args: &Args) -> Result<Self> {
        let config = match &args.config {
            Some(path) => Self::load(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::load(DEFAULT_CONFIG_PATH)?,
            None => Self::default(),
        };
        Ok(config.with_cli_overrides(args))
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &Args) -> Self {
        if let Some(ref uri) = args.uri {
            self.connection.uri = uri.clone();
        }

        if let Some(ref template) = args.template {
            self.template = Some(template.clone());
        }

        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }

        if args.dev {
            self.connection.backend = BackendKind::Mock;
        }

        self
    }
}

/// Hypervisor connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Backend type
    pub backend: BackendKind,
    /// Libvirt connection URI
    pub uri: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Libvirt,
            uri: "qemu:///system".to_string(),
        }
    }
}

/// Hypervisor backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Libvirt/QEMU backend
    #[default]
    Libvirt,
    /// In-memory mock backend for development
    Mock,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.connection.backend, BackendKind::Libvirt);
        assert_eq!(config.connection.uri, "qemu:///system");
        assert_eq!(config.log_level, "info");
        assert!(config.template.is_none());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
connection:
  backend: mock
  uri: qemu+ssh://root@node1/system
template: /etc/ponyvirt/vm.xml
log_format: json
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.connection.backend, BackendKind::Mock);
        assert_eq!(config.connection.uri, "qemu+ssh://root@node1/system");
        assert_eq!(config.template.as_deref(), Some("/etc/ponyvirt/vm.xml"));
        assert_eq!(config.log_format, LogFormat::Json);
        // Unset sections fall back to defaults.
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "ponyvirt-ctl",
            "--uri",
            "qemu:///session",
            "--log-level",
            "debug",
            "--dev",
            "list",
        ]);
        let config = Config::default().with_cli_overrides(&args);

        assert_eq!(config.connection.uri, "qemu:///session");
        assert_eq!(config.connection.backend, BackendKind::Mock);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level: warn").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.log_level, "warn");
        assert!(Config::load("/nonexistent/ponyvirt.yaml").is_err());
    }
}
