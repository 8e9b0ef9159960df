//! Installer settings.
//!
//! Layered: built-in defaults, then an optional TOML file, then environment
//! variables, then command-line flags.
//!
//! ```toml
//! collector_config = "/etc/pganalyze-collector.conf"
//! collector_binary = "pganalyze-collector"
//! psql = "psql"
//! socket_dirs = ["/var/run/postgresql", "/tmp"]
//! use_pg_ctl = false
//! test_extra_args = []
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_COLLECTOR_CONFIG: &str = "/etc/pganalyze-collector.conf";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupConfig {
    /// Collector config file that setup edits.
    #[serde(default = "default_collector_config")]
    pub collector_config: PathBuf,
    /// Collector executable used for test runs and reloads.
    #[serde(default = "default_collector_binary")]
    pub collector_binary: String,
    #[serde(default = "default_psql")]
    pub psql: String,
    /// Directories searched for local Postgres sockets.
    #[serde(default = "default_socket_dirs")]
    pub socket_dirs: Vec<String>,
    /// Restart Postgres with pg_ctl instead of systemd.
    #[serde(default)]
    pub use_pg_ctl: bool,
    /// Extra arguments appended to the collector test command.
    #[serde(default)]
    pub test_extra_args: Vec<String>,
    /// API key from the environment; never read from or written to the file.
    #[serde(skip)]
    pub api_key_from_env: Option<String>,
}

fn default_collector_config() -> PathBuf {
    PathBuf::from(DEFAULT_COLLECTOR_CONFIG)
}

fn default_collector_binary() -> String {
    "pganalyze-collector".to_string()
}

fn default_psql() -> String {
    "psql".to_string()
}

fn default_socket_dirs() -> Vec<String> {
    vec!["/var/run/postgresql".to_string(), "/tmp".to_string()]
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            collector_config: default_collector_config(),
            collector_binary: default_collector_binary(),
            psql: default_psql(),
            socket_dirs: default_socket_dirs(),
            use_pg_ctl: false,
            test_extra_args: Vec::new(),
            api_key_from_env: None,
        }
    }
}

impl SetupConfig {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid settings")
    }

    /// Apply environment overrides read through `var`.
    pub fn with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = var("PGA_SETUP_CONFIG").filter(|v| !v.is_empty()) {
            self.collector_config = PathBuf::from(path);
        }
        if var("PGA_SETUP_USE_PG_CTL").is_some_and(|v| !v.is_empty()) {
            self.use_pg_ctl = true;
        }
        if let Some(args) = var("PGA_SETUP_COLLECTOR_TEST_EXTRA_ARGS") {
            self.test_extra_args
                .extend(args.split_whitespace().map(str::to_string));
        }
        self.api_key_from_env = var("PGA_API_KEY").filter(|v| !v.is_empty());
        self
    }

    /// Apply command-line overrides.
    pub fn with_cli_args(mut self, collector_config: Option<PathBuf>) -> Self {
        if let Some(path) = collector_config {
            self.collector_config = path;
        }
        self
    }

    /// Resolve settings for a run: file (if given) → process env → CLI.
    pub fn resolve(settings_file: Option<&Path>, collector_config: Option<PathBuf>) -> Result<Self> {
        let base = match settings_file {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(base
            .with_env(|name| std::env::var(name).ok())
            .with_cli_args(collector_config))
    }

    /// Non-fatal problems worth showing the operator.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.socket_dirs.is_empty() {
            warnings.push(
                "socket_dirs is empty; local Postgres servers cannot be discovered".to_string(),
            );
        }
        if self.collector_binary.trim().is_empty() {
            warnings.push("collector_binary is empty".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SetupConfig::default();
        assert_eq!(
            config.collector_config,
            PathBuf::from("/etc/pganalyze-collector.conf")
        );
        assert_eq!(config.socket_dirs, vec!["/var/run/postgresql", "/tmp"]);
        assert!(!config.use_pg_ctl);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = SetupConfig::parse("use_pg_ctl = true\nsocket_dirs = [\"/run/pg\"]\n").unwrap();
        assert!(config.use_pg_ctl);
        assert_eq!(config.socket_dirs, vec!["/run/pg"]);
        assert_eq!(config.collector_binary, "pganalyze-collector");
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        assert!(SetupConfig::parse("use_pgctl = true\n").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let config = SetupConfig::parse("collector_config = \"/opt/a.conf\"\n")
            .unwrap()
            .with_env(env(&[
                ("PGA_SETUP_CONFIG", "/opt/b.conf"),
                ("PGA_SETUP_USE_PG_CTL", "1"),
                ("PGA_SETUP_COLLECTOR_TEST_EXTRA_ARGS", "--no-log-timestamps --verbose"),
                ("PGA_API_KEY", "key123"),
            ]));
        assert_eq!(config.collector_config, PathBuf::from("/opt/b.conf"));
        assert!(config.use_pg_ctl);
        assert_eq!(
            config.test_extra_args,
            vec!["--no-log-timestamps", "--verbose"]
        );
        assert_eq!(config.api_key_from_env.as_deref(), Some("key123"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let config = SetupConfig::default()
            .with_env(env(&[("PGA_SETUP_CONFIG", "/opt/b.conf")]))
            .with_cli_args(Some(PathBuf::from("/opt/c.conf")));
        assert_eq!(config.collector_config, PathBuf::from("/opt/c.conf"));
    }

    #[test]
    fn test_empty_api_key_env_is_ignored() {
        let config = SetupConfig::default().with_env(env(&[("PGA_API_KEY", "")]));
        assert_eq!(config.api_key_from_env, None);
    }

    #[test]
    fn test_validate_warns_on_empty_socket_dirs() {
        let config = SetupConfig {
            socket_dirs: vec![],
            ..Default::default()
        };
        assert_eq!(config.validate().len(), 1);
    }
}
