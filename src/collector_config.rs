//! The collector's INI configuration file.
//!
//! Setup supports files with a `[pganalyze]` section and exactly one server
//! section. Keys in the unnamed leading section act as defaults.

use crate::errors::ConfigError;
use ini::{EscapePolicy, Ini, ParseOption, Properties, WriteOption};
use std::path::{Path, PathBuf};

/// Name of the section holding API credentials.
pub const GLOBAL_SECTION: &str = "pganalyze";

const DEFAULT_SERVER_SECTION: &str = "server1";

/// Which part of the document a key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Defaults,
    Global,
    Server,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section::Defaults => write!(f, "defaults"),
            Section::Global => write!(f, "{}", GLOBAL_SECTION),
            Section::Server => write!(f, "server"),
        }
    }
}

/// In-memory collector config. Changes are only durable after [`Self::save_to`].
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    doc: Ini,
    server: String,
}

impl CollectorConfig {
    /// Load and validate the config file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let doc = Ini::load_from_file_opt(path, Self::parse_option()).map_err(|source| {
            ConfigError::Load {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_doc(doc)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let doc = Ini::load_from_str_opt(content, Self::parse_option()).map_err(|e| {
            ConfigError::Load {
                path: PathBuf::from("<memory>"),
                source: ini::Error::Parse(e),
            }
        })?;
        Self::from_doc(doc)
    }

    fn parse_option() -> ParseOption {
        // The collector reads values verbatim.
        ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            ..Default::default()
        }
    }

    fn from_doc(mut doc: Ini) -> Result<Self, ConfigError> {
        let servers: Vec<String> = doc
            .sections()
            .flatten()
            .filter(|name| *name != GLOBAL_SECTION)
            .map(str::to_string)
            .collect();
        if servers.len() > 1 {
            return Err(ConfigError::Unsupported(
                "not supported for config file defining more than one server".to_string(),
            ));
        }
        let server = match servers.into_iter().next() {
            Some(name) => name,
            None => {
                doc.with_section(Some(DEFAULT_SERVER_SECTION));
                DEFAULT_SERVER_SECTION.to_string()
            }
        };
        if doc.section(Some(GLOBAL_SECTION)).is_none() {
            doc.with_section(Some(GLOBAL_SECTION));
        }

        let config = Self { doc, server };
        if config.has_key(Section::Server, "db_url") {
            return Err(ConfigError::Unsupported(
                "not supported when db_url is already configured".to_string(),
            ));
        }
        Ok(config)
    }

    /// Name of the single server section.
    pub fn server_name(&self) -> &str {
        &self.server
    }

    fn section_name(&self, section: Section) -> Option<String> {
        match section {
            Section::Defaults => None,
            Section::Global => Some(GLOBAL_SECTION.to_string()),
            Section::Server => Some(self.server.clone()),
        }
    }

    fn properties(&self, section: Section) -> Option<&Properties> {
        self.doc.section(self.section_name(section))
    }

    pub fn has_key(&self, section: Section, key: &str) -> bool {
        self.properties(section)
            .is_some_and(|props| props.contains_key(key))
    }

    pub fn get_key(&self, section: Section, key: &str) -> Option<&str> {
        self.properties(section).and_then(|props| props.get(key))
    }

    /// Boolean value using the collector's spellings.
    pub fn get_bool(&self, section: Section, key: &str) -> Option<bool> {
        match self.get_key(section, key)?.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "on" | "yes" => Some(true),
            "0" | "f" | "false" | "off" | "no" => Some(false),
            _ => None,
        }
    }

    /// Insert or replace a key.
    pub fn new_key(&mut self, section: Section, key: &str, value: &str) {
        let name = self.section_name(section);
        self.doc.with_section(name).set(key, value);
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let option = WriteOption {
            escape_policy: EscapePolicy::Nothing,
            ..Default::default()
        };
        self.doc
            .write_to_file_opt(path, option)
            .map_err(|source| ConfigError::Save {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "[pganalyze]\napi_key = abc123\n\n[server1]\ndb_host = localhost\ndb_port = 5432\n";

    #[test]
    fn test_load_finds_server_section() {
        let config = CollectorConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.server_name(), "server1");
        assert_eq!(config.get_key(Section::Global, "api_key"), Some("abc123"));
        assert_eq!(config.get_key(Section::Server, "db_port"), Some("5432"));
        assert!(!config.has_key(Section::Server, "db_name"));
    }

    #[test]
    fn test_more_than_one_server_is_rejected() {
        let content = format!("{}\n[server2]\ndb_host = other\n", SAMPLE);
        let err = CollectorConfig::parse(&content).unwrap_err();
        assert!(err.to_string().contains("more than one server"));
    }

    #[test]
    fn test_db_url_is_rejected() {
        let err = CollectorConfig::parse("[pganalyze]\n[db]\ndb_url = postgres://x\n").unwrap_err();
        assert!(matches!(err, ConfigError::Unsupported(msg) if msg.contains("db_url")));
    }

    #[test]
    fn test_missing_sections_are_created_in_memory() {
        let config = CollectorConfig::parse("").unwrap();
        assert_eq!(config.server_name(), "server1");
        assert!(!config.has_key(Section::Global, "api_key"));
    }

    #[test]
    fn test_new_key_upserts() {
        let mut config = CollectorConfig::parse(SAMPLE).unwrap();
        config.new_key(Section::Server, "db_name", "app");
        config.new_key(Section::Server, "db_name", "app,reporting");
        assert_eq!(
            config.get_key(Section::Server, "db_name"),
            Some("app,reporting")
        );
    }

    #[test]
    fn test_get_bool_spellings() {
        let mut config = CollectorConfig::parse(SAMPLE).unwrap();
        config.new_key(Section::Server, "enable_log_explain", "True");
        assert_eq!(config.get_bool(Section::Server, "enable_log_explain"), Some(true));
        config.new_key(Section::Server, "enable_log_explain", "off");
        assert_eq!(config.get_bool(Section::Server, "enable_log_explain"), Some(false));
        assert_eq!(config.get_bool(Section::Server, "db_host"), None);
    }

    #[test]
    fn test_save_and_reload_preserves_values_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("collector.conf");
        let mut config = CollectorConfig::parse(SAMPLE).unwrap();
        config.new_key(Section::Server, "db_password", r"p\wd1");
        config.save_to(&path).unwrap();

        let reloaded = CollectorConfig::load(&path).unwrap();
        assert_eq!(
            reloaded.get_key(Section::Server, "db_password"),
            Some(r"p\wd1")
        );
        assert_eq!(reloaded.get_key(Section::Global, "api_key"), Some("abc123"));
    }

    #[test]
    fn test_load_missing_file_reports_path() {
        let err = CollectorConfig::load(Path::new("/nonexistent/collector.conf")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/collector.conf"));
    }
}
