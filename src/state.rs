//! Session state threaded through every step of a run.

use crate::collector_config::{CollectorConfig, Section};
use crate::config::SetupConfig;
use crate::errors::{ActionError, ConfigError};
use crate::host::{Host, PlatformInfo};
use crate::inputs::SetupInputs;
use crate::query::{AdminConnection, Connector};
use crate::resolver::InputResolver;

/// Server version observed by the version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgVersion {
    /// `server_version_num`, e.g. `150004`.
    pub num: i64,
    /// `server_version`, e.g. `15.4`.
    pub display: String,
}

/// Non-repeatable side effects that already fired during this run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionFlags {
    pub did_test_command: bool,
    pub did_test_explain_command: bool,
    pub did_auto_explain_recommended_settings: bool,
    pub did_pg_sleep: bool,
    pub did_reload: bool,
}

/// Mutable context for one setup run.
///
/// Created once by the caller and passed by `&mut` to every step. The
/// connection and the config document are owned here; steps borrow them.
pub struct SetupState {
    pub settings: SetupConfig,
    pub platform: Option<PlatformInfo>,
    pub pg_version: Option<PgVersion>,
    pub flags: CompletionFlags,
    /// Set by every config save, cleared by a collector reload.
    pub needs_reload: bool,
    pub resolver: InputResolver,
    pub host: Box<dyn Host>,
    connector: Box<dyn Connector>,
    config: Option<CollectorConfig>,
    connection: Option<Box<dyn AdminConnection>>,
    connection_stale: bool,
}

impl SetupState {
    pub fn new(
        settings: SetupConfig,
        resolver: InputResolver,
        host: Box<dyn Host>,
        connector: Box<dyn Connector>,
    ) -> Self {
        Self {
            settings,
            platform: None,
            pg_version: None,
            flags: CompletionFlags::default(),
            needs_reload: false,
            resolver,
            host,
            connector,
            config: None,
            connection: None,
            connection_stale: false,
        }
    }

    pub fn inputs(&self) -> &SetupInputs {
        self.resolver.inputs()
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn has_connection(&self) -> bool {
        self.connection.is_some()
    }

    /// Replace the administrative connection.
    pub fn set_connection(&mut self, connection: Box<dyn AdminConnection>) {
        self.connection = Some(connection);
        self.connection_stale = false;
    }

    pub fn drop_connection(&mut self) {
        self.connection = None;
        self.connection_stale = false;
    }

    /// Require a liveness round-trip before the connection is next used.
    pub fn mark_connection_stale(&mut self) {
        self.connection_stale = true;
    }

    /// The administrative connection.
    ///
    /// A stale connection is pinged first; if it does not answer it is
    /// dropped so the establishing step runs again.
    pub fn db(&mut self) -> Result<&dyn AdminConnection, ActionError> {
        if self.connection_stale {
            let alive = self
                .connection
                .as_deref()
                .is_some_and(|conn| conn.ping().is_ok());
            if !alive {
                tracing::warn!("administrative connection stopped answering; dropping it");
                self.drop_connection();
                return Err(ActionError::NotConnected);
            }
            self.connection_stale = false;
        }
        self.connection.as_deref().ok_or(ActionError::NotConnected)
    }

    /// Rebind the connection to another database on the same server.
    pub fn switch_database(&mut self, database: &str) -> Result<(), ActionError> {
        let conn = self
            .connection
            .as_deref_mut()
            .ok_or(ActionError::NotConnected)?;
        if conn.params().database.as_deref() != Some(database) {
            tracing::debug!(database, "switching administrative connection target");
            conn.switch_target(database);
            self.connection_stale = true;
        }
        Ok(())
    }

    pub fn set_config(&mut self, config: CollectorConfig) {
        self.config = Some(config);
    }

    pub fn config(&self) -> Result<&CollectorConfig, ActionError> {
        self.config
            .as_ref()
            .ok_or(ActionError::Config(ConfigError::NotLoaded))
    }

    pub fn config_mut(&mut self) -> Result<&mut CollectorConfig, ActionError> {
        self.config
            .as_mut()
            .ok_or(ActionError::Config(ConfigError::NotLoaded))
    }

    /// Server-section value, if the config is loaded and has the key.
    pub fn server_key(&self, key: &str) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.get_key(Section::Server, key))
    }

    /// Set a key and write the config file through.
    pub fn save_key(&mut self, section: Section, key: &str, value: &str) -> Result<(), ActionError> {
        self.config_mut()?.new_key(section, key, value);
        self.save_config()
    }

    /// Persist the config document; the collector needs a reload afterwards.
    pub fn save_config(&mut self) -> Result<(), ActionError> {
        let path = self.settings.collector_config.clone();
        self.config()?.save_to(&path)?;
        tracing::info!(path = %path.display(), "saved collector config");
        self.needs_reload = true;
        Ok(())
    }

    pub fn pg_version_num(&self) -> Result<i64, ActionError> {
        self.pg_version
            .as_ref()
            .map(|v| v.num)
            .ok_or_else(|| ActionError::Invariant("Postgres version has not been checked".to_string()))
    }
}
