//! Declarative setup inputs.
//!
//! Every decision the installer would otherwise prompt for has a field here.
//! Each field is independently present or absent; absence never means a default.
//! The document is JSON:
//!
//! ```json
//! {
//!   "settings": { "api_key": "...", "db_name": "app,reporting", "db_username": "pganalyze" },
//!   "gucs": { "log_min_duration_statement": 1000 },
//!   "pg_setup_conn_port": 5432,
//!   "pg_setup_conn_user": "postgres",
//!   "ensure_monitoring_user": true
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Collector settings written into the server section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    /// Comma-separated database names; `*` monitors all databases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_log_location: Option<String>,
}

/// Desired values for Postgres settings touched by the log insights and
/// automated explain steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GucInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_error_verbosity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_min_duration_statement: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_line_prefix: Option<String>,

    #[serde(
        rename = "auto_explain.log_analyze",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_analyze: Option<String>,
    #[serde(
        rename = "auto_explain.log_buffers",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_buffers: Option<String>,
    #[serde(
        rename = "auto_explain.log_timing",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_timing: Option<String>,
    #[serde(
        rename = "auto_explain.log_triggers",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_triggers: Option<String>,
    #[serde(
        rename = "auto_explain.log_verbose",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_verbose: Option<String>,
    #[serde(
        rename = "auto_explain.log_format",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_format: Option<String>,
    #[serde(
        rename = "auto_explain.log_min_duration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_min_duration: Option<i64>,
    #[serde(
        rename = "auto_explain.log_nested_statements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_explain_log_nested_statements: Option<String>,
}

/// The full declarative inputs document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupInputs {
    #[serde(default)]
    pub settings: SettingsInputs,
    #[serde(default)]
    pub gucs: GucInputs,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_setup_conn_socket_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_setup_conn_port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pg_setup_conn_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_monitoring_user: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_monitoring_password: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_monitoring_password: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_monitoring_permissions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_helper_functions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_pg_stat_statements_installed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_pg_stat_statements_loaded: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guess_log_location: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_log_based_explain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_log_explain_helpers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_auto_explain_loaded: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_postgres_restart: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_set_up_log_insights: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_set_up_automated_explain: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure_auto_explain_recommended_settings: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_run_test_command: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_run_test_explain_command: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_collector_reload: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_pg_sleep: Option<bool>,
}

/// The log_line_prefix written when the operator accepts the recommendation.
pub const RECOMMENDED_LOG_LINE_PREFIX: &str = "%m [%p] %q[user=%u,db=%d,app=%a] ";

impl SetupInputs {
    /// Load inputs from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not open inputs file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("could not parse inputs file {}", path.display()))
    }

    /// Parse inputs from a JSON string.
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("invalid inputs document")
    }

    /// Serialize to pretty JSON, omitting absent fields.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize inputs")
    }

    /// Inputs that accept every recommended choice.
    pub fn recommended() -> Self {
        Self {
            settings: SettingsInputs {
                db_username: Some("pganalyze".to_string()),
                ..Default::default()
            },
            gucs: GucInputs {
                log_error_verbosity: Some("default".to_string()),
                log_duration: Some("off".to_string()),
                log_statement: Some("none".to_string()),
                log_min_duration_statement: Some(1000),
                log_line_prefix: Some(RECOMMENDED_LOG_LINE_PREFIX.to_string()),
                auto_explain_log_analyze: Some("on".to_string()),
                auto_explain_log_buffers: Some("on".to_string()),
                auto_explain_log_timing: Some("off".to_string()),
                auto_explain_log_triggers: Some("on".to_string()),
                auto_explain_log_verbose: Some("on".to_string()),
                auto_explain_log_format: Some("json".to_string()),
                auto_explain_log_min_duration: Some(1000),
                auto_explain_log_nested_statements: Some("on".to_string()),
            },
            pg_setup_conn_port: Some(5432),
            pg_setup_conn_user: Some("postgres".to_string()),
            ensure_monitoring_user: Some(true),
            generate_monitoring_password: Some(true),
            ensure_monitoring_password: Some(true),
            ensure_monitoring_permissions: Some(true),
            ensure_helper_functions: Some(true),
            ensure_pg_stat_statements_installed: Some(true),
            ensure_pg_stat_statements_loaded: Some(true),
            guess_log_location: Some(true),
            use_log_based_explain: Some(false),
            ensure_auto_explain_loaded: Some(true),
            confirm_postgres_restart: Some(true),
            confirm_set_up_log_insights: Some(true),
            confirm_set_up_automated_explain: Some(true),
            ensure_auto_explain_recommended_settings: Some(true),
            confirm_run_test_command: Some(true),
            confirm_run_test_explain_command: Some(true),
            confirm_collector_reload: Some(true),
            skip_pg_sleep: Some(false),
            ..Default::default()
        }
    }
}

/// A typed handle on one declarative field.
///
/// Shared fields are written back into the inputs bag when answered
/// interactively, so later steps read the same value in either mode.
pub struct Field<T: 'static> {
    key: &'static str,
    get: fn(&SetupInputs) -> Option<T>,
    set: fn(&mut SetupInputs, T),
    shared: bool,
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("key", &self.key)
            .field("shared", &self.shared)
            .finish()
    }
}

impl<T> Field<T> {
    /// Name of the field in the inputs document.
    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn read(&self, inputs: &SetupInputs) -> Option<T> {
        (self.get)(inputs)
    }

    pub fn write(&self, inputs: &mut SetupInputs, value: T) {
        (self.set)(inputs, value)
    }
}

macro_rules! field {
    ($(#[$doc:meta])* $name:ident: $ty:ty, $key:literal, shared = $shared:literal, $($path:ident).+) => {
        $(#[$doc])*
        pub const $name: Field<$ty> = {
            fn get(inputs: &SetupInputs) -> Option<$ty> {
                inputs.$($path).+.clone()
            }
            fn set(inputs: &mut SetupInputs, value: $ty) {
                inputs.$($path).+ = Some(value);
            }
            Field {
                key: $key,
                get,
                set,
                shared: $shared,
            }
        };
    };
}

/// Handles for every declarative field.
pub mod fields {
    use super::{Field, SetupInputs};

    field!(API_KEY: String, "api_key", shared = true, settings.api_key);
    field!(DB_NAME: String, "db_name", shared = true, settings.db_name);
    field!(DB_USERNAME: String, "db_username", shared = true, settings.db_username);
    field!(DB_PASSWORD: String, "db_password", shared = false, settings.db_password);
    field!(DB_LOG_LOCATION: String, "db_log_location", shared = true, settings.db_log_location);

    field!(LOG_ERROR_VERBOSITY: String, "log_error_verbosity", shared = false, gucs.log_error_verbosity);
    field!(LOG_DURATION: String, "log_duration", shared = false, gucs.log_duration);
    field!(LOG_STATEMENT: String, "log_statement", shared = false, gucs.log_statement);
    field!(
        LOG_MIN_DURATION_STATEMENT: i64,
        "log_min_duration_statement",
        shared = false,
        gucs.log_min_duration_statement
    );
    field!(LOG_LINE_PREFIX: String, "log_line_prefix", shared = false, gucs.log_line_prefix);

    field!(PG_SETUP_CONN_SOCKET_DIR: String, "pg_setup_conn_socket_dir", shared = false, pg_setup_conn_socket_dir);
    field!(PG_SETUP_CONN_PORT: i64, "pg_setup_conn_port", shared = false, pg_setup_conn_port);
    field!(PG_SETUP_CONN_USER: String, "pg_setup_conn_user", shared = false, pg_setup_conn_user);

    field!(ENSURE_MONITORING_USER: bool, "ensure_monitoring_user", shared = false, ensure_monitoring_user);
    field!(
        GENERATE_MONITORING_PASSWORD: bool,
        "generate_monitoring_password",
        shared = false,
        generate_monitoring_password
    );
    field!(
        ENSURE_MONITORING_PASSWORD: bool,
        "ensure_monitoring_password",
        shared = false,
        ensure_monitoring_password
    );
    field!(
        ENSURE_MONITORING_PERMISSIONS: bool,
        "ensure_monitoring_permissions",
        shared = false,
        ensure_monitoring_permissions
    );
    field!(ENSURE_HELPER_FUNCTIONS: bool, "ensure_helper_functions", shared = false, ensure_helper_functions);
    field!(
        ENSURE_PG_STAT_STATEMENTS_INSTALLED: bool,
        "ensure_pg_stat_statements_installed",
        shared = false,
        ensure_pg_stat_statements_installed
    );
    field!(
        ENSURE_PG_STAT_STATEMENTS_LOADED: bool,
        "ensure_pg_stat_statements_loaded",
        shared = false,
        ensure_pg_stat_statements_loaded
    );
    field!(GUESS_LOG_LOCATION: bool, "guess_log_location", shared = false, guess_log_location);
    field!(USE_LOG_BASED_EXPLAIN: bool, "use_log_based_explain", shared = true, use_log_based_explain);
    field!(
        ENSURE_LOG_EXPLAIN_HELPERS: bool,
        "ensure_log_explain_helpers",
        shared = false,
        ensure_log_explain_helpers
    );
    field!(
        ENSURE_AUTO_EXPLAIN_LOADED: bool,
        "ensure_auto_explain_loaded",
        shared = false,
        ensure_auto_explain_loaded
    );
    field!(CONFIRM_POSTGRES_RESTART: bool, "confirm_postgres_restart", shared = false, confirm_postgres_restart);
    field!(
        CONFIRM_SET_UP_LOG_INSIGHTS: bool,
        "confirm_set_up_log_insights",
        shared = true,
        confirm_set_up_log_insights
    );
    field!(
        CONFIRM_SET_UP_AUTOMATED_EXPLAIN: bool,
        "confirm_set_up_automated_explain",
        shared = true,
        confirm_set_up_automated_explain
    );
    field!(
        ENSURE_AUTO_EXPLAIN_RECOMMENDED_SETTINGS: bool,
        "ensure_auto_explain_recommended_settings",
        shared = true,
        ensure_auto_explain_recommended_settings
    );
    field!(CONFIRM_RUN_TEST_COMMAND: bool, "confirm_run_test_command", shared = true, confirm_run_test_command);
    field!(
        CONFIRM_RUN_TEST_EXPLAIN_COMMAND: bool,
        "confirm_run_test_explain_command",
        shared = true,
        confirm_run_test_explain_command
    );
    field!(CONFIRM_COLLECTOR_RELOAD: bool, "confirm_collector_reload", shared = true, confirm_collector_reload);
    field!(SKIP_PG_SLEEP: bool, "skip_pg_sleep", shared = true, skip_pg_sleep);

    field!(
        AUTO_EXPLAIN_LOG_ANALYZE: String,
        "auto_explain.log_analyze",
        shared = false,
        gucs.auto_explain_log_analyze
    );
    field!(
        AUTO_EXPLAIN_LOG_BUFFERS: String,
        "auto_explain.log_buffers",
        shared = false,
        gucs.auto_explain_log_buffers
    );
    field!(
        AUTO_EXPLAIN_LOG_TIMING: String,
        "auto_explain.log_timing",
        shared = false,
        gucs.auto_explain_log_timing
    );
    field!(
        AUTO_EXPLAIN_LOG_TRIGGERS: String,
        "auto_explain.log_triggers",
        shared = false,
        gucs.auto_explain_log_triggers
    );
    field!(
        AUTO_EXPLAIN_LOG_VERBOSE: String,
        "auto_explain.log_verbose",
        shared = false,
        gucs.auto_explain_log_verbose
    );
    field!(
        AUTO_EXPLAIN_LOG_FORMAT: String,
        "auto_explain.log_format",
        shared = false,
        gucs.auto_explain_log_format
    );
    field!(
        AUTO_EXPLAIN_LOG_MIN_DURATION: i64,
        "auto_explain.log_min_duration",
        shared = false,
        gucs.auto_explain_log_min_duration
    );
    field!(
        AUTO_EXPLAIN_LOG_NESTED_STATEMENTS: String,
        "auto_explain.log_nested_statements",
        shared = false,
        gucs.auto_explain_log_nested_statements
    );
}
