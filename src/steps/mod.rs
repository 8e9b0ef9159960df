//! The setup step catalog.
//!
//! Steps are grouped into segments that run as separate pipelines, because
//! the answers to the opt-in steps at the end of one segment decide which
//! steps of the next segment take part.
//!
//! | Segment             | Kind               | Purpose                                   |
//! |---------------------|--------------------|-------------------------------------------|
//! | [`CORE`]            | `Baseline`         | connection, monitoring user, statistics   |
//! | [`LOG_INSIGHTS`]    | `LogInsights`      | logging settings and log location         |
//! | [`AUTOMATED_EXPLAIN`] | `AutomatedExplain` | auto_explain or log-based EXPLAIN       |
//! | [`FINALIZE`]        | mixed              | restart, test runs, collector reload      |

pub mod connection;
pub mod explain;
pub mod finalize;
pub mod log_insights;
pub mod monitoring_user;
pub mod pgss;
pub mod platform;

use crate::errors::ActionError;
use crate::inputs::Field;
use crate::query::AdminConnection;
use crate::resolver::{ExecutionMode, Prompt};
use crate::state::SetupState;
use crate::step::Step;

pub const CORE: &[Step] = &[
    platform::DETERMINE_PLATFORM,
    platform::LOAD_CONFIG,
    platform::SAVE_API_KEY,
    connection::ESTABLISH_SUPERUSER_CONNECTION,
    connection::CHECK_POSTGRES_VERSION,
    connection::CHECK_REPLICATION_STATUS,
    connection::SELECT_DATABASES,
    monitoring_user::SPECIFY_MONITORING_USER,
    monitoring_user::ENSURE_MONITORING_USER,
    monitoring_user::SPECIFY_MONITORING_USER_PASSWORD,
    monitoring_user::ENSURE_MONITORING_USER_PASSWORD,
    monitoring_user::ENSURE_MONITORING_USER_PERMISSIONS,
    monitoring_user::ENSURE_PGANALYZE_SCHEMA,
    pgss::CHECK_PGSS_AVAILABLE,
    pgss::ENSURE_PGSS_EXTENSION_INSTALLED,
    pgss::ENSURE_PGSS_IN_SHARED_PRELOAD,
    pgss::CHECK_RESTART_NEEDED,
    log_insights::CONFIRM_SET_UP_LOG_INSIGHTS,
];

pub const LOG_INSIGHTS: &[Step] = &[
    log_insights::ENSURE_SUPPORTED_LOG_ERROR_VERBOSITY,
    log_insights::ENSURE_SUPPORTED_LOG_DURATION,
    log_insights::ENSURE_SUPPORTED_LOG_STATEMENT,
    log_insights::ENSURE_SUPPORTED_LOG_MIN_DURATION_STATEMENT,
    log_insights::ENSURE_SUPPORTED_LOG_LINE_PREFIX,
    log_insights::SPECIFY_DB_LOG_LOCATION,
    log_insights::CONFIRM_SET_UP_AUTOMATED_EXPLAIN,
];

pub const AUTOMATED_EXPLAIN: &[Step] = &[
    explain::CONFIRM_AUTOMATED_EXPLAIN_MODE,
    explain::CHECK_AUTO_EXPLAIN_AVAILABLE,
    explain::ENSURE_AUTO_EXPLAIN_IN_SHARED_PRELOAD,
    explain::ENSURE_LOG_EXPLAIN_HELPERS,
];

/// auto_explain settings only exist once the module is loaded, so their
/// review and the EXPLAIN test follow the restart.
pub const FINALIZE: &[Step] = &[
    finalize::CONFIRM_RESTART_POSTGRES,
    explain::ENSURE_RECOMMENDED_AUTO_EXPLAIN_SETTINGS,
    finalize::RUN_TEST_COMMAND,
    explain::RUN_TEST_EXPLAIN_COMMAND,
    finalize::RELOAD_COLLECTOR,
    finalize::RUN_PG_SLEEP,
];

/// Segments in run order.
pub fn segments() -> [&'static [Step]; 4] {
    [CORE, LOG_INSIGHTS, AUTOMATED_EXPLAIN, FINALIZE]
}

/// Every step in run order.
pub fn all() -> impl Iterator<Item = &'static Step> {
    segments().into_iter().flatten()
}

pub(crate) const LIST_DATABASES: &str =
    "SELECT datname FROM pg_database WHERE datallowconn AND NOT datistemplate";

pub(crate) fn list_databases(conn: &dyn AdminConnection) -> Result<Vec<String>, ActionError> {
    conn.query(LIST_DATABASES)?
        .iter()
        .map(|row| row.get_string(0).map_err(ActionError::from))
        .collect()
}

/// A server-section key an earlier step is responsible for setting.
pub(crate) fn required_server_key(state: &SetupState, key: &str) -> Result<String, ActionError> {
    state
        .server_key(key)
        .map(str::to_string)
        .ok_or_else(|| ActionError::Invariant(format!("{} is not set in the collector config", key)))
}

/// Ask permission for a change.
///
/// An interactive "no" returns `false` and leaves the step unresolved. A
/// scripted `false` fails with `refusal`.
pub(crate) fn approve(
    state: &mut SetupState,
    field: Field<bool>,
    prompt: Prompt,
    refusal: &str,
) -> Result<bool, ActionError> {
    let approved = state.resolver.confirm(field, prompt, false)?;
    if !approved && state.resolver.mode() == ExecutionMode::Scripted {
        return Err(ActionError::Failed(format!(
            "{} flag not set and {}",
            field.key(),
            refusal
        )));
    }
    Ok(approved)
}
