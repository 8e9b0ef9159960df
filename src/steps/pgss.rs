//! pg_stat_statements: available, installed and preloaded.

use crate::errors::{ActionError, QueryError};
use crate::inputs::fields;
use crate::resolver::Prompt;
use crate::sql::{self, apply_config_setting, has_library, with_library};
use crate::state::SetupState;
use crate::step::{Step, StepKind};

use super::approve;

const PGSS: &str = "pg_stat_statements";

pub const CHECK_PGSS_AVAILABLE: Step = Step::new(
    "check_pgss_available",
    StepKind::Baseline,
    "Prerequisite: ensure the pg_stat_statements extension is available",
    pgss_available,
    |_| {
        Err(ActionError::Unsupported(
            "extension pg_stat_statements is not available; install the Postgres contrib package"
                .to_string(),
        ))
    },
);

pub const ENSURE_PGSS_EXTENSION_INSTALLED: Step = Step::new(
    "ensure_pgss_extension_installed",
    StepKind::Baseline,
    "Ensure the pg_stat_statements extension is installed in the primary database",
    pgss_installed,
    install_pgss,
);

pub const ENSURE_PGSS_IN_SHARED_PRELOAD: Step = Step::new(
    "ensure_pgss_in_shared_preload",
    StepKind::Baseline,
    "Ensure pg_stat_statements is in shared_preload_libraries",
    |state| {
        let pending = sql::pending_shared_preload_libraries(state.db()?)?;
        Ok(has_library(&pending, PGSS))
    },
    preload_pgss,
);

pub const CHECK_RESTART_NEEDED: Step = Step::check_only(
    "check_restart_needed",
    StepKind::Baseline,
    "Check whether a Postgres restart will be needed",
    check_restart_needed,
);

fn pgss_available(state: &mut SetupState) -> Result<bool, ActionError> {
    match state
        .db()?
        .query_row("SELECT true FROM pg_available_extensions WHERE name = 'pg_stat_statements'")
    {
        Ok(row) => Ok(row.get_bool(0)?),
        Err(QueryError::NoRows) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn pgss_installed(state: &mut SetupState) -> Result<bool, ActionError> {
    let schema = match state.db()?.query_row(
        "SELECT extnamespace::regnamespace::text FROM pg_extension WHERE extname = 'pg_stat_statements'",
    ) {
        Ok(row) => row.get_string(0)?,
        Err(QueryError::NoRows) => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    if schema != "public" {
        return Err(ActionError::Unsupported(format!(
            "pg_stat_statements is installed in schema {:?}, but must be installed in 'public'",
            schema
        )));
    }
    Ok(true)
}

fn install_pgss(state: &mut SetupState) -> Result<(), ActionError> {
    let approved = approve(
        state,
        fields::ENSURE_PG_STAT_STATEMENTS_INSTALLED,
        Prompt::new("Install the pg_stat_statements extension (will be saved to Postgres)?"),
        "pg_stat_statements extension is not installed",
    )?;
    if !approved {
        return Ok(());
    }
    state
        .db()?
        .exec("CREATE EXTENSION pg_stat_statements SCHEMA public")?;
    Ok(())
}

fn preload_pgss(state: &mut SetupState) -> Result<(), ActionError> {
    let approved = approve(
        state,
        fields::ENSURE_PG_STAT_STATEMENTS_LOADED,
        Prompt::new(
            "Add pg_stat_statements to shared_preload_libraries (will be saved to Postgres; takes effect on restart)?",
        )
        .with_help("Postgres will be restarted in a later step, after confirmation"),
        "pg_stat_statements is not in shared_preload_libraries",
    )?;
    if !approved {
        return Ok(());
    }
    let conn = state.db()?;
    let current = sql::pending_shared_preload_libraries(conn)?;
    apply_config_setting(conn, "shared_preload_libraries", &with_library(&current, PGSS))
}

fn check_restart_needed(state: &mut SetupState) -> Result<bool, ActionError> {
    let row = state.db()?.query_row(
        "SELECT current_setting('shared_preload_libraries') LIKE '%pg_stat_statements%', \
         current_setting('shared_preload_libraries') LIKE '%auto_explain%'",
    )?;
    let has_pgss = row.get_bool(0)?;
    let has_auto_explain = row.get_bool(1)?;

    let notice = match (has_pgss, has_auto_explain) {
        (false, _) => {
            "Postgres must be restarted before query performance monitoring works. \
             You will be asked before the restart happens."
        }
        (true, false) => {
            "No restart is needed for query performance monitoring. The recommended \
             Automated EXPLAIN setup uses auto_explain, which does require a restart; \
             log-based EXPLAIN avoids it at the cost of less detailed plans."
        }
        (true, true) => "No Postgres restart is needed for any feature set up here.",
    };
    tracing::debug!(has_pgss, has_auto_explain, "restart requirements");
    state.resolver.say(notice);
    state
        .resolver
        .proceed(Prompt::new("Continue with setup?"), has_pgss && has_auto_explain)?;
    Ok(true)
}
