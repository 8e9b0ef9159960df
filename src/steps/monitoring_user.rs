//! The restricted monitoring user the collector connects as.

use crate::collector_config::Section;
use crate::errors::{ActionError, InputError, QueryError};
use crate::inputs::fields;
use crate::query::ConnParams;
use crate::resolver::{ExecutionMode, Prompt, Rule};
use crate::sql::{quote_ident, quote_literal};
use crate::state::SetupState;
use crate::step::{Step, StepKind};

use super::{approve, required_server_key};

pub const SPECIFY_MONITORING_USER: Step = Step::new(
    "specify_monitoring_user",
    StepKind::Baseline,
    "Specify the monitoring user to connect as (db_username) in the collector config file",
    |state| Ok(state.server_key("db_username").is_some()),
    specify_monitoring_user,
);

pub const ENSURE_MONITORING_USER: Step = Step::new(
    "ensure_monitoring_user",
    StepKind::Baseline,
    "Ensure the monitoring user exists in Postgres",
    monitoring_user_exists,
    create_monitoring_user,
);

pub const SPECIFY_MONITORING_USER_PASSWORD: Step = Step::new(
    "specify_monitoring_user_password",
    StepKind::Baseline,
    "Specify the monitoring user password (db_password) in the collector config file",
    |state| Ok(state.server_key("db_password").is_some()),
    specify_monitoring_user_password,
);

pub const ENSURE_MONITORING_USER_PASSWORD: Step = Step::new(
    "ensure_monitoring_user_password",
    StepKind::Baseline,
    "Ensure the monitoring user password in Postgres matches db_password in the collector config file",
    monitoring_user_can_log_in,
    update_monitoring_user_password,
);

pub const ENSURE_MONITORING_USER_PERMISSIONS: Step = Step::new(
    "ensure_monitoring_user_permissions",
    StepKind::Baseline,
    "Ensure the monitoring user can read query statistics and monitoring metadata",
    monitoring_user_has_permissions,
    grant_monitoring_permissions,
);

pub const ENSURE_PGANALYZE_SCHEMA: Step = Step::new(
    "ensure_pganalyze_schema",
    StepKind::Baseline,
    "Ensure the pganalyze schema exists and the monitoring user can use it",
    pganalyze_schema_usable,
    create_pganalyze_schema,
);

const USER_HELP: &str = "If the user does not exist yet, it can be created in a later step";

fn specify_monitoring_user(state: &mut SetupState) -> Result<(), ActionError> {
    let user = state
        .resolver
        .resolve(fields::DB_USERNAME, &Rule::Required, |term| {
            let options = [
                "pganalyze (recommended)".to_string(),
                "a different user".to_string(),
            ];
            let choice = term.select(
                &Prompt::new(
                    "Select Postgres user for the collector to use (will be saved to collector config):",
                )
                .with_help(USER_HELP),
                &options,
                0,
            )?;
            match choice {
                0 => Ok("pganalyze".to_string()),
                1 => term
                    .input(
                        &Prompt::new(
                            "Enter Postgres user for the collector to use (will be saved to collector config):",
                        )
                        .with_help(USER_HELP),
                        None,
                    )
                    .map(|s| s.trim().to_string()),
                index => Err(InputError::SelectionOutOfRange { index, len: 2 }),
            }
        })?;
    state.save_key(Section::Server, "db_username", &user)
}

fn monitoring_user_exists(state: &mut SetupState) -> Result<bool, ActionError> {
    let user = required_server_key(state, "db_username")?;
    let sql = format!(
        "SELECT true FROM pg_user WHERE usename = {}",
        quote_literal(&user)
    );
    match state.db()?.query_row(&sql) {
        Ok(row) => Ok(row.get_bool(0)?),
        Err(QueryError::NoRows) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn create_monitoring_user(state: &mut SetupState) -> Result<(), ActionError> {
    let user = required_server_key(state, "db_username")?;
    let approved = approve(
        state,
        fields::ENSURE_MONITORING_USER,
        Prompt::new(format!(
            "User {} does not exist in Postgres; create user (will be saved to Postgres)?",
            user
        ))
        .with_help("If you skip this step, create the user manually before proceeding"),
        &format!("specified monitoring user {} does not exist", user),
    )?;
    if !approved {
        return Ok(());
    }
    tracing::info!(user, "creating monitoring user");
    state.db()?.exec(&format!(
        "CREATE USER {} CONNECTION LIMIT 5",
        quote_ident(&user)
    ))?;
    Ok(())
}

/// Random 32-character hex password.
fn generate_password() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn specify_monitoring_user_password(state: &mut SetupState) -> Result<(), ActionError> {
    let password = match state.resolver.mode() {
        ExecutionMode::Scripted => {
            let inputs = state.inputs();
            let generate = inputs.generate_monitoring_password.unwrap_or(false);
            let explicit = inputs
                .settings
                .db_password
                .clone()
                .filter(|p| !p.is_empty());
            match (generate, explicit) {
                (true, Some(_)) => {
                    return Err(InputError::Conflict(
                        "cannot specify both generate password and set explicit password"
                            .to_string(),
                    )
                    .into());
                }
                (true, None) => generate_password(),
                (false, Some(password)) => password,
                (false, None) => {
                    return Err(ActionError::Input(InputError::Missing {
                        field: fields::DB_PASSWORD.key(),
                    }));
                }
            }
        }
        ExecutionMode::Interactive => {
            let generate = state.resolver.choose_value(
                fields::GENERATE_MONITORING_PASSWORD,
                Prompt::new(
                    "Select how to set up the collector user password (will be saved to collector config):",
                ),
                &[
                    ("generate random password (recommended)".to_string(), true),
                    ("enter password".to_string(), false),
                ],
            )?;
            if generate {
                generate_password()
            } else {
                state.resolver.text(
                    fields::DB_PASSWORD,
                    Prompt::new(
                        "Enter password for the collector to use (will be saved to collector config):",
                    ),
                    None,
                    Rule::Required,
                )?
            }
        }
    };
    state.save_key(Section::Server, "db_password", &password)
}

/// How the collector itself will connect, from the server section.
fn monitoring_params(state: &mut SetupState) -> Result<ConnParams, ActionError> {
    let user = required_server_key(state, "db_username")?;
    let password = required_server_key(state, "db_password")?;
    let host = state
        .server_key("db_host")
        .unwrap_or("localhost")
        .to_string();
    let port = match state.server_key("db_port").map(str::to_string) {
        Some(port) => Some(port.trim().parse::<u16>().map_err(|_| {
            ActionError::Failed(format!("db_port {:?} in the collector config is not a port", port))
        })?),
        None => state.db()?.params().port,
    };
    let database = state
        .server_key("db_name")
        .and_then(|names| names.split(',').next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "*")
        .map(str::to_string);
    Ok(ConnParams {
        host: Some(host),
        port,
        user: Some(user),
        password: Some(password),
        database,
    })
}

fn monitoring_user_can_log_in(state: &mut SetupState) -> Result<bool, ActionError> {
    let params = monitoring_params(state)?;
    let conn = state.connector().connect(params);
    match conn.ping() {
        Ok(()) => Ok(true),
        Err(err) if err.is_auth_failure() => {
            tracing::debug!(error = %err, "monitoring user cannot log in");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn update_monitoring_user_password(state: &mut SetupState) -> Result<(), ActionError> {
    let user = required_server_key(state, "db_username")?;
    let password = required_server_key(state, "db_password")?;
    let approved = approve(
        state,
        fields::ENSURE_MONITORING_PASSWORD,
        Prompt::new(format!(
            "Update password for user {} with configured value (will be saved to Postgres)?",
            user
        ))
        .with_help("If you skip this step, make sure the password matches before proceeding"),
        "cannot log in with current credentials",
    )?;
    if !approved {
        return Ok(());
    }
    tracing::info!(user, "updating monitoring user password");
    state.db()?.exec(&format!(
        "SET log_statement = none; ALTER USER {} WITH ENCRYPTED PASSWORD {}",
        quote_ident(&user),
        quote_literal(&password)
    ))?;
    Ok(())
}

fn monitoring_user_has_permissions(state: &mut SetupState) -> Result<bool, ActionError> {
    let user = required_server_key(state, "db_username")?;
    let sql = format!(
        "SELECT usesuper OR pg_has_role(usename, 'pg_monitor', 'usage') FROM pg_user WHERE usename = {}",
        quote_literal(&user)
    );
    match state.db()?.query_row(&sql) {
        Ok(row) => Ok(row.get_bool(0)?),
        Err(QueryError::NoRows) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

fn grant_monitoring_permissions(state: &mut SetupState) -> Result<(), ActionError> {
    let user = required_server_key(state, "db_username")?;
    let approved = approve(
        state,
        fields::ENSURE_MONITORING_PERMISSIONS,
        Prompt::new(format!(
            "Grant role pg_monitor to user {} (will be saved to Postgres)?",
            user
        ))
        .with_help(
            "pg_monitor is a built-in role for reading monitoring views; see the Postgres documentation on predefined roles",
        ),
        "monitoring user does not have adequate permissions",
    )?;
    if !approved {
        return Ok(());
    }
    state
        .db()?
        .exec(&format!("GRANT pg_monitor to {}", quote_ident(&user)))?;
    Ok(())
}

fn pganalyze_schema_usable(state: &mut SetupState) -> Result<bool, ActionError> {
    let user = required_server_key(state, "db_username")?;
    let conn = state.db()?;
    let count = conn
        .query_row("SELECT COUNT(*) FROM pg_namespace WHERE nspname = 'pganalyze'")?
        .get_int(0)?;
    if count != 1 {
        return Ok(false);
    }
    Ok(conn
        .query_row(&format!(
            "SELECT has_schema_privilege({}, 'pganalyze', 'USAGE')",
            quote_literal(&user)
        ))?
        .get_bool(0)?)
}

fn create_pganalyze_schema(state: &mut SetupState) -> Result<(), ActionError> {
    let user = required_server_key(state, "db_username")?;
    let approved = approve(
        state,
        fields::ENSURE_HELPER_FUNCTIONS,
        Prompt::new("Create pganalyze schema and helper functions (will be saved to Postgres)?")
            .with_help(
                "Helper functions let the collector read database statistics without access to your data",
            ),
        "pganalyze schema or helper functions do not exist",
    )?;
    if !approved {
        return Ok(());
    }
    state.db()?.exec(&format!(
        "CREATE SCHEMA IF NOT EXISTS pganalyze; GRANT USAGE ON SCHEMA pganalyze TO {};",
        quote_ident(&user)
    ))?;
    Ok(())
}
