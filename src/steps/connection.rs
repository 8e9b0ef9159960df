//! The administrative connection and the server facts that gate setup.

use crate::collector_config::Section;
use crate::errors::{ActionError, InputError};
use crate::inputs::fields;
use crate::query::{AdminConnection, ConnParams};
use crate::resolver::{ExecutionMode, Prompt, Rule};
use crate::state::{PgVersion, SetupState};
use crate::step::{Step, StepKind};

use super::list_databases;

pub const ESTABLISH_SUPERUSER_CONNECTION: Step = Step::new(
    "establish_superuser_connection",
    StepKind::Baseline,
    "Ensure a Postgres superuser connection for configuration",
    has_live_connection,
    establish_superuser_connection,
);

pub const CHECK_POSTGRES_VERSION: Step = Step::check_only(
    "check_postgres_version",
    StepKind::Baseline,
    "Check whether this Postgres version is supported by guided setup",
    check_postgres_version,
);

pub const CHECK_REPLICATION_STATUS: Step = Step::check_only(
    "check_replication_status",
    StepKind::Baseline,
    "Check whether the Postgres server is a primary",
    check_replication_status,
);

pub const SELECT_DATABASES: Step = Step::new(
    "select_databases",
    StepKind::Baseline,
    "Select the database(s) to monitor (db_name in the collector config file)",
    has_databases,
    select_databases,
);

const SUPERUSER_HELP: &str =
    "A separate, restricted monitoring user for the collector is created in a later step";

/// Any connection that fails a round-trip is treated as absent. A live
/// connection must belong to a superuser, since setup changes server settings.
fn has_live_connection(state: &mut SetupState) -> Result<bool, ActionError> {
    if !state.has_connection() {
        return Ok(false);
    }
    let alive = match state.db() {
        Ok(conn) => conn.ping().is_ok(),
        Err(ActionError::NotConnected) => false,
        Err(err) => return Err(err),
    };
    if !alive {
        tracing::warn!("administrative connection did not answer; reconnecting");
        state.drop_connection();
        return Ok(false);
    }
    require_superuser(state.db()?)?;
    Ok(true)
}

fn require_superuser(conn: &dyn AdminConnection) -> Result<(), ActionError> {
    let row = conn.query_row(
        "SELECT usesuper, current_user FROM pg_user WHERE usename = current_user",
    )?;
    if !row.get_bool(0)? {
        return Err(ActionError::Failed(format!(
            "user {} is not a superuser; Postgres superuser is required for setup",
            row.get_str(1)?
        )));
    }
    Ok(())
}

fn establish_superuser_connection(state: &mut SetupState) -> Result<(), ActionError> {
    let servers = state.host.local_servers(&state.settings.socket_dirs)?;
    tracing::debug!(count = servers.len(), "discovered local Postgres servers");
    if state.resolver.mode() == ExecutionMode::Interactive && servers.is_empty() {
        return Err(ActionError::Failed(
            "failed to find a running local Postgres install".to_string(),
        ));
    }

    let labels: Vec<String> = servers
        .iter()
        .map(|s| format!("port {} in socket dir {}", s.port, s.socket_dir))
        .collect();
    let mut socket_dir = state.inputs().pg_setup_conn_socket_dir.clone();
    let port = state
        .resolver
        .resolve(fields::PG_SETUP_CONN_PORT, &Rule::Any, |term| {
            let index = if servers.len() == 1 {
                0
            } else {
                term.select(
                    &Prompt::new("Found several Postgres installations; please select one"),
                    &labels,
                    0,
                )?
            };
            let server = servers.get(index).ok_or(InputError::SelectionOutOfRange {
                index,
                len: servers.len(),
            })?;
            socket_dir = Some(server.socket_dir.clone());
            Ok(i64::from(server.port))
        })?;

    let server = servers
        .iter()
        .find(|s| {
            i64::from(s.port) == port && socket_dir.as_deref().is_none_or(|d| d == s.socket_dir)
        })
        .ok_or_else(|| {
            let location = socket_dir
                .as_deref()
                .map(|d| format!(" in {}", d))
                .unwrap_or_default();
            ActionError::Failed(format!(
                "no Postgres server found listening on {}{}",
                port, location
            ))
        })?
        .clone();

    let user = state
        .resolver
        .resolve(fields::PG_SETUP_CONN_USER, &Rule::Required, |term| {
            let options = ["postgres".to_string(), "another user...".to_string()];
            let choice = term.select(
                &Prompt::new("Select Postgres superuser to connect as for configuration purposes")
                    .with_help(SUPERUSER_HELP),
                &options,
                0,
            )?;
            match choice {
                0 => Ok(options[0].clone()),
                1 => term
                    .input(
                        &Prompt::new(
                            "Enter Postgres superuser to connect as for configuration purposes",
                        )
                        .with_help(SUPERUSER_HELP),
                        None,
                    )
                    .map(|s| s.trim().to_string()),
                index => Err(InputError::SelectionOutOfRange { index, len: 2 }),
            }
        })?;

    tracing::info!(%server, user = %user, "connecting to Postgres");
    let conn = state
        .connector()
        .connect(ConnParams::socket(&server.socket_dir, server.port, &user));
    state.set_connection(conn);
    Ok(())
}

fn check_postgres_version(state: &mut SetupState) -> Result<bool, ActionError> {
    let row = state.db()?.query_row(
        "SELECT current_setting('server_version'), current_setting('server_version_num')::integer",
    )?;
    let version = PgVersion {
        display: row.get_string(0)?,
        num: row.get_int(1)?,
    };
    tracing::debug!(version = %version.display, num = version.num, "Postgres version");
    let supported = version.num >= 100000;
    let display = version.display.clone();
    state.pg_version = Some(version);

    if !supported {
        return Err(ActionError::Unsupported(format!(
            "not supported for Postgres versions older than 10; found {}",
            display
        )));
    }
    Ok(true)
}

fn check_replication_status(state: &mut SetupState) -> Result<bool, ActionError> {
    let in_recovery = state
        .db()?
        .query_row("SELECT pg_is_in_recovery()")?
        .get_bool(0)?;
    if in_recovery {
        return Err(ActionError::Unsupported(
            "Postgres server is a replica; this is currently not supported".to_string(),
        ));
    }
    Ok(true)
}

/// Also rebinds the connection to the primary monitored database, so
/// extensions and helpers land there on resumed runs too.
fn has_databases(state: &mut SetupState) -> Result<bool, ActionError> {
    let Some(primary) = state
        .server_key("db_name")
        .and_then(|names| names.split(',').next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
    else {
        return Ok(false);
    };
    if primary != "*" {
        state.switch_database(&primary)?;
    }
    Ok(true)
}

fn select_databases(state: &mut SetupState) -> Result<(), ActionError> {
    let available = list_databases(state.db()?)?;
    if available.is_empty() {
        return Err(ActionError::Failed(
            "no databases accepting connections found in Postgres".to_string(),
        ));
    }

    let raw = state
        .resolver
        .resolve(fields::DB_NAME, &Rule::Required, |term| {
            ask_databases(term, &available)
        })?;

    let mut names = Vec::new();
    for name in raw.split(',').map(str::trim) {
        if name != "*" && !available.iter().any(|db| db == name) {
            return Err(ActionError::Input(InputError::Invalid {
                field: fields::DB_NAME.key(),
                reason: format!(
                    "database {} configured for db_name but not found in Postgres",
                    name
                ),
            }));
        }
        names.push(name);
    }

    state.save_key(Section::Server, "db_name", &names.join(","))
}

fn ask_databases(
    term: &mut dyn crate::resolver::Terminal,
    available: &[String],
) -> Result<String, InputError> {
    let index = term.select(
        &Prompt::new("Choose a primary database to monitor (will be saved to collector config):")
            .with_help("The collector connects to this database; others can be added next"),
        available,
        0,
    )?;
    let primary = available
        .get(index)
        .cloned()
        .ok_or(InputError::SelectionOutOfRange {
            index,
            len: available.len(),
        })?;
    let others: Vec<String> = available
        .iter()
        .filter(|db| **db != primary)
        .cloned()
        .collect();
    let mut names = vec![primary];

    if others.is_empty() {
        if term.confirm(
            &Prompt::new(
                "Monitor all other databases created in the future (will be saved to collector config)?",
            ),
            true,
        )? {
            names.push("*".to_string());
        }
        return Ok(names.join(","));
    }

    let options = [
        "all other databases (including future ones)".to_string(),
        "no other databases".to_string(),
        "select databases...".to_string(),
    ];
    let choice = term.select(
        &Prompt::new("Monitor other databases (will be saved to collector config)?").with_help(
            "Choosing all other databases also monitors databases created on this server later",
        ),
        &options,
        0,
    )?;
    match choice {
        0 => names.push("*".to_string()),
        1 => {}
        2 => {
            let picked = term.multi_select(
                &Prompt::new("Select other databases to monitor (will be saved to collector config):"),
                &others,
            )?;
            for index in picked {
                let name = others.get(index).ok_or(InputError::SelectionOutOfRange {
                    index,
                    len: others.len(),
                })?;
                names.push(name.clone());
            }
        }
        index => {
            return Err(InputError::SelectionOutOfRange {
                index,
                len: options.len(),
            });
        }
    }
    Ok(names.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::SetupInputs;
    use crate::step::Action;
    use crate::testing::{Answer, FakeConnection, FakeConnector, FakeHost, FakeTerminal, StateBuilder};
    use tempfile::TempDir;

    fn superuser() -> FakeConnection {
        let conn = FakeConnection::new();
        conn.respond("usename = current_user", &[&["t", "postgres"]]);
        conn
    }

    fn two_servers() -> FakeHost {
        let host = FakeHost::new();
        host.server("/var/run/postgresql", 5432);
        host.server("/tmp", 5433);
        host
    }

    #[test]
    fn test_scripted_connection_matches_port() {
        let connector = FakeConnector::new(superuser());
        let inputs = SetupInputs {
            pg_setup_conn_port: Some(5433),
            pg_setup_conn_user: Some("postgres".to_string()),
            ..Default::default()
        };
        let mut state = StateBuilder::new()
            .scripted(inputs)
            .host(two_servers())
            .connector(connector.clone())
            .build();

        assert!(!ESTABLISH_SUPERUSER_CONNECTION.check(&mut state).unwrap());
        ESTABLISH_SUPERUSER_CONNECTION.run(&mut state).unwrap();
        assert!(ESTABLISH_SUPERUSER_CONNECTION.check(&mut state).unwrap());

        assert_eq!(
            connector.opened(),
            vec![ConnParams::socket("/tmp", 5433, "postgres")]
        );
    }

    #[test]
    fn test_scripted_connection_reports_missing_server() {
        let inputs = SetupInputs {
            pg_setup_conn_port: Some(5433),
            pg_setup_conn_socket_dir: Some("/var/run/postgresql".to_string()),
            pg_setup_conn_user: Some("postgres".to_string()),
            ..Default::default()
        };
        let mut state = StateBuilder::new()
            .scripted(inputs)
            .host(two_servers())
            .build();

        let err = ESTABLISH_SUPERUSER_CONNECTION.run(&mut state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "no Postgres server found listening on 5433 in /var/run/postgresql"
        );
    }

    #[test]
    fn test_interactive_connection_with_other_superuser() {
        let host = FakeHost::new();
        host.server("/var/run/postgresql", 5432);
        let connector = FakeConnector::default();
        let terminal = FakeTerminal::new(vec![
            Answer::Select(1),
            Answer::Input(" admin ".to_string()),
        ]);
        let mut state = StateBuilder::new()
            .interactive(terminal.clone())
            .host(host)
            .connector(connector.clone())
            .build();

        ESTABLISH_SUPERUSER_CONNECTION.run(&mut state).unwrap();

        assert_eq!(
            connector.opened(),
            vec![ConnParams::socket("/var/run/postgresql", 5432, "admin")]
        );
        assert_eq!(terminal.prompts().len(), 2);
    }

    #[test]
    fn test_interactive_connection_without_servers() {
        let mut state = StateBuilder::new()
            .interactive(FakeTerminal::default())
            .build();
        let err = ESTABLISH_SUPERUSER_CONNECTION.run(&mut state).unwrap_err();
        assert!(err.to_string().contains("failed to find a running local Postgres"));
    }

    #[test]
    fn test_dead_connection_fails_check() {
        let conn = FakeConnection::new();
        conn.fail_ping();
        let mut state = StateBuilder::new().connection(conn).build();
        state.mark_connection_stale();

        assert!(!ESTABLISH_SUPERUSER_CONNECTION.check(&mut state).unwrap());
        assert!(!state.has_connection());
    }

    #[test]
    fn test_unanswered_ping_drops_fresh_connection() {
        let conn = superuser();
        conn.fail_ping();
        let handle = conn.clone();
        let mut state = StateBuilder::new().connection(conn).build();

        assert!(!ESTABLISH_SUPERUSER_CONNECTION.check(&mut state).unwrap());
        assert!(!state.has_connection());
        assert_eq!(handle.pings(), 1);
    }

    #[test]
    fn test_live_superuser_connection_passes_check() {
        let conn = superuser();
        let handle = conn.clone();
        let mut state = StateBuilder::new().connection(conn).build();

        assert!(ESTABLISH_SUPERUSER_CONNECTION.check(&mut state).unwrap());
        assert!(handle.executed("usesuper"));
    }

    #[test]
    fn test_non_superuser_connection_is_rejected() {
        let conn = FakeConnection::new();
        conn.respond("usename = current_user", &[&["f", "app"]]);
        let mut state = StateBuilder::new().connection(conn).build();

        let err = ESTABLISH_SUPERUSER_CONNECTION.check(&mut state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "user app is not a superuser; Postgres superuser is required for setup"
        );
    }

    #[test]
    fn test_old_postgres_is_rejected() {
        let conn = FakeConnection::new();
        conn.respond("server_version_num", &[&["9.6.24", "90624"]]);
        let mut state = StateBuilder::new().connection(conn).build();

        let err = CHECK_POSTGRES_VERSION.check(&mut state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "not supported for Postgres versions older than 10; found 9.6.24"
        );
        assert_eq!(state.pg_version_num().unwrap(), 90624);
    }

    #[test]
    fn test_replica_is_rejected() {
        let conn = FakeConnection::new();
        conn.respond("pg_is_in_recovery", &[&["t"]]);
        let mut state = StateBuilder::new().connection(conn).build();

        let err = CHECK_REPLICATION_STATUS.check(&mut state).unwrap_err();
        assert!(err.to_string().contains("replica"));
    }

    fn databases() -> FakeConnection {
        let conn = FakeConnection::new();
        conn.respond("FROM pg_database", &[&["app"], &["reporting"], &["postgres"]]);
        conn
    }

    #[test]
    fn test_scripted_databases_are_validated_and_saved() {
        let dir = TempDir::new().unwrap();
        let conn = databases();
        let handle = conn.clone();
        let mut inputs = SetupInputs::default();
        inputs.settings.db_name = Some("app, *".to_string());
        let mut state = StateBuilder::new()
            .scripted(inputs)
            .connection(conn)
            .config_file(dir.path().join("collector.conf"), "[pganalyze]\n[server1]\n")
            .build();

        assert!(!SELECT_DATABASES.check(&mut state).unwrap());
        SELECT_DATABASES.run(&mut state).unwrap();
        assert!(SELECT_DATABASES.check(&mut state).unwrap());

        assert_eq!(state.server_key("db_name"), Some("app,*"));
        assert_eq!(handle.database().as_deref(), Some("app"));
    }

    #[test]
    fn test_scripted_unknown_database_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut inputs = SetupInputs::default();
        inputs.settings.db_name = Some("app,missing".to_string());
        let mut state = StateBuilder::new()
            .scripted(inputs)
            .connection(databases())
            .config_file(dir.path().join("collector.conf"), "[pganalyze]\n[server1]\n")
            .build();

        let err = SELECT_DATABASES.run(&mut state).unwrap_err();
        assert!(
            err.to_string()
                .contains("database missing configured for db_name but not found in Postgres")
        );
    }

    #[test]
    fn test_interactive_database_selection() {
        let dir = TempDir::new().unwrap();
        let terminal = FakeTerminal::new(vec![
            Answer::Select(1),
            Answer::Select(2),
            Answer::MultiSelect(vec![0]),
        ]);
        let mut state = StateBuilder::new()
            .interactive(terminal)
            .connection(databases())
            .config_file(dir.path().join("collector.conf"), "[pganalyze]\n[server1]\n")
            .build();

        SELECT_DATABASES.run(&mut state).unwrap();

        assert_eq!(state.server_key("db_name"), Some("reporting,app"));
        assert_eq!(state.inputs().settings.db_name.as_deref(), Some("reporting,app"));
    }

    #[test]
    fn test_interactive_single_database_can_include_future_ones() {
        let dir = TempDir::new().unwrap();
        let conn = FakeConnection::new();
        conn.respond("FROM pg_database", &[&["app"]]);
        let terminal = FakeTerminal::new(vec![Answer::Select(0), Answer::Confirm(true)]);
        let mut state = StateBuilder::new()
            .interactive(terminal)
            .connection(conn)
            .config_file(dir.path().join("collector.conf"), "[pganalyze]\n[server1]\n")
            .build();

        SELECT_DATABASES.run(&mut state).unwrap();
        assert_eq!(state.server_key("db_name"), Some("app,*"));
    }
}
