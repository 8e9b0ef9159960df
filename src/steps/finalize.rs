//! Restart, verify and hand over to the running collector.

use std::path::PathBuf;

use crate::errors::ActionError;
use crate::host::RestartMethod;
use crate::inputs::fields;
use crate::pipeline::FeatureSelection;
use crate::resolver::{ExecutionMode, Prompt, Rule};
use crate::sql::join_with_and;
use crate::state::SetupState;
use crate::step::{Step, StepKind};

use super::approve;

const COLLECTOR_PROCESS: &str = "pganalyze-collector";

pub const CONFIRM_RESTART_POSTGRES: Step = Step::new(
    "confirm_restart_postgres",
    StepKind::Baseline,
    "If necessary, restart Postgres so pending configuration changes take effect",
    |state| {
        let pending = state
            .db()?
            .query_row("SELECT COUNT(*) FROM pg_settings WHERE pending_restart")?
            .get_int(0)?;
        Ok(pending == 0)
    },
    restart_postgres,
);

pub const RUN_TEST_COMMAND: Step = Step::new(
    "run_test_command",
    StepKind::Baseline,
    "Run the collector's test to verify the configuration and reload the collector",
    |state| {
        Ok(state.flags.did_test_command || state.inputs().confirm_run_test_command == Some(false))
    },
    run_test_command,
);

pub const RELOAD_COLLECTOR: Step = Step::new(
    "reload_collector",
    StepKind::Baseline,
    "Reload the collector so configuration changes take effect",
    |state| Ok(!state.needs_reload || state.flags.did_reload),
    reload_collector,
);

pub const RUN_PG_SLEEP: Step = Step::new(
    "run_pg_sleep",
    StepKind::Baseline,
    "Run a pg_sleep query to confirm log-based features end to end",
    |state| {
        let selection = FeatureSelection::from_state(state);
        Ok(!selection.log_insights
            || state.flags.did_pg_sleep
            || state.inputs().skip_pg_sleep == Some(true))
    },
    run_pg_sleep,
);

fn restart_postgres(state: &mut SetupState) -> Result<(), ActionError> {
    let pending: Vec<String> = state
        .db()?
        .query("SELECT name FROM pg_settings WHERE pending_restart")?
        .iter()
        .map(|row| row.get_string(0))
        .collect::<Result<_, _>>()?;
    let pending = join_with_and(&pending);

    let confirmed = match state.resolver.mode() {
        ExecutionMode::Scripted => {
            if state.inputs().confirm_postgres_restart != Some(true) {
                return Err(ActionError::Failed(format!(
                    "confirm_postgres_restart flag not set but Postgres restart required for settings {}",
                    pending
                )));
            }
            true
        }
        ExecutionMode::Interactive => {
            state.resolver.confirm(
                fields::CONFIRM_POSTGRES_RESTART,
                Prompt::new(format!(
                    "WARNING: Postgres must be restarted for changes to {} to take effect; restart Postgres now?",
                    pending
                )),
                false,
            )? && state.resolver.confirm(
                fields::CONFIRM_POSTGRES_RESTART,
                Prompt::new("WARNING: Your database will be restarted. Are you sure?"),
                false,
            )?
        }
    };
    if !confirmed {
        return Ok(());
    }

    let method = if state.settings.use_pg_ctl {
        let data_dir = state
            .db()?
            .query_row("SHOW data_directory")?
            .get_string(0)?;
        RestartMethod::PgCtl {
            data_dir: PathBuf::from(data_dir),
        }
    } else {
        RestartMethod::Systemd
    };
    tracing::warn!(?method, settings = %pending, "restarting Postgres");
    state.host.restart_postgres(&method)?;
    state.mark_connection_stale();
    Ok(())
}

fn run_test_command(state: &mut SetupState) -> Result<(), ActionError> {
    let confirmed = state.resolver.confirm(
        fields::CONFIRM_RUN_TEST_COMMAND,
        Prompt::new("Test snapshot run and reload the collector?")
            .with_help("Collects one snapshot, sends it to pganalyze and then reloads the running collector"),
        true,
    )?;
    if !confirmed {
        return Ok(());
    }
    let mut args = vec![
        "--test".to_string(),
        "--reload".to_string(),
        format!("--config={}", state.settings.collector_config.display()),
    ];
    args.extend(state.settings.test_extra_args.iter().cloned());
    let output = state
        .host
        .run_collector(&state.settings.collector_binary, &args)
        .map_err(|e| ActionError::Failed(format!("test command failed: {}", e)))?;
    tracing::debug!(output = %output.trim(), "test command finished");
    state.flags.did_test_command = true;
    state.flags.did_reload = true;
    state.needs_reload = false;
    Ok(())
}

fn reload_collector(state: &mut SetupState) -> Result<(), ActionError> {
    let approved = approve(
        state,
        fields::CONFIRM_COLLECTOR_RELOAD,
        Prompt::new(
            "The collector configuration must be reloaded for changes to take effect; reload now?",
        ),
        "collector reload required",
    )?;
    if !approved {
        return Ok(());
    }
    let pid = state
        .host
        .reload_collector(COLLECTOR_PROCESS)
        .map_err(|e| ActionError::Failed(format!("failed to reload collector: {}", e)))?;
    tracing::info!(pid, "reloaded collector");
    state.needs_reload = false;
    state.flags.did_reload = true;
    Ok(())
}

fn run_pg_sleep(state: &mut SetupState) -> Result<(), ActionError> {
    let features = if FeatureSelection::from_state(state).automated_explain {
        "Log Insights and Automated EXPLAIN"
    } else {
        "Log Insights"
    };
    let prompt = Prompt::new(format!(
        "Run pg_sleep command to confirm {} configuration?",
        features
    ))
    .with_help("Results should show up in pganalyze a few seconds after the query completes");
    let skip = state
        .resolver
        .resolve(fields::SKIP_PG_SLEEP, &Rule::Any, |term| {
            term.confirm(&prompt, true).map(|run| !run)
        })?;
    if skip {
        return Ok(());
    }
    state.db()?.exec(
        "SELECT pg_sleep(max(setting::float) / 1000 * 1.2) FROM pg_settings \
         WHERE name IN ('log_min_duration_statement', 'auto_explain.log_min_duration')",
    )?;
    state.flags.did_pg_sleep = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SetupConfig;
    use crate::inputs::SetupInputs;
    use crate::step::Action;
    use crate::testing::{Answer, FakeConnection, FakeHost, FakeTerminal, StateBuilder};

    fn pending_restart(conn: &FakeConnection, names: &[&str]) {
        let count = names.len().to_string();
        conn.respond(
            "SELECT COUNT(*) FROM pg_settings WHERE pending_restart",
            &[&[count.as_str()]],
        );
        let rows: Vec<&[&str]> = names.iter().map(std::slice::from_ref).collect();
        conn.respond("SELECT name FROM pg_settings WHERE pending_restart", &rows);
    }

    #[test]
    fn test_scripted_restart_requires_confirmation() {
        let conn = FakeConnection::new();
        pending_restart(&conn, &["shared_preload_libraries"]);
        let mut state = StateBuilder::new().connection(conn).build();

        assert!(!CONFIRM_RESTART_POSTGRES.check(&mut state).unwrap());
        let err = CONFIRM_RESTART_POSTGRES.run(&mut state).unwrap_err();
        assert_eq!(
            err.to_string(),
            "confirm_postgres_restart flag not set but Postgres restart required for settings shared_preload_libraries"
        );
    }

    #[test]
    fn test_scripted_restart_with_pg_ctl() {
        let conn = FakeConnection::new();
        pending_restart(&conn, &["shared_preload_libraries"]);
        conn.respond("SHOW data_directory", &[&["/var/lib/postgresql/16/main"]]);
        let host = FakeHost::new();
        let inputs = SetupInputs {
            confirm_postgres_restart: Some(true),
            ..Default::default()
        };
        let settings = SetupConfig {
            use_pg_ctl: true,
            ..Default::default()
        };
        let mut state = StateBuilder::new()
            .scripted(inputs)
            .settings(settings)
            .host(host.clone())
            .connection(conn.clone())
            .build();

        CONFIRM_RESTART_POSTGRES.run(&mut state).unwrap();
        assert_eq!(
            host.restarts(),
            vec![RestartMethod::PgCtl {
                data_dir: PathBuf::from("/var/lib/postgresql/16/main")
            }]
        );
        // The connection is pinged before its next use.
        state.db().unwrap();
        assert_eq!(conn.pings(), 1);
    }

    #[test]
    fn test_interactive_restart_asks_twice() {
        let conn = FakeConnection::new();
        pending_restart(&conn, &["shared_preload_libraries", "log_line_prefix"]);
        let host = FakeHost::new();
        let terminal = FakeTerminal::new(vec![Answer::Confirm(true), Answer::Confirm(false)]);
        let handle = terminal.clone();
        let mut state = StateBuilder::new()
            .interactive(terminal)
            .host(host.clone())
            .connection(conn)
            .build();

        CONFIRM_RESTART_POSTGRES.run(&mut state).unwrap();
        assert!(host.restarts().is_empty());
        let prompts = handle.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("shared_preload_libraries and log_line_prefix"));
    }

    #[test]
    fn test_test_command_passes_extra_args_and_reloads() {
        let host = FakeHost::new();
        let inputs = SetupInputs {
            confirm_run_test_command: Some(true),
            ..Default::default()
        };
        let settings = SetupConfig {
            test_extra_args: vec!["--no-postgres-locks".to_string()],
            ..Default::default()
        };
        let mut state = StateBuilder::new()
            .scripted(inputs)
            .settings(settings)
            .host(host.clone())
            .build();
        state.needs_reload = true;

        RUN_TEST_COMMAND.run(&mut state).unwrap();
        let runs = host.collector_runs();
        assert_eq!(runs[0][..2], ["--test".to_string(), "--reload".to_string()]);
        assert!(runs[0][2].starts_with("--config="));
        assert_eq!(runs[0][3], "--no-postgres-locks");
        assert!(RUN_TEST_COMMAND.check(&mut state).unwrap());
        assert!(RELOAD_COLLECTOR.check(&mut state).unwrap());
    }

    #[test]
    fn test_failed_test_command_is_reported() {
        let host = FakeHost::new();
        host.collector_output(Err("could not connect to database"));
        let inputs = SetupInputs {
            confirm_run_test_command: Some(true),
            ..Default::default()
        };
        let mut state = StateBuilder::new().scripted(inputs).host(host).build();

        let err = RUN_TEST_COMMAND.run(&mut state).unwrap_err();
        assert!(err.to_string().contains("test command failed"));
        assert!(!state.flags.did_test_command);
    }

    #[test]
    fn test_reload_only_when_needed() {
        let host = FakeHost::new();
        let inputs = SetupInputs {
            confirm_collector_reload: Some(true),
            ..Default::default()
        };
        let mut state = StateBuilder::new().scripted(inputs).host(host.clone()).build();

        assert!(RELOAD_COLLECTOR.check(&mut state).unwrap());
        state.needs_reload = true;
        assert!(!RELOAD_COLLECTOR.check(&mut state).unwrap());
        RELOAD_COLLECTOR.run(&mut state).unwrap();
        assert_eq!(host.reloads(), 1);
        assert!(RELOAD_COLLECTOR.check(&mut state).unwrap());
    }

    #[test]
    fn test_reload_failure_is_reported() {
        let host = FakeHost::new();
        host.fail_reload();
        let inputs = SetupInputs {
            confirm_collector_reload: Some(true),
            ..Default::default()
        };
        let mut state = StateBuilder::new().scripted(inputs).host(host).build();
        state.needs_reload = true;

        let err = RELOAD_COLLECTOR.run(&mut state).unwrap_err();
        assert!(err.to_string().starts_with("failed to reload collector"));
        assert!(state.needs_reload);
    }

    #[test]
    fn test_pg_sleep_only_with_log_insights() {
        let conn = FakeConnection::new();
        let handle = conn.clone();
        let inputs = SetupInputs {
            confirm_set_up_log_insights: Some(true),
            skip_pg_sleep: Some(false),
            ..Default::default()
        };
        let mut state = StateBuilder::new().scripted(inputs).connection(conn).build();

        assert!(!RUN_PG_SLEEP.check(&mut state).unwrap());
        RUN_PG_SLEEP.run(&mut state).unwrap();
        assert!(handle.executed("SELECT pg_sleep("));
        assert!(RUN_PG_SLEEP.check(&mut state).unwrap());

        let mut without = StateBuilder::new().build();
        assert!(RUN_PG_SLEEP.check(&mut without).unwrap());
    }

    #[test]
    fn test_pg_sleep_prompt_names_features() {
        let conn = FakeConnection::new();
        let handle = conn.clone();
        let terminal = FakeTerminal::new(vec![Answer::Confirm(false)]);
        let prompts = terminal.clone();
        let mut state = StateBuilder::new()
            .interactive(terminal)
            .connection(conn)
            .build();
        state
            .resolver
            .preset(fields::CONFIRM_SET_UP_LOG_INSIGHTS, true);
        state
            .resolver
            .preset(fields::CONFIRM_SET_UP_AUTOMATED_EXPLAIN, true);

        RUN_PG_SLEEP.run(&mut state).unwrap();
        assert!(prompts.prompts()[0].contains("Log Insights and Automated EXPLAIN"));
        assert!(handle.statements().is_empty());
        assert_eq!(state.inputs().skip_pg_sleep, Some(true));
        assert!(RUN_PG_SLEEP.check(&mut state).unwrap());
    }
}
