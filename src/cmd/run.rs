//! Guided setup run: `collector-setup run` (also the default command).

use anyhow::{Context, Result};

use collector_setup::config::SetupConfig;
use collector_setup::errors::InputError;
use collector_setup::host::{LocalHost, effective_uid};
use collector_setup::inputs::{SetupInputs, fields};
use collector_setup::orchestrator::StepRunner;
use collector_setup::pipeline::run_segments;
use collector_setup::query::PsqlConnector;
use collector_setup::resolver::{ExecutionMode, InputResolver, Prompt};
use collector_setup::state::SetupState;
use collector_setup::steps;
use collector_setup::ui::{ConsoleTerminal, SetupUI};

use super::super::Cli;

const ROOT_REQUIRED: &str = "\
The installer must be run with root privileges. It explains every step and asks
before it changes the collector config file or your database. Alternatively,
follow the manual collector install instructions.";

const WELCOME: &str = "\
Welcome to the pganalyze collector installer!

This walks through setting up the collector to monitor your Postgres server.
Nothing in your database or on this system is changed without confirmation.

The steps are:

 1. Configure database access and, if needed, create a monitoring-only database user
 2. Write those settings to the collector configuration file
 3. Set up pg_stat_statements for query performance monitoring
 4. (Optional) Adjust logging settings for Log Insights
 5. (Optional) Set up EXPLAIN plan collection for Automated EXPLAIN

Each step first checks whether anything needs to change, and only then asks for
input or confirmation.

Postgres settings are changed with ALTER SYSTEM. Later refinements must also use
ALTER SYSTEM (or ALTER SYSTEM RESET), since ALTER SYSTEM values take precedence
over edits to postgresql.conf.

Press Ctrl+C to stop at any time. Running the installer again resumes where it
left off.";

const PENDING_RELOAD: &str = "Exiting with pending changes to the collector config. \
Run pganalyze-collector --reload to apply them.";

pub fn cmd_run(cli: &Cli) -> Result<()> {
    // Inputs come first so a broken file fails before anything else happens.
    let inputs = match &cli.inputs {
        Some(path) => Some(SetupInputs::load(path)?),
        None => None,
    };

    if effective_uid() != 0 {
        anyhow::bail!(ROOT_REQUIRED);
    }

    let settings = SetupConfig::resolve(cli.settings.as_deref(), cli.config.clone())
        .context("failed to load installer settings")?;

    let mut ui = SetupUI::new(cli.verbose);
    for warning in settings.validate() {
        ui.warn(&warning);
    }

    let mode = if inputs.is_some() {
        ExecutionMode::Scripted
    } else {
        ExecutionMode::Interactive
    };
    tracing::info!(%mode, config = %settings.collector_config.display(), "starting setup");

    let terminal = ConsoleTerminal::new().with_spinner(ui.spinner());
    let mut resolver = InputResolver::new(mode, inputs.unwrap_or_default(), Box::new(terminal));
    if cli.skip_log_insights {
        resolver.preset(fields::CONFIRM_SET_UP_LOG_INSIGHTS, false);
    }
    if cli.skip_automated_explain {
        resolver.preset(fields::CONFIRM_SET_UP_AUTOMATED_EXPLAIN, false);
    }

    ui.print_welcome(WELCOME);
    match resolver.proceed(Prompt::new("Continue with setup?"), false) {
        Ok(()) => {}
        Err(InputError::Aborted) => {
            eprintln!("Exiting...");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    let connector = PsqlConnector::new(settings.psql.clone());
    let mut state = SetupState::new(settings, resolver, Box::new(LocalHost), Box::new(connector));

    let result = {
        let mut runner = StepRunner::with_observer(&mut ui);
        run_segments(&mut runner, &steps::segments(), &mut state)
    };
    match result {
        Ok(report) => {
            ui.print_summary(&report);
            Ok(())
        }
        Err(err) => {
            if state.needs_reload {
                ui.warn(PENDING_RELOAD);
            }
            Err(err.into())
        }
    }
}
