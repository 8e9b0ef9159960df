//! Log Insights: the opt-in, logging settings the collector can parse, and
//! where the server writes its log.

use std::path::{Path, PathBuf};

use crate::collector_config::Section;
use crate::errors::{ActionError, InputError};
use crate::inputs::{Field, RECOMMENDED_LOG_LINE_PREFIX, fields};
use crate::resolver::{ExecutionMode, Prompt, Rule};
use crate::sql::{self, apply_config_setting, has_library, quote_literal};
use crate::state::SetupState;
use crate::step::{Step, StepKind};

pub const CONFIRM_SET_UP_LOG_INSIGHTS: Step = Step::new(
    "confirm_set_up_log_insights",
    StepKind::Baseline,
    "Confirm whether to set up the optional Log Insights feature",
    |state| {
        Ok(state.inputs().confirm_set_up_log_insights.is_some()
            || state.server_key("db_log_location").is_some())
    },
    confirm_set_up_log_insights,
);

pub const ENSURE_SUPPORTED_LOG_ERROR_VERBOSITY: Step = Step::new(
    "ensure_supported_log_error_verbosity",
    StepKind::LogInsights,
    "Ensure the log_error_verbosity setting in Postgres is supported by the collector",
    |state| {
        let desired = state.inputs().gucs.log_error_verbosity.clone();
        setting_in_place(state, "log_error_verbosity", desired, |v| v != "verbose")
    },
    set_log_error_verbosity,
);

pub const ENSURE_SUPPORTED_LOG_DURATION: Step = Step::new(
    "ensure_supported_log_duration",
    StepKind::LogInsights,
    "Ensure the log_duration setting in Postgres is supported by the collector",
    |state| {
        let desired = state.inputs().gucs.log_duration.clone();
        setting_in_place(state, "log_duration", desired, |v| v != "on")
    },
    set_log_duration,
);

pub const ENSURE_SUPPORTED_LOG_STATEMENT: Step = Step::new(
    "ensure_supported_log_statement",
    StepKind::LogInsights,
    "Ensure the log_statement setting in Postgres is supported by the collector",
    |state| {
        let desired = state.inputs().gucs.log_statement.clone();
        setting_in_place(state, "log_statement", desired, |v| v != "all")
    },
    set_log_statement,
);

pub const ENSURE_SUPPORTED_LOG_MIN_DURATION_STATEMENT: Step = Step::new(
    "ensure_supported_log_min_duration_statement",
    StepKind::LogInsights,
    "Ensure the log_min_duration_statement setting in Postgres is supported by the collector",
    |state| {
        let desired = state
            .inputs()
            .gucs
            .log_min_duration_statement
            .map(|v| v.to_string());
        setting_in_place(state, "log_min_duration_statement", desired, |v| {
            v.parse::<i64>()
                .is_ok_and(|ms| ms == -1 || ms >= MIN_DURATION_FLOOR)
        })
    },
    set_log_min_duration_statement,
);

pub const ENSURE_SUPPORTED_LOG_LINE_PREFIX: Step = Step::new(
    "ensure_supported_log_line_prefix",
    StepKind::LogInsights,
    "Ensure the log_line_prefix setting in Postgres is supported by the collector",
    |state| {
        let desired = state.inputs().gucs.log_line_prefix.clone();
        setting_in_place(state, "log_line_prefix", desired, |v| {
            check_log_line_prefix(v).is_ok()
        })
    },
    set_log_line_prefix,
);

pub const SPECIFY_DB_LOG_LOCATION: Step = Step::new(
    "specify_db_log_location",
    StepKind::LogInsights,
    "Specify the location of Postgres log files (db_log_location) in the collector config file",
    |state| Ok(state.server_key("db_log_location").is_some()),
    specify_db_log_location,
);

pub const CONFIRM_SET_UP_AUTOMATED_EXPLAIN: Step = Step::new(
    "confirm_set_up_automated_explain",
    StepKind::LogInsights,
    "Confirm whether to set up the optional Automated EXPLAIN feature",
    automated_explain_decided,
    confirm_set_up_automated_explain,
);

/// Shortest statement duration, in milliseconds, the collector accepts.
const MIN_DURATION_FLOOR: i64 = 10;

/// Whether `name` is supported and, if an input names a value, already has it.
fn setting_in_place(
    state: &mut SetupState,
    name: &str,
    desired: Option<String>,
    supported: fn(&str) -> bool,
) -> Result<bool, ActionError> {
    let current = sql::current_setting(state.db()?, name)?;
    let in_place = supported(&current) && desired.is_none_or(|d| d == current);
    tracing::debug!(setting = name, current, in_place, "checked logging setting");
    Ok(in_place)
}

/// Resolve a new value for an enum-valued setting and apply it.
fn choose_setting(
    state: &mut SetupState,
    field: Field<String>,
    name: &str,
    unsupported: &str,
    options: &[&str],
    default: usize,
) -> Result<(), ActionError> {
    let current = sql::current_setting(state.db()?, name)?;
    let message = if current == unsupported {
        format!(
            "Setting '{}' is set to unsupported value '{}'; select supported value (will be saved to Postgres):",
            name, current
        )
    } else {
        format!("Select value for '{}' (will be saved to Postgres):", name)
    };
    let value = state
        .resolver
        .choose(field, Prompt::new(message), options, default)?;
    apply_config_setting(state.db()?, name, &quote_literal(&value))
}

fn set_log_error_verbosity(state: &mut SetupState) -> Result<(), ActionError> {
    choose_setting(
        state,
        fields::LOG_ERROR_VERBOSITY,
        "log_error_verbosity",
        "verbose",
        &["terse", "default"],
        1,
    )
}

fn set_log_statement(state: &mut SetupState) -> Result<(), ActionError> {
    choose_setting(
        state,
        fields::LOG_STATEMENT,
        "log_statement",
        "all",
        &["none", "ddl", "mod"],
        0,
    )
}

fn set_log_duration(state: &mut SetupState) -> Result<(), ActionError> {
    let value = state.resolver.resolve_or_decline(
        fields::LOG_DURATION,
        &Rule::none_of(&["on"]),
        |term| {
            let fix = term.confirm(
                &Prompt::new(
                    "Setting 'log_duration' is set to unsupported value 'on'; set to 'off' (will be saved to Postgres)?",
                ),
                false,
            )?;
            Ok(fix.then(|| "off".to_string()))
        },
    )?;
    match value {
        Some(value) => apply_config_setting(state.db()?, "log_duration", &quote_literal(&value)),
        None => Ok(()),
    }
}

fn set_log_min_duration_statement(state: &mut SetupState) -> Result<(), ActionError> {
    let current = sql::current_setting(state.db()?, "log_min_duration_statement")?;
    let value = state.resolver.integer(
        fields::LOG_MIN_DURATION_STATEMENT,
        Prompt::new(format!(
            "Setting 'log_min_duration_statement' is set to '{}', below the supported threshold of {}ms; \
             enter a new value in milliseconds, or -1 to disable (will be saved to Postgres):",
            current, MIN_DURATION_FLOOR
        ))
        .with_help("Statements running longer than this are logged with their duration and text"),
        Rule::DurationThreshold {
            floor: MIN_DURATION_FLOOR,
        },
    )?;
    apply_config_setting(
        state.db()?,
        "log_min_duration_statement",
        &value.to_string(),
    )
}

/// The collector needs user, database and a timestamp in every log line.
fn check_log_line_prefix(prefix: &str) -> Result<(), String> {
    let mut missing = Vec::new();
    if !prefix.contains("%u") {
        missing.push("user (%u)");
    }
    if !prefix.contains("%d") {
        missing.push("database (%d)");
    }
    if !["%m", "%n", "%t"].iter().any(|ts| prefix.contains(ts)) {
        missing.push("timestamp (%m, %n or %t)");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("log_line_prefix is missing {}", missing.join(", ")))
    }
}

fn set_log_line_prefix(state: &mut SetupState) -> Result<(), ActionError> {
    let current = sql::current_setting(state.db()?, "log_line_prefix")?;
    let prefix = state.resolver.text(
        fields::LOG_LINE_PREFIX,
        Prompt::new(format!(
            "Setting 'log_line_prefix' ({}) is missing user (%u), database (%d), or timestamp (%n, %m, or %t); set to (will be saved to Postgres):",
            current
        ))
        .with_help(
            "See the log_line_prefix format reference in the Postgres documentation on error reporting and logging",
        ),
        Some(RECOMMENDED_LOG_LINE_PREFIX),
        Rule::Satisfies(check_log_line_prefix),
    )?;
    apply_config_setting(state.db()?, "log_line_prefix", &quote_literal(&prefix))
}

fn confirm_set_up_log_insights(state: &mut SetupState) -> Result<(), ActionError> {
    if state.resolver.mode() == ExecutionMode::Interactive {
        state.resolver.say(
            "Basic setup is almost complete. You can finish now, or go on to set up the \
             optional Log Insights feature. Log Insights needs to know where your database \
             log file is (it can usually be detected), and may need changes to some \
             logging settings. Automated EXPLAIN builds on Log Insights.",
        );
    }
    state.resolver.confirm(
        fields::CONFIRM_SET_UP_LOG_INSIGHTS,
        Prompt::new("Proceed to configuring optional Log Insights feature?"),
        false,
    )?;
    Ok(())
}

fn automated_explain_decided(state: &mut SetupState) -> Result<bool, ActionError> {
    if state.inputs().confirm_set_up_automated_explain.is_some() {
        return Ok(true);
    }
    let Some(log_explain) = state
        .config()?
        .get_bool(Section::Server, "enable_log_explain")
    else {
        return Ok(false);
    };
    if log_explain {
        return Ok(true);
    }
    let pending = sql::pending_shared_preload_libraries(state.db()?)?;
    Ok(has_library(&pending, "auto_explain"))
}

fn confirm_set_up_automated_explain(state: &mut SetupState) -> Result<(), ActionError> {
    if state.resolver.mode() == ExecutionMode::Interactive {
        state.resolver.say(
            "Log Insights setup is almost complete. You can finish now, or go on to set up \
             the optional Automated EXPLAIN feature. It uses either the auto_explain module \
             (recommended) or helper functions created in every monitored database. With \
             the recommended settings, which are reviewed during setup, auto_explain has \
             little impact on most workloads.",
        );
    }
    state.resolver.confirm(
        fields::CONFIRM_SET_UP_AUTOMATED_EXPLAIN,
        Prompt::new("Proceed to configuring optional Automated EXPLAIN feature?"),
        false,
    )?;
    Ok(())
}

/// Work out where the server writes its log from its settings and the
/// postmaster's open files.
fn discover_log_location(state: &mut SetupState) -> Result<String, ActionError> {
    if let Some(host) = state.server_key("db_host")
        && host != "localhost"
        && host != "127.0.0.1"
    {
        return Err(ActionError::Unsupported(
            "detected remote server; Log Insights for self-hosted systems requires the collector to run on the database server"
                .to_string(),
        ));
    }

    let conn = state.db()?;
    let row = conn.query_row(
        "SELECT current_setting('log_destination'), current_setting('logging_collector'), current_setting('log_directory')",
    )?;
    let destination = row.get_string(0)?;
    let logging_collector = row.get_string(1)?;
    let log_directory = row.get_string(2)?;

    match destination.as_str() {
        "stderr" => {}
        "syslog" => {
            return Err(ActionError::Unsupported(
                "log_destination is syslog; follow the rsyslogd or syslog-ng instructions in the setup guide instead"
                    .to_string(),
            ));
        }
        other => {
            return Err(ActionError::Unsupported(format!(
                "unsupported log_destination {}",
                other
            )));
        }
    }

    if logging_collector == "on" {
        let directory = PathBuf::from(&log_directory);
        if directory.is_absolute() {
            return Ok(log_directory);
        }
        let data_dir = conn.query_row("SHOW data_directory")?.get_string(0)?;
        return Ok(Path::new(&data_dir).join(directory).display().to_string());
    }

    // Without the logging collector, stderr is redirected to the log file.
    let pid = state.host.postmaster_pid()?;
    let target = state
        .host
        .resolve_link(Path::new(&format!("/proc/{}/fd/1", pid)))?;
    Ok(target.display().to_string())
}

fn scripted_log_location(state: &mut SetupState) -> Result<String, ActionError> {
    let guess = state.inputs().guess_log_location.unwrap_or(false);
    let explicit = state.inputs().settings.db_log_location.clone();
    match explicit {
        Some(location) if guess && !location.is_empty() => Err(ActionError::Input(InputError::Conflict(
            "cannot specify both guess_log_location and set explicit db_log_location".to_string(),
        ))),
        Some(location) => Ok(location),
        None if !guess => Err(ActionError::Failed(
            "db_log_location not provided and guess_log_location flag not set".to_string(),
        )),
        None => discover_log_location(state).map_err(|err| {
            ActionError::Failed(format!(
                "could not determine Postgres log location automatically: {}",
                err
            ))
        }),
    }
}

fn interactive_log_location(state: &mut SetupState) -> Result<String, ActionError> {
    let guessed = match discover_log_location(state) {
        Ok(location) => Some(location),
        Err(err) => {
            tracing::debug!(error = %err, "could not determine Postgres log location automatically");
            None
        }
    };
    let host = &state.host;
    let location = state
        .resolver
        .resolve(fields::DB_LOG_LOCATION, &Rule::Required, |term| {
            if let Some(guess) = &guessed {
                let correct = term.confirm(
                    &Prompt::new(format!(
                        "Your database log file or directory appears to be {}; is this correct (will be saved to collector config)?",
                        guess
                    )),
                    false,
                )?;
                if correct {
                    return Ok(guess.clone());
                }
            }
            loop {
                let answer = term.input(
                    &Prompt::new(
                        "Please enter the Postgres log file location (will be saved to collector config):",
                    ),
                    None,
                )?;
                let answer = answer.trim().to_string();
                if host.path_exists(Path::new(&answer)) {
                    return Ok(answer);
                }
                term.say(&format!("{} does not exist; please try again", answer));
            }
        })?;
    Ok(location)
}

fn specify_db_log_location(state: &mut SetupState) -> Result<(), ActionError> {
    let location = match state.resolver.mode() {
        ExecutionMode::Scripted => scripted_log_location(state)?,
        ExecutionMode::Interactive => interactive_log_location(state)?,
    };
    tracing::info!(location, "using Postgres log location");
    state.save_key(Section::Server, "db_log_location", &location)
}
