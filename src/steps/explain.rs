//! Automated EXPLAIN, through either the auto_explain module or log-based
//! EXPLAIN helper functions.

use std::collections::HashMap;

use crate::collector_config::Section;
use crate::errors::{ActionError, InputError, QueryError};
use crate::inputs::{Field, SetupInputs, fields};
use crate::pipeline::uses_log_explain;
use crate::resolver::{ExecutionMode, Prompt, Rule};
use crate::sql::{self, apply_config_setting, has_library, quote_ident, quote_literal, with_library};
use crate::state::SetupState;
use crate::step::{Step, StepKind};

use super::{approve, list_databases, required_server_key};

pub const CONFIRM_AUTOMATED_EXPLAIN_MODE: Step = Step::new(
    "confirm_automated_explain_mode",
    StepKind::AutomatedExplain,
    "Choose between auto_explain and log-based EXPLAIN (enable_log_explain) in the collector config file",
    |state| Ok(state.server_key("enable_log_explain").is_some()),
    confirm_automated_explain_mode,
);

pub const CHECK_AUTO_EXPLAIN_AVAILABLE: Step = Step::new(
    "check_auto_explain_available",
    StepKind::AutomatedExplain,
    "Prerequisite: ensure the auto_explain contrib module is available",
    auto_explain_available,
    |_| {
        Err(ActionError::Unsupported(
            "contrib module auto_explain is not available; install the Postgres contrib package"
                .to_string(),
        ))
    },
);

pub const ENSURE_AUTO_EXPLAIN_IN_SHARED_PRELOAD: Step = Step::new(
    "ensure_auto_explain_in_shared_preload",
    StepKind::AutomatedExplain,
    "Ensure auto_explain is in shared_preload_libraries",
    auto_explain_preloaded,
    preload_auto_explain,
);

pub const ENSURE_LOG_EXPLAIN_HELPERS: Step = Step::new(
    "ensure_log_explain_helpers",
    StepKind::AutomatedExplain,
    "Ensure the EXPLAIN helper function exists in every monitored database",
    log_explain_helpers_installed,
    create_log_explain_helpers,
);

pub const ENSURE_RECOMMENDED_AUTO_EXPLAIN_SETTINGS: Step = Step::new(
    "ensure_recommended_auto_explain_settings",
    StepKind::AutomatedExplain,
    "Ensure auto_explain settings in Postgres are configured as recommended, if desired",
    recommended_settings_in_place,
    review_auto_explain_settings,
);

pub const RUN_TEST_EXPLAIN_COMMAND: Step = Step::new(
    "run_test_explain_command",
    StepKind::AutomatedExplain,
    "Run the collector's EXPLAIN test to verify the Automated EXPLAIN setup",
    |state| {
        Ok(state.flags.did_test_explain_command
            || state.inputs().confirm_run_test_explain_command == Some(false))
    },
    run_test_explain_command,
);

fn confirm_automated_explain_mode(state: &mut SetupState) -> Result<(), ActionError> {
    let log_explain = state.resolver.choose_value(
        fields::USE_LOG_BASED_EXPLAIN,
        Prompt::new("Select automated EXPLAIN mechanism to use (will be saved to collector config):")
            .with_help(
                "auto_explain gives the most detailed plans but requires a Postgres restart; \
                 log-based EXPLAIN runs EXPLAIN through helper functions and needs no restart",
            ),
        &[
            ("auto_explain (recommended)".to_string(), false),
            ("Log-based EXPLAIN".to_string(), true),
        ],
    )?;
    let value = if log_explain { "true" } else { "false" };
    state.save_key(Section::Server, "enable_log_explain", value)
}

fn auto_explain_available(state: &mut SetupState) -> Result<bool, ActionError> {
    if uses_log_explain(state) {
        return Ok(true);
    }
    match state.db()?.exec("LOAD 'auto_explain'") {
        Ok(()) => Ok(true),
        Err(QueryError::Failed { stderr }) if stderr.contains("No such file or directory") => {
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn auto_explain_preloaded(state: &mut SetupState) -> Result<bool, ActionError> {
    if uses_log_explain(state) {
        return Ok(true);
    }
    let pending = sql::pending_shared_preload_libraries(state.db()?)?;
    Ok(has_library(&pending, "auto_explain"))
}

fn preload_auto_explain(state: &mut SetupState) -> Result<(), ActionError> {
    let approved = approve(
        state,
        fields::ENSURE_AUTO_EXPLAIN_LOADED,
        Prompt::new(
            "Add auto_explain to shared_preload_libraries (will be saved to Postgres; takes effect on restart)?",
        )
        .with_help("Postgres will be restarted in a later step, after confirmation"),
        "auto_explain is not in shared_preload_libraries",
    )?;
    if !approved {
        return Ok(());
    }
    let conn = state.db()?;
    let current = sql::pending_shared_preload_libraries(conn)?;
    apply_config_setting(
        conn,
        "shared_preload_libraries",
        &with_library(&current, "auto_explain"),
    )
}

/// Databases named by `db_name`, with `*` expanded to every database.
fn monitored_databases(state: &mut SetupState) -> Result<Vec<String>, ActionError> {
    let configured = required_server_key(state, "db_name")?;
    let names: Vec<String> = configured
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.iter().any(|n| n == "*") {
        return list_databases(state.db()?);
    }
    Ok(names)
}

/// Run `f` against each database, then point the connection back where it was.
fn for_each_database<T>(
    state: &mut SetupState,
    mut f: impl FnMut(&mut SetupState, &str) -> Result<Option<T>, ActionError>,
) -> Result<Option<T>, ActionError> {
    let original = state.db()?.params().database.clone();
    let databases = monitored_databases(state)?;
    let mut result = Ok(None);
    for database in &databases {
        if let Err(err) = state.switch_database(database) {
            result = Err(err);
            break;
        }
        match f(state, database) {
            Ok(None) => {}
            other => {
                result = other;
                break;
            }
        }
    }
    if let Some(original) = original
        && let Err(err) = state.switch_database(&original)
    {
        tracing::warn!(database = %original, error = %err, "could not switch back to database");
        if result.is_ok() {
            return Err(err);
        }
    }
    result
}

fn log_explain_helpers_installed(state: &mut SetupState) -> Result<bool, ActionError> {
    if !uses_log_explain(state) {
        return Ok(true);
    }
    let missing = for_each_database(state, |state, database| {
        match state.db()?.query_row(&sql::explain_helper_check()) {
            Ok(row) if row.get_bool(0)? => Ok(None),
            Ok(_) | Err(QueryError::NoRows) => {
                tracing::debug!(database, "EXPLAIN helper missing or outdated");
                Ok(Some(()))
            }
            Err(err) => Err(err.into()),
        }
    })?;
    Ok(missing.is_none())
}

fn create_log_explain_helpers(state: &mut SetupState) -> Result<(), ActionError> {
    let user = required_server_key(state, "db_username")?;
    let approved = approve(
        state,
        fields::ENSURE_LOG_EXPLAIN_HELPERS,
        Prompt::new(
            "Create (or update) EXPLAIN helper function in each monitored database (will be saved to Postgres)?",
        ),
        "EXPLAIN helper functions are missing or outdated",
    )?;
    if !approved {
        return Ok(());
    }
    let schema = format!(
        "CREATE SCHEMA IF NOT EXISTS pganalyze; GRANT USAGE ON SCHEMA pganalyze TO {};",
        quote_ident(&user)
    );
    for_each_database::<()>(state, |state, database| {
        tracing::info!(database, "creating EXPLAIN helper");
        let conn = state.db()?;
        conn.exec(&schema)?;
        conn.exec(&sql::explain_helper_definition())?;
        Ok(None)
    })?;
    Ok(())
}

/// The auto_explain settings a review covers, in the order they are asked.
/// The first group is only reviewed when log_analyze ends up on.
const ANALYZE_SWITCHES: [(Field<String>, &str); 3] = [
    (fields::AUTO_EXPLAIN_LOG_BUFFERS, "Include buffer usage statistics in plans"),
    (fields::AUTO_EXPLAIN_LOG_TRIGGERS, "Include trigger execution statistics in plans"),
    (fields::AUTO_EXPLAIN_LOG_VERBOSE, "Include verbose details such as output columns in plans"),
];

fn setting_predicate(name: &str, value: &str) -> String {
    format!(
        "(name = {} AND setting <> {})",
        quote_literal(name),
        quote_literal(value)
    )
}

/// Query for auto_explain settings that differ from the target values, or
/// `None` when there is nothing to compare against.
fn settings_to_review_query(state: &SetupState) -> Option<String> {
    let string_fields = [
        fields::AUTO_EXPLAIN_LOG_ANALYZE,
        fields::AUTO_EXPLAIN_LOG_BUFFERS,
        fields::AUTO_EXPLAIN_LOG_TIMING,
        fields::AUTO_EXPLAIN_LOG_TRIGGERS,
        fields::AUTO_EXPLAIN_LOG_VERBOSE,
        fields::AUTO_EXPLAIN_LOG_FORMAT,
        fields::AUTO_EXPLAIN_LOG_NESTED_STATEMENTS,
    ];
    let min_duration = fields::AUTO_EXPLAIN_LOG_MIN_DURATION.key();

    let predicates: Vec<String> = match state.resolver.mode() {
        ExecutionMode::Scripted => {
            let inputs = state.inputs();
            let mut predicates: Vec<String> = string_fields
                .iter()
                .filter_map(|f| f.read(inputs).map(|v| setting_predicate(f.key(), &v)))
                .collect();
            if let Some(ms) = fields::AUTO_EXPLAIN_LOG_MIN_DURATION.read(inputs) {
                predicates.push(format!(
                    "(name = '{}' AND setting::integer <> {})",
                    min_duration, ms
                ));
            }
            predicates
        }
        ExecutionMode::Interactive => {
            let recommended = SetupInputs::recommended();
            let mut predicates: Vec<String> = string_fields
                .iter()
                .filter_map(|f| f.read(&recommended).map(|v| setting_predicate(f.key(), &v)))
                .collect();
            if let Some(ms) = fields::AUTO_EXPLAIN_LOG_MIN_DURATION.read(&recommended) {
                predicates.push(format!(
                    "(name = '{}' AND setting::integer < {})",
                    min_duration, ms
                ));
            }
            predicates
        }
    };

    if predicates.is_empty() {
        return None;
    }
    Some(format!(
        "SELECT name, setting FROM pg_settings WHERE {}",
        predicates.join(" OR ")
    ))
}

fn settings_to_review(state: &mut SetupState) -> Result<HashMap<String, String>, ActionError> {
    let Some(query) = settings_to_review_query(state) else {
        return Ok(HashMap::new());
    };
    state
        .db()?
        .query(&query)
        .map_err(|e| ActionError::Failed(format!("error checking existing settings: {}", e)))?
        .iter()
        .map(|row| -> Result<(String, String), ActionError> {
            Ok((row.get_string(0)?, row.get_string(1)?))
        })
        .collect()
}

fn recommended_settings_in_place(state: &mut SetupState) -> Result<bool, ActionError> {
    if state.flags.did_auto_explain_recommended_settings
        || state.inputs().ensure_auto_explain_recommended_settings == Some(false)
        || uses_log_explain(state)
    {
        return Ok(true);
    }
    Ok(settings_to_review(state)?.is_empty())
}

/// `(values, labels)` for an on/off setting, recommended option first.
fn switch_options(current: &str, recommended: &str) -> ([&'static str; 2], [String; 2]) {
    let (first, second) = if recommended == "on" {
        ("on", "off")
    } else {
        ("off", "on")
    };
    let label = |value: &str, recommended: bool| {
        let note = if recommended { "recommended" } else { "" };
        match (value == current, recommended) {
            (true, true) => format!("leave as '{}' ({})", value, note),
            (true, false) => format!("leave as '{}'", value),
            (false, true) => format!("set to '{}' ({}; will be saved to Postgres)", value, note),
            (false, false) => format!("set to '{}' (will be saved to Postgres)", value),
        }
    };
    ([first, second], [label(first, true), label(second, false)])
}

fn review_switch(
    state: &mut SetupState,
    field: Field<String>,
    current: &str,
    help: &str,
) -> Result<String, ActionError> {
    let recommended = field
        .read(&SetupInputs::recommended())
        .unwrap_or_else(|| "on".to_string());
    let (values, labels) = switch_options(current, &recommended);
    let prompt = Prompt::new(format!(
        "Setting {} is currently set to '{}'",
        field.key(),
        current
    ))
    .with_help(help);
    let value = state
        .resolver
        .resolve(field, &Rule::one_of(&["on", "off"]), |term| {
            let index = term.select(&prompt, &labels, 0)?;
            values
                .get(index)
                .map(|v| v.to_string())
                .ok_or(InputError::SelectionOutOfRange { index, len: 2 })
        })?;
    apply_if_changed(state, field.key(), current, &value)?;
    Ok(value)
}

fn review_log_format(state: &mut SetupState, current: &str) -> Result<(), ActionError> {
    let labels = [
        "set to 'json' (recommended; will be saved to Postgres)".to_string(),
        if current == "text" {
            "leave as 'text' (text format support is experimental)".to_string()
        } else {
            "set to 'text' (text format support is experimental; will be saved to Postgres)"
                .to_string()
        },
    ];
    let prompt = Prompt::new(format!(
        "Setting auto_explain.log_format is currently set to '{}'",
        current
    ))
    .with_help("Only the 'text' and 'json' EXPLAIN output formats are supported");
    let value = state.resolver.resolve(
        fields::AUTO_EXPLAIN_LOG_FORMAT,
        &Rule::one_of(&["json", "text"]),
        |term| match term.select(&prompt, &labels, 0)? {
            0 => Ok("json".to_string()),
            1 => Ok("text".to_string()),
            index => Err(InputError::SelectionOutOfRange { index, len: 2 }),
        },
    )?;
    apply_if_changed(state, "auto_explain.log_format", current, &value)
}

fn review_log_min_duration(state: &mut SetupState, current: &str) -> Result<(), ActionError> {
    let recommended = SetupInputs::recommended()
        .gucs
        .auto_explain_log_min_duration
        .unwrap_or(1000);
    let labels = [
        format!(
            "set to {}ms (recommended initial value; will be saved to Postgres)",
            recommended
        ),
        "set to other value...".to_string(),
        format!("leave at {}ms", current),
    ];
    let prompt = Prompt::new(format!(
        "Setting auto_explain.log_min_duration is currently set to '{} ms'",
        current
    ))
    .with_help(format!(
        "Threshold to log EXPLAIN plans, in ms; recommend {}, must be at least 10",
        recommended
    ));
    let current_ms = current.trim().parse::<i64>().ok();
    let value = state.resolver.resolve(
        fields::AUTO_EXPLAIN_LOG_MIN_DURATION,
        &Rule::DurationThreshold { floor: 10 },
        |term| match term.select(&prompt, &labels, 0)? {
            0 => Ok(recommended),
            1 => loop {
                let answer = term.input(
                    &Prompt::new(
                        "Set auto_explain.log_min_duration, in milliseconds, to (will be saved to Postgres):",
                    ),
                    None,
                )?;
                match answer.trim().parse::<i64>() {
                    Ok(ms) => return Ok(ms),
                    Err(_) => term.say(&format!("{:?} is not a whole number; please try again", answer)),
                }
            },
            2 => current_ms.ok_or_else(|| InputError::Invalid {
                field: fields::AUTO_EXPLAIN_LOG_MIN_DURATION.key(),
                reason: format!("current value {:?} is not a whole number", current),
            }),
            index => Err(InputError::SelectionOutOfRange { index, len: 3 }),
        },
    )?;
    let value = value.to_string();
    if value != current {
        apply_config_setting(state.db()?, "auto_explain.log_min_duration", &value)?;
    }
    Ok(())
}

fn apply_if_changed(
    state: &mut SetupState,
    name: &str,
    current: &str,
    value: &str,
) -> Result<(), ActionError> {
    if value == current {
        return Ok(());
    }
    apply_config_setting(state.db()?, name, &quote_literal(value))
}

fn review_auto_explain_settings(state: &mut SetupState) -> Result<(), ActionError> {
    let review = state.resolver.confirm(
        fields::ENSURE_AUTO_EXPLAIN_RECOMMENDED_SETTINGS,
        Prompt::new("Review auto_explain configuration settings?").with_help(
            "Optional, but gives the best balance of monitoring visibility and performance",
        ),
        false,
    )?;
    if !review {
        return Ok(());
    }

    let pending = settings_to_review(state)?;
    if pending.is_empty() {
        state
            .resolver
            .say("All auto_explain configuration settings already use the recommended values.");
        state.flags.did_auto_explain_recommended_settings = true;
        return Ok(());
    }
    tracing::debug!(count = pending.len(), "auto_explain settings to review");

    // Timing overhead matters most, so it is asked first.
    if let Some(current) = pending.get("auto_explain.log_timing") {
        review_switch(
            state,
            fields::AUTO_EXPLAIN_LOG_TIMING,
            current,
            "Per-node timing is the main source of auto_explain overhead",
        )?;
    }
    // A reload applies asynchronously, so a value chosen here is not read back.
    let log_analyze = match pending.get("auto_explain.log_analyze") {
        Some(current) => review_switch(
            state,
            fields::AUTO_EXPLAIN_LOG_ANALYZE,
            current,
            "Log actual row counts and run times, not just the plan",
        )?,
        None => state
            .db()?
            .query_row("SHOW auto_explain.log_analyze")?
            .get_string(0)?,
    };
    let analyze_on = log_analyze == "on";
    if analyze_on {
        for (field, help) in ANALYZE_SWITCHES {
            if let Some(current) = pending.get(field.key()) {
                review_switch(state, field, current, help)?;
            }
        }
    }

    if let Some(current) = pending.get("auto_explain.log_format") {
        review_log_format(state, current)?;
    }
    if let Some(current) = pending.get("auto_explain.log_min_duration") {
        review_log_min_duration(state, current)?;
    }
    if let Some(current) = pending.get("auto_explain.log_nested_statements") {
        review_switch(
            state,
            fields::AUTO_EXPLAIN_LOG_NESTED_STATEMENTS,
            current,
            "Also consider statements executed inside functions",
        )?;
    }

    state.flags.did_auto_explain_recommended_settings = true;
    Ok(())
}

fn run_test_explain_command(state: &mut SetupState) -> Result<(), ActionError> {
    let confirmed = state.resolver.confirm(
        fields::CONFIRM_RUN_TEST_EXPLAIN_COMMAND,
        Prompt::new("Issue EXPLAIN command to test Automated EXPLAIN setup?")
            .with_help("Runs a query against the primary database and checks its plan arrives"),
        true,
    )?;
    if !confirmed {
        return Ok(());
    }
    let args = vec![
        "--test-explain".to_string(),
        format!("--config={}", state.settings.collector_config.display()),
    ];
    let output = state
        .host
        .run_collector(&state.settings.collector_binary, &args)
        .map_err(|e| ActionError::Failed(format!("test explain command failed: {}", e)))?;
    tracing::debug!(output = %output.trim(), "test explain command finished");
    state.flags.did_test_explain_command = true;
    Ok(())
}
