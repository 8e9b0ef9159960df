//! Typed error hierarchy for the setup engine.
//!
//! `SetupError` is what a halted pipeline reports, with one variant per failure
//! class. `ActionError` is what a single `check` or `run` returns. The remaining
//! enums belong to the collaborators actions talk to: the input resolver, the
//! admin connection, the collector config file and the host.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that halt a pipeline. Every variant names the step it came from.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The target could not even be inspected.
    #[error("{step}: failed to check status: {source}")]
    Check {
        step: String,
        #[source]
        source: ActionError,
    },

    /// The remediation itself failed.
    #[error("{step}: {source}")]
    Run {
        step: String,
        #[source]
        source: ActionError,
    },

    /// The remediation reported success but the recheck still says not done.
    #[error("{step}: check still failed after running resolution; please try again")]
    RecheckDisagreement { step: String },

    /// A required declarative input was missing or invalid.
    #[error("{step}: {source}")]
    Input {
        step: String,
        #[source]
        source: InputError,
    },

    /// The pipeline definition itself is malformed.
    #[error("{step}: internal error: {reason}")]
    Invariant { step: String, reason: String },
}

impl SetupError {
    /// Identifier of the step that halted the pipeline.
    pub fn step(&self) -> &str {
        match self {
            SetupError::Check { step, .. }
            | SetupError::Run { step, .. }
            | SetupError::RecheckDisagreement { step }
            | SetupError::Input { step, .. }
            | SetupError::Invariant { step, .. } => step,
        }
    }
}

/// Errors returned by an individual action's `check` or `run`.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Input(InputError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Host(#[from] HostError),

    /// The environment is outside what setup supports.
    #[error("{0}")]
    Unsupported(String),

    #[error("no administrative connection has been established")]
    NotConnected,

    #[error("{0}")]
    Failed(String),

    /// A "cannot happen" branch was reached inside an action.
    #[error("{0}")]
    Invariant(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<InputError> for ActionError {
    fn from(err: InputError) -> Self {
        match err {
            InputError::SelectionOutOfRange { index, len } => ActionError::Invariant(format!(
                "prompt returned selection {} but only {} options were offered",
                index, len
            )),
            other => ActionError::Input(other),
        }
    }
}

/// Errors from resolving a single decision point.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("no {field} specified; add \"{field}\" to your inputs file")]
    Missing { field: &'static str },

    #[error("invalid value for \"{field}\": {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("conflicting inputs: {0}")]
    Conflict(String),

    #[error("setup cancelled by operator")]
    Aborted,

    #[error("prompt selection {index} is out of range for {len} options")]
    SelectionOutOfRange { index: usize, len: usize },

    #[error("prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
}

impl InputError {
    /// Name of the declarative field this error is about, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            InputError::Missing { field } | InputError::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Errors from the administrative connection.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query returned no rows")]
    NoRows,

    #[error("expected one row; got {0}")]
    UnexpectedRowCount(usize),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("query failed: {stderr}")]
    Failed { stderr: String },

    #[error("column {index} is out of range for a row with {len} columns")]
    ColumnOutOfRange { index: usize, len: usize },

    #[error("column {index}: cannot read {value:?} as {expected}")]
    Parse {
        index: usize,
        value: String,
        expected: &'static str,
    },

    #[error("malformed psql output: {0}")]
    Malformed(String),
}

impl QueryError {
    /// Whether the server rejected the credentials rather than the statement.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            QueryError::Failed { stderr } => {
                stderr.contains("password authentication failed")
                    || stderr.contains("no password supplied")
                    || (stderr.contains("role") && stderr.contains("does not exist"))
            }
            _ => false,
        }
    }
}

/// Errors from the collector configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error("failed to save config file at {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unsupported(String),

    #[error("config file has not been loaded")]
    NotLoaded,
}

/// Errors from host facilities: processes, services, the filesystem.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {message}")]
    Command { program: String, message: String },

    #[error("no running {0} process found")]
    ProcessNotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
