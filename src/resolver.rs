//! Input resolution for decision points.
//!
//! An action asks the [`InputResolver`] for a value tied to a declarative
//! [`Field`]. In scripted mode the value comes from the inputs document and a
//! missing or invalid value is fatal. In interactive mode the operator is
//! prompted through a [`Terminal`], the answer is validated against the same
//! [`Rule`], invalid answers are re-asked, and shared fields are written back
//! so later steps see the answer without prompting again.

use crate::errors::InputError;
use crate::inputs::{Field, SetupInputs};

/// How the run obtains decisions. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Interactive,
    Scripted,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Interactive => write!(f, "interactive"),
            ExecutionMode::Scripted => write!(f, "scripted"),
        }
    }
}

/// Prompt text plus optional help shown before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub message: String,
    pub help: Option<String>,
}

impl Prompt {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            help: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

/// The operator-facing side of interactive mode.
///
/// Selection methods return indexes into the offered options.
pub trait Terminal {
    fn confirm(&mut self, prompt: &Prompt, default: bool) -> Result<bool, InputError>;
    fn select(
        &mut self,
        prompt: &Prompt,
        options: &[String],
        default: usize,
    ) -> Result<usize, InputError>;
    fn multi_select(&mut self, prompt: &Prompt, options: &[String])
    -> Result<Vec<usize>, InputError>;
    fn input(&mut self, prompt: &Prompt, suggestion: Option<&str>) -> Result<String, InputError>;
    /// Print an informational line. Used in both modes.
    fn say(&mut self, text: &str);
}

/// Validation shared by both modes for one decision point.
#[derive(Debug, Clone)]
pub enum Rule {
    Any,
    /// Non-empty after trimming.
    Required,
    OneOf(Vec<String>),
    NoneOf(Vec<String>),
    /// Comma-separated list; every entry must be one of the options.
    ListOf(Vec<String>),
    /// `-1` disables, anything else must be at least `floor`.
    DurationThreshold { floor: i64 },
    Satisfies(fn(&str) -> Result<(), String>),
}

impl Rule {
    pub fn one_of(options: &[&str]) -> Self {
        Rule::OneOf(options.iter().map(|o| o.to_string()).collect())
    }

    pub fn none_of(forbidden: &[&str]) -> Self {
        Rule::NoneOf(forbidden.iter().map(|o| o.to_string()).collect())
    }

    fn check_str(&self, value: &str) -> Result<(), String> {
        match self {
            Rule::Any => Ok(()),
            Rule::Required => {
                if value.trim().is_empty() {
                    Err("value must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            Rule::OneOf(options) => {
                if options.iter().any(|o| o == value) {
                    Ok(())
                } else {
                    Err(format!(
                        "unsupported value {:?}; expected one of {}",
                        value,
                        options.join(", ")
                    ))
                }
            }
            Rule::NoneOf(forbidden) => {
                if forbidden.iter().any(|o| o == value) {
                    Err(format!("value {:?} is not supported", value))
                } else {
                    Ok(())
                }
            }
            Rule::ListOf(options) => {
                for entry in value.split(',').map(str::trim) {
                    if entry.is_empty() {
                        return Err("list entries must not be empty".to_string());
                    }
                    if !options.iter().any(|o| o == entry) {
                        return Err(format!("{:?} is not one of {}", entry, options.join(", ")));
                    }
                }
                Ok(())
            }
            Rule::DurationThreshold { floor } => match value.trim().parse::<i64>() {
                Ok(n) => Self::check_threshold(n, *floor),
                Err(_) => Err(format!("{:?} is not a whole number", value)),
            },
            Rule::Satisfies(check) => check(value),
        }
    }

    fn check_threshold(value: i64, floor: i64) -> Result<(), String> {
        if value == -1 || value >= floor {
            Ok(())
        } else {
            Err(format!(
                "value must be either -1 to disable or {} or greater",
                floor
            ))
        }
    }
}

/// A value type a [`Rule`] can validate.
pub trait RuleValue: Clone {
    fn validate(&self, rule: &Rule) -> Result<(), String>;
}

impl RuleValue for String {
    fn validate(&self, rule: &Rule) -> Result<(), String> {
        rule.check_str(self)
    }
}

impl RuleValue for i64 {
    fn validate(&self, rule: &Rule) -> Result<(), String> {
        match rule {
            Rule::DurationThreshold { floor } => Rule::check_threshold(*self, *floor),
            other => other.check_str(&self.to_string()),
        }
    }
}

impl RuleValue for bool {
    fn validate(&self, _rule: &Rule) -> Result<(), String> {
        Ok(())
    }
}

/// Resolves decision points according to the run's [`ExecutionMode`].
pub struct InputResolver {
    mode: ExecutionMode,
    inputs: SetupInputs,
    terminal: Box<dyn Terminal>,
}

impl InputResolver {
    pub fn new(mode: ExecutionMode, inputs: SetupInputs, terminal: Box<dyn Terminal>) -> Self {
        Self {
            mode,
            inputs,
            terminal,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// The inputs bag, including interactively back-filled answers.
    pub fn inputs(&self) -> &SetupInputs {
        &self.inputs
    }

    /// Pin a field before the run starts (command-line overrides).
    pub fn preset<T>(&mut self, field: Field<T>, value: T) {
        field.write(&mut self.inputs, value);
    }

    pub fn say(&mut self, text: &str) {
        self.terminal.say(text);
    }

    /// Resolve one decision point.
    ///
    /// `ask` runs only in interactive mode and may issue several prompts; its
    /// result is validated with `rule` and re-asked until it passes.
    pub fn resolve<T: RuleValue>(
        &mut self,
        field: Field<T>,
        rule: &Rule,
        mut ask: impl FnMut(&mut dyn Terminal) -> Result<T, InputError>,
    ) -> Result<T, InputError> {
        let value = self.resolve_or_decline(field, rule, |term| ask(term).map(Some))?;
        value.ok_or_else(|| {
            InputError::Conflict(format!("no value was given for {}", field.key()))
        })
    }

    /// Like [`Self::resolve`], but the prompt flow may decline by returning
    /// `None`. Scripted values are always validated; only an operator can
    /// decline.
    pub fn resolve_or_decline<T: RuleValue>(
        &mut self,
        field: Field<T>,
        rule: &Rule,
        mut ask: impl FnMut(&mut dyn Terminal) -> Result<Option<T>, InputError>,
    ) -> Result<Option<T>, InputError> {
        match self.mode {
            ExecutionMode::Scripted => {
                let value = field
                    .read(&self.inputs)
                    .ok_or(InputError::Missing { field: field.key() })?;
                value
                    .validate(rule)
                    .map_err(|reason| InputError::Invalid {
                        field: field.key(),
                        reason,
                    })?;
                Ok(Some(value))
            }
            ExecutionMode::Interactive => loop {
                // Presets and earlier answers are already resolved.
                if let Some(value) = field.read(&self.inputs)
                    && value.validate(rule).is_ok()
                {
                    return Ok(Some(value));
                }
                let Some(value) = ask(self.terminal.as_mut())? else {
                    return Ok(None);
                };
                match value.validate(rule) {
                    Ok(()) => {
                        if field.is_shared() {
                            field.write(&mut self.inputs, value.clone());
                        }
                        return Ok(Some(value));
                    }
                    Err(reason) => self.terminal.say(&format!("{}; please try again", reason)),
                }
            },
        }
    }

    /// Ask the operator whether to go on. Scripted runs always proceed.
    pub fn proceed(&mut self, prompt: Prompt, default: bool) -> Result<(), InputError> {
        match self.mode {
            ExecutionMode::Scripted => Ok(()),
            ExecutionMode::Interactive => {
                if self.terminal.confirm(&prompt, default)? {
                    Ok(())
                } else {
                    Err(InputError::Aborted)
                }
            }
        }
    }

    /// Yes/no decision.
    pub fn confirm(
        &mut self,
        field: Field<bool>,
        prompt: Prompt,
        default: bool,
    ) -> Result<bool, InputError> {
        self.resolve(field, &Rule::Any, |term| term.confirm(&prompt, default))
    }

    /// Free-text decision, optionally pre-filled with a suggestion.
    pub fn text(
        &mut self,
        field: Field<String>,
        prompt: Prompt,
        suggestion: Option<&str>,
        rule: Rule,
    ) -> Result<String, InputError> {
        self.resolve(field, &rule, |term| {
            term.input(&prompt, suggestion).map(|s| s.trim().to_string())
        })
    }

    /// Whole-number decision; non-numeric answers are re-asked.
    pub fn integer(
        &mut self,
        field: Field<i64>,
        prompt: Prompt,
        rule: Rule,
    ) -> Result<i64, InputError> {
        self.resolve(field, &rule, |term| loop {
            let answer = term.input(&prompt, None)?;
            match answer.trim().parse::<i64>() {
                Ok(n) => return Ok(n),
                Err(_) => term.say(&format!("{:?} is not a whole number; please try again", answer)),
            }
        })
    }

    /// Pick one of a fixed list of string options.
    pub fn choose(
        &mut self,
        field: Field<String>,
        prompt: Prompt,
        options: &[&str],
        default: usize,
    ) -> Result<String, InputError> {
        let labels: Vec<String> = options.iter().map(|o| o.to_string()).collect();
        self.resolve(field, &Rule::one_of(options), |term| {
            let index = term.select(&prompt, &labels, default)?;
            labels
                .get(index)
                .cloned()
                .ok_or(InputError::SelectionOutOfRange {
                    index,
                    len: labels.len(),
                })
        })
    }

    /// Pick one typed value from labelled candidates.
    ///
    /// In scripted mode the field's value must equal one of the candidates.
    pub fn choose_value<T>(
        &mut self,
        field: Field<T>,
        prompt: Prompt,
        candidates: &[(String, T)],
    ) -> Result<T, InputError>
    where
        T: RuleValue + PartialEq + std::fmt::Display,
    {
        let labels: Vec<String> = candidates.iter().map(|(label, _)| label.clone()).collect();
        let value = self.resolve(field, &Rule::Any, |term| {
            let index = term.select(&prompt, &labels, 0)?;
            candidates
                .get(index)
                .map(|(_, value)| value.clone())
                .ok_or(InputError::SelectionOutOfRange {
                    index,
                    len: candidates.len(),
                })
        })?;
        if candidates.iter().any(|(_, c)| *c == value) {
            Ok(value)
        } else {
            let known: Vec<String> = candidates.iter().map(|(_, c)| c.to_string()).collect();
            Err(InputError::Invalid {
                field: field.key(),
                reason: format!("{} is not one of {}", value, known.join(", ")),
            })
        }
    }
}
