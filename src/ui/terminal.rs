use console::style;
use dialoguer::{Confirm, Input, MultiSelect, Select, theme::ColorfulTheme};
use indicatif::ProgressBar;

use crate::errors::InputError;
use crate::resolver::{Prompt, Terminal};

/// [`Terminal`] backed by `dialoguer` prompts on the controlling terminal.
///
/// When a progress spinner is attached, it is suspended for the duration of
/// every prompt so the two do not draw over each other.
pub struct ConsoleTerminal {
    theme: ColorfulTheme,
    spinner: Option<ProgressBar>,
}

impl ConsoleTerminal {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
            spinner: None,
        }
    }

    pub fn with_spinner(mut self, spinner: ProgressBar) -> Self {
        self.spinner = Some(spinner);
        self
    }

    fn suspended<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.spinner {
            Some(spinner) => spinner.suspend(f),
            None => f(),
        }
    }

    fn show_help(&self, prompt: &Prompt) {
        if let Some(help) = &prompt.help {
            eprintln!("  {}", style(help).dim());
        }
    }
}

impl Default for ConsoleTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal for ConsoleTerminal {
    fn confirm(&mut self, prompt: &Prompt, default: bool) -> Result<bool, InputError> {
        self.suspended(|| {
            self.show_help(prompt);
            Confirm::with_theme(&self.theme)
                .with_prompt(&prompt.message)
                .default(default)
                .interact()
                .map_err(InputError::from)
        })
    }

    fn select(
        &mut self,
        prompt: &Prompt,
        options: &[String],
        default: usize,
    ) -> Result<usize, InputError> {
        self.suspended(|| {
            self.show_help(prompt);
            Select::with_theme(&self.theme)
                .with_prompt(&prompt.message)
                .items(options)
                .default(default)
                .interact()
                .map_err(InputError::from)
        })
    }

    fn multi_select(
        &mut self,
        prompt: &Prompt,
        options: &[String],
    ) -> Result<Vec<usize>, InputError> {
        self.suspended(|| {
            self.show_help(prompt);
            MultiSelect::with_theme(&self.theme)
                .with_prompt(&prompt.message)
                .items(options)
                .interact()
                .map_err(InputError::from)
        })
    }

    fn input(&mut self, prompt: &Prompt, suggestion: Option<&str>) -> Result<String, InputError> {
        self.suspended(|| {
            self.show_help(prompt);
            let mut input = Input::<String>::with_theme(&self.theme)
                .with_prompt(&prompt.message)
                .allow_empty(true);
            if let Some(suggestion) = suggestion {
                input = input.with_initial_text(suggestion);
            }
            input.interact_text().map_err(InputError::from)
        })
    }

    fn say(&mut self, text: &str) {
        self.suspended(|| {
            for line in textwrap::wrap(text, 78) {
                eprintln!("{}", line);
            }
        });
    }
}
