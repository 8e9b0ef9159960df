//! Host platform, collector config and API key.

use crate::collector_config::{CollectorConfig, Section};
use crate::errors::ActionError;
use crate::host::PlatformInfo;
use crate::inputs::fields;
use crate::resolver::{Prompt, Rule};
use crate::state::SetupState;
use crate::step::{Step, StepKind};

pub const DETERMINE_PLATFORM: Step = Step::check_only(
    "determine_platform",
    StepKind::Baseline,
    "Check whether this platform is supported by guided setup",
    determine_platform,
);

pub const LOAD_CONFIG: Step = Step::check_only(
    "load_config",
    StepKind::Baseline,
    "Load the collector config file",
    load_config,
);

pub const SAVE_API_KEY: Step = Step::new(
    "save_api_key",
    StepKind::Baseline,
    "Add the pganalyze API key (api_key) to the collector config file",
    has_api_key,
    save_api_key,
);

/// Oldest supported release per distribution: id, display name, version.
const MINIMUM_VERSIONS: &[(&str, &str, (u32, u32))] =
    &[("ubuntu", "Ubuntu", (20, 4)), ("debian", "Debian", (10, 0))];

fn determine_platform(state: &mut SetupState) -> Result<bool, ActionError> {
    let info = state.host.platform()?;
    tracing::debug!(
        os = %info.os,
        id = %info.id,
        version = %info.version,
        "detected platform"
    );
    let supported = check_supported(&info);
    state.platform = Some(info);
    supported.map(|()| true)
}

fn check_supported(info: &PlatformInfo) -> Result<(), ActionError> {
    let Some((id, name, minimum)) = MINIMUM_VERSIONS.iter().find(|(id, _, _)| *id == info.id)
    else {
        let platform = if info.id.is_empty() { &info.os } else { &info.id };
        return Err(ActionError::Unsupported(format!(
            "the current platform ({}) is not currently supported",
            platform
        )));
    };

    let version = info.version_tuple().ok_or_else(|| {
        ActionError::Unsupported(format!(
            "could not parse current platform version: {} / version {}",
            id, info.version
        ))
    })?;
    if version < *minimum {
        let (major, minor) = minimum;
        let minimum = if *minor == 0 {
            major.to_string()
        } else {
            format!("{}.{:02}", major, minor)
        };
        return Err(ActionError::Unsupported(format!(
            "{} versions older than {} are not supported",
            name, minimum
        )));
    }
    Ok(())
}

fn load_config(state: &mut SetupState) -> Result<bool, ActionError> {
    let config = CollectorConfig::load(&state.settings.collector_config)?;
    tracing::debug!(server = config.server_name(), "loaded collector config");
    state.set_config(config);
    Ok(true)
}

fn has_api_key(state: &mut SetupState) -> Result<bool, ActionError> {
    Ok(state.config()?.has_key(Section::Global, "api_key"))
}

fn save_api_key(state: &mut SetupState) -> Result<(), ActionError> {
    let from_env = state.settings.api_key_from_env.clone();
    let api_key = state.resolver.text(
        fields::API_KEY,
        Prompt::new("Please enter API key (will be saved to collector config):").with_help(
            "The key can be found on the API keys page for your organization in the pganalyze app",
        ),
        from_env.as_deref(),
        Rule::Required,
    )?;
    let api_base_url = state.inputs().settings.api_base_url.clone();

    let config = state.config_mut()?;
    config.new_key(Section::Global, "api_key", &api_key);
    if let Some(url) = api_base_url.filter(|u| !u.is_empty()) {
        config.new_key(Section::Global, "api_base_url", &url);
    }
    state.save_config()
}
