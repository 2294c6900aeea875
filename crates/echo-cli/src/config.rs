//! Effective configuration: TOML file, then flags and environment.

use std::path::Path;

use anyhow::Context;
use echo_voice::VoiceConfig;

use crate::cli::Cli;

/// Load the config file named on the command line (if any) and apply the
/// flag/environment overrides on top.
pub fn load(cli: &Cli) -> anyhow::Result<VoiceConfig> {
    let mut config = match &cli.config {
        Some(path) => from_file(path)?,
        None => VoiceConfig::default(),
    };
    apply_overrides(&mut config, cli);
    Ok(config)
}

pub fn from_file(path: &Path) -> anyhow::Result<VoiceConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))
}

fn apply_overrides(config: &mut VoiceConfig, cli: &Cli) {
    if let Some(key) = &cli.api_key {
        config.model.api_key = Some(key.clone());
    }
    if let Some(model) = &cli.model {
        config.model.model.clone_from(model);
    }
    if let Some(url) = &cli.model_url {
        config.model.endpoint.clone_from(url);
    }
    if let Some(url) = &cli.tts_url {
        config.synthesis.endpoint.clone_from(url);
    }
    if let Some(language) = &cli.language {
        config.endpointer.language.clone_from(language);
    }
}
