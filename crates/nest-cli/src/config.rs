//! CLI-side configuration: apply global flag overrides on top of the
//! active `nest_config` profile and build the library configs.

use secrecy::SecretString;

use nest_api::{ClientConfig, ReconnectConfig};
use nest_config::{Config, ConfigError, Profile};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a command needs to talk to the API.
pub struct Resolved {
    pub profile_name: String,
    pub client: ClientConfig,
    pub reconnect: ReconnectConfig,
}

/// Resolve the active profile and merge CLI overrides (flag > env > profile).
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = nest_config::load_config_or_default();
    resolve_with(&cfg, global)
}

fn resolve_with(cfg: &Config, global: &GlobalOpts) -> Result<Resolved, CliError> {
    let (profile_name, mut profile) = active_profile(cfg, global)?;

    if let Some(ref api_url) = global.api_url {
        profile.api_url.clone_from(api_url);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let client = match global.token {
        Some(ref token) => nest_config::client_config_with_token(
            &profile,
            &cfg.defaults,
            SecretString::from(token.clone()),
        )?,
        None => nest_config::profile_to_client_config(&profile, &profile_name, &cfg.defaults)?,
    };
    let reconnect = nest_config::profile_reconnect_config(&profile);

    tracing::debug!(profile = %profile_name, api_url = %client.api_url, "resolved configuration");

    Ok(Resolved {
        profile_name,
        client,
        reconnect,
    })
}

/// Resolve the active profile name and definition from CLI flags and config.
pub fn active_profile(cfg: &Config, global: &GlobalOpts) -> Result<(String, Profile), CliError> {
    cfg.resolve_profile(global.profile.as_deref())
        .map_err(|err| match err {
            ConfigError::UnknownProfile { name } => {
                let mut available: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
                available.sort_unstable();
                CliError::ProfileNotFound {
                    name,
                    available: if available.is_empty() {
                        "(none)".into()
                    } else {
                        available.join(", ")
                    },
                }
            }
            other => other.into(),
        })
}
