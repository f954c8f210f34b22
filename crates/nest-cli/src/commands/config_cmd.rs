//! Config subcommand handlers. None of these contact the API.

use nest_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&nest_config::config_path().display().to_string(), false);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = nest_config::load_config_or_default();
            let (name, profile) = config::active_profile(&cfg, global)?;
            let view = redacted(&name, &profile);
            let out = output::render_single(
                &global.output,
                &view,
                |v| {
                    serde_json::to_value(v)
                        .ok()
                        .and_then(|value| value.as_object().cloned())
                        .map(|fields| {
                            fields
                                .iter()
                                .map(|(k, v)| format!("{k:<28} {v}"))
                                .collect::<Vec<_>>()
                                .join("\n")
                        })
                        .unwrap_or_default()
                },
                |v| v.profile.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init {
            token_env,
            keyring,
            force,
        } => init(global, token_env, keyring, force),
    }
}

fn init(
    global: &GlobalOpts,
    token_env: Option<String>,
    keyring: bool,
    force: bool,
) -> Result<(), CliError> {
    let path = nest_config::config_path();
    if path.exists() && !force {
        return Err(CliError::ConfigExists {
            path: path.display().to_string(),
        });
    }

    let profile_name = global.profile.clone().unwrap_or_else(|| "default".into());

    let mut profile = Profile {
        token_env,
        timeout: global.timeout,
        ..Profile::default()
    };
    if let Some(ref api_url) = global.api_url {
        nest_config::parse_api_url(api_url)?;
        profile.api_url.clone_from(api_url);
    }

    match (global.token.as_deref(), keyring) {
        (Some(token), true) => {
            nest_config::store_token(&profile_name, token)?;
            if !global.quiet {
                eprintln!("Token stored in system keyring");
            }
        }
        (Some(token), false) => profile.token = Some(token.to_owned()),
        (None, true) => {
            return Err(CliError::Validation {
                field: "keyring".into(),
                reason: "--keyring needs a token from --token".into(),
            });
        }
        (None, false) => {}
    }

    let mut cfg = Config {
        default_profile: Some(profile_name.clone()),
        ..Config::default()
    };
    cfg.profiles.insert(profile_name.clone(), profile);

    let written = nest_config::save_config(&cfg)?;
    if !global.quiet {
        eprintln!("Configuration written to {}", written.display());
        eprintln!("Active profile: {profile_name}");
    }
    Ok(())
}

// ── Redacted view ───────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct ProfileView {
    profile: String,
    api_url: String,
    token: &'static str,
    token_env: Option<String>,
    ca_cert: Option<String>,
    timeout: Option<u64>,
    reconnect_max_retries: Option<u32>,
    idle_timeout_secs: Option<u64>,
}

fn redacted(name: &str, profile: &Profile) -> ProfileView {
    ProfileView {
        profile: name.to_owned(),
        api_url: profile.api_url.clone(),
        token: if profile.token.is_some() { "<set>" } else { "<unset>" },
        token_env: profile.token_env.clone(),
        ca_cert: profile.ca_cert.as_ref().map(|p| p.display().to_string()),
        timeout: profile.timeout,
        reconnect_max_retries: profile.reconnect_max_retries,
        idle_timeout_secs: profile.idle_timeout_secs,
    }
}
