//! Command dispatch for everything that talks to the API.

pub mod config_cmd;
pub mod structures;
pub mod thermostats;
pub mod watch;

use nest_api::NestClient;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Route an API-backed command to its handler.
pub async fn dispatch(cmd: Command, resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    tracing::info!(profile = %resolved.profile_name, "using profile");
    let client = NestClient::new(resolved.client)?;

    match cmd {
        Command::Structures => structures::list(&client, global).await,
        Command::Structure(args) => structures::handle(&client, args, global).await,
        Command::Thermostats => thermostats::list(&client, global).await,
        Command::Thermostat(args) => thermostats::handle(&client, args, global).await,
        Command::Watch(args) => watch::handle(&client, args, resolved.reconnect, global).await,
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

/// Sort a keyed collection by key for stable output.
pub(crate) fn sorted<T>(map: std::collections::HashMap<String, T>) -> Vec<T> {
    let mut entries: Vec<(String, T)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().map(|(_, v)| v).collect()
}
