//! Shared configuration for Nest tools.
//!
//! TOML profiles, token resolution (env + keyring + plaintext),
//! and translation to `nest_api::ClientConfig` / `nest_api::ReconnectConfig`.
//! The CLI layers its flag overrides on top of these.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use nest_api::{ClientConfig, DEFAULT_API_URL, ReconnectConfig, TlsMode, TransportConfig};

/// Environment variable consulted for the token after a profile's `token_env`.
pub const TOKEN_ENV: &str = "NEST_TOKEN";

const KEYRING_SERVICE: &str = "nest";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no token configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found in config")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Pick the active profile: `name`, else `default_profile`, else `"default"`.
    ///
    /// A missing `"default"` profile resolves to [`Profile::default`] so a
    /// bare `NEST_TOKEN` is enough to talk to the production API. Any other
    /// missing name is an error.
    pub fn resolve_profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile.clone())),
            None if name == "default" => Ok((name, Profile::default())),
            None => Err(ConfigError::UnknownProfile { name }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Total request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// TCP/TLS connect timeout, seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}

/// A named account profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// API root (e.g., "https://developer-api.nest.com").
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Access token (plaintext; prefer keyring or env var).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable name containing the token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Path to a PEM CA certificate to trust in addition to the system roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Override the request timeout, seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_initial_delay_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_max_delay_secs: Option<u64>,

    /// Give up on the event stream after this many consecutive failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_max_retries: Option<u32>,

    /// Reconnect when the event stream is silent this long. `0` disables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            token_env: None,
            ca_cert: None,
            timeout: None,
            reconnect_initial_delay_ms: None,
            reconnect_max_delay_secs: None,
            reconnect_max_retries: None,
            idle_timeout_secs: None,
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "nest", "nest").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("nest");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// Environment keys use `NEST_` and `__` as the nesting separator,
/// e.g. `NEST_DEFAULTS__TIMEOUT=60` or `NEST_DEFAULT_PROFILE=work`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NEST_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file is missing or unreadable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unreadable config");
        Config::default()
    })
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

/// Serialize config to TOML and write it to `path`, creating parent dirs.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve the access token from the credential chain (no CLI flag step).
///
/// Order: the profile's `token_env` variable, `NEST_TOKEN`, the system
/// keyring entry `nest` / `<profile>/token`, then the plaintext `token`.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_token_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        keyring_token,
    )
}

fn keyring_token(profile_name: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .and_then(|entry| entry.get_password())
        .ok()
}

fn resolve_token_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    let from_env = profile
        .token_env
        .as_deref()
        .and_then(&env)
        .or_else(|| env(TOKEN_ENV));
    if let Some(token) = from_env.filter(|t| !t.is_empty()) {
        return Ok(SecretString::from(token));
    }

    if let Some(token) = keyring(profile_name) {
        return Ok(SecretString::from(token));
    }

    if let Some(ref token) = profile.token {
        return Ok(SecretString::from(token.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a token in the system keyring for `profile_name`.
pub fn store_token(profile_name: &str, token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token"))
        .and_then(|entry| entry.set_password(token))
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation to nest_api ─────────────────────────────────────────

/// Parse and check a profile's `api_url`.
pub fn parse_api_url(raw: &str) -> Result<url::Url, ConfigError> {
    let url: url::Url = raw.parse().map_err(|_| ConfigError::Validation {
        field: "api_url".into(),
        reason: format!("invalid URL: {raw}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "api_url".into(),
            reason: format!("expected an http(s) URL, got {raw}"),
        });
    }
    Ok(url)
}

/// Build a `ClientConfig` from a profile; no CLI flag overrides.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let token = resolve_token(profile, profile_name)?;
    client_config_with_token(profile, defaults, token)
}

/// Build a `ClientConfig` from a profile with an already-resolved token.
pub fn client_config_with_token(
    profile: &Profile,
    defaults: &Defaults,
    token: SecretString,
) -> Result<ClientConfig, ConfigError> {
    let api_url = parse_api_url(&profile.api_url)?;

    let tls = profile
        .ca_cert
        .as_ref()
        .map_or(TlsMode::System, |path| TlsMode::CustomCa(path.clone()));

    let transport = TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        connect_timeout: Duration::from_secs(defaults.connect_timeout),
        ..TransportConfig::default()
    };

    Ok(ClientConfig {
        api_url,
        token,
        transport,
    })
}

/// Build the event-stream `ReconnectConfig` from a profile.
pub fn profile_reconnect_config(profile: &Profile) -> ReconnectConfig {
    let base = ReconnectConfig::default();
    ReconnectConfig {
        initial_delay: profile
            .reconnect_initial_delay_ms
            .map_or(base.initial_delay, Duration::from_millis),
        max_delay: profile
            .reconnect_max_delay_secs
            .map_or(base.max_delay, Duration::from_secs),
        max_retries: profile.reconnect_max_retries.or(base.max_retries),
        idle_timeout: match profile.idle_timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => base.idle_timeout,
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_profile.as_deref(), Some("default"));
        assert_eq!(cfg.defaults.timeout, 30);
        assert!(cfg.profiles.is_empty());
    }

    #[test]
    fn loads_profiles_from_toml() {
        let (_dir, path) = write_config(
            r#"
default_profile = "cabin"

[defaults]
timeout = 45

[profiles.cabin]
token_env = "CABIN_NEST_TOKEN"
reconnect_max_retries = 5
idle_timeout_secs = 0

[profiles.home]
api_url = "https://example.test"
token = "c.plain"
"#,
        );

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.defaults.timeout, 45);
        assert_eq!(cfg.defaults.connect_timeout, 10);

        let (name, cabin) = cfg.resolve_profile(None).unwrap();
        assert_eq!(name, "cabin");
        assert_eq!(cabin.api_url, DEFAULT_API_URL);
        assert_eq!(cabin.token_env.as_deref(), Some("CABIN_NEST_TOKEN"));

        let reconnect = profile_reconnect_config(&cabin);
        assert_eq!(reconnect.max_retries, Some(5));
        assert_eq!(reconnect.idle_timeout, None);
        assert_eq!(reconnect.initial_delay, Duration::from_secs(1));

        let (_, home) = cfg.resolve_profile(Some("home")).unwrap();
        assert_eq!(home.token.as_deref(), Some("c.plain"));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.resolve_profile(Some("work")),
            Err(ConfigError::UnknownProfile { name }) if name == "work"
        ));
        let (name, profile) = cfg.resolve_profile(None).unwrap();
        assert_eq!(name, "default");
        assert_eq!(profile.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert(
            "default".into(),
            Profile {
                token_env: Some("MY_TOKEN".into()),
                timeout: Some(5),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let profile = &loaded.profiles["default"];
        assert_eq!(profile.token_env.as_deref(), Some("MY_TOKEN"));
        assert_eq!(profile.timeout, Some(5));
        assert!(profile.token.is_none());
    }

    #[test]
    fn token_chain_order() {
        let profile = Profile {
            token: Some("plaintext".into()),
            token_env: Some("PROFILE_VAR".into()),
            ..Profile::default()
        };
        let env = |name: &str| match name {
            "PROFILE_VAR" => Some("from-profile-var".to_owned()),
            TOKEN_ENV => Some("from-nest-token".to_owned()),
            _ => None,
        };
        let keyring = |_: &str| Some("from-keyring".to_owned());

        let token = resolve_token_with(&profile, "p", env, keyring).unwrap();
        assert_eq!(token.expose_secret(), "from-profile-var");

        let only_global = |name: &str| (name == TOKEN_ENV).then(|| "from-nest-token".to_owned());
        let token = resolve_token_with(&profile, "p", only_global, keyring).unwrap();
        assert_eq!(token.expose_secret(), "from-nest-token");

        let token = resolve_token_with(&profile, "p", no_env, keyring).unwrap();
        assert_eq!(token.expose_secret(), "from-keyring");

        let token = resolve_token_with(&profile, "p", no_env, |_| None).unwrap();
        assert_eq!(token.expose_secret(), "plaintext");
    }

    #[test]
    fn missing_token_names_profile() {
        let err = resolve_token_with(&Profile::default(), "cabin", no_env, |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref profile } if profile == "cabin"));
    }

    #[test]
    fn rejects_non_http_api_url() {
        assert!(parse_api_url("https://developer-api.nest.com").is_ok());
        assert!(matches!(
            parse_api_url("ftp://example.test"),
            Err(ConfigError::Validation { .. })
        ));
        assert!(parse_api_url("not a url").is_err());
    }

    #[test]
    fn client_config_applies_timeouts_and_ca() {
        let profile = Profile {
            token: Some("c.tok".into()),
            token_env: Some("NEST_CONFIG_TEST_UNSET_VARIABLE".into()),
            ca_cert: Some(PathBuf::from("/etc/nest/ca.pem")),
            timeout: Some(12),
            ..Profile::default()
        };
        // NEST_TOKEN or a keyring entry on the host may win over the
        // plaintext token, so only the non-credential fields are checked.
        let Ok(config) = profile_to_client_config(&profile, "test", &Defaults::default()) else {
            panic!("profile with a plaintext token must resolve");
        };
        assert_eq!(config.api_url.as_str(), "https://developer-api.nest.com/");
        assert_eq!(config.transport.timeout, Duration::from_secs(12));
        assert_eq!(config.transport.connect_timeout, Duration::from_secs(10));
        assert!(matches!(config.transport.tls, TlsMode::CustomCa(ref p) if p.ends_with("ca.pem")));
    }
}
