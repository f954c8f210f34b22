//! CLI error types with miette diagnostics.
//!
//! Maps `nest_api::Error` and `nest_config::ConfigError` into user-facing
//! errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use nest_api::ErrorKind;
use nest_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the Nest API")]
    #[diagnostic(
        code(nest::connection_failed),
        help(
            "Check network access and the API URL.\n\
             Override it with --api-url or NEST_API_URL."
        )
    )]
    ConnectionFailed {
        #[source]
        source: nest_api::Error,
    },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(nest::auth_failed),
        help("The access token was rejected. Obtain a new one and pass it via --token or NEST_TOKEN.")
    )]
    AuthFailed { message: String },

    #[error("No access token configured for profile '{profile}'")]
    #[diagnostic(
        code(nest::no_credentials),
        help(
            "Set NEST_TOKEN, pass --token, or run:\n\
             nest config init --token <TOKEN> --keyring"
        )
    )]
    NoCredentials { profile: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}{}", status_suffix(.status.as_deref()))]
    #[diagnostic(code(nest::api_error))]
    ApiError {
        code: String,
        message: String,
        status: Option<String>,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(nest::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(nest::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: nest config init --profile {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(nest::config_exists), help("Pass --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(nest::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render {format} output: {reason}")]
    #[diagnostic(code(nest::render))]
    Render { format: &'static str, reason: String },
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::ConfigExists { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

fn status_suffix(status: Option<&str>) -> String {
    status.map(|s| format!(" [HTTP {s}]")).unwrap_or_default()
}

// ── nest_api::Error → CliError mapping ───────────────────────────────

impl From<nest_api::Error> for CliError {
    fn from(err: nest_api::Error) -> Self {
        if err.is_validation() {
            return Self::Validation {
                field: "input".into(),
                reason: err.description().to_owned(),
            };
        }
        if err.is_transport() {
            return Self::ConnectionFailed { source: err };
        }

        let auth_status = matches!(err.status_code(), Some(401 | 403));
        let auth_kind = matches!(
            err.kind(),
            ErrorKind::Remote(kind) if kind.contains("unauthorized") || kind.contains("auth")
        );
        if auth_status || auth_kind {
            return Self::AuthFailed {
                message: err.description().to_owned(),
            };
        }

        Self::ApiError {
            code: err.kind().as_str().to_owned(),
            message: err.description().to_owned(),
            status: err.status_line(),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::UnknownProfile { name } => Self::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_usage_errors() {
        let err = CliError::from(nest_api::Error::api(
            "Temperature must be between 9 and 32 Celsius",
        ));
        assert!(matches!(err, CliError::Validation { .. }));
        assert_eq!(err.exit_code(), exit_code::USAGE);

        let err = CliError::from(nest_api::Error::eta("The end time must be greater than the begin time"));
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn remote_unauthorized_is_auth_failure() {
        let err = CliError::from(nest_api::Error::new(
            ErrorKind::Remote("unauthorized".into()),
            "authorization code expired",
        ));
        assert!(matches!(err, CliError::AuthFailed { ref message } if message == "authorization code expired"));
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn config_errors_map_to_cli_variants() {
        let err = CliError::from(ConfigError::NoCredentials {
            profile: "cabin".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);

        let err = CliError::from(ConfigError::UnknownProfile { name: "work".into() });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
