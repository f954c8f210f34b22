use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// ── ErrorKind ───────────────────────────────────────────────────────

/// Machine-readable category of an [`Error`].
///
/// `as_str()` yields the stable kind strings callers match on
/// (`"api_error"`, `"http_error"`, ...). [`ErrorKind::Remote`] carries
/// whatever kind the server reported on the collection-fetch path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local validation failure (no request sent), or a rejected PUT.
    Api,
    /// Transport failure on a PUT.
    Http,
    /// Transport failure on a collection fetch or stream open.
    Devices,
    /// The response body could not be read.
    BodyRead,
    /// Local ETA validation failure (no request sent).
    Eta,
    /// A successful collection body could not be decoded.
    Decode,
    /// Error kind reported verbatim by the server.
    Remote(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Api => "api_error",
            Self::Http => "http_error",
            Self::Devices => "devices_error",
            Self::BodyRead => "body_read_error",
            Self::Eta => "eta_error",
            Self::Decode => "decode_error",
            Self::Remote(kind) => kind,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Error ───────────────────────────────────────────────────────────

/// Error returned by every fallible operation in `nest-api`.
///
/// One uniform value: a [`kind`](Self::kind), a human description, and
/// the HTTP status when a response was actually received.
#[derive(Debug, Error)]
#[error("{kind}: {description}")]
pub struct Error {
    kind: ErrorKind,
    description: String,
    status: Option<StatusCode>,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            status: None,
            source: None,
        }
    }

    /// Local validation failure.
    pub fn api(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, description)
    }

    pub fn eta(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Eta, description)
    }

    pub(crate) fn http(err: reqwest::Error) -> Self {
        Self::new(ErrorKind::Http, err.to_string()).with_source(err)
    }

    pub(crate) fn devices(err: reqwest::Error) -> Self {
        Self::new(ErrorKind::Devices, err.to_string()).with_source(err)
    }

    pub(crate) fn body_read(err: reqwest::Error) -> Self {
        Self::new(ErrorKind::BodyRead, err.to_string()).with_source(err)
    }

    pub(crate) fn decode(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Decode, err.to_string()).with_source(err)
    }

    pub(crate) fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Numeric HTTP status, when a response was received.
    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|s| s.as_u16())
    }

    /// Status line such as `"400 Bad Request"`, when a response was received.
    pub fn status_line(&self) -> Option<String> {
        self.status.map(|s| match s.canonical_reason() {
            Some(reason) => format!("{} {reason}", s.as_str()),
            None => s.as_str().to_owned(),
        })
    }

    /// Returns `true` if this error was raised locally before any request.
    pub fn is_validation(&self) -> bool {
        matches!(self.kind, ErrorKind::Eta) || (self.kind == ErrorKind::Api && self.status.is_none())
    }

    /// Returns `true` if the request never produced a response.
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Http | ErrorKind::Devices)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

// ── Remote error body ───────────────────────────────────────────────

/// Error body returned by the API on non-200 responses:
/// `{ "error": "...", "error_description": "..." }`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RemoteError {
    #[serde(default)]
    pub error: String,
    #[serde(default, alias = "message")]
    pub error_description: String,
}

impl RemoteError {
    /// Lenient parse: an unreadable body yields an empty record.
    pub(crate) fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings() {
        assert_eq!(ErrorKind::Api.as_str(), "api_error");
        assert_eq!(ErrorKind::Http.as_str(), "http_error");
        assert_eq!(ErrorKind::Devices.as_str(), "devices_error");
        assert_eq!(ErrorKind::BodyRead.as_str(), "body_read_error");
        assert_eq!(ErrorKind::Eta.as_str(), "eta_error");
        assert_eq!(ErrorKind::Remote("blocked".into()).as_str(), "blocked");
    }

    #[test]
    fn status_line_includes_reason() {
        let err = Error::api("Invalid content sent").with_status(StatusCode::BAD_REQUEST);
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(err.status_line().as_deref(), Some("400 Bad Request"));
        assert!(!err.is_validation());
    }

    #[test]
    fn display_joins_kind_and_description() {
        let err = Error::eta("The end time must be greater than the begin time");
        assert_eq!(
            err.to_string(),
            "eta_error: The end time must be greater than the begin time"
        );
        assert!(err.is_validation());
        assert!(err.status_line().is_none());
    }

    #[test]
    fn remote_error_accepts_message_alias() {
        let remote = RemoteError::parse(r#"{"error":"forbidden","message":"No write permission"}"#);
        assert_eq!(remote.error, "forbidden");
        assert_eq!(remote.error_description, "No write permission");

        let garbage = RemoteError::parse("<html>502</html>");
        assert!(garbage.error.is_empty());
    }
}
