// Nest REST client
//
// Wraps `reqwest::Client` with Nest-specific URL construction
// (`<base>/<collection>/<id>?auth=<token>`), the one-hop 307 redirect
// protocol, and the two response-translation paths (PUT vs collection
// fetch). Resource setters and collection fetches live in `thermostat.rs`
// and `structure.rs` as inherent methods on their types.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, ErrorKind, RemoteError};
use crate::models::{Structure, Thermostat};
use crate::transport::TransportConfig;

/// Production API root.
pub const DEFAULT_API_URL: &str = "https://developer-api.nest.com";

pub(crate) const STRUCTURES_COLLECTION: &[&str] = &["structures.json"];
pub(crate) const DEVICES_COLLECTION: &[&str] = &["devices.json"];
pub(crate) const THERMOSTATS_COLLECTION: &[&str] = &["devices", "thermostats.json"];

/// Everything needed to construct a [`NestClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub token: SecretString,
    pub transport: TransportConfig,
}

impl ClientConfig {
    /// Config against the production API with default transport settings.
    pub fn new(token: SecretString) -> Result<Self, Error> {
        let api_url = Url::parse(DEFAULT_API_URL)
            .map_err(|e| Error::api(format!("invalid API URL: {e}")))?;
        Ok(Self {
            api_url,
            token,
            transport: TransportConfig::default(),
        })
    }
}

/// Handle to the Nest API.
///
/// Cheap to clone: every clone shares one HTTP connection pool and one
/// redirect cache. Resources decoded through this client keep a clone as
/// their back-reference, so a redirect observed by any of them is seen by all.
#[derive(Clone)]
pub struct NestClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    stream_http: reqwest::Client,
    api_url: Url,
    /// Scheme+host learned from a 307 (or the first collection fetch).
    redirect_url: ArcSwapOption<Url>,
    token: SecretString,
}

impl fmt::Debug for NestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestClient")
            .field("api_url", &self.inner.api_url.as_str())
            .field("redirect_url", &self.redirect_url().map(String::from))
            .finish_non_exhaustive()
    }
}

/// A single outbound request, replayable for the redirect retry.
struct RequestSpec<'a> {
    method: Method,
    segments: &'a [&'a str],
    body: Option<Bytes>,
    event_stream: bool,
}

impl<'a> RequestSpec<'a> {
    fn get(segments: &'a [&'a str]) -> Self {
        Self {
            method: Method::GET,
            segments,
            body: None,
            event_stream: false,
        }
    }

    fn put(segments: &'a [&'a str], body: Bytes) -> Self {
        Self {
            method: Method::PUT,
            segments,
            body: Some(body),
            event_stream: false,
        }
    }

    fn stream(segments: &'a [&'a str]) -> Self {
        Self {
            event_stream: true,
            ..Self::get(segments)
        }
    }
}

impl NestClient {
    /// Create a client, building its HTTP clients from `config.transport`.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        check_base(&config.api_url)?;
        let http = config.transport.build_client()?;
        let stream_http = config.transport.build_stream_client()?;
        Ok(Self::from_parts(config.api_url, config.token, http, stream_http))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    ///
    /// The same client serves unary requests and the event stream. It must
    /// not follow redirects itself or 307 handling is bypassed.
    pub fn with_client(
        api_url: Url,
        token: SecretString,
        http: reqwest::Client,
    ) -> Result<Self, Error> {
        check_base(&api_url)?;
        Ok(Self::from_parts(api_url, token, http.clone(), http))
    }

    fn from_parts(
        api_url: Url,
        token: SecretString,
        http: reqwest::Client,
        stream_http: reqwest::Client,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                stream_http,
                api_url,
                redirect_url: ArcSwapOption::empty(),
                token,
            }),
        }
    }

    /// The configured API root.
    pub fn api_url(&self) -> &Url {
        &self.inner.api_url
    }

    /// The cached redirect base URL, if one has been learned.
    pub fn redirect_url(&self) -> Option<Url> {
        self.inner.redirect_url.load_full().map(|url| (*url).clone())
    }

    /// The base every request is built against: redirect URL if cached,
    /// otherwise the API root.
    pub fn base_url(&self) -> Url {
        self.redirect_url()
            .unwrap_or_else(|| self.inner.api_url.clone())
    }

    /// A thermostat handle bound to this client, for calling setters
    /// without fetching first.
    pub fn thermostat(&self, device_id: impl Into<String>) -> Thermostat {
        Thermostat {
            device_id: device_id.into(),
            client: Some(self.clone()),
            ..Thermostat::default()
        }
    }

    /// A structure handle bound to this client.
    pub fn structure(&self, structure_id: impl Into<String>) -> Structure {
        Structure {
            structure_id: structure_id.into(),
            client: Some(self.clone()),
            ..Structure::default()
        }
    }

    /// Learn the redirect base URL ahead of time, if none is cached yet.
    ///
    /// Issues a plain GET for the structures collection and caches the
    /// scheme+host the response was actually served from.
    pub async fn prime_redirect_url(&self) -> Result<(), Error> {
        if self.redirect_url().is_some() {
            return Ok(());
        }
        let resp = self
            .send(&self.inner.http, &RequestSpec::get(STRUCTURES_COLLECTION), Error::devices)
            .await?;
        self.remember_origin(resp.url());
        Ok(())
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/{segments...}?auth={token}`
    fn resource_url(&self, base: &Url, segments: &[&str]) -> Result<Url, Error> {
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| Error::api(format!("cannot build a resource URL from {base}")))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("auth", self.inner.token.expose_secret());
        Ok(url)
    }

    fn store_redirect(&self, origin: Url) {
        info!(redirect_url = %origin, "caching redirect base URL");
        self.inner.redirect_url.store(Some(Arc::new(origin)));
    }

    /// Cache `url`'s scheme+host unless a redirect URL is already known.
    ///
    /// A response served by the configured API host caches the API root
    /// itself so a path prefix on it survives.
    fn remember_origin(&self, url: &Url) {
        if self.inner.redirect_url.load().is_none() {
            self.store_redirect(self.rebase(url));
        }
    }

    /// Base URL for requests that landed on `url`.
    fn rebase(&self, url: &Url) -> Url {
        let api_url = &self.inner.api_url;
        if url.origin() == api_url.origin() {
            api_url.clone()
        } else {
            origin_of(url)
        }
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn dispatch(
        &self,
        http: &reqwest::Client,
        spec: &RequestSpec<'_>,
        url: Url,
    ) -> Result<reqwest::Response, reqwest::Error> {
        debug!(method = %spec.method, path = url.path(), "sending request");

        let mut request = http.request(spec.method.clone(), url);
        if let Some(body) = &spec.body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        if spec.event_stream {
            request = request.header(ACCEPT, "text/event-stream");
        }
        request.send().await
    }

    /// Send a request, following at most one 307.
    ///
    /// On 307 the redirect target's scheme+host replaces the cached base URL
    /// (for every holder of this client) and the request is reissued once.
    /// Whatever the retry returns, including another 307, is handed back.
    async fn send(
        &self,
        http: &reqwest::Client,
        spec: &RequestSpec<'_>,
        on_transport: fn(reqwest::Error) -> Error,
    ) -> Result<reqwest::Response, Error> {
        let url = self.resource_url(&self.base_url(), spec.segments)?;
        let resp = self.dispatch(http, spec, url).await.map_err(on_transport)?;

        if resp.status() != StatusCode::TEMPORARY_REDIRECT {
            return Ok(resp);
        }

        let target = self.rebase(&redirect_target(&resp));
        self.store_redirect(target.clone());
        let url = self.resource_url(&target, spec.segments)?;
        self.dispatch(http, spec, url).await.map_err(on_transport)
    }

    /// PUT a JSON body to a resource and translate the response.
    ///
    /// A 200 body is decoded as `T` only to detect malformed responses; the
    /// decoded value is discarded and a decode failure is logged, not returned.
    pub(crate) async fn put<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &impl Serialize,
    ) -> Result<(), Error> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| Error::api(format!("failed to encode request body: {e}")))?;

        let resp = self
            .send(&self.inner.http, &RequestSpec::put(segments, payload.into()), Error::http)
            .await?;

        let status = resp.status();
        let text = resp.text().await.map_err(Error::body_read)?;

        if status == StatusCode::OK {
            if let Err(e) = serde_json::from_str::<T>(&text) {
                warn!(error = %e, "PUT succeeded but the response body did not decode");
            }
            return Ok(());
        }

        Err(put_error(status, &text))
    }

    /// GET a collection and decode it as `T`.
    pub(crate) async fn fetch<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, Error> {
        let resp = self
            .send(&self.inner.http, &RequestSpec::get(segments), Error::devices)
            .await?;
        self.remember_origin(resp.url());

        let status = resp.status();
        let body = resp.text().await.map_err(Error::body_read)?;

        if status != StatusCode::OK {
            return Err(fetch_error(status, &body));
        }

        serde_json::from_str(&body).map_err(Error::decode)
    }

    /// Open a streaming GET (`Accept: text/event-stream`) on a collection.
    pub(crate) async fn open_stream(&self, segments: &[&str]) -> Result<reqwest::Response, Error> {
        let resp = self
            .send(&self.inner.stream_http, &RequestSpec::stream(segments), Error::devices)
            .await?;
        self.remember_origin(resp.url());

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.map_err(Error::body_read)?;
            return Err(fetch_error(status, &body));
        }
        Ok(resp)
    }
}

// ── Response translation ─────────────────────────────────────────────

/// Failed PUT: the remote `error` string becomes the description of an
/// `api_error`, with the HTTP status attached.
fn put_error(status: StatusCode, body: &str) -> Error {
    let remote = RemoteError::parse(body);
    let description = if remote.error.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_owned()
    } else {
        remote.error
    };
    Error::api(description).with_status(status)
}

/// Failed collection fetch: the remote error is returned as reported,
/// without a status. A body with no error kind (a proxy page, say)
/// becomes an `api_error` carrying the status instead.
fn fetch_error(status: StatusCode, body: &str) -> Error {
    let remote = RemoteError::parse(body);
    let description = if remote.error_description.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_owned()
    } else {
        remote.error_description
    };
    if remote.error.is_empty() {
        return Error::api(description).with_status(status);
    }
    Error::new(ErrorKind::Remote(remote.error), description)
}

// ── URL helpers ──────────────────────────────────────────────────────

/// `scheme://host[:port]` of `url`, with an empty path.
fn origin_of(url: &Url) -> Url {
    let mut origin = url.clone();
    origin.set_path("");
    origin.set_query(None);
    origin.set_fragment(None);
    origin
}

/// Where a 307 points: the `Location` header resolved against the request
/// URL, falling back to the request URL itself.
fn redirect_target(resp: &reqwest::Response) -> Url {
    resp.headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|location| resp.url().join(location).ok())
        .unwrap_or_else(|| resp.url().clone())
}

fn check_base(url: &Url) -> Result<(), Error> {
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        _ => Err(Error::api(format!(
            "API URL must be an absolute http(s) URL, got {url}"
        ))),
    }
}
