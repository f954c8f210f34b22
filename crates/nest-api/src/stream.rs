//! REST streaming (server-sent events) with auto-reconnect.
//!
//! Opens a GET with `Accept: text/event-stream` on a collection, reads the
//! body line by line and hands every decoded `data:` record to a callback.
//! Connection lifecycle is an explicit [`StreamState`] machine driven by a
//! cancellable task, reconnecting with exponential backoff + jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use nest_api::{NestClient, ReconnectConfig};
//!
//! let handle = client.structures_stream(ReconnectConfig::default(), |event| match event {
//!     Ok(structures) => println!("{} structures changed", structures.len()),
//!     Err(e) => eprintln!("stream connect failed: {e}"),
//! });
//!
//! // ...
//! handle.shutdown();
//! handle.join().await;
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{NestClient, STRUCTURES_COLLECTION, THERMOSTATS_COLLECTION};
use crate::error::Error;
use crate::models::{ClientBound, StreamEvent, Structure, Thermostat, bind_all};

const DATA_PREFIX: &str = "data:";

/// Longest unterminated line held before the connection is dropped.
const MAX_LINE_BYTES: usize = 1024 * 1024;

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Backoff and liveness settings for the event stream.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Consecutive failed attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,

    /// Tear the connection down if no bytes arrive for this long.
    /// The service sends keep-alives every 30s. Default: 90s.
    pub idle_timeout: Option<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
            idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

// ── StreamState / StreamHandle ───────────────────────────────────────

/// Lifecycle of a stream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Opening (or re-opening) the HTTP connection, or backing off.
    Connecting,
    /// Connected and reading records.
    Streaming,
    /// Cancelled or out of retries. Terminal.
    Closed,
}

/// Handle to a spawned stream task.
pub struct StreamHandle {
    cancel: CancellationToken,
    state: watch::Receiver<StreamState>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Signal the background task to stop. The open connection is dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the background task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "stream task did not finish cleanly");
        }
    }
}

impl NestClient {
    /// Stream structure changes to `callback` on a background task.
    ///
    /// The callback receives `Ok(structures)` for every record carrying a
    /// structures mapping (each entry bound to this client) and `Err` for
    /// every failed connection attempt. Errors while reading an open
    /// stream are not reported; the stream is simply reopened.
    pub fn structures_stream<F>(&self, reconnect: ReconnectConfig, callback: F) -> StreamHandle
    where
        F: FnMut(Result<HashMap<String, Structure>, Error>) + Send + 'static,
    {
        self.spawn_stream(STRUCTURES_COLLECTION, reconnect, callback)
    }

    /// Stream thermostat changes to `callback` on a background task.
    pub fn thermostats_stream<F>(&self, reconnect: ReconnectConfig, callback: F) -> StreamHandle
    where
        F: FnMut(Result<HashMap<String, Thermostat>, Error>) + Send + 'static,
    {
        self.spawn_stream(THERMOSTATS_COLLECTION, reconnect, callback)
    }

    /// Run the structures stream on the current task until `cancel` fires
    /// (or `reconnect.max_retries` is exhausted).
    pub async fn watch_structures<F>(
        &self,
        reconnect: &ReconnectConfig,
        cancel: &CancellationToken,
        callback: F,
    ) where
        F: FnMut(Result<HashMap<String, Structure>, Error>),
    {
        let (state, _) = watch::channel(StreamState::Connecting);
        self.run_stream(STRUCTURES_COLLECTION, reconnect, cancel, &state, callback)
            .await;
    }

    fn spawn_stream<T, F>(
        &self,
        segments: &'static [&'static str],
        reconnect: ReconnectConfig,
        callback: F,
    ) -> StreamHandle
    where
        T: DeserializeOwned + ClientBound + Send + 'static,
        F: FnMut(Result<HashMap<String, T>, Error>) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(StreamState::Connecting);

        let client = self.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            client
                .run_stream(segments, &reconnect, &task_cancel, &state_tx, callback)
                .await;
        });

        StreamHandle {
            cancel,
            state: state_rx,
            task,
        }
    }

    /// Main loop: prime → connect → read → on failure, backoff → reconnect.
    async fn run_stream<T, F>(
        &self,
        segments: &[&str],
        reconnect: &ReconnectConfig,
        cancel: &CancellationToken,
        state: &watch::Sender<StreamState>,
        mut callback: F,
    ) where
        T: DeserializeOwned + ClientBound,
        F: FnMut(Result<HashMap<String, T>, Error>),
    {
        state.send_replace(StreamState::Connecting);

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                state.send_replace(StreamState::Closed);
                return;
            }
            primed = self.prime_redirect_url() => {
                if let Err(e) = primed {
                    tracing::debug!(error = %e, "could not prime redirect URL");
                }
            }
        }

        let mut attempt: u32 = 0;

        loop {
            state.send_replace(StreamState::Connecting);

            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                opened = self.open_stream(segments) => opened,
            };

            let failed = match opened {
                Ok(resp) => {
                    tracing::info!(path = ?segments, "event stream connected");
                    state.send_replace(StreamState::Streaming);

                    let watched = watch_events(
                        self,
                        resp.bytes_stream(),
                        reconnect.idle_timeout,
                        cancel,
                        &mut callback,
                    )
                    .await;

                    // Only a stream that carried records counts as healthy.
                    if watched.records > 0 {
                        attempt = 0;
                    }

                    match watched.outcome {
                        WatchOutcome::Cancelled => break,
                        WatchOutcome::Ended if watched.records > 0 => {
                            tracing::info!(records = watched.records, "event stream ended, reconnecting");
                            false
                        }
                        WatchOutcome::Ended => {
                            tracing::warn!("event stream closed before any record");
                            true
                        }
                        WatchOutcome::Failed(reason) => {
                            tracing::warn!(%reason, "event stream read failed");
                            true
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "event stream connect failed");
                    callback(Err(e));
                    true
                }
            };

            if failed && reconnect.max_retries.is_some_and(|max| attempt >= max) {
                tracing::error!(attempt, "event stream reconnection limit reached, giving up");
                break;
            }

            state.send_replace(StreamState::Connecting);
            let delay = calculate_backoff(attempt, reconnect);
            tracing::info!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt,
                "waiting before reconnect"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            if failed {
                attempt = attempt.saturating_add(1);
            }
        }

        state.send_replace(StreamState::Closed);
        tracing::debug!("event stream loop exiting");
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum WatchOutcome {
    /// Body ended (EOF).
    Ended,
    /// Read error, idle timeout or oversized line.
    Failed(String),
    Cancelled,
}

/// How a single connection ended and how many `data:` records it carried.
#[derive(Debug)]
struct Watched {
    outcome: WatchOutcome,
    records: usize,
}

/// Read newline-delimited records from `body` until it ends, fails or
/// `cancel` fires, dispatching each `data:` record to `callback`.
async fn watch_events<T, S, E, F>(
    client: &NestClient,
    body: S,
    idle_timeout: Option<Duration>,
    cancel: &CancellationToken,
    callback: &mut F,
) -> Watched
where
    T: DeserializeOwned + ClientBound,
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
    F: FnMut(Result<HashMap<String, T>, Error>),
{
    let mut body = std::pin::pin!(body);
    let mut lines = LineBuffer::default();
    let mut records = 0;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break WatchOutcome::Cancelled,
            next = next_chunk(&mut body, idle_timeout) => next,
        };

        match next {
            Ok(Some(Ok(chunk))) => {
                lines.push(&chunk);
                while let Some(line) = lines.next_line() {
                    if dispatch_line(client, &line, callback) {
                        records += 1;
                    }
                }
                if lines.pending() > MAX_LINE_BYTES {
                    break WatchOutcome::Failed(format!(
                        "line exceeds {MAX_LINE_BYTES} bytes without a terminator"
                    ));
                }
            }
            Ok(Some(Err(e))) => break WatchOutcome::Failed(e.to_string()),
            Ok(None) => break WatchOutcome::Ended,
            Err(idle) => break WatchOutcome::Failed(format!("no data for {idle:?}")),
        }
    };

    Watched { outcome, records }
}

/// Next body chunk, or `Err(idle_timeout)` if none arrives in time.
async fn next_chunk<S>(body: &mut S, idle_timeout: Option<Duration>) -> Result<Option<S::Item>, Duration>
where
    S: Stream + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, body.next())
            .await
            .map_err(|_| limit),
        None => Ok(body.next().await),
    }
}

/// Handle one line; returns whether it was a `data:` record.
fn dispatch_line<T, F>(client: &NestClient, line: &str, callback: &mut F) -> bool
where
    T: DeserializeOwned + ClientBound,
    F: FnMut(Result<HashMap<String, T>, Error>),
{
    let Some(payload) = parse_stream_data(line) else {
        tracing::trace!(line, "ignoring non-data line");
        return false;
    };

    match serde_json::from_str::<StreamEvent<T>>(payload) {
        Ok(StreamEvent {
            data: Some(mut entries),
            ..
        }) => {
            bind_all(&mut entries, client);
            callback(Ok(entries));
        }
        Ok(_) => tracing::trace!("stream record without data"),
        Err(e) => tracing::debug!(error = %e, "skipping undecodable stream record"),
    }
    true
}

/// Extract the payload of a `data:` line, if `line` is one.
///
/// One leading space after the colon is part of the field syntax and
/// removed; an empty payload yields `None`.
pub fn parse_stream_data(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(DATA_PREFIX)?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest).trim_end();
    (!rest.is_empty()).then_some(rest)
}

// ── Line splitting ───────────────────────────────────────────────────

/// Accumulates body chunks and yields complete `\n`-terminated lines.
///
/// A trailing `\r` is stripped. An unterminated tail is held until more
/// bytes arrive and dropped if the body ends first.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes held for an unterminated line.
    fn pending(&self) -> usize {
        self.buf.len()
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 +- 0.25)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();

    Duration::try_from_secs_f64((capped * jitter_factor).max(0.0)).unwrap_or(config.max_delay)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::convert::Infallible;

    use secrecy::SecretString;
    use url::Url;

    use super::*;

    fn client() -> NestClient {
        NestClient::with_client(
            Url::parse("https://developer-api.nest.com").unwrap(),
            SecretString::from("token"),
            reqwest::Client::new(),
        )
        .unwrap()
    }

    fn body(chunks: &[&'static str]) -> impl Stream<Item = Result<Bytes, Infallible>> + use<> {
        let items: Vec<Result<Bytes, Infallible>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        futures_util::stream::iter(items)
    }

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.max_retries.is_none());
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn backoff_increases_then_caps() {
        let config = ReconnectConfig::default();
        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);
        assert!(d1 > d0, "d1 ({d1:?}) should exceed d0 ({d0:?})");
        assert!(d2 > d1, "d2 ({d2:?}) should exceed d1 ({d1:?})");

        let d40 = calculate_backoff(40, &config);
        assert!(d40 <= Duration::from_secs_f64(37.5), "{d40:?}");
    }

    #[test]
    fn data_prefix_parsing() {
        assert_eq!(parse_stream_data(r#"data: {"a":1}"#), Some(r#"{"a":1}"#));
        assert_eq!(parse_stream_data(r#"data:{"a":1}"#), Some(r#"{"a":1}"#));
        assert_eq!(parse_stream_data("data: null  "), Some("null"));
        assert_eq!(parse_stream_data("data: "), None);
        assert_eq!(parse_stream_data("event: keep-alive"), None);
        assert_eq!(parse_stream_data(": comment"), None);
    }

    #[test]
    fn line_buffer_splits_across_chunks() {
        let mut lines = LineBuffer::default();
        lines.push(b"event: put\r\nda");
        assert_eq!(lines.next_line().as_deref(), Some("event: put"));
        assert_eq!(lines.next_line(), None);
        lines.push(b"ta: x\n\n");
        assert_eq!(lines.next_line().as_deref(), Some("data: x"));
        assert_eq!(lines.next_line().as_deref(), Some(""));
        assert_eq!(lines.next_line(), None);
    }

    #[tokio::test]
    async fn one_data_line_invokes_callback_once_with_bound_entries() {
        let client = client();
        let cancel = CancellationToken::new();
        let mut seen: Vec<HashMap<String, Structure>> = Vec::new();

        let Watched { outcome, records } = watch_events(
            &client,
            body(&[
                ": connected\n",
                "event: keep-alive\ndata: null\n\n",
                "event: put\n",
                "data: {\"data\":{\"structure1\":{\"away\":\"home\"}}}\n",
                "\n",
            ]),
            None,
            &cancel,
            &mut |event: Result<HashMap<String, Structure>, Error>| seen.push(event.unwrap()),
        )
        .await;

        assert_eq!(outcome, WatchOutcome::Ended);
        assert_eq!(records, 2);
        assert_eq!(seen.len(), 1);
        let structure = &seen[0]["structure1"];
        assert_eq!(structure.away.as_deref(), Some("home"));
        assert_eq!(structure.structure_id, "structure1");
        assert!(structure.client().is_some());
    }

    #[tokio::test]
    async fn undecodable_records_are_skipped() {
        let client = client();
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let Watched { outcome, records } = watch_events(
            &client,
            body(&["data: {not json\n", "data: {\"data\":null}\n", "data: {\"data\":{}}\n"]),
            None,
            &cancel,
            &mut |_event: Result<HashMap<String, Thermostat>, Error>| calls += 1,
        )
        .await;

        assert_eq!(outcome, WatchOutcome::Ended);
        assert_eq!(records, 3);
        // Only the empty-but-present mapping is delivered.
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn read_error_ends_watch_without_callback() {
        let client = client();
        let cancel = CancellationToken::new();
        let items: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"data: {\"data\"")),
            Err("connection reset".to_owned()),
        ];
        let mut calls = 0;

        let Watched { outcome, records } = watch_events(
            &client,
            futures_util::stream::iter(items),
            None,
            &cancel,
            &mut |_event: Result<HashMap<String, Structure>, Error>| calls += 1,
        )
        .await;

        assert_eq!(outcome, WatchOutcome::Failed("connection reset".into()));
        assert_eq!(records, 0);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_pending_read() {
        let client = client();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let Watched { outcome, records } = watch_events(
            &client,
            futures_util::stream::pending::<Result<Bytes, Infallible>>(),
            None,
            &cancel,
            &mut |_event: Result<HashMap<String, Structure>, Error>| {},
        )
        .await;

        assert_eq!(outcome, WatchOutcome::Cancelled);
        assert_eq!(records, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_the_watch() {
        let client = client();
        let cancel = CancellationToken::new();

        let Watched { outcome, records } = watch_events(
            &client,
            futures_util::stream::pending::<Result<Bytes, Infallible>>(),
            Some(Duration::from_secs(5)),
            &cancel,
            &mut |_event: Result<HashMap<String, Structure>, Error>| {},
        )
        .await;

        assert!(matches!(outcome, WatchOutcome::Failed(_)));
        assert_eq!(records, 0);
    }

    #[tokio::test]
    async fn unterminated_line_is_capped() {
        let client = client();
        let cancel = CancellationToken::new();
        let chunk = Bytes::from(vec![b'x'; 64 * 1024]);
        let items = std::iter::repeat_with(move || Ok::<_, Infallible>(chunk.clone())).take(32);

        let Watched { outcome, records } = watch_events(
            &client,
            futures_util::stream::iter(items),
            None,
            &cancel,
            &mut |_event: Result<HashMap<String, Structure>, Error>| {},
        )
        .await;

        assert!(matches!(outcome, WatchOutcome::Failed(ref reason) if reason.contains("without a terminator")));
        assert_eq!(records, 0);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(u64::MAX),
            max_delay: Duration::from_secs(u64::MAX),
            ..ReconnectConfig::default()
        };
        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(u64::MAX));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(u64::MAX));
    }
}
