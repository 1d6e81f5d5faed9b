//! HTTP load engine.
//!
//! Keeps `connections × pipelining` requests in flight for a fixed duration.
//! All in-flight requests are polled from a single task, so the
//! [`RequestLifecycle`] hooks run one at a time with exclusive access to their
//! state and never need locking.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use hdrhistogram::Histogram;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::payload::{Clock, SystemClock};

/// Pause before a connection retries after a transport failure.
const RECONNECT_DELAY: Duration = Duration::from_millis(50);

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s | {msg}";

/// Run options. Serialized as-is into each worker's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoadOptions {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub connections: usize,
    /// Requests kept in flight per connection.
    pub pipelining: usize,
    pub duration_ms: u64,
    /// Stop issuing after this many requests, even if time remains.
    pub max_requests: Option<u64>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_TYPE.as_str().to_string(), "application/json".to_string());
        Self {
            url: "http://127.0.0.1:8000/graphql".to_string(),
            method: "POST".to_string(),
            headers,
            connections: 10,
            pipelining: 1,
            duration_ms: 10_000,
            max_requests: None,
        }
    }
}

impl LoadOptions {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(BenchError::InvalidConfig("connections must be > 0".into()));
        }
        if self.pipelining == 0 {
            return Err(BenchError::InvalidConfig("pipelining must be > 0".into()));
        }
        if self.duration_ms == 0 {
            return Err(BenchError::InvalidConfig("duration must be > 0".into()));
        }
        Url::parse(&self.url)
            .map_err(|err| BenchError::InvalidConfig(format!("invalid url {}: {err}", self.url)))?;
        Ok(())
    }
}

/// A completed HTTP exchange.
#[derive(Debug)]
pub struct ResponseEvent<'a> {
    pub connection: usize,
    pub status: u16,
    pub bytes: usize,
    pub latency: Duration,
    pub body: &'a [u8],
}

/// Hooks the engine calls around every request.
pub trait RequestLifecycle {
    /// Called once per logical connection before its first request.
    fn on_connection_ready(&mut self, _connection: usize) {}

    /// Body for the next request on `connection`. An error aborts the run.
    fn on_request_needed(&mut self, connection: usize) -> Result<Vec<u8>>;

    fn on_response(&mut self, event: &ResponseEvent<'_>);

    fn on_request_error(&mut self, connection: usize, error: &reqwest::Error) {
        debug!(connection, %error, "request failed");
    }
}

/// Emitted once the run window closes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub started_at_ms: u64,
    pub duration_secs: f64,
    pub requests_sent: u64,
    pub responses: u64,
    pub non_2xx: u64,
    pub transport_errors: u64,
    pub bytes_read: u64,
    pub latency_mean_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub latency_max_ms: f64,
}

/// Latencies are recorded in microseconds, up to one minute.
const LATENCY_MAX_MICROS: u64 = 60_000_000;

struct Counters {
    requests_sent: u64,
    responses: u64,
    non_2xx: u64,
    transport_errors: u64,
    bytes_read: u64,
    latency: Histogram<u64>,
}

impl Counters {
    fn new() -> Result<Self> {
        let latency = Histogram::new_with_bounds(1, LATENCY_MAX_MICROS, 3)
            .map_err(|err| BenchError::InvalidConfig(format!("latency histogram: {err}")))?;
        Ok(Self {
            requests_sent: 0,
            responses: 0,
            non_2xx: 0,
            transport_errors: 0,
            bytes_read: 0,
            latency,
        })
    }

    fn record_latency(&mut self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency.saturating_record(micros.max(1));
    }

    fn latency_ms(&self, quantile: f64) -> f64 {
        if self.latency.is_empty() {
            return 0.0;
        }
        self.latency.value_at_quantile(quantile) as f64 / 1000.0
    }

    fn into_summary(self, started_at_ms: u64, elapsed: Duration) -> RunSummary {
        let (latency_mean_ms, latency_max_ms) = if self.latency.is_empty() {
            (0.0, 0.0)
        } else {
            (self.latency.mean() / 1000.0, self.latency.max() as f64 / 1000.0)
        };
        RunSummary {
            started_at_ms,
            duration_secs: elapsed.as_secs_f64(),
            requests_sent: self.requests_sent,
            responses: self.responses,
            non_2xx: self.non_2xx,
            transport_errors: self.transport_errors,
            bytes_read: self.bytes_read,
            latency_mean_ms,
            latency_p50_ms: self.latency_ms(0.50),
            latency_p95_ms: self.latency_ms(0.95),
            latency_p99_ms: self.latency_ms(0.99),
            latency_max_ms,
        }
    }
}

struct Completion {
    connection: usize,
    latency: Duration,
    result: std::result::Result<(u16, Vec<u8>), reqwest::Error>,
}

pub struct LoadEngine {
    options: LoadOptions,
    client: reqwest::Client,
    url: Url,
    method: Method,
    headers: HeaderMap,
    tracked: bool,
}

impl LoadEngine {
    pub fn new(options: LoadOptions) -> Result<Self> {
        options.validate()?;
        let url = Url::parse(&options.url)
            .map_err(|err| BenchError::InvalidConfig(format!("invalid url: {err}")))?;
        let method = Method::from_bytes(options.method.as_bytes())
            .map_err(|_| BenchError::InvalidConfig(format!("invalid method {}", options.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| BenchError::InvalidConfig(format!("invalid header {name}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| BenchError::InvalidConfig(format!("invalid header value: {err}")))?;
            headers.insert(name, value);
        }

        let in_flight = options.connections * options.pipelining;
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(in_flight)
            .build()?;

        Ok(Self {
            options,
            client,
            url,
            method,
            headers,
            tracked: false,
        })
    }

    /// Render a live progress bar on stderr while running.
    pub fn track(mut self, enabled: bool) -> Self {
        self.tracked = enabled;
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Drive load until the configured duration elapses.
    ///
    /// Requests still in flight when the window closes are abandoned.
    pub async fn run<H: RequestLifecycle>(&self, hooks: &mut H) -> Result<RunSummary> {
        let duration = self.options.duration();
        let started_at_ms = SystemClock.now_ms();
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let progress = self.progress_bar(duration);
        let mut counters = Counters::new()?;

        info!(
            url = %self.url,
            connections = self.options.connections,
            pipelining = self.options.pipelining,
            duration_ms = self.options.duration_ms,
            "starting load"
        );

        for connection in 0..self.options.connections {
            hooks.on_connection_ready(connection);
        }

        let mut in_flight = FuturesUnordered::new();
        for slot in 0..self.options.connections * self.options.pipelining {
            if self.exhausted(&counters) {
                break;
            }
            let connection = slot % self.options.connections;
            let body = hooks.on_request_needed(connection)?;
            in_flight.push(fire(self.request(body), connection, Duration::ZERO));
            counters.requests_sent += 1;
        }

        let window = tokio::time::sleep_until(deadline);
        tokio::pin!(window);

        loop {
            tokio::select! {
                _ = &mut window => break,
                next = in_flight.next() => {
                    let Some(completion) = next else { break };
                    let connection = completion.connection;
                    let delay = match completion.result {
                        Ok((status, body)) => {
                            counters.responses += 1;
                            counters.bytes_read += body.len() as u64;
                            counters.record_latency(completion.latency);
                            if !(200..300).contains(&status) {
                                counters.non_2xx += 1;
                            }
                            hooks.on_response(&ResponseEvent {
                                connection,
                                status,
                                bytes: body.len(),
                                latency: completion.latency,
                                body: &body,
                            });
                            Duration::ZERO
                        }
                        Err(err) => {
                            counters.transport_errors += 1;
                            hooks.on_request_error(connection, &err);
                            RECONNECT_DELAY
                        }
                    };

                    progress.set_position(start.elapsed().as_secs().min(duration.as_secs()));
                    progress.set_message(format!("{} responses", counters.responses));

                    if tokio::time::Instant::now() < deadline && !self.exhausted(&counters) {
                        let body = hooks.on_request_needed(connection)?;
                        in_flight.push(fire(self.request(body), connection, delay));
                        counters.requests_sent += 1;
                    }
                }
            }
        }

        drop(in_flight);
        progress.finish_and_clear();

        let summary = counters.into_summary(started_at_ms, start.elapsed());
        info!(
            requests = summary.requests_sent,
            responses = summary.responses,
            transport_errors = summary.transport_errors,
            duration_secs = summary.duration_secs,
            p50_ms = summary.latency_p50_ms,
            p99_ms = summary.latency_p99_ms,
            "load finished"
        );
        Ok(summary)
    }

    fn exhausted(&self, counters: &Counters) -> bool {
        self.options
            .max_requests
            .is_some_and(|max| counters.requests_sent >= max)
    }

    fn request(&self, body: Vec<u8>) -> reqwest::RequestBuilder {
        self.client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .body(body)
    }

    fn progress_bar(&self, duration: Duration) -> ProgressBar {
        if !self.tracked {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(duration.as_secs());
        bar.set_style(
            ProgressStyle::with_template(PROGRESS_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        bar
    }
}

async fn fire(request: reqwest::RequestBuilder, connection: usize, delay: Duration) -> Completion {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let started = Instant::now();
    let result = match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            response.bytes().await.map(|body| (status, body.to_vec()))
        }
        Err(err) => Err(err),
    };
    Completion {
        connection,
        latency: started.elapsed(),
        result,
    }
}
