//! Rate-limited HTTP fetching with adaptive pacing and bounded retries.
//!
//! Every outbound request waits for a governor permit via `acquire()`,
//! which spaces requests at the configured interval across all callers. On
//! 429 the governor is slowed (doubling, capped) and the request is
//! retried under an explicit [`RetryPolicy`]; other HTTP failures surface
//! immediately.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use thiserror::Error;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Failure of a single fetch, after the retry budget where one applies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Connection or transport failure (DNS, TLS, timeout). Retried with
    /// backoff before being surfaced.
    #[error("network error: {0}")]
    Network(String),
    /// Non-success status other than 429. Never retried.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// 429 persisted through the whole retry budget.
    #[error("rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// Minimum spacing between consecutive outbound requests (≈8 req/s).
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_millis(120);

/// Quiet period after the last 429 before the base rate is restored.
const SLOWDOWN_COOLDOWN: Duration = Duration::from_secs(60);

/// Adaptive request pacer built on a governor direct limiter.
///
/// When a 429 is received the governor is atomically swapped to a slower
/// rate (factor doubles, capped at 16×). After [`SLOWDOWN_COOLDOWN`] with
/// no further 429s the base rate is restored.
pub struct RequestPacer {
    limiter: ArcSwap<DirectLimiter>,
    base_period: Duration,
    current_factor: AtomicU32,
    last_429: std::sync::Mutex<Option<Instant>>,
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_SPACING)
    }
}

impl RequestPacer {
    /// Pacer with the given minimum period between requests. Zero (from a
    /// config that disables spacing) is raised to one millisecond; governor
    /// quotas must be nonzero.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let quota = Quota::with_period(period).expect("nonzero period");
        let limiter = Arc::new(DirectLimiter::direct(quota));
        RequestPacer {
            limiter: ArcSwap::from(limiter),
            base_period: period,
            current_factor: AtomicU32::new(1),
            last_429: std::sync::Mutex::new(None),
        }
    }

    /// Wait until the pacer allows a request. Blocks the calling future
    /// until a token is available, spacing requests at the configured rate
    /// across all concurrent callers.
    pub async fn acquire(&self) {
        self.try_decay();
        let limiter = self.limiter.load();
        limiter.until_ready().await;
    }

    /// Called on a 429. Doubles the slowdown factor and swaps the governor.
    pub fn on_rate_limited(&self) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now());
        }

        let _ = self
            .current_factor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| Some((f * 2).min(16)));

        let factor = self.current_factor.load(Ordering::SeqCst);
        if let Some(scaled) = self.base_period.checked_mul(factor)
            && let Some(quota) = Quota::with_period(scaled)
        {
            let new_limiter = Arc::new(DirectLimiter::direct(quota));
            self.limiter.store(new_limiter);
        }
    }

    /// Current slowdown factor (1 = base rate).
    pub fn slowdown_factor(&self) -> u32 {
        self.current_factor.load(Ordering::SeqCst)
    }

    /// Restore the base rate once the cooldown has passed without a 429.
    fn try_decay(&self) {
        let should_restore = self
            .last_429
            .lock()
            .ok()
            .and_then(|last| last.map(|t| t.elapsed() >= SLOWDOWN_COOLDOWN))
            .unwrap_or(false);

        if should_restore && self.current_factor.load(Ordering::SeqCst) > 1 {
            self.current_factor.store(1, Ordering::SeqCst);
            let quota = Quota::with_period(self.base_period).expect("base period valid");
            let limiter = Arc::new(DirectLimiter::direct(quota));
            self.limiter.store(limiter);
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_429(&self, ago: Duration) {
        if let Ok(mut last) = self.last_429.lock() {
            *last = Some(Instant::now() - ago);
        }
    }
}

/// Retry behavior for transient failures, owned by the fetcher rather than
/// scattered across call sites.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per request, the first included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Cap on any single backoff delay, server hints included.
    pub max_delay: Duration,
    /// Adds up to 25% random extra delay so synchronized clients fan out.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Network failures and 429s are worth retrying; other HTTP statuses
    /// are not.
    pub fn is_retryable(&self, error: &FetchError) -> bool {
        matches!(
            error,
            FetchError::Network(_) | FetchError::RateLimited { .. }
        )
    }

    /// Delay before the retry following `attempt` (1-based): exponential
    /// from `base_delay`, capped at `max_delay`, honoring a larger server
    /// `Retry-After` up to the same cap.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let mut delay = exponential.min(self.max_delay);
        if let Some(hint) = retry_after
            && hint > delay
        {
            delay = hint.min(self.max_delay);
        }
        if self.jitter {
            let range_ms = (delay.as_millis() as u64 / 4).max(1);
            delay += Duration::from_millis(fastrand::u64(0..range_ms));
        }
        delay
    }
}

/// What a transport hands back for any completed HTTP exchange, success or
/// not. Transport errors (no response at all) surface as
/// [`FetchError::Network`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, when the server sent one.
    pub retry_after: Option<Duration>,
}

/// The HTTP seam. The real implementation wraps a `reqwest` client with
/// per-provider default headers; tests script responses instead.
pub trait Transport: Send + Sync {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, FetchError>> + Send + 'a>>;
}

/// Parse a Retry-After header value (seconds or HTTP-date). Date forms get
/// a conservative flat wait instead of real date math.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if value.contains(',') || value.contains("GMT") {
        return Some(Duration::from_secs(5));
    }
    None
}

/// `reqwest`-backed transport with provider default headers baked in.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    const TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(default_headers: reqwest::header::HeaderMap) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Self::TIMEOUT)
            .build()?;
        Ok(HttpTransport { client })
    }

    /// Transport for the Scopus API: key header plus an explicit JSON
    /// accept (Scopus answers XML otherwise).
    pub fn scopus(api_key: &str) -> Result<Self, FetchError> {
        use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(api_key)
            .map_err(|e| FetchError::Network(format!("invalid API key header: {e}")))?;
        headers.insert("X-ELS-APIKey", key);
        Self::new(headers)
    }

    /// Transport for OpenAlex: a polite User-Agent carrying the contact
    /// address moves requests into the faster pool.
    pub fn openalex(mailto: Option<&str>) -> Result<Self, FetchError> {
        use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
        let agent = match mailto {
            Some(mailto) => format!(
                "bibliometer/{} (mailto:{mailto})",
                env!("CARGO_PKG_VERSION")
            ),
            None => format!("bibliometer/{}", env!("CARGO_PKG_VERSION")),
        };
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&agent)
            .map_err(|e| FetchError::Network(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, agent);
        Self::new(headers)
    }
}

impl Transport for HttpTransport {
    fn get<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?;
            let status = response.status().as_u16();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await?;
            Ok(TransportResponse {
                status,
                body,
                retry_after,
            })
        })
    }
}

/// Paced, retrying fetch front-end used by the orchestrator and the
/// overview builder. One fetcher per provider, so pacing and slowdown are
/// provider-scoped.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    pacer: RequestPacer,
    policy: RetryPolicy,
    requests_issued: AtomicU64,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>, pacer: RequestPacer, policy: RetryPolicy) -> Self {
        Fetcher {
            transport,
            pacer,
            policy,
            requests_issued: AtomicU64::new(0),
        }
    }

    /// Requests actually issued (retries included) since construction.
    pub fn request_count(&self) -> u64 {
        self.requests_issued.load(Ordering::Relaxed)
    }

    /// Fetch a URL and return the response body.
    ///
    /// 2xx returns the body; 429 slows the pacer and retries within the
    /// policy budget before surfacing [`FetchError::RateLimited`]; other
    /// statuses surface immediately as [`FetchError::Http`]; transport
    /// failures retry on the same budget.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 1u32;
        loop {
            self.pacer.acquire().await;
            self.requests_issued.fetch_add(1, Ordering::Relaxed);

            let error = match self.transport.get(url).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    return Ok(response.body);
                }
                Ok(response) if response.status == 429 => {
                    self.pacer.on_rate_limited();
                    FetchError::RateLimited {
                        retry_after: response.retry_after,
                    }
                }
                Ok(response) => {
                    return Err(FetchError::Http {
                        status: response.status,
                        body: response.body,
                    });
                }
                Err(error) => error,
            };

            if !self.policy.is_retryable(&error) || attempt >= self.policy.max_attempts {
                return Err(error);
            }

            let retry_after = match &error {
                FetchError::RateLimited { retry_after } => *retry_after,
                _ => None,
            };
            let delay = self.policy.backoff_delay(attempt, retry_after);
            tracing::debug!(
                url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after backoff"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
