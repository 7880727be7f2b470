//! Proxy-rotating HTTP retrieval with bounded retries
//!
//! Every attempt goes out through a freshly selected proxy with a randomly
//! chosen client identity. Failures (timeouts, connection errors, any
//! non-2xx status) are not told apart: they all feed the retry machine, and
//! the caller only learns how the fetch ended. The one exception is an HTTP
//! client that cannot be built at all, which ends the fetch at once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::USER_AGENT};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::config::site;
use crate::infrastructure::proxy_pool::{ProxyEndpoint, ProxyPool};
use crate::infrastructure::retry_policy::{RetryDecision, RetryMachine, RetryPolicy};

/// A single failed attempt. Logged, never returned from [`ResilientFetcher::fetch`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid proxy {proxy}: {reason}")]
    InvalidProxy { proxy: String, reason: String },

    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),
}

impl TransportError {
    /// Retrying cannot help: every later attempt would fail the same way
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ClientBuild(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch of {url} cancelled after {attempts} attempts")]
    Cancelled { url: String, attempts: u32 },

    #[error("Gave up on {url} after {attempts} attempts")]
    AttemptsExhausted { url: String, attempts: u32 },

    #[error("Deadline of {deadline:?} exceeded for {url} after {attempts} attempts")]
    DeadlineExceeded {
        url: String,
        attempts: u32,
        deadline: Duration,
    },

    #[error("HTTP client unusable while fetching {url}: {reason}")]
    Misconfigured { url: String, reason: String },
}

/// Everything one attempt needs
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub proxy: &'a ProxyEndpoint,
    pub user_agent: &'a str,
    pub timeout: Duration,
}

/// Issues one GET. Implemented over reqwest for real runs and by fakes in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: FetchRequest<'_>) -> Result<String, TransportError>;
}

/// Waits between attempts. Swapped for a recording fake in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// reqwest transport. A reqwest proxy is fixed per client, so one client is
/// built per proxy and reused.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<String, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that reqwest accepts the endpoint as a proxy
    pub fn validate_proxy(endpoint: &ProxyEndpoint) -> Result<reqwest::Proxy, TransportError> {
        reqwest::Proxy::all(endpoint.proxy_url()).map_err(|e| TransportError::InvalidProxy {
            proxy: endpoint.raw().to_string(),
            reason: e.to_string(),
        })
    }

    async fn client_for(&self, request: &FetchRequest<'_>) -> Result<Client, TransportError> {
        let proxy_url = request.proxy.proxy_url();
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&proxy_url) {
            return Ok(client.clone());
        }

        let proxy = Self::validate_proxy(request.proxy)?;
        let client = Client::builder()
            .proxy(proxy)
            .timeout(request.timeout)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;

        clients.insert(proxy_url, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: FetchRequest<'_>) -> Result<String, TransportError> {
        let client = self.client_for(&request).await?;
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout)
            } else {
                TransportError::Request(e.to_string())
            }
        };

        let response = client
            .get(request.url)
            .header(USER_AGENT, request.user_agent)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(classify)
    }
}

enum Guarded<T> {
    Done(T),
    Cancelled,
    DeadlineHit,
}

/// HTTP GET that survives flaky proxies
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    proxies: Arc<ProxyPool>,
    identities: Vec<String>,
    policy: RetryPolicy,
    request_timeout: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl ResilientFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        proxies: Arc<ProxyPool>,
        policy: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            proxies,
            identities: site::CLIENT_IDENTITIES.iter().map(ToString::to_string).collect(),
            policy,
            request_timeout,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replace the client identity set; an empty set keeps the current one
    pub fn with_identities(mut self, identities: Vec<String>) -> Self {
        if !identities.is_empty() {
            self.identities = identities;
        }
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`, retrying until success, the retry limit, or cancellation
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<String, FetchError> {
        let deadline_duration = self.policy.limit.deadline_duration();
        let deadline = deadline_duration.map(|d| Instant::now() + d);
        let mut machine = RetryMachine::new(self.policy.clone());

        let cancelled = |machine: &RetryMachine| FetchError::Cancelled {
            url: url.to_string(),
            attempts: machine.total_attempts(),
        };
        let deadline_exceeded = |machine: &RetryMachine| FetchError::DeadlineExceeded {
            url: url.to_string(),
            attempts: machine.total_attempts(),
            deadline: deadline_duration.unwrap_or_default(),
        };

        loop {
            if cancel.is_cancelled() {
                machine.exhaust();
                return Err(cancelled(&machine));
            }

            let proxy = self.proxies.select();
            let user_agent = self.pick_identity();
            machine.begin_attempt();

            debug!(
                "🌐 GET {} via {} (attempt {})",
                url,
                proxy.raw(),
                machine.total_attempts()
            );
            let request = FetchRequest {
                url,
                proxy,
                user_agent,
                timeout: self.request_timeout,
            };

            let error = match self.guard(self.transport.get(request), cancel, deadline).await {
                Guarded::Done(Ok(body)) => {
                    debug!(
                        "Fetched {} ({} chars) on attempt {}",
                        url,
                        body.len(),
                        machine.total_attempts()
                    );
                    return Ok(body);
                }
                Guarded::Done(Err(error)) if error.is_fatal() => {
                    machine.exhaust();
                    return Err(FetchError::Misconfigured {
                        url: url.to_string(),
                        reason: error.to_string(),
                    });
                }
                Guarded::Done(Err(error)) => error,
                Guarded::Cancelled => {
                    machine.exhaust();
                    return Err(cancelled(&machine));
                }
                Guarded::DeadlineHit => {
                    machine.exhaust();
                    return Err(deadline_exceeded(&machine));
                }
            };

            warn!(
                "Attempt {} for {} via {} failed: {}",
                machine.total_attempts(),
                url,
                proxy.raw(),
                error
            );

            match machine.on_failure() {
                RetryDecision::GiveUp => {
                    return Err(FetchError::AttemptsExhausted {
                        url: url.to_string(),
                        attempts: machine.total_attempts(),
                    });
                }
                RetryDecision::Wait(wait) => {
                    if wait == self.policy.backoff_wait {
                        info!(
                            "⏳ {} consecutive failures for {}, backing off for {:?}",
                            self.policy.max_retries, url, wait
                        );
                    }
                    match self.guard(self.sleeper.sleep(wait), cancel, deadline).await {
                        Guarded::Done(()) => machine.resume(),
                        Guarded::Cancelled => {
                            machine.exhaust();
                            return Err(cancelled(&machine));
                        }
                        Guarded::DeadlineHit => {
                            machine.exhaust();
                            return Err(deadline_exceeded(&machine));
                        }
                    }
                }
            }
        }
    }

    fn pick_identity(&self) -> &str {
        &self.identities[fastrand::usize(..self.identities.len())]
    }

    async fn guard<T>(
        &self,
        work: impl Future<Output = T>,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Guarded<T> {
        let deadline_reached = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Guarded::Cancelled,
            () = deadline_reached => Guarded::DeadlineHit,
            value = work => Guarded::Done(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::retry_policy::RetryLimit;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted results, then keeps timing out
    #[derive(Default)]
    struct ScriptedTransport {
        script: StdMutex<VecDeque<Result<String, TransportError>>>,
        seen: StdMutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        fn with_script(script: Vec<Result<String, TransportError>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
                seen: StdMutex::default(),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, request: FetchRequest<'_>) -> Result<String, TransportError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.proxy.raw().to_string(), request.user_agent.to_string()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Timeout(request.timeout)))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: StdMutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    fn pool() -> Arc<ProxyPool> {
        Arc::new(
            ProxyPool::round_robin(vec![
                ProxyEndpoint::new("10.0.0.1:8080"),
                ProxyEndpoint::new("10.0.0.2:8080"),
            ])
            .unwrap(),
        )
    }

    fn fetcher(
        transport: Arc<ScriptedTransport>,
        limit: RetryLimit,
        sleeper: Arc<dyn Sleeper>,
    ) -> ResilientFetcher {
        let policy = RetryPolicy {
            limit,
            ..Default::default()
        };
        ResilientFetcher::new(transport, pool(), policy, Duration::from_secs(30)).with_sleeper(sleeper)
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[tokio::test]
    async fn test_always_timing_out_follows_backoff_schedule() {
        let transport = Arc::new(ScriptedTransport::default());
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = fetcher(transport.clone(), RetryLimit::attempts(7), sleeper.clone());

        let result = fetcher.fetch("https://example.test/p/1", &CancellationToken::new()).await;

        assert_eq!(
            result,
            Err(FetchError::AttemptsExhausted {
                url: "https://example.test/p/1".to_string(),
                attempts: 7
            })
        );
        assert_eq!(transport.calls(), 7);
        // five failures with 2s gaps, one long backoff, then a fresh window
        assert_eq!(*sleeper.slept.lock().unwrap(), secs(&[2, 2, 2, 2, 30, 2]));
    }

    #[tokio::test]
    async fn test_success_after_failures_returns_body() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![
            Err(TransportError::Status { status: 403 }),
            Err(TransportError::Request("connection reset".into())),
            Ok("<html>ok</html>".to_string()),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = fetcher(transport.clone(), RetryLimit::attempts(15), sleeper.clone());

        let body = fetcher
            .fetch("https://example.test/p/2", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(body, "<html>ok</html>");
        assert_eq!(transport.calls(), 3);
        assert_eq!(*sleeper.slept.lock().unwrap(), secs(&[2, 2]));
    }

    #[tokio::test]
    async fn test_each_attempt_rotates_proxy_and_uses_known_identity() {
        let transport = Arc::new(ScriptedTransport::default());
        let fetcher = fetcher(
            transport.clone(),
            RetryLimit::attempts(4),
            Arc::new(RecordingSleeper::default()),
        );

        let _ = fetcher.fetch("https://example.test/p/3", &CancellationToken::new()).await;

        let seen = transport.seen.lock().unwrap();
        let proxies: Vec<_> = seen.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            proxies,
            vec!["10.0.0.1:8080", "10.0.0.2:8080", "10.0.0.1:8080", "10.0.0.2:8080"]
        );
        assert!(
            seen.iter()
                .all(|(_, ua)| site::CLIENT_IDENTITIES.contains(&ua.as_str()))
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_attempt() {
        let transport = Arc::new(ScriptedTransport::default());
        let fetcher = fetcher(
            transport.clone(),
            RetryLimit::Forever,
            Arc::new(RecordingSleeper::default()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = fetcher.fetch("https://example.test/p/4", &cancel).await;

        assert!(matches!(result, Err(FetchError::Cancelled { attempts: 0, .. })));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_retry_forever() {
        let transport = Arc::new(ScriptedTransport::default());
        let fetcher = fetcher(transport.clone(), RetryLimit::Forever, Arc::new(TokioSleeper));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            trigger.cancel();
        });

        let result = fetcher.fetch("https://example.test/p/5", &cancel).await;

        // attempts at 0,2,4,6,8 then the 30s backoff is interrupted at 20s
        assert!(matches!(result, Err(FetchError::Cancelled { attempts: 5, .. })));
        assert_eq!(transport.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_ends_fetch() {
        let transport = Arc::new(ScriptedTransport::default());
        let fetcher = fetcher(
            transport.clone(),
            RetryLimit::deadline(Duration::from_secs(100)),
            Arc::new(TokioSleeper),
        );
        let started = Instant::now();

        let result = fetcher.fetch("https://example.test/p/6", &CancellationToken::new()).await;

        assert!(matches!(result, Err(FetchError::DeadlineExceeded { .. })));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(100) && elapsed < Duration::from_secs(102));
    }

    #[tokio::test]
    async fn test_client_build_failure_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::with_script(vec![Err(
            TransportError::ClientBuild("no TLS backend".into()),
        )]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let fetcher = fetcher(transport.clone(), RetryLimit::Forever, sleeper.clone());

        let result = fetcher.fetch("https://example.test/p/7", &CancellationToken::new()).await;

        assert!(matches!(result, Err(FetchError::Misconfigured { .. })));
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.slept.lock().unwrap().is_empty());
    }

    #[test]
    fn test_proxy_validation() {
        assert!(ReqwestTransport::validate_proxy(&ProxyEndpoint::new("10.0.0.1:8080")).is_ok());
        assert!(matches!(
            ReqwestTransport::validate_proxy(&ProxyEndpoint::new("not a proxy")),
            Err(TransportError::InvalidProxy { .. })
        ));
    }

    #[test]
    fn test_empty_identity_override_is_ignored() {
        let transport = Arc::new(ScriptedTransport::default());
        let fetcher = fetcher(transport, RetryLimit::Forever, Arc::new(TokioSleeper))
            .with_identities(Vec::new());
        assert_eq!(fetcher.identities.len(), site::CLIENT_IDENTITIES.len());
    }
}
