//! High-level asynchronous Steel client.
//!
//! [`SteelClient`] validates requests, leases the shared remote session,
//! dispatches through the retry controller, and records per-operation
//! metrics. It is cheap to clone; clones share configuration, the session
//! cache and metrics.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::api::{ExtractSource, SteelApi};
use crate::config::{SteelConfig, SteelConfigOverrides};
use crate::error::{ErrorKind, SteelError};
use crate::http::{ReqwestHttp, SteelHttp};
use crate::logging::{LogConfig, SteelLogger, category};
use crate::metrics::{MetricsRecorder, SteelMetrics, SteelOperation, duration_ms, start_timer};
use crate::retry::RetryController;
use crate::session::{SessionManager, SessionStats};
use crate::types::request::{ExtractOptions, RequestDescriptor, ScrapeRequest};
use crate::types::result::{ExtractResult, ScrapeResult};
use crate::types::session::{SessionHandle, SessionLease, SessionState};

/// Snapshot returned by [`SteelClient::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub metrics: SteelMetrics,
    pub session: SessionStats,
}

/// Results that carry per-call timing metadata.
trait Stamped {
    fn stamp(&mut self, elapsed: Duration, attempts: u32);
}

impl Stamped for ScrapeResult {
    fn stamp(&mut self, elapsed: Duration, attempts: u32) {
        self.metadata.elapsed = elapsed;
        self.metadata.attempts = attempts;
    }
}

impl Stamped for ExtractResult {
    fn stamp(&mut self, elapsed: Duration, attempts: u32) {
        self.metadata.elapsed = elapsed;
        self.metadata.attempts = attempts;
    }
}

struct ClientInner {
    config: Arc<SteelConfig>,
    api: Arc<SteelApi>,
    sessions: SessionManager,
    retry: RetryController,
    logger: SteelLogger,
    metrics: MetricsRecorder,
}

/// Resilient client for the Steel API.
#[derive(Clone)]
pub struct SteelClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SteelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteelClient")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.sessions)
            .finish()
    }
}

impl SteelClient {
    /// Build a client over the default `reqwest` transport.
    pub fn new(config: SteelConfig) -> Result<Self, SteelError> {
        config.validate()?;
        let http = ReqwestHttp::new(config.api_timeout)?;
        Self::with_http(config, Arc::new(http))
    }

    /// Build a client from `STEEL_*` environment variables.
    pub fn from_env() -> Result<Self, SteelError> {
        Self::new(SteelConfig::from_env()?)
    }

    /// Build a client from explicit options layered over the environment.
    pub fn configure(overrides: SteelConfigOverrides) -> Result<Self, SteelError> {
        Self::new(SteelConfig::build(overrides, None)?)
    }

    /// Build a client over a caller-supplied transport.
    pub fn with_http(config: SteelConfig, http: Arc<dyn SteelHttp>) -> Result<Self, SteelError> {
        config.validate()?;

        let logger = SteelLogger::with_config(LogConfig {
            verbose: config.verbose,
            external_logger: config.logger.clone(),
        });
        let api = Arc::new(SteelApi::new(&config, http)?);
        let metrics = MetricsRecorder::default();
        let sessions = SessionManager::with_metrics(
            Arc::clone(&api) as Arc<dyn crate::session::SessionApi>,
            config.retry.clone(),
            config.session_idle_timeout,
            logger.clone(),
            metrics.clone(),
        );
        let retry = RetryController::new(config.retry.clone(), logger.clone());

        logger.debug(
            "Steel client configured",
            Some(category::CONFIG),
            Some(json!({
                "api_url": config.api_url,
                "default_format": config.default_format,
                "use_proxy": config.use_proxy,
                "solve_captcha": config.solve_captcha,
                "stealth_mode": config.stealth_mode,
                "max_attempts": config.retry.attempts(),
            })),
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                config: Arc::new(config),
                api,
                sessions,
                retry,
                logger,
                metrics,
            }),
        })
    }

    pub fn config(&self) -> &SteelConfig {
        &self.inner.config
    }

    pub fn logger(&self) -> &SteelLogger {
        &self.inner.logger
    }

    /// Validate a raw request against this client's defaults.
    pub fn validate(&self, request: impl Into<ScrapeRequest>) -> Result<RequestDescriptor, SteelError> {
        request.into().validate(self.inner.config.default_format)
    }

    pub async fn scrape(&self, request: impl Into<ScrapeRequest>) -> Result<ScrapeResult, SteelError> {
        self.scrape_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Scrape a page; cancelling `cancel` aborts the in-flight call.
    pub async fn scrape_cancellable(
        &self,
        request: impl Into<ScrapeRequest>,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, SteelError> {
        let descriptor = self.validate(request)?;
        let attempts = AtomicU32::new(0);
        let target = descriptor.url().to_string();
        let api = &self.inner.api;
        let op = SteelOperation::Scrape;

        let work = self.in_session(descriptor, cancel, |descriptor| {
            self.with_retry(op, cancel, &attempts, move || {
                let api = Arc::clone(api);
                let descriptor = descriptor.clone();
                async move { api.scrape(&descriptor).await }
            })
        });
        self.observed(op, &target, &attempts, work).await
    }

    pub async fn screenshot(
        &self,
        request: impl Into<ScrapeRequest>,
    ) -> Result<ScrapeResult, SteelError> {
        self.screenshot_cancellable(request, &CancellationToken::new())
            .await
    }

    pub async fn screenshot_cancellable(
        &self,
        request: impl Into<ScrapeRequest>,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, SteelError> {
        let descriptor = self.validate(request)?;
        let attempts = AtomicU32::new(0);
        let target = descriptor.url().to_string();
        let api = &self.inner.api;
        let op = SteelOperation::Screenshot;

        let work = self.in_session(descriptor, cancel, |descriptor| {
            self.with_retry(op, cancel, &attempts, move || {
                let api = Arc::clone(api);
                let descriptor = descriptor.clone();
                async move { api.screenshot(&descriptor).await }
            })
        });
        self.observed(op, &target, &attempts, work).await
    }

    /// Structured extraction from a page.
    pub async fn extract(
        &self,
        request: impl Into<ScrapeRequest>,
        options: ExtractOptions,
    ) -> Result<ExtractResult, SteelError> {
        self.extract_cancellable(request, options, &CancellationToken::new())
            .await
    }

    pub async fn extract_cancellable(
        &self,
        request: impl Into<ScrapeRequest>,
        options: ExtractOptions,
        cancel: &CancellationToken,
    ) -> Result<ExtractResult, SteelError> {
        let descriptor = self.validate(request)?;
        let attempts = AtomicU32::new(0);
        let target = descriptor.url().to_string();
        let api = &self.inner.api;
        let options = &options;
        let op = SteelOperation::Extract;

        let work = self.in_session(descriptor, cancel, |descriptor| {
            let source = ExtractSource::Page(descriptor);
            self.with_retry(op, cancel, &attempts, move || {
                let api = Arc::clone(api);
                let source = source.clone();
                let options = options.clone();
                async move { api.extract(&source, &options).await }
            })
        });
        self.observed(op, &target, &attempts, work).await
    }

    /// Structured extraction from caller-provided content; no session is used.
    pub async fn extract_content(
        &self,
        content: impl Into<String>,
        options: ExtractOptions,
    ) -> Result<ExtractResult, SteelError> {
        self.extract_content_cancellable(content, options, &CancellationToken::new())
            .await
    }

    pub async fn extract_content_cancellable(
        &self,
        content: impl Into<String>,
        options: ExtractOptions,
        cancel: &CancellationToken,
    ) -> Result<ExtractResult, SteelError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SteelError::invalid("content", "content must not be empty"));
        }
        let attempts = AtomicU32::new(0);
        let api = &self.inner.api;
        let source = ExtractSource::Content(content);
        let options = &options;

        let work = self.with_retry(SteelOperation::Extract, cancel, &attempts, || {
            let api = Arc::clone(api);
            let source = source.clone();
            let options = options.clone();
            async move { api.extract(&source, &options).await }
        });
        self.observed(SteelOperation::Extract, "<inline content>", &attempts, work)
            .await
    }

    /// Lease the shared session explicitly; pair with [`SteelClient::release_session`].
    pub async fn acquire_session(&self) -> Result<SessionLease, SteelError> {
        self.inner.sessions.acquire().await
    }

    pub async fn release_session(&self, lease: &SessionLease) {
        self.inner.sessions.release(lease).await
    }

    /// Run `work` with a leased session, releasing it on every exit path.
    pub async fn session_context<T, E, F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SteelError>,
    {
        self.inner.sessions.scoped(work).await
    }

    /// Force-close the cached session. Idempotent.
    pub async fn close_session(&self) -> bool {
        self.inner.sessions.close_session().await
    }

    /// Close sessions that sat idle past the threshold or expired.
    pub async fn cleanup_sessions(&self) -> usize {
        let closed = self.inner.sessions.cleanup_expired().await;
        if closed > 0 {
            self.inner.logger.info(
                format!("cleaned up {closed} idle Steel session(s)"),
                Some(category::SESSION),
                None,
            );
        }
        closed
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.sessions.state()
    }

    pub fn session_state_of(&self, session_id: &str) -> SessionState {
        self.inner.sessions.state_of(session_id)
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            metrics: self.inner.metrics.snapshot(),
            session: self.inner.sessions.stats(),
        }
    }

    /// Run `work` with a session attached, leasing the shared one when the
    /// descriptor carries none.
    async fn in_session<T, F, Fut>(
        &self,
        descriptor: RequestDescriptor,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, SteelError>
    where
        F: FnOnce(RequestDescriptor) -> Fut,
        Fut: Future<Output = Result<T, SteelError>>,
    {
        if descriptor.session().is_some() {
            return work(descriptor).await;
        }
        self.inner
            .sessions
            .scoped_cancellable(cancel, move |handle| work(descriptor.with_session(handle)))
            .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        op: SteelOperation,
        cancel: &CancellationToken,
        attempts: &AtomicU32,
        call: F,
    ) -> Result<T, SteelError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SteelError>>,
    {
        self.inner
            .retry
            .run(op.as_str(), cancel, |attempt| {
                attempts.store(attempt, Ordering::Relaxed);
                call()
            })
            .await
            .map(|outcome| outcome.value)
    }

    async fn observed<T, Fut>(
        &self,
        op: SteelOperation,
        target: &str,
        attempts: &AtomicU32,
        work: Fut,
    ) -> Result<T, SteelError>
    where
        T: Stamped,
        Fut: Future<Output = Result<T, SteelError>>,
    {
        let timer = start_timer();
        self.inner.logger.debug(
            format!("{} {target}", op.as_str()),
            Some(category::REQUEST),
            None,
        );

        let result = work.await;
        let elapsed = timer.elapsed();
        let tries = attempts.load(Ordering::Relaxed).max(1);
        self.inner
            .metrics
            .record(op, tries, result.is_err(), duration_ms(elapsed));

        match result {
            Ok(mut value) => {
                value.stamp(elapsed, tries);
                self.inner.logger.info(
                    format!(
                        "{} {target} succeeded in {}ms",
                        op.as_str(),
                        duration_ms(elapsed)
                    ),
                    Some(category::REQUEST),
                    Some(json!({ "attempts": tries })),
                );
                Ok(value)
            }
            Err(err) => {
                let message = format!("{} {target} failed: {err}", op.as_str());
                let aux = Some(json!({ "kind": err.kind(), "attempts": tries }));
                if err.kind() == ErrorKind::Cancelled {
                    self.inner.logger.info(message, Some(category::REQUEST), aux);
                } else {
                    self.inner.logger.error(message, Some(category::REQUEST), aux);
                }
                Err(err)
            }
        }
    }
}
