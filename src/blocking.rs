//! Blocking call style over [`SteelClient`].
//!
//! The blocking client drives the same async client on a private tokio
//! runtime, so both styles share configuration, the session cache and
//! metrics. Do not call it from inside an async context; use
//! [`SteelClient`] there.

use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use crate::client::{ClientStats, SteelClient};
use crate::config::{SteelConfig, SteelConfigOverrides};
use crate::error::SteelError;
use crate::loader::{Document, SteelDocumentLoader};
use crate::types::request::{ExtractOptions, ScrapeRequest};
use crate::types::result::{ExtractResult, ScrapeResult};
use crate::types::session::{SessionHandle, SessionLease, SessionState};

pub struct BlockingSteelClient {
    client: SteelClient,
    runtime: Runtime,
}

impl std::fmt::Debug for BlockingSteelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingSteelClient")
            .field("client", &self.client)
            .finish()
    }
}

impl BlockingSteelClient {
    pub fn new(config: SteelConfig) -> Result<Self, SteelError> {
        Self::from_client(SteelClient::new(config)?)
    }

    pub fn from_env() -> Result<Self, SteelError> {
        Self::from_client(SteelClient::from_env()?)
    }

    pub fn configure(overrides: SteelConfigOverrides) -> Result<Self, SteelError> {
        Self::from_client(SteelClient::configure(overrides)?)
    }

    /// Wrap an existing async client; the session cache stays shared with it.
    pub fn from_client(client: SteelClient) -> Result<Self, SteelError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("steel-blocking")
            .enable_all()
            .build()
            .map_err(|err| SteelError::config("runtime", format!("failed to start runtime: {err}")))?;
        Ok(Self { client, runtime })
    }

    /// The async client this wrapper drives.
    pub fn client(&self) -> &SteelClient {
        &self.client
    }

    pub fn config(&self) -> &SteelConfig {
        self.client.config()
    }

    pub fn scrape(&self, request: impl Into<ScrapeRequest>) -> Result<ScrapeResult, SteelError> {
        self.runtime.block_on(self.client.scrape(request))
    }

    pub fn scrape_cancellable(
        &self,
        request: impl Into<ScrapeRequest>,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResult, SteelError> {
        self.runtime
            .block_on(self.client.scrape_cancellable(request, cancel))
    }

    pub fn screenshot(&self, request: impl Into<ScrapeRequest>) -> Result<ScrapeResult, SteelError> {
        self.runtime.block_on(self.client.screenshot(request))
    }

    pub fn extract(
        &self,
        request: impl Into<ScrapeRequest>,
        options: ExtractOptions,
    ) -> Result<ExtractResult, SteelError> {
        self.runtime.block_on(self.client.extract(request, options))
    }

    pub fn extract_content(
        &self,
        content: impl Into<String>,
        options: ExtractOptions,
    ) -> Result<ExtractResult, SteelError> {
        self.runtime
            .block_on(self.client.extract_content(content, options))
    }

    pub fn acquire_session(&self) -> Result<SessionLease, SteelError> {
        self.runtime.block_on(self.client.acquire_session())
    }

    pub fn release_session(&self, lease: &SessionLease) {
        self.runtime.block_on(self.client.release_session(lease))
    }

    /// Run `work` with a leased session; the lease is released even if `work` panics.
    pub fn session_context<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&SessionHandle) -> Result<T, E>,
        E: From<SteelError>,
    {
        let lease = self.acquire_session().map_err(E::from)?;
        let guard = BlockingLease { owner: self, lease };
        let result = work(guard.lease.handle());
        drop(guard);
        result
    }

    pub fn close_session(&self) -> bool {
        self.runtime.block_on(self.client.close_session())
    }

    pub fn cleanup_sessions(&self) -> usize {
        self.runtime.block_on(self.client.cleanup_sessions())
    }

    pub fn session_state(&self) -> SessionState {
        self.client.session_state()
    }

    pub fn session_state_of(&self, session_id: &str) -> SessionState {
        self.client.session_state_of(session_id)
    }

    pub fn stats(&self) -> ClientStats {
        self.client.stats()
    }

    pub fn load(&self, loader: &SteelDocumentLoader) -> Result<Vec<Document>, SteelError> {
        self.runtime.block_on(loader.load())
    }
}

/// Releases the lease when `session_context` unwinds or returns.
struct BlockingLease<'a> {
    owner: &'a BlockingSteelClient,
    lease: SessionLease,
}

impl Drop for BlockingLease<'_> {
    fn drop(&mut self) {
        self.owner.release_session(&self.lease);
    }
}
