//! Resilient Rust client for the Steel.dev browser automation API.
//!
//! ```no_run
//! # async fn demo() -> Result<(), steel_rs::SteelError> {
//! use steel_rs::{ScrapeRequest, SteelClient};
//!
//! let client = SteelClient::from_env()?;
//! let page = client
//!     .scrape(ScrapeRequest::new("https://example.com").format("markdown"))
//!     .await?;
//! println!("{}", page.content);
//! client.close_session().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod blocking;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod session;
pub mod types;

pub use blocking::BlockingSteelClient;
pub use client::{ClientStats, SteelClient};
pub use config::{OutputFormat, ProxySettings, SteelConfig, SteelConfigOverrides, Verbosity};
pub use error::{ErrorKind, PlanFeature, RemoteFailure, SteelError};
pub use loader::{Document, SteelDocumentLoader};
pub use logging::{LogCallback, SteelLogRecord, SteelLogger};
pub use metrics::{OperationStats, SteelMetrics, SteelOperation};
pub use retry::{RetryController, RetryPolicy};
pub use types::{
    Content, ExtractOptions, ExtractResult, PageLink, RequestDescriptor, ResultMetadata,
    ScrapeRequest, ScrapeResult, SessionHandle, SessionLease, SessionState,
};
