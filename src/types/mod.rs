//! Plain data types exchanged between callers, the client and the remote API.

pub mod request;
pub mod result;
pub mod session;

pub use request::{ExtractOptions, RequestDescriptor, ScrapeRequest};
pub use result::{Content, ExtractResult, PageLink, ResultMetadata, ScrapeResult};
pub use session::{SessionHandle, SessionLease, SessionState};
