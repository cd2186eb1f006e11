use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Remote browser session owned by one client.
///
/// Expiry is computed locally from the creation time and the configured
/// session timeout; the monotonic deadline drives every expiry decision while
/// the wall-clock fields are kept for reporting.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub viewer_url: Option<String>,
    deadline: Instant,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>, lifetime: Duration, viewer_url: Option<String>) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| created_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: id.into(),
            created_at,
            expires_at,
            viewer_url,
            deadline: deadline_after(lifetime),
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

fn deadline_after(lifetime: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(lifetime)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

const FAR_FUTURE_SECS: u64 = 100 * 365 * 24 * 60 * 60;

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("expired", &self.is_expired())
            .finish()
    }
}

/// Lifecycle of the cached session: `absent → creating → active → expiring → closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Creating,
    Active,
    Expiring,
    Closed,
}

/// One caller's claim on a session handle, returned by `acquire()`.
///
/// Releasing the same lease more than once is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLease {
    pub(crate) id: u64,
    pub(crate) handle: SessionHandle,
}

impl SessionLease {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn session_id(&self) -> &str {
        &self.handle.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expiry_follows_the_configured_lifetime() {
        let handle = SessionHandle::new("sess-1", Duration::from_secs(30), None);
        assert!(!handle.is_expired());
        assert_eq!(handle.expires_at - handle.created_at, chrono::Duration::seconds(30));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(handle.remaining(), Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(handle.is_expired());
        assert_eq!(handle.remaining(), Duration::ZERO);
    }
}
