//! Thread-safe owner of the live portal session.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::PortalSession;

/// Shared holder for the current [`PortalSession`].
///
/// The handle is the only component allowed to shut a session down.
/// Consumers take one scoped acquisition via [`current`](Self::current);
/// if the supervisor performs a [`replace`](Self::replace) concurrently,
/// the consumer's in-flight call fails against the dead browser and the
/// fail-over ladder retries against the new one.
pub struct SessionHandle {
    inner: RwLock<Arc<PortalSession>>,
}

impl SessionHandle {
    /// Wrap an initial session.
    pub fn new(session: PortalSession) -> Self {
        Self {
            inner: RwLock::new(Arc::new(session)),
        }
    }

    /// The current session, for a single scoped use.
    pub async fn current(&self) -> Arc<PortalSession> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Atomically install a new session, shutting down the previous one.
    pub async fn replace(&self, session: PortalSession) {
        let mut guard = self.inner.write().await;
        guard.shutdown();
        *guard = Arc::new(session);
    }

    /// Shut down the current session (process exit path).
    pub async fn dispose(&self) {
        self.inner.write().await.shutdown();
    }
}
