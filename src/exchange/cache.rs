/// Short-TTL caches for balance and position snapshots
///
/// Drivers consult these before hitting the venue; every state-changing call
/// invalidates both caches before returning, whether or not it succeeded.
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const SNAPSHOT_TTL: Duration = Duration::from_secs(15);

/// One cached value with an expiry clock
pub struct TtlCache<T> {
    inner: RwLock<Option<(T, Instant)>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            ttl,
        }
    }

    /// Cached value if still within TTL
    pub async fn get(&self) -> Option<T> {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn put(&self, value: T) {
        let mut guard = self.inner.write().await;
        *guard = Some((value, Instant::now()));
    }

    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }
}
