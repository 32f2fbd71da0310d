use std::sync::Arc;
use std::time::Duration;

use common::store::{QUEUE_LOCK_NAME, StoreResult, SweepStateStore};
use uuid::Uuid;

/// Held drain lock. Expiry is the only recovery path if the holder dies
/// without releasing it.
pub struct QueueLock {
    state: Arc<dyn SweepStateStore>,
    token: String,
    ttl: Duration,
}

impl QueueLock {
    /// Try to take the lock; `None` means another drain holds it.
    pub async fn acquire(
        state: Arc<dyn SweepStateStore>,
        ttl: Duration,
    ) -> StoreResult<Option<Self>> {
        let token = Uuid::new_v4().to_string();
        if state.try_acquire_lock(QUEUE_LOCK_NAME, &token, ttl).await? {
            tracing::debug!(token = %token, ttl = ?ttl, "Acquired queue lock");
            Ok(Some(Self { state, token, ttl }))
        } else {
            Ok(None)
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Restart the expiry while work is in progress; `false` once another
    /// drain has taken the lock over.
    pub async fn renew(&self) -> StoreResult<bool> {
        let renewed = self
            .state
            .renew_lock(QUEUE_LOCK_NAME, &self.token, self.ttl)
            .await?;
        if !renewed {
            tracing::warn!(token = %self.token, "Queue lock was taken over");
        }
        Ok(renewed)
    }

    /// Release the lock; `false` if it had already expired and been taken over.
    pub async fn release(self) -> StoreResult<bool> {
        let released = self.state.release_lock(QUEUE_LOCK_NAME, &self.token).await?;
        if !released {
            tracing::warn!(token = %self.token, "Queue lock expired before release");
        }
        Ok(released)
    }
}
