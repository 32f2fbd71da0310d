use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::store::{NOTICE_KEY_PREFIX, StoreError, SweepStateStore};
use serde::{Deserialize, Serialize};

use crate::error::SweepResult;
use crate::stats::RunStats;

/// Short-lived outcome summary shown to the operator who triggered a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub stats: RunStats,
    /// Unix timestamp (seconds) after which the notice is ignored
    pub expires_at: i64,
}

impl Notice {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

/// Per-operator notice records in the sweep state store.
#[derive(Clone)]
pub struct NoticeBoard {
    state: Arc<dyn SweepStateStore>,
    ttl: Duration,
}

impl NoticeBoard {
    pub fn new(state: Arc<dyn SweepStateStore>, ttl: Duration) -> Self {
        Self { state, ttl }
    }

    /// Add `stats` to the operator's notice, starting a fresh one if the
    /// previous notice expired.
    pub async fn record(&self, operator: &str, stats: &RunStats) -> SweepResult<()> {
        let now = Utc::now().timestamp();
        let key = notice_key(operator);

        let mut total = match self.read(&key).await? {
            Some(notice) if !notice.is_expired(now) => notice.stats,
            _ => RunStats::default(),
        };
        total.merge(stats);

        let notice = Notice {
            stats: total,
            expires_at: now + self.ttl.as_secs() as i64,
        };
        let value = serde_json::to_string(&notice).map_err(StoreError::from)?;
        self.state.set_option(&key, &value).await?;
        Ok(())
    }

    /// Return and clear the operator's notice; expired notices read as absent.
    pub async fn take(&self, operator: &str) -> SweepResult<Option<RunStats>> {
        let key = notice_key(operator);
        let Some(notice) = self.read(&key).await? else {
            return Ok(None);
        };
        self.state.delete_option(&key).await?;

        if notice.is_expired(Utc::now().timestamp()) {
            Ok(None)
        } else {
            Ok(Some(notice.stats))
        }
    }

    async fn read(&self, key: &str) -> SweepResult<Option<Notice>> {
        let Some(raw) = self.state.get_option(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(notice) => Ok(Some(notice)),
            Err(e) => {
                tracing::debug!(key, error = %e, "Discarding unreadable notice");
                Ok(None)
            }
        }
    }
}

/// Option key of an operator's notice; unusual characters are replaced.
fn notice_key(operator: &str) -> String {
    let operator: String = operator
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{NOTICE_KEY_PREFIX}{operator}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_key() {
        assert_eq!(notice_key("admin"), "mediasweep_notice_admin");
        assert_eq!(notice_key("ops@example"), "mediasweep_notice_ops_example");
    }

    #[test]
    fn test_expiry() {
        let notice = Notice {
            stats: RunStats::default(),
            expires_at: 100,
        };
        assert!(!notice.is_expired(99));
        assert!(notice.is_expired(100));
    }
}
