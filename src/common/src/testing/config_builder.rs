//! Test configuration builder for creating test setups quickly.

use std::path::Path;
use std::time::Duration;

use crate::config::{Configuration, DatabaseConfig};
use crate::model::MediaId;

/// Builder for creating test configurations.
///
/// Starts from an in-memory database and the documented defaults; queue
/// delays and budgets can be tightened for fast tests.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_batch_size(2)
///     .inline()
///     .protect(99)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    /// Create a builder using `sqlite::memory:` and default settings.
    pub fn new() -> Self {
        Self {
            config: Configuration {
                database: DatabaseConfig::in_memory(),
                ..Configuration::default()
            },
        }
    }

    pub fn with_uploads_dir(mut self, dir: &Path) -> Self {
        self.config.database.uploads_dir = dir.to_path_buf();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.queue.batch_size = batch_size;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.config.queue.time_budget = budget;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.config.queue.lock_ttl = ttl;
        self
    }

    pub fn with_run_now(mut self, budget: Duration, max_iterations: usize) -> Self {
        self.config.queue.run_now_budget = budget;
        self.config.queue.run_now_max_iterations = max_iterations;
        self
    }

    /// Process deletions synchronously instead of queueing them.
    pub fn inline(mut self) -> Self {
        self.config.scan.background_processing = false;
        self
    }

    /// Enable the three deep scans as well.
    pub fn with_all_scans(mut self) -> Self {
        self.config.scan.termmeta_url = true;
        self.config.scan.options_url = true;
        self.config.scan.comments_url = true;
        self
    }

    pub fn protect(mut self, media_id: MediaId) -> Self {
        self.config.scan.protected_media_ids.push(media_id);
        self
    }

    pub fn allow_post_type(mut self, post_type: &str) -> Self {
        self.config.scan.allowed_post_types.push(post_type.to_string());
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}
