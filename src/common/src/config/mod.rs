use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::{INELIGIBLE_POST_TYPES, MediaId};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mediasweep.toml";

/// Environment prefix; nested keys are split on `__`.
pub const ENV_PREFIX: &str = "MEDIASWEEP__";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite or PostgreSQL DSN of the content store
    pub dsn: String,
    /// Directory that media file paths are relative to
    pub uploads_dir: PathBuf,
    /// Upper bound for pooled connections (in-memory SQLite always uses one)
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dsn: String::from("sqlite://.data/mediasweep.db"),
            uploads_dir: PathBuf::from(".data/uploads"),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    /// Create an in-memory database configuration, mostly for tests.
    pub fn in_memory() -> Self {
        Self {
            dsn: String::from("sqlite::memory:"),
            ..Default::default()
        }
    }
}

/// Switches that decide which reference checks run and which media are exempt.
///
/// The four cheap checks are enabled by default, the three deep scans are
/// not. Every field falls back to its default individually so that a
/// partially stored settings record still yields a complete configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Match ID-bearing markup (classes, block JSON, data attributes, gallery ids) in post bodies
    pub content_regex: bool,
    /// Match the media file's basename inside post bodies
    pub filename_like: bool,
    /// Match the media ID inside other posts' metadata
    pub postmeta_id: bool,
    /// Match the media URL or URL path inside other posts' metadata
    pub postmeta_url: bool,
    /// Match the media URL or URL path inside term metadata
    pub termmeta_url: bool,
    /// Match the media URL or URL path inside site options
    pub options_url: bool,
    /// Match the media URL or URL path inside comment bodies
    pub comments_url: bool,
    /// Defer deletions to the background queue instead of deleting inline
    pub background_processing: bool,
    /// Post types whose deletion triggers cleanup; empty means all but the ineligible types
    pub allowed_post_types: Vec<String>,
    /// Media that are never deleted, whatever the scan says
    pub protected_media_ids: Vec<MediaId>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            content_regex: true,
            filename_like: true,
            postmeta_id: true,
            postmeta_url: true,
            termmeta_url: false,
            options_url: false,
            comments_url: false,
            background_processing: true,
            allowed_post_types: Vec::new(),
            protected_media_ids: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// Whether the media ID is on the protected list.
    pub fn is_protected(&self, media_id: MediaId) -> bool {
        self.protected_media_ids.contains(&media_id)
    }

    /// Whether deleting a post of this type may trigger cleanup.
    ///
    /// A non-empty allow-list replaces the default deny-list entirely.
    pub fn is_post_type_supported(&self, post_type: &str) -> bool {
        if self.allowed_post_types.is_empty() {
            !INELIGIBLE_POST_TYPES.contains(&post_type)
        } else {
            self.allowed_post_types.iter().any(|t| t == post_type)
        }
    }
}

/// Batching, time budget and scheduling parameters of the deletion queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queue items processed by a single drain
    pub batch_size: usize,
    /// Wall-clock budget of a single drain
    #[serde(with = "humantime_serde")]
    pub time_budget: Duration,
    /// Expiry of the drain lock, the only recovery path for a crashed drain
    #[serde(with = "humantime_serde")]
    pub lock_ttl: Duration,
    /// Delay of the first drain after items were enqueued
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Retry delay when another drain holds the lock
    #[serde(with = "humantime_serde")]
    pub contention_delay: Duration,
    /// Delay of the follow-up drain when items remain
    #[serde(with = "humantime_serde")]
    pub continue_delay: Duration,
    /// Overall budget of an operator-triggered "run now"
    #[serde(with = "humantime_serde")]
    pub run_now_budget: Duration,
    /// Hard cap on drains performed by one "run now"
    pub run_now_max_iterations: usize,
    /// Interval of the worker's safety-net drain
    #[serde(with = "humantime_serde")]
    pub fallback_interval: Duration,
    /// How often the worker re-reads the stored drain schedule
    #[serde(with = "humantime_serde")]
    pub schedule_poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            time_budget: Duration::from_secs(20),
            lock_ttl: Duration::from_secs(120),
            initial_delay: Duration::from_secs(10),
            contention_delay: Duration::from_secs(60),
            continue_delay: Duration::from_secs(15),
            run_now_budget: Duration::from_secs(25),
            run_now_max_iterations: 10,
            fallback_interval: Duration::from_secs(3600),
            schedule_poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NoticeConfig {
    /// How long an operator's outcome notice stays readable
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Content store connection
    pub database: DatabaseConfig,
    /// Fallback scan settings, used while no settings record is stored
    pub scan: ScanConfig,
    /// Deletion queue parameters
    pub queue: QueueConfig,
    /// Operator notices
    pub notices: NoticeConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject settings the queue processor cannot operate with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.dsn.is_empty() {
            anyhow::bail!("database.dsn cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be positive");
        }

        if self.queue.batch_size == 0 {
            anyhow::bail!("queue.batch_size must be positive, got 0");
        }

        if self.queue.lock_ttl.is_zero() {
            anyhow::bail!("queue.lock_ttl must be positive");
        }

        if self.queue.time_budget >= self.queue.lock_ttl {
            anyhow::bail!(
                "queue.time_budget ({:?}) must be shorter than queue.lock_ttl ({:?})",
                self.queue.time_budget,
                self.queue.lock_ttl
            );
        }

        if self.queue.run_now_max_iterations == 0 {
            anyhow::bail!("queue.run_now_max_iterations must be positive, got 0");
        }

        if self.queue.fallback_interval.is_zero() {
            anyhow::bail!("queue.fallback_interval must be positive");
        }

        if self.queue.schedule_poll_interval.is_zero() {
            anyhow::bail!("queue.schedule_poll_interval must be positive");
        }

        Ok(())
    }
}
