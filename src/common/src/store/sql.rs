use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{AnyPool, Row, query};

use super::probe::{Matcher, ReferenceProbe, ReferenceSource, escape_like};
use super::{
    CUSTOM_LOGO_OPTION, ContentRepository, QUEUE_KEY, SETTINGS_KEY, SITE_ICON_OPTION,
    ScanConfigProvider, StoreError, StoreResult, SweepStateStore,
};
use crate::config::{DatabaseConfig, ScanConfig};
use crate::model::{
    ATTACHMENT_POST_TYPE, MediaId, MediaObject, Post, PostId, QueueItem, THUMBNAIL_META_KEY,
};

/// SQL dialect behind the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

const SCHEMA: [&str; 8] = [
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id BIGINT PRIMARY KEY,
        post_type TEXT NOT NULL,
        post_status TEXT NOT NULL DEFAULT 'publish',
        parent_id BIGINT,
        title TEXT NOT NULL DEFAULT '',
        content TEXT NOT NULL DEFAULT '',
        excerpt TEXT NOT NULL DEFAULT '',
        attached_file TEXT,
        url TEXT
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS postmeta (
        post_id BIGINT NOT NULL,
        meta_key TEXT NOT NULL,
        meta_value TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS postmeta_post_id ON postmeta (post_id)",
    r#"
    CREATE TABLE IF NOT EXISTS termmeta (
        term_id BIGINT NOT NULL,
        meta_key TEXT NOT NULL,
        meta_value TEXT
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS options (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id BIGINT PRIMARY KEY,
        post_id BIGINT NOT NULL,
        content TEXT NOT NULL DEFAULT ''
    )"#,
    r#"
    CREATE TABLE IF NOT EXISTS locks (
        name TEXT PRIMARY KEY,
        token TEXT NOT NULL,
        expires_at BIGINT NOT NULL
    )"#,
    // The queue record always exists so drains can lock its row.
    "INSERT INTO options (name, value) VALUES ('mediasweep_queue', '[]') ON CONFLICT (name) DO NOTHING",
];

const UPSERT_OPTION: &str = r#"
    INSERT INTO options (name, value) VALUES ($1, $2)
    ON CONFLICT (name) DO UPDATE SET value = excluded.value"#;

const ACQUIRE_LOCK: &str = r#"
    INSERT INTO locks (name, token, expires_at) VALUES ($1, $2, $3)
    ON CONFLICT (name) DO UPDATE SET token = excluded.token, expires_at = excluded.expires_at
    WHERE locks.expires_at <= $4"#;

/// Content repository and sweep state on SQLite or PostgreSQL.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    backend: Backend,
    uploads_dir: PathBuf,
    scan_defaults: ScanConfig,
}

impl SqlStore {
    /// Connect to the configured database and initialize the schema.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        install_default_drivers();

        let dsn = config.dsn.as_str();
        log::info!("Connecting to content database with DSN: {dsn}");

        let backend = if dsn.starts_with("sqlite:") {
            Backend::Sqlite
        } else if dsn.starts_with("postgres:") || dsn.starts_with("postgresql:") {
            Backend::Postgres
        } else {
            return Err(StoreError::InvalidRecord(format!(
                "unsupported database DSN '{dsn}', expected sqlite: or postgres:"
            )));
        };

        let options = if backend == Backend::Sqlite && is_sqlite_memory(dsn) {
            // Every connection to :memory: opens a fresh database
            AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(config.max_connections)
        };

        let dsn = match backend {
            Backend::Sqlite => prepare_sqlite_dsn(dsn).await?,
            Backend::Postgres => dsn.to_string(),
        };

        let pool = options.connect(&dsn).await.map_err(|e| {
            log::error!("Failed to connect to database with DSN '{dsn}': {e}");
            e
        })?;

        let store = Self {
            pool,
            backend,
            uploads_dir: config.uploads_dir.clone(),
            scan_defaults: ScanConfig::default(),
        };

        store.init().await.map_err(|e| {
            log::error!("Failed to initialize content schema: {e}");
            e
        })?;
        log::info!("Content schema initialized successfully");
        Ok(store)
    }

    /// Scan settings served while no settings record is stored.
    pub fn with_scan_defaults(mut self, scan_defaults: ScanConfig) -> Self {
        self.scan_defaults = scan_defaults;
        self
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    async fn init(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Remove a post row and its metadata, the permanent deletion that
    /// triggers a sweep. Returns `false` when no such post exists.
    pub async fn delete_post(&self, id: PostId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        query("DELETE FROM postmeta WHERE post_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    /// Read-modify-write of the queue record inside one transaction.
    async fn mutate_queue<F, R>(&self, mutate: F) -> StoreResult<R>
    where
        F: FnOnce(&mut Vec<QueueItem>) -> R + Send,
        R: Send,
    {
        let select = match self.backend {
            Backend::Sqlite => "SELECT value FROM options WHERE name = $1",
            Backend::Postgres => "SELECT value FROM options WHERE name = $1 FOR UPDATE",
        };

        let mut tx = self.pool.begin().await?;
        let raw = query(select)
            .bind(QUEUE_KEY)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| row.try_get::<String, _>(0))
            .transpose()?;

        let mut items = parse_queue(raw.as_deref());
        let result = mutate(&mut items);

        let value = serde_json::to_string(&items)?;
        query(UPSERT_OPTION)
            .bind(QUEUE_KEY)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result)
    }

    async fn option_id(&self, name: &str) -> StoreResult<Option<MediaId>> {
        Ok(self.get_option(name).await?.as_deref().and_then(parse_id))
    }
}

#[async_trait]
impl ContentRepository for SqlStore {
    async fn get_post(&self, id: PostId) -> StoreResult<Option<Post>> {
        let Some(row) =
            query("SELECT id, post_type, post_status, parent_id FROM posts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
        else {
            return Ok(None);
        };

        let thumbnail = query(
            "SELECT meta_value FROM postmeta WHERE post_id = $1 AND meta_key = $2 LIMIT 1",
        )
        .bind(id)
        .bind(THUMBNAIL_META_KEY)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.try_get::<Option<String>, _>(0))
        .transpose()?
        .flatten();

        Ok(Some(Post {
            id: row.try_get("id")?,
            post_type: row.try_get("post_type")?,
            status: row.try_get("post_status")?,
            parent_id: row
                .try_get::<Option<i64>, _>("parent_id")?
                .filter(|id| *id > 0),
            thumbnail_id: thumbnail.as_deref().and_then(parse_id),
        }))
    }

    async fn get_media(&self, id: MediaId) -> StoreResult<Option<MediaObject>> {
        let row = query(
            "SELECT id, parent_id, attached_file, url FROM posts WHERE id = $1 AND post_type = $2",
        )
        .bind(id)
        .bind(ATTACHMENT_POST_TYPE)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(MediaObject {
                id: row.try_get("id")?,
                parent_id: row
                    .try_get::<Option<i64>, _>("parent_id")?
                    .filter(|id| *id > 0),
                file_path: row
                    .try_get::<Option<String>, _>("attached_file")?
                    .filter(|path| !path.is_empty()),
                url: row
                    .try_get::<Option<String>, _>("url")?
                    .filter(|url| !url.is_empty()),
            })
        })
        .transpose()
    }

    async fn attached_media_ids(&self, parent_id: PostId) -> StoreResult<Vec<MediaId>> {
        let rows = query("SELECT id FROM posts WHERE parent_id = $1 AND post_type = $2 ORDER BY id")
            .bind(parent_id)
            .bind(ATTACHMENT_POST_TYPE)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(StoreError::from))
            .collect()
    }

    async fn site_icon_id(&self) -> StoreResult<Option<MediaId>> {
        self.option_id(SITE_ICON_OPTION).await
    }

    async fn custom_logo_id(&self) -> StoreResult<Option<MediaId>> {
        self.option_id(CUSTOM_LOGO_OPTION).await
    }

    async fn media_file_exists(&self, media: &MediaObject) -> StoreResult<bool> {
        match media
            .file_path
            .as_deref()
            .and_then(|path| upload_path(&self.uploads_dir, path))
        {
            Some(path) => Ok(tokio::fs::try_exists(path).await?),
            None => Ok(false),
        }
    }

    async fn find_reference(
        &self,
        probe: &ReferenceProbe,
        exclude_post_id: PostId,
    ) -> StoreResult<bool> {
        if probe.is_empty() {
            return Ok(false);
        }

        let ProbeQuery {
            sql,
            excludes_post,
            params,
        } = ProbeQuery::build(probe);

        let mut statement = query(&sql);
        if excludes_post {
            statement = statement.bind(exclude_post_id);
        }
        for param in params {
            statement = statement.bind(param);
        }

        let mut rows = statement.fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let mut values = Vec::with_capacity(row.len());
            for index in 0..row.len() {
                values.push(row.try_get::<Option<String>, _>(index)?);
            }
            if probe.matches_any(values.iter().map(Option::as_deref)) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    async fn delete_media_and_files(&self, id: MediaId) -> StoreResult<bool> {
        let Some(media) = self.get_media(id).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        query("DELETE FROM postmeta WHERE post_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = query("DELETE FROM posts WHERE id = $1 AND post_type = $2")
            .bind(id)
            .bind(ATTACHMENT_POST_TYPE)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if deleted == 0 {
            return Ok(false);
        }

        if let Some(relative) = media.file_path.as_deref() {
            match upload_path(&self.uploads_dir, relative) {
                Some(path) => match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
                None => log::warn!(
                    "Refusing to remove file '{relative}' of media {id}: path escapes the uploads directory"
                ),
            }
        }

        Ok(true)
    }
}

#[async_trait]
impl SweepStateStore for SqlStore {
    async fn load_queue(&self) -> StoreResult<Vec<QueueItem>> {
        Ok(parse_queue(self.get_option(QUEUE_KEY).await?.as_deref()))
    }

    async fn append_queue(&self, items: &[QueueItem]) -> StoreResult<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.mutate_queue(|queue| queue.extend_from_slice(items))
            .await
    }

    async fn remove_from_queue(&self, processed: &[QueueItem]) -> StoreResult<usize> {
        self.mutate_queue(|queue| {
            for item in processed {
                if let Some(position) = queue.iter().position(|queued| queued == item) {
                    queue.remove(position);
                }
            }
            queue.len()
        })
        .await
    }

    async fn clear_queue(&self) -> StoreResult<usize> {
        self.mutate_queue(|queue| {
            let dropped = queue.len();
            queue.clear();
            dropped
        })
        .await
    }

    async fn try_acquire_lock(
        &self,
        name: &str,
        token: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);

        let acquired = query(ACQUIRE_LOCK)
            .bind(name)
            .bind(token)
            .bind(expires_at)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(acquired == 1)
    }

    async fn renew_lock(&self, name: &str, token: &str, ttl: Duration) -> StoreResult<bool> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let renewed = query("UPDATE locks SET expires_at = $3 WHERE name = $1 AND token = $2")
            .bind(name)
            .bind(token)
            .bind(expires_at)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(renewed == 1)
    }

    async fn release_lock(&self, name: &str, token: &str) -> StoreResult<bool> {
        let released = query("DELETE FROM locks WHERE name = $1 AND token = $2")
            .bind(name)
            .bind(token)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(released > 0)
    }

    async fn lock_expiry(&self, name: &str) -> StoreResult<Option<DateTime<Utc>>> {
        let expires_at = query("SELECT expires_at FROM locks WHERE name = $1 AND expires_at > $2")
            .bind(name)
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get::<i64, _>(0))
            .transpose()?;

        Ok(expires_at.and_then(DateTime::from_timestamp_millis))
    }

    async fn get_option(&self, name: &str) -> StoreResult<Option<String>> {
        let value = query("SELECT value FROM options WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.try_get::<String, _>(0))
            .transpose()?;
        Ok(value)
    }

    async fn set_option(&self, name: &str, value: &str) -> StoreResult<()> {
        query(UPSERT_OPTION)
            .bind(name)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_option(&self, name: &str) -> StoreResult<()> {
        query("DELETE FROM options WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ScanConfigProvider for SqlStore {
    /// Stored settings merged field by field over the configured defaults.
    async fn scan_config(&self) -> StoreResult<ScanConfig> {
        let Some(raw) = self.get_option(SETTINGS_KEY).await? else {
            return Ok(self.scan_defaults.clone());
        };

        match merge_scan_config(&self.scan_defaults, &raw) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable scan settings record");
                Ok(self.scan_defaults.clone())
            }
        }
    }
}

fn merge_scan_config(defaults: &ScanConfig, raw: &str) -> Result<ScanConfig, serde_json::Error> {
    let mut merged = serde_json::to_value(defaults)?;
    let stored: serde_json::Value = serde_json::from_str(raw)?;

    if let (Some(target), serde_json::Value::Object(fields)) = (merged.as_object_mut(), stored) {
        for (key, value) in fields {
            if !value.is_null() {
                target.insert(key, value);
            }
        }
    }

    serde_json::from_value(merged)
}

/// Parse the queue record leniently: anything but an array is an empty
/// queue, and unreadable elements become malformed items.
fn parse_queue(raw: Option<&str>) -> Vec<QueueItem> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Array(entries)) => entries
            .into_iter()
            .map(|entry| serde_json::from_value(entry).unwrap_or_default())
            .collect(),
        _ => {
            tracing::warn!("Queue record is not a JSON array, treating it as empty");
            Vec::new()
        }
    }
}

fn parse_id(raw: &str) -> Option<MediaId> {
    raw.trim().parse::<MediaId>().ok().filter(|id| *id > 0)
}

/// Resolve a stored relative file path inside the uploads directory.
fn upload_path(uploads_dir: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let contained = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    contained.then(|| uploads_dir.join(relative))
}

fn is_sqlite_memory(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

/// Add `mode=rwc` to file DSNs and create the parent directory.
async fn prepare_sqlite_dsn(dsn: &str) -> StoreResult<String> {
    if is_sqlite_memory(dsn) {
        return Ok(dsn.to_string());
    }

    let path = dsn
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    Ok(if dsn.contains("mode=") {
        dsn.to_string()
    } else if dsn.contains('?') {
        format!("{dsn}&mode=rwc")
    } else {
        format!("{dsn}?mode=rwc")
    })
}

/// SQL narrowing for a probe: every matcher/column pair becomes one
/// disjunct with its own parameter.
struct ProbeQuery {
    sql: String,
    excludes_post: bool,
    params: Vec<String>,
}

impl ProbeQuery {
    fn build(probe: &ReferenceProbe) -> Self {
        let (base, columns, excludes_post): (&str, &[&str], bool) = match probe.source {
            ReferenceSource::Thumbnail => (
                "SELECT pm.meta_value FROM postmeta pm JOIN posts p ON p.id = pm.post_id \
                 WHERE pm.meta_key = '_thumbnail_id' AND p.id <> $1 AND p.post_status <> 'trash'",
                &["pm.meta_value"],
                true,
            ),
            ReferenceSource::PostContent => (
                "SELECT p.content, p.excerpt FROM posts p \
                 WHERE p.id <> $1 AND p.post_status <> 'trash' \
                 AND p.post_type NOT IN ('revision', 'nav_menu_item', 'attachment')",
                &["p.content", "p.excerpt"],
                true,
            ),
            ReferenceSource::PostMeta => (
                "SELECT pm.meta_value FROM postmeta pm JOIN posts p ON p.id = pm.post_id \
                 WHERE p.id <> $1 AND p.post_status <> 'trash'",
                &["pm.meta_value"],
                true,
            ),
            ReferenceSource::TermMeta => (
                "SELECT tm.meta_value FROM termmeta tm WHERE 1 = 1",
                &["tm.meta_value"],
                false,
            ),
            ReferenceSource::Options => (
                r"SELECT o.value FROM options o WHERE o.name NOT LIKE 'mediasweep\_%' ESCAPE '\'",
                &["o.value"],
                false,
            ),
            ReferenceSource::Comments => (
                "SELECT c.content FROM comments c WHERE 1 = 1",
                &["c.content"],
                false,
            ),
        };

        let mut next_param = if excludes_post { 2 } else { 1 };
        let mut params = Vec::new();
        let mut disjuncts = Vec::new();

        for matcher in &probe.matchers {
            for column in columns {
                let (condition, param) = match matcher {
                    Matcher::Exact(text) => (format!("{column} = ${next_param}"), text.clone()),
                    Matcher::Contains(text) => (
                        format!(r"LOWER({column}) LIKE LOWER(${next_param}) ESCAPE '\'"),
                        format!("%{}%", escape_like(text)),
                    ),
                    Matcher::Pattern { needle, .. } => (
                        format!(r"{column} LIKE ${next_param} ESCAPE '\'"),
                        format!("%{}%", escape_like(needle)),
                    ),
                };
                disjuncts.push(condition);
                params.push(param);
                next_param += 1;
            }
        }

        Self {
            sql: format!("{base} AND ({})", disjuncts.join(" OR ")),
            excludes_post,
            params,
        }
    }
}
