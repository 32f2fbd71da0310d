use std::path::Path;

use sqlx::query;

use crate::config::{DatabaseConfig, ScanConfig};
use crate::model::{ATTACHMENT_POST_TYPE, MediaId, PostId, THUMBNAIL_META_KEY};
use crate::store::SqlStore;

/// Public URL under which seeded media files are served.
pub fn media_url(file_path: &str) -> String {
    format!("https://example.test/wp-content/uploads/{file_path}")
}

/// Fresh in-memory store with the default scan settings.
pub async fn memory_store() -> SqlStore {
    SqlStore::connect(&DatabaseConfig::in_memory())
        .await
        .expect("Failed to open in-memory store")
}

/// Fresh in-memory store whose media files live in `uploads_dir`.
pub async fn memory_store_with_uploads(uploads_dir: &Path, scan: ScanConfig) -> SqlStore {
    let config = DatabaseConfig {
        uploads_dir: uploads_dir.to_path_buf(),
        ..DatabaseConfig::in_memory()
    };
    SqlStore::connect(&config)
        .await
        .expect("Failed to open in-memory store")
        .with_scan_defaults(scan)
}

/// Inserts content rows for tests.
pub struct Seeder<'a> {
    store: &'a SqlStore,
}

impl<'a> Seeder<'a> {
    pub fn new(store: &'a SqlStore) -> Self {
        Self { store }
    }

    /// Published post with the given body.
    pub async fn post(&self, id: PostId, post_type: &str, content: &str) {
        self.post_with_status(id, post_type, "publish", content).await;
    }

    pub async fn post_with_status(&self, id: PostId, post_type: &str, status: &str, content: &str) {
        query("INSERT INTO posts (id, post_type, post_status, content) VALUES ($1, $2, $3, $4)")
            .bind(id)
            .bind(post_type)
            .bind(status)
            .bind(content)
            .execute(self.store.pool())
            .await
            .expect("Failed to insert post");
    }

    pub async fn excerpt(&self, id: PostId, excerpt: &str) {
        query("UPDATE posts SET excerpt = $1 WHERE id = $2")
            .bind(excerpt)
            .bind(id)
            .execute(self.store.pool())
            .await
            .expect("Failed to set excerpt");
    }

    /// Attachment with a file path and the matching [`media_url`].
    pub async fn media(&self, id: MediaId, parent_id: Option<PostId>, file_path: &str) {
        query(
            "INSERT INTO posts (id, post_type, parent_id, attached_file, url) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(ATTACHMENT_POST_TYPE)
        .bind(parent_id)
        .bind(file_path)
        .bind(media_url(file_path))
        .execute(self.store.pool())
        .await
        .expect("Failed to insert media");
    }

    pub async fn postmeta(&self, post_id: PostId, key: &str, value: &str) {
        query("INSERT INTO postmeta (post_id, meta_key, meta_value) VALUES ($1, $2, $3)")
            .bind(post_id)
            .bind(key)
            .bind(value)
            .execute(self.store.pool())
            .await
            .expect("Failed to insert postmeta");
    }

    pub async fn thumbnail(&self, post_id: PostId, media_id: MediaId) {
        self.postmeta(post_id, THUMBNAIL_META_KEY, &media_id.to_string())
            .await;
    }

    pub async fn termmeta(&self, term_id: i64, key: &str, value: &str) {
        query("INSERT INTO termmeta (term_id, meta_key, meta_value) VALUES ($1, $2, $3)")
            .bind(term_id)
            .bind(key)
            .bind(value)
            .execute(self.store.pool())
            .await
            .expect("Failed to insert termmeta");
    }

    pub async fn option(&self, name: &str, value: &str) {
        query(
            "INSERT INTO options (name, value) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET value = excluded.value",
        )
        .bind(name)
        .bind(value)
        .execute(self.store.pool())
        .await
        .expect("Failed to insert option");
    }

    pub async fn comment(&self, id: i64, post_id: PostId, content: &str) {
        query("INSERT INTO comments (id, post_id, content) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(post_id)
            .bind(content)
            .execute(self.store.pool())
            .await
            .expect("Failed to insert comment");
    }
}
