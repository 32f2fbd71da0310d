#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use common::config::Configuration;
use common::model::{MediaId, Post, PostId};
use common::store::{ContentRepository, SqlStore};
use common::testing::{Seeder, memory_store_with_uploads};
use sweeper::{DrainScheduler, Hooks, Sweeper};
use tempfile::TempDir;

pub struct Harness {
    pub store: Arc<SqlStore>,
    pub scheduler: Arc<DrainScheduler>,
    pub sweeper: Sweeper,
    pub uploads: TempDir,
}

impl Harness {
    pub async fn new(config: Configuration) -> Self {
        Self::with_hooks(config, Hooks::new()).await
    }

    pub async fn with_hooks(config: Configuration, hooks: Hooks) -> Self {
        let uploads = tempfile::tempdir().expect("Failed to create uploads dir");
        let store = Arc::new(memory_store_with_uploads(uploads.path(), config.scan.clone()).await);
        let scheduler = Arc::new(DrainScheduler::new());
        let sweeper = Sweeper::new(store.clone(), scheduler.clone(), hooks, &config)
            .expect("Failed to build sweeper");

        Self {
            store,
            scheduler,
            sweeper,
            uploads,
        }
    }

    pub fn seed(&self) -> Seeder<'_> {
        Seeder::new(&self.store)
    }

    /// Attachment with a real file in the uploads directory.
    pub async fn media_with_file(&self, id: MediaId, parent_id: Option<PostId>) -> String {
        let file_path = format!("2024/05/media-{id}.jpg");
        write_upload(self.uploads.path(), &file_path);
        self.seed().media(id, parent_id, &file_path).await;
        file_path
    }

    pub fn upload_exists(&self, file_path: &str) -> bool {
        self.uploads.path().join(file_path).exists()
    }

    pub async fn media_exists(&self, id: MediaId) -> bool {
        self.store
            .get_media(id)
            .await
            .expect("Failed to get media")
            .is_some()
    }

    /// Remove the post row and return the snapshot taken just before.
    pub async fn delete_post(&self, id: PostId) -> Post {
        let post = self
            .store
            .get_post(id)
            .await
            .expect("Failed to get post")
            .expect("Post should exist");
        self.store
            .delete_post(id)
            .await
            .expect("Failed to delete post");
        post
    }

    /// Post 1 owns media 10 and 11, with 11 as its featured image; post 2
    /// also features media 11.
    pub async fn seed_shared_thumbnail_scenario(&self) {
        let seed = self.seed();
        seed.post(1, "post", "<p>first</p>").await;
        seed.post(2, "post", "<p>second</p>").await;
        self.media_with_file(10, Some(1)).await;
        self.media_with_file(11, Some(1)).await;
        seed.thumbnail(1, 11).await;
        seed.thumbnail(2, 11).await;
    }
}

pub fn write_upload(root: &Path, file_path: &str) {
    let path = root.join(file_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create upload dirs");
    }
    std::fs::write(path, b"image").expect("Failed to write upload");
}
