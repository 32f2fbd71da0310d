use serde::{Deserialize, Serialize};

pub type PostId = i64;
pub type MediaId = i64;

/// Post type of media objects.
pub const ATTACHMENT_POST_TYPE: &str = "attachment";

/// Post types whose deletion never triggers media cleanup by default.
pub const INELIGIBLE_POST_TYPES: [&str; 3] = ["revision", "nav_menu_item", ATTACHMENT_POST_TYPE];

/// Lifecycle state excluded from every reference check.
pub const TRASH_STATUS: &str = "trash";

/// Metadata key holding a post's featured image.
pub const THUMBNAIL_META_KEY: &str = "_thumbnail_id";

/// Snapshot of a content item.
///
/// Deletion events carry the snapshot taken before the row was removed, so
/// the featured image is part of it rather than looked up afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub post_type: String,
    pub status: String,
    pub parent_id: Option<PostId>,
    pub thumbnail_id: Option<MediaId>,
}

impl Post {
    pub fn new(id: PostId, post_type: impl Into<String>) -> Self {
        Self {
            id,
            post_type: post_type.into(),
            status: "publish".to_string(),
            parent_id: None,
            thumbnail_id: None,
        }
    }

    pub fn with_thumbnail(mut self, thumbnail_id: MediaId) -> Self {
        self.thumbnail_id = Some(thumbnail_id);
        self
    }

    pub fn is_trashed(&self) -> bool {
        self.status == TRASH_STATUS
    }
}

/// A binary asset record: an attachment row plus its stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaObject {
    pub id: MediaId,
    /// Owning post; media linked only as a featured image may have none
    pub parent_id: Option<PostId>,
    /// File path relative to the uploads directory
    pub file_path: Option<String>,
    /// Canonical public URL
    pub url: Option<String>,
}

impl MediaObject {
    /// Final path component of the stored file, if any.
    pub fn basename(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .and_then(|path| path.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
    }

    /// Path component of the canonical URL (`/uploads/2024/05/cat.jpg`).
    pub fn url_path(&self) -> Option<String> {
        let url = self.url.as_deref()?;
        let parsed = url::Url::parse(url).ok()?;
        let path = parsed.path();
        if path.is_empty() || path == "/" {
            None
        } else {
            Some(path.to_string())
        }
    }
}
