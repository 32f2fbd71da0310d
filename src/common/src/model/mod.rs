pub mod post;
pub mod queue;

pub use post::{
    ATTACHMENT_POST_TYPE, INELIGIBLE_POST_TYPES, MediaId, MediaObject, Post, PostId,
    THUMBNAIL_META_KEY, TRASH_STATUS,
};
pub use queue::QueueItem;
