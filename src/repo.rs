use chrono::{DateTime, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("thread locked")] Locked,
    #[error("internal error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Outcome of a soft delete. `Deleted` carries the row as it was before the
/// flag flipped so the caller can remove its files.
#[derive(Debug, Clone)]
pub enum SoftDelete {
    Deleted(Post),
    AlreadyDeleted,
}

use async_trait::async_trait;

#[async_trait]
pub trait PostRepo: Send + Sync {
    /// Insert a thread or reply in one transaction: for replies the parent is
    /// re-checked (must be a live, unlocked thread admitted by
    /// `parent_visibility`) and bumped; mention edges are recorded last.
    async fn insert_post(&self, new: NewPost, parent_visibility: Visibility) -> RepoResult<Post>;
    /// Any row, including soft-deleted ones.
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    /// Threads ordered sticky first, then most recently bumped.
    async fn list_threads(&self, vis: Visibility, offset: i64, limit: i64) -> RepoResult<Vec<Post>>;
    async fn count_threads(&self, vis: Visibility) -> RepoResult<i64>;
    /// Replies of a thread in creation order.
    async fn list_replies(&self, thread_id: Id, vis: Visibility) -> RepoResult<Vec<Post>>;
    /// The newest `limit` replies, returned in creation order.
    async fn latest_replies(&self, thread_id: Id, vis: Visibility, limit: i64) -> RepoResult<Vec<Post>>;
    async fn reply_stats(&self, thread_id: Id, vis: Visibility) -> RepoResult<ReplyStats>;
    /// Live, unapproved posts, oldest first.
    async fn list_pending(&self) -> RepoResult<Vec<Post>>;
    /// Idempotent; `approved_at` is only stamped on the first approval.
    async fn approve_post(&self, id: Id, at: DateTime<Utc>) -> RepoResult<Post>;
    async fn soft_delete_post(&self, id: Id) -> RepoResult<SoftDelete>;
    /// Remove the row, and for a thread every reply, plus all mention edges
    /// touching the removed ids. Returns the removed rows.
    async fn hard_delete_post(&self, id: Id) -> RepoResult<Vec<Post>>;
    /// `None` when `id` is not a thread.
    async fn update_thread_flag(&self, id: Id, flag: ThreadFlag, change: FlagChange) -> RepoResult<Option<bool>>;
    async fn edit_message(&self, id: Id, message: &str) -> RepoResult<Post>;
}

#[async_trait]
pub trait MentionRepo: Send + Sync {
    /// Record one edge per distinct live target mentioned in `text`.
    /// Returns the targets that got an edge.
    async fn register_mentions(&self, source_id: Id, text: &str) -> RepoResult<Vec<Id>>;
    /// Sources mentioning `target_id` that `vis` admits, newest edge first.
    async fn backlinks(&self, target_id: Id, vis: Visibility) -> RepoResult<Vec<Id>>;
    /// Raw edges with `id` on either end, unfiltered.
    async fn mentions_touching(&self, id: Id) -> RepoResult<Vec<Mention>>;
}

#[async_trait]
pub trait SettingsRepo: Send + Sync {
    async fn get_setting(&self, key: &str) -> RepoResult<Option<String>>;
    /// Upsert, last write wins.
    async fn set_setting(&self, key: &str, value: &str) -> RepoResult<Setting>;
    /// Insert only when the key is absent.
    async fn seed_setting(&self, key: &str, value: &str) -> RepoResult<()>;
    async fn list_settings(&self) -> RepoResult<Vec<Setting>>;
}

pub trait Repo: PostRepo + MentionRepo + SettingsRepo {}

impl<T> Repo for T where T: PostRepo + MentionRepo + SettingsRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem;

#[cfg(feature = "postgres-store")]
pub mod pg;
