//! Post lifecycle: creation through the submission gate, moderation
//! transitions, and the read projections renderers consume.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use crate::config::BoardConfig;
use crate::error::{BoardError, PolicyRejection};
use crate::gate::{check_target, SubmissionGate, Visitor};
use crate::metrics::{MODERATION_ACTIONS, POSTS_CREATED, POSTS_DELETED, POSTS_REJECTED};
use crate::models::*;
use crate::password::{hash_password, verify_password};
use crate::rate_limit::SpamThrottle;
use crate::repo::{Repo, RepoError, SoftDelete};
use crate::settings::{BoardPolicy, SettingsStore};
use crate::storage::{public_path, upload_name, MediaStore, PendingUploads, StoredMedia};
use crate::word_filter::{FilterKind, WordFilterStore, WordFilters};

pub const MAX_MESSAGE_CHARS: usize = 5000;
pub const MAX_NAME_CHARS: usize = 35;
pub const MAX_SUBJECT_CHARS: usize = 100;

/// A post as typed by its author, before validation.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(default)]
pub struct Submission {
    /// Ignored on replies.
    pub subject: Option<String>,
    pub message: String,
    pub name: Option<String>,
    /// Delete password; only its hash is kept.
    pub password: Option<String>,
    /// Name returned by the upload endpoint.
    pub media: Option<String>,
    pub spoiler: bool,
}

impl Submission {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Default::default() }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_media(mut self, name: impl Into<String>, spoiler: bool) -> Self {
        self.media = Some(name.into());
        self.spoiler = spoiler;
        self
    }
}

/// Privileged poster as established by the auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moderator {
    pub capcode: Capcode,
}

struct Cleaned {
    subject: Option<String>,
    message: String,
    name: Option<String>,
    password: Option<String>,
    media: Option<String>,
    spoiler: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn within(field: &str, value: Option<String>, max: usize) -> Result<Option<String>, BoardError> {
    match non_blank(value) {
        Some(v) if v.chars().count() > max => {
            Err(BoardError::Validation(format!("{field} exceeds {max} characters")))
        }
        other => Ok(other),
    }
}

/// Trimmed message, rejecting blank or oversized text.
pub fn validate_message(message: &str) -> Result<String, BoardError> {
    let message = message.trim();
    if message.is_empty() {
        return Err(BoardError::Validation("message must not be empty".into()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(BoardError::Validation(format!("message exceeds {MAX_MESSAGE_CHARS} characters")));
    }
    Ok(message.to_string())
}

fn clean(sub: Submission) -> Result<Cleaned, BoardError> {
    Ok(Cleaned {
        message: validate_message(&sub.message)?,
        subject: within("subject", sub.subject, MAX_SUBJECT_CHARS)?,
        name: within("name", sub.name, MAX_NAME_CHARS)?,
        password: non_blank(sub.password),
        media: non_blank(sub.media),
        spoiler: sub.spoiler,
    })
}

fn rejected(r: PolicyRejection) -> BoardError {
    let reason = match r {
        PolicyRejection::ReadOnly => "read_only",
        PolicyRejection::Locked => "locked",
        PolicyRejection::Cooldown { .. } => "cooldown",
        PolicyRejection::BlockedWord(_) => "blocked_word",
    };
    metrics::counter!(POSTS_REJECTED, "reason" => reason).increment(1);
    r.into()
}

/// An upload taken out of the pending set for one draft.
struct Claim {
    name: String,
    issued_at: DateTime<Utc>,
}

fn kind_label(post: &Post) -> &'static str {
    if post.is_reply() { "reply" } else { "thread" }
}

#[derive(Debug, Clone, Copy)]
struct Listing {
    page_size: i64,
    catalog_limit: i64,
    preview_replies: i64,
}

#[derive(Clone)]
pub struct Board {
    repo: Arc<dyn Repo>,
    media: Arc<dyn MediaStore>,
    settings: SettingsStore,
    gate: SubmissionGate,
    uploads: PendingUploads,
    listing: Listing,
    max_upload_bytes: usize,
}

impl Board {
    pub fn new(repo: Arc<dyn Repo>, media: Arc<dyn MediaStore>, filters: WordFilterStore, cfg: &BoardConfig) -> Self {
        Self {
            settings: SettingsStore::new(repo.clone()),
            gate: SubmissionGate::new(filters, SpamThrottle::new(cfg.anti_spam_secs)),
            uploads: PendingUploads::new(cfg.upload_ttl_secs),
            listing: Listing {
                page_size: cfg.page_size.max(1),
                catalog_limit: cfg.catalog_limit.max(1),
                preview_replies: cfg.preview_replies.max(0),
            },
            max_upload_bytes: cfg.max_upload_bytes,
            repo,
            media,
        }
    }

    pub fn repo(&self) -> &Arc<dyn Repo> {
        &self.repo
    }

    pub fn media(&self) -> &Arc<dyn MediaStore> {
        &self.media
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    pub async fn policy(&self) -> Result<BoardPolicy, BoardError> {
        Ok(self.settings.policy().await?)
    }

    // ---------------- creation ----------------

    pub async fn create_thread(&self, visitor: &Visitor, sub: Submission) -> Result<Post, BoardError> {
        let now = Utc::now();
        let c = clean(sub)?;
        let policy = self.policy().await?;
        self.screen(&policy, visitor, &c.message, now)?;
        let draft = NewPost::thread(c.subject.clone(), c.message.clone());
        let (draft, claim) = self.finish_draft(draft, c, visitor.poster_hash.clone()).await?;
        let post = self.insert(draft.approved(!policy.requires_approval), claim, Visibility::Public).await?;
        self.gate.record_accepted(visitor, now);
        self.created(&post);
        Ok(post)
    }

    pub async fn create_reply(&self, visitor: &Visitor, thread_id: Id, sub: Submission) -> Result<Post, BoardError> {
        let now = Utc::now();
        let c = clean(sub)?;
        let policy = self.policy().await?;
        self.screen(&policy, visitor, &c.message, now)?;
        check_target(self.repo.as_ref(), thread_id, Visibility::Public).await?;
        let draft = NewPost::reply(thread_id, c.message.clone());
        let (draft, claim) = self.finish_draft(draft, c, visitor.poster_hash.clone()).await?;
        // the repository re-checks the parent inside its transaction
        let post = self.insert(draft.approved(!policy.requires_approval), claim, Visibility::Public).await?;
        self.gate.record_accepted(visitor, now);
        self.created(&post);
        Ok(post)
    }

    /// Moderator thread: auto-approved, capcoded, not subject to read-only
    /// mode, the throttle or the word filter.
    pub async fn mod_create_thread(&self, moderator: &Moderator, sub: Submission) -> Result<Post, BoardError> {
        let c = clean(sub)?;
        let draft = NewPost::thread(c.subject.clone(), c.message.clone());
        let (draft, claim) = self.finish_privileged(draft, c, moderator).await?;
        let post = self.insert(draft, claim, Visibility::Moderator).await?;
        self.created(&post);
        Ok(post)
    }

    /// Moderator reply. Locked threads still refuse it; the target only
    /// needs to be live, not approved.
    pub async fn mod_create_reply(&self, moderator: &Moderator, thread_id: Id, sub: Submission) -> Result<Post, BoardError> {
        let c = clean(sub)?;
        check_target(self.repo.as_ref(), thread_id, Visibility::Moderator).await?;
        let draft = NewPost::reply(thread_id, c.message.clone());
        let (draft, claim) = self.finish_privileged(draft, c, moderator).await?;
        let post = self.insert(draft, claim, Visibility::Moderator).await?;
        self.created(&post);
        Ok(post)
    }

    fn screen(&self, policy: &BoardPolicy, visitor: &Visitor, message: &str, now: DateTime<Utc>) -> Result<(), BoardError> {
        self.gate.screen(policy, visitor, message, now).map_err(rejected)
    }

    async fn finish_draft(&self, draft: NewPost, c: Cleaned, poster_hash: Option<String>) -> Result<(NewPost, Option<Claim>), BoardError> {
        let password_hash = match c.password.as_deref() {
            Some(pw) => Some(
                hash_password(pw).map_err(|e| BoardError::Storage(format!("password hashing failed: {e}")))?,
            ),
            None => None,
        };
        let (attachment, claim) = match c.media.as_deref() {
            Some(raw) => {
                let claim = self.claim_upload(raw)?;
                match self.media.resolve(&claim.name).await {
                    Ok(attachment) => (Some(attachment), Some(claim)),
                    Err(e) => {
                        self.uploads.release(&claim.name, claim.issued_at);
                        return Err(e.into());
                    }
                }
            }
            None => (None, None),
        };
        let draft = draft
            .with_name(c.name.unwrap_or_else(|| ANONYMOUS.to_string()))
            .with_attachment(attachment, c.spoiler)
            .with_password_hash(password_hash)
            .with_poster_hash(poster_hash);
        Ok((draft, claim))
    }

    async fn finish_privileged(
        &self,
        draft: NewPost,
        mut c: Cleaned,
        moderator: &Moderator,
    ) -> Result<(NewPost, Option<Claim>), BoardError> {
        if c.name.is_none() {
            c.name = Some(moderator.capcode.as_str().to_string());
        }
        let (draft, claim) = self.finish_draft(draft, c, None).await?;
        Ok((draft.with_capcode(Some(moderator.capcode)).approved(true), claim))
    }

    /// Only names handed out by [`Board::upload`] and not yet attached are
    /// accepted, so a post can never adopt another post's file.
    fn claim_upload(&self, raw: &str) -> Result<Claim, BoardError> {
        let name = upload_name(raw);
        match self.uploads.claim(name) {
            Some(issued_at) => Ok(Claim { name: name.to_string(), issued_at }),
            None => {
                debug!(upload = name, "upload not pending");
                Err(BoardError::Validation("unknown upload".into()))
            }
        }
    }

    async fn insert(&self, draft: NewPost, claim: Option<Claim>, vis: Visibility) -> Result<Post, BoardError> {
        match self.repo.insert_post(draft, vis).await {
            Ok(post) => Ok(post),
            Err(e) => {
                if let Some(claim) = claim {
                    self.uploads.release(&claim.name, claim.issued_at);
                }
                Err(e.into())
            }
        }
    }

    // ---------------- uploads ----------------

    /// Screen and store an upload, returning the name a post may attach
    /// once. Moderators skip read-only mode and the cooldown.
    pub async fn upload(&self, visitor: &Visitor, moderator: Option<&Moderator>, bytes: &[u8]) -> Result<StoredMedia, BoardError> {
        let now = Utc::now();
        if moderator.is_none() {
            let policy = self.policy().await?;
            self.gate.screen_upload(&policy, visitor, now).map_err(rejected)?;
        }
        self.sweep_uploads(now).await;
        let stored = self.media.save(bytes).await.map_err(BoardError::Upload)?;
        self.uploads.issue(&stored.name, now);
        info!(upload = %stored.name, size = stored.size, mime = %stored.mime, "upload stored");
        Ok(stored)
    }

    /// Remove uploads nobody attached within the TTL. Returns how many
    /// were dropped.
    pub async fn sweep_uploads(&self, now: DateTime<Utc>) -> usize {
        let expired = self.uploads.expire(now);
        for name in &expired {
            let attachment = Attachment { media: public_path(name), thumb: None };
            if let Err(e) = self.media.delete(&attachment).await {
                error!(upload = %name, error = %e, "failed to remove expired upload");
            }
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired uploads removed");
        }
        expired.len()
    }

    fn created(&self, post: &Post) {
        metrics::counter!(POSTS_CREATED, "kind" => kind_label(post)).increment(1);
        info!(
            post_id = post.id,
            thread_id = post.thread_id(),
            approved = post.approved,
            capcode = post.capcode.map(|c| c.as_str()),
            "post created"
        );
    }

    // ---------------- moderation ----------------

    /// Idempotent: approving an approved post changes nothing.
    pub async fn approve(&self, id: Id) -> Result<Post, BoardError> {
        let post = self.repo.approve_post(id, Utc::now()).await?;
        metrics::counter!(MODERATION_ACTIONS, "action" => "approve").increment(1);
        info!(post_id = id, "post approved");
        Ok(post)
    }

    /// Physically removes the post (and a thread's replies). Returns the
    /// number of rows removed.
    pub async fn reject(&self, id: Id) -> Result<usize, BoardError> {
        let removed = self.purge(id).await?;
        metrics::counter!(MODERATION_ACTIONS, "action" => "reject").increment(1);
        info!(post_id = id, removed, "post rejected");
        Ok(removed)
    }

    pub async fn hard_delete(&self, id: Id) -> Result<usize, BoardError> {
        let removed = self.purge(id).await?;
        metrics::counter!(MODERATION_ACTIONS, "action" => "hard_delete").increment(1);
        info!(post_id = id, removed, "post hard-deleted");
        Ok(removed)
    }

    async fn purge(&self, id: Id) -> Result<usize, BoardError> {
        let removed = self.repo.hard_delete_post(id).await?;
        self.remove_files(&removed).await;
        metrics::counter!(POSTS_DELETED, "mode" => "hard").increment(removed.len() as u64);
        Ok(removed.len())
    }

    /// Author self-service delete. Unknown post, missing password and wrong
    /// password are indistinguishable. Returns false if it was already deleted.
    pub async fn delete_own_post(&self, id: Id, password: &str) -> Result<bool, BoardError> {
        let password = password.trim();
        if password.is_empty() {
            return Err(BoardError::Unauthorized);
        }
        let post = match self.repo.get_post(id).await {
            Ok(p) => p,
            Err(RepoError::NotFound) => return Err(BoardError::Unauthorized),
            Err(e) => return Err(e.into()),
        };
        let Some(stored) = post.password_hash.as_deref() else {
            return Err(BoardError::Unauthorized);
        };
        if !verify_password(password, stored) {
            debug!(post_id = id, "delete password mismatch");
            return Err(BoardError::Unauthorized);
        }
        self.soft_delete(id, "author").await
    }

    pub async fn mod_soft_delete(&self, id: Id) -> Result<bool, BoardError> {
        let deleted = self.soft_delete(id, "moderator").await?;
        metrics::counter!(MODERATION_ACTIONS, "action" => "soft_delete").increment(1);
        Ok(deleted)
    }

    async fn soft_delete(&self, id: Id, by: &'static str) -> Result<bool, BoardError> {
        match self.repo.soft_delete_post(id).await? {
            SoftDelete::Deleted(before) => {
                self.remove_files(std::slice::from_ref(&before)).await;
                metrics::counter!(POSTS_DELETED, "mode" => "soft").increment(1);
                info!(post_id = id, by, "post soft-deleted");
                Ok(true)
            }
            SoftDelete::AlreadyDeleted => {
                debug!(post_id = id, by, "post already deleted");
                Ok(false)
            }
        }
    }

    /// Runs after the row change has committed; a failed removal is logged
    /// and left for a retry.
    async fn remove_files(&self, posts: &[Post]) {
        for post in posts {
            let Some(attachment) = &post.attachment else { continue };
            if let Err(e) = self.media.delete(attachment).await {
                error!(post_id = post.id, error = %e, "failed to remove attachment files");
            }
        }
    }

    /// Flip `locked`. Returns the new value, or `None` when `id` is not a thread.
    pub async fn toggle_lock(&self, id: Id) -> Result<Option<bool>, BoardError> {
        self.change_flag(id, ThreadFlag::Locked, FlagChange::Toggle).await
    }

    pub async fn set_locked(&self, id: Id, locked: bool) -> Result<Option<bool>, BoardError> {
        self.change_flag(id, ThreadFlag::Locked, FlagChange::Set(locked)).await
    }

    pub async fn toggle_sticky(&self, id: Id) -> Result<Option<bool>, BoardError> {
        self.change_flag(id, ThreadFlag::Sticky, FlagChange::Toggle).await
    }

    pub async fn set_sticky(&self, id: Id, sticky: bool) -> Result<Option<bool>, BoardError> {
        self.change_flag(id, ThreadFlag::Sticky, FlagChange::Set(sticky)).await
    }

    async fn change_flag(&self, id: Id, flag: ThreadFlag, change: FlagChange) -> Result<Option<bool>, BoardError> {
        let value = match self.repo.update_thread_flag(id, flag, change).await {
            Ok(v) => v,
            Err(RepoError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        match value {
            Some(v) => {
                let action = match flag {
                    ThreadFlag::Locked => "lock",
                    ThreadFlag::Sticky => "sticky",
                };
                metrics::counter!(MODERATION_ACTIONS, "action" => action).increment(1);
                info!(thread_id = id, ?flag, value = v, "thread flag changed");
            }
            None => debug!(post_id = id, ?flag, "flag change ignored, not a thread"),
        }
        Ok(value)
    }

    /// Replace the message text only. Timestamps, approval and files stay.
    pub async fn edit(&self, id: Id, message: &str) -> Result<Post, BoardError> {
        let message = validate_message(message)?;
        let post = self.repo.edit_message(id, &message).await?;
        metrics::counter!(MODERATION_ACTIONS, "action" => "edit").increment(1);
        info!(post_id = id, "post edited");
        Ok(post)
    }

    // ---------------- settings & filters ----------------

    pub async fn update_setting(&self, key: &str, value: &str) -> Result<Setting, BoardError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(BoardError::Validation("setting key must not be empty".into()));
        }
        let setting = self.settings.set(key, value).await?;
        metrics::counter!(MODERATION_ACTIONS, "action" => "setting").increment(1);
        Ok(setting)
    }

    pub fn word_filters(&self) -> WordFilters {
        self.gate.filters().snapshot()
    }

    pub fn add_word_filter(&self, word: &str, kind: &str) -> Result<WordFilters, BoardError> {
        let kind: FilterKind = kind.trim().parse()?;
        let filters = self.gate.filters().add(word, kind)?;
        info!(word = word.trim(), ?kind, "word filter added");
        Ok(filters)
    }

    pub fn remove_word_filter(&self, word: &str, kind: &str) -> Result<WordFilters, BoardError> {
        let kind: FilterKind = kind.trim().parse()?;
        let filters = self.gate.filters().remove(word, kind)?;
        info!(word = word.trim(), ?kind, "word filter removed");
        Ok(filters)
    }

    // ---------------- reads ----------------

    async fn view(&self, post: &Post, vis: Visibility) -> Result<PostView, BoardError> {
        let backlinks = self.repo.backlinks(post.id, vis).await?;
        Ok(post.view(backlinks))
    }

    async fn views(&self, posts: &[Post], vis: Visibility) -> Result<Vec<PostView>, BoardError> {
        let mut out = Vec::with_capacity(posts.len());
        for p in posts {
            out.push(self.view(p, vis).await?);
        }
        Ok(out)
    }

    /// A post `vis` admits, or NotFound.
    async fn visible(&self, id: Id, vis: Visibility) -> Result<Post, BoardError> {
        let post = self.repo.get_post(id).await?;
        if vis.admits(&post) { Ok(post) } else { Err(BoardError::NotFound) }
    }

    /// 1-based; pages below 1 are treated as the first.
    pub async fn index_page(&self, vis: Visibility, page: i64) -> Result<IndexPage, BoardError> {
        let page = page.max(1);
        let size = self.listing.page_size;
        let total = self.repo.count_threads(vis).await?;
        let total_pages = ((total + size - 1) / size).max(1);
        let ops = self.repo.list_threads(vis, (page - 1).saturating_mul(size), size).await?;
        let mut threads = Vec::with_capacity(ops.len());
        for op in &ops {
            let stats = self.repo.reply_stats(op.id, vis).await?;
            let latest = self.repo.latest_replies(op.id, vis, self.listing.preview_replies).await?;
            threads.push(ThreadSummary {
                op: self.view(op, vis).await?,
                reply_count: stats.replies,
                image_count: stats.images,
                latest_replies: self.views(&latest, vis).await?,
            });
        }
        Ok(IndexPage { page, total_pages, threads })
    }

    pub async fn catalog(&self, vis: Visibility) -> Result<Vec<CatalogEntry>, BoardError> {
        let ops = self.repo.list_threads(vis, 0, self.listing.catalog_limit).await?;
        let mut out = Vec::with_capacity(ops.len());
        for op in &ops {
            let stats = self.repo.reply_stats(op.id, vis).await?;
            out.push(CatalogEntry {
                op: self.view(op, vis).await?,
                reply_count: stats.replies,
                image_count: stats.images,
            });
        }
        Ok(out)
    }

    pub async fn thread_view(&self, vis: Visibility, id: Id) -> Result<ThreadView, BoardError> {
        let thread = self.visible(id, vis).await?;
        if thread.is_reply() {
            return Err(BoardError::NotFound);
        }
        let replies = self.repo.list_replies(id, vis).await?;
        Ok(ThreadView { thread: self.view(&thread, vis).await?, replies: self.views(&replies, vis).await? })
    }

    /// The thread containing `id`. A reply under a hidden thread is hidden too.
    pub async fn locate(&self, vis: Visibility, id: Id) -> Result<PostLocation, BoardError> {
        let post = self.visible(id, vis).await?;
        if let Some(parent) = post.parent_id() {
            self.visible(parent, vis).await?;
        }
        Ok(PostLocation { post_id: post.id, thread_id: post.thread_id(), is_reply: post.is_reply() })
    }

    pub async fn backlinks(&self, vis: Visibility, id: Id) -> Result<Vec<Id>, BoardError> {
        Ok(self.repo.backlinks(id, vis).await?)
    }

    pub async fn pending(&self) -> Result<PendingQueue, BoardError> {
        let (replies, threads): (Vec<Post>, Vec<Post>) =
            self.repo.list_pending().await?.into_iter().partition(Post::is_reply);
        Ok(PendingQueue {
            threads: self.views(&threads, Visibility::Moderator).await?,
            replies: self.views(&replies, Visibility::Moderator).await?,
        })
    }
}
