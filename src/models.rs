use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Name shown when a poster leaves the name field blank.
pub const ANONYMOUS: &str = "Anonymous";

/// Moderator identity badge attached by privileged posting flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Capcode {
    Admin,
    Mod,
    Dev,
}

impl Capcode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capcode::Admin => "admin",
            Capcode::Mod => "mod",
            Capcode::Dev => "dev",
        }
    }
}

impl fmt::Display for Capcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Capcode::Admin),
            "mod" => Ok(Capcode::Mod),
            "dev" => Ok(Capcode::Dev),
            other => Err(format!("unknown capcode '{other}'")),
        }
    }
}

/// Stored attachment paths handed back by the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub media: String,
    pub thumb: Option<String>,
}

/// Thread/reply discriminator. A thread owns the bump timestamp and the
/// lock/sticky flags; a reply only knows its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PostKind {
    Thread {
        subject: Option<String>,
        updated_at: DateTime<Utc>,
        locked: bool,
        sticky: bool,
    },
    Reply {
        parent_id: Id,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Id,
    pub kind: PostKind,
    pub message: String,
    pub attachment: Option<Attachment>,
    pub spoilered: bool,
    pub name: String,
    pub capcode: Option<Capcode>,
    pub password_hash: Option<String>,
    pub poster_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
    pub approved: bool,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, PostKind::Reply { .. })
    }

    pub fn parent_id(&self) -> Option<Id> {
        match self.kind {
            PostKind::Reply { parent_id } => Some(parent_id),
            PostKind::Thread { .. } => None,
        }
    }

    /// Id of the thread this post lives in (its own id for threads).
    pub fn thread_id(&self) -> Id {
        self.parent_id().unwrap_or(self.id)
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.kind, PostKind::Thread { locked: true, .. })
    }

    pub fn is_sticky(&self) -> bool {
        matches!(self.kind, PostKind::Thread { sticky: true, .. })
    }

    pub fn bumped_at(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            PostKind::Thread { updated_at, .. } => Some(updated_at),
            PostKind::Reply { .. } => None,
        }
    }

    pub fn has_media(&self) -> bool {
        self.attachment.is_some()
    }

    /// Read-only projection for renderers. Deleted posts are redacted.
    pub fn view(&self, backlinks: Vec<Id>) -> PostView {
        let (subject, updated_at, locked, sticky) = match &self.kind {
            PostKind::Thread { subject, updated_at, locked, sticky } => {
                (subject.clone(), Some(*updated_at), *locked, *sticky)
            }
            PostKind::Reply { .. } => (None, None, false, false),
        };
        let (message, media, thumb) = match (&self.attachment, self.deleted) {
            (_, true) => (String::new(), None, None),
            (Some(a), false) => (self.message.clone(), Some(a.media.clone()), a.thumb.clone()),
            (None, false) => (self.message.clone(), None, None),
        };
        PostView {
            id: self.id,
            is_reply: self.is_reply(),
            parent_id: self.parent_id(),
            subject,
            message,
            media,
            thumb,
            name: self.name.clone(),
            capcode: self.capcode,
            spoilered: self.spoilered,
            locked,
            sticky,
            created_at: self.created_at,
            updated_at,
            deleted: self.deleted,
            approved: self.approved,
            backlinks,
        }
    }
}

/// Which rows a reader may see. The same predicate drives listings,
/// backlink resolution and post location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Anonymous readers: live and approved rows only.
    Public,
    /// Moderators: every live row, approved or pending.
    Moderator,
}

impl Visibility {
    pub fn admits(&self, post: &Post) -> bool {
        match self {
            Visibility::Public => !post.deleted && post.approved,
            Visibility::Moderator => !post.deleted,
        }
    }
}

/// Insert request handed to the repository. Build it with
/// [`NewPost::thread`] / [`NewPost::reply`] so a reply never carries a subject.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub parent_id: Option<Id>,
    pub subject: Option<String>,
    pub message: String,
    pub name: String,
    pub attachment: Option<Attachment>,
    pub spoilered: bool,
    pub password_hash: Option<String>,
    pub poster_hash: Option<String>,
    pub capcode: Option<Capcode>,
    pub approved: bool,
}

impl NewPost {
    pub fn thread(subject: Option<String>, message: String) -> Self {
        Self {
            parent_id: None,
            subject,
            message,
            name: ANONYMOUS.to_string(),
            attachment: None,
            spoilered: false,
            password_hash: None,
            poster_hash: None,
            capcode: None,
            approved: true,
        }
    }

    pub fn reply(parent_id: Id, message: String) -> Self {
        Self { parent_id: Some(parent_id), ..Self::thread(None, message) }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attachment(mut self, attachment: Option<Attachment>, spoilered: bool) -> Self {
        // spoiler only means something when there is a file to hide
        self.spoilered = spoilered && attachment.is_some();
        self.attachment = attachment;
        self
    }

    pub fn with_password_hash(mut self, hash: Option<String>) -> Self {
        self.password_hash = hash;
        self
    }

    pub fn with_poster_hash(mut self, hash: Option<String>) -> Self {
        self.poster_hash = hash;
        self
    }

    pub fn with_capcode(mut self, capcode: Option<Capcode>) -> Self {
        self.capcode = capcode;
        self
    }

    pub fn approved(mut self, approved: bool) -> Self {
        self.approved = approved;
        self
    }

    /// Materialise the stored row. Threads start with `updated_at == created_at`.
    pub fn into_post(self, id: Id, now: DateTime<Utc>) -> Post {
        let kind = match self.parent_id {
            Some(parent_id) => PostKind::Reply { parent_id },
            None => PostKind::Thread { subject: self.subject, updated_at: now, locked: false, sticky: false },
        };
        Post {
            id,
            kind,
            message: self.message,
            attachment: self.attachment,
            spoilered: self.spoilered,
            name: self.name,
            capcode: self.capcode,
            password_hash: self.password_hash,
            poster_hash: self.poster_hash,
            created_at: now,
            deleted: false,
            approved: self.approved,
            approved_at: if self.approved { Some(now) } else { None },
        }
    }
}

/// Directed `>>id` edge, append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Mention {
    pub source_id: Id,
    pub target_id: Id,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Which thread flag a lock/sticky mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadFlag {
    Locked,
    Sticky,
}

/// How a flag mutation is applied: a pure flip or an explicit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    Toggle,
    Set(bool),
}

impl FlagChange {
    pub fn apply(&self, current: bool) -> bool {
        match self {
            FlagChange::Toggle => !current,
            FlagChange::Set(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyStats {
    pub replies: i64,
    pub images: i64,
}

// ---------------- read projections ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostView {
    pub id: Id,
    pub is_reply: bool,
    pub parent_id: Option<Id>,
    pub subject: Option<String>,
    pub message: String,
    pub media: Option<String>,
    pub thumb: Option<String>,
    pub name: String,
    pub capcode: Option<Capcode>,
    pub spoilered: bool,
    pub locked: bool,
    pub sticky: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub approved: bool,
    /// Ids of visible posts mentioning this one, newest edge first.
    pub backlinks: Vec<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadSummary {
    pub op: PostView,
    pub reply_count: i64,
    pub image_count: i64,
    /// Newest replies, shown oldest first.
    pub latest_replies: Vec<PostView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IndexPage {
    pub page: i64,
    pub total_pages: i64,
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CatalogEntry {
    pub op: PostView,
    pub reply_count: i64,
    pub image_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ThreadView {
    pub thread: PostView,
    pub replies: Vec<PostView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PostLocation {
    pub post_id: Id,
    pub thread_id: Id,
    pub is_reply: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingQueue {
    pub threads: Vec<PostView>,
    pub replies: Vec<PostView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_draft_drops_subject_and_lone_spoiler() {
        let now = Utc::now();
        let p = NewPost::reply(3, "hi".into()).with_attachment(None, true).into_post(4, now);
        assert!(p.is_reply());
        assert_eq!(p.parent_id(), Some(3));
        assert_eq!(p.thread_id(), 3);
        assert!(!p.spoilered);
        assert!(p.bumped_at().is_none());
    }

    #[test]
    fn deleted_view_is_redacted() {
        let att = Attachment { media: "uploads/a.png".into(), thumb: Some("uploads/thumbs/a.png".into()) };
        let mut p = NewPost::thread(Some("s".into()), "body".into())
            .with_attachment(Some(att), true)
            .into_post(1, Utc::now());
        assert_eq!(p.view(vec![]).media.as_deref(), Some("uploads/a.png"));
        p.deleted = true;
        let v = p.view(vec![]);
        assert!(v.message.is_empty());
        assert!(v.media.is_none() && v.thumb.is_none());
    }

    #[test]
    fn visibility_predicate() {
        let mut p = NewPost::thread(None, "x".into()).approved(false).into_post(1, Utc::now());
        assert!(!Visibility::Public.admits(&p));
        assert!(Visibility::Moderator.admits(&p));
        p.approved = true;
        p.deleted = true;
        assert!(!Visibility::Moderator.admits(&p));
    }

    #[test]
    fn toggle_flips_and_set_targets() {
        assert!(FlagChange::Toggle.apply(false));
        assert!(!FlagChange::Toggle.apply(true));
        assert!(FlagChange::Set(true).apply(true));
    }
}
