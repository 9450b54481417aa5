use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use super::*;
use crate::mentions::candidate_targets;

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => RepoError::Conflict,
            other => RepoError::Internal(other.to_string()),
        }
    }
}

const POST_COLUMNS: &str = "id, is_reply, parent_id, subject, message, media, thumb, spoilered, name, capcode, \
     password_hash, poster_hash, created_at, updated_at, deleted, locked, sticky, approved, approved_at";

/// Flat `posts` row; converted into the tagged [`Post`] record.
#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: Id,
    is_reply: bool,
    parent_id: Option<Id>,
    subject: Option<String>,
    message: String,
    media: Option<String>,
    thumb: Option<String>,
    spoilered: bool,
    name: String,
    capcode: Option<String>,
    password_hash: Option<String>,
    poster_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted: bool,
    locked: bool,
    sticky: bool,
    approved: bool,
    approved_at: Option<DateTime<Utc>>,
}

impl TryFrom<PostRow> for Post {
    type Error = RepoError;

    fn try_from(r: PostRow) -> Result<Self, Self::Error> {
        let kind = match (r.is_reply, r.parent_id) {
            (false, None) => PostKind::Thread {
                subject: r.subject,
                updated_at: r.updated_at,
                locked: r.locked,
                sticky: r.sticky,
            },
            (true, Some(parent_id)) => PostKind::Reply { parent_id },
            _ => return Err(RepoError::Internal(format!("post {} has inconsistent reply/parent columns", r.id))),
        };
        Ok(Post {
            id: r.id,
            kind,
            message: r.message,
            attachment: r.media.map(|media| Attachment { media, thumb: r.thumb }),
            spoilered: r.spoilered,
            name: r.name,
            capcode: r.capcode.and_then(|c| c.parse().ok()),
            password_hash: r.password_hash,
            poster_hash: r.poster_hash,
            created_at: r.created_at,
            deleted: r.deleted,
            approved: r.approved,
            approved_at: r.approved_at,
        })
    }
}

fn into_posts(rows: Vec<PostRow>) -> RepoResult<Vec<Post>> {
    rows.into_iter().map(Post::try_from).collect()
}

fn include_pending(vis: Visibility) -> bool {
    matches!(vis, Visibility::Moderator)
}

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> RepoResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepoError::Internal(e.to_string()))
    }

    async fn fetch_post(tx: &mut Transaction<'_, Postgres>, id: Id, for_update: bool) -> RepoResult<Post> {
        let sql = if for_update {
            format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1 FOR UPDATE")
        } else {
            format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1")
        };
        let row = sqlx::query_as::<_, PostRow>(&sql).bind(id).fetch_one(&mut **tx).await?;
        Post::try_from(row)
    }

    async fn register_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        source_id: Id,
        text: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<Id>> {
        let targets: Vec<Id> = candidate_targets(source_id, text).into_iter().collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(Id,)> = sqlx::query_as(
            "INSERT INTO mentions (source_id, target_id, created_at)
             SELECT $1, p.id, $3 FROM posts p WHERE p.id = ANY($2) AND p.deleted = FALSE
             ORDER BY p.id
             RETURNING target_id",
        )
        .bind(source_id)
        .bind(&targets)
        .bind(now)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl PostRepo for PgRepo {
    async fn insert_post(&self, new: NewPost, parent_visibility: Visibility) -> RepoResult<Post> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        if let Some(parent_id) = new.parent_id {
            // row lock serialises this reply against concurrent lock toggles
            let parent = Self::fetch_post(&mut tx, parent_id, true).await?;
            if parent.is_reply() || !parent_visibility.admits(&parent) {
                return Err(RepoError::NotFound);
            }
            if parent.is_locked() {
                return Err(RepoError::Locked);
            }
        }
        let mut post = new.into_post(0, now);
        let (subject, updated_at) = match &post.kind {
            PostKind::Thread { subject, updated_at, .. } => (subject.clone(), *updated_at),
            PostKind::Reply { .. } => (None, now),
        };
        let (media, thumb) = match &post.attachment {
            Some(a) => (Some(a.media.clone()), a.thumb.clone()),
            None => (None, None),
        };
        let (id,): (Id,) = sqlx::query_as(
            "INSERT INTO posts (is_reply, parent_id, subject, message, media, thumb, spoilered, name, capcode,
                                password_hash, poster_hash, created_at, updated_at, approved, approved_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
             RETURNING id",
        )
        .bind(post.is_reply())
        .bind(post.parent_id())
        .bind(subject)
        .bind(&post.message)
        .bind(media)
        .bind(thumb)
        .bind(post.spoilered)
        .bind(&post.name)
        .bind(post.capcode.map(|c| c.as_str()))
        .bind(&post.password_hash)
        .bind(&post.poster_hash)
        .bind(post.created_at)
        .bind(updated_at)
        .bind(post.approved)
        .bind(post.approved_at)
        .fetch_one(&mut *tx)
        .await?;
        post.id = id;
        if let Some(parent_id) = post.parent_id() {
            sqlx::query("UPDATE posts SET updated_at = GREATEST(updated_at, $2) WHERE id = $1")
                .bind(parent_id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        Self::register_in_tx(&mut tx, id, &post.message, now).await?;
        tx.commit().await?;
        Ok(post)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        let row = sqlx::query_as::<_, PostRow>(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Post::try_from(row)
    }

    async fn list_threads(&self, vis: Visibility, offset: i64, limit: i64) -> RepoResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE is_reply = FALSE AND deleted = FALSE AND ($1 OR approved)
             ORDER BY sticky DESC, updated_at DESC, id DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(include_pending(vis))
        .bind(limit.max(0))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        into_posts(rows)
    }

    async fn count_threads(&self, vis: Visibility) -> RepoResult<i64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM posts WHERE is_reply = FALSE AND deleted = FALSE AND ($1 OR approved)",
        )
        .bind(include_pending(vis))
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    async fn list_replies(&self, thread_id: Id, vis: Visibility) -> RepoResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE parent_id = $1 AND deleted = FALSE AND ($2 OR approved)
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(thread_id)
        .bind(include_pending(vis))
        .fetch_all(&self.pool)
        .await?;
        into_posts(rows)
    }

    async fn latest_replies(&self, thread_id: Id, vis: Visibility, limit: i64) -> RepoResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM (
                SELECT * FROM posts
                WHERE parent_id = $1 AND deleted = FALSE AND ($2 OR approved)
                ORDER BY created_at DESC, id DESC
                LIMIT $3
             ) latest
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(thread_id)
        .bind(include_pending(vis))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        into_posts(rows)
    }

    async fn reply_stats(&self, thread_id: Id, vis: Visibility) -> RepoResult<ReplyStats> {
        let (replies, images): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(media) FROM posts
             WHERE parent_id = $1 AND deleted = FALSE AND ($2 OR approved)",
        )
        .bind(thread_id)
        .bind(include_pending(vis))
        .fetch_one(&self.pool)
        .await?;
        Ok(ReplyStats { replies, images })
    }

    async fn list_pending(&self) -> RepoResult<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE approved = FALSE AND deleted = FALSE ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        into_posts(rows)
    }

    async fn approve_post(&self, id: Id, at: DateTime<Utc>) -> RepoResult<Post> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "UPDATE posts
             SET approved = TRUE, approved_at = CASE WHEN approved THEN approved_at ELSE $2 END
             WHERE id = $1 AND deleted = FALSE
             RETURNING {POST_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Post::try_from(row)
    }

    async fn soft_delete_post(&self, id: Id) -> RepoResult<SoftDelete> {
        let mut tx = self.pool.begin().await?;
        let post = Self::fetch_post(&mut tx, id, true).await?;
        if post.deleted {
            return Ok(SoftDelete::AlreadyDeleted);
        }
        sqlx::query("UPDATE posts SET deleted = TRUE WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(SoftDelete::Deleted(post))
    }

    async fn hard_delete_post(&self, id: Id) -> RepoResult<Vec<Post>> {
        let mut tx = self.pool.begin().await?;
        // existence check doubles as the row lock
        Self::fetch_post(&mut tx, id, true).await?;
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1 OR parent_id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        let removed = into_posts(rows)?;
        let ids: Vec<Id> = removed.iter().map(|p| p.id).collect();
        sqlx::query("DELETE FROM mentions WHERE source_id = ANY($1) OR target_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM posts WHERE parent_id = $1").bind(id).execute(&mut *tx).await?;
        sqlx::query("DELETE FROM posts WHERE id = $1").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn update_thread_flag(&self, id: Id, flag: ThreadFlag, change: FlagChange) -> RepoResult<Option<bool>> {
        let sql = match (flag, change) {
            (ThreadFlag::Locked, FlagChange::Toggle) => "UPDATE posts SET locked = NOT locked WHERE id = $1 AND is_reply = FALSE RETURNING locked",
            (ThreadFlag::Locked, FlagChange::Set(_)) => "UPDATE posts SET locked = $2 WHERE id = $1 AND is_reply = FALSE RETURNING locked",
            (ThreadFlag::Sticky, FlagChange::Toggle) => "UPDATE posts SET sticky = NOT sticky WHERE id = $1 AND is_reply = FALSE RETURNING sticky",
            (ThreadFlag::Sticky, FlagChange::Set(_)) => "UPDATE posts SET sticky = $2 WHERE id = $1 AND is_reply = FALSE RETURNING sticky",
        };
        let mut q = sqlx::query_as::<_, (bool,)>(sql).bind(id);
        if let FlagChange::Set(value) = change {
            q = q.bind(value);
        }
        let row = q.fetch_optional(&self.pool).await?;
        Ok(row.map(|(v,)| v))
    }

    async fn edit_message(&self, id: Id, message: &str) -> RepoResult<Post> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "UPDATE posts SET message = $2 WHERE id = $1 AND deleted = FALSE RETURNING {POST_COLUMNS}"
        ))
        .bind(id)
        .bind(message)
        .fetch_one(&self.pool)
        .await?;
        Post::try_from(row)
    }
}

#[async_trait]
impl MentionRepo for PgRepo {
    async fn register_mentions(&self, source_id: Id, text: &str) -> RepoResult<Vec<Id>> {
        let mut tx = self.pool.begin().await?;
        let added = Self::register_in_tx(&mut tx, source_id, text, Utc::now()).await?;
        tx.commit().await?;
        Ok(added)
    }

    async fn backlinks(&self, target_id: Id, vis: Visibility) -> RepoResult<Vec<Id>> {
        let rows: Vec<(Id,)> = sqlx::query_as(
            "SELECT m.source_id FROM mentions m
             JOIN posts p ON p.id = m.source_id
             WHERE m.target_id = $1 AND p.deleted = FALSE AND ($2 OR p.approved)
             ORDER BY m.created_at DESC, m.id DESC",
        )
        .bind(target_id)
        .bind(include_pending(vis))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn mentions_touching(&self, id: Id) -> RepoResult<Vec<Mention>> {
        let rows = sqlx::query_as::<_, Mention>(
            "SELECT source_id, target_id, created_at FROM mentions
             WHERE source_id = $1 OR target_id = $1
             ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl SettingsRepo for PgRepo {
    async fn get_setting(&self, key: &str) -> RepoResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn set_setting(&self, key: &str, value: &str) -> RepoResult<Setting> {
        let rec = sqlx::query_as::<_, Setting>(
            "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
             RETURNING key, value, updated_at",
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await?;
        Ok(rec)
    }

    async fn seed_setting(&self, key: &str, value: &str) -> RepoResult<()> {
        sqlx::query("INSERT INTO settings (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_settings(&self) -> RepoResult<Vec<Setting>> {
        let recs = sqlx::query_as::<_, Setting>("SELECT key, value, updated_at FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(recs)
    }
}
