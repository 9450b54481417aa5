//! Checks every public submission passes before anything is written:
//! read-only mode, the per-session throttle, the word filter, and finally
//! the target thread.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{BoardError, PolicyRejection};
use crate::models::{Id, Post, Visibility};
use crate::rate_limit::SpamThrottle;
use crate::repo::{Repo, RepoError};
use crate::settings::BoardPolicy;
use crate::word_filter::WordFilterStore;

/// Who is submitting, as supplied by the session layer for one request.
#[derive(Debug, Clone)]
pub struct Visitor {
    /// Opaque anti-spam bucket key.
    pub session: String,
    pub poster_hash: Option<String>,
}

impl Visitor {
    pub fn new(session: impl Into<String>) -> Self {
        Self { session: session.into(), poster_hash: None }
    }

    pub fn with_poster_hash(mut self, hash: impl Into<String>) -> Self {
        self.poster_hash = Some(hash.into());
        self
    }
}

#[derive(Clone)]
pub struct SubmissionGate {
    filters: WordFilterStore,
    throttle: SpamThrottle,
}

impl SubmissionGate {
    pub fn new(filters: WordFilterStore, throttle: SpamThrottle) -> Self {
        Self { filters, throttle }
    }

    pub fn filters(&self) -> &WordFilterStore {
        &self.filters
    }

    /// Read-only mode, then cooldown, then blocked words. Short-circuits on
    /// the first failure and has no side effects.
    pub fn screen(
        &self,
        policy: &BoardPolicy,
        visitor: &Visitor,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyRejection> {
        self.screen_upload(policy, visitor, now)?;
        if let Some(word) = self.filters.check(message) {
            debug!(%word, "submission hit word filter");
            return Err(PolicyRejection::BlockedWord(word));
        }
        Ok(())
    }

    /// Read-only mode and cooldown only. Uploads go through this before
    /// anything reaches the disk; they never stamp the session themselves.
    pub fn screen_upload(&self, policy: &BoardPolicy, visitor: &Visitor, now: DateTime<Utc>) -> Result<(), PolicyRejection> {
        if policy.read_only {
            return Err(PolicyRejection::ReadOnly);
        }
        let remaining_secs = self.throttle.remaining_at(&visitor.session, now);
        if remaining_secs > 0 {
            debug!(session = %visitor.session, remaining_secs, "submission throttled");
            return Err(PolicyRejection::Cooldown { remaining_secs });
        }
        Ok(())
    }

    /// Stamp the session once its post has been committed.
    pub fn record_accepted(&self, visitor: &Visitor, now: DateTime<Utc>) {
        self.throttle.record_at(&visitor.session, now);
    }
}

/// The thread a reply is aimed at must exist, be a thread, be visible to
/// the poster and be unlocked.
pub async fn check_target(repo: &dyn Repo, thread_id: Id, vis: Visibility) -> Result<Post, BoardError> {
    let thread = match repo.get_post(thread_id).await {
        Ok(p) => p,
        Err(RepoError::NotFound) => return Err(BoardError::NotFound),
        Err(e) => return Err(e.into()),
    };
    if thread.is_reply() || !vis.admits(&thread) {
        return Err(BoardError::NotFound);
    }
    if thread.is_locked() {
        return Err(PolicyRejection::Locked.into());
    }
    Ok(thread)
}
