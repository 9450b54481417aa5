use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::*;
use crate::mentions::candidate_targets;

const SNAPSHOT_FILE: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Edge {
    seq: i64,
    #[serde(flatten)]
    mention: Mention,
}

#[derive(Default, Serialize, Deserialize)]
struct State {
    posts: BTreeMap<Id, Post>,
    mentions: Vec<Edge>,
    settings: HashMap<String, Setting>,
    next_id: Id,
    next_edge: i64,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn register(&mut self, source_id: Id, text: &str, now: DateTime<Utc>) -> Vec<Id> {
        let mut added = Vec::new();
        for target in candidate_targets(source_id, text) {
            let live = self.posts.get(&target).map(|p| !p.deleted).unwrap_or(false);
            if !live {
                continue;
            }
            self.next_edge += 1;
            self.mentions.push(Edge {
                seq: self.next_edge,
                mention: Mention { source_id, target_id: target, created_at: now },
            });
            added.push(target);
        }
        added
    }

    fn sorted_threads(&self, vis: Visibility) -> Vec<&Post> {
        let mut v: Vec<_> = self.posts.values().filter(|p| !p.is_reply() && vis.admits(p)).collect();
        v.sort_by(|a, b| {
            b.is_sticky()
                .cmp(&a.is_sticky())
                .then_with(|| b.bumped_at().cmp(&a.bumped_at()))
                .then_with(|| b.id.cmp(&a.id))
        });
        v
    }

    fn replies_of(&self, thread_id: Id, vis: Visibility) -> Vec<&Post> {
        // BTreeMap order is id order, which is creation order
        self.posts
            .values()
            .filter(|p| p.parent_id() == Some(thread_id) && vis.admits(p))
            .collect()
    }
}

/// Lock-guarded in-memory store, snapshotted to JSON after every mutation.
/// A single write lock per operation gives each one all-or-nothing semantics.
#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    /// Store snapshotting to `state.json` under `dir`. A missing snapshot
    /// starts an empty board; one that cannot be read or parsed is an error,
    /// since starting empty would hand out ids again.
    pub fn in_dir(dir: impl AsRef<Path>) -> RepoResult<Self> {
        let path = dir.as_ref().join(SNAPSHOT_FILE);
        let state = Self::load_state_from(&path)?;
        Ok(Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) })
    }

    /// Store without a backing file.
    pub fn ephemeral() -> Self {
        Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
    }

    fn load_state_from(path: &Path) -> RepoResult<State> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no snapshot, starting empty");
                return Ok(State::default());
            }
            Err(e) => {
                return Err(RepoError::Internal(format!("cannot read snapshot {}: {e}", path.display())));
            }
        };
        let state = serde_json::from_slice::<State>(&bytes)
            .map_err(|e| RepoError::Internal(format!("corrupt snapshot {}: {e}", path.display())))?;
        info!(path = %path.display(), posts = state.posts.len(), "loaded snapshot");
        Ok(state)
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    /// Persist while still holding the write lock so snapshots never interleave.
    fn persist(&self, state: &State) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        if let Err(e) = write_snapshot(path, state) {
            warn!(path = %path.display(), "failed to write snapshot: {e}");
        }
    }
}

/// Write to a sibling temp file, then rename over the snapshot so a crash
/// leaves either the old or the new file, never a truncated one.
fn write_snapshot(path: &Path, state: &State) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(state)?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[async_trait]
impl PostRepo for InMemRepo {
    async fn insert_post(&self, new: NewPost, parent_visibility: Visibility) -> RepoResult<Post> {
        let mut s = self.write()?;
        let now = Utc::now();
        if let Some(parent_id) = new.parent_id {
            let parent = s.posts.get(&parent_id).ok_or(RepoError::NotFound)?;
            if parent.is_reply() || !parent_visibility.admits(parent) {
                return Err(RepoError::NotFound);
            }
            if parent.is_locked() {
                return Err(RepoError::Locked);
            }
        }
        if let Some(att) = &new.attachment {
            let taken = s
                .posts
                .values()
                .any(|p| p.attachment.as_ref().map(|a| a.media == att.media).unwrap_or(false));
            if taken {
                return Err(RepoError::Conflict);
            }
        }
        let id = s.next_id();
        let post = new.into_post(id, now);
        s.posts.insert(id, post.clone());
        if let Some(parent_id) = post.parent_id() {
            if let Some(PostKind::Thread { updated_at, .. }) = s.posts.get_mut(&parent_id).map(|p| &mut p.kind) {
                *updated_at = (*updated_at).max(now);
            }
        }
        s.register(id, &post.message, now);
        self.persist(&s);
        Ok(post)
    }

    async fn get_post(&self, id: Id) -> RepoResult<Post> {
        let s = self.read()?;
        s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_threads(&self, vis: Visibility, offset: i64, limit: i64) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        Ok(s.sorted_threads(vis)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_threads(&self, vis: Visibility) -> RepoResult<i64> {
        let s = self.read()?;
        Ok(s.posts.values().filter(|p| !p.is_reply() && vis.admits(p)).count() as i64)
    }

    async fn list_replies(&self, thread_id: Id, vis: Visibility) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        Ok(s.replies_of(thread_id, vis).into_iter().cloned().collect())
    }

    async fn latest_replies(&self, thread_id: Id, vis: Visibility, limit: i64) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        let all = s.replies_of(thread_id, vis);
        let skip = all.len().saturating_sub(limit.max(0) as usize);
        Ok(all.into_iter().skip(skip).cloned().collect())
    }

    async fn reply_stats(&self, thread_id: Id, vis: Visibility) -> RepoResult<ReplyStats> {
        let s = self.read()?;
        let replies = s.replies_of(thread_id, vis);
        Ok(ReplyStats {
            replies: replies.len() as i64,
            images: replies.iter().filter(|p| p.has_media()).count() as i64,
        })
    }

    async fn list_pending(&self) -> RepoResult<Vec<Post>> {
        let s = self.read()?;
        Ok(s.posts.values().filter(|p| !p.deleted && !p.approved).cloned().collect())
    }

    async fn approve_post(&self, id: Id, at: DateTime<Utc>) -> RepoResult<Post> {
        let mut s = self.write()?;
        let post = s.posts.get_mut(&id).filter(|p| !p.deleted).ok_or(RepoError::NotFound)?;
        if post.approved {
            return Ok(post.clone());
        }
        post.approved = true;
        post.approved_at = Some(at);
        let approved = post.clone();
        self.persist(&s);
        Ok(approved)
    }

    async fn soft_delete_post(&self, id: Id) -> RepoResult<SoftDelete> {
        let mut s = self.write()?;
        let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
        if post.deleted {
            return Ok(SoftDelete::AlreadyDeleted);
        }
        let before = post.clone();
        post.deleted = true;
        self.persist(&s);
        Ok(SoftDelete::Deleted(before))
    }

    async fn hard_delete_post(&self, id: Id) -> RepoResult<Vec<Post>> {
        let mut s = self.write()?;
        if !s.posts.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        let doomed: HashSet<Id> = s
            .posts
            .values()
            .filter(|p| p.id == id || p.parent_id() == Some(id))
            .map(|p| p.id)
            .collect();
        let removed: Vec<Post> = doomed.iter().filter_map(|pid| s.posts.remove(pid)).collect();
        s.mentions
            .retain(|e| !doomed.contains(&e.mention.source_id) && !doomed.contains(&e.mention.target_id));
        self.persist(&s);
        Ok(removed)
    }

    async fn update_thread_flag(&self, id: Id, flag: ThreadFlag, change: FlagChange) -> RepoResult<Option<bool>> {
        let mut s = self.write()?;
        let Some(PostKind::Thread { locked, sticky, .. }) = s.posts.get_mut(&id).map(|p| &mut p.kind) else {
            return Ok(None);
        };
        let slot = match flag {
            ThreadFlag::Locked => locked,
            ThreadFlag::Sticky => sticky,
        };
        *slot = change.apply(*slot);
        let value = *slot;
        self.persist(&s);
        Ok(Some(value))
    }

    async fn edit_message(&self, id: Id, message: &str) -> RepoResult<Post> {
        let mut s = self.write()?;
        let post = s.posts.get_mut(&id).filter(|p| !p.deleted).ok_or(RepoError::NotFound)?;
        post.message = message.to_string();
        let edited = post.clone();
        self.persist(&s);
        Ok(edited)
    }
}

#[async_trait]
impl MentionRepo for InMemRepo {
    async fn register_mentions(&self, source_id: Id, text: &str) -> RepoResult<Vec<Id>> {
        let mut s = self.write()?;
        let added = s.register(source_id, text, Utc::now());
        if !added.is_empty() {
            self.persist(&s);
        }
        Ok(added)
    }

    async fn backlinks(&self, target_id: Id, vis: Visibility) -> RepoResult<Vec<Id>> {
        let s = self.read()?;
        let mut edges: Vec<&Edge> = s
            .mentions
            .iter()
            .filter(|e| e.mention.target_id == target_id)
            .filter(|e| s.posts.get(&e.mention.source_id).map(|p| vis.admits(p)).unwrap_or(false))
            .collect();
        edges.sort_by(|a, b| b.mention.created_at.cmp(&a.mention.created_at).then_with(|| b.seq.cmp(&a.seq)));
        Ok(edges.into_iter().map(|e| e.mention.source_id).collect())
    }

    async fn mentions_touching(&self, id: Id) -> RepoResult<Vec<Mention>> {
        let s = self.read()?;
        Ok(s.mentions
            .iter()
            .filter(|e| e.mention.source_id == id || e.mention.target_id == id)
            .map(|e| e.mention.clone())
            .collect())
    }
}

#[async_trait]
impl SettingsRepo for InMemRepo {
    async fn get_setting(&self, key: &str) -> RepoResult<Option<String>> {
        let s = self.read()?;
        Ok(s.settings.get(key).map(|st| st.value.clone()))
    }

    async fn set_setting(&self, key: &str, value: &str) -> RepoResult<Setting> {
        let mut s = self.write()?;
        let setting = Setting { key: key.to_string(), value: value.to_string(), updated_at: Utc::now() };
        s.settings.insert(key.to_string(), setting.clone());
        self.persist(&s);
        Ok(setting)
    }

    async fn seed_setting(&self, key: &str, value: &str) -> RepoResult<()> {
        let mut s = self.write()?;
        if s.settings.contains_key(key) {
            return Ok(());
        }
        let setting = Setting { key: key.to_string(), value: value.to_string(), updated_at: Utc::now() };
        s.settings.insert(key.to_string(), setting);
        self.persist(&s);
        Ok(())
    }

    async fn list_settings(&self) -> RepoResult<Vec<Setting>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.settings.values().cloned().collect();
        v.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(v)
    }
}
