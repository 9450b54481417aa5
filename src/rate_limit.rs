use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Per-session posting throttle (pod local): a session may post again once
/// `min_interval_secs` have elapsed since its last accepted post.
#[derive(Clone)]
pub struct SpamThrottle {
    last_post: Arc<DashMap<String, DateTime<Utc>>>,
    pub min_interval_secs: i64,
}

impl SpamThrottle {
    pub fn new(min_interval_secs: i64) -> Self {
        Self { last_post: Arc::new(DashMap::new()), min_interval_secs }
    }

    /// Seconds the session still has to wait at `now`; 0 when it may post.
    pub fn remaining_at(&self, session: &str, now: DateTime<Utc>) -> i64 {
        if self.min_interval_secs <= 0 {
            return 0;
        }
        match self.last_post.get(session) {
            Some(last) => {
                let elapsed = (now - *last).num_seconds();
                if elapsed < self.min_interval_secs { self.min_interval_secs - elapsed.max(0) } else { 0 }
            }
            None => 0,
        }
    }

    /// Stamp an accepted post. Only call once the row is committed. Sessions
    /// whose window has already closed are dropped on the way.
    pub fn record_at(&self, session: &str, now: DateTime<Utc>) {
        let window = self.min_interval_secs;
        self.last_post.retain(|_, last| (now - *last).num_seconds() < window);
        if window > 0 {
            self.last_post.insert(session.to_string(), now);
        }
    }
}
