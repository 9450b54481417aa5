//! JSON-backed word blocklist. The file holds two lists:
//! `{"exact": [...], "contains": [...]}`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Whole-token match after trimming trailing punctuation.
    Exact,
    /// Substring match anywhere in the message.
    Contains,
}

impl std::str::FromStr for FilterKind {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(FilterKind::Exact),
            "contains" => Ok(FilterKind::Contains),
            _ => Err(FilterError::BadKind),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WordFilters {
    #[serde(default)]
    pub exact: Vec<String>,
    #[serde(default)]
    pub contains: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum FilterError {
    #[error("word must not be empty")]
    Empty,
    #[error("word already present in filter")]
    Duplicate,
    #[error("word not found in filter")]
    NotFound,
    #[error("bad filter type")]
    BadKind,
    #[error("failed to save filters: {0}")]
    Io(String),
}

impl WordFilters {
    fn list_mut(&mut self, kind: FilterKind) -> &mut Vec<String> {
        match kind {
            FilterKind::Exact => &mut self.exact,
            FilterKind::Contains => &mut self.contains,
        }
    }

    /// Returns the configured term (original casing) the text trips on, if any.
    /// Exact terms are checked before substring terms.
    pub fn check(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split_whitespace()
            .map(|w| w.trim_end_matches(|c: char| !c.is_alphanumeric()))
            .collect();
        for word in &self.exact {
            let needle = word.to_lowercase();
            if tokens.iter().any(|t| *t == needle) {
                return Some(word);
            }
        }
        for word in &self.contains {
            let needle = word.to_lowercase();
            if !needle.is_empty() && lowered.contains(&needle) {
                return Some(word);
            }
        }
        None
    }
}

/// Shared, file-persisted filter set. Reads never touch the disk; every
/// successful add/remove rewrites the file.
#[derive(Clone)]
pub struct WordFilterStore {
    filters: Arc<RwLock<WordFilters>>,
    path: Arc<PathBuf>,
}

impl WordFilterStore {
    /// Load from `path`; a missing or malformed file yields empty lists.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filters = Self::read_file(&path);
        Self { filters: Arc::new(RwLock::new(filters)), path: Arc::new(path) }
    }

    fn read_file(path: &Path) -> WordFilters {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<WordFilters>(&bytes) {
                Ok(f) => {
                    info!(path = %path.display(), exact = f.exact.len(), contains = f.contains.len(), "loaded word filters");
                    f
                }
                Err(e) => {
                    warn!(path = %path.display(), "failed to parse word filters: {e}. Using empty filters.");
                    WordFilters::default()
                }
            },
            Err(_) => WordFilters::default(),
        }
    }

    pub fn snapshot(&self) -> WordFilters {
        self.filters.read().map(|f| f.clone()).unwrap_or_default()
    }

    /// Blocked term found in `text`, if any.
    pub fn check(&self, text: &str) -> Option<String> {
        let f = self.filters.read().ok()?;
        f.check(text).map(str::to_string)
    }

    pub fn add(&self, word: &str, kind: FilterKind) -> Result<WordFilters, FilterError> {
        let word = word.trim();
        if word.is_empty() {
            return Err(FilterError::Empty);
        }
        self.mutate(|f| {
            let list = f.list_mut(kind);
            if list.iter().any(|w| w == word) {
                return Err(FilterError::Duplicate);
            }
            list.push(word.to_string());
            Ok(())
        })
    }

    pub fn remove(&self, word: &str, kind: FilterKind) -> Result<WordFilters, FilterError> {
        let word = word.trim();
        self.mutate(|f| {
            let list = f.list_mut(kind);
            let pos = list.iter().position(|w| w == word).ok_or(FilterError::NotFound)?;
            list.remove(pos);
            Ok(())
        })
    }

    fn mutate(&self, op: impl FnOnce(&mut WordFilters) -> Result<(), FilterError>) -> Result<WordFilters, FilterError> {
        let mut guard = self.filters.write().map_err(|_| FilterError::Io("filter lock poisoned".into()))?;
        let mut next = guard.clone();
        op(&mut next)?;
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    fn persist(&self, filters: &WordFilters) -> Result<(), FilterError> {
        let bytes = serde_json::to_vec_pretty(filters).map_err(|e| FilterError::Io(e.to_string()))?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| FilterError::Io(e.to_string()))?;
        }
        std::fs::write(&*self.path, bytes).map_err(|e| FilterError::Io(e.to_string()))
    }
}
