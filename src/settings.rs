use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::models::Setting;
use crate::repo::{Repo, RepoResult};

/// `"1"` means new public posts wait for moderator approval.
pub const APPROVAL_SYSTEM: &str = "approval_system";
/// `"1"` means public submissions are refused outright.
pub const READONLY_MODE: &str = "readonly_mode";

const ENABLED: &str = "1";
const DISABLED: &str = "0";

/// Moderation policy as seen by a single request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BoardPolicy {
    pub requires_approval: bool,
    pub read_only: bool,
}

/// Key/value settings with last-write-wins semantics. Unknown keys are
/// stored and returned but carry no meaning here.
#[derive(Clone)]
pub struct SettingsStore {
    repo: Arc<dyn Repo>,
}

impl SettingsStore {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    pub async fn get(&self, key: &str, default: &str) -> RepoResult<String> {
        Ok(self.repo.get_setting(key).await?.unwrap_or_else(|| default.to_string()))
    }

    pub async fn set(&self, key: &str, value: &str) -> RepoResult<Setting> {
        let setting = self.repo.set_setting(key, value).await?;
        info!(key, value, "setting updated");
        Ok(setting)
    }

    pub async fn list(&self) -> RepoResult<Vec<Setting>> {
        self.repo.list_settings().await
    }

    /// First-run defaults; existing values are left alone.
    pub async fn seed_defaults(&self) -> RepoResult<()> {
        self.repo.seed_setting(APPROVAL_SYSTEM, DISABLED).await?;
        self.repo.seed_setting(READONLY_MODE, DISABLED).await
    }

    pub async fn policy(&self) -> RepoResult<BoardPolicy> {
        Ok(BoardPolicy {
            requires_approval: self.get(APPROVAL_SYSTEM, DISABLED).await? == ENABLED,
            read_only: self.get(READONLY_MODE, DISABLED).await? == ENABLED,
        })
    }
}

/// Encode a boolean the way the settings table stores flags.
pub fn flag_value(on: bool) -> &'static str {
    if on { ENABLED } else { DISABLED }
}
