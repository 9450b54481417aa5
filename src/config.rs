use std::path::PathBuf;

/// Runtime knobs, read once at startup.
#[derive(Clone, Debug)]
pub struct BoardConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub media_dir: PathBuf,
    pub word_filter_path: PathBuf,
    pub anti_spam_secs: i64,
    pub page_size: i64,
    pub catalog_limit: i64,
    pub preview_replies: i64,
    pub max_upload_bytes: usize,
    /// How long an upload may wait to be attached before it is removed.
    pub upload_ttl_secs: i64,
    pub metrics_addr: Option<String>,
}

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

impl Default for BoardConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            bind_addr: "0.0.0.0:8080".into(),
            word_filter_path: data_dir.join("word_filters.json"),
            data_dir,
            media_dir: PathBuf::from("uploads"),
            anti_spam_secs: 1,
            page_size: 20,
            catalog_limit: 150,
            preview_replies: 5,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_ttl_secs: 3600,
            metrics_addr: None,
        }
    }
}

impl BoardConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let num = |name: &str, default: i64| get(name).and_then(|v| v.trim().parse().ok()).unwrap_or(default);
        let data_dir = get("TB_DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir);
        Self {
            bind_addr: get("BIND_ADDR").unwrap_or(d.bind_addr),
            word_filter_path: get("TB_WORD_FILTERS")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("word_filters.json")),
            data_dir,
            media_dir: get("TB_MEDIA_DIR").map(PathBuf::from).unwrap_or(d.media_dir),
            anti_spam_secs: num("TB_ANTI_SPAM_SECS", d.anti_spam_secs).max(0),
            page_size: num("TB_PAGE_SIZE", d.page_size).max(1),
            catalog_limit: num("TB_CATALOG_LIMIT", d.catalog_limit).max(1),
            preview_replies: num("TB_PREVIEW_REPLIES", d.preview_replies).max(0),
            max_upload_bytes: get("TB_MAX_UPLOAD_BYTES")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(d.max_upload_bytes),
            upload_ttl_secs: num("TB_UPLOAD_TTL_SECS", d.upload_ttl_secs).max(0),
            metrics_addr: get("METRICS_ADDR").filter(|v| !v.trim().is_empty()),
        }
    }
}
