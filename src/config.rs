use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::storage::{FileStore, SnapshotStore};

const CONFIG_KEY: &str = "config.yaml";

/// Default embedding model; captures are mostly Chinese
const DEFAULT_EMBEDDING_MODEL: &str = "bge-small-zh-v1.5";
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Quiescence window before pending tree changes are flushed
const DEFAULT_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_TOP_K: usize = 20;

/// Configuration for the embedding service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Folder naming policy of the collection being indexed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Top-level folders that count as "not categorized yet"
    #[serde(default = "default_unsorted_roots")]
    pub unsorted_roots: Vec<String>,

    /// Folder the social-media ingestion pipeline files captures into
    #[serde(default = "default_capture_root")]
    pub capture_root: String,

    /// Title marker identifying a social-media capture
    #[serde(default = "default_capture_prefix")]
    pub capture_prefix: String,

    /// Capture text used by the ingestion pipeline for image/video-only posts
    #[serde(default = "default_media_placeholder")]
    pub media_placeholder: String,

    /// Folder whose subtree is ignored entirely
    #[serde(default = "default_trash_folder")]
    pub trash_folder: String,

    /// Hosts whose urls carry no useful semantics (numeric ids, handles)
    #[serde(default = "default_noise_domains")]
    pub noise_domains: Vec<String>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            unsorted_roots: default_unsorted_roots(),
            capture_root: default_capture_root(),
            capture_prefix: default_capture_prefix(),
            media_placeholder: default_media_placeholder(),
            trash_folder: default_trash_folder(),
            noise_domains: default_noise_domains(),
        }
    }
}

impl CollectionConfig {
    pub fn is_unsorted_path(&self, path: &str) -> bool {
        path.is_empty() || self.unsorted_roots.iter().any(|root| root == path)
    }

    pub fn is_capture_path(&self, path: &str) -> bool {
        path.split(crate::items::PATH_SEPARATOR)
            .any(|segment| segment == self.capture_root)
    }

    pub fn is_noise_url(&self, url: &str) -> bool {
        let Some(host) = url::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        else {
            return false;
        };

        self.noise_domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_unsorted_roots() -> Vec<String> {
    vec![
        "Bookmarks bar".to_string(),
        "Other bookmarks".to_string(),
        "Mobile bookmarks".to_string(),
    ]
}

fn default_capture_root() -> String {
    "Twitter/X Bookmarks".to_string()
}

fn default_capture_prefix() -> String {
    "[X推文]".to_string()
}

fn default_media_placeholder() -> String {
    "图片/视频推文".to_string()
}

fn default_trash_folder() -> String {
    "Trash".to_string()
}

fn default_noise_domains() -> Vec<String> {
    vec!["x.com".to_string(), "twitter.com".to_string()]
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.embedding.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }
        if self.collection.capture_root.trim().is_empty() {
            bail!("collection.capture_root must not be empty");
        }
        if self.sync.debounce_ms == 0 {
            bail!("sync.debounce_ms must be greater than 0");
        }
        if self.search.default_top_k == 0 {
            bail!("search.default_top_k must be greater than 0");
        }
        Ok(())
    }

    /// Resolve the data directory: `SEMDEX_BASE_PATH`, else `~/.local/share/semdex`.
    pub fn default_base_path() -> anyhow::Result<PathBuf> {
        if let Ok(path) = std::env::var("SEMDEX_BASE_PATH") {
            return Ok(PathBuf::from(path));
        }

        let home = homedir::my_home()
            .context("failed to resolve home directory")?
            .context("home directory is unknown")?;
        Ok(home.join(".local").join("share").join("semdex"))
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&Self::default_base_path()?)
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let store = FileStore::new(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        let config_str = match read_config(&store)? {
            Some(config_str) => config_str,
            None => {
                // create new if does not exist
                let config_str = serde_yml::to_string(&Self::default())?;
                write_config(&store, &config_str)?;
                config_str
            }
        };

        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;
        config.base_path = base_path.to_path_buf();
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = FileStore::new(&self.base_path)?;
        write_config(&store, &serde_yml::to_string(&self)?)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

fn read_config(store: &FileStore) -> anyhow::Result<Option<String>> {
    match store.get(CONFIG_KEY)? {
        Some(data) => Ok(Some(
            String::from_utf8(data).context("config file is not valid utf8")?,
        )),
        None => Ok(None),
    }
}

fn write_config(store: &FileStore, config_str: &str) -> anyhow::Result<()> {
    store
        .put(CONFIG_KEY, config_str.as_bytes())
        .context("failed to write config")
}
