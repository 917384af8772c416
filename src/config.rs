use std::path::PathBuf;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::storage::{self, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_INDEX_FILE: &str = "file_index.json";
const DEFAULT_INTERVAL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Minimum cosine similarity for document results
const DEFAULT_TEXT_THRESHOLD: f32 = 0.2;
const DEFAULT_TEXT_LIMIT: usize = 10;
/// Minimum cosine similarity for image results
const DEFAULT_IMAGE_THRESHOLD: f32 = 0.4;
const DEFAULT_IMAGE_LIMIT: usize = 5;
const DEFAULT_MIN_QUERY_CHARS: usize = 2;

pub const TEXT_EXTENSIONS: [&str; 5] = ["docx", "xlsx", "pptx", "pdf", "txt"];
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "bmp"];

/// Background indexing settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Idle period between two continuous passes, in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Embedding service client settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Whole-request timeout for every embedding call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Ranking settings for both modalities
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_text_threshold")]
    pub text_threshold: f32,
    #[serde(default = "default_text_limit")]
    pub text_limit: usize,
    #[serde(default = "default_image_threshold")]
    pub image_threshold: f32,
    #[serde(default = "default_image_limit")]
    pub image_limit: usize,
    /// Queries shorter than this (in characters, after trimming) are rejected
    #[serde(default = "default_min_query_chars")]
    pub min_query_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            text_threshold: DEFAULT_TEXT_THRESHOLD,
            text_limit: DEFAULT_TEXT_LIMIT,
            image_threshold: DEFAULT_IMAGE_THRESHOLD,
            image_limit: DEFAULT_IMAGE_LIMIT,
            min_query_chars: DEFAULT_MIN_QUERY_CHARS,
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_index_file() -> String {
    DEFAULT_INDEX_FILE.to_string()
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_text_threshold() -> f32 {
    DEFAULT_TEXT_THRESHOLD
}

fn default_text_limit() -> usize {
    DEFAULT_TEXT_LIMIT
}

fn default_image_threshold() -> f32 {
    DEFAULT_IMAGE_THRESHOLD
}

fn default_image_limit() -> usize {
    DEFAULT_IMAGE_LIMIT
}

fn default_min_query_chars() -> usize {
    DEFAULT_MIN_QUERY_CHARS
}

fn default_text_extensions() -> Vec<String> {
    TEXT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

fn default_image_extensions() -> Vec<String> {
    IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Base url of the embedding service
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Sent as a bearer token when set
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub document_dir: Option<PathBuf>,
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
    /// Folders indexed on demand; the continuous pass keeps them fresh
    #[serde(default)]
    pub extra_roots: Vec<PathBuf>,

    /// Index snapshot file name, relative to the base path
    #[serde(default = "default_index_file")]
    pub index_file: String,

    #[serde(default = "default_text_extensions")]
    pub text_extensions: Vec<String>,
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            document_dir: None,
            image_dir: None,
            extra_roots: vec![],
            index_file: default_index_file(),
            text_extensions: default_text_extensions(),
            image_extensions: default_image_extensions(),
            indexing: IndexingConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.api_url)
            .with_context(|| format!("api_url {:?} is not a valid url", self.api_url))?;

        let search = &self.search;
        for (name, threshold) in [
            ("search.text_threshold", search.text_threshold),
            ("search.image_threshold", search.image_threshold),
        ] {
            if !(-1.0..=1.0).contains(&threshold) {
                bail!("{name} must be between -1.0 and 1.0, got {threshold}");
            }
        }

        if search.text_limit == 0 || search.image_limit == 0 {
            bail!("search limits must be greater than 0");
        }

        if self.indexing.interval_secs == 0 {
            bail!("indexing.interval_secs must be greater than 0");
        }

        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be greater than 0");
        }

        if self.index_file.trim().is_empty() {
            bail!("index_file must not be empty");
        }

        Ok(())
    }

    pub fn load_with(base_path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base_path = base_path.into();
        let store = storage::BackendLocal::new(&base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("creating default {CONFIG_FILE} in {}", base_path.display());
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path;
        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store
            .write(CONFIG_FILE, config_str.as_bytes())
            .with_context(|| format!("failed to write {CONFIG_FILE}"))?;
        Ok(())
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    /// Roots scanned for documents by the continuous pass.
    pub fn text_roots(&self) -> Vec<PathBuf> {
        self.document_dir
            .iter()
            .chain(self.extra_roots.iter())
            .cloned()
            .collect()
    }

    /// Roots scanned for images by the continuous pass.
    pub fn image_roots(&self) -> Vec<PathBuf> {
        self.image_dir
            .iter()
            .chain(self.extra_roots.iter())
            .cloned()
            .collect()
    }

    /// Remembers folders indexed on demand. Returns true if any was new.
    pub fn add_extra_roots(&mut self, roots: &[PathBuf]) -> bool {
        let mut changed = false;
        for root in roots {
            if !self.extra_roots.contains(root) {
                self.extra_roots.push(root.clone());
                changed = true;
            }
        }
        changed
    }
}
