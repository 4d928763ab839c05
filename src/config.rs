use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::error::LoadError;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_MODEL_ID: &str = "bhadresh-savani/distilbert-base-uncased-emotion";
pub const DEFAULT_REVISION: &str = "main";
pub const DEFAULT_MAX_LENGTH: usize = 128;
/// 64 MiB. actix-web defaults to 2 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Runtime settings for the API process. Every flag can also be supplied
/// through its `EMOTION_API_*` environment variable.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about = "Product Feedback Emotion Analysis API", long_about = None)]
pub struct ServerConfig {
    #[clap(long, value_parser, env = "EMOTION_API_HOST", default_value = DEFAULT_HOST)]
    pub host: String,
    #[clap(long, value_parser, env = "EMOTION_API_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// HTTP worker threads. Zero is rejected at parse time.
    #[clap(long, value_parser, env = "EMOTION_API_WORKERS", default_value_t = default_workers())]
    pub workers: NonZeroUsize,
    /// Largest accepted `/analyze` request body, in bytes.
    #[clap(long, value_parser, env = "EMOTION_API_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Hub repository holding the tokenizer, config and weights.
    #[clap(long, value_parser, env = "EMOTION_API_MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,
    #[clap(long, value_parser, env = "EMOTION_API_REVISION", default_value = DEFAULT_REVISION)]
    pub revision: String,
    /// Load from a local directory instead of the hub.
    #[clap(long, value_parser, env = "EMOTION_API_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,
    #[clap(long, value_parser, env = "EMOTION_API_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Longer inputs are truncated to this many tokens.
    #[clap(long, value_parser, env = "EMOTION_API_MAX_LENGTH", default_value_t = DEFAULT_MAX_LENGTH)]
    pub max_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: default_workers(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            model_dir: None,
            cache_dir: None,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

fn default_workers() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_WORKERS).unwrap_or(NonZeroUsize::MIN)
}

/// The subset of a DistilBERT `config.json` the loader checks. The full file
/// is also handed to candle's own config type.
#[derive(Deserialize, Debug, Clone)]
pub struct ClassifierConfig {
    #[serde(alias = "hidden_size")]
    pub dim: usize,
    #[serde(default = "default_max_positions")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub id2label: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub model_type: Option<String>,
}

fn default_max_positions() -> usize {
    512
}

impl ClassifierConfig {
    pub fn load(config_path: &Path) -> Result<Self, LoadError> {
        let contents = read_config(config_path)?;
        Self::from_json(config_path, &contents)
    }

    pub fn from_json(config_path: &Path, contents: &str) -> Result<Self, LoadError> {
        serde_json::from_str(contents).map_err(|source| LoadError::Config {
            path: config_path.to_path_buf(),
            source,
        })
    }

    pub fn num_labels(&self) -> Option<usize> {
        self.id2label.as_ref().map(|labels| labels.len())
    }

    /// Label names ordered by class index. Keys that are not integers sort last.
    pub fn label_names(&self) -> Vec<String> {
        let Some(labels) = &self.id2label else {
            return Vec::new();
        };
        let mut indexed: Vec<(usize, &String)> = labels
            .iter()
            .map(|(k, v)| (k.parse().unwrap_or(usize::MAX), v))
            .collect();
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, v)| v.to_lowercase()).collect()
    }
}

pub(crate) fn read_config(config_path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(config_path).map_err(|source| LoadError::Io {
        path: config_path.to_path_buf(),
        source,
    })
}
