//! # Model Loader
//!
//! Resolves the pretrained emotion classifier at startup, either from the
//! Hugging Face hub cache or from a local directory, checks that it really
//! is a six-label DistilBERT classifier and assembles a
//! [`DistilBertClassifier`]. Any failure here is fatal for the process.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::distilbert::Config as DistilBertConfig;
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use log::{debug, info, warn};
use safetensors::SafeTensors;

use crate::config::{read_config, ClassifierConfig, ServerConfig};
use crate::emotion::{EMOTION_LABELS, NUM_LABELS};
use crate::error::LoadError;
use crate::model::DistilBertClassifier;
use crate::tokenizer::TokenizerWrapper;

const CONFIG_FILE: &str = "config.json";
const SAFETENSORS_FILE: &str = "model.safetensors";
const PTH_FILE: &str = "pytorch_model.bin";
const TOKENIZER_JSON_FILE: &str = "tokenizer.json";
const VOCAB_FILE: &str = "vocab.txt";

const ENCODER_PREFIX: &str = "distilbert";
const HEAD_WEIGHT: &str = "classifier.weight";

/// Where the model artifact comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Hub {
        model_id: String,
        revision: String,
        cache_dir: Option<PathBuf>,
    },
    Local(PathBuf),
}

impl ModelSource {
    /// A configured model directory wins over the hub.
    pub fn from_config(config: &ServerConfig) -> Self {
        match &config.model_dir {
            Some(dir) => ModelSource::Local(dir.clone()),
            None => ModelSource::Hub {
                model_id: config.model_id.clone(),
                revision: config.revision.clone(),
                cache_dir: config.cache_dir.clone(),
            },
        }
    }

    /// Locates (downloading into the hub cache if needed) every file the
    /// classifier needs.
    pub fn resolve(&self) -> Result<ModelFiles, LoadError> {
        match self {
            ModelSource::Local(dir) => {
                if !dir.is_dir() {
                    return Err(LoadError::MissingDirectory(dir.clone()));
                }
                let fetch = |name: &str| {
                    let path = dir.join(name);
                    if path.is_file() {
                        Ok(path)
                    } else {
                        Err("not found".to_string())
                    }
                };
                let config = fetch(CONFIG_FILE).map_err(|reason| LoadError::MissingFile {
                    kind: "model config",
                    tried: format!("{} ({})", CONFIG_FILE, reason),
                })?;
                ModelFiles::collect(config, fetch)
            }
            ModelSource::Hub {
                model_id,
                revision,
                cache_dir,
            } => {
                let hub_err = |source| LoadError::Hub {
                    model_id: model_id.clone(),
                    source,
                };
                let mut builder = ApiBuilder::new().with_progress(false);
                if let Some(dir) = cache_dir {
                    builder = builder.with_cache_dir(dir.clone());
                }
                let api = builder.build().map_err(hub_err)?;
                let repo = api.repo(Repo::with_revision(
                    model_id.clone(),
                    RepoType::Model,
                    revision.clone(),
                ));

                // config.json must exist; its error is the most useful one to surface.
                let config = repo.get(CONFIG_FILE).map_err(hub_err)?;
                ModelFiles::collect(config, |name| {
                    repo.get(name).map_err(|e| {
                        warn!("{} not available from {}: {}", name, model_id, e);
                        e.to_string()
                    })
                })
            }
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Hub {
                model_id, revision, ..
            } => write!(f, "hub:{}@{}", model_id, revision),
            ModelSource::Local(dir) => write!(f, "dir:{}", dir.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightsFile {
    SafeTensors(PathBuf),
    Pth(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenizerFile {
    Json(PathBuf),
    Vocab(PathBuf),
}

/// Resolved on-disk locations of one model artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: WeightsFile,
    pub tokenizer: TokenizerFile,
}

impl ModelFiles {
    /// Picks the preferred weights and tokenizer files. `fetch` returns the
    /// local path of a file or the reason it could not be obtained; the
    /// reasons end up in the `MissingFile` error when no candidate is found.
    fn collect(
        config: PathBuf,
        fetch: impl Fn(&str) -> Result<PathBuf, String>,
    ) -> Result<Self, LoadError> {
        let weights = first_available(
            &fetch,
            "model weights",
            [
                (SAFETENSORS_FILE, WeightsFile::SafeTensors as fn(PathBuf) -> WeightsFile),
                (PTH_FILE, WeightsFile::Pth),
            ],
        )?;
        let tokenizer = first_available(
            &fetch,
            "tokenizer",
            [
                (TOKENIZER_JSON_FILE, TokenizerFile::Json as fn(PathBuf) -> TokenizerFile),
                (VOCAB_FILE, TokenizerFile::Vocab),
            ],
        )?;
        Ok(Self {
            config,
            weights,
            tokenizer,
        })
    }
}

fn first_available<T>(
    fetch: &impl Fn(&str) -> Result<PathBuf, String>,
    kind: &'static str,
    candidates: [(&str, fn(PathBuf) -> T); 2],
) -> Result<T, LoadError> {
    let mut failures = Vec::with_capacity(candidates.len());
    for (name, wrap) in candidates {
        match fetch(name) {
            Ok(path) => return Ok(wrap(path)),
            Err(reason) => failures.push(format!("{} ({})", name, reason)),
        }
    }
    Err(LoadError::MissingFile {
        kind,
        tried: failures.join(", "),
    })
}

/// Resolves and loads the classifier described by `config`.
pub fn load_classifier(config: &ServerConfig) -> Result<DistilBertClassifier, LoadError> {
    let source = ModelSource::from_config(config);
    info!("Resolving model from {}", source);
    let files = source.resolve()?;
    debug!("Resolved model files: {:?}", files);
    load_from_files(&files, config.max_length)
}

pub fn load_from_files(files: &ModelFiles, max_length: usize) -> Result<DistilBertClassifier, LoadError> {
    let raw_config = read_config(&files.config)?;
    let classifier_config = ClassifierConfig::from_json(&files.config, &raw_config)?;
    check_labels(&classifier_config)?;
    check_max_length(max_length, classifier_config.max_position_embeddings)?;

    let encoder_config: DistilBertConfig =
        serde_json::from_str(&raw_config).map_err(|source| LoadError::Config {
            path: files.config.clone(),
            source,
        })?;

    let tokenizer = match &files.tokenizer {
        TokenizerFile::Json(path) => TokenizerWrapper::from_file(path, max_length)?,
        TokenizerFile::Vocab(path) => {
            info!("No tokenizer.json, building WordPiece tokenizer from {}", path.display());
            TokenizerWrapper::from_vocab(path, max_length)?
        }
    };
    let vocab_size = tokenizer.get_vocab_size();

    let device = Device::Cpu;
    let (vb, encoder_prefix) = match &files.weights {
        WeightsFile::SafeTensors(path) => {
            let bytes = fs::read(path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
            let prefix = {
                let tensors = SafeTensors::deserialize(&bytes)?;
                check_head(&tensors, classifier_config.dim)?;
                detect_encoder_prefix(&tensors)
            };
            info!("Loading safetensors weights from {}", path.display());
            (VarBuilder::from_buffered_safetensors(bytes, DType::F32, &device)?, prefix)
        }
        WeightsFile::Pth(path) => {
            info!("Loading PyTorch weights from {}", path.display());
            (VarBuilder::from_pth(path, DType::F32, &device)?, Some(ENCODER_PREFIX))
        }
    };

    let classifier = DistilBertClassifier::load(
        vb,
        &encoder_config,
        classifier_config.dim,
        encoder_prefix,
        tokenizer,
    )?;
    info!(
        "Loaded emotion classifier (dim={}, vocab={}, max_length={}, labels={:?})",
        classifier_config.dim,
        vocab_size,
        classifier.max_length(),
        EMOTION_LABELS
    );
    Ok(classifier)
}

fn check_labels(config: &ClassifierConfig) -> Result<(), LoadError> {
    match config.num_labels() {
        None => warn!("Model config has no id2label; assuming {:?}", EMOTION_LABELS),
        Some(n) if n != NUM_LABELS => {
            return Err(LoadError::LabelCount {
                expected: NUM_LABELS,
                actual: n,
            })
        }
        Some(_) => {
            let names = config.label_names();
            if names.iter().map(String::as_str).ne(EMOTION_LABELS.iter().copied()) {
                warn!(
                    "Model labels {:?} differ from {:?}; reporting the latter",
                    names, EMOTION_LABELS
                );
            }
        }
    }
    Ok(())
}

fn check_max_length(requested: usize, limit: usize) -> Result<(), LoadError> {
    if requested < 2 || requested > limit {
        return Err(LoadError::MaxLength { requested, limit });
    }
    Ok(())
}

fn check_head(tensors: &SafeTensors<'_>, dim: usize) -> Result<(), LoadError> {
    let view = tensors
        .tensor(HEAD_WEIGHT)
        .map_err(|_| LoadError::MissingTensor(HEAD_WEIGHT.to_string()))?;
    let expected = vec![NUM_LABELS, dim];
    if view.shape() != expected.as_slice() {
        return Err(LoadError::HeadShape {
            expected,
            actual: view.shape().to_vec(),
        });
    }
    Ok(())
}

fn detect_encoder_prefix(tensors: &SafeTensors<'_>) -> Option<&'static str> {
    let prefixed = format!("{}.", ENCODER_PREFIX);
    tensors
        .names()
        .iter()
        .any(|name| name.starts_with(&prefixed))
        .then_some(ENCODER_PREFIX)
}
