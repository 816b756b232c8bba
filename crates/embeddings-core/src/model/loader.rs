//! Model folder loading.
//!
//! A model folder holds a `config.json`, a `.safetensors` weight bundle and
//! tokenizer files. [`LoadConfig`] names those files and the key transform
//! that maps canonical parameter names onto the checkpoint's own.
//!
//! # Example
//!
//! ```ignore
//! use embeddings_core::model::{load_model_bundle, Architecture, LoadConfig};
//!
//! let config = LoadConfig::default().with_key_transform(KeyDialect::GoogleBert);
//! let bundle = load_model_bundle("/path/to/bert", Architecture::Bert, &config, &Device::Cpu)?;
//! let embedding = bundle.encode("a photo of a cat", None)?;
//! ```

use super::{Architecture, EncoderStack, ModelBundle, ModelConfig};
use crate::error::{EmbeddingsError, Result};
use crate::tokenizer::{BpeTokenizer, PlainTokenizer, SpecialTokens, SubwordTokenizer, Tokenizer};
use crate::weights::{KeyDialect, KeyTransform, WeightBundle, WeightResolver};
use candle_core::Device;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Where a model folder keeps its tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerSource {
    /// `vocab.json` + `merges.txt` byte-pair encoding.
    Bpe {
        /// Vocabulary file name.
        vocab: String,
        /// Merges file name.
        merges: String,
    },
    /// `tokenizer.json` segmentation model.
    Subword {
        /// Tokenizer file name.
        file: String,
        /// Special token strings.
        specials: SpecialTokens,
    },
    /// `tokenizer.json` segmentation without special tokens.
    Plain {
        /// Tokenizer file name.
        file: String,
    },
}

impl TokenizerSource {
    /// The usual tokenizer files of an architecture.
    pub fn default_for(architecture: Architecture) -> Self {
        match architecture {
            Architecture::ClipText => Self::Bpe {
                vocab: "vocab.json".into(),
                merges: "merges.txt".into(),
            },
            Architecture::XlmRoberta => Self::Subword {
                file: "tokenizer.json".into(),
                specials: SpecialTokens::xlm_roberta(),
            },
            Architecture::Bert => Self::Subword {
                file: "tokenizer.json".into(),
                specials: SpecialTokens::bert(),
            },
        }
    }

    /// `tokenizer.json` without special tokens, as lookup-table models use.
    pub fn plain() -> Self {
        Self::Plain {
            file: "tokenizer.json".into(),
        }
    }

    /// Load the tokenizer from `dir`.
    pub fn load(&self, dir: &Path) -> Result<Tokenizer> {
        match self {
            Self::Bpe { vocab, merges } => {
                Ok(BpeTokenizer::from_files(dir.join(vocab), dir.join(merges))?.into())
            }
            Self::Subword { file, specials } => {
                Ok(SubwordTokenizer::from_file(dir.join(file), specials)?.into())
            }
            Self::Plain { file } => Ok(PlainTokenizer::from_file(dir.join(file))?.into()),
        }
    }
}

/// File names and key transform used to load a model folder.
#[derive(Clone)]
pub struct LoadConfig {
    /// Weight bundle file name.
    pub weights_file_name: String,
    /// Config file name.
    pub config_file_name: String,
    /// Canonical name to checkpoint name.
    pub key_transform: Arc<dyn KeyTransform>,
    /// Tokenizer files; `None` picks the architecture's default.
    pub tokenizer: Option<TokenizerSource>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            weights_file_name: "model.safetensors".into(),
            config_file_name: "config.json".into(),
            key_transform: Arc::new(KeyDialect::Identity),
            tokenizer: None,
        }
    }
}

impl LoadConfig {
    /// Set the weight bundle file name.
    pub fn with_weights_file_name(mut self, name: impl Into<String>) -> Self {
        self.weights_file_name = name.into();
        self
    }

    /// Set the config file name.
    pub fn with_config_file_name(mut self, name: impl Into<String>) -> Self {
        self.config_file_name = name.into();
        self
    }

    /// Set the key transform.
    pub fn with_key_transform(mut self, transform: impl KeyTransform + 'static) -> Self {
        self.key_transform = Arc::new(transform);
        self
    }

    /// Set the tokenizer source.
    pub fn with_tokenizer(mut self, source: TokenizerSource) -> Self {
        self.tokenizer = Some(source);
        self
    }

    /// Tokenizer source for `architecture`.
    pub fn tokenizer_source(&self, architecture: Architecture) -> TokenizerSource {
        self.tokenizer
            .clone()
            .unwrap_or_else(|| TokenizerSource::default_for(architecture))
    }

    /// Tokenizer source for a lookup-table model.
    pub fn static_tokenizer_source(&self) -> TokenizerSource {
        self.tokenizer.clone().unwrap_or_else(TokenizerSource::plain)
    }
}

impl std::fmt::Debug for LoadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadConfig")
            .field("weights_file_name", &self.weights_file_name)
            .field("config_file_name", &self.config_file_name)
            .field("tokenizer", &self.tokenizer)
            .finish_non_exhaustive()
    }
}

/// Fail with `FileNotFound` unless `dir` is a directory.
pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(EmbeddingsError::FileNotFound(dir.to_path_buf()))
    }
}

/// Build an encoder from a weight file and a parsed config.
pub fn load_encoder(
    weights_path: impl AsRef<Path>,
    config: &ModelConfig,
    architecture: Architecture,
    key_transform: &dyn KeyTransform,
    device: &Device,
) -> Result<EncoderStack> {
    let bundle = WeightBundle::from_file(weights_path, device)?;
    let resolver = WeightResolver::new(&bundle, key_transform);
    EncoderStack::load(&resolver, config, architecture)
}

/// Load config, weights and tokenizer from a model folder.
///
/// Any missing file or tensor fails the whole load.
pub fn load_model_bundle(
    dir: impl AsRef<Path>,
    architecture: Architecture,
    load_config: &LoadConfig,
    device: &Device,
) -> Result<ModelBundle> {
    let dir = dir.as_ref();
    ensure_dir(dir)?;

    let config = ModelConfig::from_file(dir.join(&load_config.config_file_name), architecture)?;
    let encoder = load_encoder(
        dir.join(&load_config.weights_file_name),
        &config,
        architecture,
        load_config.key_transform.as_ref(),
        device,
    )?;
    let tokenizer = load_config.tokenizer_source(architecture).load(dir)?;

    let pad_token_id = config
        .pad_token_id
        .or_else(|| tokenizer.pad_token_id())
        .unwrap_or(0);

    info!(
        path = %dir.display(),
        architecture = %architecture,
        layers = encoder.num_layers(),
        pad_token_id,
        "Loaded model bundle"
    );
    Ok(ModelBundle::new(encoder, tokenizer, pad_token_id, device))
}
