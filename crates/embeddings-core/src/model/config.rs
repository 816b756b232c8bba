//! Model configuration.

use crate::error::{EmbeddingsError, Result};
use crate::tensor::GeluApproximation;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Encoder families this crate can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// BERT: post-norm, range positions, dense+tanh pooler.
    Bert,
    /// XLM-RoBERTa: BERT layout with padding-aware position ids.
    XlmRoberta,
    /// CLIP text tower: pre-norm, causal attention, end-token pooling.
    ClipText,
}

impl Architecture {
    /// Sequence length used when a caller gives none.
    pub fn default_max_length(self) -> usize {
        match self {
            Self::Bert => 512,
            Self::XlmRoberta => 128,
            Self::ClipText => 77,
        }
    }

    /// Feed-forward activation.
    pub fn activation(self) -> GeluApproximation {
        match self {
            Self::Bert | Self::XlmRoberta => GeluApproximation::Exact,
            Self::ClipText => GeluApproximation::Fast,
        }
    }

    /// Layer norm epsilon when `config.json` has none.
    pub fn default_layer_norm_eps(self) -> f64 {
        match self {
            Self::Bert | Self::XlmRoberta => 1e-12,
            Self::ClipText => 1e-5,
        }
    }
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bert => "bert",
            Self::XlmRoberta => "xlm_roberta",
            Self::ClipText => "clip_text",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Architecture {
    type Err = EmbeddingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "bert" => Ok(Self::Bert),
            "xlm_roberta" | "roberta" => Ok(Self::XlmRoberta),
            "clip" | "clip_text" | "clip_text_model" => Ok(Self::ClipText),
            other => Err(EmbeddingsError::InvalidArgument(format!(
                "unknown architecture: {other}"
            ))),
        }
    }
}

fn default_type_vocab_size() -> usize {
    2
}

/// Hyperparameters of an encoder, as found in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model architecture type.
    #[serde(default)]
    pub model_type: String,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Hidden dimension.
    pub hidden_size: usize,
    /// Number of layers.
    pub num_hidden_layers: usize,
    /// Number of attention heads.
    pub num_attention_heads: usize,
    /// Intermediate dimension (FFN).
    pub intermediate_size: usize,
    /// Number of position embedding rows.
    pub max_position_embeddings: usize,
    /// Layer norm epsilon. Filled from the architecture when absent.
    #[serde(default)]
    pub layer_norm_eps: Option<f64>,
    /// Number of token type rows.
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    /// Padding id; also the padding index of XLM-R positions.
    #[serde(default)]
    pub pad_token_id: Option<u32>,
    /// Whether the checkpoint carries a pooler. Defaults to true.
    #[serde(default)]
    pub add_pooling_layer: Option<bool>,
    /// Width of the CLIP text projection.
    #[serde(default)]
    pub projection_dim: Option<usize>,
}

impl ModelConfig {
    /// Head dimension.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads.max(1)
    }

    /// Layer norm epsilon, falling back to the architecture default.
    pub fn layer_norm_eps(&self, architecture: Architecture) -> f64 {
        self.layer_norm_eps
            .unwrap_or_else(|| architecture.default_layer_norm_eps())
    }

    /// Whether a pooler is built.
    pub fn add_pooling_layer(&self) -> bool {
        self.add_pooling_layer.unwrap_or(true)
    }

    /// Padding id, `0` when unset.
    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id.unwrap_or(0)
    }

    /// Check the values that layer construction relies on.
    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(EmbeddingsError::InvalidFile(format!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_hidden_layers == 0 {
            return Err(EmbeddingsError::InvalidFile(
                "num_hidden_layers must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Parse `config.json` contents for `architecture`.
    ///
    /// CLIP configs nest the text tower under `text_config`; the top-level
    /// `projection_dim` is carried over when the sub-object lacks one.
    pub fn from_json(json: &str, architecture: Architecture) -> Result<Self> {
        let config: Self = match architecture {
            Architecture::ClipText => {
                let mut root: serde_json::Value = serde_json::from_str(json)?;
                let projection_dim = root.get("projection_dim").cloned();
                let mut text = if root.get("text_config").is_some() {
                    root["text_config"].take()
                } else {
                    root
                };
                if let (Some(obj), Some(dim)) = (text.as_object_mut(), projection_dim) {
                    obj.entry("projection_dim").or_insert(dim);
                }
                serde_json::from_value(text)?
            }
            Architecture::Bert | Architecture::XlmRoberta => serde_json::from_str(json)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON file.
    pub fn from_file(path: impl AsRef<Path>, architecture: Architecture) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EmbeddingsError::FileNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents, architecture)
    }
}
