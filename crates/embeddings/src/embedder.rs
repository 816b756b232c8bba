//! High-level embedding engine.

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use embeddings_core::{
    model::{load_model_bundle, Architecture, LoadConfig, Model2Vec, ModelBundle, StaticEmbeddings},
    tensor::{cosine_similarity, materialize},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Which family of model a folder holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Transformer encoder checkpoint.
    Encoder(Architecture),
    /// Mean-pooled lookup table (`embedding.weight`).
    Static,
    /// Distilled lookup table (`embeddings` + `config.json`).
    Model2Vec,
}

/// Configuration for the embedder.
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Model folder.
    pub model_dir: PathBuf,
    /// Model family.
    pub kind: ModelKind,
    /// Token limit per text; `None` uses the model's default.
    pub max_length: Option<usize>,
    /// L2-normalize static embeddings.
    pub normalize: bool,
    /// Keep only the first `n` dimensions of static embeddings.
    pub truncate_dimension: Option<usize>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::new(),
            kind: ModelKind::Encoder(Architecture::Bert),
            max_length: None,
            normalize: false,
            truncate_dimension: None,
        }
    }
}

/// Builder for creating an [`Embedder`].
pub struct EmbedderBuilder {
    config: EmbedderConfig,
    load_config: LoadConfig,
    device: Device,
}

impl EmbedderBuilder {
    /// Create a new embedder builder.
    pub fn new() -> Self {
        Self {
            config: EmbedderConfig::default(),
            load_config: LoadConfig::default(),
            device: Device::Cpu,
        }
    }

    /// Set the model folder.
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    /// Load a transformer encoder of `architecture`.
    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.config.kind = ModelKind::Encoder(architecture);
        self
    }

    /// Set the model family.
    pub fn kind(mut self, kind: ModelKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Set the token limit per text.
    pub fn max_length(mut self, len: usize) -> Self {
        self.config.max_length = Some(len);
        self
    }

    /// L2-normalize static embeddings.
    pub fn normalize(mut self, normalize: bool) -> Self {
        self.config.normalize = normalize;
        self
    }

    /// Keep only the first `n` dimensions of static embeddings.
    pub fn truncate_dimension(mut self, n: usize) -> Self {
        self.config.truncate_dimension = Some(n);
        self
    }

    /// Set file names and key transform.
    pub fn load_config(mut self, load_config: LoadConfig) -> Self {
        self.load_config = load_config;
        self
    }

    /// Set the device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Load the model.
    pub async fn build(self) -> Result<Embedder> {
        let Self {
            config,
            load_config,
            device,
        } = self;
        if config.truncate_dimension == Some(0) {
            bail!("truncate_dimension must be positive");
        }

        let dir = config.model_dir.clone();
        let kind = config.kind;
        let model = tokio::task::spawn_blocking(move || -> Result<Model> {
            Ok(match kind {
                ModelKind::Encoder(architecture) => Model::Encoder(load_model_bundle(
                    &dir,
                    architecture,
                    &load_config,
                    &device,
                )?),
                ModelKind::Static => {
                    Model::Static(StaticEmbeddings::load(&dir, &load_config, &device)?)
                }
                ModelKind::Model2Vec => {
                    Model::Model2Vec(Model2Vec::load(&dir, &load_config, &device)?)
                }
            })
        })
        .await
        .context("model loading task panicked")?
        .with_context(|| format!("failed to load {}", config.model_dir.display()))?;

        info!(
            path = %config.model_dir.display(),
            kind = ?config.kind,
            dimension = model.dimension(),
            "Embedder ready"
        );
        Ok(Embedder {
            config,
            model: Arc::new(model),
        })
    }
}

impl Default for EmbedderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

enum Model {
    Encoder(ModelBundle),
    Static(StaticEmbeddings),
    Model2Vec(Model2Vec),
}

impl Model {
    fn dimension(&self) -> usize {
        match self {
            Self::Encoder(bundle) => bundle.dimension(),
            Self::Static(model) => model.dimension(),
            Self::Model2Vec(model) => model.dimension(),
        }
    }

    fn batch_encode(&self, texts: &[&str], config: &EmbedderConfig) -> Result<Tensor> {
        let out = match self {
            Self::Encoder(bundle) => bundle.batch_encode(texts, config.max_length)?,
            Self::Static(model) => model.batch_encode(
                texts,
                config.normalize,
                config.max_length,
                config.truncate_dimension,
            )?,
            Self::Model2Vec(model) => model.batch_encode(texts, config.max_length)?,
        };
        Ok(out)
    }
}

/// Text embedding engine.
///
/// Cheap to clone; clones share the loaded model.
#[derive(Clone)]
pub struct Embedder {
    config: EmbedderConfig,
    model: Arc<Model>,
}

impl Embedder {
    /// Create a new embedder builder.
    pub fn builder() -> EmbedderBuilder {
        EmbedderBuilder::new()
    }

    /// Get embedder configuration.
    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Width of the returned vectors.
    pub fn dimension(&self) -> usize {
        match (&*self.model, self.config.truncate_dimension) {
            (Model::Static(model), Some(n)) => n.min(model.dimension()),
            (model, _) => model.dimension(),
        }
    }

    /// Embed one text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut rows = self.embed_batch(&[text]).await?;
        rows.pop().context("empty embedding batch")
    }

    /// Embed several texts, one vector per text in input order.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let tensor = self.encode_tensor(texts).await?;
        Ok(materialize::to_vec2(&tensor).await?)
    }

    /// Cosine similarity between the embeddings of two texts.
    pub async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        let embeddings = self.encode_tensor(&[a, b]).await?;
        let scores = cosine_similarity(&embeddings.get(0)?, &embeddings.get(1)?)?;
        let scores = materialize::scalars(&scores).await?;
        scores.first().copied().context("empty similarity")
    }

    async fn encode_tensor(&self, texts: &[&str]) -> Result<Tensor> {
        if texts.is_empty() {
            bail!("no texts to embed");
        }
        debug!(texts = texts.len(), "Embedding batch");
        let model = Arc::clone(&self.model);
        let config = self.config.clone();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = owned.iter().map(String::as_str).collect();
            model.batch_encode(&refs, &config)
        })
        .await
        .context("embedding task panicked")?
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("config", &self.config)
            .field("dimension", &self.dimension())
            .finish()
    }
}
