//! Model loading and inference.
//!
//! Provides the encoder families and the bundles built from them:
//! - Model configuration and architecture selection
//! - Encoder building blocks (embeddings, attention, layers, masks, pooling)
//! - Checkpoint loading into an [`EncoderStack`]
//! - Text-to-embedding bundles, including static lookup-table models

mod attention;
mod bundle;
mod config;
mod embeddings;
mod encoder;
mod layer;
mod loader;
mod mask;
mod pooling;
mod static_embeddings;

pub use attention::SelfAttention;
pub use bundle::ModelBundle;
pub use config::{Architecture, ModelConfig};
pub use embeddings::{Embeddings, PositionIds};
pub use encoder::{expected_parameters, EncoderOutput, EncoderStack};
pub use layer::{EncoderLayer, FeedForward, NormPlacement};
pub use loader::{load_encoder, load_model_bundle, LoadConfig, TokenizerSource};
pub use mask::{MaskKind, PADDING_BIAS};
pub use pooling::Pooler;
pub use static_embeddings::{Model2Vec, Model2VecConfig, StaticEmbeddings};
