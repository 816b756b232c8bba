//! # Embeddings Core
//!
//! Inference-time building blocks for text embedding models.
//!
//! This crate provides:
//! - **Tokenizers**: byte-pair encoding with a merge cache, and a
//!   `tokenizer.json` subword wrapper, behind one [`tokenizer::TextTokenizer`]
//!   contract
//! - **Tensor primitives**: activations, layers, distances and masks over
//!   Candle tensors, with an async materialization boundary
//! - **Weight resolution**: SafeTensors bundles read through pluggable
//!   parameter-name dialects
//! - **Encoder stacks** for BERT, XLM-RoBERTa and the CLIP text tower, plus
//!   static lookup-table models
//! - **Similarity search** over word2vec vectors

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod model;
pub mod similarity;
pub mod tensor;
pub mod tokenizer;
pub mod weights;

pub use error::{EmbeddingsError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{EmbeddingsError, Result};
    pub use crate::model::{
        load_model_bundle, Architecture, EncoderStack, LoadConfig, Model2Vec, ModelBundle,
        ModelConfig, StaticEmbeddings,
    };
    pub use crate::similarity::SimilarityIndex;
    pub use crate::tokenizer::{TextTokenizer, Tokenizer};
    pub use crate::weights::{KeyDialect, KeyTransform};
}
