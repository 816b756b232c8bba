//! # Embeddings
//!
//! Text embeddings from pretrained checkpoints, on the CPU, in pure Rust.
//!
//! - **Encoders**: BERT, XLM-RoBERTa and the CLIP text tower loaded from
//!   SafeTensors folders
//! - **Static models**: mean-pooled lookup tables and Model2Vec
//! - **Word vectors**: nearest neighbours over word2vec files
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use embeddings::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let embedder = Embedder::builder()
//!         .model_dir("models/clip-vit-base-patch32")
//!         .architecture(Architecture::ClipText)
//!         .build()
//!         .await?;
//!
//!     let vector = embedder.embed("a photo of a cat").await?;
//!     println!("{} dimensions", vector.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use embeddings_core::*;

mod embedder;

pub use embedder::{Embedder, EmbedderBuilder, EmbedderConfig, ModelKind};

/// Commonly used types.
pub mod prelude {
    pub use crate::embedder::{Embedder, EmbedderBuilder, EmbedderConfig, ModelKind};
    pub use crate::{
        error::{EmbeddingsError, Result},
        model::{Architecture, LoadConfig, ModelBundle, TokenizerSource},
        similarity::SimilarityIndex,
        weights::{KeyDialect, KeyTransform},
    };

    // Re-export useful external types
    pub use anyhow;
    pub use tokio;
    pub use tracing;
}
