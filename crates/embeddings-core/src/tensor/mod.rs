//! Tensor primitives.
//!
//! Compositions over [`candle_core::Tensor`]:
//! - Activations (sigmoid, erf, three GELU forms)
//! - Reductions and distances
//! - Parameterised layers
//! - Host materialization

pub mod activation;
pub mod functions;
mod layers;
pub mod materialize;

pub use activation::{erf, gelu, sigmoid, GeluApproximation};
pub use functions::{
    additive_causal_mask, cosine_distance, cosine_similarity, dot_product, euclidean_distance,
    l2_norm, l2_normalize, masked_mean_pool, mean_pool, MASKED_BIAS,
};
pub use layers::{Embedding, LayerNorm, Linear};
