//! Checkpoint weight resolution.
//!
//! Provides:
//! - [`WeightBundle`]: every tensor of a SafeTensors file by on-disk name
//! - [`KeyTransform`] / [`KeyDialect`]: canonical name to on-disk name
//! - [`WeightResolver`]: shape-checked lookups and layer construction
//!   through a key transform

mod bundle;
mod key_transform;

pub use bundle::WeightBundle;
pub use key_transform::{KeyDialect, KeyTransform};

use crate::error::{EmbeddingsError, Result};
use crate::tensor::{Embedding, LayerNorm, Linear};
use candle_core::Tensor;
use tracing::debug;

/// Looks up canonical parameter names in a bundle through a key transform.
///
/// Shaped lookups fail with `ShapeMismatch` when the stored tensor differs
/// from the expected shape.
pub struct WeightResolver<'a> {
    bundle: &'a WeightBundle,
    transform: &'a dyn KeyTransform,
}

impl<'a> WeightResolver<'a> {
    /// Create a resolver.
    pub fn new(bundle: &'a WeightBundle, transform: &'a dyn KeyTransform) -> Self {
        Self { bundle, transform }
    }

    /// On-disk name for a canonical name.
    pub fn key(&self, name: &str) -> String {
        self.transform.transform(name)
    }

    /// Whether the checkpoint has `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.bundle.contains(&self.key(name))
    }

    /// Tensor for `name`, without a shape check.
    pub fn tensor_any(&self, name: &str) -> Result<Tensor> {
        let key = self.key(name);
        self.bundle.lookup(&key).cloned().ok_or_else(|| {
            let parent = key.rsplit_once('.').map_or("", |(parent, _)| parent);
            debug!(
                key = %key,
                siblings = ?self.bundle.names_under(parent).take(16).collect::<Vec<_>>(),
                "Weight key not found"
            );
            if key == name {
                EmbeddingsError::MissingWeightKey(key)
            } else {
                EmbeddingsError::MissingWeightKey(format!("{key} (for {name})"))
            }
        })
    }

    /// Tensor for `name`, which must have exactly `shape`.
    pub fn tensor(&self, name: &str, shape: &[usize]) -> Result<Tensor> {
        let tensor = self.tensor_any(name)?;
        if tensor.dims() != shape {
            return Err(EmbeddingsError::ShapeMismatch(format!(
                "{}: expected {:?}, found {:?}",
                self.key(name),
                shape,
                tensor.dims()
            )));
        }
        Ok(tensor)
    }

    /// `{prefix}.weight` [out, in] and optionally `{prefix}.bias` [out].
    pub fn linear(
        &self,
        prefix: &str,
        in_features: usize,
        out_features: usize,
        bias: bool,
    ) -> Result<Linear> {
        let weight = self.tensor(&format!("{prefix}.weight"), &[out_features, in_features])?;
        let bias = if bias {
            Some(self.tensor(&format!("{prefix}.bias"), &[out_features])?)
        } else {
            None
        };
        Linear::new(weight, bias)
    }

    /// `{prefix}.weight` and `{prefix}.bias`, both [size].
    pub fn layer_norm(&self, prefix: &str, size: usize, eps: f64) -> Result<LayerNorm> {
        let weight = self.tensor(&format!("{prefix}.weight"), &[size])?;
        let bias = self.tensor(&format!("{prefix}.bias"), &[size])?;
        LayerNorm::new(weight, bias, eps)
    }

    /// Embedding table `name` of [rows, dim].
    pub fn embedding(&self, name: &str, rows: usize, dim: usize) -> Result<Embedding> {
        Ok(Embedding::new(self.tensor(name, &[rows, dim])?))
    }
}
