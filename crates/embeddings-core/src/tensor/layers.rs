//! Parameterised layers: linear projection, token embedding, layer norm.
//!
//! Layers own their weight tensors and check their shapes on construction.

use crate::error::{EmbeddingsError, Result};
use candle_core::{DType, Device, Tensor, D};

/// Affine projection `x·Wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    /// Weight: [out_features, in_features]
    weight: Tensor,
    /// Bias: [out_features]
    bias: Option<Tensor>,
}

impl Linear {
    /// Create a linear layer from its weight and optional bias.
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let (out_features, _) = weight.dims2()?;
        if let Some(bias) = &bias {
            if bias.dims() != [out_features] {
                return Err(EmbeddingsError::ShapeMismatch(format!(
                    "bias {:?} for weight {:?}",
                    bias.dims(),
                    weight.dims()
                )));
            }
        }
        Ok(Self { weight, bias })
    }

    /// Forward pass over `[..., in_features]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (out_features, in_features) = self.weight.dims2()?;
        let dims = x.dims().to_vec();
        let rows = x.elem_count() / in_features.max(1);

        // Reshape to 2D for matmul
        let x_2d = x.reshape((rows, in_features))?;
        let mut out = x_2d.matmul(&self.weight.t()?)?;
        if let Some(bias) = &self.bias {
            out = out.broadcast_add(bias)?;
        }

        let mut out_dims = dims;
        if let Some(last) = out_dims.last_mut() {
            *last = out_features;
        }
        Ok(out.reshape(out_dims)?)
    }

    /// Input width.
    pub fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    /// Output width.
    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }
}

/// Row lookup into an embedding table.
#[derive(Debug, Clone)]
pub struct Embedding {
    /// Table: [num_embeddings, ...]
    weight: Tensor,
}

impl Embedding {
    /// Wrap an embedding table.
    pub fn new(weight: Tensor) -> Self {
        Self { weight }
    }

    /// Gather rows of the table.
    ///
    /// Ids of any rank are accepted; the output shape is the id shape
    /// followed by the trailing dimensions of the table.
    pub fn forward(&self, ids: &Tensor) -> Result<Tensor> {
        let ids = match ids.dtype() {
            DType::U32 | DType::I64 => ids.clone(),
            _ => ids.to_dtype(DType::U32)?,
        };
        let flat = ids.flatten_all()?;
        let rows = self.weight.index_select(&flat, 0)?;

        let mut shape = ids.dims().to_vec();
        shape.extend_from_slice(&self.weight.dims()[1..]);
        Ok(rows.reshape(shape)?)
    }

    /// The underlying table.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Number of rows.
    pub fn num_embeddings(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Row width (1 for a rank-1 table).
    pub fn embedding_dim(&self) -> usize {
        self.weight.dims()[1..].iter().product()
    }
}

/// Layer normalization over the last axis.
///
/// # Formula
///
/// `LayerNorm(x) = (x - mean(x)) / sqrt(var(x) + eps) * weight + bias`
///
/// # Reference
///
/// [Layer Normalization](https://arxiv.org/abs/1607.06450)
#[derive(Debug, Clone)]
pub struct LayerNorm {
    /// Learnable scale.
    weight: Tensor,
    /// Learnable shift.
    bias: Tensor,
    /// Small constant for numerical stability.
    eps: f64,
}

impl LayerNorm {
    /// Create a layer norm with given weight and bias.
    pub fn new(weight: Tensor, bias: Tensor, eps: f64) -> Result<Self> {
        if weight.dims() != bias.dims() {
            return Err(EmbeddingsError::ShapeMismatch(format!(
                "layer norm weight {:?} and bias {:?}",
                weight.dims(),
                bias.dims()
            )));
        }
        Ok(Self { weight, bias, eps })
    }

    /// Identity-initialised layer norm (ones and zeros).
    pub fn identity(hidden_size: usize, eps: f64, device: &Device) -> Result<Self> {
        let weight = Tensor::ones(hidden_size, DType::F32, device)?;
        let bias = Tensor::zeros(hidden_size, DType::F32, device)?;
        Self::new(weight, bias, eps)
    }

    /// Forward pass over `[..., hidden_size]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;

        // 1/sqrt(var + eps)
        let inv_std = (variance + self.eps)?.sqrt()?.recip()?;
        let normalized = centered.broadcast_mul(&inv_std)?;

        Ok(normalized
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?)
    }

    /// Get epsilon value.
    pub fn eps(&self) -> f64 {
        self.eps
    }
}
