//! Multi-head self-attention.

use crate::error::{EmbeddingsError, Result};
use crate::tensor::Linear;
use candle_core::{Device, Tensor, D};

/// Self-attention with separate query, key, value and output projections.
#[derive(Debug, Clone)]
pub struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    /// Output projection: [hidden_size, hidden_size]
    output: Linear,
    /// Number of attention heads.
    num_heads: usize,
    /// Head dimension.
    head_dim: usize,
}

impl SelfAttention {
    /// Create attention from its four projections.
    pub fn new(
        query: Linear,
        key: Linear,
        value: Linear,
        output: Linear,
        num_heads: usize,
    ) -> Result<Self> {
        let hidden_size = query.out_features();
        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(EmbeddingsError::ShapeMismatch(format!(
                "{hidden_size} features cannot be split into {num_heads} heads"
            )));
        }
        Ok(Self {
            query,
            key,
            value,
            output,
            num_heads,
            head_dim: hidden_size / num_heads,
        })
    }

    /// Create attention with random weights (for testing).
    pub fn random(hidden_size: usize, num_heads: usize, device: &Device) -> Result<Self> {
        let proj = || -> Result<Linear> {
            let weight = Tensor::randn(0.0f32, 0.02, &[hidden_size, hidden_size], device)?;
            let bias = Tensor::zeros(hidden_size, candle_core::DType::F32, device)?;
            Linear::new(weight, Some(bias))
        };
        Self::new(proj()?, proj()?, proj()?, proj()?, num_heads)
    }

    /// Split the last axis into heads: [B, S, H] -> [B, heads, S, head_dim].
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        Ok(x
            .reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// Forward pass over `[batch, seq_len, hidden]`.
    ///
    /// `mask` is an additive bias broadcastable to
    /// `[batch, heads, seq_len, seq_len]`.
    pub fn forward(&self, hidden_states: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch, seq_len, _) = hidden_states.dims3()?;

        let q = self.split_heads(&self.query.forward(hidden_states)?)?;
        let k = self.split_heads(&self.key.forward(hidden_states)?)?;
        let v = self.split_heads(&self.value.forward(hidden_states)?)?;

        // Attention scores: Q @ K^T / sqrt(d)
        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? * scale)?;

        let scores = match mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };

        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let context = weights.matmul(&v)?;

        // [batch, heads, seq, head_dim] -> [batch, seq, hidden]
        let context = context.transpose(1, 2)?.contiguous()?.reshape((
            batch,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;
        self.output.forward(&context)
    }

    /// Get the number of heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Get the head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }
}
