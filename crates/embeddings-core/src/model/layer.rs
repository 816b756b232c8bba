//! Transformer encoder layer.
//!
//! One block combines:
//! - Multi-head self-attention
//! - A two-projection feed-forward network with a gelu activation
//! - Two residual connections, each with a layer norm
//!
//! Where the norms sit relative to the residuals is [`NormPlacement`].

use super::SelfAttention;
use crate::error::Result;
use crate::tensor::{gelu, GeluApproximation, LayerNorm, Linear};
use candle_core::{DType, Device, Tensor};

/// Position of the layer norms within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormPlacement {
    /// `norm(x + sublayer(x))`, as in BERT.
    Post,
    /// `x + sublayer(norm(x))`, as in CLIP.
    Pre,
}

/// Feed-forward network: `output(gelu(intermediate(x)))`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    /// Up projection: [intermediate_size, hidden_size]
    intermediate: Linear,
    /// Down projection: [hidden_size, intermediate_size]
    output: Linear,
    activation: GeluApproximation,
}

impl FeedForward {
    /// Create a feed-forward network.
    pub fn new(intermediate: Linear, output: Linear, activation: GeluApproximation) -> Self {
        Self {
            intermediate,
            output,
            activation,
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.intermediate.forward(x)?;
        let h = gelu(&h, self.activation)?;
        self.output.forward(&h)
    }
}

/// A single transformer encoder layer.
#[derive(Debug, Clone)]
pub struct EncoderLayer {
    attention: SelfAttention,
    /// Norm around the attention sublayer.
    attention_norm: LayerNorm,
    feed_forward: FeedForward,
    /// Norm around the feed-forward sublayer.
    output_norm: LayerNorm,
    placement: NormPlacement,
    /// Layer index (for debugging).
    layer_idx: usize,
}

impl EncoderLayer {
    /// Create a new encoder layer.
    pub fn new(
        attention: SelfAttention,
        attention_norm: LayerNorm,
        feed_forward: FeedForward,
        output_norm: LayerNorm,
        placement: NormPlacement,
        layer_idx: usize,
    ) -> Self {
        Self {
            attention,
            attention_norm,
            feed_forward,
            output_norm,
            placement,
            layer_idx,
        }
    }

    /// Create an encoder layer with random weights (for testing).
    #[allow(clippy::too_many_arguments)]
    pub fn random(
        hidden_size: usize,
        intermediate_size: usize,
        num_heads: usize,
        eps: f64,
        placement: NormPlacement,
        activation: GeluApproximation,
        layer_idx: usize,
        device: &Device,
    ) -> Result<Self> {
        let linear = |out: usize, inp: usize| -> Result<Linear> {
            let weight = Tensor::randn(0.0f32, 0.02, &[out, inp], device)?;
            let bias = Tensor::zeros(out, DType::F32, device)?;
            Linear::new(weight, Some(bias))
        };
        let feed_forward = FeedForward::new(
            linear(intermediate_size, hidden_size)?,
            linear(hidden_size, intermediate_size)?,
            activation,
        );
        Ok(Self::new(
            SelfAttention::random(hidden_size, num_heads, device)?,
            LayerNorm::identity(hidden_size, eps, device)?,
            feed_forward,
            LayerNorm::identity(hidden_size, eps, device)?,
            placement,
            layer_idx,
        ))
    }

    /// Forward pass over `[batch, seq_len, hidden]` with an optional
    /// additive attention mask.
    pub fn forward(&self, hidden_states: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        match self.placement {
            NormPlacement::Post => {
                let attn_output = self.attention.forward(hidden_states, mask)?;
                let hidden_states = self.attention_norm.forward(&(attn_output + hidden_states)?)?;
                let ff_output = self.feed_forward.forward(&hidden_states)?;
                self.output_norm.forward(&(ff_output + hidden_states)?)
            }
            NormPlacement::Pre => {
                let normed = self.attention_norm.forward(hidden_states)?;
                let attn_output = self.attention.forward(&normed, mask)?;
                let hidden_states = (hidden_states + attn_output)?;
                let normed = self.output_norm.forward(&hidden_states)?;
                let ff_output = self.feed_forward.forward(&normed)?;
                Ok((hidden_states + ff_output)?)
            }
        }
    }

    /// Get the layer index.
    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }

    /// Get the norm placement.
    pub fn placement(&self) -> NormPlacement {
        self.placement
    }

    /// Get the attention module.
    pub fn attention(&self) -> &SelfAttention {
        &self.attention
    }
}
