//! Additive attention masks.
//!
//! Each architecture family builds its mask its own way; the variants are
//! kept apart and tested apart.

use crate::error::{EmbeddingsError, Result};
use crate::tensor::additive_causal_mask;
use candle_core::{DType, Tensor};

/// Bias given to masked-out keys by the padding masks.
pub const PADDING_BIAS: f64 = -10000.0;

/// Mask construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    /// Rank-2 `[batch, seq]` mask expanded to `[batch, 1, 1, seq]`.
    /// Without a mask, attention is unmasked.
    BertExtended,
    /// Defaults to all ones. Rank-2 masks expand to `[batch, 1, 1, seq]`,
    /// rank-3 `[batch, seq, seq]` masks to `[batch, 1, seq, seq]`.
    XlmRobertaExtended,
    /// Square causal mask; any padding mask is ignored.
    Causal,
}

impl MaskKind {
    /// Additive bias to add to `[batch, heads, seq, seq]` attention scores,
    /// or `None` when attention is unmasked.
    pub fn build(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> Result<Option<Tensor>> {
        match self {
            Self::BertExtended => attention_mask.map(bert_extended).transpose(),
            Self::XlmRobertaExtended => xlm_roberta_extended(input_ids, attention_mask).map(Some),
            Self::Causal => {
                let (_, seq_len) = input_ids.dims2()?;
                Ok(Some(additive_causal_mask(seq_len, input_ids.device())?))
            }
        }
    }
}

fn padding_bias(mask: &Tensor) -> Result<Tensor> {
    // (1 - m) * -10000
    Ok(mask.affine(-PADDING_BIAS, PADDING_BIAS)?)
}

fn bert_extended(mask: &Tensor) -> Result<Tensor> {
    if mask.rank() != 2 {
        return Err(EmbeddingsError::ShapeMismatch(format!(
            "attention mask must be [batch, seq], got {:?}",
            mask.dims()
        )));
    }
    let mask = mask.to_dtype(DType::F32)?.unsqueeze(1)?.unsqueeze(1)?;
    padding_bias(&mask)
}

fn xlm_roberta_extended(input_ids: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
    let mask = match mask {
        Some(mask) => mask.to_dtype(DType::F32)?,
        None => Tensor::ones(input_ids.dims(), DType::F32, input_ids.device())?,
    };
    let expanded = match mask.rank() {
        3 => mask.unsqueeze(1)?,
        2 => mask.unsqueeze(1)?.unsqueeze(1)?,
        _ => {
            return Err(EmbeddingsError::ShapeMismatch(format!(
                "attention mask must be rank 2 or 3, got {:?}",
                mask.dims()
            )))
        }
    };
    padding_bias(&expanded)
}
