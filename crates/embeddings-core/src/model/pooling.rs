//! Reduction of a sequence output to one vector per input.

use crate::error::Result;
use crate::tensor::Linear;
use candle_core::{DType, Tensor, D};

/// Pooling head of an encoder.
#[derive(Debug, Clone)]
pub enum Pooler {
    /// `tanh(dense(h[:, 0]))`.
    FirstTokenDense(Linear),
    /// Hidden state at each row's highest token id (the end token).
    EndToken,
}

impl Pooler {
    /// Pool `hidden_states: [batch, seq, hidden]` to `[batch, hidden]`.
    pub fn forward(&self, hidden_states: &Tensor, input_ids: &Tensor) -> Result<Tensor> {
        match self {
            Self::FirstTokenDense(dense) => {
                let first = hidden_states.narrow(1, 0, 1)?.squeeze(1)?;
                Ok(dense.forward(&first)?.tanh()?)
            }
            Self::EndToken => {
                let (batch, _, hidden) = hidden_states.dims3()?;
                let end = input_ids.to_dtype(DType::U32)?.argmax(D::Minus1)?;
                let index = end
                    .reshape((batch, 1, 1))?
                    .broadcast_as((batch, 1, hidden))?
                    .contiguous()?;
                Ok(hidden_states.contiguous()?.gather(&index, 1)?.squeeze(1)?)
            }
        }
    }
}
