//! Input embeddings: word + position (+ token type), optionally normalized.

use crate::error::{EmbeddingsError, Result};
use crate::tensor::{Embedding, LayerNorm};
use candle_core::{DType, Tensor};

/// How position ids are derived when the caller passes none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionIds {
    /// `0..seq_len` for every row.
    Range,
    /// Running count of non-padding tokens offset by `padding_idx`;
    /// padding positions map to `padding_idx` itself.
    PaddingAware {
        /// Padding token id, also the first position row.
        padding_idx: u32,
    },
}

impl PositionIds {
    /// Longest sequence whose derived positions fit in `rows` position
    /// embeddings.
    ///
    /// Padding-aware positions start after `padding_idx`, so a sequence of
    /// `n` tokens reaches row `n + padding_idx`.
    pub fn max_sequence_length(&self, rows: usize) -> usize {
        match *self {
            Self::Range => rows,
            Self::PaddingAware { padding_idx } => rows.saturating_sub(padding_idx as usize + 1),
        }
    }

    /// Position ids `[batch, seq_len]` (or `[1, seq_len]` for
    /// [`PositionIds::Range`]) for `input_ids: [batch, seq_len]`.
    pub fn derive(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        match *self {
            Self::Range => Ok(Tensor::arange(0u32, seq_len as u32, input_ids.device())?
                .unsqueeze(0)?),
            Self::PaddingAware { padding_idx } => {
                let mask = input_ids
                    .to_dtype(DType::U32)?
                    .ne(padding_idx)?
                    .to_dtype(DType::F32)?;
                let positions = (mask.cumsum(1)? * &mask)?;
                Ok(positions
                    .affine(1.0, f64::from(padding_idx))?
                    .to_dtype(DType::U32)?)
            }
        }
    }
}

/// Embedding front end of an encoder.
#[derive(Debug, Clone)]
pub struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Option<Embedding>,
    norm: Option<LayerNorm>,
    positions: PositionIds,
}

impl Embeddings {
    /// Create the embedding front end.
    pub fn new(
        word: Embedding,
        position: Embedding,
        token_type: Option<Embedding>,
        norm: Option<LayerNorm>,
        positions: PositionIds,
    ) -> Self {
        Self {
            word,
            position,
            token_type,
            norm,
            positions,
        }
    }

    /// Embed `input_ids: [batch, seq_len]` into `[batch, seq_len, hidden]`.
    ///
    /// Token type ids default to zeros; position ids default to the
    /// configured [`PositionIds`] strategy.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        position_ids: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let rows = self.position.num_embeddings();
        let position_ids = match position_ids {
            Some(ids) => {
                let highest = ids
                    .flatten_all()?
                    .max(0)?
                    .to_dtype(DType::U32)?
                    .to_scalar::<u32>()?;
                if highest as usize >= rows {
                    return Err(EmbeddingsError::InvalidArgument(format!(
                        "position id {highest} exceeds {rows} positions"
                    )));
                }
                ids.clone()
            }
            None => {
                let limit = self.positions.max_sequence_length(rows);
                if seq_len > limit {
                    return Err(EmbeddingsError::InvalidArgument(format!(
                        "sequence of {seq_len} tokens exceeds the limit of {limit} \
                         for {rows} positions"
                    )));
                }
                self.positions.derive(input_ids)?
            }
        };

        let mut embeddings = self.word.forward(input_ids)?;

        if let Some(token_type) = &self.token_type {
            let token_type_ids = match token_type_ids {
                Some(ids) => ids.clone(),
                None => Tensor::zeros(input_ids.dims(), DType::U32, input_ids.device())?,
            };
            embeddings = (embeddings + token_type.forward(&token_type_ids)?)?;
        }

        embeddings = embeddings.broadcast_add(&self.position.forward(&position_ids)?)?;

        match &self.norm {
            Some(norm) => norm.forward(&embeddings),
            None => Ok(embeddings),
        }
    }

    /// Get the position strategy.
    pub fn positions(&self) -> PositionIds {
        self.positions
    }

    /// Get the hidden width.
    pub fn hidden_size(&self) -> usize {
        self.word.embedding_dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn ids(rows: &[&[u32]]) -> Tensor {
        let seq = rows[0].len();
        let flat: Vec<u32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(flat, (rows.len(), seq), &Device::Cpu).unwrap()
    }

    #[test]
    fn range_positions() {
        let pos = PositionIds::Range.derive(&ids(&[&[5, 6, 7]])).unwrap();
        assert_eq!(pos.to_vec2::<u32>().unwrap(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn padding_aware_positions_skip_padding() {
        let strategy = PositionIds::PaddingAware { padding_idx: 1 };
        let pos = strategy.derive(&ids(&[&[0, 7, 8, 2, 1, 1], &[0, 9, 2, 1, 1, 1]])).unwrap();
        assert_eq!(
            pos.to_vec2::<u32>().unwrap(),
            vec![vec![2, 3, 4, 5, 1, 1], vec![2, 3, 4, 1, 1, 1]]
        );
    }

    fn table(rows: usize, dim: usize, scale: f32) -> Embedding {
        let values: Vec<f32> = (0..rows * dim).map(|i| i as f32 * scale).collect();
        Embedding::new(Tensor::from_vec(values, (rows, dim), &Device::Cpu).unwrap())
    }

    #[test]
    fn sums_word_position_and_type() {
        let embeddings = Embeddings::new(
            table(4, 2, 1.0),
            table(3, 2, 10.0),
            Some(table(2, 2, 100.0)),
            None,
            PositionIds::Range,
        );
        let out = embeddings.forward(&ids(&[&[3, 1]]), None, None).unwrap();
        // word [6,7]+[2,3], position [0,10]+[20,30], type row 0 [0,100]
        assert_eq!(
            out.to_vec3::<f32>().unwrap(),
            vec![vec![vec![6.0, 117.0], vec![22.0, 133.0]]]
        );
        assert_eq!(embeddings.hidden_size(), 2);
    }

    #[test]
    fn explicit_ids_override_defaults() {
        let embeddings = Embeddings::new(
            table(4, 2, 1.0),
            table(3, 2, 10.0),
            Some(table(2, 2, 100.0)),
            None,
            PositionIds::Range,
        );
        let types = ids(&[&[1]]);
        let positions = ids(&[&[2]]);
        let out = embeddings
            .forward(&ids(&[&[0]]), Some(&types), Some(&positions))
            .unwrap();
        // [0,1] + [40,50] + [200,300]
        assert_eq!(out.to_vec3::<f32>().unwrap(), vec![vec![vec![240.0, 351.0]]]);
    }

    #[test]
    fn normalizes_when_configured() {
        let embeddings = Embeddings::new(
            table(4, 4, 1.0),
            table(8, 4, 0.5),
            None,
            Some(LayerNorm::identity(4, 1e-5, &Device::Cpu).unwrap()),
            PositionIds::Range,
        );
        let out = embeddings.forward(&ids(&[&[1, 2, 3]]), None, None).unwrap();
        let means = out.mean(2).unwrap().to_vec2::<f32>().unwrap();
        assert!(means[0].iter().all(|m| m.abs() < 1e-5));
    }

    #[test]
    fn too_long_sequence_is_rejected() {
        let embeddings = Embeddings::new(table(4, 2, 1.0), table(2, 2, 1.0), None, None, PositionIds::Range);
        let err = embeddings.forward(&ids(&[&[0, 1, 2]]), None, None).unwrap_err();
        assert!(matches!(err, EmbeddingsError::InvalidArgument(_)));
    }

    #[test]
    fn padding_aware_limit_accounts_for_offset() {
        let strategy = PositionIds::PaddingAware { padding_idx: 1 };
        assert_eq!(strategy.max_sequence_length(514), 512);
        assert_eq!(PositionIds::Range.max_sequence_length(512), 512);

        // Four rows with padding index 1 hold positions 2 and 3 only
        let embeddings = Embeddings::new(table(8, 2, 1.0), table(4, 2, 1.0), None, None, strategy);
        let at_limit = embeddings.forward(&ids(&[&[5, 6]]), None, None).unwrap();
        assert_eq!(at_limit.dims(), &[1, 2, 2]);

        let err = embeddings.forward(&ids(&[&[5, 6, 7]]), None, None).unwrap_err();
        assert!(matches!(err, EmbeddingsError::InvalidArgument(_)), "{err}");
    }

    #[test]
    fn explicit_position_ids_are_range_checked() {
        let embeddings = Embeddings::new(table(4, 2, 1.0), table(3, 2, 1.0), None, None, PositionIds::Range);
        let positions = ids(&[&[0, 3]]);
        let err = embeddings
            .forward(&ids(&[&[0, 1]]), None, Some(&positions))
            .unwrap_err();
        assert!(matches!(err, EmbeddingsError::InvalidArgument(_)), "{err}");
    }
}
