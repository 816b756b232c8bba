//! Reductions, distances and masks.

use crate::error::{EmbeddingsError, Result};
use candle_core::{DType, Device, Tensor, D};

/// Additive bias used to forbid attention to a position.
pub const MASKED_BIAS: f32 = -1e9;

/// L2 norm along `axis`. The reduced axis is dropped.
pub fn l2_norm(x: &Tensor, axis: usize) -> Result<Tensor> {
    Ok(x.sqr()?.sum(axis)?.sqrt()?)
}

/// Scale `x` to unit length along the last axis.
///
/// `eps` is added to the norm before dividing, so an all-zero row stays zero.
pub fn l2_normalize(x: &Tensor, eps: f64) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?;
    let norm = (norm + eps)?;
    Ok(x.broadcast_div(&norm)?)
}

/// Pairwise cosine similarity between the rows of `x` and the rows of `y`.
///
/// `x: [N, D]`, `y: [M, D]` gives `[N, M]`. Rank-1 inputs are treated as a
/// single row. An all-zero row scores 0 against everything.
pub fn cosine_similarity(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let x = as_rows(x)?;
    let y = as_rows(y)?;
    if x.dim(1)? != y.dim(1)? {
        return Err(EmbeddingsError::ShapeMismatch(format!(
            "cosine similarity over {:?} and {:?}",
            x.dims(),
            y.dims()
        )));
    }
    let x = l2_normalize(&x, f64::from(f32::EPSILON))?;
    let y = l2_normalize(&y, f64::from(f32::EPSILON))?;
    Ok(x.matmul(&y.t()?)?)
}

/// `1 - cosine_similarity(x, y)`.
pub fn cosine_distance(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    Ok(cosine_similarity(x, y)?.affine(-1.0, 1.0)?)
}

/// Euclidean distance along `axis`.
pub fn euclidean_distance(x: &Tensor, y: &Tensor, axis: usize) -> Result<Tensor> {
    let diff = (x - y)?;
    Ok(diff.sqr()?.sum(axis)?.sqrt()?)
}

/// `xᵀ·y`. For two vectors this is the scalar inner product.
pub fn dot_product(x: &Tensor, y: &Tensor) -> Result<Tensor> {
    if x.rank() == 1 && y.rank() == 1 {
        return Ok((x * y)?.sum_all()?);
    }
    Ok(x.t()?.contiguous()?.matmul(y)?)
}

/// Mean along `axis`. The reduced axis is dropped.
pub fn mean_pool(x: &Tensor, axis: usize) -> Result<Tensor> {
    Ok(x.mean(axis)?)
}

/// Mean of `hidden: [B, S, H]` over the positions where `mask: [B, S]` is
/// non-zero.
///
/// Rows whose mask is all zero pool to zeros.
pub fn masked_mean_pool(hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (batch, seq_len, _) = hidden.dims3()?;
    if mask.dims() != [batch, seq_len] {
        return Err(EmbeddingsError::ShapeMismatch(format!(
            "mask {:?} does not cover hidden states {:?}",
            mask.dims(),
            hidden.dims()
        )));
    }
    let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.maximum(1.0)?;
    Ok(summed.broadcast_div(&counts)?)
}

/// Square `[n, n]` additive mask: `0` where column <= row, [`MASKED_BIAS`]
/// elsewhere.
pub fn additive_causal_mask(n: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0.0f32; n * n];
    for row in 0..n {
        for col in (row + 1)..n {
            data[row * n + col] = MASKED_BIAS;
        }
    }
    Ok(Tensor::from_vec(data, (n, n), device)?)
}

fn as_rows(x: &Tensor) -> Result<Tensor> {
    let x = if x.dtype() == DType::F32 {
        x.clone()
    } else {
        x.to_dtype(DType::F32)?
    };
    match x.rank() {
        1 => Ok(x.unsqueeze(0)?),
        2 => Ok(x),
        rank => Err(EmbeddingsError::ShapeMismatch(format!(
            "expected a vector or a matrix, got rank {rank}"
        ))),
    }
}
