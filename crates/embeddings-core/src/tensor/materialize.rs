//! Reading tensor values back to the host.
//!
//! Everything else in the crate passes tensors around without reading them.
//! The functions here copy values out to plain vectors; they are `async` and
//! do the copy on the blocking pool.

use crate::error::{EmbeddingsError, Result};
use candle_core::{DType, Tensor};

async fn run_blocking<T, F>(tensor: &Tensor, read: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Tensor) -> Result<T> + Send + 'static,
{
    let tensor = tensor.clone();
    tokio::task::spawn_blocking(move || read(tensor))
        .await
        .map_err(|e| EmbeddingsError::Materialize(e.to_string()))?
}

fn to_f32(tensor: &Tensor) -> Result<Tensor> {
    if tensor.dtype() == DType::F32 {
        Ok(tensor.clone())
    } else {
        Ok(tensor.to_dtype(DType::F32)?)
    }
}

/// All values in row-major order, as `f32`.
pub async fn scalars(tensor: &Tensor) -> Result<Vec<f32>> {
    run_blocking(tensor, |t| Ok(to_f32(&t.flatten_all()?)?.to_vec1::<f32>()?)).await
}

/// Values of a rank-1 tensor.
pub async fn to_vec1(tensor: &Tensor) -> Result<Vec<f32>> {
    run_blocking(tensor, |t| Ok(to_f32(&t)?.to_vec1::<f32>()?)).await
}

/// Rows of a rank-2 tensor.
pub async fn to_vec2(tensor: &Tensor) -> Result<Vec<Vec<f32>>> {
    run_blocking(tensor, |t| Ok(to_f32(&t)?.to_vec2::<f32>()?)).await
}

/// Values of an integer tensor.
pub async fn ids(tensor: &Tensor) -> Result<Vec<u32>> {
    run_blocking(tensor, |t| {
        let t = t.flatten_all()?;
        let t = if t.dtype() == DType::U32 {
            t
        } else {
            t.to_dtype(DType::U32)?
        };
        Ok(t.to_vec1::<u32>()?)
    })
    .await
}
