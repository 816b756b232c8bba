//! SafeTensors weight bundle.
//!
//! A bundle is a JSON header (name -> dtype, shape, byte range) followed by
//! the raw little-endian tensor bytes. Floating point payloads are widened
//! to f32 on load; integer payloads become u32 or i64 tensors.
//!
//! # Example
//!
//! ```ignore
//! use embeddings_core::weights::WeightBundle;
//!
//! let bundle = WeightBundle::from_file("/path/to/model.safetensors", &Device::Cpu)?;
//! let tensor = bundle.require("embeddings.word_embeddings.weight")?;
//! ```

use crate::error::{EmbeddingsError, Result};
use candle_core::{DType, Device, Tensor};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// All tensors of one weight file, indexed by on-disk name.
pub struct WeightBundle {
    tensors: BTreeMap<String, Tensor>,
}

impl WeightBundle {
    /// Load a bundle from a `.safetensors` file.
    pub fn from_file(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EmbeddingsError::FileNotFound(path.to_path_buf()));
        }
        let data = fs::read(path)?;
        let bundle = Self::from_bytes(&data, device).map_err(|e| match e {
            EmbeddingsError::InvalidFile(msg) => {
                EmbeddingsError::InvalidFile(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;
        info!(
            path = %path.display(),
            tensors = bundle.len(),
            "Loaded weight bundle"
        );
        Ok(bundle)
    }

    /// Parse a bundle held in memory.
    pub fn from_bytes(data: &[u8], device: &Device) -> Result<Self> {
        let safetensors = SafeTensors::deserialize(data)
            .map_err(|e| EmbeddingsError::InvalidFile(format!("failed to deserialize: {e}")))?;

        let mut tensors = BTreeMap::new();
        for (name, view) in safetensors.tensors() {
            let tensor = view_to_tensor(&view, device).map_err(|e| match e {
                EmbeddingsError::UnsupportedDtype(msg) => {
                    EmbeddingsError::UnsupportedDtype(format!("{name}: {msg}"))
                }
                other => other,
            })?;
            debug!(name = %name, shape = ?tensor.dims(), "Decoded tensor");
            tensors.insert(name, tensor);
        }
        Ok(Self { tensors })
    }

    /// Wrap tensors that are already decoded.
    pub fn from_tensors(tensors: impl IntoIterator<Item = (String, Tensor)>) -> Self {
        Self {
            tensors: tensors.into_iter().collect(),
        }
    }

    /// Tensor stored under `name`.
    pub fn lookup(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Like [`lookup`](Self::lookup), but a missing name is `MissingWeightKey`.
    pub fn require(&self, name: &str) -> Result<Tensor> {
        self.lookup(name)
            .cloned()
            .ok_or_else(|| EmbeddingsError::MissingWeightKey(name.to_string()))
    }

    /// Whether `name` is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    /// Stored names beginning with `prefix`, in byte order.
    pub fn names_under<'s>(&'s self, prefix: &'s str) -> impl Iterator<Item = &'s str> + 's {
        self.tensors
            .keys()
            .map(String::as_str)
            .filter(move |name| name.starts_with(prefix))
    }

    /// Tensor count.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// True for a bundle without tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

impl std::fmt::Debug for WeightBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightBundle")
            .field("tensors", &self.tensors.len())
            .finish()
    }
}

/// Convert a SafeTensors view to a Candle tensor.
///
/// Payload bytes carry no alignment guarantee, so values are copied out
/// rather than reinterpreted in place.
fn view_to_tensor(view: &TensorView<'_>, device: &Device) -> Result<Tensor> {
    let shape = view.shape().to_vec();
    let data = view.data();

    let tensor = match view.dtype() {
        Dtype::F32 => {
            let values: Vec<f32> = bytemuck::pod_collect_to_vec(data);
            Tensor::from_vec(values, shape, device)?
        }
        Dtype::F16 => {
            let values: Vec<half::f16> = bytemuck::pod_collect_to_vec(data);
            Tensor::from_vec(values, shape, device)?.to_dtype(DType::F32)?
        }
        Dtype::BF16 => {
            let values: Vec<half::bf16> = bytemuck::pod_collect_to_vec(data);
            Tensor::from_vec(values, shape, device)?.to_dtype(DType::F32)?
        }
        Dtype::F64 => {
            let values: Vec<f64> = bytemuck::pod_collect_to_vec(data);
            Tensor::from_vec(values, shape, device)?.to_dtype(DType::F32)?
        }
        Dtype::I64 => {
            let values: Vec<i64> = bytemuck::pod_collect_to_vec(data);
            Tensor::from_vec(values, shape, device)?
        }
        Dtype::I32 => {
            // Candle has no I32, upcast
            let values: Vec<i32> = bytemuck::pod_collect_to_vec(data);
            let values: Vec<i64> = values.into_iter().map(i64::from).collect();
            Tensor::from_vec(values, shape, device)?
        }
        Dtype::U32 => {
            let values: Vec<u32> = bytemuck::pod_collect_to_vec(data);
            Tensor::from_vec(values, shape, device)?
        }
        Dtype::U8 => Tensor::from_vec(data.to_vec(), shape, device)?,
        other => return Err(EmbeddingsError::UnsupportedDtype(format!("{other:?}"))),
    };

    Ok(tensor)
}
