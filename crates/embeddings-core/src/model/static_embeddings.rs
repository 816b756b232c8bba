//! Static (lookup-table) embedding models.
//!
//! No encoder layers: a text's embedding is the mean of its tokens' rows.
//! [`StaticEmbeddings`] reads its table from `embedding.weight`;
//! [`Model2Vec`] reads `embeddings`, drops unknown tokens before pooling and
//! takes its normalization switch from `config.json`.

use super::loader::ensure_dir;
use super::LoadConfig;
use crate::error::{EmbeddingsError, Result};
use crate::tensor::l2_normalize;
use crate::tokenizer::{TextTokenizer, Tokenizer};
use crate::weights::{WeightBundle, WeightResolver};
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Mean of the table rows selected by `ids`, cut to `dim` columns; zeros
/// when `ids` is empty.
fn mean_of_rows(table: &Tensor, ids: &[u32], dim: usize) -> Result<Tensor> {
    if ids.is_empty() {
        return Ok(Tensor::zeros(dim, DType::F32, table.device())?);
    }
    let index = Tensor::from_slice(ids, ids.len(), table.device())?;
    Ok(table.index_select(&index, 0)?.mean(0)?.narrow(0, 0, dim)?)
}

fn stack_rows(rows: &[Tensor], normalize: bool) -> Result<Tensor> {
    let stacked = Tensor::stack(rows, 0)?;
    if normalize {
        l2_normalize(&stacked, f64::from(f32::EPSILON))
    } else {
        Ok(stacked)
    }
}

fn load_table(dir: &Path, load_config: &LoadConfig, key: &str, device: &Device) -> Result<Tensor> {
    let bundle = WeightBundle::from_file(dir.join(&load_config.weights_file_name), device)?;
    let resolver = WeightResolver::new(&bundle, load_config.key_transform.as_ref());
    let table = resolver.tensor_any(key)?;
    table.dims2().map_err(|_| {
        EmbeddingsError::ShapeMismatch(format!(
            "{key}: expected a [vocab, dim] table, found {:?}",
            table.dims()
        ))
    })?;
    Ok(table.to_dtype(DType::F32)?)
}

/// Mean-pooled lookup-table embeddings.
#[derive(Debug)]
pub struct StaticEmbeddings<T: TextTokenizer = Tokenizer> {
    /// Embedding table: [vocab, dim]
    table: Tensor,
    tokenizer: T,
}

impl<T: TextTokenizer> StaticEmbeddings<T> {
    /// Create from a `[vocab, dim]` table and a tokenizer.
    pub fn new(table: Tensor, tokenizer: T) -> Result<Self> {
        table.dims2()?;
        Ok(Self { table, tokenizer })
    }

    /// Embedding width.
    pub fn dimension(&self) -> usize {
        self.table.dims()[1]
    }

    /// Get the tokenizer.
    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    /// Embed one text: `[1, dim]`.
    pub fn encode(
        &self,
        text: &str,
        normalize: bool,
        max_length: Option<usize>,
        truncate_dimension: Option<usize>,
    ) -> Result<Tensor> {
        self.batch_encode(&[text], normalize, max_length, truncate_dimension)
    }

    /// Embed several texts: `[batch, min(truncate_dimension, dim)]`.
    ///
    /// Texts that tokenize to nothing embed as zero vectors.
    pub fn batch_encode(
        &self,
        texts: &[&str],
        normalize: bool,
        max_length: Option<usize>,
        truncate_dimension: Option<usize>,
    ) -> Result<Tensor> {
        let dim = match truncate_dimension {
            Some(0) => {
                return Err(EmbeddingsError::InvalidArgument(
                    "truncate_dimension must be positive".into(),
                ))
            }
            Some(truncate) => truncate.min(self.dimension()),
            None => self.dimension(),
        };
        if texts.is_empty() {
            return Err(EmbeddingsError::InvalidArgument(
                "batch_encode needs at least one text".into(),
            ));
        }
        let rows = texts
            .iter()
            .map(|text| {
                let ids = self.tokenizer.tokenize(text, max_length, false)?;
                mean_of_rows(&self.table, &ids, dim)
            })
            .collect::<Result<Vec<_>>>()?;
        stack_rows(&rows, normalize)
    }
}

impl StaticEmbeddings {
    /// Load `embedding.weight` and the tokenizer from a model folder.
    pub fn load(dir: impl AsRef<Path>, load_config: &LoadConfig, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        ensure_dir(dir)?;
        let table = load_table(dir, load_config, "embedding.weight", device)?;
        let tokenizer = load_config.static_tokenizer_source().load(dir)?;
        info!(
            path = %dir.display(),
            vocab = table.dims()[0],
            dim = table.dims()[1],
            "Loaded static embeddings"
        );
        Self::new(table, tokenizer)
    }
}

/// `config.json` of a Model2Vec folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model2VecConfig {
    /// Whether embeddings are L2-normalized.
    #[serde(default)]
    pub normalize: Option<bool>,
}

impl Model2VecConfig {
    /// Load from JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EmbeddingsError::FileNotFound(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Distilled static embeddings that skip unknown tokens.
#[derive(Debug)]
pub struct Model2Vec<T: TextTokenizer = Tokenizer> {
    /// Embedding table: [vocab, dim]
    table: Tensor,
    tokenizer: T,
    normalize: bool,
}

impl<T: TextTokenizer> Model2Vec<T> {
    /// Create from a `[vocab, dim]` table and a tokenizer.
    pub fn new(table: Tensor, tokenizer: T, normalize: bool) -> Result<Self> {
        table.dims2()?;
        Ok(Self {
            table,
            tokenizer,
            normalize,
        })
    }

    /// Embedding width.
    pub fn dimension(&self) -> usize {
        self.table.dims()[1]
    }

    /// Whether outputs are L2-normalized.
    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// Embed one text: `[1, dim]`.
    pub fn encode(&self, text: &str, max_length: Option<usize>) -> Result<Tensor> {
        self.batch_encode(&[text], max_length)
    }

    /// Embed several texts: `[batch, dim]`.
    pub fn batch_encode(&self, texts: &[&str], max_length: Option<usize>) -> Result<Tensor> {
        if texts.is_empty() {
            return Err(EmbeddingsError::InvalidArgument(
                "batch_encode needs at least one text".into(),
            ));
        }
        let unknown = self.tokenizer.unknown_token_id();
        let rows = texts
            .iter()
            .map(|text| {
                let mut ids = self.tokenizer.tokenize(text, max_length, false)?;
                if let Some(unk) = unknown {
                    ids.retain(|&id| id != unk);
                }
                mean_of_rows(&self.table, &ids, self.dimension())
            })
            .collect::<Result<Vec<_>>>()?;
        stack_rows(&rows, self.normalize)
    }
}

impl Model2Vec {
    /// Load `embeddings`, `config.json` and the tokenizer from a model folder.
    pub fn load(dir: impl AsRef<Path>, load_config: &LoadConfig, device: &Device) -> Result<Self> {
        let dir = dir.as_ref();
        ensure_dir(dir)?;
        let config = Model2VecConfig::from_file(dir.join(&load_config.config_file_name))?;
        let table = load_table(dir, load_config, "embeddings", device)?;
        let tokenizer = load_config.static_tokenizer_source().load(dir)?;
        let normalize = config.normalize.unwrap_or(false);
        info!(
            path = %dir.display(),
            vocab = table.dims()[0],
            dim = table.dims()[1],
            normalize,
            "Loaded Model2Vec embeddings"
        );
        Self::new(table, tokenizer, normalize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Whitespace tokenizer over a fixed word list.
    struct WordTokenizer {
        words: HashMap<&'static str, u32>,
        unk: Option<u32>,
    }

    impl TextTokenizer for WordTokenizer {
        fn unknown_token_id(&self) -> Option<u32> {
            self.unk
        }

        fn tokenize(
            &self,
            text: &str,
            max_length: Option<usize>,
            _add_special_tokens: bool,
        ) -> Result<Vec<u32>> {
            let mut ids: Vec<u32> = text
                .split_whitespace()
                .filter_map(|w| self.words.get(w).copied().or(self.unk))
                .collect();
            if let Some(max) = max_length {
                ids.truncate(max);
            }
            Ok(ids)
        }
    }

    fn tokenizer(unk: Option<u32>) -> WordTokenizer {
        WordTokenizer {
            words: HashMap::from([("a", 0), ("b", 1), ("c", 2)]),
            unk,
        }
    }

    fn table() -> Tensor {
        Tensor::new(
            &[[0.1f32, 0.2, 0.3], [0.4, 0.5, 0.6], [0.7, 0.8, 0.9]],
            &Device::Cpu,
        )
        .unwrap()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{actual:?} vs {expected:?}");
        }
    }

    fn row(t: Tensor) -> Vec<f32> {
        t.to_vec2::<f32>().unwrap().remove(0)
    }

    #[test]
    fn mean_of_token_rows() {
        let model = StaticEmbeddings::new(table(), tokenizer(None)).unwrap();
        let out = model.encode("a b c", false, None, None).unwrap();
        assert_eq!(out.dims(), &[1, 3]);
        assert_close(&row(out), &[0.4, 0.5, 0.6]);
    }

    #[test]
    fn normalized_mean() {
        let model = StaticEmbeddings::new(table(), tokenizer(None)).unwrap();
        let out = model.encode("a b c", true, None, None).unwrap();
        assert_close(&row(out), &[0.45584226, 0.56980276, 0.6837634]);
    }

    #[test]
    fn truncated_dimension() {
        let model = StaticEmbeddings::new(table(), tokenizer(None)).unwrap();
        let out = model.encode("a b c", false, None, Some(2)).unwrap();
        assert_close(&row(out), &[0.4, 0.5]);
        // Larger than the table keeps every column
        let out = model.encode("a", false, None, Some(10)).unwrap();
        assert_close(&row(out), &[0.1, 0.2, 0.3]);
    }

    #[test]
    fn zero_truncation_is_rejected() {
        let model = StaticEmbeddings::new(table(), tokenizer(None)).unwrap();
        let err = model.encode("a", false, None, Some(0)).unwrap_err();
        assert!(matches!(err, EmbeddingsError::InvalidArgument(_)));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let model = StaticEmbeddings::new(table(), tokenizer(None)).unwrap();
        assert_close(&row(model.encode("", false, None, None).unwrap()), &[0.0, 0.0, 0.0]);
        assert_close(&row(model.encode("", true, None, Some(2)).unwrap()), &[0.0, 0.0]);
    }

    #[test]
    fn max_length_limits_tokens() {
        let model = StaticEmbeddings::new(table(), tokenizer(None)).unwrap();
        let out = model.encode("a c b", false, Some(2), None).unwrap();
        assert_close(&row(out), &[0.4, 0.5, 0.6]);
    }

    #[test]
    fn batch_rows_follow_input_order() {
        let model = StaticEmbeddings::new(table(), tokenizer(None)).unwrap();
        let out = model.batch_encode(&["c", "", "a"], false, None, None).unwrap();
        assert_eq!(
            out.to_vec2::<f32>().unwrap(),
            vec![vec![0.7, 0.8, 0.9], vec![0.0, 0.0, 0.0], vec![0.1, 0.2, 0.3]]
        );
    }

    #[test]
    fn model2vec_drops_unknown_tokens() {
        // Unknown words map to id 2, which is then filtered out
        let model = Model2Vec::new(table(), tokenizer(Some(2)), false).unwrap();
        let out = model.encode("a zebra b", None).unwrap();
        assert_close(&row(out), &[0.25, 0.35, 0.45]);
        assert_close(&row(model.encode("zebra", None).unwrap()), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn model2vec_normalizes_from_config() {
        let model = Model2Vec::new(table(), tokenizer(None), true).unwrap();
        assert!(model.normalize());
        let out = model.encode("a b c", None).unwrap();
        assert_close(&row(out), &[0.45584226, 0.56980276, 0.6837634]);
    }

    #[test]
    fn model2vec_config_defaults() {
        let config: Model2VecConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.normalize, None);
        let config: Model2VecConfig = serde_json::from_str(r#"{"normalize": true, "apply_pca": 256}"#).unwrap();
        assert_eq!(config.normalize, Some(true));
    }

    #[test]
    fn table_must_be_two_dimensional() {
        let flat = Tensor::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        assert!(StaticEmbeddings::new(flat, tokenizer(None)).is_err());
    }
}
