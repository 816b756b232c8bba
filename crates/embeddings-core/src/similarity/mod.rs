//! Nearest-neighbour search over static word vectors.
//!
//! Vectors come from a word2vec text file:
//!
//! ```text
//! <count> <dim>
//! <word> <dim floats>
//! ...
//! ```

use crate::error::{EmbeddingsError, Result};
use crate::tensor::{l2_normalize, materialize};
use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Word vectors with cosine nearest-neighbour lookup.
pub struct SimilarityIndex {
    /// Word to row.
    word_to_index: HashMap<String, usize>,
    /// Row to word.
    words: Vec<String>,
    /// Raw vectors: [count, dim]
    embeddings: Tensor,
    /// Unit-length rows of `embeddings`.
    normalized: Tensor,
}

impl SimilarityIndex {
    /// Build an index from words and their `[count, dim]` vectors.
    pub fn new(words: Vec<String>, embeddings: Tensor) -> Result<Self> {
        let (count, _) = embeddings.dims2()?;
        if count != words.len() {
            return Err(EmbeddingsError::ShapeMismatch(format!(
                "{} words for {count} vectors",
                words.len()
            )));
        }
        let word_to_index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();
        let normalized = l2_normalize(&embeddings, f64::from(f32::EPSILON))?;
        Ok(Self {
            word_to_index,
            words,
            embeddings,
            normalized,
        })
    }

    /// Load a word2vec text file.
    pub fn from_file(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EmbeddingsError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let index = Self::parse(&text, device)?;
        info!(
            path = %path.display(),
            words = index.len(),
            dim = index.dimension(),
            "Loaded word vectors"
        );
        Ok(index)
    }

    /// Parse word2vec text.
    ///
    /// Every data line must carry exactly `<dim>` floats, and the number of
    /// data lines must equal `<count>`.
    pub fn parse(text: &str, device: &Device) -> Result<Self> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| EmbeddingsError::InvalidFile("empty word vector file".into()))?;
        let (count, dim) = parse_header(header)?;

        let mut words = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count * dim);
        for (i, line) in lines.enumerate() {
            let mut parts = line.split_whitespace();
            let word = parts
                .next()
                .ok_or_else(|| EmbeddingsError::InvalidFile(format!("line {}: empty", i + 2)))?;
            let vector = parts
                .map(|p| {
                    p.parse::<f32>().map_err(|e| {
                        EmbeddingsError::InvalidFile(format!("line {}: {p:?}: {e}", i + 2))
                    })
                })
                .collect::<Result<Vec<f32>>>()?;
            if vector.len() != dim {
                return Err(EmbeddingsError::InvalidFile(format!(
                    "line {}: {word:?} has {} values, expected {dim}",
                    i + 2,
                    vector.len()
                )));
            }
            words.push(word.to_string());
            values.extend(vector);
        }

        if words.len() != count {
            return Err(EmbeddingsError::InvalidFile(format!(
                "header declares {count} vectors, found {}",
                words.len()
            )));
        }
        debug!(count, dim, "Parsed word vectors");

        let embeddings = Tensor::from_vec(values, (count, dim), device)?;
        Self::new(words, embeddings)
    }

    /// Vector of `word`, or `None` when unknown.
    pub fn encode(&self, word: &str) -> Option<Tensor> {
        let index = *self.word_to_index.get(word)?;
        self.embeddings.get(index).ok()
    }

    /// Stacked vectors `[n, dim]` of the known words, in input order.
    ///
    /// Unknown words are skipped; `None` when none are known.
    pub fn batch_encode(&self, words: &[&str]) -> Result<Option<Tensor>> {
        let indices: Vec<u32> = words
            .iter()
            .filter_map(|w| self.word_to_index.get(*w))
            .map(|&i| i as u32)
            .collect();
        if indices.is_empty() {
            return Ok(None);
        }
        let len = indices.len();
        let index = Tensor::from_vec(indices, len, self.embeddings.device())?;
        Ok(Some(self.embeddings.index_select(&index, 0)?))
    }

    /// The `top_k` words closest to `word` by cosine similarity, best
    /// first, never including `word` itself. Unknown words give no results.
    pub async fn most_similar(&self, word: &str, top_k: usize) -> Result<Vec<(String, f32)>> {
        let Some(&query_index) = self.word_to_index.get(word) else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = self.normalized.get(query_index)?.unsqueeze(1)?;
        let similarities = self.normalized.matmul(&query)?.squeeze(1)?;

        // One extra for the query word itself
        let take = (top_k + 1).min(self.len());
        let order = similarities
            .arg_sort_last_dim(false)?
            .narrow(0, 0, take)?
            .contiguous()?;
        let scores = similarities.gather(&order, 0)?;

        let (indices, scores) =
            tokio::try_join!(materialize::ids(&order), materialize::to_vec1(&scores))?;

        Ok(indices
            .into_iter()
            .zip(scores)
            .filter(|&(i, _)| i as usize != query_index)
            .filter_map(|(i, score)| self.words.get(i as usize).map(|w| (w.clone(), score)))
            .take(top_k)
            .collect())
    }

    /// Whether `word` has a vector.
    pub fn contains(&self, word: &str) -> bool {
        self.word_to_index.contains_key(word)
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether the index has no words.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Vector width.
    pub fn dimension(&self) -> usize {
        self.embeddings.dims()[1]
    }
}

impl std::fmt::Debug for SimilarityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityIndex")
            .field("words", &self.len())
            .field("dimension", &self.dimension())
            .finish()
    }
}

fn parse_header(line: &str) -> Result<(usize, usize)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [count, dim] => {
            let parse = |s: &str| {
                s.parse::<usize>()
                    .map_err(|e| EmbeddingsError::InvalidFile(format!("header {line:?}: {e}")))
            };
            Ok((parse(*count)?, parse(*dim)?))
        }
        _ => Err(EmbeddingsError::InvalidFile(format!(
            "header must be \"<count> <dim>\", got {line:?}"
        ))),
    }
}
