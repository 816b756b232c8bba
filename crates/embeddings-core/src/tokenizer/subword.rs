//! Subword tokenizer backed by a `tokenizer.json` segmentation model.
//!
//! Segmentation is delegated to HuggingFace `tokenizers`; this wrapper only
//! owns the special-token ids and applies the shared truncation policy.

use super::{apply_special_tokens, SpecialIds, TextTokenizer};
use crate::error::{EmbeddingsError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::info;

/// Names of the special tokens a checkpoint uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Begin-of-sequence token.
    pub bos: String,
    /// End-of-sequence token.
    pub eos: String,
    /// Padding token.
    pub pad: String,
    /// Unknown token.
    pub unk: String,
}

impl SpecialTokens {
    /// `<s>`, `</s>`, `<pad>`, `<unk>`.
    pub fn xlm_roberta() -> Self {
        Self {
            bos: "<s>".into(),
            eos: "</s>".into(),
            pad: "<pad>".into(),
            unk: "<unk>".into(),
        }
    }

    /// `[CLS]`, `[SEP]`, `[PAD]`, `[UNK]`.
    pub fn bert() -> Self {
        Self {
            bos: "[CLS]".into(),
            eos: "[SEP]".into(),
            pad: "[PAD]".into(),
            unk: "[UNK]".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddedToken {
    id: u32,
    content: String,
}

/// Unknown-token fields of the `model` section. Word-level, WordPiece and
/// BPE models name the token; unigram models give its id.
#[derive(Debug, Default, Deserialize)]
struct ModelUnknown {
    #[serde(default)]
    unk_token: Option<String>,
    #[serde(default)]
    unk_id: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AddedTokens {
    #[serde(default)]
    added_tokens: Vec<AddedToken>,
    #[serde(default)]
    model: ModelUnknown,
}

impl AddedTokens {
    fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EmbeddingsError::InvalidFile(format!("tokenizer.json: {e}")))
    }

    fn overrides(&self) -> HashMap<String, u32> {
        self.added_tokens
            .iter()
            .map(|t| (t.content.clone(), t.id))
            .collect()
    }
}

fn parse_hf(json: &str) -> Result<HfTokenizer> {
    let mut inner = HfTokenizer::from_bytes(json.as_bytes())
        .map_err(|e| EmbeddingsError::Tokenizer(format!("failed to load tokenizer: {e}")))?;
    // Length handling is ours
    inner
        .with_truncation(None)
        .map_err(|e| EmbeddingsError::Tokenizer(e.to_string()))?;
    inner.with_padding(None);
    Ok(inner)
}

fn encode_ids(inner: &HfTokenizer, text: &str) -> Result<Vec<u32>> {
    let encoding = inner
        .encode(text, false)
        .map_err(|e| EmbeddingsError::Tokenizer(format!("failed to encode text: {e}")))?;
    Ok(encoding.get_ids().to_vec())
}

fn read_tokenizer_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(EmbeddingsError::FileNotFound(path.to_path_buf()));
    }
    Ok(std::fs::read_to_string(path)?)
}

/// Tokenizer delegating segmentation to a `tokenizer.json` model.
#[derive(Clone)]
pub struct SubwordTokenizer {
    /// Underlying HuggingFace tokenizer.
    inner: HfTokenizer,
    /// Begin/end ids.
    specials: SpecialIds,
    /// PAD token ID.
    pad_token_id: u32,
    /// UNK token ID.
    unk_token_id: u32,
}

impl SubwordTokenizer {
    /// Load a tokenizer from a tokenizer.json file.
    pub fn from_file(path: impl AsRef<Path>, specials: &SpecialTokens) -> Result<Self> {
        let path = path.as_ref();
        let json = read_tokenizer_file(path)?;
        let tokenizer = Self::from_json(&json, specials)?;
        info!(
            path = %path.display(),
            vocab = tokenizer.vocab_size(),
            "Loaded subword tokenizer"
        );
        Ok(tokenizer)
    }

    /// Load a tokenizer from tokenizer.json contents.
    ///
    /// Entries of the `added_tokens` list override the model's own ids for
    /// the special tokens.
    pub fn from_json(json: &str, specials: &SpecialTokens) -> Result<Self> {
        let inner = parse_hf(json)?;
        let overrides = AddedTokens::parse(json)?.overrides();
        Self::new(inner, specials, &overrides)
    }

    /// Wrap a loaded tokenizer.
    ///
    /// Each special token resolves from `overrides` first, then from the
    /// model vocabulary. A special token found in neither is an error.
    pub fn new(
        mut inner: HfTokenizer,
        specials: &SpecialTokens,
        overrides: &HashMap<String, u32>,
    ) -> Result<Self> {
        inner
            .with_truncation(None)
            .map_err(|e| EmbeddingsError::Tokenizer(e.to_string()))?;
        inner.with_padding(None);

        let resolve = |token: &str| {
            overrides
                .get(token)
                .copied()
                .or_else(|| inner.token_to_id(token))
                .ok_or_else(|| EmbeddingsError::UnknownToken(token.to_string()))
        };
        let ids = SpecialIds {
            bos: resolve(&specials.bos)?,
            eos: resolve(&specials.eos)?,
        };
        let pad_token_id = resolve(&specials.pad)?;
        let unk_token_id = resolve(&specials.unk)?;

        Ok(Self {
            inner,
            specials: ids,
            pad_token_id,
            unk_token_id,
        })
    }

    /// Segment text into raw model ids, without special tokens.
    pub fn encode_raw(&self, text: &str) -> Result<Vec<u32>> {
        encode_ids(&self.inner, text)
    }

    /// Encode `text`, optionally padding with id `0` to `pad_to_length`.
    pub fn tokenize_padded(
        &self,
        text: &str,
        max_length: Option<usize>,
        pad_to_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>> {
        let ids = self.encode_raw(text)?;
        apply_special_tokens(
            &ids,
            self.specials,
            max_length,
            pad_to_length,
            add_special_tokens,
        )
    }

    /// Get BOS token ID.
    pub fn bos_token_id(&self) -> u32 {
        self.specials.bos
    }

    /// Get EOS token ID.
    pub fn eos_token_id(&self) -> u32 {
        self.specials.eos
    }

    /// Get PAD token ID.
    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextTokenizer for SubwordTokenizer {
    fn unknown_token_id(&self) -> Option<u32> {
        Some(self.unk_token_id)
    }

    fn tokenize(
        &self,
        text: &str,
        max_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>> {
        self.tokenize_padded(text, max_length, None, add_special_tokens)
    }
}

impl std::fmt::Debug for SubwordTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubwordTokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("bos_token_id", &self.specials.bos)
            .field("eos_token_id", &self.specials.eos)
            .field("pad_token_id", &self.pad_token_id)
            .field("unk_token_id", &self.unk_token_id)
            .finish()
    }
}

/// `tokenizer.json` segmentation without begin/end tokens.
///
/// Only the unknown id is resolved, and a vocabulary without one is
/// accepted. Used by lookup-table models, which never wrap sequences.
#[derive(Clone)]
pub struct PlainTokenizer {
    inner: HfTokenizer,
    unk_token_id: Option<u32>,
}

impl PlainTokenizer {
    /// Load a tokenizer from a tokenizer.json file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = read_tokenizer_file(path)?;
        let tokenizer = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            vocab = tokenizer.vocab_size(),
            unk_token_id = ?tokenizer.unk_token_id,
            "Loaded plain tokenizer"
        );
        Ok(tokenizer)
    }

    /// Load a tokenizer from tokenizer.json contents.
    ///
    /// The unknown id comes from the model's `unk_id`, else from its
    /// `unk_token` looked up in `added_tokens` and then in the vocabulary.
    pub fn from_json(json: &str) -> Result<Self> {
        let inner = parse_hf(json)?;
        let added = AddedTokens::parse(json)?;
        let overrides = added.overrides();
        let unk_token_id = added.model.unk_id.or_else(|| {
            let token = added.model.unk_token.as_deref()?;
            overrides
                .get(token)
                .copied()
                .or_else(|| inner.token_to_id(token))
        });
        Ok(Self {
            inner,
            unk_token_id,
        })
    }

    /// Segment text into model ids.
    pub fn encode_raw(&self, text: &str) -> Result<Vec<u32>> {
        encode_ids(&self.inner, text)
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextTokenizer for PlainTokenizer {
    fn unknown_token_id(&self) -> Option<u32> {
        self.unk_token_id
    }

    /// Raw ids cut to `max_length`. Asking for special tokens is an error.
    fn tokenize(
        &self,
        text: &str,
        max_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>> {
        if add_special_tokens {
            return Err(EmbeddingsError::InvalidArgument(
                "plain tokenizer has no begin/end tokens".into(),
            ));
        }
        let mut ids = self.encode_raw(text)?;
        if let Some(max) = max_length {
            ids.truncate(max);
        }
        Ok(ids)
    }
}

impl std::fmt::Debug for PlainTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("unk_token_id", &self.unk_token_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(id: u32, content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "content": content,
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        })
    }

    /// Word-level tokenizer.json with XLM-R style special tokens.
    fn tokenizer_json() -> String {
        serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [added(0, "<s>"), added(1, "<pad>"), added(2, "</s>"), added(3, "<unk>")],
            "normalizer": {"type": "Lowercase"},
            "pre_tokenizer": {"type": "WhitespaceSplit"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {
                    "<s>": 0, "<pad>": 1, "</s>": 2, "<unk>": 3,
                    "hello": 4, "world": 5, "rust": 6
                },
                "unk_token": "<unk>"
            }
        })
        .to_string()
    }

    fn tokenizer() -> SubwordTokenizer {
        SubwordTokenizer::from_json(&tokenizer_json(), &SpecialTokens::xlm_roberta()).unwrap()
    }

    #[test]
    fn resolves_special_ids() {
        let tok = tokenizer();
        assert_eq!(tok.bos_token_id(), 0);
        assert_eq!(tok.eos_token_id(), 2);
        assert_eq!(tok.pad_token_id(), 1);
        assert_eq!(tok.unknown_token_id(), Some(3));
    }

    #[test]
    fn raw_encoding_has_no_specials() {
        let tok = tokenizer();
        assert_eq!(tok.encode_raw("Hello world").unwrap(), vec![4, 5]);
        assert_eq!(tok.encode_raw("hello zebra").unwrap(), vec![4, 3]);
    }

    #[test]
    fn tokenize_applies_shared_policy() {
        let tok = tokenizer();
        assert_eq!(
            tok.tokenize("hello world rust", None, true).unwrap(),
            vec![0, 4, 5, 6, 2]
        );
        assert_eq!(
            tok.tokenize("hello world rust", Some(4), true).unwrap(),
            vec![0, 4, 5, 2]
        );
        assert_eq!(
            tok.tokenize("hello world rust", Some(2), false).unwrap(),
            vec![4, 5]
        );
        assert_eq!(tok.tokenize("", None, true).unwrap(), vec![0, 2]);
        assert!(tok.tokenize("", None, false).unwrap().is_empty());
    }

    #[test]
    fn pads_with_zero() {
        let tok = tokenizer();
        assert_eq!(
            tok.tokenize_padded("rust", Some(5), Some(5), true).unwrap(),
            vec![0, 6, 2, 0, 0]
        );
    }

    #[test]
    fn overrides_take_precedence() {
        let inner = HfTokenizer::from_bytes(tokenizer_json().as_bytes()).unwrap();
        let overrides = HashMap::from([("</s>".to_string(), 42u32)]);
        let tok = SubwordTokenizer::new(inner, &SpecialTokens::xlm_roberta(), &overrides).unwrap();
        assert_eq!(tok.eos_token_id(), 42);
        assert_eq!(tok.bos_token_id(), 0);
        assert_eq!(tok.tokenize("rust", None, true).unwrap(), vec![0, 6, 42]);
    }

    #[test]
    fn missing_special_token_fails_load() {
        let err = SubwordTokenizer::from_json(&tokenizer_json(), &SpecialTokens::bert()).unwrap_err();
        assert!(matches!(err, EmbeddingsError::UnknownToken(t) if t == "[CLS]"));
    }

    #[test]
    fn missing_file() {
        let err = SubwordTokenizer::from_file("/nonexistent/tokenizer.json", &SpecialTokens::bert())
            .unwrap_err();
        assert!(matches!(err, EmbeddingsError::FileNotFound(_)));
    }

    #[test]
    fn batch_pads_with_given_id() {
        let tok = tokenizer();
        let batch = tok
            .tokenize_batch_pad_to_longest(&["hello", "hello world rust"], 1, None, true)
            .unwrap();
        assert_eq!(batch, vec![vec![0, 4, 2, 1, 1], vec![0, 4, 5, 6, 2]]);
    }

    /// Word-level tokenizer.json with no begin/end tokens at all.
    fn plain_json(with_unknown: bool) -> String {
        let vocab = if with_unknown {
            serde_json::json!({"[PAD]": 0, "[UNK]": 1, "hello": 2, "world": 3})
        } else {
            serde_json::json!({"[PAD]": 0, "hello": 1, "world": 2})
        };
        serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": {"type": "Lowercase"},
            "pre_tokenizer": {"type": "WhitespaceSplit"},
            "post_processor": null,
            "decoder": null,
            "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
        })
        .to_string()
    }

    #[test]
    fn plain_tokenizer_needs_no_specials() {
        let tok = PlainTokenizer::from_json(&plain_json(true)).unwrap();
        assert_eq!(tok.unknown_token_id(), Some(1));
        assert_eq!(tok.tokenize("Hello zebra world", None, false).unwrap(), vec![2, 1, 3]);
        assert_eq!(tok.tokenize("hello world", Some(1), false).unwrap(), vec![2]);
        assert!(matches!(
            tok.tokenize("hello", None, true),
            Err(EmbeddingsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn plain_tokenizer_without_unknown_id() {
        let tok = PlainTokenizer::from_json(&plain_json(false)).unwrap();
        assert_eq!(tok.unknown_token_id(), None);
        assert_eq!(tok.tokenize("hello world", None, false).unwrap(), vec![1, 2]);
    }
}
