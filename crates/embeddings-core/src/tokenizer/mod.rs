//! Text to token-id conversion.
//!
//! Three implementations share one contract ([`TextTokenizer`]):
//! - [`BpeTokenizer`]: byte-pair merging over a `vocab.json` + `merges.txt`
//!   pair, with a memoized merge cache
//! - [`SubwordTokenizer`]: a `tokenizer.json` segmentation model with
//!   configurable special tokens
//! - [`PlainTokenizer`]: the same segmentation with no special tokens, for
//!   lookup-table models
//!
//! The first two apply the same special-token, truncation and padding policy
//! ([`apply_special_tokens`]). [`Tokenizer`] is the closed set a model bundle
//! picks from at load time.

mod bpe;
mod subword;

pub use bpe::{parse_merges, BpeTokenizer, MergeRanks, END_OF_WORD};
pub use subword::{PlainTokenizer, SpecialTokens, SubwordTokenizer};

use crate::error::{EmbeddingsError, Result};

/// Capability shared by every tokenizer.
pub trait TextTokenizer: Send + Sync {
    /// Id emitted for text the vocabulary cannot represent, if any.
    fn unknown_token_id(&self) -> Option<u32>;

    /// Encode one text.
    ///
    /// With `add_special_tokens` the result starts with the begin id and ends
    /// with the end id, and `max_length` (which must then be at least 2)
    /// bounds the total length including both.
    fn tokenize(
        &self,
        text: &str,
        max_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>>;

    /// Encode several texts, padding each with `pad_id` to the longest
    /// sequence of this batch.
    fn tokenize_batch_pad_to_longest(
        &self,
        texts: &[&str],
        pad_id: u32,
        max_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<Vec<u32>>> {
        let encoded = texts
            .iter()
            .map(|text| self.tokenize(text, max_length, add_special_tokens))
            .collect::<Result<Vec<_>>>()?;
        Ok(pad_to_longest(encoded, pad_id))
    }
}

/// Right-pad every sequence with `pad_id` to the longest one.
pub fn pad_to_longest(mut sequences: Vec<Vec<u32>>, pad_id: u32) -> Vec<Vec<u32>> {
    let longest = sequences.iter().map(Vec::len).max().unwrap_or(0);
    for seq in &mut sequences {
        seq.resize(longest, pad_id);
    }
    sequences
}

/// Begin and end ids wrapped around an encoded sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialIds {
    /// Begin-of-sequence id.
    pub bos: u32,
    /// End-of-sequence id.
    pub eos: u32,
}

/// Wrap raw segment ids with special tokens, truncate and pad.
///
/// Truncation keeps the first `max_length - 2` ids when special tokens are
/// added and the first `max_length` otherwise. Padding appends id `0` up to
/// `pad_to_length`, but only when that does not exceed `max_length`.
pub fn apply_special_tokens(
    ids: &[u32],
    specials: SpecialIds,
    max_length: Option<usize>,
    pad_to_length: Option<usize>,
    add_special_tokens: bool,
) -> Result<Vec<u32>> {
    let budget = match (max_length, add_special_tokens) {
        (Some(max), true) if max < 2 => {
            return Err(EmbeddingsError::InvalidArgument(format!(
                "max_length must be at least 2 to hold begin and end tokens, got {max}"
            )))
        }
        (Some(max), true) => max - 2,
        (Some(max), false) => max,
        (None, _) => ids.len(),
    };

    let mut result = Vec::with_capacity(budget.min(ids.len()) + 2);
    if add_special_tokens {
        result.push(specials.bos);
    }
    result.extend_from_slice(&ids[..budget.min(ids.len())]);
    if add_special_tokens {
        result.push(specials.eos);
    }

    if let Some(pad_to) = pad_to_length {
        if pad_to < 2 {
            return Err(EmbeddingsError::InvalidArgument(format!(
                "pad_to_length must be at least 2, got {pad_to}"
            )));
        }
        let fits = max_length.map_or(true, |max| pad_to <= max);
        if fits && pad_to > result.len() {
            result.resize(pad_to, 0);
        }
    }
    Ok(result)
}

/// Tokenizer selected once per model bundle.
#[derive(Debug)]
pub enum Tokenizer {
    /// Byte-pair encoding.
    Bpe(BpeTokenizer),
    /// Model-file driven subword segmentation.
    Subword(SubwordTokenizer),
    /// Segmentation only, without special tokens.
    Plain(PlainTokenizer),
}

impl Tokenizer {
    /// Id to pad batches with, when the tokenizer defines one.
    pub fn pad_token_id(&self) -> Option<u32> {
        match self {
            Self::Bpe(_) | Self::Plain(_) => None,
            Self::Subword(t) => Some(t.pad_token_id()),
        }
    }
}

impl TextTokenizer for Tokenizer {
    fn unknown_token_id(&self) -> Option<u32> {
        match self {
            Self::Bpe(t) => t.unknown_token_id(),
            Self::Subword(t) => t.unknown_token_id(),
            Self::Plain(t) => t.unknown_token_id(),
        }
    }

    fn tokenize(
        &self,
        text: &str,
        max_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>> {
        match self {
            Self::Bpe(t) => t.tokenize(text, max_length, add_special_tokens),
            Self::Subword(t) => t.tokenize(text, max_length, add_special_tokens),
            Self::Plain(t) => t.tokenize(text, max_length, add_special_tokens),
        }
    }
}

impl From<BpeTokenizer> for Tokenizer {
    fn from(t: BpeTokenizer) -> Self {
        Self::Bpe(t)
    }
}

impl From<SubwordTokenizer> for Tokenizer {
    fn from(t: SubwordTokenizer) -> Self {
        Self::Subword(t)
    }
}

impl From<PlainTokenizer> for Tokenizer {
    fn from(t: PlainTokenizer) -> Self {
        Self::Plain(t)
    }
}
