//! Byte-pair encoding tokenizer.
//!
//! Text is lowercased, whitespace runs collapse to one space, and a regex
//! splits it into units: the two special-token strings, English contraction
//! suffixes, letter runs, single digits and symbol runs. Each unit is merged
//! independently by rank and the merged symbols are looked up in the
//! vocabulary.

use super::{apply_special_tokens, SpecialIds, TextTokenizer};
use crate::error::{EmbeddingsError, Result};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Suffix marking the last symbol of a unit.
pub const END_OF_WORD: &str = "</w>";

const BOS: &str = "<|startoftext|>";
const EOS: &str = "<|endoftext|>";
const UNK: &str = "<|endoftext|>";

const SPLIT_PATTERN: &str =
    r"<\|startoftext\|>|<\|endoftext\|>|'s|'t|'re|'ve|'m|'ll|'d|[\p{L}]+|[\p{N}]|[^\s\p{L}\p{N}]+";

/// Merge priority of each symbol pair. Lower merges first.
pub type MergeRanks = HashMap<(String, String), usize>;

/// Parse a merges file.
///
/// The first non-empty line is a header and is skipped. Every other
/// non-empty line must hold exactly two space-separated symbols; its rank is
/// its position among those lines.
pub fn parse_merges(text: &str) -> Result<MergeRanks> {
    let mut ranks = MergeRanks::new();
    let mut header_seen = false;
    for (index, raw) in text.split('\n').enumerate() {
        if raw.is_empty() {
            continue;
        }
        if !header_seen {
            header_seen = true;
            continue;
        }
        let fields: Vec<&str> = raw.trim().split(' ').collect();
        let [left, right] = fields.as_slice() else {
            return Err(EmbeddingsError::MalformedMergeLine {
                line: index + 1,
                content: raw.to_string(),
            });
        };
        let rank = ranks.len();
        ranks
            .entry((left.to_string(), right.to_string()))
            .or_insert(rank);
    }
    Ok(ranks)
}

/// Byte-pair encoding tokenizer with a per-unit merge cache.
pub struct BpeTokenizer {
    /// Subword string to id.
    vocab: HashMap<String, u32>,
    /// Merge ranks.
    ranks: MergeRanks,
    /// Begin/end ids.
    specials: SpecialIds,
    /// Id of the unknown token.
    unk_id: u32,
    /// Pre-tokenization pattern.
    split_pattern: Regex,
    /// Whitespace runs.
    whitespace: Regex,
    /// Merged symbols per raw unit.
    cache: Mutex<HashMap<String, Vec<String>>>,
}

impl BpeTokenizer {
    /// Build a tokenizer from an in-memory vocabulary and merge table.
    pub fn new(vocab: HashMap<String, u32>, ranks: MergeRanks) -> Result<Self> {
        let lookup = |token: &str| {
            vocab
                .get(token)
                .copied()
                .ok_or_else(|| EmbeddingsError::UnknownToken(token.to_string()))
        };
        let specials = SpecialIds {
            bos: lookup(BOS)?,
            eos: lookup(EOS)?,
        };
        let unk_id = lookup(UNK)?;

        let split_pattern = Regex::new(SPLIT_PATTERN)
            .map_err(|e| EmbeddingsError::Tokenizer(format!("split pattern: {e}")))?;
        let whitespace = Regex::new(r"\s+")
            .map_err(|e| EmbeddingsError::Tokenizer(format!("whitespace pattern: {e}")))?;

        // Special tokens are never split
        let cache = HashMap::from([
            (BOS.to_string(), vec![BOS.to_string()]),
            (EOS.to_string(), vec![EOS.to_string()]),
        ]);

        Ok(Self {
            vocab,
            ranks,
            specials,
            unk_id,
            split_pattern,
            whitespace,
            cache: Mutex::new(cache),
        })
    }

    /// Load `vocab.json` and `merges.txt`.
    pub fn from_files(vocab_path: impl AsRef<Path>, merges_path: impl AsRef<Path>) -> Result<Self> {
        let vocab_path = vocab_path.as_ref();
        let merges_path = merges_path.as_ref();
        for path in [vocab_path, merges_path] {
            if !path.exists() {
                return Err(EmbeddingsError::FileNotFound(path.to_path_buf()));
            }
        }

        let vocab: HashMap<String, u32> =
            serde_json::from_str(&std::fs::read_to_string(vocab_path)?).map_err(|e| {
                EmbeddingsError::InvalidFile(format!("{}: {e}", vocab_path.display()))
            })?;
        let ranks = parse_merges(&std::fs::read_to_string(merges_path)?)?;

        info!(
            vocab = vocab.len(),
            merges = ranks.len(),
            "Loaded BPE tokenizer"
        );
        Self::new(vocab, ranks)
    }

    /// Load `vocab.json` and `merges.txt` from a model directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Self::from_files(dir.join("vocab.json"), dir.join("merges.txt"))
    }

    /// Encode `text`, optionally padding with id `0` to `pad_to_length`.
    pub fn tokenize_padded(
        &self,
        text: &str,
        max_length: Option<usize>,
        pad_to_length: Option<usize>,
        add_special_tokens: bool,
    ) -> Result<Vec<u32>> {
        let lowered = text.to_lowercase();
        let clean = self.whitespace.replace_all(&lowered, " ");

        let mut ids = Vec::new();
        for unit in self.split_pattern.find_iter(&clean) {
            for symbol in self.bpe(unit.as_str()) {
                let id = self
                    .vocab
                    .get(&symbol)
                    .copied()
                    .ok_or(EmbeddingsError::UnknownToken(symbol))?;
                ids.push(id);
            }
        }

        apply_special_tokens(
            &ids,
            self.specials,
            max_length,
            pad_to_length,
            add_special_tokens,
        )
    }

    /// Merge one unit into subword symbols.
    pub fn bpe(&self, unit: &str) -> Vec<String> {
        if let Some(hit) = self.cache.lock().get(unit) {
            return hit.clone();
        }

        let mut symbols: Vec<String> = unit.chars().map(String::from).collect();
        if let Some(last) = symbols.last_mut() {
            last.push_str(END_OF_WORD);
        }

        while let Some((left, right)) = self.lowest_ranked_pair(&symbols) {
            let mut merged = Vec::with_capacity(symbols.len());
            let mut i = 0;
            while i < symbols.len() {
                if i + 1 < symbols.len() && symbols[i] == left && symbols[i + 1] == right {
                    merged.push(format!("{left}{right}"));
                    i += 2;
                } else {
                    merged.push(std::mem::take(&mut symbols[i]));
                    i += 1;
                }
            }
            symbols = merged;
        }

        debug!(unit, symbols = symbols.len(), "BPE cache miss");
        self.cache.lock().insert(unit.to_string(), symbols.clone());
        symbols
    }

    fn lowest_ranked_pair(&self, symbols: &[String]) -> Option<(String, String)> {
        symbols
            .windows(2)
            .filter_map(|pair| {
                let key = (pair[0].clone(), pair[1].clone());
                self.ranks.get(&key).map(|&rank| (rank, key))
            })
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, key)| key)
    }

    /// Begin-of-sequence id.
    pub fn bos_token_id(&self) -> u32 {
        self.specials.bos
    }

    /// End-of-sequence id.
    pub fn eos_token_id(&self) -> u32 {
        self.specials.eos
    }

    /// Vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Number of cached units.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl TextTokenizer for BpeTokenizer {
    fn unknown_token_id(&self) -> Option<u32> {
        Some(self.unk_id)
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

impl std::fmt::Debug for BpeTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BpeTokenizer")
            .field("vocab_size", &self.vocab.len())
            .field("merges", &self.ranks.len())
            .field("bos_token_id", &self.specials.bos)
            .field("eos_token_id", &self.specials.eos)
            .finish()
    }
}
