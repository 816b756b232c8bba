//! Tiny on-disk model folders for loader tests.

#![allow(dead_code)]

use candle_core::{Device, Tensor};
use embeddings_core::model::{expected_parameters, Architecture, ModelConfig};
use embeddings_core::weights::{KeyDialect, KeyTransform};
use safetensors::tensor::TensorView;
use safetensors::Dtype;
use serde_json::{json, Value};
use std::path::Path;

pub const WORDS: &[&str] = &["hello", "world", "rust", "photo", "cat"];

/// Write `(name, shape, values)` triples as a `.safetensors` file.
pub fn write_safetensors(path: &Path, tensors: &[(String, Vec<usize>, Vec<f32>)]) {
    let bytes: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, values)| bytemuck::cast_slice::<f32, u8>(values).to_vec())
        .collect();
    let views: Vec<(String, TensorView)> = tensors
        .iter()
        .zip(&bytes)
        .map(|((name, shape, _), data)| {
            (
                name.clone(),
                TensorView::new(Dtype::F32, shape.clone(), data).unwrap(),
            )
        })
        .collect();
    let serialized =
        safetensors::serialize(views.iter().map(|(name, view)| (name.clone(), view)), &None)
            .unwrap();
    std::fs::write(path, serialized).unwrap();
}

/// Random weights for every parameter `architecture` needs, named through
/// `dialect`, minus any canonical name in `skip`.
pub fn random_weights(
    architecture: Architecture,
    config: &ModelConfig,
    dialect: &KeyDialect,
    skip: &[&str],
) -> Vec<(String, Vec<usize>, Vec<f32>)> {
    expected_parameters(architecture, config)
        .into_iter()
        .filter(|(name, _)| !skip.contains(&name.as_str()))
        .map(|(name, shape)| {
            let values = Tensor::randn(0.0f32, 0.1, shape.clone(), &Device::Cpu)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap();
            (dialect.transform(&name), shape, values)
        })
        .collect()
}

pub fn config_json(architecture: Architecture) -> Value {
    let vocab_size = match architecture {
        Architecture::ClipText => clip_vocab().len(),
        Architecture::Bert | Architecture::XlmRoberta => 4 + WORDS.len(),
    };
    let body = json!({
        "model_type": architecture.to_string(),
        "vocab_size": vocab_size,
        "hidden_size": 8,
        "num_hidden_layers": 2,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "max_position_embeddings": 80,
    });
    match architecture {
        Architecture::Bert => body,
        Architecture::XlmRoberta => {
            let mut body = body;
            body["pad_token_id"] = json!(1);
            body["type_vocab_size"] = json!(1);
            body
        }
        Architecture::ClipText => json!({
            "projection_dim": 4,
            "text_config": body,
        }),
    }
}

fn added(id: usize, content: &str) -> Value {
    json!({
        "id": id,
        "content": content,
        "single_word": false,
        "lstrip": false,
        "rstrip": false,
        "normalized": false,
        "special": true
    })
}

/// Word-level tokenizer.json whose first four ids are `specials` in order.
pub fn tokenizer_json(specials: [&str; 4]) -> String {
    let mut vocab = serde_json::Map::new();
    for (id, token) in specials.iter().chain(WORDS).enumerate() {
        vocab.insert(token.to_string(), json!(id));
    }
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": specials.iter().enumerate().map(|(i, s)| added(i, s)).collect::<Vec<_>>(),
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "WhitespaceSplit"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": specials[3]
        }
    })
    .to_string()
}

/// BERT specials: `[PAD]`, `[CLS]`, `[SEP]`, `[UNK]`.
pub fn bert_tokenizer_json() -> String {
    tokenizer_json(["[PAD]", "[CLS]", "[SEP]", "[UNK]"])
}

/// XLM-R specials: `<s>`, `<pad>`, `</s>`, `<unk>`.
pub fn xlm_roberta_tokenizer_json() -> String {
    tokenizer_json(["<s>", "<pad>", "</s>", "<unk>"])
}

/// Every single letter, every letter with `</w>`, every prefix of each
/// word in [`WORDS`], plus the two CLIP specials.
pub fn clip_vocab() -> Vec<String> {
    let mut vocab: Vec<String> = Vec::new();
    let mut push = |token: String| {
        if !vocab.contains(&token) {
            vocab.push(token);
        }
    };
    for c in 'a'..='z' {
        push(c.to_string());
        push(format!("{c}</w>"));
    }
    for line in clip_merges() {
        let (left, right) = line.split_once(' ').unwrap();
        push(format!("{left}{right}"));
    }
    push("<|startoftext|>".into());
    push("<|endoftext|>".into());
    vocab
}

fn clip_merges() -> Vec<String> {
    let mut merges = Vec::new();
    for word in WORDS {
        let chars: Vec<char> = word.chars().collect();
        let mut left = chars[0].to_string();
        for (i, c) in chars.iter().enumerate().skip(1) {
            let right = if i == chars.len() - 1 {
                format!("{c}</w>")
            } else {
                c.to_string()
            };
            merges.push(format!("{left} {right}"));
            left = format!("{left}{right}");
        }
    }
    merges
}

fn write_clip_tokenizer(dir: &Path) {
    let vocab: serde_json::Map<String, Value> = clip_vocab()
        .into_iter()
        .enumerate()
        .map(|(id, token)| (token, json!(id)))
        .collect();
    std::fs::write(dir.join("vocab.json"), Value::Object(vocab).to_string()).unwrap();
    let merges = std::iter::once("#version: 0.2".to_string())
        .chain(clip_merges())
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(dir.join("merges.txt"), merges).unwrap();
}

/// Write a complete model folder for `architecture` into `dir`.
pub fn write_model_dir(
    dir: &Path,
    architecture: Architecture,
    dialect: &KeyDialect,
    skip: &[&str],
) -> ModelConfig {
    let config_value = config_json(architecture);
    std::fs::write(dir.join("config.json"), config_value.to_string()).unwrap();
    let config = ModelConfig::from_json(&config_value.to_string(), architecture).unwrap();

    let weights = random_weights(architecture, &config, dialect, skip);
    write_safetensors(&dir.join("model.safetensors"), &weights);

    match architecture {
        Architecture::Bert => {
            std::fs::write(dir.join("tokenizer.json"), bert_tokenizer_json()).unwrap()
        }
        Architecture::XlmRoberta => {
            std::fs::write(dir.join("tokenizer.json"), xlm_roberta_tokenizer_json()).unwrap()
        }
        Architecture::ClipText => write_clip_tokenizer(dir),
    }
    config
}

/// Write a lookup-table folder: `[vocab, 3]` table under `key` with row `i`
/// equal to `[i, i + 1, i + 2]`, plus a BERT tokenizer.json.
pub fn write_static_dir(dir: &Path, key: &str, config: Option<Value>) {
    let rows = 4 + WORDS.len();
    let values: Vec<f32> = (0..rows)
        .flat_map(|i| [i as f32, i as f32 + 1.0, i as f32 + 2.0])
        .collect();
    write_safetensors(
        &dir.join("model.safetensors"),
        &[(key.to_string(), vec![rows, 3], values)],
    );
    std::fs::write(dir.join("tokenizer.json"), bert_tokenizer_json()).unwrap();
    if let Some(config) = config {
        std::fs::write(dir.join("config.json"), config.to_string()).unwrap();
    }
}

/// Word-level tokenizer.json holding only `[PAD]` and `[UNK]` before
/// [`WORDS`]: no begin or end token.
pub fn plain_tokenizer_json() -> String {
    let mut vocab = serde_json::Map::new();
    for (id, token) in ["[PAD]", "[UNK]"].iter().chain(WORDS).enumerate() {
        vocab.insert(token.to_string(), json!(id));
    }
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [added(0, "[PAD]"), added(1, "[UNK]")],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "WhitespaceSplit"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    })
    .to_string()
}
