//! Word vector example.
//!
//! Loads a word2vec text file and prints the nearest neighbours of a word.
//!
//! Usage: cargo run --example word_vectors -- <vectors.txt> <word> [top_k]

use anyhow::{Context, Result};
use candle_core::Device;
use embeddings::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().context("usage: word_vectors <vectors.txt> <word> [top_k]")?;
    let word = args.next().context("missing query word")?;
    let top_k = match args.next() {
        Some(k) => k.parse().context("top_k must be a number")?,
        None => 10,
    };

    let index = SimilarityIndex::from_file(&path, &Device::Cpu)?;
    println!("{} words, {} dimensions", index.len(), index.dimension());

    if !index.contains(&word) {
        println!("{word:?} is not in the vocabulary");
        return Ok(());
    }
    for (neighbour, score) in index.most_similar(&word, top_k).await? {
        println!("{score:.4}  {neighbour}");
    }

    Ok(())
}
