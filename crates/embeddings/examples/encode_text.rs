//! Text embedding example.
//!
//! Embeds a few sentences with a model folder and prints their pairwise
//! cosine similarities.
//!
//! Usage: cargo run --example encode_text -- <model_dir> [bert|xlm-roberta|clip]

use anyhow::{Context, Result};
use embeddings::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let model_dir = args.next().context("usage: encode_text <model_dir> [architecture]")?;
    let architecture: Architecture = args.next().as_deref().unwrap_or("bert").parse()?;

    let embedder = Embedder::builder()
        .model_dir(&model_dir)
        .architecture(architecture)
        .build()
        .await?;
    println!("Loaded {architecture} model, {} dimensions", embedder.dimension());

    let texts = [
        "a photo of a cat",
        "a picture of a kitten",
        "the stock market fell sharply",
    ];
    let vectors = embedder.embed_batch(&texts).await?;
    for (text, vector) in texts.iter().zip(&vectors) {
        println!("{text:>32}: {:?}", &vector[..vector.len().min(4)]);
    }

    for (i, a) in texts.iter().enumerate() {
        for b in &texts[i + 1..] {
            let score = embedder.similarity(a, b).await?;
            println!("{score:.4}  {a:?} / {b:?}");
        }
    }

    Ok(())
}
