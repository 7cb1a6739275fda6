//! Batched generation through the async façade.
//!
//! Needs a model directory with `config.json` and `tokenizer.json`. Weights
//! are random, so the output is noise; the example shows the plumbing.
//!
//! Run with:
//! ```bash
//! cargo run -p arbor --example generate -- /path/to/model
//! ```

use arbor::prelude::*;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let model_dir: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: generate <model_dir>"))?;

    let generator = Generator::builder()
        .config_path(model_dir.join("config.json"))
        .tokenizer_dir(&model_dir)
        .cache_capacity(256)
        .build()
        .await?;

    let prompts = ["The capital of France is", "Rust is a language that"];
    let results = generator.generate(prompts).max_tokens(24).execute().await?;

    for (prompt, result) in prompts.iter().zip(&results) {
        println!("{prompt}");
        println!(
            "  -> {:?} ({} tokens, finished: {})",
            result.text, result.num_generated_tokens, result.finished
        );
    }

    let stats = generator.stats();
    tracing::info!(steps = stats.steps, tokens = stats.generated_tokens, "done");
    Ok(())
}
