//! Greedy decoding with the reference engine.
//!
//! Runs the decode state machine over a batch of id prompts with random
//! weights, or over text prompts when a directory holding `tokenizer.json`
//! is given.
//!
//! Run with:
//! ```bash
//! cargo run -p arbor-core --example greedy_decode
//! cargo run -p arbor-core --example greedy_decode -- /path/to/gemma-2-2b
//! ```

use arbor_core::decode::{DecodeConfig, DecodeStateMachine, Sampler};
use arbor_core::engine::ReferenceEngine;
use arbor_core::model::{AttentionType, ModelConfig, SpecialTokens, Tokenizer};
use candle_core::Device;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::Instant;

fn tiny_model() -> ModelConfig {
    ModelConfig {
        vocab_size: 64,
        hidden_size: 32,
        intermediate_size: 64,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        num_hidden_layers: 4,
        max_position_embeddings: 512,
        rms_norm_eps: 1e-6,
        rope_theta: 10_000.0,
        head_dim: 8,
        max_cache_length: 64,
        attention_types: vec![AttentionType::LocalSliding, AttentionType::Global],
        sliding_window: Some(32),
        attn_logit_softcapping: Some(50.0),
        final_logit_softcapping: Some(30.0),
        query_pre_attention_norm: Default::default(),
        model_type: "tiny".to_string(),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let device = Device::Cpu;

    if let Some(model_dir) = std::env::args().nth(1) {
        let tokenizer = Tokenizer::from_dir(Path::new(&model_dir))?;
        let mut model = tiny_model();
        model.vocab_size = tokenizer.vocab_size();
        println!("Vocab size: {} (random weights)", model.vocab_size);

        let engine = ReferenceEngine::random(model.clone(), &device)?;
        let prompts = ["The capital of France is", "Once upon a time"];
        let sampler = Sampler::new(engine, tokenizer, &model, device).with_max_generated_tokens(16);
        for (prompt, out) in prompts.iter().zip(sampler.sample(&prompts)?) {
            println!("{prompt} -> {out:?}");
        }
        return Ok(());
    }

    let model = tiny_model();
    let special = SpecialTokens {
        bos: 2,
        eos: 1,
        unknown: 3,
        pad: 0,
    };
    let engine = ReferenceEngine::random(model.clone(), &device)?;
    let machine = DecodeStateMachine::new(engine, DecodeConfig::from_model(&model, special, device));

    let prompts = vec![vec![10, 11, 12, 13], vec![20, 21], vec![30]];
    let state = machine.initialize(&prompts, 12)?;
    println!(
        "Batch of {}, {} columns, budget {} steps",
        state.batch_size(),
        state.total_length(),
        state.max_steps()
    );

    let start = Instant::now();
    let state = machine.run_with(state, |s| {
        println!("  step {:>2}: done {:?}", s.step(), s.done());
        ControlFlow::Continue(())
    })?;
    let elapsed = start.elapsed();

    println!("\nFinished after {} steps in {:.2?}", state.step(), elapsed);
    for (row, tokens) in machine.decode(&state).iter().enumerate() {
        println!("  row {row}: {tokens:?}");
    }

    Ok(())
}
