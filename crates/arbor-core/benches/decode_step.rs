//! Decode step benchmarks on the reference engine.
//!
//! A step moves the whole cache into the engine and rebuilds it from the
//! returned buffers. These benchmarks track how step cost grows with cache
//! capacity and batch size.

use arbor_core::decode::{DecodeConfig, DecodeStateMachine};
use arbor_core::engine::ReferenceEngine;
use arbor_core::model::{AttentionType, ModelConfig, SpecialTokens};
use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn create_model(max_cache_length: usize) -> ModelConfig {
    ModelConfig {
        vocab_size: 256,
        hidden_size: 64,
        intermediate_size: 128,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        num_hidden_layers: 4,
        max_position_embeddings: 4096,
        rms_norm_eps: 1e-6,
        rope_theta: 10_000.0,
        head_dim: 16,
        max_cache_length,
        attention_types: vec![AttentionType::LocalSliding, AttentionType::Global],
        sliding_window: Some(max_cache_length),
        attn_logit_softcapping: Some(50.0),
        final_logit_softcapping: Some(30.0),
        query_pre_attention_norm: Default::default(),
        model_type: "bench".to_string(),
    }
}

fn create_machine(max_cache_length: usize) -> DecodeStateMachine<ReferenceEngine> {
    let model = create_model(max_cache_length);
    let engine = ReferenceEngine::random(model.clone(), &Device::Cpu).unwrap();
    let special = SpecialTokens {
        bos: 2,
        eos: 1,
        unknown: 3,
        pad: 0,
    };
    DecodeStateMachine::new(engine, DecodeConfig::from_model(&model, special, Device::Cpu))
}

fn bench_step_vs_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_vs_capacity");
    group.throughput(Throughput::Elements(1));

    for capacity in [64, 256, 1024].iter() {
        let machine = create_machine(*capacity);
        let state = machine.initialize(&[vec![10, 11, 12]], 64).unwrap();

        group.bench_with_input(BenchmarkId::new("capacity", capacity), capacity, |b, _| {
            b.iter(|| black_box(machine.step(state.clone()).unwrap()))
        });
    }

    group.finish();
}

fn bench_step_vs_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_vs_batch");

    for batch in [1, 4, 16].iter() {
        let machine = create_machine(128);
        let prompts: Vec<Vec<u32>> = (0..*batch).map(|i| vec![10 + i as u32, 20]).collect();
        let state = machine.initialize(&prompts, 32).unwrap();
        group.throughput(Throughput::Elements(*batch as u64));

        group.bench_with_input(BenchmarkId::new("batch", batch), batch, |b, _| {
            b.iter(|| black_box(machine.step(state.clone()).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_step_vs_capacity, bench_step_vs_batch);
criterion_main!(benches);
