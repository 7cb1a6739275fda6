//! State tree flatten/rebuild benchmarks.
//!
//! Every decode step flattens the cache tree into an ordered value list and
//! rebuilds it from the engine's output, so both directions should scale
//! linearly with the number of leaves and not with tree depth.

use arbor_core::cache::{CacheConfig, RotatingCache};
use arbor_core::tree::StateTree;
use candle_core::{DType, Device};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Tree of `num_layers` branches with three leaves each.
fn create_layer_tree(num_layers: usize) -> StateTree<usize> {
    let mut tree = StateTree::new_branch();
    for layer in 0..num_layers {
        let name = format!("layer_{layer}");
        for (i, leaf) in ["cursor", "keys", "values"].into_iter().enumerate() {
            tree.set([name.as_str(), leaf], layer * 3 + i).unwrap();
        }
    }
    tree
}

fn bench_flatten_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten_rebuild");

    for num_layers in [2, 26, 46, 128].iter() {
        let tree = create_layer_tree(*num_layers);
        group.throughput(Throughput::Elements((*num_layers * 3) as u64));

        group.bench_with_input(BenchmarkId::new("into_values", num_layers), &tree, |b, tree| {
            b.iter(|| black_box(tree.clone().into_values()))
        });

        let values = tree.clone().into_values();
        group.bench_with_input(BenchmarkId::new("from_values", num_layers), &values, |b, values| {
            b.iter(|| black_box(StateTree::from_values(values.clone(), &tree).unwrap()))
        });
    }

    group.finish();
}

fn bench_lookup_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_depth");

    for depth in [1, 4, 16, 64].iter() {
        let path: Vec<String> = (0..*depth).map(|i| format!("n{i}")).collect();
        let mut tree = StateTree::new_branch();
        tree.set(&path, 7u32).unwrap();

        group.bench_with_input(BenchmarkId::new("get", depth), &path, |b, path| {
            b.iter(|| black_box(tree.get(black_box(path)).unwrap()))
        });
    }

    group.finish();
}

fn bench_cache_shape_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_shape_rebuild");

    for num_layers in [2, 26].iter() {
        let config = CacheConfig {
            num_layers: *num_layers,
            capacity: 64,
            batch_size: 1,
            num_kv_heads: 4,
            head_dim: 32,
            dtype: DType::F32,
        };
        let cache = RotatingCache::new(&config, &Device::Cpu).unwrap();
        let shape = cache.shape_handle();
        let values = cache.into_values();

        group.bench_with_input(BenchmarkId::new("layers", num_layers), &values, |b, values| {
            b.iter(|| black_box(shape.rebuild(values.clone()).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_flatten_rebuild,
    bench_lookup_depth,
    bench_cache_shape_rebuild
);
criterion_main!(benches);
