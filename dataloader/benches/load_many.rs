use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_dataloader::DataLoader;
use tokio::runtime::Runtime;

type BenchLoader = DataLoader<u64, u64, String>;

fn build_loader(max_batch_size: usize, cache: bool) -> BenchLoader {
  DataLoader::builder()
    .max_batch_size(max_batch_size)
    .cache(cache)
    .build(|_, keys: Vec<u64>| async move { Ok(keys.into_iter().map(|key| Ok(key * 2)).collect()) })
    .unwrap()
}

// --- Benchmark Functions ---

fn bench_uncached_loads(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let mut group = c.benchmark_group("load_many/uncached");

  for &num_keys in &[16u64, 256, 4096] {
    for &max_batch_size in &[32usize, usize::MAX] {
      group.throughput(Throughput::Elements(num_keys));
      let id = BenchmarkId::new(format!("max_batch_{}", max_batch_size), num_keys);
      group.bench_with_input(id, &num_keys, |b, &num_keys| {
        b.to_async(&rt).iter(|| async {
          let loader = build_loader(max_batch_size, false);
          black_box(loader.load_many(0..num_keys).await)
        });
      });
    }
  }
  group.finish();
}

fn bench_cached_loads(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let mut group = c.benchmark_group("load_many/cached");

  for &num_keys in &[16u64, 256, 4096] {
    let loader = {
      let _guard = rt.enter();
      build_loader(usize::MAX, true)
    };
    rt.block_on(loader.load_many(0..num_keys));

    group.throughput(Throughput::Elements(num_keys));
    group.bench_with_input(BenchmarkId::from_parameter(num_keys), &num_keys, |b, &num_keys| {
      b.to_async(&rt).iter(|| async { black_box(loader.load_many(0..num_keys).await) });
    });
  }
  group.finish();
}

criterion_group!(benches, bench_uncached_loads, bench_cached_loads);
criterion_main!(benches);
