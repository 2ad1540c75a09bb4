use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;

pub mod regular_bench;

pub fn bench_main(c: &mut Criterion) {
    match std::env::var("JVMCI_BENCH") {
        Ok(name) => regular_bench::bench_named(c, &name),
        Err(_) => regular_bench::bench(c),
    }
}

criterion_group!(benches, bench_main);
criterion_main!(benches);
