pub mod handle_table;
pub mod metadata_handles;

pub use criterion::Criterion;

pub fn bench(c: &mut Criterion) {
    handle_table::bench(c);
    metadata_handles::bench(c);
}

/// Run one group of benchmarks, selected with `JVMCI_BENCH`.
pub fn bench_named(c: &mut Criterion, name: &str) {
    match name {
        "handle_table" => handle_table::bench(c),
        "metadata_handles" => metadata_handles::bench(c),
        _ => panic!("Unknown benchmark {:?}", name),
    }
}
