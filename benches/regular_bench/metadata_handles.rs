use criterion::black_box;
use criterion::Criterion;

use jvmci::metadata_handles::{MetadataHandles, BLOCK_SIZE};
use jvmci::util::Address;
use jvmci::vm::{MetadataKind, MetadataRef};

fn method(n: usize) -> MetadataRef {
    MetadataRef {
        address: unsafe { Address::from_usize(0x1000_0000 + n * 16) },
        kind: MetadataKind::Method,
    }
}

pub fn bench(c: &mut Criterion) {
    let handles = MetadataHandles::new();

    c.bench_function("metadata handle allocate/release", |b| {
        b.iter(|| {
            let handle = handles.allocate(black_box(method(1)));
            handles.release(handle);
        })
    });

    // Several blocks in use, so lookups and scans cross block boundaries
    let live: Vec<_> = (0..BLOCK_SIZE * 8).map(|n| handles.allocate(method(n))).collect();
    c.bench_function("metadata handle get", |b| {
        b.iter(|| {
            for handle in live.iter() {
                black_box(handles.get(*handle));
            }
        })
    });
    c.bench_function("metadata handle scan", |b| {
        b.iter(|| {
            let mut visited = 0;
            handles.metadata_do(|_| visited += 1);
            black_box(visited)
        })
    });
}
