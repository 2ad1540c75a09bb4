use criterion::black_box;
use criterion::Criterion;

use jvmci::util::hashtable::{HandleTable, StrKey};

pub fn bench(c: &mut Criterion) {
    let names: Vec<String> = (0..512).map(|n| format!("jdk/vm/ci/hotspot/Type{}", n)).collect();
    let mut table: HandleTable<String, StrKey> = HandleTable::new(137);
    for name in names.iter() {
        table.add(name.clone());
    }

    c.bench_function("handle table lookup", |b| {
        b.iter(|| {
            for name in names.iter() {
                black_box(table.get(name.as_str()));
            }
        })
    });
    c.bench_function("handle table intern existing", |b| {
        b.iter(|| black_box(table.intern("jdk/vm/ci/hotspot/Type42", || unreachable!()).len()))
    });
}
