//! Benchmarks for the stream chunkers.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use carve_chunk::Chunker as _;
use carve_chunk::registry::new_chunker;

fn bench_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

fn bench_chunkers(c: &mut Criterion) {
    let specs: &[(&str, &str)] = &[
        ("fixed-size", "fixed-size_262144"),
        (
            "rabin",
            "rabin_polynomial=17437180132763653_window-size=16_min-size=87381_max-size=393216_state-mask-bits=18_state-target=0",
        ),
        (
            "buzhash",
            "buzhash_hash-table=v0_min-size=131072_max-size=524288_state-mask-bits=17_state-target=0",
        ),
    ];
    let sizes: &[usize] = &[
        1024 * 1024,      // 1 MB
        4 * 1024 * 1024,  // 4 MB
        16 * 1024 * 1024, // 16 MB
    ];

    for &(name, spec) in specs {
        let (chunker, _constants) = new_chunker(spec).expect("bench spec must parse");
        let mut group = c.benchmark_group(name);
        for &size in sizes {
            let data = bench_data(size);
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
                b.iter(|| {
                    let mut total = 0usize;
                    chunker
                        .split(data, true, &mut |chunk| {
                            total += chunk.size;
                            Ok(())
                        })
                        .unwrap();
                    total
                });
            });
        }
        group.finish();
    }
}

criterion_group!(benches, bench_chunkers);
criterion_main!(benches);
