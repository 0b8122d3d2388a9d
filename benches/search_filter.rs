use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use laptop_catalog::filter::qualifies;
use laptop_catalog::proto::memory::Unit;
use laptop_catalog::proto::{Cpu, Filter, Laptop, Memory};
use laptop_catalog::store::{InMemoryLaptopStore, LaptopStore};
use tokio::sync::mpsc;

fn laptop(i: usize) -> Laptop {
    Laptop {
        id: format!("laptop-{i}"),
        brand: "Dell".to_string(),
        name: "XPS".to_string(),
        cpu: Some(Cpu {
            number_cores: 2 + (i % 7) as u32,
            min_ghz: 2.0 + (i % 15) as f64 / 10.0,
            ..Default::default()
        }),
        ram: Some(Memory {
            value: 4 << (i % 4),
            unit: Unit::Gigabyte as i32,
        }),
        price_usd: 1500.0 + (i % 2000) as f64,
        release_year: 2020,
    }
}

fn filter() -> Filter {
    Filter {
        max_price_usd: 2500.0,
        min_cpu_cores: 4,
        min_cpu_ghz: 2.5,
        min_ram: Some(Memory {
            value: 8192,
            unit: Unit::Megabyte as i32,
        }),
    }
}

fn bench_qualifies(c: &mut Criterion) {
    let laptop = laptop(42);
    let filter = filter();

    c.bench_function("filter_qualifies", |b| {
        b.iter(|| qualifies(black_box(&filter), black_box(&laptop)))
    });
}

fn bench_store_search(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("store_search");

    for size in [100usize, 1_000, 10_000] {
        let store = InMemoryLaptopStore::new();
        runtime.block_on(async {
            for i in 0..size {
                store.save(&laptop(i)).await.unwrap();
            }
        });
        let filter = filter();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                runtime.block_on(async {
                    let (mut tx, mut rx) = mpsc::channel(size);
                    store.search(black_box(&filter), &mut tx).await.unwrap();
                    drop(tx);

                    let mut found = 0usize;
                    while rx.recv().await.is_some() {
                        found += 1;
                    }
                    found
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_qualifies, bench_store_search);
criterion_main!(benches);
