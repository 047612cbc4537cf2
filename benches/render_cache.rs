//! Render Cache Benchmarks
//!
//! Measures the cached-page path that every repeat request takes.
//!
//! Run with: `cargo bench --bench render_cache`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::PathBuf;
use std::time::Duration;

use material_page_server::render::{ImageFormat, PageImage, RenderCache};

fn page_image(page: u32) -> PageImage {
    PageImage {
        path: PathBuf::from(format!("/nonexistent/bench_page{}.png", page)),
        format: ImageFormat::Png,
        width: 1448,
        height: 2048,
    }
}

fn bench_cache_hit(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let cache = RenderCache::with_capacity(1000);
    let ttl = Duration::from_secs(3600);

    runtime.block_on(async {
        for page in 1..=500 {
            cache.put("bench", page, page_image(page), ttl);
        }
    });

    c.bench_function("render_cache_get_hit", |b| {
        let _guard = runtime.enter();
        let mut page = 0;
        b.iter(|| {
            page = page % 500 + 1;
            black_box(cache.get(black_box("bench"), page))
        })
    });

    c.bench_function("render_cache_get_or_compute_hit", |b| {
        b.to_async(&runtime).iter(|| {
            let cache = cache.clone();
            async move {
                let page = cache
                    .get_or_compute("bench", 42, || async { Ok(page_image(42)) }, ttl)
                    .await
                    .expect("cached page");
                black_box(page)
            }
        })
    });
}

fn bench_concurrent_misses(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("render_cache_single_flight");
    group.measurement_time(Duration::from_secs(5));
    group.bench_function("64_callers_one_key", |b| {
        b.to_async(&runtime).iter(|| async {
            let cache = RenderCache::with_capacity(16);
            let mut handles = Vec::with_capacity(64);
            for _ in 0..64 {
                let cache = cache.clone();
                handles.push(tokio::spawn(async move {
                    cache
                        .get_or_compute(
                            "bench",
                            1,
                            || async {
                                tokio::task::yield_now().await;
                                Ok(page_image(1))
                            },
                            Duration::from_secs(60),
                        )
                        .await
                }));
            }
            for handle in handles {
                black_box(handle.await.expect("join").expect("page"));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_cache_hit, bench_concurrent_misses);
criterion_main!(benches);
