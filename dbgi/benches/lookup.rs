#[cfg(feature = "benchmarks")]
use criterion::{criterion_group, criterion_main};

#[cfg(feature = "benchmarks")]
mod lookup {
    use criterion::{BenchmarkId, Criterion};
    use dbgi::{DebugInfoCache, Options, SectionTag};
    use dbgi_core::ContainerBuilder;
    use std::time::{Duration, Instant};

    fn loaded_cache(files: usize) -> (tempfile::TempDir, DebugInfoCache, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = DebugInfoCache::new(Options::new());
        let container = ContainerBuilder::new()
            .section(SectionTag::UNITS, vec![0; 4096])
            .section(SectionTag::PROCEDURES, vec![1; 4096])
            .build();

        let paths: Vec<String> = (0..files)
            .map(|i| {
                let path = dir.path().join(format!("lib{}.rdi", i));
                std::fs::write(&path, &container).unwrap();
                path.to_str().unwrap().to_owned()
            })
            .collect();

        let scope = cache.scope();
        let deadline = Instant::now() + Duration::from_secs(30);
        for path in &paths {
            cache.open(path, 0);
            assert!(cache.get_parsed_info(&scope, path, 0, deadline).is_some());
        }
        drop(scope);
        (dir, cache, paths)
    }

    pub fn hit_benchmark(c: &mut Criterion) {
        let mut group = c.benchmark_group("lookup_hit");
        for files in [1, 64, 1024] {
            let (_dir, cache, paths) = loaded_cache(files);
            group.bench_with_input(BenchmarkId::from_parameter(files), &paths, |b, paths| {
                let mut i = 0;
                b.iter(|| {
                    let scope = cache.scope();
                    let info = cache
                        .get_parsed_info(&scope, &paths[i % paths.len()], 0, Instant::now())
                        .unwrap();
                    i += 1;
                    let len = info.section(SectionTag::PROCEDURES).map(|s| s.len());
                    len
                });
            });
        }
        group.finish();
    }

    pub fn miss_benchmark(c: &mut Criterion) {
        let (_dir, cache, _paths) = loaded_cache(64);
        c.bench_function("lookup_miss", |b| {
            b.iter(|| {
                let scope = cache.scope();
                let miss = cache
                    .get_parsed_info(&scope, "/not/open.rdi", 0, Instant::now())
                    .is_none();
                miss
            });
        });
    }
}

#[cfg(feature = "benchmarks")]
criterion_group!(benches, lookup::hit_benchmark, lookup::miss_benchmark);
#[cfg(feature = "benchmarks")]
criterion_main!(benches);

#[cfg(not(feature = "benchmarks"))]
fn main() {}
