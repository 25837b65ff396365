#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use dbgi::{DebugInfoCache, Options};

const FILES: usize = 4;

fuzz_target!(|run: Run| {
    let dir = tempfile::tempdir().unwrap();
    let paths: Vec<String> = run
        .files
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            let path = dir.path().join(format!("f{}.rdi", i));
            std::fs::write(&path, bytes).unwrap();
            path.to_str().unwrap().to_owned()
        })
        .collect();

    let mut o = Options::new();
    o.parse_workers(2);
    o.request_ring_size(256);
    o.retry_interval(Duration::ZERO);
    let cache = DebugInfoCache::new(o);

    // Open references per file, across all timestamps.
    let mut open = [0u32; FILES];
    for call in run.calls {
        match call {
            Call::Open { file, ts } => {
                let file = file as usize % FILES;
                cache.open(&paths[file], ts as u64 % 4);
                open[file] += 1;
            }
            Call::Close { file, ts } => {
                let file = file as usize % FILES;
                match cache.close(&paths[file], ts as u64 % 4) {
                    Ok(()) => open[file] -= 1,
                    Err(_) => {}
                }
            }
            Call::Get { file, ts, wait_ms } => {
                let file = file as usize % FILES;
                let deadline = Instant::now() + Duration::from_millis(wait_ms as u64 % 20);
                // Closed before the next call, which may tear the node down.
                let scope = cache.scope();
                if let Some(info) =
                    cache.get_parsed_info(&scope, &paths[file], ts as u64 % 4, deadline)
                {
                    assert!(open[file] > 0);
                    for i in 0..info.sections().len() {
                        assert!(info.section_data(i).is_some());
                    }
                }
            }
        }
    }

    let total: u32 = open.iter().sum();
    assert_eq!(total == 0, cache.resident_count() == 0);
});

#[derive(Debug, Arbitrary)]
struct Run {
    files: [Vec<u8>; FILES],
    calls: Vec<Call>,
}

#[derive(Debug, Arbitrary)]
enum Call {
    Open { file: u8, ts: u8 },
    Close { file: u8, ts: u8 },
    Get { file: u8, ts: u8, wait_ms: u8 },
}
