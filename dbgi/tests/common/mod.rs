use dbgi::{DebugInfoCache, Options, SectionTag, Zstd};
use dbgi_core::{ContainerBuilder, Decompress, DecompressError};
use parking_lot::{Condvar, Mutex};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};
use tempfile::TempDir;

/// Install a log subscriber filtered by `DBGI_LOG`, e.g. `DBGI_LOG=dbgi=debug`.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_env("DBGI_LOG").unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_names(true)
        .try_init();
}

pub fn deadline(ms: u64) -> Instant {
    Instant::now() + Duration::from_millis(ms)
}

/// A container with one unpacked section of `len` bytes.
pub fn container(tag: SectionTag, len: usize) -> Vec<u8> {
    ContainerBuilder::new()
        .section(tag, (0..len).map(|i| i as u8).collect())
        .build()
}

#[allow(dead_code)]
pub fn zstd_packed_container(tag: SectionTag, data: Vec<u8>) -> Vec<u8> {
    ContainerBuilder::new()
        .section(SectionTag::TOP_LEVEL_INFO, vec![7; 12])
        .packed_section(tag, data, |d| zstd::bulk::compress(d, 3).unwrap())
        .build()
}

pub struct Test {
    // Declared first so the cache is dropped, and its files unmapped, before the directory goes.
    pub cache: DebugInfoCache,
    dir: TempDir,
}

#[allow(dead_code)]
impl Test {
    pub fn new() -> Self {
        Self::new_with_options(|_| {})
    }

    pub fn new_with_options(configure: impl FnOnce(&mut Options)) -> Self {
        init_logging();
        let mut o = Options::new();
        o.metrics(true);
        o.parse_workers(2);
        configure(&mut o);
        Test {
            cache: DebugInfoCache::new(o),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `bytes` to `name` in the test directory and return the full path as a string.
    pub fn write(&self, name: &str, bytes: &[u8]) -> String {
        let path = self.path(name);
        std::fs::write(&path, bytes).unwrap();
        path.to_str().unwrap().to_owned()
    }

    pub fn set_modified(&self, name: &str, time: SystemTime) {
        set_modified(&self.path(name), time);
    }
}

pub fn set_modified(path: &Path, time: SystemTime) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(time).unwrap();
}

/// A zstd decompressor that holds every call until it is opened. Used to keep a parse worker busy.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
    entered: AtomicUsize,
}

#[allow(dead_code)]
impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Gate::default())
    }

    /// Wait until `n` calls are held at the gate, or have passed it.
    pub fn wait_entered(&self, n: usize) {
        let give_up = deadline(5000);
        while self.entered.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < give_up, "no parse reached the gate");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.cond.notify_all();
    }

    /// Opens the gate when dropped, so a failing test does not leave the workers stuck.
    pub fn open_on_drop(self: &Arc<Self>) -> OpenOnDrop {
        OpenOnDrop(self.clone())
    }
}

impl Decompress for Gate {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), DecompressError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.cond.wait(&mut open);
        }
        drop(open);
        Zstd.decompress(src, dst)
    }
}

pub struct OpenOnDrop(Arc<Gate>);

impl Drop for OpenOnDrop {
    fn drop(&mut self) {
        self.0.open();
    }
}
