use std::{sync::Arc, time::Duration};

use dbgi_core::Decompress;

/// Options when creating a [`crate::DebugInfoCache`].
#[derive(Clone)]
pub struct Options {
    /// The number of hash slots keys are distributed over.
    pub(crate) slots: usize,
    /// The number of independently locked stripes the slots are grouped into. Clamped to
    /// `slots`.
    pub(crate) stripes: usize,
    /// The size of the request ring in bytes.
    pub(crate) request_ring_size: usize,
    /// The size of the event ring in bytes.
    pub(crate) event_ring_size: usize,
    /// The number of parse workers.
    pub(crate) parse_workers: usize,
    /// The minimum time between two parse requests issued by lookups for the same key.
    pub(crate) retry_interval: Duration,
    pub(crate) case_sensitive_paths: bool,
    /// Enable or disable metrics collection.
    pub(crate) metrics: bool,
    pub(crate) decompressor: Arc<dyn Decompress>,
}

impl Options {
    /// Create a new `Options` instance with the default values.
    pub fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let slots = 1024;

        Self {
            slots,
            stripes: cores.min(slots),
            request_ring_size: 64 * 1024,
            event_ring_size: 64 * 1024,
            parse_workers: (cores / 2).max(2),
            retry_interval: Duration::from_secs(1),
            case_sensitive_paths: crate::path::host_is_case_sensitive(),
            metrics: false,
            decompressor: Arc::new(crate::codec::Zstd),
        }
    }

    /// Set the number of hash slots.
    ///
    /// May not be zero.
    ///
    /// Default: 1024.
    pub fn slots(&mut self, slots: usize) {
        assert!(slots > 0);
        self.slots = slots;
    }

    /// Set the number of stripes, i.e. independent locks, the slots are grouped into.
    ///
    /// May not be zero. Values above the number of slots are rounded down to it.
    ///
    /// Default: the number of logical cores.
    pub fn stripes(&mut self, stripes: usize) {
        assert!(stripes > 0);
        self.stripes = stripes;
    }

    /// Set the size of the ring carrying parse requests to the workers, in bytes.
    ///
    /// Must be a power of two. Requests that do not fit are dropped and retried later by
    /// lookups.
    ///
    /// Default: 64KiB.
    pub fn request_ring_size(&mut self, size: usize) {
        assert!(size.is_power_of_two() && size >= 8);
        self.request_ring_size = size;
    }

    /// Set the size of the ring carrying events from the workers, in bytes.
    ///
    /// Must be a power of two. Events published while the ring is full are lost.
    ///
    /// Default: 64KiB.
    pub fn event_ring_size(&mut self, size: usize) {
        assert!(size.is_power_of_two() && size >= 8);
        self.event_ring_size = size;
    }

    /// Set the number of parse workers.
    ///
    /// Must be more than 0.
    ///
    /// Default: half the logical cores, at least 2.
    pub fn parse_workers(&mut self, parse_workers: usize) {
        assert!(parse_workers > 0);
        self.parse_workers = parse_workers;
    }

    /// Set the minimum delay before a lookup re-requests a parse that has not completed.
    ///
    /// Default: 1s.
    pub fn retry_interval(&mut self, retry_interval: Duration) {
        self.retry_interval = retry_interval;
    }

    /// Set whether two paths differing only in case name different files.
    ///
    /// Default: `false` on Windows and macOS, `true` elsewhere.
    pub fn case_sensitive_paths(&mut self, case_sensitive_paths: bool) {
        self.case_sensitive_paths = case_sensitive_paths;
    }

    /// Set metrics collection on or off.
    ///
    /// Default: off.
    pub fn metrics(&mut self, metrics: bool) {
        self.metrics = metrics;
    }

    /// Set the decompressor used for packed sections.
    ///
    /// Default: zstd.
    pub fn decompressor(&mut self, decompressor: Arc<dyn Decompress>) {
        self.decompressor = decompressor;
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
