//! A concurrent cache of parsed debug info.
//!
//! Files are identified by a key made of their path and a minimum timestamp. Callers `open` a
//! key, which schedules it for loading on a pool of background workers, query it with
//! `get_parsed_info` from any number of threads, and `close` it when done. Queries never block
//! past a caller-supplied deadline: while a file is still loading they return `None`.
//!
//! Data returned by a query is borrowed through a [`Scope`]. A key closed while a scope still
//! holds data from it is torn down only once the scope is closed.
//!
//! ```no_run
//! use std::time::{Duration, Instant};
//!
//! let cache = dbgi::DebugInfoCache::new(dbgi::Options::new());
//! cache.open("/usr/lib/debug/app.rdi", 0);
//!
//! let scope = cache.scope();
//! let deadline = Instant::now() + Duration::from_millis(100);
//! if let Some(info) = cache.get_parsed_info(&scope, "/usr/lib/debug/app.rdi", 0, deadline) {
//!     println!("{} sections", info.sections().len());
//! }
//! scope.close();
//!
//! cache.close("/usr/lib/debug/app.rdi", 0).unwrap();
//! ```

use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};

use crossbeam::utils::Backoff;
use dbgi_core::Decompress;
use threadpool::ThreadPool;

use map::{ShardedMap, NEVER};
use ring::{RequestMessage, Ring};
use scope::TouchListPool;

pub use codec::Zstd;
pub use dbgi_core::{DataSection, FileFormat, ParseStatus, ParsedLayout, SectionTag};
pub use error::Error;
pub use event::{Event, EventKind};
pub use metrics::{Metric, Metrics};
pub use options::Options;
pub use scope::{ParsedInfoView, Scope};

mod codec;
mod error;
mod event;
mod loaded;
mod map;
mod metrics;
mod options;
mod path;
mod ring;
mod scope;
mod string_arena;
mod sys;
mod worker;

struct Shared {
    map: ShardedMap,
    requests: Ring<RequestMessage>,
    events: Ring<Event>,
    metrics: Metrics,
    decompressor: Arc<dyn Decompress>,
}

/// The debug info cache. See the [crate docs](crate) for an overview.
pub struct DebugInfoCache {
    shared: Arc<Shared>,
    parse_tp: ThreadPool,
    touch_lists: TouchListPool,
    case_sensitive_paths: bool,
    retry_interval: Duration,
    /// The origin of the microsecond timestamps kept in the nodes.
    start: Instant,
}

impl DebugInfoCache {
    /// Create a cache and start its parse workers.
    pub fn new(o: Options) -> Self {
        let shared = Arc::new(Shared {
            map: ShardedMap::new(o.slots, o.stripes),
            requests: Ring::new(o.request_ring_size),
            events: Ring::new(o.event_ring_size),
            metrics: Metrics::new(o.metrics),
            decompressor: o.decompressor.clone(),
        });

        let parse_tp = ThreadPool::with_name("dbgi-parse".into(), o.parse_workers);
        for _ in 0..o.parse_workers {
            let shared = shared.clone();
            parse_tp.execute(move || worker::run(shared));
        }

        tracing::debug!(
            slots = o.slots,
            stripes = shared.map.stripes().len(),
            parse_workers = o.parse_workers,
            "debug info cache started"
        );

        DebugInfoCache {
            shared,
            parse_tp,
            touch_lists: TouchListPool::default(),
            case_sensitive_paths: o.case_sensitive_paths,
            retry_interval: o.retry_interval,
            start: Instant::now(),
        }
    }

    /// Open a key, scheduling it for loading if it is not resident.
    ///
    /// If a node for `path` with a timestamp of at least `min_timestamp` is resident, the closest
    /// such node is referenced instead of creating a new one. Never waits for the load.
    pub fn open(&self, path: &str, min_timestamp: u64) {
        let path = self.normalize(path);
        if path.is_empty() {
            return;
        }
        tracing::info!(%path, min_timestamp, "opening debug info");

        let (stripe, slot) = self.shared.map.locate(&path);
        let mut state = stripe.state.write();
        let index = match state.find_closest(slot, &path, min_timestamp) {
            Some(index) => index,
            None => state.insert_new(slot, &path, min_timestamp),
        };
        let node = state.node_mut(index);
        node.ref_count += 1;
        if node.ref_count == 1 {
            let request = RequestMessage {
                path,
                min_timestamp: node.min_timestamp,
            };
            if self.request(&request, Instant::now()) {
                node.counters
                    .last_time_requested
                    .store(self.now_us(), Ordering::Relaxed);
            }
        }
    }

    /// Drop a reference to a key. The last reference unlinks the node, then waits for all touches
    /// on it to be released before freeing its data.
    ///
    /// The key is resolved the way [`Self::open`] resolved it: the node with exactly this key or,
    /// failing that, the closest fresher one. Returns [`Error::NotOpen`] if there is none.
    pub fn close(&self, path: &str, min_timestamp: u64) -> Result<(), Error> {
        let path = self.normalize(path);
        tracing::info!(%path, min_timestamp, "closing debug info");

        let (stripe, slot) = self.shared.map.locate(&path);
        let (counters, released) = {
            let mut state = stripe.state.write();
            let found = state
                .find_exact(slot, &path, min_timestamp)
                .or_else(|| state.find_closest(slot, &path, min_timestamp));
            let Some(index) = found else {
                tracing::warn!(%path, min_timestamp, "closing debug info that is not open");
                return Err(Error::NotOpen {
                    path,
                    min_timestamp,
                });
            };

            let node = state.node_mut(index);
            node.ref_count -= 1;
            if node.ref_count > 0 {
                return Ok(());
            }

            // Once unlinked the node can take no new touches, so the count only goes down. The
            // wait happens outside the lock: scopes holding touches may look up other keys of
            // this stripe before they close.
            let counters = node.counters.clone();
            (counters, state.remove(slot, index))
        };

        let backoff = Backoff::new();
        while counters.touch_count.load(Ordering::Acquire) != 0 {
            backoff.snooze();
        }
        drop(released);
        Ok(())
    }

    /// Look up the debug info for a key.
    ///
    /// Matches the resident node for `path` with the smallest timestamp not below
    /// `min_timestamp`. If that node is loaded, a touch is registered in `scope` and a view on
    /// its data is returned. A view on a file that failed to load is nil, see
    /// [`ParsedInfoView::error`]; such files are not retried.
    ///
    /// Otherwise this waits for the load until `deadline`, re-requesting it at most once per
    /// retry interval, and returns `None` if it does not complete in time. Keys that were never
    /// opened return `None` straight away.
    pub fn get_parsed_info<'s>(
        &self,
        scope: &'s Scope<'_>,
        path: &str,
        min_timestamp: u64,
        deadline: Instant,
    ) -> Option<ParsedInfoView<'s>> {
        let path = self.normalize(path);
        if path.is_empty() {
            return None;
        }
        let (stripe, slot) = self.shared.map.locate(&path);

        loop {
            let (retry, epoch) = {
                let state = stripe.state.read();
                let index = match state.find_closest(slot, &path, min_timestamp) {
                    Some(index) => index,
                    None => break,
                };
                let node = state.node(index);

                if let Some(loaded) = &node.loaded {
                    node.counters.touch_count.fetch_add(1, Ordering::Acquire);
                    scope.touch(node.counters.clone());
                    self.shared.metrics.count(Metric::CacheHits);
                    return Some(ParsedInfoView::new(loaded.clone()));
                }

                let now = self.now_us();
                let last = node.counters.last_time_requested.load(Ordering::Relaxed);
                let due = last == NEVER
                    || now >= last.saturating_add(self.retry_interval.as_micros() as u64);
                let retry = (due && !node.counters.is_working.load(Ordering::Acquire))
                    .then(|| (node.min_timestamp, node.counters.clone()));
                (retry, stripe.epoch())
            };

            if let Some((node_timestamp, counters)) = retry {
                let request = RequestMessage {
                    path: path.clone(),
                    min_timestamp: node_timestamp,
                };
                if self.request(&request, deadline) {
                    self.shared.metrics.count(Metric::ParseRetries);
                    counters
                        .last_time_requested
                        .store(self.now_us(), Ordering::Relaxed);
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            stripe.wait(epoch, deadline);
        }

        self.shared.metrics.count(Metric::CacheMisses);
        None
    }

    /// Begin a scope for lookups on the current thread.
    pub fn scope(&self) -> Scope<'_> {
        Scope::new(&self.touch_lists)
    }

    /// Take every queued event, waiting until `deadline` for at least one.
    pub fn pop_events(&self, deadline: Instant) -> Vec<Event> {
        self.shared.events.drain_until(deadline)
    }

    /// The number of open references on exactly this key, if it is resident.
    pub fn ref_count(&self, path: &str, min_timestamp: u64) -> Option<u64> {
        let path = self.normalize(path);
        let (stripe, slot) = self.shared.map.locate(&path);
        let state = stripe.state.read();
        state
            .find_exact(slot, &path, min_timestamp)
            .map(|index| state.node(index).ref_count)
    }

    /// The number of resident nodes.
    pub fn resident_count(&self) -> usize {
        self.shared
            .map
            .stripes()
            .iter()
            .map(|stripe| stripe.state.read().len())
            .sum()
    }

    /// The collected metrics. Counters read zero unless enabled in [`Options`].
    pub fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    fn normalize(&self, path: &str) -> String {
        path::normalize(path, self.case_sensitive_paths)
    }

    fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn request(&self, request: &RequestMessage, deadline: Instant) -> bool {
        let sent = self.shared.requests.enqueue(request, Some(deadline));
        if sent {
            self.shared.metrics.count(Metric::ParseRequestsEnqueued);
            tracing::trace!(path = %request.path, min_timestamp = request.min_timestamp, "parse requested");
        } else {
            self.shared.metrics.count(Metric::ParseRequestsDropped);
            tracing::debug!(path = %request.path, "request ring full, dropping parse request");
        }
        sent
    }
}

impl Drop for DebugInfoCache {
    fn drop(&mut self) {
        self.shared.requests.shutdown();
        self.shared.events.shutdown();
        self.parse_tp.join();

        let mut released = 0;
        for stripe in self.shared.map.stripes() {
            released += stripe.state.write().clear().len();
        }
        tracing::debug!(released, "debug info cache shut down");
    }
}
