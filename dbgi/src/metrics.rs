use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Metrics collector, if active, it provides Counters and Timers
#[derive(Clone)]
pub struct Metrics {
    metrics: Option<Arc<ActiveMetrics>>,
}

/// Metrics that can be collected during execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Counter of parse requests written to the request ring
    ParseRequestsEnqueued,
    /// Counter of parse requests that did not fit in the request ring before their deadline
    ParseRequestsDropped,
    /// Counter of parse requests re-issued by lookups for a key still pending
    ParseRetries,
    /// Counter of loads actually performed by the workers
    ParsesRun,
    /// Counter of load results discarded because their node was closed in the meantime
    StaleParseResults,
    /// Counter of lookups that returned a result
    CacheHits,
    /// Counter of lookups that returned nothing
    CacheMisses,
    /// Timer used to record average load time, from mapping to commit
    ParseTime,
}

struct ActiveMetrics {
    parse_requests_enqueued: AtomicU64,
    parse_requests_dropped: AtomicU64,
    parse_retries: AtomicU64,
    parses_run: AtomicU64,
    stale_parse_results: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    parse_time: Timer,
}

impl ActiveMetrics {
    fn counter(&self, metric: Metric) -> &AtomicU64 {
        match metric {
            Metric::ParseRequestsEnqueued => &self.parse_requests_enqueued,
            Metric::ParseRequestsDropped => &self.parse_requests_dropped,
            Metric::ParseRetries => &self.parse_retries,
            Metric::ParsesRun => &self.parses_run,
            Metric::StaleParseResults => &self.stale_parse_results,
            Metric::CacheHits => &self.cache_hits,
            Metric::CacheMisses => &self.cache_misses,
            Metric::ParseTime => panic!("Specified metric is not a Counter"),
        }
    }
}

impl Metrics {
    /// Returns the Metrics object, active or not based on the specified input
    pub fn new(active: bool) -> Self {
        Self {
            metrics: if active {
                Some(Arc::new(ActiveMetrics {
                    parse_requests_enqueued: AtomicU64::new(0),
                    parse_requests_dropped: AtomicU64::new(0),
                    parse_retries: AtomicU64::new(0),
                    parses_run: AtomicU64::new(0),
                    stale_parse_results: AtomicU64::new(0),
                    cache_hits: AtomicU64::new(0),
                    cache_misses: AtomicU64::new(0),
                    parse_time: Timer::new(),
                }))
            } else {
                None
            },
        }
    }

    /// Increase the Counter specified by the input
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn count(&self, metric: Metric) {
        if let Some(ref metrics) = self.metrics {
            metrics.counter(metric).fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read the Counter specified by the input. Always 0 when collection is off.
    ///
    /// panics if the specified [`Metric`] is not a Counter
    pub fn get(&self, metric: Metric) -> u64 {
        self.metrics
            .as_ref()
            .map_or(0, |metrics| metrics.counter(metric).load(Ordering::Relaxed))
    }

    /// Returns a guard that, when dropped, will record the time passed since creation
    ///
    /// panics if the specified [`Metric`] is not a Timer
    pub fn record<'a>(&'a self, metric: Metric) -> Option<impl Drop + 'a> {
        self.metrics.as_ref().map(|metrics| {
            let timer = match metric {
                Metric::ParseTime => &metrics.parse_time,
                _ => panic!("Specified metric is not a Timer"),
            };
            timer.record()
        })
    }

    /// Print collected metrics to stdout
    pub fn print(&self) {
        if let Some(ref metrics) = self.metrics {
            println!("metrics");

            let enqueued = metrics.parse_requests_enqueued.load(Ordering::Relaxed);
            println!("  parse requests        {}", enqueued);

            let dropped = metrics.parse_requests_dropped.load(Ordering::Relaxed);
            println!("  dropped requests      {}", dropped);

            let retries = metrics.parse_retries.load(Ordering::Relaxed);
            println!("  retried requests      {}", retries);

            let parses = metrics.parses_run.load(Ordering::Relaxed);
            println!("  parses run            {}", parses);

            let stale = metrics.stale_parse_results.load(Ordering::Relaxed);
            println!("  stale results         {}", stale);

            let hits = metrics.cache_hits.load(Ordering::Relaxed);
            let misses = metrics.cache_misses.load(Ordering::Relaxed);
            let lookups = hits + misses;
            println!("  lookups               {}", lookups);
            if lookups != 0 {
                let percentage_misses = (misses as f64 / lookups as f64) * 100.0;
                println!(
                    "  lookup misses         {} - {:.2}% of lookups",
                    misses, percentage_misses
                );
            }

            if let Some(mean) = metrics.parse_time.mean() {
                println!("  parse mean            {}", pretty_display_ns(mean));
            }
        } else {
            println!("Metrics collection was not activated")
        }
    }
}

fn pretty_display_ns(ns: u64) -> String {
    // preserve 3 sig figs at minimum.
    let (val, unit) = if ns > 100 * 1_000_000_000 {
        (ns / 1_000_000_000, "s")
    } else if ns > 100 * 1_000_000 {
        (ns / 1_000_000, "ms")
    } else if ns > 100 * 1_000 {
        (ns / 1_000, "us")
    } else {
        (ns, "ns")
    };

    format!("{val} {unit}")
}

struct Timer {
    number_of_records: AtomicU64,
    sum: AtomicU64,
}

impl Timer {
    fn new() -> Self {
        Timer {
            number_of_records: AtomicU64::new(0),
            sum: AtomicU64::new(0),
        }
    }

    fn mean(&self) -> Option<u64> {
        let n = self.number_of_records.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        sum.checked_div(n)
    }

    fn record<'a>(&'a self) -> impl Drop + 'a {
        struct TimerGuard<'a> {
            start: std::time::Instant,
            n: &'a AtomicU64,
            sum: &'a AtomicU64,
        }

        impl Drop for TimerGuard<'_> {
            fn drop(&mut self) {
                let elapsed = self.start.elapsed().as_nanos() as u64;
                self.n.fetch_add(1, Ordering::Relaxed);
                self.sum.fetch_add(elapsed, Ordering::Relaxed);
            }
        }

        TimerGuard {
            start: std::time::Instant::now(),
            n: &self.number_of_records,
            sum: &self.sum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_metrics_read_zero() {
        let metrics = Metrics::new(false);
        metrics.count(Metric::CacheHits);
        assert_eq!(metrics.get(Metric::CacheHits), 0);
        assert!(metrics.record(Metric::ParseTime).is_none());
    }

    #[test]
    fn counters_and_timer() {
        let metrics = Metrics::new(true);
        metrics.count(Metric::CacheHits);
        metrics.count(Metric::CacheHits);
        metrics.count(Metric::CacheMisses);
        assert_eq!(metrics.get(Metric::CacheHits), 2);
        assert_eq!(metrics.get(Metric::CacheMisses), 1);
        drop(metrics.record(Metric::ParseTime));
        assert!(metrics.metrics.as_ref().unwrap().parse_time.mean().is_some());
    }
}
