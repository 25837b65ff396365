//! A bounded byte ring carrying serialized records between threads.
//!
//! Any number of producers and consumers may use the ring concurrently. Records are written as a
//! whole under the ring mutex, padded to 8 bytes, so the unconsumed region always consists of
//! complete records. Producers wait for space with a deadline, consumers wait for data
//! indefinitely until the ring is shut down.
//!
//! `write_pos` and `read_pos` are free-running `u64` byte counters. The number of unconsumed bytes
//! is always `write_pos.wrapping_sub(read_pos)`, which stays correct when the counters wrap past
//! `u64::MAX`. The ring size is a power of two so that `pos & (size - 1)` remains consistent
//! across that wrap.

use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// A value that can be carried through a [`Ring`].
pub trait Record: Sized {
    /// The encoded size of the smallest possible record.
    const MIN_SIZE: u64;

    /// The encoded size of this record, before padding.
    fn encoded_size(&self) -> u64;

    fn write(&self, w: &mut RingWriter);

    fn read(r: &mut RingReader) -> Self;
}

/// Writes bytes into the ring buffer, wrapping at its end.
pub struct RingWriter<'a> {
    buf: &'a mut [u8],
    pos: u64,
}

impl RingWriter<'_> {
    pub fn write_u64(&mut self, x: u64) {
        self.write_bytes(&x.to_le_bytes());
    }

    pub fn write_bytes(&mut self, mut bytes: &[u8]) {
        let mask = self.buf.len() as u64 - 1;
        while !bytes.is_empty() {
            let at = (self.pos & mask) as usize;
            let n = bytes.len().min(self.buf.len() - at);
            self.buf[at..at + n].copy_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
            self.pos = self.pos.wrapping_add(n as u64);
        }
    }
}

/// Reads bytes out of the ring buffer, wrapping at its end.
pub struct RingReader<'a> {
    buf: &'a [u8],
    pos: u64,
}

impl RingReader<'_> {
    pub fn read_u64(&mut self) -> u64 {
        let mut b = [0u8; 8];
        self.read_into(&mut b);
        u64::from_le_bytes(b)
    }

    pub fn read_bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_into(&mut out);
        out
    }

    fn read_into(&mut self, mut out: &mut [u8]) {
        let mask = self.buf.len() as u64 - 1;
        while !out.is_empty() {
            let at = (self.pos & mask) as usize;
            let n = out.len().min(self.buf.len() - at);
            out[..n].copy_from_slice(&self.buf[at..at + n]);
            out = &mut out[n..];
            self.pos = self.pos.wrapping_add(n as u64);
        }
    }
}

struct RingState {
    buf: Box<[u8]>,
    write_pos: u64,
    read_pos: u64,
    shutdown: bool,
}

impl RingState {
    fn unconsumed(&self) -> u64 {
        self.write_pos.wrapping_sub(self.read_pos)
    }

    fn available(&self) -> u64 {
        self.buf.len() as u64 - self.unconsumed()
    }
}

pub struct Ring<R> {
    state: Mutex<RingState>,
    /// Signalled when records are consumed.
    space_available: Condvar,
    /// Signalled when records are produced, and on shutdown.
    data_available: Condvar,
    _marker: std::marker::PhantomData<fn(R) -> R>,
}

impl<R: Record> Ring<R> {
    /// Create a ring of `size` bytes. `size` must be a power of two and at least 8.
    pub fn new(size: usize) -> Self {
        Self::with_start_position(size, 0)
    }

    /// Create a ring whose counters start at `start`. Must be a multiple of 8.
    pub(crate) fn with_start_position(size: usize, start: u64) -> Self {
        assert!(size.is_power_of_two() && size >= 8, "ring size must be a power of two");
        assert_eq!(start % 8, 0);
        Self {
            state: Mutex::new(RingState {
                buf: vec![0u8; size].into_boxed_slice(),
                write_pos: start,
                read_pos: start,
                shutdown: false,
            }),
            space_available: Condvar::new(),
            data_available: Condvar::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Push a record, waiting for space until `deadline`. `None` waits as long as it takes.
    ///
    /// Returns `false` if the record was not written: the deadline passed with the ring full, the
    /// record can never fit, or the ring is shut down.
    pub fn enqueue(&self, record: &R, deadline: Option<Instant>) -> bool {
        let required = pad8(record.encoded_size());
        let mut state = self.state.lock();
        if required > state.buf.len() as u64 {
            return false;
        }
        loop {
            if state.shutdown {
                return false;
            }
            if state.available() >= required {
                let write_pos = state.write_pos;
                let mut w = RingWriter {
                    buf: &mut state.buf,
                    pos: write_pos,
                };
                record.write(&mut w);
                debug_assert_eq!(w.pos.wrapping_sub(write_pos), record.encoded_size());
                state.write_pos = write_pos.wrapping_add(required);
                drop(state);
                self.data_available.notify_all();
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    let _ = self.space_available.wait_until(&mut state, deadline);
                }
                None => self.space_available.wait(&mut state),
            }
        }
    }

    /// Pop the next record, waiting for one to arrive.
    ///
    /// Returns `None` only once the ring is shut down and drained.
    pub fn dequeue(&self) -> Option<R> {
        let mut state = self.state.lock();
        loop {
            if let Some(record) = self.pop_locked(&mut state) {
                return Some(record);
            }
            if state.shutdown {
                return None;
            }
            self.data_available.wait(&mut state);
        }
    }

    /// Pop every queued record, waiting until `deadline` for the first one to arrive.
    pub fn drain_until(&self, deadline: Instant) -> Vec<R> {
        let mut out = Vec::new();
        let mut state = self.state.lock();
        loop {
            while let Some(record) = self.pop_locked(&mut state) {
                out.push(record);
            }
            if !out.is_empty() || state.shutdown || Instant::now() >= deadline {
                return out;
            }
            let _ = self.data_available.wait_until(&mut state, deadline);
        }
    }

    fn pop_locked(&self, state: &mut RingState) -> Option<R> {
        if state.unconsumed() < R::MIN_SIZE {
            return None;
        }
        let read_pos = state.read_pos;
        let mut r = RingReader {
            buf: &state.buf,
            pos: read_pos,
        };
        let record = R::read(&mut r);
        state.read_pos = read_pos.wrapping_add(pad8(record.encoded_size()));
        self.space_available.notify_all();
        Some(record)
    }

    /// Wake every waiter and refuse further records. Queued records can still be dequeued.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.space_available.notify_all();
        self.data_available.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// The number of bytes currently queued, padding included.
    #[cfg(test)]
    pub fn queued_bytes(&self) -> u64 {
        self.state.lock().unconsumed()
    }
}

fn pad8(x: u64) -> u64 {
    (x + 7) & !7
}

/// A request to load the debug info for a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestMessage {
    pub path: String,
    pub min_timestamp: u64,
}

impl Record for RequestMessage {
    const MIN_SIZE: u64 = 16;

    fn encoded_size(&self) -> u64 {
        8 + self.path.len() as u64 + 8
    }

    fn write(&self, w: &mut RingWriter) {
        w.write_u64(self.path.len() as u64);
        w.write_bytes(self.path.as_bytes());
        w.write_u64(self.min_timestamp);
    }

    fn read(r: &mut RingReader) -> Self {
        let len = r.read_u64() as usize;
        let path = String::from_utf8_lossy(&r.read_bytes(len)).into_owned();
        let min_timestamp = r.read_u64();
        RequestMessage {
            path,
            min_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    fn msg(path: &str, min_timestamp: u64) -> RequestMessage {
        RequestMessage {
            path: path.to_string(),
            min_timestamp,
        }
    }

    #[test]
    fn fifo() {
        let ring = Ring::new(256);
        assert!(ring.enqueue(&msg("/a.rdi", 1), None));
        assert!(ring.enqueue(&msg("/bb.rdi", 2), None));
        // 8 + 6 + 8 = 22 -> 24, 8 + 7 + 8 = 23 -> 24
        assert_eq!(ring.queued_bytes(), 48);
        assert_eq!(ring.dequeue(), Some(msg("/a.rdi", 1)));
        assert_eq!(ring.dequeue(), Some(msg("/bb.rdi", 2)));
        assert_eq!(ring.queued_bytes(), 0);
    }

    #[test]
    fn full_ring_drops_after_deadline() {
        let ring = Ring::new(64);
        let m = msg("/0123456789.rdi", 0); // 31 -> 32 bytes
        assert!(ring.enqueue(&m, Some(Instant::now())));
        assert!(ring.enqueue(&m, Some(Instant::now())));
        let start = Instant::now();
        assert!(!ring.enqueue(&m, Some(start + Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn oversized_record_is_refused() {
        let ring = Ring::new(32);
        assert!(!ring.enqueue(&msg(&"x".repeat(64), 0), None));
    }

    #[test]
    fn blocked_producer_resumes_when_space_frees() {
        let ring = Arc::new(Ring::new(64));
        let m = msg("/0123456789.rdi", 0);
        assert!(ring.enqueue(&m, None));
        assert!(ring.enqueue(&m, None));

        let producer = {
            let ring = ring.clone();
            let m = m.clone();
            thread::spawn(move || ring.enqueue(&m, Some(Instant::now() + Duration::from_secs(10))))
        };
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ring.dequeue(), Some(m.clone()));
        assert!(producer.join().unwrap());
        assert_eq!(ring.queued_bytes(), 64);
    }

    #[test]
    fn shutdown_wakes_consumers() {
        let ring: Arc<Ring<RequestMessage>> = Arc::new(Ring::new(64));
        let consumer = {
            let ring = ring.clone();
            thread::spawn(move || ring.dequeue())
        };
        thread::sleep(Duration::from_millis(10));
        ring.shutdown();
        assert_eq!(consumer.join().unwrap(), None);
        assert!(!ring.enqueue(&msg("/a", 0), None));
    }

    #[test]
    fn queued_records_survive_shutdown() {
        let ring = Ring::new(64);
        assert!(ring.enqueue(&msg("/a", 0), None));
        ring.shutdown();
        assert_eq!(ring.dequeue(), Some(msg("/a", 0)));
        assert_eq!(ring.dequeue(), None);
    }

    #[test]
    fn drain_until_times_out_empty() {
        let ring: Ring<RequestMessage> = Ring::new(64);
        let start = Instant::now();
        assert!(ring
            .drain_until(start + Duration::from_millis(10))
            .is_empty());
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn wraps_many_times_across_u64_boundary() {
        const SIZE: usize = 256;
        // Start a few records short of the wrap.
        let ring = Arc::new(Ring::with_start_position(SIZE, u64::MAX - 7 - 64 * 8));
        let total = 5000u64;

        let producers: Vec<_> = (0..2u64)
            .map(|p| {
                let ring = ring.clone();
                thread::spawn(move || {
                    for i in 0..total {
                        let path = format!("/p{}/{}", p, "x".repeat((i % 37) as usize));
                        assert!(ring.enqueue(&msg(&path, p * total + i), None));
                    }
                })
            })
            .collect();

        let mut next = [0u64; 2];
        for _ in 0..2 * total {
            let m = ring.dequeue().unwrap();
            let p = m.min_timestamp / total;
            let i = m.min_timestamp % total;
            // Per-producer order is preserved and contents are intact.
            assert_eq!(i, next[p as usize]);
            assert_eq!(m.path, format!("/p{}/{}", p, "x".repeat((i % 37) as usize)));
            next[p as usize] += 1;
        }
        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(ring.queued_bytes(), 0);
        let state = ring.state.lock();
        // The counters did wrap.
        assert!(state.write_pos < u64::MAX / 2);
    }
}
