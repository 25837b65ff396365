//! Per-stripe storage for node key strings.
//!
//! Strings are bump-allocated out of one growing buffer in power-of-two sized chunks. Released
//! chunks go onto a free list bucketed by chunk size and are handed out again before the buffer
//! grows. Handles are offsets rather than pointers, so growing the buffer does not invalidate
//! them.

const BUCKETS: usize = 8;
const MIN_CHUNK: usize = 16;
/// Chunks up to this size get an exact-size bucket. Bigger ones share the last bucket.
const MAX_BUCKETED_CHUNK: usize = 1024;

/// A string stored in a [`StringArena`].
///
/// Only valid for the arena it was allocated from, until it is released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaStr {
    off: usize,
    len: usize,
    cap: usize,
}

impl ArenaStr {
    pub const EMPTY: ArenaStr = ArenaStr {
        off: 0,
        len: 0,
        cap: 0,
    };
}

#[derive(Clone, Copy)]
struct FreeChunk {
    off: usize,
    cap: usize,
}

pub struct StringArena {
    buf: Vec<u8>,
    free: [Vec<FreeChunk>; BUCKETS],
}

impl StringArena {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            free: Default::default(),
        }
    }

    /// Copy `s` into the arena.
    pub fn alloc(&mut self, s: &[u8]) -> ArenaStr {
        if s.is_empty() {
            return ArenaStr::EMPTY;
        }

        let cap = chunk_capacity(s.len());
        let bucket = bucket_index(cap);
        let reused = if bucket == BUCKETS - 1 {
            // The oversize bucket holds chunks of mixed sizes. First fit.
            let list = &mut self.free[bucket];
            list.iter()
                .position(|c| c.cap >= s.len())
                .map(|i| list.swap_remove(i))
        } else {
            self.free[bucket].pop()
        };

        let chunk = match reused {
            Some(chunk) => chunk,
            None => {
                let off = self.buf.len();
                self.buf.resize(off + cap, 0);
                FreeChunk { off, cap }
            }
        };

        self.buf[chunk.off..chunk.off + s.len()].copy_from_slice(s);
        ArenaStr {
            off: chunk.off,
            len: s.len(),
            cap: chunk.cap,
        }
    }

    /// Return the chunk backing `s` to the free lists.
    pub fn release(&mut self, s: ArenaStr) {
        if s.cap == 0 {
            return;
        }
        self.free[bucket_index(s.cap)].push(FreeChunk {
            off: s.off,
            cap: s.cap,
        });
    }

    pub fn get(&self, s: ArenaStr) -> &[u8] {
        &self.buf[s.off..s.off + s.len]
    }

    /// The number of bytes ever bump-allocated.
    #[cfg(test)]
    pub fn footprint(&self) -> usize {
        self.buf.len()
    }
}

fn chunk_capacity(len: usize) -> usize {
    len.next_power_of_two().max(MIN_CHUNK)
}

fn bucket_index(cap: usize) -> usize {
    if cap > MAX_BUCKETED_CHUNK {
        BUCKETS - 1
    } else {
        (cap.trailing_zeros() - MIN_CHUNK.trailing_zeros()) as usize
    }
}
