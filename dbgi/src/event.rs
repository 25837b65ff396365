//! Notifications published by the parse workers.

use crate::ring::{Record, RingReader, RingWriter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A worker claimed a key and started loading it.
    ParseStarted,
    /// A worker committed the result for a key, successful or not.
    ParseEnded,
    /// The file is not a container and no usable companion container was found.
    UnsupportedFormat,
}

impl EventKind {
    fn to_u64(self) -> u64 {
        match self {
            EventKind::ParseStarted => 1,
            EventKind::ParseEnded => 2,
            EventKind::UnsupportedFormat => 3,
        }
    }

    fn from_u64(x: u64) -> Option<Self> {
        match x {
            1 => Some(EventKind::ParseStarted),
            2 => Some(EventKind::ParseEnded),
            3 => Some(EventKind::UnsupportedFormat),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// The normalized path of the key the event is about.
    pub path: String,
}

impl Record for Event {
    const MIN_SIZE: u64 = 16;

    fn encoded_size(&self) -> u64 {
        8 + 8 + self.path.len() as u64
    }

    fn write(&self, w: &mut RingWriter) {
        w.write_u64(self.kind.to_u64());
        w.write_u64(self.path.len() as u64);
        w.write_bytes(self.path.as_bytes());
    }

    fn read(r: &mut RingReader) -> Self {
        let raw_kind = r.read_u64();
        let len = r.read_u64() as usize;
        let path = String::from_utf8_lossy(&r.read_bytes(len)).into_owned();
        // Only this module writes events.
        let kind = EventKind::from_u64(raw_kind).unwrap_or(EventKind::ParseEnded);
        Event { kind, path }
    }
}
