use dbgi_core::{FileFormat, ParseStatus, UnpackError};

/// Errors reported by the cache.
///
/// Apart from [`Error::NotOpen`], which is returned by [`crate::DebugInfoCache::close`], these
/// describe why a file yielded no usable debug info. They are terminal: the key is not parsed
/// again until it is closed and reopened.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `close` was called for a key that has no resident node.
    #[error("debug info {path} [{min_timestamp:#x}] is not open")]
    NotOpen { path: String, min_timestamp: u64 },
    #[error("malformed debug info: {0}")]
    Malformed(#[from] ParseStatus),
    #[error("unsupported debug info format: {0:?}")]
    UnsupportedFormat(FileFormat),
    #[error("failed to unpack debug info: {0}")]
    Unpack(#[from] UnpackError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
