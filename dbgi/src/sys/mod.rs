//! Platform-specific code.
//!
//! Read-only file mappings use `mmap` on Unix. Elsewhere the file is read into memory.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::Mapping;
    } else {
        mod fallback;
        pub use fallback::Mapping;
    }
}
