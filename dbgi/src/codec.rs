//! The default decompressor for packed sections.

use dbgi_core::{Decompress, DecompressError};

/// Packed sections are zstd frames.
pub struct Zstd;

impl Decompress for Zstd {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), DecompressError> {
        let n = zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| DecompressError(e.to_string()))?;
        if n != dst.len() {
            return Err(DecompressError(format!(
                "expected {} bytes, got {}",
                dst.len(),
                n
            )));
        }
        Ok(())
    }
}
