//! Building the unpacked image of a container with packed sections.

use crate::{
    format::{align8, DataSection, Header, SectionEncoding},
    parse::ParsedLayout,
};

/// Decompresses the data of one packed section.
///
/// Implementations must fill `dst` entirely; `dst.len()` is the section's `unpacked_size`.
pub trait Decompress: Send + Sync {
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), DecompressError>;
}

impl<F> Decompress for F
where
    F: Fn(&[u8], &mut [u8]) -> Result<(), DecompressError> + Send + Sync,
{
    fn decompress(&self, src: &[u8], dst: &mut [u8]) -> Result<(), DecompressError> {
        self(src, dst)
    }
}

/// A section could not be decompressed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("decompression failed: {0}")]
pub struct DecompressError(pub String);

/// The reason [`unpack`] failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UnpackError {
    /// No section in the layout is packed, there is nothing to do.
    #[error("container has no packed sections")]
    NothingToUnpack,
    /// The unpacked image does not fit in memory.
    #[error("unpacked image of {0} bytes is too large")]
    TooLarge(u64),
    /// A section uses an encoding this crate does not know.
    #[error("section {index} has unknown encoding {encoding}")]
    UnknownEncoding { index: usize, encoding: u32 },
    /// The decompressor failed on a section.
    #[error("section {index}: {source}")]
    Decompress {
        index: usize,
        #[source]
        source: DecompressError,
    },
}

/// Build the unpacked image of the container in `data`, previously parsed into `layout`.
///
/// The header is copied as-is. The section table is copied to the same offset with every record
/// rewritten to [`SectionEncoding::Unpacked`], laid out back to back after the table at 8-byte
/// aligned offsets. Packed sections are decompressed into place; unpacked ones are copied.
///
/// The returned image parses with [`crate::parse`] into a layout with no packed sections.
pub fn unpack(
    data: &[u8],
    layout: &ParsedLayout,
    decompress: &dyn Decompress,
) -> Result<Vec<u8>, UnpackError> {
    let total = layout.unpacked_size().ok_or(UnpackError::NothingToUnpack)?;
    let total_usize = usize::try_from(total).map_err(|_| UnpackError::TooLarge(total))?;

    let mut image = Vec::new();
    image
        .try_reserve_exact(total_usize)
        .map_err(|_| UnpackError::TooLarge(total))?;
    image.resize(total_usize, 0);

    image[..Header::SIZE].copy_from_slice(&data[..Header::SIZE]);

    let table_off = layout.header.data_section_off as usize;
    let mut off = layout.unpacked_table_end();
    for (index, src) in layout.sections.iter().enumerate() {
        let dst = DataSection {
            tag: src.tag,
            encoding: SectionEncoding::Unpacked,
            off,
            encoded_size: src.unpacked_size,
            unpacked_size: src.unpacked_size,
        };
        let record = table_off + index * DataSection::SIZE;
        dst.encode_to(&mut image[record..record + DataSection::SIZE]);

        // `parse` has checked the encoded range against `data`.
        let src_bytes = &data[src.off as usize..(src.off + src.encoded_size) as usize];
        let dst_bytes = &mut image[off as usize..(off + src.unpacked_size) as usize];
        match src.encoding {
            SectionEncoding::Unpacked => dst_bytes.copy_from_slice(src_bytes),
            SectionEncoding::Packed => decompress
                .decompress(src_bytes, dst_bytes)
                .map_err(|source| UnpackError::Decompress { index, source })?,
            SectionEncoding::Unknown(encoding) => {
                return Err(UnpackError::UnknownEncoding { index, encoding })
            }
        }

        off = align8(off + src.unpacked_size);
    }

    Ok(image)
}
