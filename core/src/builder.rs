//! Assembling containers.

use crate::format::{
    align8, DataSection, Header, SectionEncoding, SectionTag, ENCODING_VERSION, MAGIC,
};

struct PendingSection {
    tag: SectionTag,
    encoding: SectionEncoding,
    bytes: Vec<u8>,
    unpacked_size: u64,
}

/// Writes a well-formed container.
///
/// The section table is placed right after the header and section data follows the table, each
/// section starting at an 8-byte aligned offset.
#[derive(Default)]
pub struct ContainerBuilder {
    sections: Vec<PendingSection>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a section stored as-is.
    pub fn section(mut self, tag: SectionTag, data: Vec<u8>) -> Self {
        self.sections.push(PendingSection {
            tag,
            encoding: SectionEncoding::Unpacked,
            unpacked_size: data.len() as u64,
            bytes: data,
        });
        self
    }

    /// Append a section stored packed with `compress`.
    ///
    /// Readers will need a decompressor that inverts `compress`.
    pub fn packed_section(
        mut self,
        tag: SectionTag,
        data: Vec<u8>,
        compress: impl FnOnce(&[u8]) -> Vec<u8>,
    ) -> Self {
        let bytes = compress(&data);
        self.sections.push(PendingSection {
            tag,
            encoding: SectionEncoding::Packed,
            unpacked_size: data.len() as u64,
            bytes,
        });
        self
    }

    /// Produce the bytes of the container.
    pub fn build(self) -> Vec<u8> {
        let table_off = Header::SIZE as u64;
        let table_end = table_off + (self.sections.len() * DataSection::SIZE) as u64;

        let mut records = Vec::with_capacity(self.sections.len());
        let mut off = align8(table_end);
        for s in &self.sections {
            records.push(DataSection {
                tag: s.tag,
                encoding: s.encoding,
                off,
                encoded_size: s.bytes.len() as u64,
                unpacked_size: s.unpacked_size,
            });
            off = align8(off + s.bytes.len() as u64);
        }

        let mut out = vec![0u8; off as usize];
        Header {
            magic: MAGIC,
            encoding_version: ENCODING_VERSION,
            data_section_off: table_off as u32,
            data_section_count: self.sections.len() as u32,
        }
        .encode_to(&mut out[..Header::SIZE]);

        for (i, (record, s)) in records.iter().zip(&self.sections).enumerate() {
            let at = Header::SIZE + i * DataSection::SIZE;
            record.encode_to(&mut out[at..at + DataSection::SIZE]);
            out[record.off as usize..][..s.bytes.len()].copy_from_slice(&s.bytes);
        }
        out
    }
}
