//! Validation of a container's outer layout.

use crate::format::{DataSection, Header, SectionEncoding, SectionTag, ENCODING_VERSION, MAGIC};

/// The reason a buffer was rejected by [`parse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseStatus {
    /// The buffer is shorter than a header or does not start with [`MAGIC`].
    #[error("header does not match")]
    HeaderDoesNotMatch,
    /// The header carries an encoding version other than [`ENCODING_VERSION`].
    #[error("unsupported version number {0}")]
    UnsupportedVersionNumber(u32),
    /// The section table, or the data of one of the sections, lies outside the buffer.
    #[error("invalid data section layout")]
    InvalidDataSectionLayout,
}

/// The validated layout of a container.
///
/// This does not borrow the bytes it was parsed from, so it can be stored next to whatever owns
/// them (a file mapping, an unpacked image).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLayout {
    pub header: Header,
    pub sections: Vec<DataSection>,
}

/// Parse the outer layout of a container.
///
/// Every section's encoded range is checked to lie inside `data`, so callers may slice with the
/// offsets of the returned layout without further checks.
pub fn parse(data: &[u8]) -> Result<ParsedLayout, ParseStatus> {
    let header = Header::decode(data).ok_or(ParseStatus::HeaderDoesNotMatch)?;
    if header.magic != MAGIC {
        return Err(ParseStatus::HeaderDoesNotMatch);
    }
    if header.encoding_version != ENCODING_VERSION {
        return Err(ParseStatus::UnsupportedVersionNumber(header.encoding_version));
    }

    let table_start = header.data_section_off as u64;
    let table_end = table_start + header.data_section_count as u64 * DataSection::SIZE as u64;
    let overlaps_header = header.data_section_count != 0 && table_start < Header::SIZE as u64;
    if overlaps_header || table_end > data.len() as u64 {
        return Err(ParseStatus::InvalidDataSectionLayout);
    }

    let table = &data[table_start as usize..table_end as usize];
    let mut sections = Vec::with_capacity(header.data_section_count as usize);
    for record in table.chunks_exact(DataSection::SIZE) {
        // UNWRAP: `chunks_exact` yields records of exactly `DataSection::SIZE` bytes.
        let section = DataSection::decode(record).unwrap();
        let in_bounds = section
            .off
            .checked_add(section.encoded_size)
            .map_or(false, |end| end <= data.len() as u64);
        if !in_bounds {
            return Err(ParseStatus::InvalidDataSectionLayout);
        }
        if section.encoding == SectionEncoding::Unpacked
            && section.encoded_size != section.unpacked_size
        {
            return Err(ParseStatus::InvalidDataSectionLayout);
        }
        sections.push(section);
    }

    Ok(ParsedLayout { header, sections })
}

impl ParsedLayout {
    /// Returns the size of the container once every packed section is unpacked, or `None` if
    /// no section is packed.
    ///
    /// The unpacked image holds the header, the section table, and then every section at an
    /// 8-byte aligned offset.
    pub fn unpacked_size(&self) -> Option<u64> {
        if !self.sections.iter().any(DataSection::is_packed) {
            return None;
        }
        let mut off = self.unpacked_table_end();
        for section in &self.sections {
            off = crate::format::align8(off.checked_add(section.unpacked_size)?);
        }
        Some(off)
    }

    /// The offset right past the section table in the unpacked image, aligned to 8 bytes.
    pub(crate) fn unpacked_table_end(&self) -> u64 {
        let table_end = self.header.data_section_off as u64
            + self.sections.len() as u64 * DataSection::SIZE as u64;
        crate::format::align8(table_end.max(Header::SIZE as u64))
    }

    /// Returns the index and record of the first section with the given tag.
    pub fn find(&self, tag: SectionTag) -> Option<(usize, &DataSection)> {
        self.sections.iter().enumerate().find(|(_, s)| s.tag == tag)
    }
}
