//! On-disk layout of the container header and the data section table.
//!
//! All integers are little-endian. The header occupies [`Header::SIZE`] bytes at the start of the
//! file. The section table is an array of [`DataSection::SIZE`]-byte records located at
//! `data_section_off`.

/// The magic number identifying a container. Spells `raddbg` in little-endian.
pub const MAGIC: u64 = 0x0000_6762_6464_6172;

/// The only encoding version understood by this crate.
pub const ENCODING_VERSION: u32 = 2;

/// The container header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: u64,
    pub encoding_version: u32,
    /// Byte offset of the data section table.
    pub data_section_off: u32,
    /// Number of records in the data section table.
    pub data_section_count: u32,
}

impl Header {
    /// The encoded size of the header, including 4 trailing bytes of padding.
    pub const SIZE: usize = 24;

    pub fn encode_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..8].copy_from_slice(&self.magic.to_le_bytes());
        buf[8..12].copy_from_slice(&self.encoding_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.data_section_off.to_le_bytes());
        buf[16..20].copy_from_slice(&self.data_section_count.to_le_bytes());
        buf[20..24].fill(0);
    }

    /// Decode a header. Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..Self::SIZE)?;
        Some(Self {
            magic: read_u64(buf, 0),
            encoding_version: read_u32(buf, 8),
            data_section_off: read_u32(buf, 12),
            data_section_count: read_u32(buf, 16),
        })
    }
}

/// Identifies the table stored in a data section.
///
/// This is an open set: unknown tags are carried through untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionTag(pub u32);

impl SectionTag {
    pub const NULL: SectionTag = SectionTag(0x0000);
    pub const TOP_LEVEL_INFO: SectionTag = SectionTag(0x0001);
    pub const STRING_DATA: SectionTag = SectionTag(0x0002);
    pub const STRING_TABLE: SectionTag = SectionTag(0x0003);
    pub const INDEX_RUNS: SectionTag = SectionTag(0x0004);
    pub const BINARY_SECTIONS: SectionTag = SectionTag(0x0005);
    pub const FILE_PATH_NODES: SectionTag = SectionTag(0x0006);
    pub const SOURCE_FILES: SectionTag = SectionTag(0x0007);
    pub const LINE_TABLES: SectionTag = SectionTag(0x0008);
    pub const LINE_INFO_VOFFS: SectionTag = SectionTag(0x0009);
    pub const LINE_INFO_LINES: SectionTag = SectionTag(0x000A);
    pub const LINE_INFO_COLUMNS: SectionTag = SectionTag(0x000B);
    pub const UNITS: SectionTag = SectionTag(0x000C);
    pub const UNIT_VMAP: SectionTag = SectionTag(0x000D);
    pub const TYPE_NODES: SectionTag = SectionTag(0x000E);
    pub const UDTS: SectionTag = SectionTag(0x000F);
    pub const MEMBERS: SectionTag = SectionTag(0x0010);
    pub const ENUM_MEMBERS: SectionTag = SectionTag(0x0011);
    pub const GLOBAL_VARIABLES: SectionTag = SectionTag(0x0012);
    pub const GLOBAL_VMAP: SectionTag = SectionTag(0x0013);
    pub const THREAD_VARIABLES: SectionTag = SectionTag(0x0014);
    pub const PROCEDURES: SectionTag = SectionTag(0x0015);
    pub const SCOPES: SectionTag = SectionTag(0x0016);
    pub const SCOPE_VOFF_DATA: SectionTag = SectionTag(0x0017);
    pub const SCOPE_VMAP: SectionTag = SectionTag(0x0018);
    pub const INLINE_SITES: SectionTag = SectionTag(0x0019);
    pub const LOCALS: SectionTag = SectionTag(0x001A);
    pub const LOCATION_BLOCKS: SectionTag = SectionTag(0x001B);
    pub const LOCATION_DATA: SectionTag = SectionTag(0x001C);
    pub const NAME_MAPS: SectionTag = SectionTag(0x001D);

    /// Secondary tables are derived acceleration structures, flagged by the top bit.
    pub const SECONDARY: u32 = 0x8000_0000;
    pub const LINE_MAP_NUMBERS: SectionTag = SectionTag(Self::SECONDARY | 0x0001);
    pub const LINE_MAP_RANGES: SectionTag = SectionTag(Self::SECONDARY | 0x0002);
    pub const LINE_MAP_VOFFS: SectionTag = SectionTag(Self::SECONDARY | 0x0003);
    pub const NAME_MAP_BUCKETS: SectionTag = SectionTag(Self::SECONDARY | 0x0004);
    pub const NAME_MAP_NODES: SectionTag = SectionTag(Self::SECONDARY | 0x0005);

    pub fn is_secondary(&self) -> bool {
        self.0 & Self::SECONDARY != 0
    }
}

/// How the bytes of a data section are stored in the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionEncoding {
    /// Stored as-is. `encoded_size == unpacked_size`.
    Unpacked,
    /// Stored compressed. Must be decompressed to `unpacked_size` bytes before use.
    Packed,
    /// An encoding this crate does not know about.
    Unknown(u32),
}

impl SectionEncoding {
    pub fn from_u32(raw: u32) -> Self {
        match raw {
            0 => SectionEncoding::Unpacked,
            1 => SectionEncoding::Packed,
            x => SectionEncoding::Unknown(x),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            SectionEncoding::Unpacked => 0,
            SectionEncoding::Packed => 1,
            SectionEncoding::Unknown(x) => x,
        }
    }
}

/// One record of the data section table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataSection {
    pub tag: SectionTag,
    pub encoding: SectionEncoding,
    /// Byte offset of the section's data within the container.
    pub off: u64,
    /// Number of bytes the section occupies in the container.
    pub encoded_size: u64,
    /// Number of bytes the section occupies once unpacked.
    pub unpacked_size: u64,
}

impl DataSection {
    /// The encoded size of one section table record.
    pub const SIZE: usize = 32;

    pub fn encode_to(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), Self::SIZE);
        buf[0..4].copy_from_slice(&self.tag.0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.encoding.to_u32().to_le_bytes());
        buf[8..16].copy_from_slice(&self.off.to_le_bytes());
        buf[16..24].copy_from_slice(&self.encoded_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.unpacked_size.to_le_bytes());
    }

    /// Decode a section record. Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..Self::SIZE)?;
        Some(Self {
            tag: SectionTag(read_u32(buf, 0)),
            encoding: SectionEncoding::from_u32(read_u32(buf, 4)),
            off: read_u64(buf, 8),
            encoded_size: read_u64(buf, 16),
            unpacked_size: read_u64(buf, 24),
        })
    }

    /// Whether the section must be decompressed before use.
    pub fn is_packed(&self) -> bool {
        self.encoding == SectionEncoding::Packed
    }
}

/// Round `x` up to the next multiple of 8.
pub(crate) fn align8(x: u64) -> u64 {
    (x + 7) & !7
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn magic_spells_raddbg() {
        assert_eq!(&MAGIC.to_le_bytes()[..6], b"raddbg");
    }

    #[test]
    fn header_layout() {
        let header = Header {
            magic: MAGIC,
            encoding_version: ENCODING_VERSION,
            data_section_off: 24,
            data_section_count: 3,
        };
        let mut buf = [0xFF; Header::SIZE];
        header.encode_to(&mut buf);
        assert_eq!(
            buf,
            hex!("7261646462670000 02000000 18000000 03000000 00000000")
        );
        assert_eq!(Header::decode(&buf), Some(header));
        assert_eq!(Header::decode(&buf[..Header::SIZE - 1]), None);
    }

    #[test]
    fn unknown_encoding_is_preserved() {
        let section = DataSection {
            tag: SectionTag(0x1234),
            encoding: SectionEncoding::Unknown(7),
            off: 64,
            encoded_size: 10,
            unpacked_size: 10,
        };
        let mut buf = [0; DataSection::SIZE];
        section.encode_to(&mut buf);
        assert_eq!(DataSection::decode(&buf), Some(section));
    }

    #[test]
    fn secondary_tags() {
        assert!(SectionTag::NAME_MAP_NODES.is_secondary());
        assert!(!SectionTag::PROCEDURES.is_secondary());
    }

    #[test]
    fn align8_rounds_up() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(57), 64);
    }
}
