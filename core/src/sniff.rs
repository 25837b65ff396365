//! Recognising debug-info file formats from their leading bytes.

use crate::format::MAGIC;

const MSF20_MAGIC: &[u8] = b"Microsoft C/C++ program database 2.00\r\n\x1aJG\0\0";
const MSF70_MAGIC: &[u8] = b"Microsoft C/C++ MSF 7.00\r\n\x1aDS\0\0";
const MSF_PREFIX: &[u8] = b"Microsoft C/C++";
const ELF_MAGIC: &[u8] = b"\x7fELF";
const PE_DOS_MAGIC: &[u8] = b"MZ";

/// The format of a file handed to the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileFormat {
    /// A container this crate can parse.
    Container,
    /// A PDB (MSF) file.
    Pdb,
    Elf,
    Pe,
    Unknown,
}

impl FileFormat {
    /// Identify the format of a file from its first bytes.
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(MSF20_MAGIC)
            || data.starts_with(MSF70_MAGIC)
            || data.starts_with(MSF_PREFIX)
        {
            FileFormat::Pdb
        } else if data.starts_with(&MAGIC.to_le_bytes()) {
            FileFormat::Container
        } else if data.starts_with(ELF_MAGIC) {
            FileFormat::Elf
        } else if data.starts_with(PE_DOS_MAGIC) {
            FileFormat::Pe
        } else {
            FileFormat::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ContainerBuilder;

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(FileFormat::sniff(&ContainerBuilder::new().build()), FileFormat::Container);
        assert_eq!(FileFormat::sniff(MSF70_MAGIC), FileFormat::Pdb);
        assert_eq!(FileFormat::sniff(b"Microsoft C/C++ MSF 9.99"), FileFormat::Pdb);
        assert_eq!(FileFormat::sniff(b"\x7fELF\x02\x01\x01"), FileFormat::Elf);
        assert_eq!(FileFormat::sniff(b"MZ\x90\x00"), FileFormat::Pe);
        assert_eq!(FileFormat::sniff(b"\xde\xad"), FileFormat::Unknown);
        assert_eq!(FileFormat::sniff(b""), FileFormat::Unknown);
    }
}
