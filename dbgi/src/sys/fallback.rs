use std::{io, path::Path};

/// The whole file read into memory.
pub struct Mapping {
    data: Vec<u8>,
}

impl Mapping {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            data: std::fs::read(path)?,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
