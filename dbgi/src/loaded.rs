//! The result of loading one key: the backing memory and the validated layout, or the reason the
//! file yielded nothing.

use dbgi_core::{DataSection, ParsedLayout};

use crate::{error::Error, sys::Mapping};

pub struct Loaded {
    /// The mapped file. Kept for the lifetime of the node even when an unpacked image exists.
    mapping: Option<Mapping>,
    /// The decompressed image, when the file had packed sections.
    unpacked: Option<Vec<u8>>,
    layout: Option<ParsedLayout>,
    error: Option<Error>,
}

impl Loaded {
    pub fn mapped(mapping: Mapping, layout: ParsedLayout) -> Self {
        Loaded {
            mapping: Some(mapping),
            unpacked: None,
            layout: Some(layout),
            error: None,
        }
    }

    pub fn unpacked(mapping: Mapping, image: Vec<u8>, layout: ParsedLayout) -> Self {
        Loaded {
            mapping: Some(mapping),
            unpacked: Some(image),
            layout: Some(layout),
            error: None,
        }
    }

    /// A terminal failure. Lookups see a nil result.
    pub fn failed(error: Error) -> Self {
        Loaded {
            mapping: None,
            unpacked: None,
            layout: None,
            error: Some(error),
        }
    }

    /// The bytes the layout describes.
    pub fn data(&self) -> &[u8] {
        match (&self.unpacked, &self.mapping) {
            (Some(image), _) => image,
            (None, Some(mapping)) => mapping.as_slice(),
            (None, None) => &[],
        }
    }

    pub fn layout(&self) -> Option<&ParsedLayout> {
        self.layout.as_ref()
    }

    pub fn sections(&self) -> &[DataSection] {
        self.layout.as_ref().map_or(&[], |l| &l.sections)
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn was_unpacked(&self) -> bool {
        self.unpacked.is_some()
    }
}
