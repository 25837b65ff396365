//! The debug-info container format consumed by the `dbgi` cache.
//!
//! A container is a small fixed header followed by a table of data sections. Each section names
//! a region of the file holding one table of debug information (strings, units, line tables,
//! types, procedures and so on). Sections may be stored packed, in which case the reader must
//! build an unpacked image of the whole container before the tables can be used.
//!
//! This crate only deals with the outer layout: locating and validating the sections and
//! producing an unpacked image. It does not interpret the contents of individual tables.

pub mod builder;
pub mod format;
pub mod parse;
pub mod sniff;
pub mod unpack;

pub use builder::ContainerBuilder;
pub use format::{DataSection, Header, SectionEncoding, SectionTag, ENCODING_VERSION, MAGIC};
pub use parse::{parse, ParseStatus, ParsedLayout};
pub use sniff::FileFormat;
pub use unpack::{unpack, Decompress, DecompressError, UnpackError};
