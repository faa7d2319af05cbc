//! The BISC object file, write side.
//!
//! Layout, all fields little-endian:
//!
//! ```text
//! file header     16 bytes   magic, arch, endianness, entry, table offset, count
//! section table   30 bytes   per section: type, flags, offset, address, size, name
//! payloads                   concatenated in table order
//! ```
use bitflags::bitflags;

use super::error::{Error, ErrorKind, Result};

pub const MAGIC: &[u8; 4] = b"BISC";
pub const ARCH_BISC: u8 = 0xB1;
pub const LITTLE_ENDIAN: u8 = 0;

pub const FILE_HEADER_LEN: usize = 16;
pub const SECTION_HEADER_LEN: usize = 30;
pub const SECTION_NAME_LEN: usize = 16;

/// The only section type so far: loaded verbatim at its address.
pub const SECTION_PROGRAM: u8 = 1;

bitflags! {
    pub struct SectionFlags: u8 {
        const READ        = 0x01;
        const WRITE       = 0x02;
        const EXECUTE     = 0x04;
        const INITIALIZED = 0x08;
        const CODE        = 0x10;
    }
}

impl SectionFlags {
    /// Flags implied by a section's name.
    pub fn for_name(name: &str) -> Self {
        match name {
            ".text"   => Self::READ | Self::EXECUTE | Self::CODE | Self::INITIALIZED,
            ".data"   => Self::READ | Self::WRITE | Self::INITIALIZED,
            ".rodata" => Self::READ | Self::INITIALIZED,
            ".bss"    => Self::READ | Self::WRITE,
            _         => Self::READ | Self::WRITE | Self::INITIALIZED,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SectionImage {
    pub name: String,
    pub flags: SectionFlags,
    pub address: u32,
    pub bytes: Vec<u8>,
}

impl SectionImage {
    /// Fails if `name` does not fit the 16-byte name field.
    pub fn new(name: &str, address: u32, bytes: Vec<u8>, line: usize, column: usize) -> Result<Self> {
        if name.len() > SECTION_NAME_LEN {
            let msg = format!("section name `{}` is longer than {} bytes", name, SECTION_NAME_LEN);
            return Err(Error::new(ErrorKind::EncodingRange(msg), line, column));
        }
        Ok(SectionImage { name: name.to_owned(), flags: SectionFlags::for_name(name), address, bytes })
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ObjectFile {
    pub entry: u32,
    pub sections: Vec<SectionImage>,
}

impl ObjectFile {
    pub fn new(entry: u32, sections: Vec<SectionImage>) -> Self {
        ObjectFile { entry, sections }
    }

    /// Serializes the header, section table and payloads.
    pub fn to_bytes(&self) -> Vec<u8> {
        let table_len = SECTION_HEADER_LEN * self.sections.len();
        let payload_len: usize = self.sections.iter().map(|s| s.bytes.len()).sum();
        let mut out: Vec<u8> = Vec::with_capacity(FILE_HEADER_LEN + table_len + payload_len);

        out.extend_from_slice(MAGIC);
        out.push(ARCH_BISC);
        out.push(LITTLE_ENDIAN);
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&(FILE_HEADER_LEN as u32).to_le_bytes());
        out.extend_from_slice(&(self.sections.len() as u16).to_le_bytes());

        let mut offset = FILE_HEADER_LEN + table_len;
        for section in &self.sections {
            out.push(SECTION_PROGRAM);
            out.push(section.flags.bits());
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            out.extend_from_slice(&section.address.to_le_bytes());
            out.extend_from_slice(&(section.bytes.len() as u32).to_le_bytes());

            let mut name = [0u8; SECTION_NAME_LEN];
            let len = section.name.len().min(SECTION_NAME_LEN);
            name[..len].copy_from_slice(&section.name.as_bytes()[..len]);
            out.extend_from_slice(&name);

            offset += section.bytes.len();
        }

        for section in &self.sections {
            out.extend_from_slice(&section.bytes);
        }

        debug!("object file: {} sections, {} bytes", self.sections.len(), out.len());
        out
    }
}
