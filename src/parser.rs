//! ELF64 section header table index.
//!
//! Field offsets are read straight out of the file with checked
//! little-endian loads; goblin supplies the ELF constants.

use std::borrow::Cow;

use goblin::elf::header::{EI_CLASS, EI_DATA, ELFCLASS64, ELFDATA2LSB, ELFMAG, EM_X86_64, SELFMAG};
use goblin::elf::section_header::{SHF_EXECINSTR, SHN_XINDEX, SHT_NOBITS, SHT_PROGBITS};

use crate::source::{ByteSource, OutOfBounds};

/// Size of the ELF64 file header.
pub const ELF64_HEADER_SIZE: u64 = 0x40;

// ELF64 header fields
const E_MACHINE: u64 = 0x12;
const E_SHOFF: u64 = 0x28;
const E_SHENTSIZE: u64 = 0x3a;
const E_SHNUM: u64 = 0x3c;
const E_SHSTRNDX: u64 = 0x3e;

// section header fields, relative to the entry start
const SH_NAME: u64 = 0x00;
const SH_TYPE: u64 = 0x04;
const SH_FLAGS: u64 = 0x08;
const SH_OFFSET: u64 = 0x18;
const SH_SIZE: u64 = 0x20;
const SH_LINK: u64 = 0x28;

/// Smallest entry size that still covers every field read per entry.
pub const MIN_SECTION_ENTRY_SIZE: u16 = 0x28;

/// Errors raised while indexing the section header table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// A header, entry, or section range runs past the end of the file
    #[error("Truncated: {0}")]
    Truncated(#[from] OutOfBounds),

    /// Missing `\x7fELF` magic
    #[error("Not an ELF file (bad magic)")]
    BadMagic,

    /// ELF class other than ELFCLASS64
    #[error("Unsupported ELF class {0}, only ELF64 is handled")]
    NotElf64(u8),

    /// Data encoding other than little-endian
    #[error("Unsupported data encoding {0}, only little-endian is handled")]
    NotLittleEndian(u8),

    /// Entry size too small to hold the fields read from each entry
    #[error("Section header entry size {0} is smaller than 0x28")]
    BadEntrySize(u16),

    /// String table index does not name a section
    #[error("String table index {index} out of range for {count} sections")]
    BadStringTableIndex { index: u32, count: u64 },

    /// Names were requested but the file declares no string table
    #[error("No section name string table")]
    MissingStringTable,

    /// Lookup by name found nothing
    #[error("Section not found: {0}")]
    NotFound(String),
}

/// One entry of the section header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Position in the section header table
    pub index: usize,
    /// Offset of the name within the section name string table
    pub name_offset: u32,
    /// Raw `sh_type`
    pub section_type: u32,
    /// Raw `sh_flags`
    pub flags: u64,
    /// File offset of the section content
    pub file_offset: u64,
    /// Size of the section in bytes
    pub size: u64,
    /// PROGBITS with the EXECINSTR flag
    pub is_executable: bool,
}

impl Section {
    /// Whether the section occupies bytes in the file (everything but NOBITS).
    pub fn has_file_content(&self) -> bool {
        self.section_type != SHT_NOBITS
    }
}

/// Raw header fields used to locate the section header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderFields {
    pub machine: u16,
    pub table_offset: u64,
    pub entry_size: u16,
    pub entry_count: u64,
    pub string_table_index: u32,
}

/// Ordered, immutable index over the sections of an ELF64 image.
#[derive(Debug, Clone)]
pub struct SectionIndex<'a> {
    source: ByteSource<'a>,
    header: HeaderFields,
    sections: Vec<Section>,
    /// (offset, size) of the section name string table
    string_table: Option<(u64, u64)>,
}

impl<'a> SectionIndex<'a> {
    /// Parse the section header table of `source`.
    pub fn build(source: ByteSource<'a>) -> Result<Self, FormatError> {
        let ident = source.slice(0, ELF64_HEADER_SIZE)?;
        if &ident[..SELFMAG] != ELFMAG {
            return Err(FormatError::BadMagic);
        }
        if ident[EI_CLASS] != ELFCLASS64 {
            return Err(FormatError::NotElf64(ident[EI_CLASS]));
        }
        if ident[EI_DATA] != ELFDATA2LSB {
            return Err(FormatError::NotLittleEndian(ident[EI_DATA]));
        }

        let header = Self::read_header(&source)?;
        if header.machine != EM_X86_64 {
            log::warn!("e_machine is {}, not x86-64; decoding as x86-64 anyway", header.machine);
        }
        log::debug!(
            "section header table at 0x{:x}: {} entries of {} bytes, names in section {}",
            header.table_offset, header.entry_count, header.entry_size, header.string_table_index
        );

        let mut sections = Vec::with_capacity(header.entry_count as usize);
        let mut string_table = None;

        for i in 0..header.entry_count {
            // table bounds were checked in read_header, so this cannot overflow
            let entry = header.table_offset + i * header.entry_size as u64;

            let section_type = source.read_u32(entry + SH_TYPE)?;
            let flags = source.read_u64(entry + SH_FLAGS)?;
            let section = Section {
                index: i as usize,
                name_offset: source.read_u32(entry + SH_NAME)?,
                section_type,
                flags,
                file_offset: source.read_u64(entry + SH_OFFSET)?,
                size: source.read_u64(entry + SH_SIZE)?,
                is_executable: section_type == SHT_PROGBITS && flags & SHF_EXECINSTR as u64 != 0,
            };

            if section.has_file_content() {
                source.slice(section.file_offset, section.size)?;
            }
            if header.string_table_index != 0 && i == header.string_table_index as u64 {
                string_table = Some((section.file_offset, section.size));
            }

            sections.push(section);
        }

        Ok(Self {
            source,
            header,
            sections,
            string_table,
        })
    }

    fn read_header(source: &ByteSource<'a>) -> Result<HeaderFields, FormatError> {
        let table_offset = source.read_u64(E_SHOFF)?;
        let entry_size = source.read_u16(E_SHENTSIZE)?;
        let mut entry_count = source.read_u16(E_SHNUM)? as u64;
        let mut string_table_index = source.read_u16(E_SHSTRNDX)? as u32;

        if table_offset == 0 && entry_count == 0 {
            return Ok(HeaderFields {
                machine: source.read_u16(E_MACHINE)?,
                table_offset,
                entry_size,
                entry_count: 0,
                string_table_index: 0,
            });
        }
        if entry_size < MIN_SECTION_ENTRY_SIZE {
            return Err(FormatError::BadEntrySize(entry_size));
        }

        // extended numbering keeps the real values in entry 0
        if entry_count == 0 {
            entry_count = source.read_u64(table_offset.saturating_add(SH_SIZE))?;
        }
        if string_table_index == SHN_XINDEX {
            string_table_index = source.read_u32(table_offset.saturating_add(SH_LINK))?;
        }

        let table_len = entry_count
            .checked_mul(entry_size as u64)
            .ok_or(OutOfBounds {
                offset: table_offset,
                len: u64::MAX,
                available: source.len() as u64,
            })?;
        source.slice(table_offset, table_len)?;

        if entry_count != 0 && string_table_index as u64 >= entry_count {
            return Err(FormatError::BadStringTableIndex {
                index: string_table_index,
                count: entry_count,
            });
        }

        Ok(HeaderFields {
            machine: source.read_u16(E_MACHINE)?,
            table_offset,
            entry_size,
            entry_count,
            string_table_index,
        })
    }

    /// The raw header values the index was built from.
    pub fn header(&self) -> &HeaderFields {
        &self.header
    }

    /// `e_machine` of the image.
    pub fn machine(&self) -> u16 {
        self.header.machine
    }

    /// The buffer the index was built over.
    pub fn source(&self) -> ByteSource<'a> {
        self.source
    }

    /// All sections in header table order.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Get all executable sections, in header table order
    pub fn executable_sections(&self) -> Vec<&Section> {
        self.sections.iter().filter(|s| s.is_executable).collect()
    }

    /// Resolve a section's name through the section name string table.
    pub fn name(&self, section: &Section) -> Result<Cow<'a, str>, FormatError> {
        let (table_offset, table_size) = self.string_table.ok_or(FormatError::MissingStringTable)?;
        let table = self.source.slice(table_offset, table_size)?;

        let start = section.name_offset as u64;
        let unterminated = OutOfBounds {
            offset: table_offset + start,
            len: 1,
            available: self.source.len() as u64,
        };
        let tail = table.get(start as usize..).ok_or(unterminated)?;
        let end = tail.iter().position(|&b| b == 0).ok_or(unterminated)?;

        Ok(String::from_utf8_lossy(&tail[..end]))
    }

    /// Find a section by name
    pub fn lookup_by_name(&self, name: &str) -> Result<&Section, FormatError> {
        for section in &self.sections {
            if self.name(section)? == name {
                return Ok(section);
            }
        }
        Err(FormatError::NotFound(name.to_string()))
    }

    /// The bytes of a section; empty for NOBITS sections.
    pub fn content(&self, section: &Section) -> Result<ByteSource<'a>, FormatError> {
        if !section.has_file_content() {
            return Ok(self.source.window(0, 0)?);
        }
        Ok(self.source.window(section.file_offset, section.size)?)
    }
}
