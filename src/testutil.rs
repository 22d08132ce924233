//! ELF64 image builder and shared byte fixtures for tests.
//!
//! Also compiled into the integration tests via `#[path]`, so it only
//! depends on std, byteorder, and goblin.
#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use goblin::elf::header::{EM_X86_64, ET_EXEC};
use goblin::elf::section_header::{SHF_ALLOC, SHF_EXECINSTR, SHT_NOBITS, SHT_PROGBITS, SHT_STRTAB};

const HEADER_SIZE: u64 = 0x40;
const SECTION_HEADER_SIZE: u16 = 0x40;

/// A typical compiled function body and its instruction lengths.
pub const SAMPLE_FUNCTION: &[u8] = &[
    0xf3, 0x0f, 0x1e, 0xfa,                               // endbr64
    0x55,                                                 // push rbp
    0x48, 0x89, 0xe5,                                     // mov rbp, rsp
    0x48, 0x83, 0xec, 0x10,                               // sub rsp, 0x10
    0x89, 0x7d, 0xfc,                                     // mov [rbp-4], edi
    0x83, 0x7d, 0xfc, 0x64,                               // cmp dword [rbp-4], 0x64
    0x7e, 0x0a,                                           // jle +10
    0xbf, 0x01, 0x00, 0x00, 0x00,                         // mov edi, 1
    0xe8, 0x00, 0x00, 0x00, 0x00,                         // call rel32
    0x8b, 0x45, 0xfc,                                     // mov eax, [rbp-4]
    0x48, 0x98,                                           // cdqe
    0x48, 0x8d, 0x14, 0x85, 0x00, 0x00, 0x00, 0x00,       // lea rdx, [rax*4+0]
    0x48, 0x8d, 0x05, 0x00, 0x00, 0x00, 0x00,             // lea rax, [rip+0]
    0x8b, 0x04, 0x02,                                     // mov eax, [rdx+rax]
    0xc9,                                                 // leave
    0xc3,                                                 // ret
];

/// Lengths of the instructions in [`SAMPLE_FUNCTION`], in order.
pub const SAMPLE_LENGTHS: &[u8] = &[4, 1, 3, 4, 3, 4, 2, 5, 5, 3, 2, 8, 7, 3, 1, 1];

struct PendingSection {
    name: String,
    sh_type: u32,
    flags: u64,
    content: Vec<u8>,
    size: u64,
}

/// Builds a minimal little-endian ELF64 image.
///
/// Layout: file header, section contents in order, the `.shstrtab`
/// contents, then the section header table. Index 0 is the null section
/// and `.shstrtab` is always the last entry, after every section whose
/// name it holds.
pub struct ElfImage {
    machine: u16,
    sections: Vec<PendingSection>,
}

impl ElfImage {
    pub fn new() -> Self {
        Self {
            machine: EM_X86_64,
            sections: Vec::new(),
        }
    }

    pub fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub fn section(mut self, name: &str, sh_type: u32, flags: u64, content: &[u8]) -> Self {
        self.sections.push(PendingSection {
            name: name.to_string(),
            sh_type,
            flags,
            content: content.to_vec(),
            size: content.len() as u64,
        });
        self
    }

    /// An executable PROGBITS section.
    pub fn text(self, name: &str, code: &[u8]) -> Self {
        self.section(name, SHT_PROGBITS, (SHF_ALLOC | SHF_EXECINSTR) as u64, code)
    }

    /// A NOBITS section of `size` bytes that occupies nothing in the file.
    pub fn nobits(mut self, name: &str, size: u64) -> Self {
        self.sections.push(PendingSection {
            name: name.to_string(),
            sh_type: SHT_NOBITS,
            flags: SHF_ALLOC as u64,
            content: Vec::new(),
            size,
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        // name table: leading nul, then every name including .shstrtab
        let mut names = vec![0u8];
        let mut name_offsets = Vec::new();
        for entry in &self.sections {
            name_offsets.push(names.len() as u32);
            names.extend_from_slice(entry.name.as_bytes());
            names.push(0);
        }
        let shstrtab_name = names.len() as u32;
        names.extend_from_slice(b".shstrtab\0");

        let mut content_offsets = Vec::new();
        let mut offset = HEADER_SIZE;
        for entry in &self.sections {
            content_offsets.push(offset);
            offset += entry.content.len() as u64;
        }
        let names_offset = offset;
        let table_offset = names_offset + names.len() as u64;
        let count = self.sections.len() as u16 + 2;

        let mut buf = Vec::new();
        buf.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        buf.extend_from_slice(&[0; 8]);
        buf.write_u16::<LittleEndian>(ET_EXEC).unwrap();
        buf.write_u16::<LittleEndian>(self.machine).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap(); // entry
        buf.write_u64::<LittleEndian>(0).unwrap(); // phoff
        buf.write_u64::<LittleEndian>(table_offset).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap(); // flags
        buf.write_u16::<LittleEndian>(HEADER_SIZE as u16).unwrap();
        buf.write_u16::<LittleEndian>(0).unwrap(); // phentsize
        buf.write_u16::<LittleEndian>(0).unwrap(); // phnum
        buf.write_u16::<LittleEndian>(SECTION_HEADER_SIZE).unwrap();
        buf.write_u16::<LittleEndian>(count).unwrap();
        buf.write_u16::<LittleEndian>(count - 1).unwrap();
        assert_eq!(buf.len() as u64, HEADER_SIZE);

        for entry in &self.sections {
            buf.extend_from_slice(&entry.content);
        }
        buf.extend_from_slice(&names);

        write_section_header(&mut buf, 0, 0, 0, 0, 0);
        for (i, entry) in self.sections.iter().enumerate() {
            write_section_header(
                &mut buf,
                name_offsets[i],
                entry.sh_type,
                entry.flags,
                content_offsets[i],
                entry.size,
            );
        }
        write_section_header(&mut buf, shstrtab_name, SHT_STRTAB, 0, names_offset, names.len() as u64);

        buf
    }
}

fn write_section_header(buf: &mut Vec<u8>, name: u32, sh_type: u32, flags: u64, offset: u64, size: u64) {
    buf.write_u32::<LittleEndian>(name).unwrap();
    buf.write_u32::<LittleEndian>(sh_type).unwrap();
    buf.write_u64::<LittleEndian>(flags).unwrap();
    buf.write_u64::<LittleEndian>(0).unwrap(); // addr
    buf.write_u64::<LittleEndian>(offset).unwrap();
    buf.write_u64::<LittleEndian>(size).unwrap();
    buf.write_u32::<LittleEndian>(0).unwrap(); // link
    buf.write_u32::<LittleEndian>(0).unwrap(); // info
    buf.write_u64::<LittleEndian>(1).unwrap(); // addralign
    buf.write_u64::<LittleEndian>(0).unwrap(); // entsize
}

/// File offset of section header `index` in a built image.
pub fn section_header_offset(image: &[u8], index: usize) -> usize {
    let table = LittleEndian::read_u64(&image[0x28..]) as usize;
    let entry_size = LittleEndian::read_u16(&image[0x3a..]) as usize;
    table + index * entry_size
}

pub fn put_u16(image: &mut [u8], at: usize, value: u16) {
    LittleEndian::write_u16(&mut image[at..], value);
}

pub fn put_u32(image: &mut [u8], at: usize, value: u32) {
    LittleEndian::write_u32(&mut image[at..], value);
}

pub fn put_u64(image: &mut [u8], at: usize, value: u64) {
    LittleEndian::write_u64(&mut image[at..], value);
}

/// Deterministic pseudo-random bytes (64-bit LCG) for fuzz-style loops.
pub fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}
