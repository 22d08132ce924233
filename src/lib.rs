//! Core types, traits, and dispatch for the insnlen ELF64 / x86-64 length decoder.
//!
//! This library locates the executable sections of an ELF64 image and walks
//! each one instruction by instruction, recording where every x86-64
//! instruction starts and how long it is. It does not name mnemonics or
//! operands; it only answers "where are the instruction boundaries".
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use insnlen::{
//!     decoder::X86_64Decoder,
//!     parser::SectionIndex,
//!     source::ByteSource,
//!     strategy::Strategy,
//! };
//!
//! // Read binary file
//! let binary_data = insnlen::load_file("path/to/binary").unwrap();
//!
//! // Index the section header table
//! let index = SectionIndex::build(ByteSource::new(&binary_data)).unwrap();
//!
//! // Walk every executable section
//! let decoder = X86_64Decoder::new();
//! let disassembly = Strategy::Linear.run(&index, &decoder).unwrap();
//!
//! for section in disassembly.sections() {
//!     println!("{}: {} instructions", section.name, section.spans.len());
//!     if let Some(stop) = &section.stop {
//!         println!("  stopped at +0x{:x}: {}", stop.offset, stop.error);
//!     }
//! }
//! ```

pub mod source;
pub mod parser;
pub mod decoder;
pub mod strategy;
pub mod format;
#[cfg(feature = "python")]
pub mod python;
#[cfg(test)]
mod testutil;

use std::fmt;
use std::path::Path;

use serde::Serialize;

pub use decoder::{DecodeError, X86_64Decoder};
pub use parser::{FormatError, Section, SectionIndex};
pub use source::{ByteSource, OutOfBounds};

/// Architectural maximum length of one x86-64 instruction, in bytes.
pub const MAX_INSTRUCTION_SIZE: usize = 15;

/// Which opcode encoding space an instruction's opcode byte was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OpcodeMap {
    /// Primary map, no escape
    #[serde(rename = "one-byte")]
    OneByte,
    /// `0F` escape
    #[serde(rename = "two-byte")]
    TwoByte,
    /// `0F 38` escape
    #[serde(rename = "0f38")]
    ThreeByte0F38,
    /// `0F 3A` escape
    #[serde(rename = "0f3a")]
    ThreeByte0F3A,
}

impl fmt::Display for OpcodeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpcodeMap::OneByte => write!(f, "one-byte"),
            OpcodeMap::TwoByte => write!(f, "two-byte"),
            OpcodeMap::ThreeByte0F38 => write!(f, "0f38"),
            OpcodeMap::ThreeByte0F3A => write!(f, "0f3a"),
        }
    }
}

/// Static branch prediction hint carried by a `2E`/`3E` prefix on a Jcc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchHint {
    /// `2E` before a conditional jump
    NotTaken,
    /// `3E` before a conditional jump
    Taken,
}

impl fmt::Display for BranchHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchHint::NotTaken => write!(f, "not-taken"),
            BranchHint::Taken => write!(f, "taken"),
        }
    }
}

/// Boundaries and classification of one decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstructionSpan {
    /// Offset of the first byte, relative to the section start
    pub start_offset: usize,
    /// Encoded length in bytes (1..=15)
    pub length: u8,
    /// At least one legacy prefix preceded the opcode
    pub had_legacy_prefixes: bool,
    /// A REX prefix preceded the opcode
    pub had_rex: bool,
    /// The opcode was introduced by a VEX or EVEX escape
    pub had_vex: bool,
    /// Map the opcode byte belongs to
    pub opcode_map: OpcodeMap,
    /// The opcode byte within `opcode_map`
    pub opcode: u8,
    /// Branch hint, only for conditional jumps carrying `2E`/`3E`
    pub branch_hint: Option<BranchHint>,
}

impl InstructionSpan {
    /// Offset one past the last byte, relative to the section start.
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.length as usize
    }

    /// The encoded bytes of this instruction within `code`.
    pub fn bytes<'a>(&self, code: &'a [u8]) -> &'a [u8] {
        &code[self.start_offset..self.end_offset()]
    }
}

/// Decoder trait: computes the span of one instruction.
pub trait Decoder: Send + Sync {
    /// Decode the instruction starting at `at`.
    ///
    /// # Arguments
    /// * `code` - The section bytes; nothing outside this view may be read
    /// * `at` - Offset of the instruction within `code`
    ///
    /// # Returns
    /// The instruction's span, or the reason no instruction could be formed.
    /// On error the caller's position is not advanced.
    fn decode(&self, code: &ByteSource<'_>, at: usize) -> Result<InstructionSpan, DecodeError>;
}

/// Where and why the walk of a section ended early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeStop {
    /// Section-relative offset of the instruction that failed
    pub offset: usize,
    /// Reason the instruction could not be decoded
    pub error: DecodeError,
}

/// Result of walking a single executable section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDisassembly<'a> {
    /// Position of the section in the header table
    pub index: usize,
    /// Resolved section name
    pub name: String,
    /// File offset of the section content
    pub file_offset: u64,
    /// Declared size of the section in bytes
    pub size: u64,
    /// Section content the spans refer to
    pub code: &'a [u8],
    /// Decoded instructions in address order
    pub spans: Vec<InstructionSpan>,
    /// Set when decoding stopped before the end of the section
    pub stop: Option<DecodeStop>,
}

impl<'a> SectionDisassembly<'a> {
    /// True when the spans cover the whole section.
    pub fn is_complete(&self) -> bool {
        self.stop.is_none()
    }

    /// Number of bytes covered by decoded spans.
    pub fn decoded_bytes(&self) -> usize {
        self.spans.iter().map(|s| s.length as usize).sum()
    }

    /// Raw bytes of one of this section's spans.
    pub fn span_bytes(&self, span: &InstructionSpan) -> &'a [u8] {
        span.bytes(self.code)
    }
}

/// Per-section output of a disassembly run, in section header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Disassembly<'a> {
    sections: Vec<SectionDisassembly<'a>>,
}

impl<'a> Disassembly<'a> {
    pub fn new(sections: Vec<SectionDisassembly<'a>>) -> Self {
        Self { sections }
    }

    /// All walked sections in on-disk order.
    pub fn sections(&self) -> &[SectionDisassembly<'a>] {
        &self.sections
    }

    /// Result for the first section called `name`.
    pub fn get(&self, name: &str) -> Option<&SectionDisassembly<'a>> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Get the total number of instructions
    pub fn instruction_count(&self) -> usize {
        self.sections.iter().map(|s| s.spans.len()).sum()
    }

    /// True when no section stopped early.
    pub fn is_complete(&self) -> bool {
        self.sections.iter().all(SectionDisassembly::is_complete)
    }

    pub fn into_sections(self) -> Vec<SectionDisassembly<'a>> {
        self.sections
    }
}

/// Read a whole file into memory.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<u8>, DisassemblyError> {
    Ok(std::fs::read(path)?)
}

/// Error type for disassembly operations
#[derive(Debug, thiserror::Error)]
pub enum DisassemblyError {
    /// The section header table could not be trusted
    #[error("Malformed ELF64 file: {0}")]
    Format(#[from] FormatError),

    /// Rendering the results failed
    #[error("Formatting error: {0}")]
    Formatting(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
