//! Per-map opcode tables: does a ModRM byte follow, and how wide is the immediate.
//!
//! Only instruction length matters here, so whole opcode groups share one
//! entry. `None` marks opcodes that are undefined in 64-bit mode (or that
//! the prefix/escape stages consume before the table is consulted).

use crate::OpcodeMap;

/// Immediate operand size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    None,
    /// imm8 / rel8
    Byte,
    /// imm16 (`RET imm16`)
    Word,
    /// imm16 + imm8 (`ENTER`)
    WordByte,
    /// operand-size immediate: 2 bytes with `66`, otherwise 4
    Full,
    /// `MOV r, imm`: 8 bytes with REX.W, otherwise like [`Imm::Full`]
    FullOrQword,
    /// `MOV` moffs: 8 bytes, 4 with `67`
    Moffs,
    /// rel32 of near `CALL`/`JMP`/`Jcc`
    Rel32,
    /// `F6` group: imm8 for `/0` and `/1` only
    Group3Byte,
    /// `F7` group: operand-size immediate for `/0` and `/1` only
    Group3Full,
}

/// Length-relevant properties of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub modrm: bool,
    /// ModRM always names registers; the mod bits are ignored, so no SIB or
    /// displacement follows
    pub register_only: bool,
    pub imm: Imm,
}

const fn op(modrm: bool, imm: Imm) -> Option<OpcodeInfo> {
    Some(OpcodeInfo { modrm, register_only: false, imm })
}

const NONE: Option<OpcodeInfo> = op(false, Imm::None);
const IB: Option<OpcodeInfo> = op(false, Imm::Byte);
const IW: Option<OpcodeInfo> = op(false, Imm::Word);
const IZ: Option<OpcodeInfo> = op(false, Imm::Full);
const M: Option<OpcodeInfo> = op(true, Imm::None);
const M_IB: Option<OpcodeInfo> = op(true, Imm::Byte);
const M_IZ: Option<OpcodeInfo> = op(true, Imm::Full);
const M_REG: Option<OpcodeInfo> = Some(OpcodeInfo { modrm: true, register_only: true, imm: Imm::None });

const fn one_byte(opcode: u8) -> Option<OpcodeInfo> {
    match opcode {
        // ALU block: r/m forms, then AL/eAX immediates; the 6/7 columns
        // are segment prefixes, 0F, or invalid in 64-bit mode
        0x00..=0x3f => match opcode & 0x07 {
            0..=3 => M,
            4 => IB,
            5 => IZ,
            _ => None,
        },
        0x50..=0x5f => NONE,
        0x63 => M,
        0x68 => IZ,
        0x69 => M_IZ,
        0x6a => IB,
        0x6b => M_IB,
        0x6c..=0x6f => NONE,
        0x70..=0x7f => IB,
        0x80 => M_IB,
        0x81 => M_IZ,
        0x83 => M_IB,
        0x84..=0x8f => M,
        0x90..=0x99 => NONE,
        0x9b..=0x9f => NONE,
        0xa0..=0xa3 => op(false, Imm::Moffs),
        0xa4..=0xa7 => NONE,
        0xa8 => IB,
        0xa9 => IZ,
        0xaa..=0xaf => NONE,
        0xb0..=0xb7 => IB,
        0xb8..=0xbf => op(false, Imm::FullOrQword),
        0xc0 | 0xc1 => M_IB,
        0xc2 => IW,
        0xc3 => NONE,
        0xc6 => M_IB,
        0xc7 => M_IZ,
        0xc8 => op(false, Imm::WordByte),
        0xc9 => NONE,
        0xca => IW,
        0xcb | 0xcc => NONE,
        0xcd => IB,
        0xcf => NONE,
        0xd0..=0xd3 => M,
        0xd7 => NONE,
        // x87
        0xd8..=0xdf => M,
        0xe0..=0xe7 => IB,
        0xe8 | 0xe9 => op(false, Imm::Rel32),
        0xeb => IB,
        0xec..=0xef => NONE,
        0xf1 => NONE,
        0xf4 | 0xf5 => NONE,
        0xf6 => op(true, Imm::Group3Byte),
        0xf7 => op(true, Imm::Group3Full),
        0xf8..=0xfd => NONE,
        0xfe | 0xff => M,
        _ => None,
    }
}

const fn two_byte(opcode: u8) -> Option<OpcodeInfo> {
    match opcode {
        0x00..=0x03 => M,
        0x05..=0x09 => NONE,
        0x0b => NONE,
        0x0d => M,
        0x0e => NONE,
        // 3DNow!: ModRM then an imm8 opcode suffix
        0x0f => M_IB,
        0x10..=0x1f => M,
        // mov to/from control and debug registers
        0x20..=0x23 => M_REG,
        0x28..=0x2f => M,
        0x30..=0x35 => NONE,
        0x37 => NONE,
        0x40..=0x6f => M,
        0x70..=0x73 => M_IB,
        0x74..=0x76 => M,
        0x77 => NONE,
        0x78 | 0x79 => M,
        0x7c..=0x7f => M,
        0x80..=0x8f => op(false, Imm::Rel32),
        0x90..=0x9f => M,
        0xa0..=0xa2 => NONE,
        0xa3 => M,
        0xa4 => M_IB,
        0xa5 => M,
        0xa8..=0xaa => NONE,
        0xab => M,
        0xac => M_IB,
        0xad..=0xaf => M,
        0xb0..=0xb9 => M,
        0xba => M_IB,
        0xbb..=0xc1 => M,
        0xc2 => M_IB,
        0xc3 => M,
        0xc4..=0xc6 => M_IB,
        0xc7 => M,
        0xc8..=0xcf => NONE,
        0xd0..=0xff => M,
        _ => None,
    }
}

const fn three_byte_38(opcode: u8) -> Option<OpcodeInfo> {
    match opcode {
        0x00..=0x0b
        | 0x10
        | 0x14
        | 0x15
        | 0x17
        | 0x1c..=0x1e
        | 0x20..=0x25
        | 0x28..=0x2b
        | 0x30..=0x35
        | 0x37..=0x41
        | 0x80..=0x82
        | 0xc8..=0xcd
        | 0xcf
        | 0xdb..=0xdf
        | 0xf0..=0xf6
        | 0xf8
        | 0xf9
        | 0xfc => M,
        _ => None,
    }
}

const fn three_byte_3a(opcode: u8) -> Option<OpcodeInfo> {
    match opcode {
        0x08..=0x0f
        | 0x14..=0x17
        | 0x20..=0x22
        | 0x40..=0x42
        | 0x44
        | 0x60..=0x63
        | 0xcc
        | 0xce
        | 0xcf
        | 0xdf => M_IB,
        _ => None,
    }
}

/// VEX/EVEX map 1 (implied `0F`).
const fn vex_two_byte(opcode: u8) -> Option<OpcodeInfo> {
    match opcode {
        // vzeroupper / vzeroall
        0x77 => NONE,
        0x70..=0x73 | 0xc2 | 0xc4..=0xc6 => M_IB,
        _ => M,
    }
}

macro_rules! opcode_table {
    ($entry:ident) => {{
        let mut table = [None; 256];
        let mut i = 0;
        while i < 256 {
            table[i] = $entry(i as u8);
            i += 1;
        }
        table
    }};
}

static ONE_BYTE: [Option<OpcodeInfo>; 256] = opcode_table!(one_byte);
static TWO_BYTE: [Option<OpcodeInfo>; 256] = opcode_table!(two_byte);
static THREE_BYTE_38: [Option<OpcodeInfo>; 256] = opcode_table!(three_byte_38);
static THREE_BYTE_3A: [Option<OpcodeInfo>; 256] = opcode_table!(three_byte_3a);
static VEX_TWO_BYTE: [Option<OpcodeInfo>; 256] = opcode_table!(vex_two_byte);

/// Table entry for an opcode reached through legacy escapes.
pub fn legacy(map: OpcodeMap, opcode: u8) -> Option<OpcodeInfo> {
    let table = match map {
        OpcodeMap::OneByte => &ONE_BYTE,
        OpcodeMap::TwoByte => &TWO_BYTE,
        OpcodeMap::ThreeByte0F38 => &THREE_BYTE_38,
        OpcodeMap::ThreeByte0F3A => &THREE_BYTE_3A,
    };
    table[opcode as usize]
}

/// Table entry for an opcode reached through a VEX or EVEX escape.
///
/// Every opcode of the vector maps takes ModRM except `VEX.0F 77`; the
/// `0F3A` map always carries an imm8. There is no vector one-byte map.
pub fn vector(map: OpcodeMap, opcode: u8) -> Option<OpcodeInfo> {
    match map {
        OpcodeMap::OneByte => None,
        OpcodeMap::TwoByte => VEX_TWO_BYTE[opcode as usize],
        OpcodeMap::ThreeByte0F38 => M,
        OpcodeMap::ThreeByte0F3A => M_IB,
    }
}
