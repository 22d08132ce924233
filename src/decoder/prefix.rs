//! Legacy and REX prefix classification.

use crate::{BranchHint, OpcodeMap};

/// Kind of a legacy prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixKind {
    /// `F0`
    Lock,
    /// `F2`
    Repne,
    /// `F3`
    Rep,
    /// `2E 36 3E 26 64 65`; `2E`/`3E` double as branch hints
    Segment,
    /// `66`
    OperandSize,
    /// `67`
    AddressSize,
}

/// Classify a single byte as a legacy prefix.
pub const fn classify(byte: u8) -> Option<PrefixKind> {
    match byte {
        0xf0 => Some(PrefixKind::Lock),
        0xf2 => Some(PrefixKind::Repne),
        0xf3 => Some(PrefixKind::Rep),
        0x2e | 0x36 | 0x3e | 0x26 | 0x64 | 0x65 => Some(PrefixKind::Segment),
        0x66 => Some(PrefixKind::OperandSize),
        0x67 => Some(PrefixKind::AddressSize),
        _ => None,
    }
}

const fn build_prefix_table() -> [Option<PrefixKind>; 256] {
    let mut table = [None; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = classify(i as u8);
        i += 1;
    }
    table
}

/// Byte value to legacy prefix kind, fixed at compile time.
pub static PREFIX_TABLE: [Option<PrefixKind>; 256] = build_prefix_table();

/// Whether `byte` is a REX prefix (`0100WRXB`).
pub const fn is_rex(byte: u8) -> bool {
    byte & 0xf0 == 0x40
}

/// A REX prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rex(pub u8);

impl Rex {
    /// 64-bit operand size
    pub fn w(self) -> bool {
        self.0 & 0x08 != 0
    }

    /// ModRM.reg extension
    pub fn r(self) -> bool {
        self.0 & 0x04 != 0
    }

    /// SIB.index extension
    pub fn x(self) -> bool {
        self.0 & 0x02 != 0
    }

    /// ModRM.rm / SIB.base / opcode register extension
    pub fn b(self) -> bool {
        self.0 & 0x01 != 0
    }
}

/// Legacy prefixes seen in front of one instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prefixes {
    pub count: usize,
    pub lock: bool,
    pub rep: bool,
    pub repne: bool,
    pub operand_size: bool,
    pub address_size: bool,
    /// Last segment override byte, if any
    pub segment: Option<u8>,
}

impl Prefixes {
    pub fn record(&mut self, byte: u8, kind: PrefixKind) {
        self.count += 1;
        match kind {
            PrefixKind::Lock => self.lock = true,
            PrefixKind::Repne => self.repne = true,
            PrefixKind::Rep => self.rep = true,
            PrefixKind::Segment => self.segment = Some(byte),
            PrefixKind::OperandSize => self.operand_size = true,
            PrefixKind::AddressSize => self.address_size = true,
        }
    }

    pub fn any(&self) -> bool {
        self.count > 0
    }

    /// Prefixes that make a following VEX/EVEX escape undefined.
    pub fn forbid_vex(&self) -> bool {
        self.lock || self.rep || self.repne || self.operand_size
    }

    /// Reinterpret a `2E`/`3E` segment byte as a hint when the opcode is a Jcc.
    pub fn branch_hint(&self, map: OpcodeMap, opcode: u8) -> Option<BranchHint> {
        let conditional = match map {
            OpcodeMap::OneByte => (0x70..=0x7f).contains(&opcode),
            OpcodeMap::TwoByte => (0x80..=0x8f).contains(&opcode),
            _ => false,
        };
        if !conditional {
            return None;
        }
        match self.segment {
            Some(0x2e) => Some(BranchHint::NotTaken),
            Some(0x3e) => Some(BranchHint::Taken),
            _ => None,
        }
    }
}
