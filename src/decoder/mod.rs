//! x86-64 instruction-length decoder.
//!
//! Decoding runs in fixed stages: legacy prefixes, REX, opcode map escape,
//! opcode, ModRM/SIB/displacement, immediate. Only the sizes of those
//! pieces are computed; operands are never interpreted.

mod prefix;
mod tables;

pub use self::prefix::{classify, is_rex, PrefixKind, Prefixes, Rex, PREFIX_TABLE};
pub use self::tables::{Imm, OpcodeInfo};

use crate::source::{ByteSource, OutOfBounds};
use crate::{Decoder, InstructionSpan, OpcodeMap, MAX_INSTRUCTION_SIZE};

/// Legacy prefixes accepted in front of one instruction.
pub const MAX_LEGACY_PREFIXES: usize = 4;

/// `endbr64`, accepted as a whole before any prefix accounting.
pub const ENDBR64: [u8; 4] = [0xf3, 0x0f, 0x1e, 0xfa];

/// Errors that can occur while decoding one instruction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The opcode is undefined in its map
    #[error("Unknown opcode 0x{opcode:02x} in {map} map")]
    UnknownOpcode { map: OpcodeMap, opcode: u8 },

    /// A prefix appears after REX, a second REX, or a VEX escape after a
    /// prefix it may not follow
    #[error("Misplaced prefix byte 0x{byte:02x}")]
    MisplacedPrefix { byte: u8 },

    /// More than [`MAX_LEGACY_PREFIXES`] legacy prefixes
    #[error("More than {} legacy prefixes", MAX_LEGACY_PREFIXES)]
    TooManyPrefixes,

    /// VEX/EVEX payload selects a map that has no length rules here
    #[error("Unsupported map select {map_select} after vector escape 0x{escape:02x}")]
    InvalidVex { escape: u8, map_select: u8 },

    /// The instruction runs past the end of the section
    #[error("Instruction runs past the end of the section: {0}")]
    Truncated(#[from] OutOfBounds),

    /// The encoding would exceed the architectural maximum length
    #[error("Instruction exceeds {} bytes", MAX_INSTRUCTION_SIZE)]
    TooLong,

    /// A decoder returned an empty span
    #[error("Decoder made no progress")]
    NoProgress,
}

/// Reads one instruction's bytes, refusing to go past the end of the code
/// view or [`MAX_INSTRUCTION_SIZE`] bytes from the start.
struct Cursor<'s, 'a> {
    code: &'s ByteSource<'a>,
    start: usize,
    pos: usize,
}

impl<'s, 'a> Cursor<'s, 'a> {
    fn new(code: &'s ByteSource<'a>, start: usize) -> Self {
        Self { code, start, pos: start }
    }

    fn check(&self, n: usize) -> Result<(), DecodeError> {
        let needed = self.pos + n - self.start;
        if needed > MAX_INSTRUCTION_SIZE {
            return Err(DecodeError::TooLong);
        }
        if self.pos + n > self.code.len() {
            return Err(DecodeError::Truncated(OutOfBounds {
                offset: self.start as u64,
                len: needed as u64,
                available: self.code.len() as u64,
            }));
        }
        Ok(())
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.check(1)?;
        Ok(self.code.byte(self.pos as u64)?)
    }

    fn take(&mut self) -> Result<u8, DecodeError> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }

    fn consumed(&self) -> usize {
        self.pos - self.start
    }
}

/// Instruction-length decoder for 64-bit mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct X86_64Decoder;

impl X86_64Decoder {
    pub fn new() -> Self {
        X86_64Decoder
    }

    /// Decode the instruction at `at` within `code`.
    pub fn decode_one(&self, code: &ByteSource<'_>, at: usize) -> Result<InstructionSpan, DecodeError> {
        if code.slice(at as u64, ENDBR64.len() as u64).ok() == Some(&ENDBR64[..]) {
            return Ok(InstructionSpan {
                start_offset: at,
                length: ENDBR64.len() as u8,
                had_legacy_prefixes: false,
                had_rex: false,
                had_vex: false,
                opcode_map: OpcodeMap::TwoByte,
                opcode: ENDBR64[2],
                branch_hint: None,
            });
        }

        let mut cur = Cursor::new(code, at);

        let mut prefixes = Prefixes::default();
        loop {
            let byte = cur.peek()?;
            let Some(kind) = PREFIX_TABLE[byte as usize] else {
                break;
            };
            if prefixes.count == MAX_LEGACY_PREFIXES {
                return Err(DecodeError::TooManyPrefixes);
            }
            prefixes.record(byte, kind);
            cur.skip(1)?;
        }

        let mut rex = None;
        if is_rex(cur.peek()?) {
            rex = Some(Rex(cur.take()?));
            let next = cur.peek()?;
            if is_rex(next) || PREFIX_TABLE[next as usize].is_some() {
                return Err(DecodeError::MisplacedPrefix { byte: next });
            }
        }

        let escape = cur.peek()?;
        if matches!(escape, 0xc4 | 0xc5 | 0x62) {
            if rex.is_some() || prefixes.forbid_vex() {
                return Err(DecodeError::MisplacedPrefix { byte: escape });
            }
            return decode_vector(cur, prefixes);
        }

        let map = if escape == 0x0f {
            cur.skip(1)?;
            match cur.peek()? {
                0x38 => {
                    cur.skip(1)?;
                    OpcodeMap::ThreeByte0F38
                }
                0x3a => {
                    cur.skip(1)?;
                    OpcodeMap::ThreeByte0F3A
                }
                _ => OpcodeMap::TwoByte,
            }
        } else {
            OpcodeMap::OneByte
        };

        let opcode = cur.take()?;
        let info = tables::legacy(map, opcode).ok_or(DecodeError::UnknownOpcode { map, opcode })?;

        let modrm = if info.modrm {
            let modrm = cur.take()?;
            if !info.register_only {
                skip_addressing(&mut cur, modrm)?;
            }
            Some(modrm)
        } else {
            None
        };

        cur.skip(immediate_size(info.imm, modrm, rex, &prefixes))?;

        let span = InstructionSpan {
            start_offset: at,
            length: cur.consumed() as u8,
            had_legacy_prefixes: prefixes.any(),
            had_rex: rex.is_some(),
            had_vex: false,
            opcode_map: map,
            opcode,
            branch_hint: prefixes.branch_hint(map, opcode),
        };
        log::trace!("decoded {:?}", span);
        Ok(span)
    }
}

/// VEX (`C4`/`C5`) and EVEX (`62`) encodings, positioned on the escape byte.
fn decode_vector(mut cur: Cursor<'_, '_>, prefixes: Prefixes) -> Result<InstructionSpan, DecodeError> {
    let at = cur.start;
    let escape = cur.take()?;

    let map_select = match escape {
        // two-byte VEX always implies the 0F map
        0xc5 => {
            cur.skip(1)?;
            1
        }
        0xc4 => {
            let select = cur.take()? & 0x1f;
            cur.skip(1)?;
            select
        }
        _ => {
            let select = cur.take()? & 0x07;
            cur.skip(2)?;
            select
        }
    };
    let map = match map_select {
        1 => OpcodeMap::TwoByte,
        2 => OpcodeMap::ThreeByte0F38,
        3 => OpcodeMap::ThreeByte0F3A,
        _ => return Err(DecodeError::InvalidVex { escape, map_select }),
    };

    let opcode = cur.take()?;
    let info = tables::vector(map, opcode).ok_or(DecodeError::UnknownOpcode { map, opcode })?;
    if info.modrm {
        let modrm = cur.take()?;
        skip_addressing(&mut cur, modrm)?;
    }
    // vector immediates are never operand-size dependent
    cur.skip(immediate_size(info.imm, None, None, &Prefixes::default()))?;

    Ok(InstructionSpan {
        start_offset: at,
        length: cur.consumed() as u8,
        had_legacy_prefixes: prefixes.any(),
        had_rex: false,
        had_vex: true,
        opcode_map: map,
        opcode,
        branch_hint: None,
    })
}

/// Consume the SIB byte and displacement selected by `modrm`.
fn skip_addressing(cur: &mut Cursor<'_, '_>, modrm: u8) -> Result<(), DecodeError> {
    let mode = modrm >> 6;
    let rm = modrm & 0x07;
    if mode == 0b11 {
        return Ok(());
    }

    let mut displacement = match mode {
        0b01 => 1,
        0b10 => 4,
        _ => 0,
    };
    if rm == 0b100 {
        let sib = cur.take()?;
        if mode == 0b00 && sib & 0x07 == 0b101 {
            displacement = 4;
        }
    } else if mode == 0b00 && rm == 0b101 {
        // RIP-relative disp32
        displacement = 4;
    }
    cur.skip(displacement)
}

/// Immediate width in bytes for `imm` under the active prefixes.
fn immediate_size(imm: Imm, modrm: Option<u8>, rex: Option<Rex>, prefixes: &Prefixes) -> usize {
    let rex_w = rex.map_or(false, Rex::w);
    let operand_size = if !rex_w && prefixes.operand_size { 2 } else { 4 };
    let group_reg = modrm.map(|m| (m >> 3) & 0x07);

    match imm {
        Imm::None => 0,
        Imm::Byte => 1,
        Imm::Word => 2,
        Imm::WordByte => 3,
        Imm::Full => operand_size,
        Imm::FullOrQword if rex_w => 8,
        Imm::FullOrQword => operand_size,
        Imm::Moffs if prefixes.address_size => 4,
        Imm::Moffs => 8,
        Imm::Rel32 => 4,
        Imm::Group3Byte if matches!(group_reg, Some(0 | 1)) => 1,
        Imm::Group3Full if matches!(group_reg, Some(0 | 1)) => operand_size,
        Imm::Group3Byte | Imm::Group3Full => 0,
    }
}

impl Decoder for X86_64Decoder {
    fn decode(&self, code: &ByteSource<'_>, at: usize) -> Result<InstructionSpan, DecodeError> {
        self.decode_one(code, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{noise, SAMPLE_FUNCTION, SAMPLE_LENGTHS};
    use crate::BranchHint;
    use rstest::rstest;

    fn decode(bytes: &[u8]) -> Result<InstructionSpan, DecodeError> {
        X86_64Decoder::new().decode_one(&ByteSource::new(bytes), 0)
    }

    fn length(bytes: &[u8]) -> usize {
        decode(bytes).unwrap().length as usize
    }

    #[rstest]
    #[case::nop(&[0x90], 1)]
    #[case::ret(&[0xc3], 1)]
    #[case::push_rbp(&[0x55], 1)]
    #[case::mov_rbp_rsp(&[0x48, 0x89, 0xe5], 3)]
    #[case::sub_rsp_imm8(&[0x48, 0x83, 0xec, 0x10], 4)]
    #[case::sub_rsp_imm32(&[0x48, 0x81, 0xec, 0x00, 0x01, 0x00, 0x00], 7)]
    #[case::mov_eax_imm32(&[0xb8, 0x01, 0x00, 0x00, 0x00], 5)]
    #[case::movabs_rax_imm64(&[0x48, 0xb8, 1, 2, 3, 4, 5, 6, 7, 8], 10)]
    #[case::mov_ax_imm16(&[0x66, 0xb8, 0x01, 0x00], 4)]
    #[case::mov_al_imm8(&[0xb0, 0x01], 2)]
    #[case::call_rel32(&[0xe8, 0x00, 0x00, 0x00, 0x00], 5)]
    #[case::call_rel32_opsize(&[0x66, 0xe8, 0x00, 0x00, 0x00, 0x00], 6)]
    #[case::jcc_rel32(&[0x0f, 0x84, 0x00, 0x00, 0x00, 0x00], 6)]
    #[case::jcc_rel8(&[0x74, 0x05], 2)]
    #[case::mov_disp8(&[0x8b, 0x45, 0xfc], 3)]
    #[case::mov_rip_relative(&[0x8b, 0x05, 0x00, 0x00, 0x00, 0x00], 6)]
    #[case::mov_sib(&[0x8b, 0x04, 0x24], 3)]
    #[case::mov_sib_no_base(&[0x8b, 0x04, 0x25, 0x00, 0x00, 0x00, 0x00], 7)]
    #[case::mov_sib_disp8(&[0x8b, 0x44, 0x24, 0x08], 4)]
    #[case::mov_sib_disp32(&[0x8b, 0x84, 0x24, 0x00, 0x01, 0x00, 0x00], 7)]
    #[case::mov_sib_rbp_base_disp8(&[0x8b, 0x44, 0x25, 0x08], 4)]
    #[case::mov_m32_imm32(&[0xc7, 0x45, 0xfc, 0x00, 0x00, 0x00, 0x00], 7)]
    #[case::mov_m16_imm16(&[0x66, 0xc7, 0x45, 0xfc, 0x00, 0x00], 6)]
    #[case::mov_m64_imm32(&[0x48, 0xc7, 0x45, 0xf8, 0x00, 0x00, 0x00, 0x00], 8)]
    #[case::test_r8_imm8(&[0xf6, 0xc1, 0x01], 3)]
    #[case::not_r8(&[0xf6, 0xd1], 2)]
    #[case::test_r32_imm32(&[0xf7, 0xc1, 0x01, 0x00, 0x00, 0x00], 6)]
    #[case::test_r16_imm16(&[0x66, 0xf7, 0xc1, 0x01, 0x00], 5)]
    #[case::neg_r32(&[0xf7, 0xd8], 2)]
    #[case::nopl(&[0x0f, 0x1f, 0x44, 0x00, 0x00], 5)]
    #[case::nopw(&[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], 9)]
    #[case::cs_nopw(&[0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00], 10)]
    #[case::enter(&[0xc8, 0x10, 0x00, 0x00], 4)]
    #[case::ret_imm16(&[0xc2, 0x08, 0x00], 3)]
    #[case::movabs_moffs(&[0xa1, 1, 2, 3, 4, 5, 6, 7, 8], 9)]
    #[case::movabs_moffs_addr32(&[0x67, 0xa1, 1, 2, 3, 4], 6)]
    #[case::pshufb(&[0x66, 0x0f, 0x38, 0x00, 0xc1], 5)]
    #[case::palignr(&[0x66, 0x0f, 0x3a, 0x0f, 0xc1, 0x08], 6)]
    #[case::lock_cmpxchg(&[0xf0, 0x48, 0x0f, 0xb1, 0x0a], 5)]
    #[case::rep_stosq(&[0xf3, 0x48, 0xab], 3)]
    #[case::syscall(&[0x0f, 0x05], 2)]
    #[case::bt_imm8(&[0x0f, 0xba, 0xe0, 0x03], 4)]
    #[case::lea_rip(&[0x48, 0x8d, 0x3d, 0x00, 0x00, 0x00, 0x00], 7)]
    #[case::call_r12(&[0x41, 0xff, 0xd4], 3)]
    #[case::jmp_rip_indirect(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00], 6)]
    #[case::fldz(&[0xd9, 0xee], 2)]
    #[case::imul_imm32(&[0x69, 0xc0, 0x10, 0x00, 0x00, 0x00], 6)]
    #[case::imul_imm8(&[0x6b, 0xc0, 0x10], 3)]
    #[case::endbr32(&[0xf3, 0x0f, 0x1e, 0xfb], 4)]
    #[case::xorps(&[0x0f, 0x57, 0xc0], 3)]
    #[case::movdqu_load(&[0xf3, 0x0f, 0x6f, 0x06], 4)]
    #[case::psrldq(&[0x66, 0x0f, 0x73, 0xd8, 0x08], 5)]
    #[case::femms_3dnow(&[0x0f, 0x0f, 0xc1, 0xb4], 4)]
    #[case::mov_from_cr2(&[0x0f, 0x20, 0x92, 0x00, 0x00, 0x00, 0x00], 3)]
    #[case::mov_from_dr4(&[0x0f, 0x21, 0xa7, 0x00, 0x00, 0x00, 0x00], 3)]
    #[case::mov_to_cr6(&[0x0f, 0x22, 0x70, 0x94], 3)]
    #[case::mov_to_dr7(&[0x0f, 0x23, 0x7b, 0x1d], 3)]
    #[case::mov_to_cr8_rex(&[0x44, 0x0f, 0x22, 0xc0], 4)]
    fn test_legacy_lengths(#[case] bytes: &[u8], #[case] expected: usize) {
        assert_eq!(length(bytes), expected);
    }

    #[rstest]
    #[case::vzeroupper(&[0xc5, 0xf8, 0x77], 3, OpcodeMap::TwoByte)]
    #[case::vmovdqa_load(&[0xc5, 0xfd, 0x6f, 0x07], 4, OpcodeMap::TwoByte)]
    #[case::vpshufd(&[0xc5, 0xf9, 0x70, 0xc1, 0x1b], 5, OpcodeMap::TwoByte)]
    #[case::vbroadcastss(&[0xc4, 0xe2, 0x79, 0x18, 0x07], 5, OpcodeMap::ThreeByte0F38)]
    #[case::vinsertf128(&[0xc4, 0xe3, 0x7d, 0x18, 0xc1, 0x01], 6, OpcodeMap::ThreeByte0F3A)]
    #[case::vmovaps_zmm(&[0x62, 0xf1, 0x7c, 0x48, 0x28, 0xc1], 6, OpcodeMap::TwoByte)]
    #[case::vmovdqu64_disp8(&[0x62, 0xf1, 0xfe, 0x48, 0x6f, 0x47, 0x01], 7, OpcodeMap::TwoByte)]
    fn test_vector_lengths(#[case] bytes: &[u8], #[case] expected: usize, #[case] map: OpcodeMap) {
        let span = decode(bytes).unwrap();
        assert_eq!(span.length as usize, expected);
        assert_eq!(span.opcode_map, map);
        assert!(span.had_vex);
        assert!(!span.had_rex);
    }

    #[test]
    fn test_endbr64_bypasses_prefix_accounting() {
        let span = decode(&ENDBR64).unwrap();
        assert_eq!(span.length, 4);
        assert!(!span.had_legacy_prefixes);
        assert_eq!(span.opcode_map, OpcodeMap::TwoByte);
        assert_eq!(span.opcode, 0x1e);

        // any instruction boundary, not only offset 0
        let mut code = vec![0x90, 0x66, 0x90];
        code.extend_from_slice(&ENDBR64);
        code.push(0xc3);
        let src = ByteSource::new(&code);
        assert_eq!(X86_64Decoder::new().decode_one(&src, 3).unwrap().length, 4);
    }

    #[test]
    fn test_classification() {
        let span = decode(&[0x40, 0x50]).unwrap();
        assert_eq!(span.length, 2);
        assert!(span.had_rex);
        assert!(!span.had_legacy_prefixes);
        assert_eq!(span.opcode_map, OpcodeMap::OneByte);
        assert_eq!(span.opcode, 0x50);

        let span = decode(&[0x66, 0x0f, 0x38, 0x00, 0xc1]).unwrap();
        assert!(span.had_legacy_prefixes);
        assert_eq!(span.opcode_map, OpcodeMap::ThreeByte0F38);
        assert_eq!(span.opcode, 0x00);

        let span = decode(&[0x66, 0x0f, 0x3a, 0x0f, 0xc1, 0x08]).unwrap();
        assert_eq!(span.opcode_map, OpcodeMap::ThreeByte0F3A);
    }

    #[test]
    fn test_branch_hints() {
        let span = decode(&[0x2e, 0x74, 0x05]).unwrap();
        assert_eq!(span.length, 3);
        assert_eq!(span.branch_hint, Some(BranchHint::NotTaken));

        let span = decode(&[0x3e, 0x0f, 0x85, 0x00, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(span.length, 7);
        assert_eq!(span.branch_hint, Some(BranchHint::Taken));

        // the same byte on a plain memory access is a segment override
        let span = decode(&[0x2e, 0x8b, 0x00]).unwrap();
        assert_eq!(span.branch_hint, None);
    }

    #[test]
    fn test_unknown_opcodes() {
        assert_eq!(
            decode(&[0x06]),
            Err(DecodeError::UnknownOpcode { map: OpcodeMap::OneByte, opcode: 0x06 })
        );
        assert_eq!(
            decode(&[0x0f, 0x04]),
            Err(DecodeError::UnknownOpcode { map: OpcodeMap::TwoByte, opcode: 0x04 })
        );
        assert_eq!(
            decode(&[0x66, 0x0f, 0x38, 0xff, 0xc0]),
            Err(DecodeError::UnknownOpcode { map: OpcodeMap::ThreeByte0F38, opcode: 0xff })
        );
    }

    #[test]
    fn test_misplaced_prefixes() {
        assert_eq!(decode(&[0x48, 0x66, 0x90]), Err(DecodeError::MisplacedPrefix { byte: 0x66 }));
        assert_eq!(decode(&[0x48, 0x48, 0x90]), Err(DecodeError::MisplacedPrefix { byte: 0x48 }));
        assert_eq!(decode(&[0x48, 0xc5, 0xf8, 0x77]), Err(DecodeError::MisplacedPrefix { byte: 0xc5 }));
        assert_eq!(decode(&[0x66, 0xc5, 0xf8, 0x77]), Err(DecodeError::MisplacedPrefix { byte: 0xc5 }));
    }

    #[test]
    fn test_prefix_limit() {
        assert_eq!(length(&[0x66, 0x66, 0x66, 0x66, 0x90]), 5);
        assert_eq!(decode(&[0x66, 0x66, 0x66, 0x66, 0x66, 0x90]), Err(DecodeError::TooManyPrefixes));
    }

    #[test]
    fn test_invalid_vex_map() {
        assert_eq!(
            decode(&[0xc4, 0xe0, 0x79, 0x18, 0x07]),
            Err(DecodeError::InvalidVex { escape: 0xc4, map_select: 0 })
        );
    }

    #[test]
    fn test_truncated_at_section_end() {
        let cases: [&[u8]; 6] = [&[0xe8, 0x00], &[0x0f], &[0x66], &[0x48], &[0x8b, 0x04], &[0xc4, 0xe3]];
        for bytes in cases {
            assert!(matches!(decode(bytes), Err(DecodeError::Truncated(_))), "{:02x?}", bytes);
        }
        assert!(matches!(decode(&[]), Err(DecodeError::Truncated(_))));
    }

    #[test]
    fn test_too_long() {
        // 4 prefixes + REX + opcode + ModRM + SIB + disp32 + imm32 = 16 bytes
        let mut bytes = vec![0x66, 0x66, 0x66, 0x66, 0x48, 0x81, 0x84, 0x24];
        bytes.extend_from_slice(&[0; 12]);
        assert_eq!(decode(&bytes), Err(DecodeError::TooLong));
    }

    #[test]
    fn test_sample_function_lengths() {
        let src = ByteSource::new(SAMPLE_FUNCTION);
        let decoder = X86_64Decoder::new();

        let mut at = 0;
        let mut lengths = Vec::new();
        while at < src.len() {
            let span = decoder.decode_one(&src, at).unwrap();
            assert_eq!(span.start_offset, at);
            lengths.push(span.length);
            at = span.end_offset();
        }
        assert_eq!(lengths, SAMPLE_LENGTHS);
    }

    #[test]
    fn test_never_reads_past_window() {
        let decoder = X86_64Decoder::new();
        for seed in 0..500 {
            let bytes = noise(seed, 24);
            for end in [1, 3, 8, 15, 24] {
                let src = ByteSource::new(&bytes[..end]);
                match decoder.decode_one(&src, 0) {
                    Ok(span) => {
                        assert!(span.length as usize <= MAX_INSTRUCTION_SIZE);
                        assert!(span.end_offset() <= end);
                        // decoding is a pure function of the bytes
                        assert_eq!(decoder.decode_one(&src, 0), Ok(span));
                    }
                    Err(DecodeError::Truncated(e)) => assert_eq!(e.available as usize, end),
                    Err(_) => {}
                }
            }
        }
    }
}
