//! Operand and register model
//!
//! Bank field decoding, register number fixups, write-mask rules, bank size
//! limits, type coercion rules and the resolution of an operand lane to a
//! concrete storage slot.

use crate::types::{
    DataType, Operand, Phase, RegisterBank, RegisterFlags, SwizzleChannel, SWIZZLE_DEFAULT,
};
use vs_core::DecodeError;

//=============================================================================
// BANK FIELDS
//=============================================================================

/// Destination bank. Selector 3 is always the first indexed bank.
pub fn decode_dest_bank(sel: u8, ext: bool) -> RegisterBank {
    match (sel & 0x3, ext) {
        (3, _) => RegisterBank::Indexed1,
        (0, true) => RegisterBank::SecAttr,
        (1, true) => RegisterBank::Special,
        (2, true) => RegisterBank::Index,
        (0, false) => RegisterBank::Temp,
        (1, false) => RegisterBank::Output,
        _ => RegisterBank::PrimAttr,
    }
}

pub fn decode_src0_bank(sel: u8, ext: bool) -> RegisterBank {
    match (sel & 0x1, ext) {
        (0, true) => RegisterBank::Output,
        (_, true) => RegisterBank::SecAttr,
        (0, false) => RegisterBank::Temp,
        _ => RegisterBank::PrimAttr,
    }
}

pub fn decode_src12_bank(sel: u8, ext: bool) -> RegisterBank {
    match (sel & 0x3, ext) {
        (0, true) => RegisterBank::Indexed1,
        (1, true) => RegisterBank::Special,
        (2, true) => RegisterBank::Immediate,
        (_, true) => RegisterBank::Indexed2,
        (0, false) => RegisterBank::Temp,
        (1, false) => RegisterBank::Output,
        (2, false) => RegisterBank::PrimAttr,
        _ => RegisterBank::SecAttr,
    }
}

/// Inverse of the src1/src2 bank decoder, `(selector, extended)`
pub fn encode_src12_bank(bank: RegisterBank) -> Option<(u8, bool)> {
    match bank {
        RegisterBank::Temp => Some((0, false)),
        RegisterBank::Output => Some((1, false)),
        RegisterBank::PrimAttr => Some((2, false)),
        RegisterBank::SecAttr => Some((3, false)),
        RegisterBank::Indexed1 => Some((0, true)),
        RegisterBank::Special => Some((1, true)),
        RegisterBank::Immediate => Some((2, true)),
        RegisterBank::Indexed2 => Some((3, true)),
        _ => None,
    }
}

/// Field values of one register operand
#[derive(Debug, Clone, Copy)]
pub struct RegisterField {
    pub num: u32,
    pub bank: RegisterBank,
    /// One logical register spans two 32-bit slots
    pub double_regs: bool,
    /// Width of the register number field
    pub reg_bits: u8,
}

impl RegisterField {
    pub fn new(num: u32, bank: RegisterBank, double_regs: bool, reg_bits: u8) -> Self {
        Self {
            num,
            bank,
            double_regs,
            reg_bits,
        }
    }
}

/// Apply the register fixups and build an operand with the default swizzle
pub fn finalize(field: RegisterField, data_type: DataType, phase: Phase) -> Operand {
    let mut op = Operand::new(field.bank, field.num, data_type);

    if field.double_regs && doubles(op.bank) {
        op.num = (op.num << 1) & 0xFF;
    }

    // Top of the temporary range aliases the internal registers
    let temps = if field.double_regs { 8 } else { 4 };
    let limit = (1u32 << field.reg_bits).saturating_sub(temps);
    if op.bank == RegisterBank::Temp && op.num >= limit {
        op.num -= limit;
        if field.double_regs {
            op.num >>= 1;
        }
        op.bank = RegisterBank::FpInternal;
    }

    if op.bank == RegisterBank::Special {
        const GLOBAL_FLAG: u32 = 0x40;
        if op.num & GLOBAL_FLAG != 0 {
            op.num &= !GLOBAL_FLAG;
            op.bank = RegisterBank::Global;
        } else {
            op.bank = RegisterBank::FpConstant;
        }
    }

    // The secondary program computes into SA, internal registers stay put
    if phase == Phase::Secondary
        && !matches!(
            op.bank,
            RegisterBank::FpInternal | RegisterBank::FpConstant | RegisterBank::Immediate
        )
    {
        op.bank = RegisterBank::SecAttr;
    }

    op.swizzle = SWIZZLE_DEFAULT;
    op
}

fn doubles(bank: RegisterBank) -> bool {
    !matches!(
        bank,
        RegisterBank::Special
            | RegisterBank::Immediate
            | RegisterBank::Indexed1
            | RegisterBank::Indexed2
    )
}

//=============================================================================
// MASKS AND MODIFIERS
//=============================================================================

/// Write mask of the alternative multiply-add layout
pub fn decode_write_mask(bank: RegisterBank, mask: u8, f16: bool) -> u8 {
    let f16_keeps_raw = !matches!(
        bank,
        RegisterBank::PrimAttr
            | RegisterBank::SecAttr
            | RegisterBank::Output
            | RegisterBank::FpInternal
            | RegisterBank::Temp
    );

    if bank == RegisterBank::FpInternal || (f16 && f16_keeps_raw) {
        return mask;
    }

    if f16 {
        let mut out = 0;
        if mask & 0b0001 != 0 {
            out |= 0b0011;
        }
        if mask & 0b0100 != 0 {
            out |= 0b1100;
        }
        out
    } else {
        mask & 0b11
    }
}

/// Inverse of [`decode_write_mask`] for masks it can produce
pub fn encode_write_mask(bank: RegisterBank, mask: u8, f16: bool) -> u8 {
    let f16_keeps_raw = !matches!(
        bank,
        RegisterBank::PrimAttr
            | RegisterBank::SecAttr
            | RegisterBank::Output
            | RegisterBank::FpInternal
            | RegisterBank::Temp
    );

    if bank == RegisterBank::FpInternal || (f16 && f16_keeps_raw) {
        return mask;
    }

    if f16 {
        let mut out = 0;
        if mask & 0b0011 != 0 {
            out |= 0b0001;
        }
        if mask & 0b1100 != 0 {
            out |= 0b0100;
        }
        out
    } else {
        mask & 0b11
    }
}

/// 2-bit source modifier: 1 negative, 2 absolute, 3 both
pub fn decode_modifier(m: u8) -> RegisterFlags {
    match m & 0x3 {
        1 => RegisterFlags::NEGATIVE,
        2 => RegisterFlags::ABSOLUTE,
        3 => RegisterFlags::NEGATIVE | RegisterFlags::ABSOLUTE,
        _ => RegisterFlags::empty(),
    }
}

pub fn encode_modifier(flags: RegisterFlags) -> u8 {
    let mut m = 0;
    if flags.contains(RegisterFlags::NEGATIVE) {
        m |= 1;
    }
    if flags.contains(RegisterFlags::ABSOLUTE) {
        m |= 2;
    }
    m
}

//=============================================================================
// LIMITS
//=============================================================================

/// Number of addressable 32-bit slots, `None` for unbounded banks
pub fn bank_limit(bank: RegisterBank, phase: Phase) -> Option<u32> {
    match bank {
        RegisterBank::Temp => Some(256),
        RegisterBank::PrimAttr => Some(128),
        RegisterBank::SecAttr => Some(if phase == Phase::Secondary { 256 } else { 128 }),
        RegisterBank::Output => Some(128),
        RegisterBank::FpInternal => Some(16),
        RegisterBank::FpConstant | RegisterBank::Global => Some(128),
        RegisterBank::Index => Some(2),
        RegisterBank::Predicate => Some(4),
        RegisterBank::Indexed1 | RegisterBank::Indexed2 => Some(128),
        RegisterBank::Immediate | RegisterBank::Special | RegisterBank::Invalid => None,
    }
}

/// Reject an operand whose base register lies outside its bank
pub fn check_limit(op: &Operand, phase: Phase, destination: bool) -> Result<(), DecodeError> {
    if op.bank == RegisterBank::Invalid {
        return Err(DecodeError::OperandOutOfRange {
            bank: op.bank.prefix(),
            index: op.num,
            limit: 0,
            destination,
        });
    }

    let Some(limit) = bank_limit(op.bank, phase) else {
        return Ok(());
    };
    let index = match op.bank {
        RegisterBank::FpInternal => op.num * 4,
        _ => op.num,
    };
    if index >= limit {
        return Err(DecodeError::OperandOutOfRange {
            bank: op.bank.prefix(),
            index,
            limit,
            destination,
        });
    }
    Ok(())
}

/// Register advance per repeat iteration
pub fn repeat_stride(op: &Operand) -> u32 {
    match op.bank {
        RegisterBank::Immediate
        | RegisterBank::FpConstant
        | RegisterBank::Special
        | RegisterBank::Predicate
        | RegisterBank::Invalid => 0,
        RegisterBank::FpInternal => 1,
        _ => match op.data_type {
            DataType::F32 | DataType::F16 | DataType::C10 => 2,
            _ => 1,
        },
    }
}

//=============================================================================
// STORAGE
//=============================================================================

/// Backing array of a resolved operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageBank {
    Temp,
    PrimAttr,
    SecAttr,
    Output,
    Internal,
    Global,
    Index,
}

impl StorageBank {
    pub const ALL: [StorageBank; 7] = [
        StorageBank::Temp,
        StorageBank::PrimAttr,
        StorageBank::SecAttr,
        StorageBank::Output,
        StorageBank::Internal,
        StorageBank::Global,
        StorageBank::Index,
    ];

    /// Array length in 32-bit slots
    pub fn size(self) -> u32 {
        match self {
            Self::Temp => 256,
            Self::PrimAttr => 128,
            Self::SecAttr => 256,
            Self::Output => 128,
            Self::Internal => 16,
            Self::Global => 128,
            Self::Index => 2,
        }
    }

    /// Variable name shared by the backends
    pub fn name(self) -> &'static str {
        match self {
            Self::Temp => "r",
            Self::PrimAttr => "pa",
            Self::SecAttr => "sa",
            Self::Output => "o",
            Self::Internal => "i",
            Self::Global => "g",
            Self::Index => "idx",
        }
    }
}

/// One 32-bit slot, optionally offset by an index register at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub bank: StorageBank,
    pub word: u32,
    /// Index register whose value, doubled, is added to `word`
    pub dynamic: Option<u8>,
}

impl Slot {
    pub fn fixed(bank: StorageBank, word: u32) -> Self {
        Self {
            bank,
            word,
            dynamic: None,
        }
    }
}

/// Part of a slot holding one lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanePart {
    Word,
    Half(u8),
    Byte(u8),
}

impl LanePart {
    pub fn bit_offset(self) -> u32 {
        match self {
            Self::Word => 0,
            Self::Half(h) => h as u32 * 16,
            Self::Byte(b) => b as u32 * 8,
        }
    }

    pub fn bit_width(self) -> u32 {
        match self {
            Self::Word => 32,
            Self::Half(_) => 16,
            Self::Byte(_) => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageRef {
    pub slot: Slot,
    pub part: LanePart,
}

/// Where one lane of an operand comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved {
    Storage(StorageRef),
    /// Constant channel selector or hardware constant
    Constant(f32),
    /// Raw immediate value
    Immediate(u32),
}

/// Resolve lane `lane` of `op` after moving the register by `shift` slots.
///
/// The lane goes through the swizzle. Register doubling was applied at
/// decode time, so `num` is already in 32-bit units here.
pub fn resolve(op: &Operand, lane: usize, shift: u32) -> Result<Resolved, DecodeError> {
    let channel = op.swizzle.get(lane).copied().unwrap_or(SwizzleChannel::Undefined);
    if let Some(value) = channel.constant() {
        return Ok(Resolved::Constant(value));
    }
    let ch = channel.lane().unwrap_or(lane as u32 & 3);

    match op.bank {
        RegisterBank::Immediate => return Ok(Resolved::Immediate(op.num)),
        RegisterBank::FpConstant => {
            let index = op.num + shift + if op.data_type == DataType::F32 { ch } else { 0 };
            return fp_constant(index).map(Resolved::Constant).ok_or(
                DecodeError::OperandOutOfRange {
                    bank: op.bank.prefix(),
                    index,
                    limit: FP_CONSTANTS.len() as u32,
                    destination: false,
                },
            );
        }
        _ => {}
    }

    let (bank, base, dynamic) = match op.bank {
        RegisterBank::Temp => (StorageBank::Temp, op.num, None),
        RegisterBank::PrimAttr => (StorageBank::PrimAttr, op.num, None),
        RegisterBank::SecAttr => (StorageBank::SecAttr, op.num, None),
        RegisterBank::Output => (StorageBank::Output, op.num, None),
        RegisterBank::Global => (StorageBank::Global, op.num, None),
        RegisterBank::Index => (StorageBank::Index, op.num.saturating_sub(1), None),
        RegisterBank::FpInternal => (StorageBank::Internal, op.num * 4, None),
        RegisterBank::Indexed1 | RegisterBank::Indexed2 => {
            let bank = match (op.num >> 5) & 0x3 {
                0 => StorageBank::Temp,
                1 => StorageBank::Output,
                2 => StorageBank::PrimAttr,
                _ => StorageBank::SecAttr,
            };
            let reg = if op.bank == RegisterBank::Indexed1 { 0 } else { 1 };
            (bank, op.num & 0x1F, Some(reg))
        }
        _ => {
            return Err(DecodeError::OperandOutOfRange {
                bank: op.bank.prefix(),
                index: op.num,
                limit: 0,
                destination: false,
            })
        }
    };

    let (offset, part) = lane_layout(op.data_type, ch);
    let word = base + shift + offset;
    let limit = bank.size();
    if word >= limit {
        return Err(DecodeError::OperandOutOfRange {
            bank: op.bank.prefix(),
            index: word,
            limit,
            destination: false,
        });
    }

    Ok(Resolved::Storage(StorageRef {
        slot: Slot { bank, word, dynamic },
        part,
    }))
}

/// Slot offset and part of lane `ch` for a data type
pub fn lane_layout(data_type: DataType, ch: u32) -> (u32, LanePart) {
    match data_type {
        DataType::F16 | DataType::U16 | DataType::S16 => (ch / 2, LanePart::Half((ch % 2) as u8)),
        DataType::U8 | DataType::S8 | DataType::O8 | DataType::C10 => (0, LanePart::Byte(ch as u8)),
        _ => (ch, LanePart::Word),
    }
}

/// Hardware constant bank. Only the entries below are known.
const FP_CONSTANTS: [f32; 25] = [
    0.0,
    1.0,
    2.0,
    3.0,
    4.0,
    5.0,
    6.0,
    7.0,
    8.0,
    16.0,
    32.0,
    64.0,
    128.0,
    256.0,
    512.0,
    1024.0,
    0.5,
    0.25,
    0.125,
    1.0 / 16.0,
    1.0 / 32.0,
    1.0 / 64.0,
    1.0 / 128.0,
    1.0 / 256.0,
    1.0 / 512.0,
];

pub fn fp_constant(index: u32) -> Option<f32> {
    FP_CONSTANTS.get(index as usize).copied()
}

//=============================================================================
// COERCION
//=============================================================================

/// Conversion between a register's declared type and the type an
/// instruction computes in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Identity,
    /// Half float to single, or the reverse on store
    Half,
    /// Integer value to float
    IntToFloat,
    /// Unsigned byte to float in [0, 1]
    NormalizedU8,
    /// Signed fixed point byte to float
    Fixed,
    /// Float to integer, the reverse of [`Coercion::IntToFloat`]
    FloatToInt,
    /// Reinterpret between signed and unsigned integers
    Sign,
}

/// Rule for reading `declared` in an instruction working on `working`.
/// Stores use the same rule in the opposite direction.
pub fn coercion(declared: DataType, working: DataType, normalized: bool) -> Result<Coercion, DecodeError> {
    use DataType::*;

    let rule = match (declared, working) {
        (a, b) if a == b => Coercion::Identity,
        (F16, F32) | (F32, F16) => Coercion::Half,
        (U8, F32) | (U8, F16) if normalized => Coercion::NormalizedU8,
        (C10, F32) | (C10, F16) => Coercion::Fixed,
        (U8 | S8 | O8 | U16 | S16 | U32 | S32, F32 | F16) => Coercion::IntToFloat,
        (F32 | F16, U8 | S8 | O8 | U16 | S16 | U32 | S32) => Coercion::FloatToInt,
        (U8 | O8 | U16 | U32, U32) | (S8 | S16 | S32, S32) => Coercion::Identity,
        (U8 | U16 | U32, S32) | (S8 | S16 | S32, U32) => Coercion::Sign,
        _ => {
            return Err(DecodeError::UnsupportedCoercion {
                from: declared.name(),
                to: working.name(),
            })
        }
    };
    Ok(rule)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(num: u32, bank: RegisterBank, double_regs: bool, reg_bits: u8) -> RegisterField {
        RegisterField::new(num, bank, double_regs, reg_bits)
    }

    #[test]
    fn test_bank_decoders() {
        assert_eq!(decode_dest_bank(3, false), RegisterBank::Indexed1);
        assert_eq!(decode_dest_bank(3, true), RegisterBank::Indexed1);
        assert_eq!(decode_dest_bank(1, true), RegisterBank::Special);
        assert_eq!(decode_src0_bank(1, true), RegisterBank::SecAttr);
        assert_eq!(decode_src12_bank(2, true), RegisterBank::Immediate);

        for sel in 0..4 {
            for ext in [false, true] {
                let bank = decode_src12_bank(sel, ext);
                assert_eq!(encode_src12_bank(bank), Some((sel, ext)));
            }
        }
    }

    #[test]
    fn test_double_register_numbering() {
        let op = finalize(field(5, RegisterBank::PrimAttr, true, 7), DataType::F32, Phase::Primary);
        assert_eq!(op.num, 10);

        // Wraps at eight bits
        let op = finalize(field(0x90, RegisterBank::Temp, true, 8), DataType::F32, Phase::Primary);
        assert_eq!(op.bank, RegisterBank::Temp);
        assert_eq!(op.num, 0x20);

        let op = finalize(field(7, RegisterBank::Immediate, true, 7), DataType::F32, Phase::Primary);
        assert_eq!(op.num, 7);
    }

    #[test]
    fn test_temp_aliases_internal() {
        // 7 bit doubled: limit 120, r60 doubles to 120
        let op = finalize(field(60, RegisterBank::Temp, true, 7), DataType::F32, Phase::Primary);
        assert_eq!(op.bank, RegisterBank::FpInternal);
        assert_eq!(op.num, 0);

        let op = finalize(field(126, RegisterBank::Temp, false, 7), DataType::U32, Phase::Primary);
        assert_eq!(op.bank, RegisterBank::FpInternal);
        assert_eq!(op.num, 2);
    }

    #[test]
    fn test_special_fixup_and_secondary_phase() {
        let op = finalize(field(0x41, RegisterBank::Special, false, 7), DataType::F32, Phase::Primary);
        assert_eq!(op.bank, RegisterBank::Global);
        assert_eq!(op.num, 1);

        let op = finalize(field(3, RegisterBank::Special, false, 7), DataType::F32, Phase::Secondary);
        assert_eq!(op.bank, RegisterBank::FpConstant);

        let op = finalize(field(3, RegisterBank::Temp, false, 7), DataType::F32, Phase::Secondary);
        assert_eq!(op.bank, RegisterBank::SecAttr);
    }

    #[test]
    fn test_write_mask_rules() {
        assert_eq!(decode_write_mask(RegisterBank::Temp, 0b0101, true), 0b1111);
        assert_eq!(decode_write_mask(RegisterBank::Temp, 0b0001, true), 0b0011);
        assert_eq!(decode_write_mask(RegisterBank::Temp, 0b1111, false), 0b0011);
        assert_eq!(decode_write_mask(RegisterBank::FpInternal, 0b1010, false), 0b1010);
        assert_eq!(decode_write_mask(RegisterBank::Indexed1, 0b1010, true), 0b1010);

        for raw in [0b0000, 0b0001, 0b0100, 0b0101] {
            let decoded = decode_write_mask(RegisterBank::Output, raw, true);
            assert_eq!(encode_write_mask(RegisterBank::Output, decoded, true), raw);
        }
        for raw in 0..4 {
            let decoded = decode_write_mask(RegisterBank::Temp, raw, false);
            assert_eq!(encode_write_mask(RegisterBank::Temp, decoded, false), raw);
        }
    }

    #[test]
    fn test_modifier_roundtrip() {
        for m in 0..4 {
            assert_eq!(encode_modifier(decode_modifier(m)), m);
        }
    }

    #[test]
    fn test_limits() {
        let op = Operand::new(RegisterBank::PrimAttr, 127, DataType::F32);
        assert!(check_limit(&op, Phase::Primary, false).is_ok());

        let op = Operand::new(RegisterBank::PrimAttr, 128, DataType::F32);
        assert!(matches!(
            check_limit(&op, Phase::Primary, true),
            Err(DecodeError::OperandOutOfRange { destination: true, .. })
        ));

        let op = Operand::new(RegisterBank::SecAttr, 200, DataType::F32);
        assert!(check_limit(&op, Phase::Primary, false).is_err());
        assert!(check_limit(&op, Phase::Secondary, false).is_ok());

        let op = Operand::new(RegisterBank::Immediate, 0xFFFF, DataType::U32);
        assert!(check_limit(&op, Phase::Primary, false).is_ok());
    }

    #[test]
    fn test_resolve_lane_layout() {
        let op = Operand::new(RegisterBank::Temp, 4, DataType::F32);
        let Ok(Resolved::Storage(r)) = resolve(&op, 2, 0) else {
            panic!("expected storage");
        };
        assert_eq!(r.slot, Slot::fixed(StorageBank::Temp, 6));
        assert_eq!(r.part, LanePart::Word);

        let op = Operand::new(RegisterBank::Output, 4, DataType::F16);
        let Ok(Resolved::Storage(r)) = resolve(&op, 3, 0) else {
            panic!("expected storage");
        };
        assert_eq!(r.slot.word, 5);
        assert_eq!(r.part, LanePart::Half(1));

        let op = Operand::new(RegisterBank::PrimAttr, 1, DataType::U8);
        let Ok(Resolved::Storage(r)) = resolve(&op, 2, 0) else {
            panic!("expected storage");
        };
        assert_eq!(r.slot.word, 1);
        assert_eq!(r.part, LanePart::Byte(2));
    }

    #[test]
    fn test_resolve_secondary_attribute_range() {
        // phase limits apply at decode; storage covers the whole bank
        let op = Operand::new(RegisterBank::SecAttr, 200, DataType::F32);
        let Ok(Resolved::Storage(r)) = resolve(&op, 0, 0) else {
            panic!("expected storage");
        };
        assert_eq!(r.slot.bank, StorageBank::SecAttr);
        assert_eq!(r.slot.word, 200);
        assert_eq!(r.part, LanePart::Word);

        let op = Operand::new(RegisterBank::SecAttr, 255, DataType::F32);
        assert!(resolve(&op, 1, 0).is_err());
    }

    #[test]
    fn test_resolve_constants_and_indexed() {
        let op = Operand::new(RegisterBank::Temp, 0, DataType::F32)
            .with_swizzle([SwizzleChannel::One; 4]);
        assert_eq!(resolve(&op, 0, 0), Ok(Resolved::Constant(1.0)));

        let op = Operand::new(RegisterBank::FpConstant, 16, DataType::F32);
        assert_eq!(resolve(&op, 0, 0), Ok(Resolved::Constant(0.5)));

        let op = Operand::new(RegisterBank::Indexed2, (2 << 5) | 3, DataType::F32);
        let Ok(Resolved::Storage(r)) = resolve(&op, 1, 0) else {
            panic!("expected storage");
        };
        assert_eq!(r.slot.bank, StorageBank::PrimAttr);
        assert_eq!(r.slot.word, 4);
        assert_eq!(r.slot.dynamic, Some(1));

        let op = Operand::new(RegisterBank::Temp, 255, DataType::F32);
        assert!(resolve(&op, 1, 0).is_err());
    }

    #[test]
    fn test_coercion_table() {
        assert_eq!(coercion(DataType::F32, DataType::F32, false), Ok(Coercion::Identity));
        assert_eq!(coercion(DataType::F16, DataType::F32, false), Ok(Coercion::Half));
        assert_eq!(coercion(DataType::U8, DataType::F32, true), Ok(Coercion::NormalizedU8));
        assert_eq!(coercion(DataType::U8, DataType::F32, false), Ok(Coercion::IntToFloat));
        assert_eq!(coercion(DataType::F32, DataType::U32, false), Ok(Coercion::FloatToInt));
        assert_eq!(coercion(DataType::S16, DataType::U32, false), Ok(Coercion::Sign));
        assert!(coercion(DataType::Unknown, DataType::F32, false).is_err());
        assert!(coercion(DataType::U32, DataType::C10, false).is_err());
    }
}
