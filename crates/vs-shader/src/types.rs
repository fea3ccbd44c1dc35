//! USSE shader type definitions
//!
//! Defines the decoded instruction record, operands, register banks and the
//! small enumerations shared by the decoder, the recompiler and the backends.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Shader stage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStage: u8 {
        const VERTEX = 0x01;
        const FRAGMENT = 0x02;
    }
}

/// Program type stored in the GXP header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProgramType {
    Vertex,
    Fragment,
}

impl ProgramType {
    pub fn stage(self) -> ShaderStage {
        match self {
            Self::Vertex => ShaderStage::VERTEX,
            Self::Fragment => ShaderStage::FRAGMENT,
        }
    }

    /// Stage part of cached artifact names
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
        }
    }
}

/// Sub-program of a GXP binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Per-pixel program
    Primary,
    /// Sample-rate program, runs first and writes secondary attributes
    Secondary,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

//=============================================================================
// DATA TYPES
//=============================================================================

/// Lane data type. The discriminants follow the 3-bit move data type field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DataType {
    S8 = 0,
    S16 = 1,
    S32 = 2,
    C10 = 3,
    F16 = 4,
    F32 = 5,
    U8 = 6,
    U16 = 7,
    U32 = 8,
    O8 = 9,
    Unknown = 10,
}

impl From<u8> for DataType {
    fn from(v: u8) -> Self {
        match v {
            0 => DataType::S8,
            1 => DataType::S16,
            2 => DataType::S32,
            3 => DataType::C10,
            4 => DataType::F16,
            5 => DataType::F32,
            6 => DataType::U8,
            7 => DataType::U16,
            8 => DataType::U32,
            9 => DataType::O8,
            _ => DataType::Unknown,
        }
    }
}

impl DataType {
    /// Size of one lane in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::S8 | Self::U8 | Self::O8 | Self::C10 => 1,
            Self::S16 | Self::U16 | Self::F16 => 2,
            Self::S32 | Self::U32 | Self::F32 | Self::Unknown => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F16 | Self::C10)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Self::S8 | Self::S16 | Self::S32)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::S8 => "s8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::C10 => "c10",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::O8 => "o8",
            Self::Unknown => "unk",
        }
    }
}

//=============================================================================
// REGISTERS
//=============================================================================

/// Register bank of an operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegisterBank {
    Temp,
    PrimAttr,
    Output,
    SecAttr,
    FpInternal,
    Special,
    Global,
    FpConstant,
    Immediate,
    Index,
    Indexed1,
    Indexed2,
    Predicate,
    Invalid,
}

impl RegisterBank {
    /// Prefix used by the disassembler and in error messages
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Temp => "r",
            Self::PrimAttr => "pa",
            Self::Output => "o",
            Self::SecAttr => "sa",
            Self::FpInternal => "i",
            Self::Special => "s",
            Self::Global => "g",
            Self::FpConstant => "c",
            Self::Immediate => "#",
            Self::Index => "idx",
            Self::Indexed1 => "ix1_",
            Self::Indexed2 => "ix2_",
            Self::Predicate => "p",
            Self::Invalid => "inv",
        }
    }
}

/// Single channel selector of a swizzle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SwizzleChannel {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
    Zero = 4,
    One = 5,
    Two = 6,
    Half = 7,
    Undefined = 8,
}

impl From<u8> for SwizzleChannel {
    fn from(v: u8) -> Self {
        match v {
            0 => SwizzleChannel::X,
            1 => SwizzleChannel::Y,
            2 => SwizzleChannel::Z,
            3 => SwizzleChannel::W,
            4 => SwizzleChannel::Zero,
            5 => SwizzleChannel::One,
            6 => SwizzleChannel::Two,
            7 => SwizzleChannel::Half,
            _ => SwizzleChannel::Undefined,
        }
    }
}

impl SwizzleChannel {
    /// Register lane read by this selector, `None` for constants
    pub fn lane(self) -> Option<u32> {
        match self {
            Self::X => Some(0),
            Self::Y => Some(1),
            Self::Z => Some(2),
            Self::W => Some(3),
            _ => None,
        }
    }

    /// Constant value of a non-lane selector
    pub fn constant(self) -> Option<f32> {
        match self {
            Self::Zero => Some(0.0),
            Self::One => Some(1.0),
            Self::Two => Some(2.0),
            Self::Half => Some(0.5),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::X => 'x',
            Self::Y => 'y',
            Self::Z => 'z',
            Self::W => 'w',
            Self::Zero => '0',
            Self::One => '1',
            Self::Two => '2',
            Self::Half => 'h',
            Self::Undefined => '?',
        }
    }
}

pub type Swizzle4 = [SwizzleChannel; 4];

pub const SWIZZLE_DEFAULT: Swizzle4 = [
    SwizzleChannel::X,
    SwizzleChannel::Y,
    SwizzleChannel::Z,
    SwizzleChannel::W,
];

pub const SWIZZLE_UNDEFINED: Swizzle4 = [SwizzleChannel::Undefined; 4];

/// 3-bit predicate field
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExtPredicate {
    None = 0,
    P0 = 1,
    P1 = 2,
    P2 = 3,
    P3 = 4,
    NegP0 = 5,
    NegP1 = 6,
    Pn = 7,
}

impl From<u8> for ExtPredicate {
    fn from(v: u8) -> Self {
        match v & 0x7 {
            0 => ExtPredicate::None,
            1 => ExtPredicate::P0,
            2 => ExtPredicate::P1,
            3 => ExtPredicate::P2,
            4 => ExtPredicate::P3,
            5 => ExtPredicate::NegP0,
            6 => ExtPredicate::NegP1,
            _ => ExtPredicate::Pn,
        }
    }
}

impl ExtPredicate {
    /// Predicate register and negation, `None` when the instruction is
    /// unconditional or uses the per-lane predicate.
    pub fn register(self) -> Option<(u8, bool)> {
        match self {
            Self::P0 => Some((0, false)),
            Self::P1 => Some((1, false)),
            Self::P2 => Some((2, false)),
            Self::P3 => Some((3, false)),
            Self::NegP0 => Some((0, true)),
            Self::NegP1 => Some((1, true)),
            Self::None | Self::Pn => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == Self::None
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::None => "",
            Self::P0 => "p0 ",
            Self::P1 => "p1 ",
            Self::P2 => "p2 ",
            Self::P3 => "p3 ",
            Self::NegP0 => "!p0 ",
            Self::NegP1 => "!p1 ",
            Self::Pn => "pn ",
        }
    }
}

/// 2-bit predicate field
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortPredicate {
    None = 0,
    P0 = 1,
    P1 = 2,
    NegP0 = 3,
}

impl From<u8> for ShortPredicate {
    fn from(v: u8) -> Self {
        match v & 0x3 {
            0 => ShortPredicate::None,
            1 => ShortPredicate::P0,
            2 => ShortPredicate::P1,
            _ => ShortPredicate::NegP0,
        }
    }
}

impl From<ShortPredicate> for ExtPredicate {
    fn from(p: ShortPredicate) -> Self {
        match p {
            ShortPredicate::None => ExtPredicate::None,
            ShortPredicate::P0 => ExtPredicate::P0,
            ShortPredicate::P1 => ExtPredicate::P1,
            ShortPredicate::NegP0 => ExtPredicate::NegP0,
        }
    }
}

bitflags! {
    /// Source modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RegisterFlags: u8 {
        const NEGATIVE = 0x01;
        const ABSOLUTE = 0x02;
    }
}

/// Register reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub bank: RegisterBank,
    /// Register number in 32-bit units once double-register numbering is
    /// applied. Holds the raw value for immediates and the packed selector
    /// for indexed banks.
    pub num: u32,
    pub swizzle: Swizzle4,
    pub data_type: DataType,
    pub flags: RegisterFlags,
}

impl Default for Operand {
    fn default() -> Self {
        Self {
            bank: RegisterBank::Invalid,
            num: 0,
            swizzle: SWIZZLE_UNDEFINED,
            data_type: DataType::F32,
            flags: RegisterFlags::empty(),
        }
    }
}

impl Operand {
    pub fn new(bank: RegisterBank, num: u32, data_type: DataType) -> Self {
        Self {
            bank,
            num,
            swizzle: SWIZZLE_DEFAULT,
            data_type,
            flags: RegisterFlags::empty(),
        }
    }

    pub fn with_swizzle(mut self, swizzle: Swizzle4) -> Self {
        self.swizzle = swizzle;
        self
    }
}

//=============================================================================
// INSTRUCTIONS
//=============================================================================

/// Logical operation, independent of the physical encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Opcode {
    Vmov,
    Vmovc,
    Vmovcu8,
    Vmad,
    Vdp,
    Vmul,
    Vadd,
    Vsub,
    Vfrc,
    Vdsx,
    Vdsy,
    Vmin,
    Vmax,
    Vrcp,
    Vrsq,
    Vlog,
    Vexp,
    Vpck,
    Vtst,
    Vtstmsk,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Rol,
    Asr,
    Smp,
    Br,
    Kill,
    Nop,
    Phas,
    Spec,
    Smlsi,
    Vdual,
    Sop2,
    Vldst,
    Invalid,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Vmov => "VMOV",
            Self::Vmovc => "VMOVC",
            Self::Vmovcu8 => "VMOVCU8",
            Self::Vmad => "VMAD",
            Self::Vdp => "VDP",
            Self::Vmul => "VMUL",
            Self::Vadd => "VADD",
            Self::Vsub => "VSUB",
            Self::Vfrc => "VFRC",
            Self::Vdsx => "VDSX",
            Self::Vdsy => "VDSY",
            Self::Vmin => "VMIN",
            Self::Vmax => "VMAX",
            Self::Vrcp => "VRCP",
            Self::Vrsq => "VRSQ",
            Self::Vlog => "VLOG",
            Self::Vexp => "VEXP",
            Self::Vpck => "VPCK",
            Self::Vtst => "VTST",
            Self::Vtstmsk => "VTSTMSK",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Shl => "SHL",
            Self::Shr => "SHR",
            Self::Rol => "ROL",
            Self::Asr => "ASR",
            Self::Smp => "SMP",
            Self::Br => "BR",
            Self::Kill => "KILL",
            Self::Nop => "NOP",
            Self::Phas => "PHAS",
            Self::Spec => "SPEC",
            Self::Smlsi => "SMLSI",
            Self::Vdual => "VDUAL",
            Self::Sop2 => "SOP2",
            Self::Vldst => "VLDST",
            Self::Invalid => "INVALID",
        }
    }

    pub fn is_branch(self) -> bool {
        self == Self::Br
    }

    /// Codes that are decoded but intentionally produce no code
    pub fn is_no_op(self) -> bool {
        matches!(self, Self::Nop | Self::Phas | Self::Spec | Self::Smlsi)
    }
}

/// Comparison against zero used by conditional moves
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompareMethod {
    NeZero = 0,
    EqZero = 1,
    LtZero = 2,
    LteZero = 3,
}

impl From<u8> for CompareMethod {
    fn from(v: u8) -> Self {
        match v & 0x3 {
            0 => CompareMethod::NeZero,
            1 => CompareMethod::EqZero,
            2 => CompareMethod::LtZero,
            _ => CompareMethod::LteZero,
        }
    }
}

/// Texture level-of-detail addressing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LodMode {
    None,
    Bias,
    Replace,
    Gradient,
}

impl LodMode {
    pub fn from_bits(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Bias),
            2 => Some(Self::Replace),
            3 => Some(Self::Gradient),
            _ => None,
        }
    }
}

/// Sign test of the test family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompareMode {
    NotEqual,
    LessThan,
    GreaterThan,
    AllLanes,
}

impl From<u8> for CompareMode {
    fn from(v: u8) -> Self {
        match v & 0x3 {
            0 => CompareMode::NotEqual,
            1 => CompareMode::LessThan,
            2 => CompareMode::GreaterThan,
            _ => CompareMode::AllLanes,
        }
    }
}

/// ALU operation feeding a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TestAlu {
    Add,
    Sub,
    Mul,
    Min,
    Max,
    Frc,
    Dp,
    Rcp,
    Rsq,
    Log,
    Exp,
    Dsx,
    Dsy,
    IAdd,
    ISub,
    IMul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Rol,
    Asr,
}

/// Parameters of VTST/VTSTMSK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestParams {
    pub alu: TestAlu,
    pub mode: CompareMode,
    /// Equality counts as a pass
    pub inclusive: bool,
    /// Lane compared by VTST
    pub channel: u8,
    /// Predicate written by VTST
    pub pdst: u8,
}

/// Parameters of SMP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleParams {
    /// Coordinate dimension, 1 to 4
    pub dim: u8,
    pub lod: LodMode,
    /// Format of the values written to the destination
    pub dest_format: DataType,
    /// Destination register offset for the second store mode
    pub dest_offset: u32,
}

/// Parameters of VPCK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PackParams {
    pub src_format: DataType,
    pub dest_format: DataType,
    /// Normalise unsigned bytes to and from [0, 1]
    pub scale: bool,
    /// Lanes gathered from src1, then src2, before they are scattered over
    /// the destination mask
    pub src1_mask: u8,
    pub src2_mask: u8,
}

/// Family-specific part of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Extra {
    #[default]
    None,
    /// Conditional move selector
    Move(CompareMethod),
    Test(TestParams),
    Sample(SampleParams),
    Pack(PackParams),
    /// Branch offset in instructions, relative unless `absolute`
    Branch { offset: i32, absolute: bool },
    /// Immediate second operand of a bitwise operation
    Bitwise { immediate: Option<u32> },
    /// Number of lanes summed by a dot product
    Dot { lanes: u8 },
    /// Lane read by a single-lane complex operation
    Scalar { lane: u8 },
}

bitflags! {
    /// Scheduling and flow bits carried by most encodings
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ControlBits: u8 {
        const SYNC_START = 0x01;
        const SKIP_INVALID = 0x02;
        const NO_SCHED = 0x04;
        const END = 0x08;
    }
}

/// One decoded instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub pc: usize,
    pub raw: u64,
    pub opcode: Opcode,
    pub predicate: ExtPredicate,
    /// Additional iterations, 0 for a single execution
    pub repeat: u8,
    pub dest: Option<Operand>,
    /// src0, src1, src2
    pub sources: [Option<Operand>; 3],
    pub data_type: DataType,
    pub write_mask: u8,
    pub control: ControlBits,
    pub extra: Extra,
}

impl Instruction {
    pub fn new(pc: usize, raw: u64, opcode: Opcode) -> Self {
        Self {
            pc,
            raw,
            opcode,
            predicate: ExtPredicate::None,
            repeat: 0,
            dest: None,
            sources: [None; 3],
            data_type: DataType::F32,
            write_mask: 0,
            control: ControlBits::empty(),
            extra: Extra::None,
        }
    }

    pub fn src(&self, index: usize) -> Option<&Operand> {
        self.sources.get(index).and_then(|s| s.as_ref())
    }

    /// Absolute branch target, `None` for non-branches
    pub fn branch_target(&self) -> Option<i64> {
        match self.extra {
            Extra::Branch { offset, absolute } if self.opcode == Opcode::Br => {
                if absolute {
                    Some(offset as i64)
                } else {
                    Some(self.pc as i64 + offset as i64)
                }
            }
            _ => None,
        }
    }

    /// Expand the repeat count into one instruction per iteration
    pub fn unroll_repeats(&self) -> Vec<Instruction> {
        (0..=self.repeat as u32)
            .map(|i| {
                let mut inst = self.clone();
                inst.repeat = 0;
                if let Some(dest) = inst.dest.as_mut() {
                    dest.num += crate::operand::repeat_stride(dest) * i;
                }
                for src in inst.sources.iter_mut().flatten() {
                    src.num += crate::operand::repeat_stride(src) * i;
                }
                if self.opcode == Opcode::Vdp && i != 0 {
                    let shift = i % 4;
                    let mask = self.write_mask & 0xF;
                    inst.write_mask = ((mask << shift) | (mask >> (4 - shift))) & 0xF;
                }
                inst
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_register() {
        assert_eq!(ExtPredicate::from(1).register(), Some((0, false)));
        assert_eq!(ExtPredicate::from(6).register(), Some((1, true)));
        assert_eq!(ExtPredicate::None.register(), None);
        assert_eq!(
            ExtPredicate::from(ShortPredicate::NegP0),
            ExtPredicate::NegP0
        );
    }

    #[test]
    fn test_branch_target() {
        let mut inst = Instruction::new(10, 0, Opcode::Br);
        inst.extra = Extra::Branch {
            offset: -4,
            absolute: false,
        };
        assert_eq!(inst.branch_target(), Some(6));

        inst.extra = Extra::Branch {
            offset: 3,
            absolute: true,
        };
        assert_eq!(inst.branch_target(), Some(3));
    }

    #[test]
    fn test_unroll_repeats() {
        let mut inst = Instruction::new(0, 0, Opcode::Vadd);
        inst.repeat = 2;
        inst.dest = Some(Operand::new(RegisterBank::Temp, 4, DataType::F32));
        inst.sources[1] = Some(Operand::new(RegisterBank::PrimAttr, 0, DataType::F32));
        inst.sources[2] = Some(Operand::new(RegisterBank::Immediate, 7, DataType::F32));

        let unrolled = inst.unroll_repeats();
        assert_eq!(unrolled.len(), 3);
        assert_eq!(unrolled[2].dest.map(|d| d.num), Some(8));
        assert_eq!(unrolled[2].sources[1].map(|s| s.num), Some(4));
        assert_eq!(unrolled[2].sources[2].map(|s| s.num), Some(7));
        assert!(unrolled.iter().all(|i| i.repeat == 0));
    }
}
