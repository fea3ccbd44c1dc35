//! USSE instruction decoder
//!
//! Decodes 64-bit USSE words into [`Instruction`] records in two tiers: the
//! primary opcode in bits 63..59 picks an encoding family, then a family
//! decoder extracts its fields with explicit shifts and masks.

use crate::operand::{
    check_limit, decode_dest_bank, decode_modifier, decode_src0_bank, decode_src12_bank,
    decode_write_mask, finalize, RegisterField,
};
use crate::swizzle::{decode_swizzle4, decode_vec34, SwizzleKind, VMAD2_SRC0, VMAD2_SRC1, VMAD2_SRC2};
use crate::types::*;
use tracing::{trace, warn};
use vs_core::DecodeError;

/// Per-instruction decoding state, passed explicitly to every family decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeContext {
    pub phase: Phase,
    pub pc: usize,
    pub program_type: ProgramType,
}

impl DecodeContext {
    pub fn new(phase: Phase, pc: usize, program_type: ProgramType) -> Self {
        Self {
            phase,
            pc,
            program_type,
        }
    }

    fn reserved(&self, field: &'static str, value: u32) -> DecodeError {
        DecodeError::Reserved {
            pc: self.pc,
            field,
            value,
        }
    }
}

/// Encoding family selected by the first decode tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Vmov,
    Vmad,
    Vmad2,
    Vnmad32,
    Vnmad16,
    Vpck,
    Sop2,
    Vtst,
    Vtstmsk,
    Vbw,
    Phas,
    Nop,
    Br,
    Smlsi,
    Kill,
    Spec,
    Smp,
    Vcomp,
    Vdp,
    Vdual,
    Vldst,
}

const KILL_MASK: u64 = 0xFF3F_F9FF_FFFF_FFFF;
const KILL_VALUE: u64 = 0xF930_0006_F000_0000;

#[inline]
fn bits(word: u64, hi: u32, lo: u32) -> u32 {
    ((word >> lo) & ((1u64 << (hi - lo + 1)) - 1)) as u32
}

#[inline]
fn bit(word: u64, n: u32) -> bool {
    (word >> n) & 1 != 0
}

/// First tier: pick the family of a word. Families are tried in a fixed
/// order and the first match wins.
pub fn classify(word: u64) -> Option<Family> {
    let op1 = bits(word, 63, 59);
    let family = match op1 {
        0b00111 => Family::Vmov,
        0b00011 if bit(word, 53) => Family::Vmad,
        0b00000 => Family::Vmad2,
        0b00001 => Family::Vnmad32,
        0b00010 => Family::Vnmad16,
        0b01000 => Family::Vpck,
        0b10000 => Family::Sop2,
        0b01001 => Family::Vtst,
        0b01111 => Family::Vtstmsk,
        0b01010..=0b01110 => Family::Vbw,
        0b11111 => classify_special(word),
        0b11100 => Family::Smp,
        0b00110 => Family::Vcomp,
        0b00011 => Family::Vdp,
        0b00100 | 0b00101 => Family::Vdual,
        0b11101 | 0b11110 => Family::Vldst,
        _ => return None,
    };
    Some(family)
}

fn classify_special(word: u64) -> Family {
    let sub = bits(word, 54, 52);
    if sub == 0b100 {
        Family::Phas
    } else if sub == 0 && bits(word, 40, 38) == 0b101 {
        Family::Nop
    } else if sub == 0 && bits(word, 40, 39) == 0 {
        Family::Br
    } else if bits(word, 58, 56) == 0b010 && bits(word, 53, 52) == 0b01 {
        Family::Smlsi
    } else if word & KILL_MASK == KILL_VALUE {
        Family::Kill
    } else {
        Family::Spec
    }
}

/// Decode one instruction word
pub fn decode(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    let Some(family) = classify(word) else {
        return Err(DecodeError::InvalidOpcode { pc: ctx.pc, word });
    };

    let inst = match family {
        Family::Vmov => decode_vmov(word, ctx)?,
        Family::Vmad => decode_vmad(word, ctx)?,
        Family::Vmad2 => decode_vmad2(word, ctx)?,
        Family::Vnmad32 => decode_vnmad(word, ctx, DataType::F32)?,
        Family::Vnmad16 => decode_vnmad(word, ctx, DataType::F16)?,
        Family::Vpck => decode_vpck(word, ctx)?,
        Family::Vtst => decode_vtst(word, ctx)?,
        Family::Vtstmsk => decode_vtstmsk(word, ctx)?,
        Family::Vbw => decode_vbw(word, ctx)?,
        Family::Br => decode_br(word, ctx),
        Family::Kill => decode_kill(word, ctx)?,
        Family::Smp => decode_smp(word, ctx)?,
        Family::Vcomp => decode_vcomp(word, ctx)?,
        Family::Vdp => decode_vdp(word, ctx)?,
        Family::Phas => no_op(word, ctx, Opcode::Phas),
        Family::Nop => no_op(word, ctx, Opcode::Nop),
        Family::Smlsi => no_op(word, ctx, Opcode::Smlsi),
        Family::Spec => no_op(word, ctx, Opcode::Spec),
        Family::Vdual => return Err(unimplemented(ctx, Opcode::Vdual)),
        Family::Sop2 => return Err(unimplemented(ctx, Opcode::Sop2)),
        Family::Vldst => return Err(unimplemented(ctx, Opcode::Vldst)),
    };

    check_operands(&inst, ctx)?;
    trace!("{:04}: {:016x} {}", ctx.pc, word, inst.opcode.name());
    Ok(inst)
}

/// Decode a whole phase. Contained failures are logged and leave an
/// `Invalid` placeholder so program counters keep lining up with branch
/// offsets; any other failure is returned.
pub fn decode_phase(
    words: &[u64],
    phase: Phase,
    program_type: ProgramType,
) -> Result<Vec<Instruction>, DecodeError> {
    let mut out = Vec::with_capacity(words.len());
    for (pc, &word) in words.iter().enumerate() {
        let ctx = DecodeContext::new(phase, pc, program_type);
        match decode(word, &ctx) {
            Ok(inst) => out.push(inst),
            Err(e) if e.is_contained() => {
                warn!("Skipping instruction at {} pc {}: {}", phase.name(), pc, e);
                out.push(Instruction::new(pc, word, Opcode::Invalid));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

fn unimplemented(ctx: &DecodeContext, opcode: Opcode) -> DecodeError {
    DecodeError::Unimplemented {
        pc: ctx.pc,
        opcode: opcode.name(),
    }
}

fn check_operands(inst: &Instruction, ctx: &DecodeContext) -> Result<(), DecodeError> {
    if let Some(dest) = &inst.dest {
        check_limit(dest, ctx.phase, true)?;
    }
    for src in inst.sources.iter().flatten() {
        check_limit(src, ctx.phase, false)?;
    }
    Ok(())
}

//=============================================================================
// OPERAND HELPERS
//=============================================================================

/// Register field layout shared by the operands of one instruction
#[derive(Debug, Clone, Copy)]
struct Regs {
    double: bool,
    reg_bits: u8,
}

impl Regs {
    fn new(double: bool, reg_bits: u8) -> Self {
        Self { double, reg_bits }
    }

    fn dest(self, n: u32, sel: u32, ext: bool, dt: DataType, ctx: &DecodeContext) -> Operand {
        let bank = decode_dest_bank(sel as u8, ext);
        finalize(RegisterField::new(n, bank, self.double, self.reg_bits), dt, ctx.phase)
    }

    fn src0(self, n: u32, sel: u32, ext: bool, dt: DataType, ctx: &DecodeContext) -> Operand {
        let bank = decode_src0_bank(sel as u8, ext);
        finalize(RegisterField::new(n, bank, self.double, self.reg_bits), dt, ctx.phase)
    }

    fn src12(self, n: u32, sel: u32, ext: bool, dt: DataType, ctx: &DecodeContext) -> Operand {
        let bank = decode_src12_bank(sel as u8, ext);
        finalize(RegisterField::new(n, bank, self.double, self.reg_bits), dt, ctx.phase)
    }
}

fn internal(n: u32, swizzle: Swizzle4) -> Operand {
    Operand::new(RegisterBank::FpInternal, n, DataType::F32).with_swizzle(swizzle)
}

fn flags(neg: bool, abs: bool) -> RegisterFlags {
    let mut f = RegisterFlags::empty();
    f.set(RegisterFlags::NEGATIVE, neg);
    f.set(RegisterFlags::ABSOLUTE, abs);
    f
}

fn header(word: u64, ctx: &DecodeContext, opcode: Opcode, predicate: ExtPredicate) -> Instruction {
    let mut inst = Instruction::new(ctx.pc, word, opcode);
    inst.predicate = predicate;
    inst.control.set(ControlBits::SKIP_INVALID, bit(word, 55));
    inst
}

fn ext_predicate(word: u64) -> ExtPredicate {
    ExtPredicate::from(bits(word, 58, 56) as u8)
}

//=============================================================================
// MOVES
//=============================================================================

fn decode_vmov(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    let move_type = bits(word, 47, 46);
    let opcode = match move_type {
        0 => Opcode::Vmov,
        1 => Opcode::Vmovc,
        2 => Opcode::Vmovcu8,
        _ => return Err(ctx.reserved("move type", move_type)),
    };

    let dt = DataType::from(bits(word, 42, 40) as u8);
    let double = matches!(dt, DataType::C10 | DataType::F16 | DataType::F32);
    let regs = Regs::new(double, if double { 7 } else { 6 });

    let mut inst = header(word, ctx, opcode, ext_predicate(word));
    inst.data_type = dt;
    inst.repeat = bits(word, 45, 44) as u8;
    inst.write_mask = bits(word, 27, 24) as u8;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 43));

    let swizzle = decode_vec34(bits(word, 38, 35) as u8, false, SwizzleKind::Vec4);
    inst.dest = Some(regs.dest(bits(word, 23, 18), bits(word, 33, 32), bit(word, 51), dt, ctx));
    let src1 = regs
        .src12(bits(word, 11, 6), bits(word, 31, 30), bit(word, 49), dt, ctx)
        .with_swizzle(swizzle);
    inst.sources[1] = Some(src1);

    if opcode == Opcode::Vmov {
        inst.control.set(ControlBits::END, bit(word, 50));
        return Ok(inst);
    }

    let method = CompareMethod::from(((bits(word, 54, 54) << 1) | bits(word, 39, 39)) as u8);
    let cond_type = if opcode == Opcode::Vmovcu8 { DataType::U8 } else { dt };
    let mut src0 = regs.src0(bits(word, 17, 12), bits(word, 34, 34), bit(word, 50), cond_type, ctx);
    if bit(word, 53) {
        src0.swizzle = swizzle;
    }
    let src2 = regs
        .src12(bits(word, 5, 0), bits(word, 29, 28), bit(word, 48), dt, ctx)
        .with_swizzle(swizzle);

    inst.sources[0] = Some(src0);
    inst.sources[2] = Some(src2);
    inst.extra = Extra::Move(method);
    Ok(inst)
}

fn decode_vpck(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    const FORMATS: [DataType; 8] = [
        DataType::U8,
        DataType::S8,
        DataType::O8,
        DataType::U16,
        DataType::S16,
        DataType::F16,
        DataType::F32,
        DataType::C10,
    ];

    let src_fmt = bits(word, 43, 41);
    let dest_fmt = bits(word, 40, 38);
    let src_type = FORMATS[src_fmt as usize];
    let dest_type = FORMATS[dest_fmt as usize];

    // Fixed point only converts to and from floats
    let integer = |t: DataType| !t.is_float();
    if (src_type == DataType::C10 && integer(dest_type))
        || (dest_type == DataType::C10 && integer(src_type))
    {
        return Err(ctx.reserved("pack format", (dest_fmt << 3) | src_fmt));
    }

    let mut inst = header(word, ctx, Opcode::Vpck, ext_predicate(word));
    inst.data_type = dest_type;
    inst.repeat = bits(word, 46, 44) as u8;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));
    inst.control.set(ControlBits::END, bit(word, 50));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 54));

    let dest_mask = bits(word, 37, 34) as u8;
    inst.write_mask = dest_mask;
    inst.dest = Some(Regs::new(false, 7).dest(
        bits(word, 27, 21),
        bits(word, 33, 32),
        bit(word, 51),
        dest_type,
        ctx,
    ));

    let comp0_bit1 = bits(word, 7, 7);
    let src2_n = bits(word, 6, 1);
    let src1_float = src_type.is_float();
    let src1_n = if src1_float {
        bits(word, 13, 8)
    } else {
        comp0_bit1 | (bits(word, 13, 8) << 1)
    };
    let mut src1 = Regs::new(src1_float, 7).src12(src1_n, bits(word, 31, 30), bit(word, 49), src_type, ctx);

    let comp_sel_0 = bits(word, 0, 0)
        | if src_type == DataType::F32 {
            comp0_bit1 << 1
        } else {
            (src2_n & 1) << 1
        };
    src1.swizzle = [
        SwizzleChannel::from(comp_sel_0 as u8),
        SwizzleChannel::from(bits(word, 17, 16) as u8),
        SwizzleChannel::from(bits(word, 15, 14) as u8),
        SwizzleChannel::from(bits(word, 20, 19) as u8),
    ];

    let scale = bit(word, 18);
    let first_lane = (0..4).find(|i| dest_mask & (1 << i) != 0).unwrap_or(0);
    let mut src1_mask = dest_mask;
    let mut src2_mask = 0;

    if src_type == DataType::F32 {
        let mut src2 = Regs::new(true, 7).src12(src2_n, bits(word, 29, 28), bit(word, 48), src_type, ctx);
        let count = dest_mask.count_ones();
        let src1_lanes = (count + 1) >> 1;
        let src2_lanes = count - src1_lanes;
        let contiguous = src1.bank == src2.bank && src1.num + src1_lanes == src2.num;

        if src2_lanes != 0 && !contiguous && src2.bank != RegisterBank::Immediate {
            const SRC1_LOAD: [u8; 3] = [0, 0b1, 0b11];
            const SRC2_LOAD: [u8; 3] = [0, 0b10, 0b1100];
            let shifted = dest_mask >> first_lane;
            src1_mask = (shifted & SRC1_LOAD[src1_lanes as usize]) << first_lane;
            src2_mask = ((shifted & SRC2_LOAD[src2_lanes as usize]) >> src1_lanes) << first_lane;

            // src2 continues the src1 swizzle from its register distance
            let start = (src2.num.wrapping_sub(src1.num) % 4) as usize;
            for i in start..4 {
                src2.swizzle[i - start] = src1.swizzle[i];
            }
        }
        inst.sources[2] = Some(src2);
    } else {
        let keep = (scale && (src_type == DataType::U8 || dest_type == DataType::U8)) || src1_float;
        if !keep {
            let rotated = src1.swizzle;
            for (i, ch) in rotated.iter().enumerate() {
                src1.swizzle[(i + first_lane) % 4] = *ch;
            }
        }
    }

    inst.sources[1] = Some(src1);
    inst.extra = Extra::Pack(PackParams {
        src_format: src_type,
        dest_format: dest_type,
        scale,
        src1_mask,
        src2_mask,
    });
    Ok(inst)
}

//=============================================================================
// ARITHMETIC
//=============================================================================

fn decode_vmad(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    let kind = if bit(word, 52) {
        SwizzleKind::Vec4
    } else {
        SwizzleKind::Vec3
    };
    let regs = Regs::new(true, 7);

    let mut inst = header(word, ctx, Opcode::Vmad, ext_predicate(word));
    inst.repeat = bits(word, 45, 44) as u8;
    inst.write_mask = bits(word, 42, 39) as u8;
    inst.control.set(ControlBits::END, bit(word, 50));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 43));

    let mut src0 = internal(bits(word, 29, 28), decode_vec34(bits(word, 21, 18) as u8, bit(word, 34), kind));
    src0.flags = flags(bit(word, 11), bit(word, 46));

    let mut src1 = regs
        .src12(bits(word, 5, 0), bits(word, 31, 30), bit(word, 49), DataType::F32, ctx)
        .with_swizzle(decode_vec34(bits(word, 9, 6) as u8, bit(word, 10), kind));
    src1.flags = flags(bit(word, 38), bit(word, 37));

    let mut src2 = internal(bits(word, 13, 12), decode_vec34(bits(word, 17, 14) as u8, bit(word, 54), kind));
    src2.flags = flags(bit(word, 36), bit(word, 35));

    inst.dest = Some(regs.dest(bits(word, 27, 22), bits(word, 33, 32), bit(word, 51), DataType::F32, ctx));
    inst.sources = [Some(src0), Some(src1), Some(src2)];
    Ok(inst)
}

fn decode_vmad2(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    let f16 = bit(word, 58);
    let dt = if f16 { DataType::F16 } else { DataType::F32 };
    let regs = Regs::new(true, 7);

    // Two-bit field covering the unconditional case and p0 to p2
    let predicate = ExtPredicate::from(bits(word, 57, 56) as u8);
    let mut inst = header(word, ctx, Opcode::Vmad, predicate);
    inst.data_type = dt;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 43));

    let src0_swizzle = bits(word, 19, 18) | (bits(word, 53, 53) << 2);
    let mut src0 = regs
        .src0(bits(word, 17, 12), bits(word, 34, 34), false, dt, ctx)
        .with_swizzle(VMAD2_SRC0[src0_swizzle as usize]);
    src0.flags = flags(false, bit(word, 50));

    let src1_swizzle = bits(word, 21, 20) | (bits(word, 44, 44) << 2);
    let mut src1 = regs
        .src12(bits(word, 11, 6), bits(word, 31, 30), bit(word, 49), dt, ctx)
        .with_swizzle(VMAD2_SRC1[src1_swizzle as usize]);
    src1.flags = decode_modifier(bits(word, 38, 37) as u8);

    let mut src2 = regs
        .src12(bits(word, 5, 0), bits(word, 29, 28), bit(word, 48), dt, ctx)
        .with_swizzle(VMAD2_SRC2[bits(word, 47, 45) as usize]);
    src2.flags = decode_modifier(bits(word, 36, 35) as u8);

    let dest = regs.dest(bits(word, 27, 22), bits(word, 33, 32), false, dt, ctx);
    inst.write_mask = decode_write_mask(dest.bank, bits(word, 42, 39) as u8, f16);
    inst.dest = Some(dest);
    inst.sources = [Some(src0), Some(src1), Some(src2)];
    Ok(inst)
}

fn decode_vnmad(word: u64, ctx: &DecodeContext, dt: DataType) -> Result<Instruction, DecodeError> {
    const OPS: [Opcode; 8] = [
        Opcode::Vmul,
        Opcode::Vadd,
        Opcode::Vfrc,
        Opcode::Vdsx,
        Opcode::Vdsy,
        Opcode::Vmin,
        Opcode::Vmax,
        Opcode::Vdp,
    ];
    let opcode = OPS[bits(word, 14, 12) as usize];
    let regs = Regs::new(true, 7);

    let mut inst = header(word, ctx, opcode, ext_predicate(word));
    inst.data_type = dt;
    inst.write_mask = bits(word, 42, 39) as u8;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 43));

    let src1_swizzle = bits(word, 21, 15)
        | (bits(word, 35, 34) << 7)
        | (bits(word, 50, 50) << 9)
        | (bits(word, 54, 53) << 10);
    let mut src1 = regs
        .src12(bits(word, 11, 6), bits(word, 31, 30), bit(word, 49), dt, ctx)
        .with_swizzle(decode_swizzle4(src1_swizzle));
    src1.flags = decode_modifier(bits(word, 38, 37) as u8);

    let mut src2 = regs
        .src12(bits(word, 5, 0), bits(word, 29, 28), bit(word, 48), dt, ctx)
        .with_swizzle(decode_vec34(bits(word, 47, 44) as u8, false, SwizzleKind::Vec4));
    src2.flags = flags(false, bit(word, 36));

    inst.dest = Some(regs.dest(bits(word, 27, 22), bits(word, 33, 32), bit(word, 51), dt, ctx));
    inst.sources[1] = Some(src1);
    inst.sources[2] = Some(src2);
    if opcode == Opcode::Vdp {
        inst.extra = Extra::Dot { lanes: 4 };
    }
    Ok(inst)
}

fn decode_vdp(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    let vec4 = bit(word, 52);
    let regs = Regs::new(true, 7);

    let mut inst = header(word, ctx, Opcode::Vdp, ext_predicate(word));
    inst.repeat = bits(word, 45, 44) as u8;
    inst.write_mask = bits(word, 42, 39) as u8;
    inst.control.set(ControlBits::END, bit(word, 50));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 43));
    if bit(word, 54) {
        trace!("Clip plane {} output ignored at pc {}", bits(word, 36, 34), ctx.pc);
    }

    let swizzle = [
        SwizzleChannel::from(bits(word, 8, 6) as u8),
        SwizzleChannel::from(bits(word, 11, 9) as u8),
        SwizzleChannel::from(bits(word, 14, 12) as u8),
        SwizzleChannel::from(bits(word, 17, 15) as u8),
    ];
    let mut src1 = regs
        .src12(bits(word, 5, 0), bits(word, 31, 30), bit(word, 49), DataType::F32, ctx)
        .with_swizzle(swizzle);
    src1.flags = flags(bit(word, 38), bit(word, 37));

    let kind = if vec4 { SwizzleKind::Vec4 } else { SwizzleKind::Vec3 };
    let mut src2 = internal(bits(word, 29, 28), decode_vec34(bits(word, 21, 18) as u8, false, kind));
    src2.flags = flags(false, bit(word, 46));

    inst.dest = Some(regs.dest(bits(word, 27, 22), bits(word, 33, 32), bit(word, 51), DataType::F32, ctx));
    inst.sources[1] = Some(src1);
    inst.sources[2] = Some(src2);
    inst.extra = Extra::Dot {
        lanes: if vec4 { 4 } else { 3 },
    };
    Ok(inst)
}

fn decode_vcomp(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    const OPS: [Opcode; 4] = [Opcode::Vrcp, Opcode::Vrsq, Opcode::Vlog, Opcode::Vexp];
    const TYPES: [DataType; 3] = [DataType::F32, DataType::F16, DataType::C10];

    let src_type = bits(word, 40, 39);
    let dest_type = bits(word, 54, 53);
    let Some(&src_dt) = TYPES.get(src_type as usize) else {
        return Err(ctx.reserved("complex source type", src_type));
    };
    let Some(&dest_dt) = TYPES.get(dest_type as usize) else {
        return Err(ctx.reserved("complex destination type", dest_type));
    };
    let regs = Regs::new(true, 8);

    let mut inst = header(word, ctx, OPS[bits(word, 42, 41) as usize], ext_predicate(word));
    inst.data_type = dest_dt;
    inst.repeat = bits(word, 47, 44) as u8;
    inst.write_mask = bits(word, 3, 0) as u8;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));
    inst.control.set(ControlBits::END, bit(word, 50));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 43));

    let mut src1 = regs.src12(bits(word, 13, 7), bits(word, 31, 30), bit(word, 49), src_dt, ctx);
    src1.flags = decode_modifier(bits(word, 38, 37) as u8);

    inst.dest = Some(regs.dest(bits(word, 27, 21), bits(word, 33, 32), bit(word, 51), dest_dt, ctx));
    inst.sources[1] = Some(src1);
    inst.extra = Extra::Scalar {
        lane: bits(word, 36, 35) as u8,
    };
    Ok(inst)
}

//=============================================================================
// TESTS
//=============================================================================

/// ALU operation and working type of a test instruction
fn decode_test_alu(alu_sel: u32, alu_op: u32, prec: bool, ctx: &DecodeContext) -> Result<(TestAlu, DataType), DecodeError> {
    use TestAlu::*;

    let decoded = match alu_sel {
        0 => {
            let dt = if prec { DataType::F32 } else { DataType::F16 };
            let alu = match alu_op {
                2 => Add,
                3 => Frc,
                4 => Rcp,
                5 => Rsq,
                6 => Log,
                7 => Exp,
                8 => Dp,
                9 => Min,
                10 => Max,
                11 => Dsx,
                12 => Dsy,
                13 => Mul,
                14 => Sub,
                _ => return Err(ctx.reserved("test operation", alu_op)),
            };
            (alu, dt)
        }
        1 => match alu_op {
            6 => (IAdd, DataType::S16),
            7 => (ISub, DataType::S16),
            8 => (IMul, DataType::S16),
            9 => (IAdd, DataType::U16),
            10 => (ISub, DataType::U16),
            11 => (IMul, DataType::U16),
            12 => (IAdd, DataType::S32),
            13 => (IAdd, DataType::U32),
            14 => (ISub, DataType::S32),
            15 => (ISub, DataType::U32),
            _ => return Err(ctx.reserved("test operation", alu_op)),
        },
        2 => {
            let alu = match alu_op {
                0 | 2 | 7 => IAdd,
                1 | 3 | 8 => ISub,
                4..=6 => IMul,
                _ => return Err(ctx.reserved("test operation", alu_op)),
            };
            (alu, DataType::U8)
        }
        _ => {
            let alu = match alu_op {
                0 => And,
                1 => Or,
                2 => Xor,
                3 => Shl,
                4 => Shr,
                5 => Rol,
                7 => Asr,
                _ => return Err(ctx.reserved("test operation", alu_op)),
            };
            (alu, DataType::U32)
        }
    };
    Ok(decoded)
}

fn decode_vtst(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    let alu_sel = bits(word, 19, 18);
    let (alu, dt) = decode_test_alu(alu_sel, bits(word, 17, 14), bit(word, 47), ctx)?;

    let channel = bits(word, 38, 36);
    if channel >= 4 {
        return Err(ctx.reserved("test channel", channel));
    }
    let double = alu_sel == 0;
    let regs = Regs::new(double, if double { 8 } else { 7 });

    let mut inst = header(word, ctx, Opcode::Vtst, ext_predicate(word));
    inst.data_type = dt;
    inst.repeat = bits(word, 45, 44) as u8;
    inst.write_mask = 1 << channel;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));

    let mut src1 = regs.src12(bits(word, 13, 7), bits(word, 31, 30), bit(word, 49), dt, ctx);
    src1.flags = flags(bit(word, 50), false);
    let mut src2 = regs.src12(bits(word, 6, 0), bits(word, 29, 28), bit(word, 48), dt, ctx);
    if bit(word, 46) && double {
        src2.swizzle = [SwizzleChannel::X; 4];
    }

    let pdst = bits(word, 35, 34) as u8;
    if bit(word, 20) {
        trace!("Test register write ignored at pc {}", ctx.pc);
    }
    inst.dest = Some(Operand::new(RegisterBank::Predicate, pdst as u32, dt));
    inst.sources[1] = Some(src1);
    inst.sources[2] = Some(src2);
    inst.extra = Extra::Test(TestParams {
        alu,
        mode: CompareMode::from(bits(word, 43, 42) as u8),
        inclusive: bits(word, 41, 40) == 1,
        channel: channel as u8,
        pdst,
    });
    Ok(inst)
}

fn decode_vtstmsk(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    const MASK_TYPES: [DataType; 3] = [DataType::U8, DataType::F16, DataType::F32];

    let alu_sel = bits(word, 19, 18);
    let (alu, dt) = decode_test_alu(alu_sel, bits(word, 17, 14), bit(word, 47), ctx)?;

    let mask_type = bits(word, 37, 36);
    let Some(&dest_dt) = MASK_TYPES.get(mask_type as usize) else {
        return Err(ctx.reserved("test mask type", mask_type));
    };
    if !bit(word, 20) {
        return Err(unimplemented(ctx, Opcode::Vtstmsk));
    }
    let regs = Regs::new(alu_sel == 0, 8);

    let mut inst = header(word, ctx, Opcode::Vtstmsk, ext_predicate(word));
    inst.data_type = dt;
    inst.repeat = bits(word, 45, 44) as u8;
    inst.write_mask = 0b1111;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));

    let mut src1 = regs.src12(bits(word, 13, 7), bits(word, 31, 30), bit(word, 49), dt, ctx);
    src1.flags = flags(bit(word, 50), false);
    let mut src2 = regs.src12(bits(word, 6, 0), bits(word, 29, 28), bit(word, 48), dt, ctx);
    if bit(word, 46) {
        src2.swizzle = [SwizzleChannel::X; 4];
    }

    inst.dest = Some(regs.dest(bits(word, 27, 21), bits(word, 33, 32), bit(word, 51), dest_dt, ctx));
    inst.sources[1] = Some(src1);
    inst.sources[2] = Some(src2);
    inst.extra = Extra::Test(TestParams {
        alu,
        mode: CompareMode::from(bits(word, 43, 42) as u8),
        inclusive: bits(word, 41, 40) == 1,
        channel: 0,
        pdst: 0,
    });
    Ok(inst)
}

//=============================================================================
// INTEGER
//=============================================================================

fn decode_vbw(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    let alt = bit(word, 35);
    let opcode = match (bits(word, 61, 59), alt) {
        (0b010, false) => Opcode::And,
        (0b010, true) => Opcode::Or,
        (0b011, _) => Opcode::Xor,
        (0b100, false) => Opcode::Shl,
        (0b100, true) => Opcode::Rol,
        (0b101, false) => Opcode::Shr,
        (0b101, true) => Opcode::Asr,
        _ => {
            return Err(DecodeError::TierMismatch {
                pc: ctx.pc,
                opcode: "VBW",
            })
        }
    };
    let regs = Regs::new(false, 7);
    let dt = DataType::U32;

    let mut inst = header(word, ctx, opcode, ext_predicate(word));
    inst.data_type = dt;
    inst.repeat = bits(word, 47, 44) as u8;
    inst.write_mask = 0b0001;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));
    inst.control.set(ControlBits::END, bit(word, 50));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 54));

    let src2_ext = bit(word, 48);
    let src1 = regs.src12(bits(word, 13, 7), bits(word, 31, 30), bit(word, 49), dt, ctx);
    let src2 = regs.src12(bits(word, 6, 0), bits(word, 29, 28), src2_ext, dt, ctx);

    let immediate = (src2_ext && src2.bank == RegisterBank::Immediate).then(|| {
        let mut value = bits(word, 6, 0) | (bits(word, 20, 14) << 7) | (bits(word, 37, 36) << 14);
        if bit(word, 43) {
            value = !value;
        }
        value.rotate_left(bits(word, 42, 38))
    });

    inst.dest = Some(regs.dest(bits(word, 27, 21), bits(word, 33, 32), bit(word, 51), dt, ctx));
    inst.sources[1] = Some(src1);
    inst.sources[2] = Some(src2);
    inst.extra = Extra::Bitwise { immediate };
    Ok(inst)
}

//=============================================================================
// TEXTURE
//=============================================================================

fn decode_smp(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    const DEST_FORMATS: [DataType; 4] = [DataType::F32, DataType::U8, DataType::F16, DataType::F32];

    let lod_bits = bits(word, 41, 40);
    let lod = LodMode::from_bits(lod_bits as u8).ok_or(DecodeError::UnsupportedSampleMode(lod_bits as u8))?;
    let dest_offset = match bits(word, 38, 37) {
        0 | 1 => 0,
        3 => 4,
        mode => return Err(ctx.reserved("sample store mode", mode)),
    };
    let dest_format = DEST_FORMATS[bits(word, 47, 46) as usize];
    let coord_type = match bits(word, 36, 35) {
        0 => DataType::F32,
        1 => DataType::F16,
        _ => DataType::C10,
    };
    let regs = Regs::new(true, 7);

    let mut inst = header(word, ctx, Opcode::Smp, ext_predicate(word));
    inst.data_type = dest_format;
    inst.write_mask = 0b1111;
    inst.control.set(ControlBits::SYNC_START, bit(word, 52));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 54));

    let dest_bank = if bit(word, 39) {
        RegisterBank::PrimAttr
    } else {
        RegisterBank::Temp
    };
    inst.dest = Some(Operand::new(dest_bank, bits(word, 27, 21), dest_format));
    inst.sources[0] = Some(regs.src0(bits(word, 20, 14), bits(word, 34, 34), bit(word, 50), coord_type, ctx));
    inst.sources[1] = Some(regs.src12(bits(word, 13, 7), bits(word, 31, 30), bit(word, 49), DataType::U32, ctx));
    if lod != LodMode::None {
        inst.sources[2] = Some(regs.src12(bits(word, 6, 0), bits(word, 29, 28), bit(word, 48), DataType::F32, ctx));
    }
    inst.extra = Extra::Sample(SampleParams {
        dim: bits(word, 43, 42) as u8 + 1,
        lod,
        dest_format,
        dest_offset,
    });
    Ok(inst)
}

//=============================================================================
// FLOW CONTROL
//=============================================================================

fn decode_br(word: u64, ctx: &DecodeContext) -> Instruction {
    let raw = bits(word, 19, 0);
    // 20-bit two's complement
    let offset = ((raw << 12) as i32) >> 12;

    let mut inst = header(word, ctx, Opcode::Br, ext_predicate(word));
    inst.control.set(ControlBits::NO_SCHED, bit(word, 43));
    inst.extra = Extra::Branch {
        offset,
        absolute: bit(word, 38),
    };
    inst
}

fn decode_kill(word: u64, ctx: &DecodeContext) -> Result<Instruction, DecodeError> {
    if ctx.program_type != ProgramType::Fragment {
        return Err(DecodeError::TierMismatch {
            pc: ctx.pc,
            opcode: Opcode::Kill.name(),
        });
    }
    let predicate = ExtPredicate::from(ShortPredicate::from(bits(word, 42, 41) as u8));
    Ok(header(word, ctx, Opcode::Kill, predicate))
}

fn no_op(word: u64, ctx: &DecodeContext, opcode: Opcode) -> Instruction {
    trace!("{} at pc {} has no effect", opcode.name(), ctx.pc);
    Instruction::new(ctx.pc, word, opcode)
}
