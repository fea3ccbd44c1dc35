//! Lowering of decoded instructions onto [`Backend`] primitives
//!
//! Every lane is read through the operand model, converted from its declared
//! register type to the type the instruction computes in, and written back
//! through the inverse conversion. All lanes are read before any lane is
//! written, so an instruction whose destination overlaps a source sees the
//! old values.

use tracing::trace;

use super::{Backend, BinaryOp, Lod, SampleRequest, ScalarKind, UnaryOp};
use crate::binding::BindingPlan;
use crate::compare::CompareOp;
use crate::operand::{coercion, resolve, Coercion, LanePart, Resolved, StorageRef};
use crate::types::{
    DataType, Extra, Instruction, LodMode, Opcode, Operand, Phase, RegisterBank, RegisterFlags, TestAlu,
};
use vs_core::DecodeError;

/// Per-phase state the lowering needs besides the instruction
#[derive(Debug, Clone, Copy)]
pub struct LowerContext<'a> {
    pub phase: Phase,
    pub plan: &'a BindingPlan,
}

impl<'a> LowerContext<'a> {
    pub fn new(phase: Phase, plan: &'a BindingPlan) -> Self {
        Self { phase, plan }
    }
}

/// Type an instruction of `data_type` computes in
pub fn working_type(data_type: DataType) -> DataType {
    if data_type.is_float() {
        DataType::F32
    } else {
        data_type
    }
}

fn lanes(mask: u8) -> impl Iterator<Item = usize> {
    (0..4).filter(move |l| mask & (1 << l) != 0)
}

fn missing(inst: &Instruction, what: &'static str) -> DecodeError {
    DecodeError::Unimplemented {
        pc: inst.pc,
        opcode: what,
    }
}

fn operand<'i>(inst: &'i Instruction, index: usize) -> Result<&'i Operand, DecodeError> {
    inst.src(index).ok_or_else(|| missing(inst, "missing source operand"))
}

fn destination(inst: &Instruction) -> Result<&Operand, DecodeError> {
    inst.dest.as_ref().ok_or_else(|| missing(inst, "missing destination"))
}

//=============================================================================
// STORAGE ACCESS
//=============================================================================

fn load_bits<B: Backend + ?Sized>(b: &mut B, r: StorageRef) -> B::Value {
    let raw = b.load_slot(r.slot);
    b.bitcast(raw, ScalarKind::Float, ScalarKind::Uint)
}

fn unorm8<B: Backend + ?Sized>(b: &mut B, value: B::Value) -> B::Value {
    let clamped = b.unary(UnaryOp::Saturate, ScalarKind::Float, value);
    let scale = b.const_float(255.0);
    let scaled = b.binary(BinaryOp::Mul, ScalarKind::Float, clamped, scale);
    let rounded = b.unary(UnaryOp::Round, ScalarKind::Float, scaled);
    b.convert(rounded, ScalarKind::Float, ScalarKind::Uint)
}

fn from_unorm8<B: Backend + ?Sized>(b: &mut B, byte: B::Value) -> B::Value {
    let value = b.convert(byte, ScalarKind::Uint, ScalarKind::Float);
    let scale = b.const_float(1.0 / 255.0);
    b.binary(BinaryOp::Mul, ScalarKind::Float, value, scale)
}

/// Lane contents as a value of the canonical kind of `declared`
pub fn load_ref<B: Backend + ?Sized>(b: &mut B, r: StorageRef, declared: DataType) -> B::Value {
    let kind = ScalarKind::of(declared);
    if r.part == LanePart::Word {
        let raw = b.load_slot(r.slot);
        return match kind {
            ScalarKind::Float => raw,
            other => b.bitcast(raw, ScalarKind::Float, other),
        };
    }

    let word = load_bits(b, r);
    let offset = r.part.bit_offset();
    let width = r.part.bit_width();
    match declared {
        DataType::F16 => {
            let bits = b.extract_bits(word, offset, 16, false);
            b.half_to_float(bits)
        }
        DataType::C10 => {
            let byte = b.extract_bits(word, offset, 8, false);
            from_unorm8(b, byte)
        }
        DataType::S8 | DataType::S16 | DataType::S32 => b.extract_bits(word, offset, width, true),
        _ => b.extract_bits(word, offset, width, false),
    }
}

/// Write a canonical value of `declared` into its lane, keeping the other
/// lanes of a packed slot
pub fn store_ref<B: Backend + ?Sized>(b: &mut B, r: StorageRef, declared: DataType, value: B::Value) {
    let kind = ScalarKind::of(declared);
    if r.part == LanePart::Word {
        let raw = match kind {
            ScalarKind::Float => value,
            other => b.bitcast(value, other, ScalarKind::Float),
        };
        b.store_slot(r.slot, raw);
        return;
    }

    let bits = match declared {
        DataType::F16 => b.float_to_half(value),
        DataType::C10 => unorm8(b, value),
        DataType::S8 | DataType::S16 | DataType::S32 => b.bitcast(value, ScalarKind::Int, ScalarKind::Uint),
        _ => value,
    };
    store_bits(b, r, bits);
}

/// Write raw unsigned bits into a lane
fn store_bits<B: Backend + ?Sized>(b: &mut B, r: StorageRef, bits: B::Value) {
    let merged = if r.part == LanePart::Word {
        bits
    } else {
        let word = load_bits(b, r);
        b.insert_bits(word, bits, r.part.bit_offset(), r.part.bit_width())
    };
    let raw = b.bitcast(merged, ScalarKind::Uint, ScalarKind::Float);
    b.store_slot(r.slot, raw);
}

/// Canonical `declared` value to the kind of `working`
pub fn to_working<B: Backend + ?Sized>(
    b: &mut B,
    value: B::Value,
    declared: DataType,
    working: DataType,
    normalized: bool,
) -> Result<B::Value, DecodeError> {
    Ok(match coercion(declared, working, normalized)? {
        Coercion::Identity | Coercion::Half | Coercion::Fixed => value,
        Coercion::NormalizedU8 => from_unorm8(b, value),
        Coercion::IntToFloat => b.convert(value, ScalarKind::of(declared), ScalarKind::Float),
        Coercion::FloatToInt => b.convert(value, ScalarKind::Float, ScalarKind::of(working)),
        Coercion::Sign => b.bitcast(value, ScalarKind::of(declared), ScalarKind::of(working)),
    })
}

/// Inverse of [`to_working`]
pub fn from_working<B: Backend + ?Sized>(
    b: &mut B,
    value: B::Value,
    declared: DataType,
    working: DataType,
    normalized: bool,
) -> Result<B::Value, DecodeError> {
    Ok(match coercion(declared, working, normalized)? {
        Coercion::Identity | Coercion::Half | Coercion::Fixed => value,
        Coercion::NormalizedU8 => unorm8(b, value),
        Coercion::IntToFloat => b.convert(value, ScalarKind::Float, ScalarKind::of(declared)),
        Coercion::FloatToInt => b.convert(value, ScalarKind::of(working), ScalarKind::Float),
        Coercion::Sign => b.bitcast(value, ScalarKind::of(working), ScalarKind::of(declared)),
    })
}

fn constant<B: Backend + ?Sized>(b: &mut B, value: f32, kind: ScalarKind) -> B::Value {
    match kind {
        ScalarKind::Float => b.const_float(value),
        ScalarKind::Int => b.const_int(value as i32),
        ScalarKind::Uint => b.const_uint(value as u32),
        ScalarKind::Bool => b.const_bool(value != 0.0),
    }
}

fn immediate<B: Backend + ?Sized>(b: &mut B, value: u32, kind: ScalarKind) -> B::Value {
    match kind {
        ScalarKind::Float => b.const_float(value as f32),
        ScalarKind::Int => b.const_int(value as i32),
        ScalarKind::Uint => b.const_uint(value),
        ScalarKind::Bool => b.const_bool(value != 0),
    }
}

fn apply_modifiers<B: Backend + ?Sized>(b: &mut B, op: &Operand, kind: ScalarKind, mut value: B::Value) -> B::Value {
    if op.flags.contains(RegisterFlags::ABSOLUTE) && kind != ScalarKind::Uint {
        value = b.unary(UnaryOp::Abs, kind, value);
    }
    if op.flags.contains(RegisterFlags::NEGATIVE) {
        value = match kind {
            ScalarKind::Uint => {
                let zero = b.const_uint(0);
                b.binary(BinaryOp::Sub, kind, zero, value)
            }
            _ => b.unary(UnaryOp::Neg, kind, value),
        };
    }
    value
}

/// Read lane `lane` of `op`, moved by `shift` slots, as a `working` value
pub fn read_source<B: Backend + ?Sized>(
    b: &mut B,
    cx: &LowerContext,
    op: &Operand,
    lane: usize,
    shift: u32,
    working: DataType,
    normalized: bool,
) -> Result<B::Value, DecodeError> {
    let kind = ScalarKind::of(working);
    let value = match resolve(op, lane, shift)? {
        Resolved::Constant(c) => constant(b, c, kind),
        Resolved::Immediate(v) => immediate(b, v, kind),
        Resolved::Storage(r) => {
            let raw = load_ref(b, r, op.data_type);
            to_working(b, raw, op.data_type, working, normalized)?
        }
    };
    Ok(apply_modifiers(b, op, kind, value))
}

fn resolve_dest(op: &Operand, lane: usize, shift: u32) -> Result<StorageRef, DecodeError> {
    let as_destination = |e: DecodeError| match e {
        DecodeError::OperandOutOfRange { bank, index, limit, .. } => DecodeError::OperandOutOfRange {
            bank,
            index,
            limit,
            destination: true,
        },
        other => other,
    };
    match resolve(op, lane, shift).map_err(as_destination)? {
        Resolved::Storage(r) => Ok(r),
        _ => Err(DecodeError::OperandOutOfRange {
            bank: op.bank.prefix(),
            index: op.num,
            limit: 0,
            destination: true,
        }),
    }
}

/// Store a `working` value into lane `lane` of `op`
pub fn write_dest<B: Backend + ?Sized>(
    b: &mut B,
    cx: &LowerContext,
    op: &Operand,
    lane: usize,
    shift: u32,
    value: B::Value,
    working: DataType,
    normalized: bool,
) -> Result<(), DecodeError> {
    let target = resolve_dest(op, lane, shift)?;
    let value = from_working(b, value, op.data_type, working, normalized)?;
    store_ref(b, target, op.data_type, value);
    Ok(())
}

//=============================================================================
// DISPATCH
//=============================================================================

/// Lower one instruction, repeats unrolled, under its predicate
pub fn emit_instruction<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    if inst.opcode.is_branch() || inst.opcode.is_no_op() {
        return Ok(());
    }
    trace!("Lowering pc {} {}", inst.pc, inst.opcode.name());

    let guard = if inst.predicate.is_none() {
        None
    } else {
        let (register, negate) = inst.predicate.register().ok_or(DecodeError::Unimplemented {
            pc: inst.pc,
            opcode: "per-lane predicate",
        })?;
        let value = b.load_predicate(register);
        Some(if negate {
            b.unary(UnaryOp::Not, ScalarKind::Bool, value)
        } else {
            value
        })
    };

    if let Some(condition) = guard {
        b.begin_predicated(condition);
    }
    let mut result = Ok(());
    for step in inst.unroll_repeats() {
        result = dispatch(b, cx, &step);
        if result.is_err() {
            break;
        }
    }
    if guard.is_some() {
        b.end_predicated();
    }
    result
}

fn dispatch<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    match inst.opcode {
        Opcode::Vmov | Opcode::Vmovc | Opcode::Vmovcu8 => b.emit_move(cx, inst),
        Opcode::Vmad
        | Opcode::Vdp
        | Opcode::Vmul
        | Opcode::Vadd
        | Opcode::Vsub
        | Opcode::Vfrc
        | Opcode::Vdsx
        | Opcode::Vdsy
        | Opcode::Vmin
        | Opcode::Vmax
        | Opcode::Vrcp
        | Opcode::Vrsq
        | Opcode::Vlog
        | Opcode::Vexp => b.emit_arithmetic(cx, inst),
        Opcode::Vtst | Opcode::Vtstmsk => b.emit_test(cx, inst),
        Opcode::Vpck => b.emit_pack(cx, inst),
        Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr | Opcode::Rol | Opcode::Asr => {
            b.emit_bitwise(cx, inst)
        }
        Opcode::Smp => b.emit_sample(cx, inst),
        Opcode::Kill => b.emit_kill(cx, inst),
        Opcode::Br | Opcode::Nop | Opcode::Phas | Opcode::Spec | Opcode::Smlsi => Ok(()),
        Opcode::Vdual | Opcode::Sop2 | Opcode::Vldst | Opcode::Invalid => {
            b.comment(&format!("pc {}: {} not translated", inst.pc, inst.opcode.name()));
            Ok(())
        }
    }
}

//=============================================================================
// MOVES
//=============================================================================

pub fn emit_move<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    let dest = destination(inst)?;
    let working = working_type(inst.data_type);
    let kind = ScalarKind::of(working);

    let mut values = Vec::with_capacity(4);
    match inst.opcode {
        Opcode::Vmov => {
            let src = operand(inst, 1)?;
            for lane in lanes(inst.write_mask) {
                values.push((lane, read_source(b, cx, src, lane, 0, working, true)?));
            }
        }
        _ => {
            let Extra::Move(method) = inst.extra else {
                return Err(missing(inst, "conditional move without a method"));
            };
            let op = CompareOp::from_method(method);
            let cond_src = operand(inst, 0)?;
            let cond_working = working_type(cond_src.data_type);
            let cond_kind = ScalarKind::of(cond_working);
            let (a_src, b_src) = (operand(inst, 1)?, operand(inst, 2)?);
            for lane in lanes(inst.write_mask) {
                let c = read_source(b, cx, cond_src, lane, 0, cond_working, true)?;
                let zero = constant(b, 0.0, cond_kind);
                let test = b.compare(op, cond_kind, c, zero);
                let a = read_source(b, cx, a_src, lane, 0, working, true)?;
                let other = read_source(b, cx, b_src, lane, 0, working, true)?;
                values.push((lane, b.select(kind, test, a, other)));
            }
        }
    }

    for (lane, value) in values {
        write_dest(b, cx, dest, lane, 0, value, working, true)?;
    }
    Ok(())
}

//=============================================================================
// ARITHMETIC
//=============================================================================

fn scalar_op(opcode: Opcode) -> Option<UnaryOp> {
    match opcode {
        Opcode::Vrsq => Some(UnaryOp::Rsq),
        Opcode::Vlog => Some(UnaryOp::Log2),
        Opcode::Vexp => Some(UnaryOp::Exp2),
        _ => None,
    }
}

fn reciprocal<B: Backend + ?Sized>(b: &mut B, x: B::Value) -> B::Value {
    let one = b.const_float(1.0);
    b.binary(BinaryOp::Div, ScalarKind::Float, one, x)
}

fn fract_of<B: Backend + ?Sized>(b: &mut B, a: B::Value, x: B::Value) -> B::Value {
    let floor = b.unary(UnaryOp::Floor, ScalarKind::Float, x);
    b.binary(BinaryOp::Sub, ScalarKind::Float, a, floor)
}

pub fn emit_arithmetic<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    let dest = destination(inst)?;
    let working = working_type(inst.data_type);
    let kind = ScalarKind::of(working);
    let read = |b: &mut B, index: usize, lane: usize| -> Result<B::Value, DecodeError> {
        read_source(b, cx, operand(inst, index)?, lane, 0, working, true)
    };

    let mut values = Vec::with_capacity(4);
    match inst.opcode {
        Opcode::Vdp => {
            let count = match inst.extra {
                Extra::Dot { lanes } => lanes.clamp(1, 4) as usize,
                _ => 4,
            };
            let mut sum = None;
            for lane in 0..count {
                let x = read(b, 1, lane)?;
                let y = read(b, 2, lane)?;
                let product = b.binary(BinaryOp::Mul, kind, x, y);
                sum = Some(match sum {
                    None => product,
                    Some(acc) => b.binary(BinaryOp::Add, kind, acc, product),
                });
            }
            let sum = sum.ok_or_else(|| missing(inst, "empty dot product"))?;
            values.extend(lanes(inst.write_mask).map(|lane| (lane, sum)));
        }
        Opcode::Vrcp | Opcode::Vrsq | Opcode::Vlog | Opcode::Vexp => {
            let lane = match inst.extra {
                Extra::Scalar { lane } => lane as usize,
                _ => 0,
            };
            let x = read(b, 1, lane)?;
            let result = match scalar_op(inst.opcode) {
                Some(op) => b.unary(op, kind, x),
                None => reciprocal(b, x),
            };
            values.extend(lanes(inst.write_mask).map(|lane| (lane, result)));
        }
        _ => {
            for lane in lanes(inst.write_mask) {
                let value = match inst.opcode {
                    Opcode::Vmad => {
                        let x = read(b, 0, lane)?;
                        let y = read(b, 1, lane)?;
                        let z = read(b, 2, lane)?;
                        let product = b.binary(BinaryOp::Mul, kind, x, y);
                        b.binary(BinaryOp::Add, kind, product, z)
                    }
                    Opcode::Vdsx | Opcode::Vdsy => {
                        let x = read(b, 1, lane)?;
                        let op = if inst.opcode == Opcode::Vdsx { UnaryOp::Dfdx } else { UnaryOp::Dfdy };
                        b.unary(op, kind, x)
                    }
                    opcode => {
                        let x = read(b, 1, lane)?;
                        let y = read(b, 2, lane)?;
                        match opcode {
                            Opcode::Vmul => b.binary(BinaryOp::Mul, kind, x, y),
                            Opcode::Vadd => b.binary(BinaryOp::Add, kind, x, y),
                            Opcode::Vsub => b.binary(BinaryOp::Sub, kind, x, y),
                            Opcode::Vmin => b.binary(BinaryOp::Min, kind, x, y),
                            Opcode::Vmax => b.binary(BinaryOp::Max, kind, x, y),
                            Opcode::Vfrc => fract_of(b, x, y),
                            _ => return Err(missing(inst, "arithmetic opcode")),
                        }
                    }
                };
                values.push((lane, value));
            }
        }
    }

    for (lane, value) in values {
        write_dest(b, cx, dest, lane, 0, value, working, true)?;
    }
    Ok(())
}

//=============================================================================
// TESTS
//=============================================================================

fn rotate_left<B: Backend + ?Sized>(b: &mut B, a: B::Value, n: B::Value) -> B::Value {
    let mask = b.const_uint(31);
    let n = b.binary(BinaryOp::And, ScalarKind::Uint, n, mask);
    let left = b.binary(BinaryOp::Shl, ScalarKind::Uint, a, n);
    let width = b.const_uint(32);
    let back = b.binary(BinaryOp::Sub, ScalarKind::Uint, width, n);
    let back = b.binary(BinaryOp::And, ScalarKind::Uint, back, mask);
    let right = b.binary(BinaryOp::Shr, ScalarKind::Uint, a, back);
    b.binary(BinaryOp::Or, ScalarKind::Uint, left, right)
}

fn arithmetic_shift<B: Backend + ?Sized>(b: &mut B, a: B::Value, n: B::Value, kind: ScalarKind) -> B::Value {
    if kind == ScalarKind::Int {
        return b.binary(BinaryOp::Shr, ScalarKind::Int, a, n);
    }
    let signed = b.bitcast(a, kind, ScalarKind::Int);
    let shift = b.bitcast(n, kind, ScalarKind::Int);
    let shifted = b.binary(BinaryOp::Shr, ScalarKind::Int, signed, shift);
    b.bitcast(shifted, ScalarKind::Int, kind)
}

/// Truncate an integer result to the width of `data_type`
fn wrap<B: Backend + ?Sized>(b: &mut B, value: B::Value, data_type: DataType) -> B::Value {
    let kind = ScalarKind::of(data_type);
    let width = data_type.size() * 8;
    if kind == ScalarKind::Float || width >= 32 {
        return value;
    }
    let bits = match kind {
        ScalarKind::Int => b.bitcast(value, kind, ScalarKind::Uint),
        _ => value,
    };
    b.extract_bits(bits, 0, width, kind == ScalarKind::Int)
}

/// ALU stage of a test
fn test_alu<B: Backend + ?Sized>(
    b: &mut B,
    alu: TestAlu,
    kind: ScalarKind,
    x: B::Value,
    y: B::Value,
) -> B::Value {
    match alu {
        TestAlu::Add | TestAlu::IAdd => b.binary(BinaryOp::Add, kind, x, y),
        TestAlu::Sub | TestAlu::ISub => b.binary(BinaryOp::Sub, kind, x, y),
        TestAlu::Mul | TestAlu::IMul => b.binary(BinaryOp::Mul, kind, x, y),
        TestAlu::Min => b.binary(BinaryOp::Min, kind, x, y),
        TestAlu::Max => b.binary(BinaryOp::Max, kind, x, y),
        TestAlu::Frc => fract_of(b, x, y),
        TestAlu::Dp => b.binary(BinaryOp::Mul, kind, x, y),
        TestAlu::Rcp => reciprocal(b, x),
        TestAlu::Rsq => b.unary(UnaryOp::Rsq, kind, x),
        TestAlu::Log => b.unary(UnaryOp::Log2, kind, x),
        TestAlu::Exp => b.unary(UnaryOp::Exp2, kind, x),
        TestAlu::Dsx => b.unary(UnaryOp::Dfdx, kind, x),
        TestAlu::Dsy => b.unary(UnaryOp::Dfdy, kind, x),
        TestAlu::And => b.binary(BinaryOp::And, kind, x, y),
        TestAlu::Or => b.binary(BinaryOp::Or, kind, x, y),
        TestAlu::Xor => b.binary(BinaryOp::Xor, kind, x, y),
        TestAlu::Shl => b.binary(BinaryOp::Shl, kind, x, y),
        TestAlu::Shr => b.binary(BinaryOp::Shr, kind, x, y),
        TestAlu::Rol if kind == ScalarKind::Uint => rotate_left(b, x, y),
        TestAlu::Rol => {
            let ux = b.bitcast(x, kind, ScalarKind::Uint);
            let uy = b.bitcast(y, kind, ScalarKind::Uint);
            let rotated = rotate_left(b, ux, uy);
            b.bitcast(rotated, ScalarKind::Uint, kind)
        }
        TestAlu::Asr => arithmetic_shift(b, x, y, kind),
    }
}

/// Test result of one lane, or of the dot product for [`TestAlu::Dp`]
fn test_lane<B: Backend + ?Sized>(
    b: &mut B,
    cx: &LowerContext,
    inst: &Instruction,
    alu: TestAlu,
    op: CompareOp,
    lane: usize,
) -> Result<B::Value, DecodeError> {
    if op == CompareOp::Always {
        return Ok(b.const_bool(true));
    }
    let working = working_type(inst.data_type);
    let kind = ScalarKind::of(working);
    let (src1, src2) = (operand(inst, 1)?, operand(inst, 2)?);

    let result = if alu == TestAlu::Dp {
        let mut sum = None;
        for l in 0..4 {
            let x = read_source(b, cx, src1, l, 0, working, true)?;
            let y = read_source(b, cx, src2, l, 0, working, true)?;
            let product = b.binary(BinaryOp::Mul, kind, x, y);
            sum = Some(match sum {
                None => product,
                Some(acc) => b.binary(BinaryOp::Add, kind, acc, product),
            });
        }
        sum.ok_or_else(|| missing(inst, "empty dot product"))?
    } else {
        let x = read_source(b, cx, src1, lane, 0, working, true)?;
        let y = read_source(b, cx, src2, lane, 0, working, true)?;
        let value = test_alu(b, alu, kind, x, y);
        wrap(b, value, inst.data_type)
    };
    let zero = constant(b, 0.0, kind);
    Ok(b.compare(op, kind, result, zero))
}

pub fn emit_test<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    let Extra::Test(params) = inst.extra else {
        return Err(missing(inst, "test without parameters"));
    };
    let op = CompareOp::select(params.mode, params.inclusive);

    if inst.opcode == Opcode::Vtst {
        let passed = test_lane(b, cx, inst, params.alu, op, params.channel as usize)?;
        b.store_predicate(params.pdst, passed);
        return Ok(());
    }

    let dest = destination(inst)?;
    let width = dest.data_type.size() * 8;
    let ones = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
    let mut values = Vec::with_capacity(4);
    for lane in lanes(inst.write_mask) {
        let passed = test_lane(b, cx, inst, params.alu, op, lane)?;
        let set = b.const_uint(ones);
        let clear = b.const_uint(0);
        values.push((lane, b.select(ScalarKind::Uint, passed, set, clear)));
    }
    for (lane, bits) in values {
        let target = resolve_dest(dest, lane, 0)?;
        store_bits(b, target, bits);
    }
    Ok(())
}

//=============================================================================
// BITWISE
//=============================================================================

pub fn emit_bitwise<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    let dest = destination(inst)?;
    let working = DataType::U32;
    let kind = ScalarKind::Uint;

    let x = read_source(b, cx, operand(inst, 1)?, 0, 0, working, false)?;
    let y = match inst.extra {
        Extra::Bitwise { immediate: Some(v) } => b.const_uint(v),
        _ => read_source(b, cx, operand(inst, 2)?, 0, 0, working, false)?,
    };

    let result = match inst.opcode {
        Opcode::And => b.binary(BinaryOp::And, kind, x, y),
        Opcode::Or => b.binary(BinaryOp::Or, kind, x, y),
        Opcode::Xor => b.binary(BinaryOp::Xor, kind, x, y),
        Opcode::Rol => rotate_left(b, x, y),
        Opcode::Asr => arithmetic_shift(b, x, y, kind),
        opcode => {
            let mask = b.const_uint(31);
            let n = b.binary(BinaryOp::And, kind, y, mask);
            let op = if opcode == Opcode::Shl { BinaryOp::Shl } else { BinaryOp::Shr };
            b.binary(op, kind, x, n)
        }
    };
    for lane in lanes(inst.write_mask.max(1)) {
        write_dest(b, cx, dest, lane, 0, result, working, false)?;
    }
    Ok(())
}

//=============================================================================
// PACKING
//=============================================================================

fn pack_working(params: &crate::types::PackParams) -> DataType {
    if params.src_format.is_float() || params.dest_format.is_float() {
        DataType::F32
    } else if params.src_format.is_signed() {
        DataType::S32
    } else {
        DataType::U32
    }
}

fn read_packed<B: Backend + ?Sized>(
    b: &mut B,
    cx: &LowerContext,
    op: &Operand,
    lane: usize,
    working: DataType,
    scale: bool,
) -> Result<B::Value, DecodeError> {
    if scale && op.data_type == DataType::S8 && working == DataType::F32 {
        let raw = read_source(b, cx, op, lane, 0, working, false)?;
        let factor = b.const_float(1.0 / 127.0);
        let scaled = b.binary(BinaryOp::Mul, ScalarKind::Float, raw, factor);
        let floor = b.const_float(-1.0);
        return Ok(b.binary(BinaryOp::Max, ScalarKind::Float, scaled, floor));
    }
    read_source(b, cx, op, lane, 0, working, scale)
}

pub fn emit_pack<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    let Extra::Pack(params) = inst.extra else {
        return Err(missing(inst, "pack without parameters"));
    };
    let dest = destination(inst)?;
    let working = pack_working(&params);
    let src1 = operand(inst, 1)?;
    let src1_count = params.src1_mask.count_ones() as usize;

    let mut values = Vec::with_capacity(4);
    for (n, lane) in lanes(inst.write_mask).enumerate() {
        let value = if params.src2_mask & (1 << lane) != 0 {
            let src2 = operand(inst, 2)?;
            read_packed(b, cx, src2, n.saturating_sub(src1_count), working, params.scale)?
        } else {
            read_packed(b, cx, src1, lane, working, params.scale)?
        };
        values.push((lane, value));
    }
    // C10 is always a fixed point format; other byte formats follow the scale bit
    let normalized = params.scale || dest.data_type == DataType::C10;
    for (lane, value) in values {
        write_dest(b, cx, dest, lane, 0, value, working, normalized)?;
    }
    Ok(())
}

//=============================================================================
// SAMPLING
//=============================================================================

pub fn emit_sample<B: Backend + ?Sized>(b: &mut B, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
    let Extra::Sample(params) = inst.extra else {
        return Err(missing(inst, "sample without parameters"));
    };
    let dest = destination(inst)?;
    let coord_src = operand(inst, 0)?;
    let sampler_src = operand(inst, 1)?;

    if sampler_src.bank != RegisterBank::SecAttr {
        return Err(DecodeError::MissingSampler(sampler_src.num));
    }
    let sampler = cx
        .plan
        .dependent_sampler(sampler_src.num)
        .ok_or(DecodeError::MissingSampler(sampler_src.num))?;
    let cube = cx.plan.samplers.get(sampler).is_some_and(|s| s.cube);
    let dim = if cube { 3 } else { params.dim.clamp(1, 3) as usize };

    let mut coords = Vec::with_capacity(dim);
    for lane in 0..dim {
        coords.push(read_source(b, cx, coord_src, lane, 0, DataType::F32, true)?);
    }

    let lod = match params.lod {
        LodMode::None => Lod::Implicit,
        mode => {
            let lod_src = operand(inst, 2)?;
            match mode {
                LodMode::Bias => Lod::Bias(read_source(b, cx, lod_src, 0, 0, DataType::F32, true)?),
                LodMode::Replace => Lod::Level(read_source(b, cx, lod_src, 0, 0, DataType::F32, true)?),
                _ => {
                    let mut dx = Vec::with_capacity(dim);
                    let mut dy = Vec::with_capacity(dim);
                    for i in 0..dim as u32 {
                        dx.push(read_source(b, cx, lod_src, 0, i, DataType::F32, true)?);
                    }
                    for i in 0..dim as u32 {
                        dy.push(read_source(b, cx, lod_src, 0, dim as u32 + i, DataType::F32, true)?);
                    }
                    Lod::Gradient { dx, dy }
                }
            }
        }
    };

    let texel = b.sample(&SampleRequest { sampler, coords, lod });
    for (lane, value) in texel.into_iter().enumerate() {
        write_dest(b, cx, dest, lane, params.dest_offset, value, DataType::F32, true)?;
    }
    Ok(())
}
