//! Reference interpreter backend shared by the integration tests.
//!
//! Evaluates the lowering eagerly: every value is computed as soon as the
//! lowering asks for it and stores are gated by an execution mask stack.
//! That covers straight-line code and structured conditionals, which is all
//! the tests feed it.

#![allow(dead_code)]

use std::collections::HashMap;

use vs_shader::backend::{
    Backend, BinaryOp, InputRef, SampleRequest, ScalarKind, TranslatedShader, UnaryOp,
};
use vs_shader::compare::CompareOp;
use vs_shader::gxp::{Parameter, ParameterCategory, ParameterType};
use vs_shader::operand::{Slot, StorageBank};
use vs_shader::recompiler::PREDICATE_SLOTS;

/// Texel every sample returns
pub const TEXEL: [f32; 4] = [0.25, 0.5, 0.75, 1.0];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Float(f32),
    Int(i32),
    Uint(u32),
    Bool(bool),
}

impl Scalar {
    fn bits(self) -> u32 {
        match self {
            Self::Float(v) => v.to_bits(),
            Self::Int(v) => v as u32,
            Self::Uint(v) => v,
            Self::Bool(v) => v as u32,
        }
    }

    fn from_bits(bits: u32, kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Float => Self::Float(f32::from_bits(bits)),
            ScalarKind::Int => Self::Int(bits as i32),
            ScalarKind::Uint => Self::Uint(bits),
            ScalarKind::Bool => Self::Bool(bits != 0),
        }
    }

    fn as_f32(self) -> f32 {
        match self {
            Self::Float(v) => v,
            Self::Int(v) => v as f32,
            Self::Uint(v) => v as f32,
            Self::Bool(v) => v as u32 as f32,
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Self::Bool(v) => v,
            other => other.bits() != 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Val(usize);

#[derive(Debug, Clone, Copy)]
struct MaskFrame {
    parent: bool,
    condition: bool,
}

#[derive(Debug, Default)]
pub struct Interpreter {
    values: Vec<Scalar>,
    masks: Vec<MaskFrame>,
    pub banks: HashMap<(StorageBank, u32), u32>,
    pub predicates: [bool; PREDICATE_SLOTS],
    pub attributes: Vec<[f32; 4]>,
    pub iterators: Vec<[f32; 4]>,
    pub uniforms: Vec<Vec<u32>>,
    pub last_color: Option<[f32; 4]>,
    pub outputs: HashMap<usize, [f32; 4]>,
    pub color: Option<[f32; 4]>,
    pub raw_color: Option<[u32; 4]>,
    pub killed: bool,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_float(&mut self, bank: StorageBank, word: u32, value: f32) {
        self.banks.insert((bank, word), value.to_bits());
    }

    pub fn float(&self, bank: StorageBank, word: u32) -> f32 {
        f32::from_bits(self.banks.get(&(bank, word)).copied().unwrap_or(0))
    }

    pub fn word(&self, bank: StorageBank, word: u32) -> u32 {
        self.banks.get(&(bank, word)).copied().unwrap_or(0)
    }

    fn active(&self) -> bool {
        !self.killed && self.masks.last().map_or(true, |f| f.parent && f.condition)
    }

    fn push(&mut self, value: Scalar) -> Val {
        self.values.push(value);
        Val(self.values.len() - 1)
    }

    fn get(&self, v: Val) -> Scalar {
        self.values[v.0]
    }

    fn address(&self, slot: Slot) -> (StorageBank, u32) {
        let word = match slot.dynamic {
            None => slot.word,
            Some(reg) => slot.word + self.word(StorageBank::Index, reg as u32) * 2,
        };
        (slot.bank, word)
    }
}

pub fn half_to_f32(h: u16) -> f32 {
    let sign = ((h >> 15) as u32) << 31;
    let exp = ((h >> 10) & 0x1f) as u32;
    let mant = (h & 0x3ff) as u32;
    let bits = match exp {
        0 if mant == 0 => sign,
        0 => {
            let v = mant as f32 * 2f32.powi(-24);
            return if sign != 0 { -v } else { v };
        }
        0x1f => sign | 0x7f80_0000 | (mant << 13),
        e => sign | ((e + 112) << 23) | (mant << 13),
    };
    f32::from_bits(bits)
}

pub fn f32_to_half(v: f32) -> u16 {
    let bits = v.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let raw_exp = (bits >> 23) & 0xff;
    let mant = bits & 0x7f_ffff;
    if raw_exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let exp = raw_exp as i32 - 127 + 15;
    if exp >= 0x1f {
        return sign | 0x7c00;
    }
    if exp <= 0 {
        if exp < -10 {
            return sign;
        }
        let m = (mant | 0x80_0000) >> (14 - exp);
        return sign | m as u16;
    }
    let mut half = ((exp as u32) << 10) | (mant >> 13);
    if mant & 0x1000 != 0 {
        half += 1;
    }
    sign | half as u16
}

fn field_mask(count: u32) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}

impl Backend for Interpreter {
    type Value = Val;

    fn load_slot(&mut self, slot: Slot) -> Val {
        let bits = self.banks.get(&self.address(slot)).copied().unwrap_or(0);
        self.push(Scalar::Float(f32::from_bits(bits)))
    }

    fn store_slot(&mut self, slot: Slot, value: Val) {
        if self.active() {
            let bits = self.get(value).bits();
            let address = self.address(slot);
            self.banks.insert(address, bits);
        }
    }

    fn load_predicate(&mut self, index: u8) -> Val {
        let value = self.predicates[index as usize];
        self.push(Scalar::Bool(value))
    }

    fn store_predicate(&mut self, index: u8, value: Val) {
        if self.active() {
            self.predicates[index as usize] = self.get(value).as_bool();
        }
    }

    fn const_float(&mut self, value: f32) -> Val {
        self.push(Scalar::Float(value))
    }

    fn const_uint(&mut self, value: u32) -> Val {
        self.push(Scalar::Uint(value))
    }

    fn const_int(&mut self, value: i32) -> Val {
        self.push(Scalar::Int(value))
    }

    fn const_bool(&mut self, value: bool) -> Val {
        self.push(Scalar::Bool(value))
    }

    fn bitcast(&mut self, value: Val, _from: ScalarKind, to: ScalarKind) -> Val {
        let bits = self.get(value).bits();
        self.push(Scalar::from_bits(bits, to))
    }

    fn convert(&mut self, value: Val, _from: ScalarKind, to: ScalarKind) -> Val {
        let v = self.get(value);
        let out = match (v, to) {
            (v, ScalarKind::Float) => Scalar::Float(v.as_f32()),
            (Scalar::Float(f), ScalarKind::Int) => Scalar::Int(f as i32),
            (Scalar::Float(f), ScalarKind::Uint) => Scalar::Uint(f as u32),
            (v, ScalarKind::Bool) => Scalar::Bool(v.as_bool()),
            (v, kind) => Scalar::from_bits(v.bits(), kind),
        };
        self.push(out)
    }

    fn extract_bits(&mut self, value: Val, offset: u32, count: u32, signed: bool) -> Val {
        let bits = (self.get(value).bits() >> offset) & field_mask(count);
        if signed && count < 32 {
            let shift = 32 - count;
            self.push(Scalar::Int(((bits << shift) as i32) >> shift))
        } else if signed {
            self.push(Scalar::Int(bits as i32))
        } else {
            self.push(Scalar::Uint(bits))
        }
    }

    fn insert_bits(&mut self, base: Val, insert: Val, offset: u32, count: u32) -> Val {
        let mask = field_mask(count) << offset;
        let base = self.get(base).bits();
        let insert = self.get(insert).bits();
        self.push(Scalar::Uint((base & !mask) | ((insert << offset) & mask)))
    }

    fn half_to_float(&mut self, bits: Val) -> Val {
        let h = self.get(bits).bits() as u16;
        self.push(Scalar::Float(half_to_f32(h)))
    }

    fn float_to_half(&mut self, value: Val) -> Val {
        let f = self.get(value).as_f32();
        self.push(Scalar::Uint(f32_to_half(f) as u32))
    }

    fn binary(&mut self, op: BinaryOp, kind: ScalarKind, a: Val, b: Val) -> Val {
        let (a, b) = (self.get(a), self.get(b));
        let out = match kind {
            ScalarKind::Float => {
                let (x, y) = (a.as_f32(), b.as_f32());
                Scalar::Float(match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Min => x.min(y),
                    BinaryOp::Max => x.max(y),
                    other => panic!("{:?} on floats", other),
                })
            }
            ScalarKind::Int => {
                let (x, y) = (a.bits() as i32, b.bits() as i32);
                Scalar::Int(match op {
                    BinaryOp::Add => x.wrapping_add(y),
                    BinaryOp::Sub => x.wrapping_sub(y),
                    BinaryOp::Mul => x.wrapping_mul(y),
                    BinaryOp::Div => x.checked_div(y).unwrap_or(0),
                    BinaryOp::Min => x.min(y),
                    BinaryOp::Max => x.max(y),
                    BinaryOp::And => x & y,
                    BinaryOp::Or => x | y,
                    BinaryOp::Xor => x ^ y,
                    BinaryOp::Shl => x.wrapping_shl(y as u32),
                    BinaryOp::Shr => x.wrapping_shr(y as u32),
                })
            }
            ScalarKind::Uint => {
                let (x, y) = (a.bits(), b.bits());
                Scalar::Uint(match op {
                    BinaryOp::Add => x.wrapping_add(y),
                    BinaryOp::Sub => x.wrapping_sub(y),
                    BinaryOp::Mul => x.wrapping_mul(y),
                    BinaryOp::Div => x.checked_div(y).unwrap_or(0),
                    BinaryOp::Min => x.min(y),
                    BinaryOp::Max => x.max(y),
                    BinaryOp::And => x & y,
                    BinaryOp::Or => x | y,
                    BinaryOp::Xor => x ^ y,
                    BinaryOp::Shl => x.wrapping_shl(y),
                    BinaryOp::Shr => x.wrapping_shr(y),
                })
            }
            ScalarKind::Bool => {
                let (x, y) = (a.as_bool(), b.as_bool());
                Scalar::Bool(match op {
                    BinaryOp::And => x && y,
                    BinaryOp::Or => x || y,
                    BinaryOp::Xor => x ^ y,
                    other => panic!("{:?} on booleans", other),
                })
            }
        };
        self.push(out)
    }

    fn unary(&mut self, op: UnaryOp, kind: ScalarKind, a: Val) -> Val {
        let a = self.get(a);
        let out = match (op, kind) {
            (UnaryOp::Not, ScalarKind::Bool) => Scalar::Bool(!a.as_bool()),
            (UnaryOp::Not, kind) => Scalar::from_bits(!a.bits(), kind),
            (UnaryOp::Neg, ScalarKind::Int) => Scalar::Int((a.bits() as i32).wrapping_neg()),
            (UnaryOp::Abs, ScalarKind::Int) => Scalar::Int((a.bits() as i32).wrapping_abs()),
            (op, _) => {
                let x = a.as_f32();
                Scalar::Float(match op {
                    UnaryOp::Neg => -x,
                    UnaryOp::Abs => x.abs(),
                    UnaryOp::Floor => x.floor(),
                    UnaryOp::Round => x.round(),
                    UnaryOp::Saturate => x.clamp(0.0, 1.0),
                    UnaryOp::Rsq => 1.0 / x.sqrt(),
                    UnaryOp::Log2 => x.log2(),
                    UnaryOp::Exp2 => x.exp2(),
                    UnaryOp::Dfdx | UnaryOp::Dfdy => 0.0,
                    UnaryOp::Not => unreachable!(),
                })
            }
        };
        self.push(out)
    }

    fn compare(&mut self, op: CompareOp, kind: ScalarKind, a: Val, b: Val) -> Val {
        let (a, b) = (self.get(a), self.get(b));
        let result = match kind {
            ScalarKind::Float => op.evaluate(a.as_f32(), b.as_f32()),
            ScalarKind::Int => op.evaluate(a.bits() as i32, b.bits() as i32),
            ScalarKind::Uint => op.evaluate(a.bits(), b.bits()),
            ScalarKind::Bool => op.evaluate(a.as_bool(), b.as_bool()),
        };
        self.push(Scalar::Bool(result))
    }

    fn select(&mut self, _kind: ScalarKind, condition: Val, a: Val, b: Val) -> Val {
        if self.get(condition).as_bool() {
            a
        } else {
            b
        }
    }

    fn sample(&mut self, _request: &SampleRequest<Val>) -> [Val; 4] {
        TEXEL.map(|c| self.push(Scalar::Float(c)))
    }

    fn begin_if(&mut self, condition: Val) {
        let parent = self.active();
        let condition = self.get(condition).as_bool();
        self.masks.push(MaskFrame { parent, condition });
    }

    fn begin_else(&mut self) {
        if let Some(frame) = self.masks.last_mut() {
            frame.condition = !frame.condition;
        }
    }

    fn end_if(&mut self) {
        self.masks.pop();
    }

    fn begin_loop(&mut self) {
        panic!("the interpreter runs loop-free code only");
    }

    fn end_loop(&mut self) {
        panic!("the interpreter runs loop-free code only");
    }

    fn emit_break(&mut self, _condition: Option<Val>) {
        panic!("the interpreter runs loop-free code only");
    }

    fn emit_continue(&mut self, _condition: Option<Val>) {
        panic!("the interpreter runs loop-free code only");
    }

    fn kill(&mut self) {
        if self.active() {
            self.killed = true;
        }
    }

    fn comment(&mut self, _text: &str) {}

    fn read_input(&mut self, input: InputRef, component: u32) -> Val {
        let source = match input {
            InputRef::Attribute(i) => self.attributes.get(i),
            InputRef::Iterator(i) => self.iterators.get(i),
        };
        let value = source.map_or(0.0, |v| v[(component % 4) as usize]);
        self.push(Scalar::Float(value))
    }

    fn read_uniform(&mut self, buffer: usize, word: u32) -> Val {
        let bits = self
            .uniforms
            .get(buffer)
            .and_then(|b| b.get(word as usize))
            .copied()
            .unwrap_or(0);
        self.push(Scalar::Float(f32::from_bits(bits)))
    }

    fn read_last_color(&mut self) -> Option<[Val; 4]> {
        let color = self.last_color?;
        Some(color.map(|c| self.push(Scalar::Float(c))))
    }

    fn read_mask(&mut self) -> [Val; 4] {
        [1.0f32; 4].map(|c| self.push(Scalar::Float(c)))
    }

    fn write_output(&mut self, output: usize, values: [Val; 4]) {
        if self.active() {
            let floats = values.map(|v| self.get(v).as_f32());
            self.outputs.insert(output, floats);
        }
    }

    fn write_color(&mut self, color: [Val; 4], raw: Option<[Val; 4]>) {
        if self.active() {
            self.color = Some(color.map(|v| self.get(v).as_f32()));
            self.raw_color = raw.map(|r| r.map(|v| self.get(v).bits()));
        }
    }

    fn finish(self) -> TranslatedShader {
        TranslatedShader::Glsl(String::new())
    }
}

/// Four-component float vertex attribute
pub fn attribute(name: &str, resource_index: i32) -> Parameter {
    Parameter {
        name: name.to_string(),
        category: ParameterCategory::Attribute,
        param_type: ParameterType::F32,
        component_count: 4,
        container_index: 0,
        semantic: 0,
        array_size: 1,
        resource_index,
    }
}

/// Place `value` in bits hi..lo of `word`
pub fn put(word: &mut u64, hi: u32, lo: u32, value: u64) {
    let mask = ((1u64 << (hi - lo + 1)) - 1) << lo;
    *word = (*word & !mask) | ((value << lo) & mask);
}

/// `VMOV.f32 o<dest>.xyzw, pa<src>.xyzw`, register numbers in 64-bit units
pub fn vmov_pa_to_o(dest: u64, src: u64) -> u64 {
    let mut w = 0;
    put(&mut w, 63, 59, 0b00111);
    put(&mut w, 42, 40, 5); // f32
    put(&mut w, 38, 35, 4); // xyzw
    put(&mut w, 33, 32, 1); // dest bank: output
    put(&mut w, 31, 30, 2); // src1 bank: primary attribute
    put(&mut w, 27, 24, 0xF);
    put(&mut w, 23, 18, dest);
    put(&mut w, 11, 6, src);
    w
}
