//! Code generation backends
//!
//! Both targets implement [`Backend`], a small set of scalar value
//! operations plus structural hooks. The per-opcode lowering in [`lower`] is
//! written once against that trait and reached through the opcode-group
//! methods, so GLSL and SPIR-V agree on every instruction by construction.
//! [`emit_program`] walks the recovered control-flow tree and drives the
//! backend through the preamble, both phases and the epilogue.

pub mod glsl;
pub mod lower;
pub mod spirv;

use tracing::{debug, warn};

use crate::binding::{BindingPlan, QueryCoords, VertexOutputKind};
use crate::compare::CompareOp;
use crate::operand::{LanePart, Slot, StorageBank, StorageRef};
use crate::recompiler::{Condition, ControlFlow, Node, NodeId, EXIT_FLAG_BASE};
use crate::types::{DataType, Instruction, Phase, ProgramType};
use lower::LowerContext;
use vs_core::{DecodeError, FeatureState, ShaderBackend};

pub use glsl::GlslBackend;
pub use spirv::SpirvBackend;

/// Scalar type of a backend value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Float,
    Int,
    Uint,
    Bool,
}

impl ScalarKind {
    /// Kind a value of `data_type` is computed in. Fixed point and half
    /// values are handled as floats.
    pub fn of(data_type: DataType) -> Self {
        match data_type {
            DataType::F32 | DataType::F16 | DataType::C10 => Self::Float,
            DataType::S8 | DataType::S16 | DataType::S32 => Self::Int,
            DataType::U8 | DataType::U16 | DataType::U32 | DataType::O8 | DataType::Unknown => Self::Uint,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    /// Bitwise on integers, logical on booleans
    And,
    Or,
    Xor,
    Shl,
    /// Logical on unsigned values, arithmetic on signed ones
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Floor,
    Round,
    /// Clamp to [0, 1]
    Saturate,
    Rsq,
    Log2,
    Exp2,
    Dfdx,
    Dfdy,
    /// Logical not on booleans, bitwise not on integers
    Not,
}

/// Level of detail of a texture lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lod<V> {
    Implicit,
    Bias(V),
    Level(V),
    Gradient { dx: Vec<V>, dy: Vec<V> },
}

/// Texture lookup with coordinates already divided for projective reads
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRequest<V> {
    /// Position in [`BindingPlan::samplers`]
    pub sampler: usize,
    pub coords: Vec<V>,
    pub lod: Lod<V>,
}

/// Interface value read by the preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRef {
    /// Position in [`BindingPlan::attributes`]
    Attribute(usize),
    /// Position in [`BindingPlan::iterators`]
    Iterator(usize),
}

/// How a fragment program reaches the color already in the framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorAccess {
    /// Write-only color output
    Output,
    /// Read through framebuffer fetch, written through the same output
    FramebufferFetch,
    /// Read and written through a storage image inside an interlock
    Interlock,
}

impl ColorAccess {
    pub fn select(plan: &BindingPlan, features: FeatureState) -> Self {
        if plan.program_type != ProgramType::Fragment || !plan.native_color {
            Self::Output
        } else if features.direct_fragcolor {
            Self::FramebufferFetch
        } else if features.support_shader_interlock {
            Self::Interlock
        } else {
            Self::Output
        }
    }
}

/// Descriptor set of the uniform buffers
pub const UNIFORM_SET: u32 = 0;
/// Descriptor set of the samplers
pub const TEXTURE_SET: u32 = 1;
/// Descriptor set of the color attachment and mask images
pub const ATTACHMENT_SET: u32 = 2;
pub const COLOR_ATTACHMENT_BINDING: u32 = 0;
pub const MASK_BINDING: u32 = 1;

/// Generated shader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslatedShader {
    Glsl(String),
    Spirv(Vec<u32>),
}

impl TranslatedShader {
    pub fn backend(&self) -> ShaderBackend {
        match self {
            Self::Glsl(_) => ShaderBackend::Glsl,
            Self::Spirv(_) => ShaderBackend::Spirv,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Glsl(source) => source.as_bytes(),
            Self::Spirv(words) => bytemuck::cast_slice(words),
        }
    }

    /// Rebuild from bytes written by [`TranslatedShader::as_bytes`]
    pub fn from_bytes(backend: ShaderBackend, bytes: &[u8]) -> Option<Self> {
        match backend {
            ShaderBackend::Glsl => String::from_utf8(bytes.to_vec()).ok().map(Self::Glsl),
            ShaderBackend::Spirv => {
                if bytes.len() % 4 != 0 {
                    return None;
                }
                let words = bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Some(Self::Spirv(words))
            }
        }
    }

    pub fn as_glsl(&self) -> Option<&str> {
        match self {
            Self::Glsl(source) => Some(source),
            Self::Spirv(_) => None,
        }
    }

    pub fn as_spirv(&self) -> Option<&[u32]> {
        match self {
            Self::Spirv(words) => Some(words),
            Self::Glsl(_) => None,
        }
    }
}

/// Target of the shared lowering.
///
/// Values are scalars. Register banks hold raw 32-bit words typed as
/// floats; the lowering bitcasts and repacks lanes itself. A value is only
/// used inside the structured block it was produced in, so backends are free
/// to bind values to block-local temporaries.
pub trait Backend {
    type Value: Copy + std::fmt::Debug;

    // Storage

    /// Raw word of a register slot, as a float
    fn load_slot(&mut self, slot: Slot) -> Self::Value;
    fn store_slot(&mut self, slot: Slot, value: Self::Value);
    fn load_predicate(&mut self, index: u8) -> Self::Value;
    fn store_predicate(&mut self, index: u8, value: Self::Value);

    // Constants

    fn const_float(&mut self, value: f32) -> Self::Value;
    fn const_uint(&mut self, value: u32) -> Self::Value;
    fn const_int(&mut self, value: i32) -> Self::Value;
    fn const_bool(&mut self, value: bool) -> Self::Value;

    // Value operations

    /// Reinterpret the bits of a 32-bit value
    fn bitcast(&mut self, value: Self::Value, from: ScalarKind, to: ScalarKind) -> Self::Value;
    /// Numeric conversion
    fn convert(&mut self, value: Self::Value, from: ScalarKind, to: ScalarKind) -> Self::Value;
    /// Bit field of an unsigned value, sign extended into an int when
    /// `signed`
    fn extract_bits(&mut self, value: Self::Value, offset: u32, count: u32, signed: bool) -> Self::Value;
    /// Replace a bit field of an unsigned value
    fn insert_bits(&mut self, base: Self::Value, insert: Self::Value, offset: u32, count: u32) -> Self::Value;
    /// Low 16 bits of an unsigned value read as a half float
    fn half_to_float(&mut self, bits: Self::Value) -> Self::Value;
    /// Half float bits of a float in the low 16 bits of an unsigned value
    fn float_to_half(&mut self, value: Self::Value) -> Self::Value;
    fn binary(&mut self, op: BinaryOp, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    fn unary(&mut self, op: UnaryOp, kind: ScalarKind, a: Self::Value) -> Self::Value;
    /// Boolean result of `a op b`, never called with [`CompareOp::Always`]
    fn compare(&mut self, op: CompareOp, kind: ScalarKind, a: Self::Value, b: Self::Value) -> Self::Value;
    fn select(&mut self, kind: ScalarKind, condition: Self::Value, a: Self::Value, b: Self::Value) -> Self::Value;
    fn sample(&mut self, request: &SampleRequest<Self::Value>) -> [Self::Value; 4];

    // Structure

    fn begin_if(&mut self, condition: Self::Value);
    fn begin_else(&mut self);
    fn end_if(&mut self);
    fn begin_loop(&mut self);
    fn end_loop(&mut self);
    fn emit_break(&mut self, condition: Option<Self::Value>);
    fn emit_continue(&mut self, condition: Option<Self::Value>);
    fn kill(&mut self);
    fn comment(&mut self, text: &str);

    /// Open the guard of a predicated instruction
    fn begin_predicated(&mut self, condition: Self::Value) {
        self.begin_if(condition);
    }

    fn end_predicated(&mut self) {
        self.end_if();
    }

    // Interface

    /// One float component of an input
    fn read_input(&mut self, input: InputRef, component: u32) -> Self::Value;
    /// Raw word of a uniform buffer, as a float
    fn read_uniform(&mut self, buffer: usize, word: u32) -> Self::Value;
    /// Color currently in the framebuffer, `None` when it cannot be read
    fn read_last_color(&mut self) -> Option<[Self::Value; 4]>;
    fn read_mask(&mut self) -> [Self::Value; 4];
    /// Position in [`BindingPlan::vertex_outputs`]
    fn write_output(&mut self, output: usize, values: [Self::Value; 4]);
    /// Final fragment color, with the raw half lanes when they are kept
    fn write_color(&mut self, color: [Self::Value; 4], raw: Option<[Self::Value; 4]>);

    fn finish(self) -> TranslatedShader;

    // Opcode groups

    fn emit_move(&mut self, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
        lower::emit_move(self, cx, inst)
    }

    fn emit_arithmetic(&mut self, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
        lower::emit_arithmetic(self, cx, inst)
    }

    fn emit_test(&mut self, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
        lower::emit_test(self, cx, inst)
    }

    fn emit_pack(&mut self, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
        lower::emit_pack(self, cx, inst)
    }

    fn emit_bitwise(&mut self, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
        lower::emit_bitwise(self, cx, inst)
    }

    fn emit_sample(&mut self, cx: &LowerContext, inst: &Instruction) -> Result<(), DecodeError> {
        lower::emit_sample(self, cx, inst)
    }

    fn emit_kill(&mut self, _cx: &LowerContext, _inst: &Instruction) -> Result<(), DecodeError> {
        self.kill();
        Ok(())
    }
}

/// Decoded instructions of one phase with their recovered structure
#[derive(Debug, Clone, Copy)]
pub struct PhaseCode<'a> {
    pub instructions: &'a [Instruction],
    pub flow: &'a ControlFlow,
}

/// Everything [`emit_program`] needs
#[derive(Debug, Clone, Copy)]
pub struct ProgramCode<'a> {
    pub plan: &'a BindingPlan,
    pub features: FeatureState,
    pub primary: PhaseCode<'a>,
    pub secondary: Option<PhaseCode<'a>>,
}

/// Drive `backend` through a whole program: preamble, secondary phase,
/// primary phase, epilogue. Contained instruction failures are logged and
/// skipped; anything else aborts.
pub fn emit_program<B: Backend>(backend: &mut B, code: &ProgramCode) -> Result<(), DecodeError> {
    emit_preamble(backend, code)?;

    if let Some(secondary) = &code.secondary {
        debug!("Emitting secondary phase, {} instructions", secondary.instructions.len());
        let cx = LowerContext::new(Phase::Secondary, code.plan);
        emit_node(backend, &cx, secondary, secondary.flow.root)?;
    }

    debug!("Emitting primary phase, {} instructions", code.primary.instructions.len());
    let cx = LowerContext::new(Phase::Primary, code.plan);
    emit_node(backend, &cx, &code.primary, code.primary.flow.root)?;

    emit_epilogue(backend, code)
}

fn condition_value<B: Backend>(backend: &mut B, condition: Condition) -> B::Value {
    let (register, negate) = match condition {
        Condition::Always => return backend.const_bool(true),
        Condition::Never => return backend.const_bool(false),
        Condition::Predicate { register, negate } => (register, negate),
        Condition::Flag { index, negate } => (EXIT_FLAG_BASE + index, negate),
    };
    let value = backend.load_predicate(register);
    if negate {
        backend.unary(UnaryOp::Not, ScalarKind::Bool, value)
    } else {
        value
    }
}

fn emit_node<B: Backend>(backend: &mut B, cx: &LowerContext, phase: &PhaseCode, id: NodeId) -> Result<(), DecodeError> {
    match phase.flow.arena.get(id) {
        Node::Block(children) => {
            for &child in children {
                emit_node(backend, cx, phase, child)?;
            }
        }
        Node::Code { start, len } => {
            for inst in &phase.instructions[*start..start + len] {
                match lower::emit_instruction(backend, cx, inst) {
                    Ok(()) => {}
                    Err(e) if e.is_contained() => {
                        warn!("{} pc {}: {} skipped: {}", cx.phase.name(), inst.pc, inst.opcode.name(), e);
                        backend.comment(&format!("pc {}: {} skipped", inst.pc, inst.opcode.name()));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Node::Conditional {
            condition,
            then_block,
            else_block,
        } => {
            if *condition == Condition::Always && else_block.is_none() {
                return emit_node(backend, cx, phase, *then_block);
            }
            let value = condition_value(backend, *condition);
            backend.begin_if(value);
            emit_node(backend, cx, phase, *then_block)?;
            if let Some(else_block) = else_block {
                backend.begin_else();
                emit_node(backend, cx, phase, *else_block)?;
            }
            backend.end_if();
        }
        Node::Loop { body } => {
            backend.begin_loop();
            emit_node(backend, cx, phase, *body)?;
            backend.end_loop();
        }
        Node::Break { condition } => match condition {
            Condition::Never => {}
            Condition::Always => backend.emit_break(None),
            other => {
                let value = condition_value(backend, *other);
                backend.emit_break(Some(value));
            }
        },
        Node::Continue { condition } => match condition {
            Condition::Never => {}
            Condition::Always => backend.emit_continue(None),
            other => {
                let value = condition_value(backend, *other);
                backend.emit_continue(Some(value));
            }
        },
        Node::SetFlag { index, value } => {
            let value = backend.const_bool(*value);
            backend.store_predicate(EXIT_FLAG_BASE + index, value);
        }
    }
    Ok(())
}

/// Storage of component `component` of a value of `data_type` laid out from
/// `base`
pub fn component_ref(bank: StorageBank, base: u32, data_type: DataType, component: u32) -> Option<StorageRef> {
    let (word, part) = match data_type.size() {
        1 => (base + component / 4, LanePart::Byte((component % 4) as u8)),
        2 => (base + component / 2, LanePart::Half((component % 2) as u8)),
        _ => (base + component, LanePart::Word),
    };
    (word < bank.size()).then_some(StorageRef {
        slot: Slot::fixed(bank, word),
        part,
    })
}

fn store_component<B: Backend>(
    backend: &mut B,
    bank: StorageBank,
    base: u32,
    data_type: DataType,
    component: u32,
    value: B::Value,
    normalized: bool,
) -> Result<(), DecodeError> {
    let Some(target) = component_ref(bank, base, data_type, component) else {
        warn!("{}{} component {} is out of range, dropped", bank.name(), base, component);
        return Ok(());
    };
    let value = lower::from_working(backend, value, data_type, DataType::F32, normalized)?;
    lower::store_ref(backend, target, data_type, value);
    Ok(())
}

fn load_component<B: Backend>(
    backend: &mut B,
    bank: StorageBank,
    base: u32,
    data_type: DataType,
    component: u32,
) -> Result<B::Value, DecodeError> {
    let Some(source) = component_ref(bank, base, data_type, component) else {
        return Ok(backend.const_float(0.0));
    };
    let value = lower::load_ref(backend, source, data_type);
    lower::to_working(backend, value, data_type, DataType::F32, true)
}

fn emit_preamble<B: Backend>(backend: &mut B, code: &ProgramCode) -> Result<(), DecodeError> {
    let plan = code.plan;

    for (i, attribute) in plan.attributes.iter().enumerate() {
        backend.comment(&format!("{} -> pa{}", attribute.name, attribute.pa_offset));
        for c in 0..attribute.components {
            let value = backend.read_input(InputRef::Attribute(i), c);
            store_component(
                backend,
                StorageBank::PrimAttr,
                attribute.pa_offset,
                attribute.data_type,
                c,
                value,
                attribute.normalized,
            )?;
        }
    }

    for (i, iterator) in plan.iterators.iter().enumerate() {
        if iterator.pa_offset == u32::MAX {
            continue;
        }
        backend.comment(&format!("{} -> pa{}", iterator.name, iterator.pa_offset));
        for c in 0..iterator.components {
            let value = backend.read_input(InputRef::Iterator(i), c);
            store_component(
                backend,
                StorageBank::PrimAttr,
                iterator.pa_offset,
                iterator.data_type,
                c,
                value,
                true,
            )?;
        }
    }

    for (i, buffer) in plan.uniform_buffers.iter().enumerate() {
        let words = buffer.preload_words();
        if words == 0 {
            continue;
        }
        backend.comment(&format!("buffer {} -> sa{}..{}", buffer.index, buffer.base_sa_offset, buffer.base_sa_offset + words));
        for w in 0..words {
            let sa = buffer.base_sa_offset + w;
            if sa >= StorageBank::SecAttr.size() {
                warn!("Uniform preload past sa{} dropped", sa);
                break;
            }
            let value = backend.read_uniform(i, w);
            backend.store_slot(Slot::fixed(StorageBank::SecAttr, sa), value);
        }
    }

    for literal in &plan.literals {
        if literal.sa_offset >= StorageBank::SecAttr.size() {
            warn!("Literal at sa{} dropped", literal.sa_offset);
            continue;
        }
        let bits = backend.const_uint(literal.bits);
        let value = backend.bitcast(bits, ScalarKind::Uint, ScalarKind::Float);
        backend.store_slot(Slot::fixed(StorageBank::SecAttr, literal.sa_offset), value);
    }

    for query in &plan.texture_queries {
        let cube = plan.samplers.get(query.sampler).is_some_and(|s| s.cube);
        let read = |backend: &mut B, c: u32| backend.read_input(InputRef::Iterator(query.coord), c);
        let mut coords = vec![read(backend, 0), read(backend, 1)];
        match (query.coords, cube) {
            (_, true) => coords.push(read(backend, 2)),
            (QueryCoords::Xy, false) => {}
            (QueryCoords::ProjXyz | QueryCoords::ProjXyw, false) => {
                let divisor = read(backend, if query.coords == QueryCoords::ProjXyz { 2 } else { 3 });
                for coord in coords.iter_mut() {
                    *coord = backend.binary(BinaryOp::Div, ScalarKind::Float, *coord, divisor);
                }
            }
        }
        backend.comment(&format!("texture query -> pa{}", query.pa_offset));
        let texel = backend.sample(&SampleRequest {
            sampler: query.sampler,
            coords,
            lod: Lod::Implicit,
        });
        for (c, value) in texel.into_iter().enumerate() {
            store_component(backend, StorageBank::PrimAttr, query.pa_offset, query.store_type, c as u32, value, true)?;
        }
    }

    if plan.program_type == ProgramType::Fragment && plan.native_color {
        if let Some(color) = backend.read_last_color() {
            backend.comment("framebuffer color -> o0");
            for (c, value) in color.into_iter().enumerate() {
                store_component(backend, StorageBank::Output, 0, plan.color_type, c as u32, value, true)?;
            }
        }
    }

    if plan.program_type == ProgramType::Fragment && code.features.use_mask {
        let texel = backend.read_mask();
        let half = backend.const_float(0.5);
        let mut all = None;
        for lane in texel {
            let below = backend.compare(CompareOp::Less, ScalarKind::Float, lane, half);
            all = Some(match all {
                None => below,
                Some(acc) => backend.binary(BinaryOp::And, ScalarKind::Bool, acc, below),
            });
        }
        if let Some(all) = all {
            backend.begin_if(all);
            backend.kill();
            backend.end_if();
        }
    }
    Ok(())
}

fn emit_epilogue<B: Backend>(backend: &mut B, code: &ProgramCode) -> Result<(), DecodeError> {
    let plan = code.plan;
    match plan.program_type {
        ProgramType::Vertex => {
            for (i, output) in plan.vertex_outputs.iter().enumerate() {
                let mut values = [backend.const_float(0.0); 4];
                let count = if output.kind == VertexOutputKind::Position {
                    4
                } else {
                    output.components.min(4)
                };
                for (c, value) in values.iter_mut().enumerate().take(count as usize) {
                    let word = output.o_offset + c as u32;
                    if word < StorageBank::Output.size() {
                        *value = backend.load_slot(Slot::fixed(StorageBank::Output, word));
                    }
                }
                backend.write_output(i, values);
            }
        }
        ProgramType::Fragment => {
            let bank = if plan.native_color {
                StorageBank::Output
            } else {
                StorageBank::PrimAttr
            };
            let mut color = [backend.const_float(0.0); 4];
            for (c, value) in color.iter_mut().enumerate() {
                *value = load_component(backend, bank, 0, plan.color_type, c as u32)?;
            }

            let raw = if code.features.preserve_f16_nan && plan.color_type == DataType::F16 {
                let mut raw = [backend.const_uint(0); 4];
                for (c, value) in raw.iter_mut().enumerate() {
                    if let Some(source) = component_ref(bank, 0, DataType::F16, c as u32) {
                        *value = lower::load_ref(backend, source, DataType::U16);
                    }
                }
                Some(raw)
            } else {
                None
            };
            backend.write_color(color, raw);
        }
    }
    Ok(())
}
