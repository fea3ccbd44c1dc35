//! SPIR-V backend
//!
//! Emits a SPIR-V 1.0 module with structured control flow. Register banks
//! are private float arrays initialised to zero; every interface object is
//! declared up front from the binding plan.

pub mod builder;

use std::collections::BTreeMap;

use super::{
    Backend, BinaryOp, ColorAccess, InputRef, Lod, SampleRequest, ScalarKind, TranslatedShader, UnaryOp,
    ATTACHMENT_SET, COLOR_ATTACHMENT_BINDING, MASK_BINDING, TEXTURE_SET, UNIFORM_SET,
};
use crate::binding::{identifier, BindingPlan, IteratorSource, VertexOutputKind};
use crate::compare::CompareOp;
use crate::operand::{Slot, StorageBank};
use crate::recompiler::PREDICATE_SLOTS;
use crate::types::{DataType, ProgramType};
pub use builder::SpirVBuilder;
use builder::*;
use vs_core::FeatureState;

// Function-level opcodes
const OP_EXT_INST: u16 = 12;
const OP_FUNCTION: u16 = 54;
const OP_FUNCTION_END: u16 = 56;
const OP_LOAD: u16 = 61;
const OP_STORE: u16 = 62;
const OP_ACCESS_CHAIN: u16 = 65;
const OP_COMPOSITE_CONSTRUCT: u16 = 80;
const OP_COMPOSITE_EXTRACT: u16 = 81;
const OP_IMAGE_SAMPLE_IMPLICIT_LOD: u16 = 87;
const OP_IMAGE_SAMPLE_EXPLICIT_LOD: u16 = 88;
const OP_IMAGE_READ: u16 = 98;
const OP_IMAGE_WRITE: u16 = 99;
const OP_CONVERT_F_TO_U: u16 = 109;
const OP_CONVERT_F_TO_S: u16 = 110;
const OP_CONVERT_S_TO_F: u16 = 111;
const OP_CONVERT_U_TO_F: u16 = 112;
const OP_BITCAST: u16 = 124;
const OP_SNEGATE: u16 = 126;
const OP_FNEGATE: u16 = 127;
const OP_IADD: u16 = 128;
const OP_FADD: u16 = 129;
const OP_ISUB: u16 = 130;
const OP_FSUB: u16 = 131;
const OP_IMUL: u16 = 132;
const OP_FMUL: u16 = 133;
const OP_UDIV: u16 = 134;
const OP_SDIV: u16 = 135;
const OP_FDIV: u16 = 136;
const OP_LOGICAL_NOT_EQUAL: u16 = 165;
const OP_LOGICAL_OR: u16 = 166;
const OP_LOGICAL_AND: u16 = 167;
const OP_LOGICAL_NOT: u16 = 168;
const OP_SELECT: u16 = 169;
const OP_SHIFT_RIGHT_LOGICAL: u16 = 194;
const OP_SHIFT_RIGHT_ARITHMETIC: u16 = 195;
const OP_SHIFT_LEFT_LOGICAL: u16 = 196;
const OP_BITWISE_OR: u16 = 197;
const OP_BITWISE_XOR: u16 = 198;
const OP_BITWISE_AND: u16 = 199;
const OP_NOT: u16 = 200;
const OP_BIT_FIELD_INSERT: u16 = 201;
const OP_BIT_FIELD_S_EXTRACT: u16 = 202;
const OP_BIT_FIELD_U_EXTRACT: u16 = 203;
const OP_DPDX: u16 = 207;
const OP_DPDY: u16 = 208;
const OP_LOOP_MERGE: u16 = 246;
const OP_SELECTION_MERGE: u16 = 247;
const OP_LABEL: u16 = 248;
const OP_BRANCH: u16 = 249;
const OP_BRANCH_CONDITIONAL: u16 = 250;
const OP_KILL: u16 = 252;
const OP_RETURN: u16 = 253;
const OP_BEGIN_INVOCATION_INTERLOCK: u16 = 5364;
const OP_END_INVOCATION_INTERLOCK: u16 = 5365;

// GLSL.std.450 instructions
const GLSL_ROUND: u32 = 1;
const GLSL_FABS: u32 = 4;
const GLSL_SABS: u32 = 5;
const GLSL_FLOOR: u32 = 8;
const GLSL_EXP2: u32 = 29;
const GLSL_LOG2: u32 = 30;
const GLSL_INVERSE_SQRT: u32 = 32;
const GLSL_FMIN: u32 = 37;
const GLSL_UMIN: u32 = 38;
const GLSL_SMIN: u32 = 39;
const GLSL_FMAX: u32 = 40;
const GLSL_UMAX: u32 = 41;
const GLSL_SMAX: u32 = 42;
const GLSL_FCLAMP: u32 = 43;
const GLSL_PACK_HALF_2X16: u32 = 58;
const GLSL_UNPACK_HALF_2X16: u32 = 62;

// Execution models and modes
const EXEC_MODEL_VERTEX: u32 = 0;
const EXEC_MODEL_FRAGMENT: u32 = 4;
const EXEC_MODE_ORIGIN_UPPER_LEFT: u32 = 7;
const EXEC_MODE_PIXEL_INTERLOCK_ORDERED: u32 = 5366;

// Builtins
const BUILTIN_POSITION: u32 = 0;
const BUILTIN_FRAG_COORD: u32 = 15;
const BUILTIN_POINT_COORD: u32 = 16;

// Image operands
const IMAGE_OPERAND_BIAS: u32 = 0x1;
const IMAGE_OPERAND_LOD: u32 = 0x2;
const IMAGE_OPERAND_GRAD: u32 = 0x4;

// Image dimensions and formats
const DIM_2D: u32 = 1;
const DIM_CUBE: u32 = 3;
const DIM_SUBPASS_DATA: u32 = 6;
const FORMAT_UNKNOWN: u32 = 0;
const FORMAT_RGBA8: u32 = 4;

/// Result ID of the SPIR-V backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpvValue(u32);

/// Open structured construct
#[derive(Debug, Clone, Copy)]
enum Construct {
    Selection { merge: u32, else_label: u32, has_else: bool },
    Loop { header: u32, merge: u32, continue_target: u32 },
}

#[derive(Debug, Clone, Copy)]
struct InputVar {
    var: u32,
    /// Scalar kind of the components
    kind: ScalarKind,
    arrayed: bool,
}

/// SPIR-V 1.0 generator
pub struct SpirvBackend<'a> {
    plan: &'a BindingPlan,
    features: FeatureState,
    color: ColorAccess,
    builder: SpirVBuilder,
    main_id: u32,
    /// Bank variables in [`StorageBank::ALL`] order
    banks: [u32; 7],
    predicates: u32,
    attributes: Vec<InputVar>,
    varyings: BTreeMap<u32, u32>,
    frag_coord: Option<u32>,
    point_coord: Option<u32>,
    buffers: Vec<u32>,
    samplers: Vec<u32>,
    outputs: Vec<u32>,
    color_out: Option<u32>,
    color_raw: Option<u32>,
    color_image: Option<u32>,
    mask_image: Option<u32>,
    subpass: Option<u32>,
    interface: Vec<u32>,
    constructs: Vec<Construct>,
}

impl<'a> SpirvBackend<'a> {
    pub fn new(plan: &'a BindingPlan, features: FeatureState, hash: &str) -> Self {
        let mut backend = Self {
            plan,
            features,
            color: ColorAccess::select(plan, features),
            builder: SpirVBuilder::new(),
            main_id: 0,
            banks: [0; 7],
            predicates: 0,
            attributes: Vec::new(),
            varyings: BTreeMap::new(),
            frag_coord: None,
            point_coord: None,
            buffers: Vec::new(),
            samplers: Vec::new(),
            outputs: Vec::new(),
            color_out: None,
            color_raw: None,
            color_image: None,
            mask_image: None,
            subpass: None,
            interface: Vec::new(),
            constructs: Vec::new(),
        };
        backend.declare_storage();
        backend.declare_inputs();
        backend.declare_resources();
        backend.declare_outputs();
        backend.begin_main(hash);
        backend
    }

    fn fragment(&self) -> bool {
        self.plan.program_type == ProgramType::Fragment
    }

    fn scalar_type(&mut self, kind: ScalarKind) -> u32 {
        match kind {
            ScalarKind::Float => self.builder.type_float(),
            ScalarKind::Int => self.builder.type_int(),
            ScalarKind::Uint => self.builder.type_uint(),
            ScalarKind::Bool => self.builder.type_bool(),
        }
    }

    fn vec_type(&mut self, kind: ScalarKind, count: u32) -> u32 {
        let scalar = self.scalar_type(kind);
        self.builder.type_vector(scalar, count)
    }

    fn global(&mut self, storage: u32, pointee: u32, name: &str) -> u32 {
        let pointer = self.builder.type_pointer(storage, pointee);
        let var = self.builder.add_variable(pointer, storage, None);
        self.builder.add_name(var, name);
        if storage == STORAGE_INPUT || storage == STORAGE_OUTPUT {
            self.interface.push(var);
        }
        var
    }

    fn int_const(&mut self, value: i32) -> u32 {
        let ty = self.builder.type_int();
        self.builder.constant(ty, value as u32)
    }

    fn uint_const(&mut self, value: u32) -> u32 {
        let ty = self.builder.type_uint();
        self.builder.constant(ty, value)
    }

    //=========================================================================
    // DECLARATIONS
    //=========================================================================

    fn declare_storage(&mut self) {
        let float = self.builder.type_float();
        for (i, bank) in StorageBank::ALL.iter().enumerate() {
            let array = self.builder.type_array(float, bank.size());
            let pointer = self.builder.type_pointer(STORAGE_PRIVATE, array);
            let zero = self.builder.constant_null(array);
            let var = self.builder.add_variable(pointer, STORAGE_PRIVATE, Some(zero));
            self.builder.add_name(var, bank.name());
            self.banks[i] = var;
        }
        let boolean = self.builder.type_bool();
        let array = self.builder.type_array(boolean, PREDICATE_SLOTS as u32);
        let pointer = self.builder.type_pointer(STORAGE_PRIVATE, array);
        let zero = self.builder.constant_null(array);
        self.predicates = self.builder.add_variable(pointer, STORAGE_PRIVATE, Some(zero));
        self.builder.add_name(self.predicates, "p");
    }

    fn frag_coord_var(&mut self) -> u32 {
        if let Some(var) = self.frag_coord {
            return var;
        }
        let vec4 = self.vec_type(ScalarKind::Float, 4);
        let var = self.global(STORAGE_INPUT, vec4, "gl_FragCoord");
        self.builder.add_builtin(var, BUILTIN_FRAG_COORD);
        self.frag_coord = Some(var);
        var
    }

    fn declare_inputs(&mut self) {
        let plan = self.plan;
        for attribute in &plan.attributes {
            let kind = if attribute.normalized {
                ScalarKind::Float
            } else {
                match ScalarKind::of(attribute.input_type) {
                    ScalarKind::Bool => ScalarKind::Float,
                    other => other,
                }
            };
            let vec4 = self.vec_type(kind, 4);
            let count = attribute.location_count();
            let ty = if count > 1 {
                self.builder.type_array(vec4, count)
            } else {
                vec4
            };
            let var = self.global(STORAGE_INPUT, ty, &identifier(&attribute.name));
            self.builder.add_location(var, attribute.location);
            self.attributes.push(InputVar {
                var,
                kind,
                arrayed: count > 1,
            });
        }

        for iterator in &plan.iterators {
            match iterator.source {
                IteratorSource::Varying { location } => {
                    if !self.varyings.contains_key(&location) {
                        let vec4 = self.vec_type(ScalarKind::Float, 4);
                        let var = self.global(STORAGE_INPUT, vec4, &identifier(&iterator.name));
                        self.builder.add_location(var, location);
                        self.varyings.insert(location, var);
                    }
                }
                IteratorSource::FragCoord => {
                    self.frag_coord_var();
                }
                IteratorSource::PointCoord => {
                    if self.point_coord.is_none() {
                        let vec2 = self.vec_type(ScalarKind::Float, 2);
                        let var = self.global(STORAGE_INPUT, vec2, "gl_PointCoord");
                        self.builder.add_builtin(var, BUILTIN_POINT_COORD);
                        self.point_coord = Some(var);
                    }
                }
            }
        }
    }

    fn declare_resources(&mut self) {
        let plan = self.plan;
        let stage = if self.fragment() { "frag" } else { "vert" };
        for buffer in &plan.uniform_buffers {
            let vec4 = self.vec_type(ScalarKind::Float, 4);
            let array = self.builder.type_array(vec4, buffer.vec4_count().max(1));
            self.builder.decorate(array, DECORATION_ARRAY_STRIDE, &[16]);
            let block = self.builder.type_struct(&[array]);
            self.builder.decorate(block, DECORATION_BLOCK, &[]);
            self.builder.member_decorate(block, 0, DECORATION_OFFSET, &[0]);
            let name = if buffer.index == 0 {
                format!("{}_defaultUniformBuffer", stage)
            } else {
                format!("{}_buffer{}", stage, buffer.index)
            };
            let var = self.global(STORAGE_UNIFORM, block, &name);
            self.builder.add_descriptor(var, UNIFORM_SET, buffer.binding);
            self.buffers.push(var);
        }

        let float = self.builder.type_float();
        for sampler in &plan.samplers {
            let dim = if sampler.cube { DIM_CUBE } else { DIM_2D };
            let image = self.builder.type_image(float, dim, 1, FORMAT_UNKNOWN);
            let sampled = self.builder.type_sampled_image(image);
            let var = self.global(STORAGE_UNIFORM_CONSTANT, sampled, &identifier(&sampler.name));
            self.builder.add_descriptor(var, TEXTURE_SET, sampler.binding);
            self.samplers.push(var);
        }

        if !self.fragment() {
            return;
        }
        match self.color {
            ColorAccess::FramebufferFetch => {
                self.builder.add_capability(CAP_INPUT_ATTACHMENT);
                let image = self.builder.type_image(float, DIM_SUBPASS_DATA, 2, FORMAT_UNKNOWN);
                let var = self.global(STORAGE_UNIFORM_CONSTANT, image, "f_lastColor");
                self.builder.add_descriptor(var, ATTACHMENT_SET, COLOR_ATTACHMENT_BINDING);
                self.builder.decorate(var, DECORATION_INPUT_ATTACHMENT_INDEX, &[0]);
                self.subpass = Some(var);
            }
            ColorAccess::Interlock => {
                self.builder.add_capability(CAP_FRAGMENT_SHADER_PIXEL_INTERLOCK);
                self.builder.add_extension("SPV_EXT_fragment_shader_interlock");
                let image = self.builder.type_image(float, DIM_2D, 2, FORMAT_RGBA8);
                let var = self.global(STORAGE_UNIFORM_CONSTANT, image, "f_colorAttachment");
                self.builder.add_descriptor(var, ATTACHMENT_SET, COLOR_ATTACHMENT_BINDING);
                self.color_image = Some(var);
                self.frag_coord_var();
            }
            ColorAccess::Output => {}
        }
        if self.features.use_mask {
            let image = self.builder.type_image(float, DIM_2D, 2, FORMAT_RGBA8);
            let var = self.global(STORAGE_UNIFORM_CONSTANT, image, "f_mask");
            self.builder.add_descriptor(var, ATTACHMENT_SET, MASK_BINDING);
            self.builder.decorate(var, DECORATION_NON_WRITABLE, &[]);
            self.mask_image = Some(var);
            self.frag_coord_var();
        }
    }

    fn declare_outputs(&mut self) {
        let plan = self.plan;
        let vec4 = self.vec_type(ScalarKind::Float, 4);
        for output in &plan.vertex_outputs {
            let var = match output.kind {
                VertexOutputKind::Position => {
                    let var = self.global(STORAGE_OUTPUT, vec4, "gl_Position");
                    self.builder.add_builtin(var, BUILTIN_POSITION);
                    var
                }
                _ => {
                    let var = self.global(STORAGE_OUTPUT, vec4, &identifier(&output.name));
                    self.builder.add_location(var, output.location);
                    var
                }
            };
            self.outputs.push(var);
        }

        if self.fragment() {
            if self.color != ColorAccess::Interlock {
                let var = self.global(STORAGE_OUTPUT, vec4, "out_color");
                self.builder.add_location(var, 0);
                self.color_out = Some(var);
            }
            if self.features.preserve_f16_nan && plan.color_type == DataType::F16 {
                let uvec4 = self.vec_type(ScalarKind::Uint, 4);
                let var = self.global(STORAGE_OUTPUT, uvec4, "out_color_raw");
                self.builder.add_location(var, 1);
                self.color_raw = Some(var);
            }
        }
    }

    fn begin_main(&mut self, hash: &str) {
        let void = self.builder.type_void();
        let function = self.builder.type_function(void);
        self.main_id = self.builder.alloc_id();
        self.builder.add_name(self.main_id, &format!("main_{}", hash));
        SpirVBuilder::emit(&mut self.builder.functions, OP_FUNCTION, &[void, self.main_id, 0, function]);
        let entry = self.builder.alloc_id();
        self.label(entry);
    }

    //=========================================================================
    // INSTRUCTIONS
    //=========================================================================

    fn stmt(&mut self, opcode: u16, operands: &[u32]) {
        SpirVBuilder::emit(&mut self.builder.functions, opcode, operands);
    }

    /// Emit an instruction with a result and return its ID
    fn op(&mut self, opcode: u16, result_type: u32, operands: &[u32]) -> u32 {
        let id = self.builder.alloc_id();
        let mut words = vec![result_type, id];
        words.extend_from_slice(operands);
        self.stmt(opcode, &words);
        id
    }

    fn ext(&mut self, result_type: u32, instruction: u32, operands: &[u32]) -> u32 {
        let mut words = vec![self.builder.glsl_ext_id(), instruction];
        words.extend_from_slice(operands);
        self.op(OP_EXT_INST, result_type, &words)
    }

    fn label(&mut self, id: u32) {
        self.stmt(OP_LABEL, &[id]);
    }

    /// Start an unreachable block after a terminator
    fn fresh_block(&mut self) {
        let id = self.builder.alloc_id();
        self.label(id);
    }

    fn load(&mut self, ty: u32, pointer: u32) -> u32 {
        self.op(OP_LOAD, ty, &[pointer])
    }

    fn access(&mut self, storage: u32, pointee: u32, base: u32, indices: &[u32]) -> u32 {
        let pointer = self.builder.type_pointer(storage, pointee);
        let mut operands = vec![base];
        operands.extend_from_slice(indices);
        self.op(OP_ACCESS_CHAIN, pointer, &operands)
    }

    fn bank_var(&self, bank: StorageBank) -> u32 {
        let index = StorageBank::ALL.iter().position(|&b| b == bank).unwrap_or(0);
        self.banks[index]
    }

    fn slot_pointer(&mut self, slot: Slot) -> u32 {
        let float = self.builder.type_float();
        let index = match slot.dynamic {
            None => self.int_const(slot.word as i32),
            Some(reg) => {
                let idx_bank = self.bank_var(StorageBank::Index);
                let reg = self.int_const(reg as i32);
                let pointer = self.access(STORAGE_PRIVATE, float, idx_bank, &[reg]);
                let raw = self.load(float, pointer);
                let int = self.builder.type_int();
                let value = self.op(OP_BITCAST, int, &[raw]);
                let two = self.int_const(2);
                let scaled = self.op(OP_IMUL, int, &[value, two]);
                let base = self.int_const(slot.word as i32);
                self.op(OP_IADD, int, &[base, scaled])
            }
        };
        let bank = self.bank_var(slot.bank);
        self.access(STORAGE_PRIVATE, float, bank, &[index])
    }

    fn predicate_pointer(&mut self, index: u8) -> u32 {
        let boolean = self.builder.type_bool();
        let index = self.int_const(index as i32);
        self.access(STORAGE_PRIVATE, boolean, self.predicates, &[index])
    }

    fn construct(&mut self, kind: ScalarKind, parts: &[SpvValue], size: u32) -> u32 {
        let mut ids: Vec<u32> = parts.iter().take(size as usize).map(|v| v.0).collect();
        while ids.len() < size as usize {
            ids.push(self.const_float(0.0).0);
        }
        if size == 1 {
            return ids[0];
        }
        let ty = self.vec_type(kind, size);
        self.op(OP_COMPOSITE_CONSTRUCT, ty, &ids)
    }

    fn split(&mut self, kind: ScalarKind, vector: u32) -> [SpvValue; 4] {
        let scalar = self.scalar_type(kind);
        [0, 1, 2, 3].map(|i| SpvValue(self.op(OP_COMPOSITE_EXTRACT, scalar, &[vector, i])))
    }

    /// `ivec2(gl_FragCoord.xy)`
    fn frag_texel(&mut self) -> u32 {
        let var = self.frag_coord_var();
        let vec4 = self.vec_type(ScalarKind::Float, 4);
        let coord = self.load(vec4, var);
        let float = self.builder.type_float();
        let int = self.builder.type_int();
        let x = self.op(OP_COMPOSITE_EXTRACT, float, &[coord, 0]);
        let y = self.op(OP_COMPOSITE_EXTRACT, float, &[coord, 1]);
        let x = self.op(OP_CONVERT_F_TO_S, int, &[x]);
        let y = self.op(OP_CONVERT_F_TO_S, int, &[y]);
        let ivec2 = self.vec_type(ScalarKind::Int, 2);
        self.op(OP_COMPOSITE_CONSTRUCT, ivec2, &[x, y])
    }

    fn read_image(&mut self, var: u32, coord: u32) -> [SpvValue; 4] {
        let float = self.builder.type_float();
        let ty = self.builder.type_image(float, DIM_2D, 2, FORMAT_RGBA8);
        let image = self.load(ty, var);
        let vec4 = self.vec_type(ScalarKind::Float, 4);
        let texel = self.op(OP_IMAGE_READ, vec4, &[image, coord]);
        self.split(ScalarKind::Float, texel)
    }

    fn innermost_loop(&self) -> Option<(u32, u32)> {
        self.constructs.iter().rev().find_map(|c| match *c {
            Construct::Loop { merge, continue_target, .. } => Some((merge, continue_target)),
            Construct::Selection { .. } => None,
        })
    }

    /// Branch to `target`, conditionally through its own selection
    fn jump(&mut self, target: u32, condition: Option<SpvValue>) {
        match condition {
            None => {
                self.stmt(OP_BRANCH, &[target]);
                self.fresh_block();
            }
            Some(c) => {
                let merge = self.builder.alloc_id();
                let taken = self.builder.alloc_id();
                self.stmt(OP_SELECTION_MERGE, &[merge, 0]);
                self.stmt(OP_BRANCH_CONDITIONAL, &[c.0, taken, merge]);
                self.label(taken);
                self.stmt(OP_BRANCH, &[target]);
                self.label(merge);
            }
        }
    }
}

impl Backend for SpirvBackend<'_> {
    type Value = SpvValue;

    fn load_slot(&mut self, slot: Slot) -> SpvValue {
        let pointer = self.slot_pointer(slot);
        let float = self.builder.type_float();
        SpvValue(self.load(float, pointer))
    }

    fn store_slot(&mut self, slot: Slot, value: SpvValue) {
        let pointer = self.slot_pointer(slot);
        self.stmt(OP_STORE, &[pointer, value.0]);
    }

    fn load_predicate(&mut self, index: u8) -> SpvValue {
        let pointer = self.predicate_pointer(index);
        let boolean = self.builder.type_bool();
        SpvValue(self.load(boolean, pointer))
    }

    fn store_predicate(&mut self, index: u8, value: SpvValue) {
        let pointer = self.predicate_pointer(index);
        self.stmt(OP_STORE, &[pointer, value.0]);
    }

    fn const_float(&mut self, value: f32) -> SpvValue {
        let ty = self.builder.type_float();
        SpvValue(self.builder.constant(ty, value.to_bits()))
    }

    fn const_uint(&mut self, value: u32) -> SpvValue {
        SpvValue(self.uint_const(value))
    }

    fn const_int(&mut self, value: i32) -> SpvValue {
        SpvValue(self.int_const(value))
    }

    fn const_bool(&mut self, value: bool) -> SpvValue {
        SpvValue(self.builder.constant_bool(value))
    }

    fn bitcast(&mut self, value: SpvValue, from: ScalarKind, to: ScalarKind) -> SpvValue {
        if from == to {
            return value;
        }
        let ty = self.scalar_type(to);
        SpvValue(self.op(OP_BITCAST, ty, &[value.0]))
    }

    fn convert(&mut self, value: SpvValue, from: ScalarKind, to: ScalarKind) -> SpvValue {
        let opcode = match (from, to) {
            (a, b) if a == b => return value,
            (ScalarKind::Float, ScalarKind::Uint) => OP_CONVERT_F_TO_U,
            (ScalarKind::Float, ScalarKind::Int) => OP_CONVERT_F_TO_S,
            (ScalarKind::Int, ScalarKind::Float) => OP_CONVERT_S_TO_F,
            (ScalarKind::Uint, ScalarKind::Float) => OP_CONVERT_U_TO_F,
            _ => OP_BITCAST,
        };
        let ty = self.scalar_type(to);
        SpvValue(self.op(opcode, ty, &[value.0]))
    }

    fn extract_bits(&mut self, value: SpvValue, offset: u32, count: u32, signed: bool) -> SpvValue {
        let offset = self.uint_const(offset);
        let count = self.uint_const(count);
        if signed {
            let int = self.builder.type_int();
            let base = self.op(OP_BITCAST, int, &[value.0]);
            SpvValue(self.op(OP_BIT_FIELD_S_EXTRACT, int, &[base, offset, count]))
        } else {
            let uint = self.builder.type_uint();
            SpvValue(self.op(OP_BIT_FIELD_U_EXTRACT, uint, &[value.0, offset, count]))
        }
    }

    fn insert_bits(&mut self, base: SpvValue, insert: SpvValue, offset: u32, count: u32) -> SpvValue {
        let offset = self.uint_const(offset);
        let count = self.uint_const(count);
        let uint = self.builder.type_uint();
        SpvValue(self.op(OP_BIT_FIELD_INSERT, uint, &[base.0, insert.0, offset, count]))
    }

    fn half_to_float(&mut self, bits: SpvValue) -> SpvValue {
        let vec2 = self.vec_type(ScalarKind::Float, 2);
        let pair = self.ext(vec2, GLSL_UNPACK_HALF_2X16, &[bits.0]);
        let float = self.builder.type_float();
        SpvValue(self.op(OP_COMPOSITE_EXTRACT, float, &[pair, 0]))
    }

    fn float_to_half(&mut self, value: SpvValue) -> SpvValue {
        let zero = self.const_float(0.0);
        let vec2 = self.vec_type(ScalarKind::Float, 2);
        let pair = self.op(OP_COMPOSITE_CONSTRUCT, vec2, &[value.0, zero.0]);
        let uint = self.builder.type_uint();
        SpvValue(self.ext(uint, GLSL_PACK_HALF_2X16, &[pair]))
    }

    fn binary(&mut self, op: BinaryOp, kind: ScalarKind, a: SpvValue, b: SpvValue) -> SpvValue {
        use ScalarKind::{Bool, Float, Int, Uint};

        let ty = self.scalar_type(kind);
        let operands = [a.0, b.0];
        let opcode = match (op, kind) {
            (BinaryOp::Add, Float) => Ok(OP_FADD),
            (BinaryOp::Add, _) => Ok(OP_IADD),
            (BinaryOp::Sub, Float) => Ok(OP_FSUB),
            (BinaryOp::Sub, _) => Ok(OP_ISUB),
            (BinaryOp::Mul, Float) => Ok(OP_FMUL),
            (BinaryOp::Mul, _) => Ok(OP_IMUL),
            (BinaryOp::Div, Float) => Ok(OP_FDIV),
            (BinaryOp::Div, Int) => Ok(OP_SDIV),
            (BinaryOp::Div, _) => Ok(OP_UDIV),
            (BinaryOp::Min, Float) => Err(GLSL_FMIN),
            (BinaryOp::Min, Int) => Err(GLSL_SMIN),
            (BinaryOp::Min, _) => Err(GLSL_UMIN),
            (BinaryOp::Max, Float) => Err(GLSL_FMAX),
            (BinaryOp::Max, Int) => Err(GLSL_SMAX),
            (BinaryOp::Max, _) => Err(GLSL_UMAX),
            (BinaryOp::And, Bool) => Ok(OP_LOGICAL_AND),
            (BinaryOp::Or, Bool) => Ok(OP_LOGICAL_OR),
            (BinaryOp::Xor, Bool) => Ok(OP_LOGICAL_NOT_EQUAL),
            (BinaryOp::And, _) => Ok(OP_BITWISE_AND),
            (BinaryOp::Or, _) => Ok(OP_BITWISE_OR),
            (BinaryOp::Xor, _) => Ok(OP_BITWISE_XOR),
            (BinaryOp::Shl, _) => Ok(OP_SHIFT_LEFT_LOGICAL),
            (BinaryOp::Shr, Int) => Ok(OP_SHIFT_RIGHT_ARITHMETIC),
            (BinaryOp::Shr, Uint | Float | Bool) => Ok(OP_SHIFT_RIGHT_LOGICAL),
        };
        SpvValue(match opcode {
            Ok(opcode) => self.op(opcode, ty, &operands),
            Err(inst) => self.ext(ty, inst, &operands),
        })
    }

    fn unary(&mut self, op: UnaryOp, kind: ScalarKind, a: SpvValue) -> SpvValue {
        let ty = self.scalar_type(kind);
        let vertex = self.plan.is_vertex();
        SpvValue(match op {
            UnaryOp::Neg if kind == ScalarKind::Float => self.op(OP_FNEGATE, ty, &[a.0]),
            UnaryOp::Neg => self.op(OP_SNEGATE, ty, &[a.0]),
            UnaryOp::Abs if kind == ScalarKind::Float => self.ext(ty, GLSL_FABS, &[a.0]),
            UnaryOp::Abs => self.ext(ty, GLSL_SABS, &[a.0]),
            UnaryOp::Floor => self.ext(ty, GLSL_FLOOR, &[a.0]),
            UnaryOp::Round => self.ext(ty, GLSL_ROUND, &[a.0]),
            UnaryOp::Saturate => {
                let zero = self.const_float(0.0);
                let one = self.const_float(1.0);
                self.ext(ty, GLSL_FCLAMP, &[a.0, zero.0, one.0])
            }
            UnaryOp::Rsq => self.ext(ty, GLSL_INVERSE_SQRT, &[a.0]),
            UnaryOp::Log2 => self.ext(ty, GLSL_LOG2, &[a.0]),
            UnaryOp::Exp2 => self.ext(ty, GLSL_EXP2, &[a.0]),
            UnaryOp::Dfdx | UnaryOp::Dfdy if vertex => self.const_float(0.0).0,
            UnaryOp::Dfdx => self.op(OP_DPDX, ty, &[a.0]),
            UnaryOp::Dfdy => self.op(OP_DPDY, ty, &[a.0]),
            UnaryOp::Not if kind == ScalarKind::Bool => self.op(OP_LOGICAL_NOT, ty, &[a.0]),
            UnaryOp::Not => self.op(OP_NOT, ty, &[a.0]),
        })
    }

    fn compare(&mut self, op: CompareOp, kind: ScalarKind, a: SpvValue, b: SpvValue) -> SpvValue {
        match op.spirv_opcode(kind) {
            Some(opcode) => {
                let boolean = self.builder.type_bool();
                SpvValue(self.op(opcode, boolean, &[a.0, b.0]))
            }
            None => self.const_bool(true),
        }
    }

    fn select(&mut self, kind: ScalarKind, condition: SpvValue, a: SpvValue, b: SpvValue) -> SpvValue {
        let ty = self.scalar_type(kind);
        SpvValue(self.op(OP_SELECT, ty, &[condition.0, a.0, b.0]))
    }

    fn sample(&mut self, request: &SampleRequest<SpvValue>) -> [SpvValue; 4] {
        let (Some(&var), Some(cube)) = (
            self.samplers.get(request.sampler),
            self.plan.samplers.get(request.sampler).map(|s| s.cube),
        ) else {
            return [self.const_float(0.0); 4];
        };
        let float = self.builder.type_float();
        let dim = if cube { DIM_CUBE } else { DIM_2D };
        let size = if cube { 3 } else { 2 };
        let image = self.builder.type_image(float, dim, 1, FORMAT_UNKNOWN);
        let sampled_type = self.builder.type_sampled_image(image);
        let sampled = self.load(sampled_type, var);
        let coords = self.construct(ScalarKind::Float, &request.coords, size);
        let vec4 = self.vec_type(ScalarKind::Float, 4);
        let vertex = self.plan.is_vertex();

        let texel = match &request.lod {
            Lod::Implicit | Lod::Bias(_) if vertex => {
                let zero = self.const_float(0.0);
                self.op(OP_IMAGE_SAMPLE_EXPLICIT_LOD, vec4, &[sampled, coords, IMAGE_OPERAND_LOD, zero.0])
            }
            Lod::Implicit => self.op(OP_IMAGE_SAMPLE_IMPLICIT_LOD, vec4, &[sampled, coords]),
            Lod::Bias(bias) => self.op(
                OP_IMAGE_SAMPLE_IMPLICIT_LOD,
                vec4,
                &[sampled, coords, IMAGE_OPERAND_BIAS, bias.0],
            ),
            Lod::Level(level) => self.op(
                OP_IMAGE_SAMPLE_EXPLICIT_LOD,
                vec4,
                &[sampled, coords, IMAGE_OPERAND_LOD, level.0],
            ),
            Lod::Gradient { dx, dy } => {
                let dx = self.construct(ScalarKind::Float, dx, size);
                let dy = self.construct(ScalarKind::Float, dy, size);
                self.op(OP_IMAGE_SAMPLE_EXPLICIT_LOD, vec4, &[sampled, coords, IMAGE_OPERAND_GRAD, dx, dy])
            }
        };
        self.split(ScalarKind::Float, texel)
    }

    fn begin_if(&mut self, condition: SpvValue) {
        let merge = self.builder.alloc_id();
        let then_label = self.builder.alloc_id();
        let else_label = self.builder.alloc_id();
        self.stmt(OP_SELECTION_MERGE, &[merge, 0]);
        self.stmt(OP_BRANCH_CONDITIONAL, &[condition.0, then_label, else_label]);
        self.label(then_label);
        self.constructs.push(Construct::Selection {
            merge,
            else_label,
            has_else: false,
        });
    }

    fn begin_else(&mut self) {
        if let Some(Construct::Selection {
            merge,
            else_label,
            has_else,
        }) = self.constructs.last_mut()
        {
            let (merge, else_label) = (*merge, *else_label);
            *has_else = true;
            self.stmt(OP_BRANCH, &[merge]);
            self.label(else_label);
        }
    }

    fn end_if(&mut self) {
        if let Some(Construct::Selection {
            merge,
            else_label,
            has_else,
        }) = self.constructs.pop()
        {
            self.stmt(OP_BRANCH, &[merge]);
            if !has_else {
                self.label(else_label);
                self.stmt(OP_BRANCH, &[merge]);
            }
            self.label(merge);
        }
    }

    fn begin_loop(&mut self) {
        let header = self.builder.alloc_id();
        let body = self.builder.alloc_id();
        let continue_target = self.builder.alloc_id();
        let merge = self.builder.alloc_id();
        self.stmt(OP_BRANCH, &[header]);
        self.label(header);
        self.stmt(OP_LOOP_MERGE, &[merge, continue_target, 0]);
        self.stmt(OP_BRANCH, &[body]);
        self.label(body);
        self.constructs.push(Construct::Loop {
            header,
            merge,
            continue_target,
        });
    }

    fn end_loop(&mut self) {
        if let Some(Construct::Loop {
            header,
            merge,
            continue_target,
        }) = self.constructs.pop()
        {
            self.stmt(OP_BRANCH, &[continue_target]);
            self.label(continue_target);
            self.stmt(OP_BRANCH, &[header]);
            self.label(merge);
        }
    }

    fn emit_break(&mut self, condition: Option<SpvValue>) {
        if let Some((merge, _)) = self.innermost_loop() {
            self.jump(merge, condition);
        }
    }

    fn emit_continue(&mut self, condition: Option<SpvValue>) {
        if let Some((_, continue_target)) = self.innermost_loop() {
            self.jump(continue_target, condition);
        }
    }

    fn kill(&mut self) {
        self.stmt(OP_KILL, &[]);
        self.fresh_block();
    }

    fn comment(&mut self, _text: &str) {}

    fn read_input(&mut self, input: InputRef, component: u32) -> SpvValue {
        let float = self.builder.type_float();
        match input {
            InputRef::Attribute(i) => {
                let Some(attribute) = self.attributes.get(i).copied() else {
                    return self.const_float(0.0);
                };
                let scalar = self.scalar_type(attribute.kind);
                let lane = self.int_const((component % 4) as i32);
                let pointer = if attribute.arrayed {
                    let element = self.int_const((component / 4) as i32);
                    self.access(STORAGE_INPUT, scalar, attribute.var, &[element, lane])
                } else {
                    self.access(STORAGE_INPUT, scalar, attribute.var, &[lane])
                };
                let value = SpvValue(self.load(scalar, pointer));
                self.convert(value, attribute.kind, ScalarKind::Float)
            }
            InputRef::Iterator(i) => {
                let Some(iterator) = self.plan.iterators.get(i) else {
                    return self.const_float(0.0);
                };
                let var = match iterator.source {
                    IteratorSource::Varying { location } => self.varyings.get(&location).copied(),
                    IteratorSource::FragCoord => self.frag_coord,
                    IteratorSource::PointCoord if component < 2 => self.point_coord,
                    IteratorSource::PointCoord => {
                        return self.const_float(if component == 2 { 0.0 } else { 1.0 });
                    }
                };
                let Some(var) = var else {
                    return self.const_float(0.0);
                };
                let lane = self.int_const(component as i32);
                let pointer = self.access(STORAGE_INPUT, float, var, &[lane]);
                SpvValue(self.load(float, pointer))
            }
        }
    }

    fn read_uniform(&mut self, buffer: usize, word: u32) -> SpvValue {
        let Some(&var) = self.buffers.get(buffer) else {
            return self.const_float(0.0);
        };
        let float = self.builder.type_float();
        let member = self.int_const(0);
        let element = self.int_const((word / 4) as i32);
        let lane = self.int_const((word % 4) as i32);
        let pointer = self.access(STORAGE_UNIFORM, float, var, &[member, element, lane]);
        SpvValue(self.load(float, pointer))
    }

    fn read_last_color(&mut self) -> Option<[SpvValue; 4]> {
        match self.color {
            ColorAccess::Output => None,
            ColorAccess::FramebufferFetch => {
                let var = self.subpass?;
                let float = self.builder.type_float();
                let ty = self.builder.type_image(float, DIM_SUBPASS_DATA, 2, FORMAT_UNKNOWN);
                let image = self.load(ty, var);
                let ivec2 = self.vec_type(ScalarKind::Int, 2);
                let zero = self.int_const(0);
                let origin = self.builder.constant_composite(ivec2, &[zero, zero]);
                let vec4 = self.vec_type(ScalarKind::Float, 4);
                let texel = self.op(OP_IMAGE_READ, vec4, &[image, origin]);
                Some(self.split(ScalarKind::Float, texel))
            }
            ColorAccess::Interlock => {
                let var = self.color_image?;
                self.stmt(OP_BEGIN_INVOCATION_INTERLOCK, &[]);
                let coord = self.frag_texel();
                Some(self.read_image(var, coord))
            }
        }
    }

    fn read_mask(&mut self) -> [SpvValue; 4] {
        let Some(var) = self.mask_image else {
            return [self.const_float(1.0); 4];
        };
        let coord = self.frag_texel();
        self.read_image(var, coord)
    }

    fn write_output(&mut self, output: usize, values: [SpvValue; 4]) {
        let Some(&var) = self.outputs.get(output) else {
            return;
        };
        let vector = self.construct(ScalarKind::Float, &values, 4);
        self.stmt(OP_STORE, &[var, vector]);
    }

    fn write_color(&mut self, color: [SpvValue; 4], raw: Option<[SpvValue; 4]>) {
        let vector = self.construct(ScalarKind::Float, &color, 4);
        if let Some(var) = self.color_image {
            let float = self.builder.type_float();
            let ty = self.builder.type_image(float, DIM_2D, 2, FORMAT_RGBA8);
            let image = self.load(ty, var);
            let coord = self.frag_texel();
            self.stmt(OP_IMAGE_WRITE, &[image, coord, vector]);
            self.stmt(OP_END_INVOCATION_INTERLOCK, &[]);
        } else if let Some(var) = self.color_out {
            self.stmt(OP_STORE, &[var, vector]);
        }
        if let (Some(var), Some(raw)) = (self.color_raw, raw) {
            let ids: Vec<u32> = raw.iter().map(|v| v.0).collect();
            let uvec4 = self.vec_type(ScalarKind::Uint, 4);
            let vector = self.op(OP_COMPOSITE_CONSTRUCT, uvec4, &ids);
            self.stmt(OP_STORE, &[var, vector]);
        }
    }

    fn finish(mut self) -> TranslatedShader {
        self.stmt(OP_RETURN, &[]);
        self.stmt(OP_FUNCTION_END, &[]);

        let (model, fragment) = match self.plan.program_type {
            ProgramType::Vertex => (EXEC_MODEL_VERTEX, false),
            ProgramType::Fragment => (EXEC_MODEL_FRAGMENT, true),
        };
        let interface = std::mem::take(&mut self.interface);
        self.builder.add_entry_point(model, self.main_id, "main", &interface);
        if fragment {
            self.builder.add_execution_mode(self.main_id, EXEC_MODE_ORIGIN_UPPER_LEFT);
            if self.color == ColorAccess::Interlock {
                self.builder.add_execution_mode(self.main_id, EXEC_MODE_PIXEL_INTERLOCK_ORDERED);
            }
        }
        TranslatedShader::Spirv(self.builder.build())
    }
}
