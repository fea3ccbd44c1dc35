//! GLSL backend
//!
//! Emits scalarised GLSL 4.50. Register banks become float arrays, every
//! computed value is bound to a typed temporary, and the interface is
//! declared from the binding plan when the body is complete.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::{
    BinaryOp, ColorAccess, InputRef, Lod, SampleRequest, ScalarKind, TranslatedShader, UnaryOp,
    COLOR_ATTACHMENT_BINDING, MASK_BINDING,
};
use crate::backend::Backend;
use crate::binding::{identifier, BindingPlan, IteratorSource, VertexOutputKind};
use crate::compare::CompareOp;
use crate::operand::{Slot, StorageBank};
use crate::recompiler::PREDICATE_SLOTS;
use crate::types::{DataType, ProgramType};
use vs_core::FeatureState;

const GLSL_VERSION: u32 = 450;
const LANES: [char; 4] = ['x', 'y', 'z', 'w'];

/// Indented line sink
#[derive(Debug, Default)]
pub struct CodeWriter {
    out: String,
    indent: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

/// Handle to an expression of the GLSL backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlslValue(u32);

fn type_name(kind: ScalarKind) -> &'static str {
    match kind {
        ScalarKind::Float => "float",
        ScalarKind::Int => "int",
        ScalarKind::Uint => "uint",
        ScalarKind::Bool => "bool",
    }
}

fn float_literal(value: f32) -> String {
    if !value.is_finite() {
        format!("uintBitsToFloat({}u)", value.to_bits())
    } else if value.is_sign_negative() {
        format!("({:?})", value)
    } else {
        format!("{:?}", value)
    }
}

fn input_vector(data_type: DataType, normalized: bool) -> &'static str {
    match ScalarKind::of(data_type) {
        ScalarKind::Int if !normalized => "ivec4",
        ScalarKind::Uint if !normalized => "uvec4",
        _ => "vec4",
    }
}

/// GLSL 4.50 generator
pub struct GlslBackend<'a> {
    plan: &'a BindingPlan,
    features: FeatureState,
    color: ColorAccess,
    hash: String,
    body: CodeWriter,
    exprs: Vec<String>,
    temps: u32,
    /// Declared varying names by location
    varyings: BTreeMap<u32, String>,
}

impl<'a> GlslBackend<'a> {
    pub fn new(plan: &'a BindingPlan, features: FeatureState, hash: &str) -> Self {
        let mut varyings = BTreeMap::new();
        for iterator in &plan.iterators {
            if let IteratorSource::Varying { location } = iterator.source {
                varyings.entry(location).or_insert_with(|| identifier(&iterator.name));
            }
        }
        let mut body = CodeWriter::new();
        body.indent();
        Self {
            plan,
            features,
            color: ColorAccess::select(plan, features),
            hash: hash.to_string(),
            body,
            exprs: Vec::new(),
            temps: 0,
            varyings,
        }
    }

    fn stage_prefix(&self) -> &'static str {
        match self.plan.program_type {
            ProgramType::Vertex => "vert",
            ProgramType::Fragment => "frag",
        }
    }

    fn buffer_name(&self, buffer: usize) -> String {
        match self.plan.uniform_buffers.get(buffer) {
            Some(b) if b.index == 0 => format!("{}_defaultUniformBuffer", self.stage_prefix()),
            Some(b) => format!("{}_buffer{}", self.stage_prefix(), b.index),
            None => format!("{}_buffer_missing", self.stage_prefix()),
        }
    }

    fn text(&self, value: GlslValue) -> &str {
        &self.exprs[value.0 as usize]
    }

    fn literal(&mut self, text: String) -> GlslValue {
        self.exprs.push(text);
        GlslValue(self.exprs.len() as u32 - 1)
    }

    /// Bind `text` to a new temporary
    fn temp(&mut self, kind: ScalarKind, text: String) -> GlslValue {
        let name = format!("t{}", self.temps);
        self.temps += 1;
        self.body.line(&format!("{} {} = {};", type_name(kind), name, text));
        self.literal(name)
    }

    fn slot_ref(&self, slot: Slot) -> String {
        match slot.dynamic {
            None => format!("{}[{}]", slot.bank.name(), slot.word),
            Some(reg) => format!(
                "{}[{} + int(floatBitsToUint({}[{}])) * 2]",
                slot.bank.name(),
                slot.word,
                StorageBank::Index.name(),
                reg
            ),
        }
    }

    fn vector(&self, prefix: &str, values: &[GlslValue], size: usize) -> String {
        let mut parts: Vec<String> = values.iter().take(size).map(|v| self.text(*v).to_string()).collect();
        while parts.len() < size {
            parts.push("0.0".to_string());
        }
        if size == 1 {
            return parts.remove(0);
        }
        format!("{}{}({})", prefix, size, parts.join(", "))
    }

    fn split_vec4(&mut self, name: &str) -> [GlslValue; 4] {
        LANES.map(|lane| self.literal(format!("{}.{}", name, lane)))
    }

    fn frag_coord_texel(&self) -> &'static str {
        "ivec2(gl_FragCoord.xy)"
    }

    fn declarations(&self) -> String {
        let mut out = String::new();
        let plan = self.plan;
        let fragment = plan.program_type == ProgramType::Fragment;

        let _ = writeln!(out, "#version {}", GLSL_VERSION);
        let _ = writeln!(out, "// shader {}", self.hash);
        match self.color {
            ColorAccess::FramebufferFetch => {
                let _ = writeln!(out, "#extension GL_EXT_shader_framebuffer_fetch : require");
            }
            ColorAccess::Interlock => {
                let _ = writeln!(out, "#extension GL_ARB_fragment_shader_interlock : require");
                let _ = writeln!(out, "layout(pixel_interlock_ordered) in;");
            }
            ColorAccess::Output => {}
        }
        out.push('\n');

        for (i, buffer) in plan.uniform_buffers.iter().enumerate() {
            let name = self.buffer_name(i);
            let _ = writeln!(
                out,
                "layout(std140, binding = {}) uniform {}_block {{ vec4 {}[{}]; }};",
                buffer.binding,
                name,
                name,
                buffer.vec4_count().max(1)
            );
        }
        for sampler in &plan.samplers {
            let _ = writeln!(
                out,
                "layout(binding = {}) uniform {} {};",
                sampler.binding,
                if sampler.cube { "samplerCube" } else { "sampler2D" },
                identifier(&sampler.name)
            );
        }

        for attribute in &plan.attributes {
            let count = attribute.location_count();
            let array = if count > 1 { format!("[{}]", count) } else { String::new() };
            let _ = writeln!(
                out,
                "layout(location = {}) in {} {}{};",
                attribute.location,
                input_vector(attribute.input_type, attribute.normalized),
                identifier(&attribute.name),
                array
            );
        }
        for (location, name) in &self.varyings {
            let _ = writeln!(out, "layout(location = {}) in vec4 {};", location, name);
        }

        for output in &plan.vertex_outputs {
            if output.kind != VertexOutputKind::Position {
                let _ = writeln!(out, "layout(location = {}) out vec4 {};", output.location, identifier(&output.name));
            }
        }
        if fragment {
            match self.color {
                ColorAccess::FramebufferFetch => {
                    let _ = writeln!(out, "layout(location = 0) inout vec4 out_color;");
                }
                ColorAccess::Interlock => {
                    let _ = writeln!(
                        out,
                        "layout(binding = {}, rgba8) uniform coherent image2D f_colorAttachment;",
                        COLOR_ATTACHMENT_BINDING
                    );
                }
                ColorAccess::Output => {
                    let _ = writeln!(out, "layout(location = 0) out vec4 out_color;");
                }
            }
            if self.features.preserve_f16_nan && plan.color_type == DataType::F16 {
                let _ = writeln!(out, "layout(location = 1) out uvec4 out_color_raw;");
            }
            if self.features.use_mask {
                let _ = writeln!(out, "layout(binding = {}, rgba8) uniform readonly image2D f_mask;", MASK_BINDING);
            }
        }
        out.push('\n');

        for bank in StorageBank::ALL {
            let _ = writeln!(out, "float {}[{}];", bank.name(), bank.size());
        }
        let _ = writeln!(out, "bool p[{}];", PREDICATE_SLOTS);
        out.push('\n');
        out
    }
}

impl Backend for GlslBackend<'_> {
    type Value = GlslValue;

    fn load_slot(&mut self, slot: Slot) -> GlslValue {
        let text = self.slot_ref(slot);
        self.temp(ScalarKind::Float, text)
    }

    fn store_slot(&mut self, slot: Slot, value: GlslValue) {
        let line = format!("{} = {};", self.slot_ref(slot), self.text(value));
        self.body.line(&line);
    }

    fn load_predicate(&mut self, index: u8) -> GlslValue {
        self.temp(ScalarKind::Bool, format!("p[{}]", index))
    }

    fn store_predicate(&mut self, index: u8, value: GlslValue) {
        let line = format!("p[{}] = {};", index, self.text(value));
        self.body.line(&line);
    }

    fn const_float(&mut self, value: f32) -> GlslValue {
        self.literal(float_literal(value))
    }

    fn const_uint(&mut self, value: u32) -> GlslValue {
        self.literal(format!("{}u", value))
    }

    fn const_int(&mut self, value: i32) -> GlslValue {
        let text = if value < 0 { format!("({})", value) } else { value.to_string() };
        self.literal(text)
    }

    fn const_bool(&mut self, value: bool) -> GlslValue {
        self.literal(value.to_string())
    }

    fn bitcast(&mut self, value: GlslValue, from: ScalarKind, to: ScalarKind) -> GlslValue {
        if from == to {
            return value;
        }
        let a = self.text(value);
        let text = match (from, to) {
            (ScalarKind::Float, ScalarKind::Uint) => format!("floatBitsToUint({})", a),
            (ScalarKind::Float, ScalarKind::Int) => format!("floatBitsToInt({})", a),
            (ScalarKind::Uint, ScalarKind::Float) => format!("uintBitsToFloat({})", a),
            (ScalarKind::Int, ScalarKind::Float) => format!("intBitsToFloat({})", a),
            (_, to) => format!("{}({})", type_name(to), a),
        };
        self.temp(to, text)
    }

    fn convert(&mut self, value: GlslValue, from: ScalarKind, to: ScalarKind) -> GlslValue {
        if from == to {
            return value;
        }
        let text = format!("{}({})", type_name(to), self.text(value));
        self.temp(to, text)
    }

    fn extract_bits(&mut self, value: GlslValue, offset: u32, count: u32, signed: bool) -> GlslValue {
        let a = self.text(value);
        if signed {
            let text = format!("bitfieldExtract(int({}), {}, {})", a, offset, count);
            self.temp(ScalarKind::Int, text)
        } else {
            let text = format!("bitfieldExtract({}, {}, {})", a, offset, count);
            self.temp(ScalarKind::Uint, text)
        }
    }

    fn insert_bits(&mut self, base: GlslValue, insert: GlslValue, offset: u32, count: u32) -> GlslValue {
        let text = format!("bitfieldInsert({}, {}, {}, {})", self.text(base), self.text(insert), offset, count);
        self.temp(ScalarKind::Uint, text)
    }

    fn half_to_float(&mut self, bits: GlslValue) -> GlslValue {
        let text = format!("unpackHalf2x16({}).x", self.text(bits));
        self.temp(ScalarKind::Float, text)
    }

    fn float_to_half(&mut self, value: GlslValue) -> GlslValue {
        let text = format!("packHalf2x16(vec2({}, 0.0))", self.text(value));
        self.temp(ScalarKind::Uint, text)
    }

    fn binary(&mut self, op: BinaryOp, kind: ScalarKind, a: GlslValue, b: GlslValue) -> GlslValue {
        let (a, b) = (self.text(a), self.text(b));
        let infix = |symbol: &str| format!("{} {} {}", a, symbol, b);
        let text = match (op, kind) {
            (BinaryOp::Add, _) => infix("+"),
            (BinaryOp::Sub, _) => infix("-"),
            (BinaryOp::Mul, _) => infix("*"),
            (BinaryOp::Div, _) => infix("/"),
            (BinaryOp::Min, _) => format!("min({}, {})", a, b),
            (BinaryOp::Max, _) => format!("max({}, {})", a, b),
            (BinaryOp::And, ScalarKind::Bool) => infix("&&"),
            (BinaryOp::Or, ScalarKind::Bool) => infix("||"),
            (BinaryOp::Xor, ScalarKind::Bool) => infix("^^"),
            (BinaryOp::And, _) => infix("&"),
            (BinaryOp::Or, _) => infix("|"),
            (BinaryOp::Xor, _) => infix("^"),
            (BinaryOp::Shl, _) => infix("<<"),
            (BinaryOp::Shr, _) => infix(">>"),
        };
        self.temp(kind, text)
    }

    fn unary(&mut self, op: UnaryOp, kind: ScalarKind, a: GlslValue) -> GlslValue {
        let a = self.text(a);
        let text = match op {
            UnaryOp::Neg => format!("-{}", a),
            UnaryOp::Abs => format!("abs({})", a),
            UnaryOp::Floor => format!("floor({})", a),
            UnaryOp::Round => format!("round({})", a),
            UnaryOp::Saturate => format!("clamp({}, 0.0, 1.0)", a),
            UnaryOp::Rsq => format!("inversesqrt({})", a),
            UnaryOp::Log2 => format!("log2({})", a),
            UnaryOp::Exp2 => format!("exp2({})", a),
            UnaryOp::Dfdx | UnaryOp::Dfdy if self.plan.is_vertex() => "0.0".to_string(),
            UnaryOp::Dfdx => format!("dFdx({})", a),
            UnaryOp::Dfdy => format!("dFdy({})", a),
            UnaryOp::Not if kind == ScalarKind::Bool => format!("!{}", a),
            UnaryOp::Not => format!("~{}", a),
        };
        self.temp(kind, text)
    }

    fn compare(&mut self, op: CompareOp, _kind: ScalarKind, a: GlslValue, b: GlslValue) -> GlslValue {
        let text = match op.glsl_operator() {
            Some(symbol) => format!("{} {} {}", self.text(a), symbol, self.text(b)),
            None => "true".to_string(),
        };
        self.temp(ScalarKind::Bool, text)
    }

    fn select(&mut self, kind: ScalarKind, condition: GlslValue, a: GlslValue, b: GlslValue) -> GlslValue {
        let text = format!("{} ? {} : {}", self.text(condition), self.text(a), self.text(b));
        self.temp(kind, text)
    }

    fn sample(&mut self, request: &SampleRequest<GlslValue>) -> [GlslValue; 4] {
        let Some(sampler) = self.plan.samplers.get(request.sampler) else {
            return [self.const_float(0.0); 4];
        };
        let name = identifier(&sampler.name);
        let size = if sampler.cube { 3 } else { 2 };
        let coords = self.vector("vec", &request.coords, size);
        let vertex = self.plan.is_vertex();

        let call = match &request.lod {
            Lod::Implicit | Lod::Bias(_) if vertex => format!("textureLod({}, {}, 0.0)", name, coords),
            Lod::Implicit => format!("texture({}, {})", name, coords),
            Lod::Bias(bias) => format!("texture({}, {}, {})", name, coords, self.text(*bias)),
            Lod::Level(level) => format!("textureLod({}, {}, {})", name, coords, self.text(*level)),
            Lod::Gradient { dx, dy } => format!(
                "textureGrad({}, {}, {}, {})",
                name,
                coords,
                self.vector("vec", dx, size),
                self.vector("vec", dy, size)
            ),
        };
        let texel = format!("t{}", self.temps);
        self.temps += 1;
        self.body.line(&format!("vec4 {} = {};", texel, call));
        self.split_vec4(&texel)
    }

    fn begin_if(&mut self, condition: GlslValue) {
        let line = format!("if ({}) {{", self.text(condition));
        self.body.line(&line);
        self.body.indent();
    }

    fn begin_else(&mut self) {
        self.body.dedent();
        self.body.line("} else {");
        self.body.indent();
    }

    fn end_if(&mut self) {
        self.body.dedent();
        self.body.line("}");
    }

    fn begin_loop(&mut self) {
        self.body.line("while (true) {");
        self.body.indent();
    }

    fn end_loop(&mut self) {
        self.body.dedent();
        self.body.line("}");
    }

    fn emit_break(&mut self, condition: Option<GlslValue>) {
        match condition {
            Some(c) => {
                let line = format!("if ({}) break;", self.text(c));
                self.body.line(&line);
            }
            None => self.body.line("break;"),
        }
    }

    fn emit_continue(&mut self, condition: Option<GlslValue>) {
        match condition {
            Some(c) => {
                let line = format!("if ({}) continue;", self.text(c));
                self.body.line(&line);
            }
            None => self.body.line("continue;"),
        }
    }

    fn kill(&mut self) {
        self.body.line("discard;");
    }

    fn comment(&mut self, text: &str) {
        self.body.line(&format!("// {}", text));
    }

    fn read_input(&mut self, input: InputRef, component: u32) -> GlslValue {
        let lane = LANES[(component % 4) as usize];
        let text = match input {
            InputRef::Attribute(i) => {
                let Some(attribute) = self.plan.attributes.get(i) else {
                    return self.const_float(0.0);
                };
                let name = identifier(&attribute.name);
                let element = if attribute.location_count() > 1 {
                    format!("{}[{}].{}", name, component / 4, lane)
                } else {
                    format!("{}.{}", name, lane)
                };
                if input_vector(attribute.input_type, attribute.normalized) == "vec4" {
                    element
                } else {
                    format!("float({})", element)
                }
            }
            InputRef::Iterator(i) => {
                let Some(iterator) = self.plan.iterators.get(i) else {
                    return self.const_float(0.0);
                };
                match iterator.source {
                    IteratorSource::Varying { location } => match self.varyings.get(&location).cloned() {
                        Some(name) => format!("{}.{}", name, lane),
                        None => return self.const_float(0.0),
                    },
                    IteratorSource::FragCoord => format!("gl_FragCoord.{}", lane),
                    IteratorSource::PointCoord => match component {
                        0 | 1 => format!("gl_PointCoord.{}", lane),
                        2 => return self.const_float(0.0),
                        _ => return self.const_float(1.0),
                    },
                }
            }
        };
        self.temp(ScalarKind::Float, text)
    }

    fn read_uniform(&mut self, buffer: usize, word: u32) -> GlslValue {
        let text = format!("{}[{}].{}", self.buffer_name(buffer), word / 4, LANES[(word % 4) as usize]);
        self.temp(ScalarKind::Float, text)
    }

    fn read_last_color(&mut self) -> Option<[GlslValue; 4]> {
        let text = match self.color {
            ColorAccess::Output => return None,
            ColorAccess::FramebufferFetch => "out_color".to_string(),
            ColorAccess::Interlock => {
                self.body.line("beginInvocationInterlockARB();");
                format!("imageLoad(f_colorAttachment, {})", self.frag_coord_texel())
            }
        };
        let name = format!("t{}", self.temps);
        self.temps += 1;
        self.body.line(&format!("vec4 {} = {};", name, text));
        Some(self.split_vec4(&name))
    }

    fn read_mask(&mut self) -> [GlslValue; 4] {
        let name = format!("t{}", self.temps);
        self.temps += 1;
        let line = format!("vec4 {} = imageLoad(f_mask, {});", name, self.frag_coord_texel());
        self.body.line(&line);
        self.split_vec4(&name)
    }

    fn write_output(&mut self, output: usize, values: [GlslValue; 4]) {
        let Some(binding) = self.plan.vertex_outputs.get(output) else {
            return;
        };
        let target = match binding.kind {
            VertexOutputKind::Position => "gl_Position".to_string(),
            _ => identifier(&binding.name),
        };
        let line = format!("{} = {};", target, self.vector("vec", &values, 4));
        self.body.line(&line);
    }

    fn write_color(&mut self, color: [GlslValue; 4], raw: Option<[GlslValue; 4]>) {
        let color = self.vector("vec", &color, 4);
        match self.color {
            ColorAccess::Interlock => {
                let line = format!("imageStore(f_colorAttachment, {}, {});", self.frag_coord_texel(), color);
                self.body.line(&line);
                self.body.line("endInvocationInterlockARB();");
            }
            _ => self.body.line(&format!("out_color = {};", color)),
        }
        if let Some(raw) = raw {
            let line = format!("out_color_raw = {};", self.vector("uvec", &raw, 4));
            self.body.line(&line);
        }
    }

    fn finish(self) -> TranslatedShader {
        let mut source = self.declarations();
        source.push_str("void main() {\n");
        source.push_str(&self.body.into_string());
        source.push_str("}\n");
        TranslatedShader::Glsl(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{SamplerBinding, UniformBuffer};

    fn plan(program_type: ProgramType) -> BindingPlan {
        BindingPlan {
            program_type,
            native_color: false,
            color_type: DataType::F16,
            uniform_buffers: Vec::new(),
            uniforms: Vec::new(),
            samplers: Vec::new(),
            dependent_samplers: Default::default(),
            literals: Vec::new(),
            attributes: Vec::new(),
            iterators: Vec::new(),
            texture_queries: Vec::new(),
            vertex_outputs: Vec::new(),
        }
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(float_literal(1.0), "1.0");
        assert_eq!(float_literal(-0.5), "(-0.5)");
        assert_eq!(float_literal(f32::INFINITY), "uintBitsToFloat(2139095040u)");
    }

    #[test]
    fn test_loads_are_bound_before_stores() {
        let plan = plan(ProgramType::Fragment);
        let mut glsl = GlslBackend::new(&plan, FeatureState::default(), "0");
        let a = glsl.load_slot(Slot::fixed(StorageBank::Temp, 0));
        let b = glsl.load_slot(Slot::fixed(StorageBank::Temp, 1));
        glsl.store_slot(Slot::fixed(StorageBank::Temp, 0), b);
        glsl.store_slot(Slot::fixed(StorageBank::Temp, 1), a);
        let source = glsl.finish();
        let source = source.as_glsl().unwrap();
        assert!(source.contains("float t0 = r[0];"));
        assert!(source.contains("r[0] = t1;"));
        assert!(source.contains("r[1] = t0;"));
    }

    #[test]
    fn test_dynamic_slot() {
        let plan = plan(ProgramType::Vertex);
        let glsl = GlslBackend::new(&plan, FeatureState::default(), "0");
        let slot = Slot {
            bank: StorageBank::Temp,
            word: 4,
            dynamic: Some(1),
        };
        assert_eq!(glsl.slot_ref(slot), "r[4 + int(floatBitsToUint(idx[1])) * 2]");
    }

    #[test]
    fn test_structure_indentation() {
        let plan = plan(ProgramType::Fragment);
        let mut glsl = GlslBackend::new(&plan, FeatureState::default(), "0");
        let c = glsl.load_predicate(0);
        glsl.begin_if(c);
        glsl.kill();
        glsl.begin_else();
        glsl.begin_loop();
        glsl.emit_break(None);
        glsl.end_loop();
        glsl.end_if();
        let source = glsl.finish();
        let source = source.as_glsl().unwrap();
        assert!(source.contains("    if (t0) {\n        discard;\n    } else {\n        while (true) {\n            break;\n"));
    }

    #[test]
    fn test_declarations() {
        let mut plan = plan(ProgramType::Fragment);
        plan.uniform_buffers.push(UniformBuffer {
            key: 0,
            index: 0,
            binding: 15,
            size_words: 8,
            reg_block_size: 8,
            reg_start_offset: 0,
            base_sa_offset: 0,
        });
        plan.samplers.push(SamplerBinding {
            name: "tex.diffuse".to_string(),
            unit: 0,
            binding: 0,
            cube: false,
        });
        let features = FeatureState {
            use_mask: true,
            ..Default::default()
        };
        let glsl = GlslBackend::new(&plan, features, "abc");
        let source = glsl.finish();
        let source = source.as_glsl().unwrap();
        assert!(source.starts_with("#version 450\n// shader abc\n"));
        assert!(source.contains("layout(std140, binding = 15) uniform frag_defaultUniformBuffer_block { vec4 frag_defaultUniformBuffer[2]; };"));
        assert!(source.contains("uniform sampler2D tex_diffuse;"));
        assert!(source.contains("out vec4 out_color;"));
        assert!(source.contains("image2D f_mask;"));
        assert!(source.contains("float sa[256];"));
    }
}
