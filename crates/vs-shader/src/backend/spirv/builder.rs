//! SPIR-V module builder
//!
//! Collects the logical sections of a module separately and concatenates
//! them in the order the format requires. Scalar, vector and pointer types
//! and scalar constants are deduplicated.

use std::collections::{BTreeSet, HashMap};

/// SPIR-V magic number
pub const SPIRV_MAGIC: u32 = 0x07230203;

/// SPIR-V version (1.0)
pub const SPIRV_VERSION: u32 = 0x00010000;

/// Generator ID
pub const SPIRV_GENERATOR: u32 = 0x00080001;

// Module-level opcodes
const OP_NAME: u16 = 5;
const OP_EXTENSION: u16 = 10;
const OP_EXT_INST_IMPORT: u16 = 11;
const OP_MEMORY_MODEL: u16 = 14;
const OP_ENTRY_POINT: u16 = 15;
const OP_EXECUTION_MODE: u16 = 16;
const OP_CAPABILITY: u16 = 17;
const OP_TYPE_VOID: u16 = 19;
const OP_TYPE_BOOL: u16 = 20;
const OP_TYPE_INT: u16 = 21;
const OP_TYPE_FLOAT: u16 = 22;
const OP_TYPE_VECTOR: u16 = 23;
const OP_TYPE_IMAGE: u16 = 25;
const OP_TYPE_SAMPLED_IMAGE: u16 = 27;
const OP_TYPE_ARRAY: u16 = 28;
const OP_TYPE_STRUCT: u16 = 30;
const OP_TYPE_POINTER: u16 = 32;
const OP_TYPE_FUNCTION: u16 = 33;
const OP_CONSTANT_TRUE: u16 = 41;
const OP_CONSTANT_FALSE: u16 = 42;
const OP_CONSTANT: u16 = 43;
const OP_CONSTANT_COMPOSITE: u16 = 44;
const OP_CONSTANT_NULL: u16 = 46;
const OP_VARIABLE: u16 = 59;
const OP_DECORATE: u16 = 71;
const OP_MEMBER_DECORATE: u16 = 72;

// Capability values
pub const CAP_SHADER: u32 = 1;
pub const CAP_INPUT_ATTACHMENT: u32 = 40;
pub const CAP_FRAGMENT_SHADER_PIXEL_INTERLOCK: u32 = 5378;

// Decoration values
pub const DECORATION_BLOCK: u32 = 2;
pub const DECORATION_ARRAY_STRIDE: u32 = 6;
pub const DECORATION_BUILTIN: u32 = 11;
pub const DECORATION_NON_WRITABLE: u32 = 24;
pub const DECORATION_LOCATION: u32 = 30;
pub const DECORATION_BINDING: u32 = 33;
pub const DECORATION_DESCRIPTOR_SET: u32 = 34;
pub const DECORATION_OFFSET: u32 = 35;
pub const DECORATION_INPUT_ATTACHMENT_INDEX: u32 = 43;

// Storage class values
pub const STORAGE_UNIFORM_CONSTANT: u32 = 0;
pub const STORAGE_INPUT: u32 = 1;
pub const STORAGE_UNIFORM: u32 = 2;
pub const STORAGE_OUTPUT: u32 = 3;
pub const STORAGE_PRIVATE: u32 = 6;

/// Type identity used for deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Void,
    Bool,
    Float,
    Int,
    Uint,
    Vector { component: u32, count: u32 },
    Pointer { storage: u32, pointee: u32 },
    Function { result: u32 },
    Image { sampled: u32, dim: u32, usage: u32, format: u32 },
    SampledImage { image: u32 },
}

/// SPIR-V code builder
#[derive(Debug)]
pub struct SpirVBuilder {
    /// Current ID bound
    id_bound: u32,
    capabilities: Vec<u32>,
    extensions: Vec<u32>,
    ext_inst_imports: Vec<u32>,
    memory_model: Vec<u32>,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    debug_names: Vec<u32>,
    /// Decorations
    annotations: Vec<u32>,
    /// Types, constants, global variables
    types_constants: Vec<u32>,
    /// Function definitions
    pub functions: Vec<u32>,
    /// GLSL.std.450 import ID
    glsl_ext_id: u32,
    declared_capabilities: BTreeSet<u32>,
    declared_extensions: BTreeSet<String>,
    types: HashMap<TypeKey, u32>,
    constants: HashMap<(u32, u32), u32>,
    bools: [u32; 2],
}

impl Default for SpirVBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpirVBuilder {
    /// Builder with the Shader capability, the GLSL.std.450 import and the
    /// logical GLSL450 memory model already declared
    pub fn new() -> Self {
        let mut builder = Self {
            id_bound: 1,
            capabilities: Vec::new(),
            extensions: Vec::new(),
            ext_inst_imports: Vec::new(),
            memory_model: Vec::new(),
            entry_points: Vec::new(),
            execution_modes: Vec::new(),
            debug_names: Vec::new(),
            annotations: Vec::new(),
            types_constants: Vec::new(),
            functions: Vec::new(),
            glsl_ext_id: 0,
            declared_capabilities: BTreeSet::new(),
            declared_extensions: BTreeSet::new(),
            types: HashMap::new(),
            constants: HashMap::new(),
            bools: [0; 2],
        };
        builder.add_capability(CAP_SHADER);
        builder.add_glsl_import();
        builder.add_memory_model();
        builder
    }

    /// Allocate a new ID
    pub fn alloc_id(&mut self) -> u32 {
        let id = self.id_bound;
        self.id_bound += 1;
        id
    }

    /// Encode an instruction word
    pub fn encode_word(opcode: u16, word_count: u16) -> u32 {
        ((word_count as u32) << 16) | (opcode as u32)
    }

    /// Append one instruction to a section
    pub fn emit(section: &mut Vec<u32>, opcode: u16, operands: &[u32]) {
        section.push(Self::encode_word(opcode, operands.len() as u16 + 1));
        section.extend_from_slice(operands);
    }

    /// Nul-terminated, zero-padded literal string
    pub fn string_words(text: &str) -> Vec<u32> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn glsl_ext_id(&self) -> u32 {
        self.glsl_ext_id
    }

    /// Add capability
    pub fn add_capability(&mut self, cap: u32) {
        if self.declared_capabilities.insert(cap) {
            Self::emit(&mut self.capabilities, OP_CAPABILITY, &[cap]);
        }
    }

    /// Add extension
    pub fn add_extension(&mut self, name: &str) {
        if self.declared_extensions.insert(name.to_string()) {
            let words = Self::string_words(name);
            Self::emit(&mut self.extensions, OP_EXTENSION, &words);
        }
    }

    /// Add GLSL.std.450 import
    fn add_glsl_import(&mut self) {
        let id = self.alloc_id();
        self.glsl_ext_id = id;
        let mut operands = vec![id];
        operands.extend(Self::string_words("GLSL.std.450"));
        Self::emit(&mut self.ext_inst_imports, OP_EXT_INST_IMPORT, &operands);
    }

    /// Add memory model
    fn add_memory_model(&mut self) {
        // Logical, GLSL450
        Self::emit(&mut self.memory_model, OP_MEMORY_MODEL, &[0, 1]);
    }

    pub fn add_entry_point(&mut self, model: u32, function: u32, name: &str, interface: &[u32]) {
        let mut operands = vec![model, function];
        operands.extend(Self::string_words(name));
        operands.extend_from_slice(interface);
        Self::emit(&mut self.entry_points, OP_ENTRY_POINT, &operands);
    }

    pub fn add_execution_mode(&mut self, function: u32, mode: u32) {
        Self::emit(&mut self.execution_modes, OP_EXECUTION_MODE, &[function, mode]);
    }

    pub fn add_name(&mut self, target: u32, name: &str) {
        let mut operands = vec![target];
        operands.extend(Self::string_words(name));
        Self::emit(&mut self.debug_names, OP_NAME, &operands);
    }

    pub fn decorate(&mut self, target: u32, decoration: u32, operands: &[u32]) {
        let mut words = vec![target, decoration];
        words.extend_from_slice(operands);
        Self::emit(&mut self.annotations, OP_DECORATE, &words);
    }

    pub fn member_decorate(&mut self, target: u32, member: u32, decoration: u32, operands: &[u32]) {
        let mut words = vec![target, member, decoration];
        words.extend_from_slice(operands);
        Self::emit(&mut self.annotations, OP_MEMBER_DECORATE, &words);
    }

    /// Add location decoration
    pub fn add_location(&mut self, target: u32, location: u32) {
        self.decorate(target, DECORATION_LOCATION, &[location]);
    }

    /// Add builtin decoration
    pub fn add_builtin(&mut self, target: u32, builtin: u32) {
        self.decorate(target, DECORATION_BUILTIN, &[builtin]);
    }

    pub fn add_descriptor(&mut self, target: u32, set: u32, binding: u32) {
        self.decorate(target, DECORATION_DESCRIPTOR_SET, &[set]);
        self.decorate(target, DECORATION_BINDING, &[binding]);
    }

    //=========================================================================
    // TYPES
    //=========================================================================

    fn cached_type(&mut self, key: TypeKey) -> u32 {
        if let Some(&id) = self.types.get(&key) {
            return id;
        }
        let id = self.alloc_id();
        let section = &mut self.types_constants;
        match key {
            TypeKey::Void => Self::emit(section, OP_TYPE_VOID, &[id]),
            TypeKey::Bool => Self::emit(section, OP_TYPE_BOOL, &[id]),
            TypeKey::Float => Self::emit(section, OP_TYPE_FLOAT, &[id, 32]),
            TypeKey::Int => Self::emit(section, OP_TYPE_INT, &[id, 32, 1]),
            TypeKey::Uint => Self::emit(section, OP_TYPE_INT, &[id, 32, 0]),
            TypeKey::Vector { component, count } => Self::emit(section, OP_TYPE_VECTOR, &[id, component, count]),
            TypeKey::Pointer { storage, pointee } => Self::emit(section, OP_TYPE_POINTER, &[id, storage, pointee]),
            TypeKey::Function { result } => Self::emit(section, OP_TYPE_FUNCTION, &[id, result]),
            TypeKey::Image {
                sampled,
                dim,
                usage,
                format,
            } => Self::emit(section, OP_TYPE_IMAGE, &[id, sampled, dim, 0, 0, 0, usage, format]),
            TypeKey::SampledImage { image } => Self::emit(section, OP_TYPE_SAMPLED_IMAGE, &[id, image]),
        }
        self.types.insert(key, id);
        id
    }

    pub fn type_void(&mut self) -> u32 {
        self.cached_type(TypeKey::Void)
    }

    pub fn type_bool(&mut self) -> u32 {
        self.cached_type(TypeKey::Bool)
    }

    pub fn type_float(&mut self) -> u32 {
        self.cached_type(TypeKey::Float)
    }

    pub fn type_int(&mut self) -> u32 {
        self.cached_type(TypeKey::Int)
    }

    pub fn type_uint(&mut self) -> u32 {
        self.cached_type(TypeKey::Uint)
    }

    pub fn type_vector(&mut self, component: u32, count: u32) -> u32 {
        self.cached_type(TypeKey::Vector { component, count })
    }

    pub fn type_pointer(&mut self, storage: u32, pointee: u32) -> u32 {
        self.cached_type(TypeKey::Pointer { storage, pointee })
    }

    pub fn type_function(&mut self, result: u32) -> u32 {
        self.cached_type(TypeKey::Function { result })
    }

    /// `usage` is 1 for sampled images, 2 for storage images and subpass
    /// inputs
    pub fn type_image(&mut self, sampled: u32, dim: u32, usage: u32, format: u32) -> u32 {
        self.cached_type(TypeKey::Image {
            sampled,
            dim,
            usage,
            format,
        })
    }

    pub fn type_sampled_image(&mut self, image: u32) -> u32 {
        self.cached_type(TypeKey::SampledImage { image })
    }

    /// Fixed-size array. Never deduplicated, so a block array can carry its
    /// own stride.
    pub fn type_array(&mut self, element: u32, length: u32) -> u32 {
        let uint = self.type_uint();
        let length = self.constant(uint, length);
        let id = self.alloc_id();
        Self::emit(&mut self.types_constants, OP_TYPE_ARRAY, &[id, element, length]);
        id
    }

    pub fn type_struct(&mut self, members: &[u32]) -> u32 {
        let id = self.alloc_id();
        let mut operands = vec![id];
        operands.extend_from_slice(members);
        Self::emit(&mut self.types_constants, OP_TYPE_STRUCT, &operands);
        id
    }

    //=========================================================================
    // CONSTANTS AND VARIABLES
    //=========================================================================

    /// 32-bit scalar constant of `ty` with the given bits
    pub fn constant(&mut self, ty: u32, bits: u32) -> u32 {
        if let Some(&id) = self.constants.get(&(ty, bits)) {
            return id;
        }
        let id = self.alloc_id();
        Self::emit(&mut self.types_constants, OP_CONSTANT, &[ty, id, bits]);
        self.constants.insert((ty, bits), id);
        id
    }

    pub fn constant_bool(&mut self, value: bool) -> u32 {
        let slot = value as usize;
        if self.bools[slot] != 0 {
            return self.bools[slot];
        }
        let ty = self.type_bool();
        let id = self.alloc_id();
        let opcode = if value { OP_CONSTANT_TRUE } else { OP_CONSTANT_FALSE };
        Self::emit(&mut self.types_constants, opcode, &[ty, id]);
        self.bools[slot] = id;
        id
    }

    pub fn constant_null(&mut self, ty: u32) -> u32 {
        let id = self.alloc_id();
        Self::emit(&mut self.types_constants, OP_CONSTANT_NULL, &[ty, id]);
        id
    }

    pub fn constant_composite(&mut self, ty: u32, parts: &[u32]) -> u32 {
        let id = self.alloc_id();
        let mut operands = vec![ty, id];
        operands.extend_from_slice(parts);
        Self::emit(&mut self.types_constants, OP_CONSTANT_COMPOSITE, &operands);
        id
    }

    /// Add global variable
    pub fn add_variable(&mut self, ptr_type: u32, storage: u32, initializer: Option<u32>) -> u32 {
        let id = self.alloc_id();
        let mut operands = vec![ptr_type, id, storage];
        operands.extend(initializer);
        Self::emit(&mut self.types_constants, OP_VARIABLE, &operands);
        id
    }

    /// Build final SPIR-V bytecode
    pub fn build(self) -> Vec<u32> {
        let mut spirv = Vec::new();

        // Header
        spirv.push(SPIRV_MAGIC);
        spirv.push(SPIRV_VERSION);
        spirv.push(SPIRV_GENERATOR);
        spirv.push(self.id_bound);
        spirv.push(0); // Reserved

        // Sections in order
        spirv.extend(&self.capabilities);
        spirv.extend(&self.extensions);
        spirv.extend(&self.ext_inst_imports);
        spirv.extend(&self.memory_model);
        spirv.extend(&self.entry_points);
        spirv.extend(&self.execution_modes);
        spirv.extend(&self.debug_names);
        spirv.extend(&self.annotations);
        spirv.extend(&self.types_constants);
        spirv.extend(&self.functions);

        spirv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_words() {
        assert_eq!(SpirVBuilder::string_words("main"), vec![0x6E69616D, 0]);
        assert_eq!(
            SpirVBuilder::string_words("GLSL.std.450"),
            vec![0x4C534C47, 0x6474732E, 0x3035342E, 0]
        );
        assert_eq!(SpirVBuilder::string_words("abc"), vec![0x00636261]);
    }

    #[test]
    fn test_header_and_import() {
        let builder = SpirVBuilder::new();
        let words = builder.build();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words[1], SPIRV_VERSION);
        // OpCapability Shader
        assert_eq!(words[5], SpirVBuilder::encode_word(OP_CAPABILITY, 2));
        assert_eq!(words[6], CAP_SHADER);
        // OpExtInstImport %1 "GLSL.std.450"
        assert_eq!(words[7], SpirVBuilder::encode_word(OP_EXT_INST_IMPORT, 6));
        assert_eq!(words[8], 1);
    }

    #[test]
    fn test_types_and_constants_deduplicate() {
        let mut builder = SpirVBuilder::new();
        let f = builder.type_float();
        assert_eq!(builder.type_float(), f);
        let v4 = builder.type_vector(f, 4);
        assert_eq!(builder.type_vector(f, 4), v4);
        assert_ne!(builder.type_vector(f, 2), v4);

        let one = builder.constant(f, 1.0f32.to_bits());
        assert_eq!(builder.constant(f, 1.0f32.to_bits()), one);
        let u = builder.type_uint();
        assert_ne!(builder.constant(u, 1.0f32.to_bits()), one);
        assert_eq!(builder.constant_bool(true), builder.constant_bool(true));
        assert_ne!(builder.constant_bool(true), builder.constant_bool(false));

        // Arrays are always fresh
        assert_ne!(builder.type_array(v4, 2), builder.type_array(v4, 2));
    }

    #[test]
    fn test_capabilities_once() {
        let mut builder = SpirVBuilder::new();
        builder.add_capability(CAP_SHADER);
        builder.add_capability(CAP_INPUT_ATTACHMENT);
        builder.add_capability(CAP_INPUT_ATTACHMENT);
        builder.add_extension("SPV_EXT_fragment_shader_interlock");
        builder.add_extension("SPV_EXT_fragment_shader_interlock");
        let words = builder.build();
        let capability = SpirVBuilder::encode_word(OP_CAPABILITY, 2);
        assert_eq!(words.iter().filter(|&&w| w == capability).count(), 2);
    }
}
