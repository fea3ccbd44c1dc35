//! Resource binding plan
//!
//! Maps the parameters of a program onto host resources: uniform buffers,
//! texture units, input locations and the register preloads that run before
//! the first instruction. Both backends declare their interfaces from the
//! same [`BindingPlan`].

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::gxp::{
    Parameter, ParameterCategory, ParameterType, Program, VertexOutputs, DATA_CONTAINER,
};
use crate::types::{DataType, ProgramType};

/// Uniform buffer slots available to one stage
pub const MAX_UNIFORM_BUFFERS: u32 = 15;
/// Texture units available to one stage
pub const MAX_TEXTURE_UNITS: u32 = 16;
/// First input location of the texture coordinate varyings
pub const TEXCOORD_LOCATION: u32 = 4;

/// Stream format of a live vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeFormat {
    pub data_type: DataType,
    /// Integer data is scaled to [0, 1] by the vertex fetch
    pub normalized: bool,
}

/// Source of vertex attribute formats known only when the program is bound
pub trait AttributeReflector {
    /// Format of the stream feeding the attribute at `resource_index`
    fn attribute_format(&self, resource_index: u32) -> Option<AttributeFormat>;
}

/// Attribute supplied by the renderer when the binary carries no attribute
/// parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HintAttribute {
    /// PA register the attribute is loaded into
    pub reg_index: u32,
    pub component_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBuffer {
    /// Container index for register uniforms, resource index for memory
    /// buffers
    pub key: u32,
    /// Buffer slot, `(key + 1) % 15`
    pub index: u32,
    pub binding: u32,
    /// Size in 32-bit words, a multiple of four
    pub size_words: u32,
    /// Words of the buffer mirrored in SA registers
    pub reg_block_size: u32,
    /// Lowest resource index referenced
    pub reg_start_offset: u32,
    /// SA register receiving word 0
    pub base_sa_offset: u32,
}

impl UniformBuffer {
    pub fn vec4_count(&self) -> u32 {
        self.size_words / 4
    }

    /// Words copied into SA registers by the preamble
    pub fn preload_words(&self) -> u32 {
        self.reg_block_size.min(self.size_words)
    }
}

/// A named uniform and where it lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBinding {
    pub name: String,
    /// Position in [`BindingPlan::uniform_buffers`]
    pub buffer: usize,
    pub word: u32,
    pub sa_offset: u32,
    pub data_type: DataType,
    pub components: u32,
    pub array_size: u32,
    /// Past the register block, only reachable through memory loads
    pub in_memory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerBinding {
    pub name: String,
    pub unit: u32,
    pub binding: u32,
    pub cube: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiteralPreload {
    pub sa_offset: u32,
    pub bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeBinding {
    pub name: String,
    pub location: u32,
    pub pa_offset: u32,
    /// Scalar count, array elements included
    pub components: u32,
    /// Register format the value is stored in
    pub data_type: DataType,
    /// Type the vertex fetch delivers, integer types stay integral unless
    /// normalized
    pub input_type: DataType,
    pub normalized: bool,
}

impl AttributeBinding {
    /// Consecutive vec4 locations occupied
    pub fn location_count(&self) -> u32 {
        self.components.div_ceil(4).max(1)
    }
}

/// Where a fragment iterator reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IteratorSource {
    Varying { location: u32 },
    FragCoord,
    PointCoord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorBinding {
    pub name: String,
    pub source: IteratorSource,
    pub pa_offset: u32,
    pub components: u32,
    pub data_type: DataType,
}

/// Coordinate layout of a texture query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryCoords {
    Xy,
    /// xy divided by z
    ProjXyz,
    /// xy divided by w
    ProjXyw,
}

/// Texture lookup the hardware issues before the program runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureQuery {
    /// Position in [`BindingPlan::samplers`]
    pub sampler: usize,
    /// Position in [`BindingPlan::iterators`] of the coordinate input
    pub coord: usize,
    pub coords: QueryCoords,
    pub store_type: DataType,
    pub pa_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexOutputKind {
    Position,
    Color0,
    Color1,
    Fog,
    TexCoord(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexOutput {
    pub kind: VertexOutputKind,
    pub name: String,
    pub location: u32,
    /// First O register copied out
    pub o_offset: u32,
    /// Registers this output advances the O offset by
    pub components: u32,
}

/// Everything a backend needs to declare and seed its interfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingPlan {
    pub program_type: ProgramType,
    pub native_color: bool,
    /// Register format of the fragment color
    pub color_type: DataType,
    pub uniform_buffers: Vec<UniformBuffer>,
    pub uniforms: Vec<UniformBinding>,
    pub samplers: Vec<SamplerBinding>,
    /// SA register holding a dependent sampler to its texture unit
    pub dependent_samplers: BTreeMap<u32, u32>,
    pub literals: Vec<LiteralPreload>,
    pub attributes: Vec<AttributeBinding>,
    pub iterators: Vec<IteratorBinding>,
    pub texture_queries: Vec<TextureQuery>,
    pub vertex_outputs: Vec<VertexOutput>,
}

impl BindingPlan {
    pub fn sampler_for_unit(&self, unit: u32) -> Option<usize> {
        self.samplers.iter().position(|s| s.unit == unit)
    }

    /// Sampler read through the SA register `sa_offset`
    pub fn dependent_sampler(&self, sa_offset: u32) -> Option<usize> {
        self.dependent_samplers
            .get(&sa_offset)
            .and_then(|&unit| self.sampler_for_unit(unit))
    }

    pub fn is_vertex(&self) -> bool {
        self.program_type == ProgramType::Vertex
    }
}

/// Identifier usable in generated code
pub fn identifier(name: &str) -> String {
    let flat: String = name
        .chars()
        .map(|c| match c {
            '.' | '[' | ']' => '_',
            c if c.is_ascii_alphanumeric() || c == '_' => c,
            _ => '_',
        })
        .collect();
    let flat = flat.replace("__", "_dd_");
    match flat.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{}", flat),
        None => "_".to_string(),
        _ => flat,
    }
}

/// Byte size of one uniform parameter, array padding included
fn parameter_bytes(param: &Parameter) -> u32 {
    let data_type = param.param_type.data_type();
    let mut vector = param.component_count as u32 * data_type.size();
    if param.array_size != 1 {
        let align = if data_type.is_float() && param.component_count != 1 {
            8
        } else {
            4
        };
        vector = vector.next_multiple_of(align);
    }
    param.array_size * vector
}

fn color_type(program: &Program) -> DataType {
    match program.fragment_output_type() {
        ParameterType::Aggregate => DataType::F16,
        other => other.data_type(),
    }
}

/// Build the binding plan of a program
pub fn bind(
    program: &Program,
    hints: &[HintAttribute],
    reflector: Option<&dyn AttributeReflector>,
) -> BindingPlan {
    let mut plan = BindingPlan {
        program_type: program.program_type,
        native_color: program.native_color,
        color_type: color_type(program),
        uniform_buffers: Vec::new(),
        uniforms: Vec::new(),
        samplers: Vec::new(),
        dependent_samplers: BTreeMap::new(),
        literals: Vec::new(),
        attributes: Vec::new(),
        iterators: Vec::new(),
        texture_queries: Vec::new(),
        vertex_outputs: Vec::new(),
    };

    bind_parameters(program, reflector, &mut plan);
    bind_dependent_samplers(program, &mut plan);
    bind_literals(program, &mut plan);

    if plan.attributes.is_empty() && program.primary_reg_count != 0 && !hints.is_empty() {
        debug!("Program has no attribute parameters, using {} hint attributes", hints.len());
        let mut location = 0;
        for (i, hint) in hints.iter().enumerate() {
            let attribute = AttributeBinding {
                name: format!("attribute{}", i),
                location,
                pa_offset: hint.reg_index,
                components: hint.component_count.div_ceil(4) * 4,
                data_type: DataType::F32,
                input_type: DataType::F32,
                normalized: false,
            };
            location += attribute.location_count();
            plan.attributes.push(attribute);
        }
    }

    if program.is_fragment() {
        bind_fragment_inputs(program, &mut plan);
    } else {
        bind_vertex_outputs(program, &mut plan);
    }

    debug!(
        "Binding plan: {} buffers, {} samplers, {} attributes, {} iterators, {} queries, {} literals",
        plan.uniform_buffers.len(),
        plan.samplers.len(),
        plan.attributes.len(),
        plan.iterators.len(),
        plan.texture_queries.len(),
        plan.literals.len()
    );
    plan
}

fn buffer_position(plan: &mut BindingPlan, key: u32, is_vertex: bool) -> usize {
    if let Some(pos) = plan.uniform_buffers.iter().position(|b| b.key == key) {
        return pos;
    }
    let index = (key + 1) % MAX_UNIFORM_BUFFERS;
    plan.uniform_buffers.push(UniformBuffer {
        key,
        index,
        binding: if is_vertex { index } else { MAX_UNIFORM_BUFFERS + index },
        size_words: 0,
        reg_block_size: 0,
        reg_start_offset: u32::MAX,
        base_sa_offset: 0,
    });
    plan.uniform_buffers.len() - 1
}

fn bind_parameters(program: &Program, reflector: Option<&dyn AttributeReflector>, plan: &mut BindingPlan) {
    let is_vertex = program.is_vertex();
    let mut location = 0;

    for param in program.parameters() {
        let container = program.container(param.container_index as u16);
        let resource = param.resource_index.max(0) as u32;
        let base = container.map_or(0, |c| c.base_sa_offset as u32);

        match param.category {
            ParameterCategory::Uniform => {
                let words = parameter_bytes(param).div_ceil(4);
                let reg_block_size = container.map_or(0, |c| c.max_resource_index as u32);
                let pos = buffer_position(plan, param.container_index as u32, is_vertex);
                let buffer = &mut plan.uniform_buffers[pos];
                buffer.size_words = buffer.size_words.max(resource + words);
                buffer.reg_start_offset = buffer.reg_start_offset.min(resource);
                buffer.reg_block_size = reg_block_size;
                buffer.base_sa_offset = base;

                debug!("[{} + {}] sa{} = {}", param.container_index, resource, base + resource, param.name);
                plan.uniforms.push(UniformBinding {
                    name: identifier(&param.flat_name()),
                    buffer: pos,
                    word: resource,
                    sa_offset: base + resource,
                    data_type: param.param_type.data_type(),
                    components: param.component_count as u32,
                    array_size: param.array_size,
                    in_memory: resource > reg_block_size,
                });
            }
            ParameterCategory::UniformBuffer => {
                let pos = buffer_position(plan, resource, is_vertex);
                let buffer = &mut plan.uniform_buffers[pos];
                buffer.size_words = buffer.size_words.max(param.array_size.div_ceil(4));
                buffer.reg_start_offset = 0;
            }
            ParameterCategory::Attribute => {
                let format = reflector.and_then(|r| r.attribute_format(resource));
                let attribute = AttributeBinding {
                    name: identifier(&param.flat_name()),
                    location,
                    pa_offset: base + resource,
                    components: param.array_size.max(1) * param.component_count as u32,
                    data_type: param.param_type.data_type(),
                    input_type: match format {
                        Some(f) if !f.normalized => f.data_type,
                        _ => DataType::F32,
                    },
                    normalized: format.is_some_and(|f| f.normalized),
                };
                debug!("[{} + {}] pa{} = {}", param.container_index, resource, attribute.pa_offset, param.name);
                location += attribute.location_count();
                plan.attributes.push(attribute);
            }
            ParameterCategory::Sampler => {
                plan.samplers.push(SamplerBinding {
                    name: identifier(&param.flat_name()),
                    unit: resource,
                    binding: resource + if is_vertex { MAX_TEXTURE_UNITS } else { 0 },
                    cube: param.is_sampler_cube(),
                });
            }
            ParameterCategory::AuxiliarySurface => {
                warn!("Auxiliary surface parameter {} ignored", param.name);
            }
            ParameterCategory::Unknown(category) => {
                warn!("Parameter {} has unknown category {}", param.name, category);
            }
        }
    }

    for buffer in plan.uniform_buffers.iter_mut() {
        buffer.size_words = buffer.size_words.next_multiple_of(4);
        if buffer.reg_start_offset == u32::MAX {
            buffer.reg_start_offset = 0;
        }
    }
}

fn bind_dependent_samplers(program: &Program, plan: &mut BindingPlan) {
    let Some(container) = program.container(DATA_CONTAINER) else {
        return;
    };
    for sampler in program.dependent_samplers() {
        let unit = sampler.resource_index();
        if plan.sampler_for_unit(unit).is_none() {
            warn!("Dependent sampler references unknown unit {}", unit);
            continue;
        }
        let sa = container.base_sa_offset as u32 + sampler.sa_offset as u32;
        plan.dependent_samplers.insert(sa, unit);
    }
}

fn bind_literals(program: &Program, plan: &mut BindingPlan) {
    if program.literals().is_empty() {
        return;
    }
    let Some(container) = program.literal_container() else {
        warn!("No container for {} literals, skipping them", program.literals().len());
        return;
    };
    for literal in program.literals() {
        plan.literals.push(LiteralPreload {
            sa_offset: container.base_sa_offset as u32 + literal.offset,
            bits: literal.bits,
        });
    }
}

fn iterator_name(id: u32) -> Option<String> {
    if id & 0x4000_0000 != 0 {
        return Some("v_SpriteCoord".to_string());
    }
    let name = match id {
        0xD000 => "v_Position".to_string(),
        0xC000 => "v_Fog".to_string(),
        0xA000 => "v_Color0".to_string(),
        0xB000 => "v_Color1".to_string(),
        0x0..=0x9000 => format!("v_TexCoord{}", id >> 12),
        _ => return None,
    };
    Some(name)
}

fn iterator_location(id: u32) -> IteratorSource {
    match id {
        _ if id & 0x4000_0000 != 0 => IteratorSource::PointCoord,
        0xD000 => IteratorSource::FragCoord,
        0xA000 => IteratorSource::Varying { location: 1 },
        0xB000 => IteratorSource::Varying { location: 2 },
        0xC000 => IteratorSource::Varying { location: 3 },
        _ => IteratorSource::Varying {
            location: TEXCOORD_LOCATION + (id >> 12),
        },
    }
}

fn bind_fragment_inputs(program: &Program, plan: &mut BindingPlan) {
    let mut pa_offset = 0;
    // Texcoord index to iterator position
    let mut texcoords: [Option<usize>; 10] = [None; 10];

    for descriptor in program.fragment_inputs() {
        let info = descriptor.attribute_info;

        if info & 0x4000_F000 != 0xF000 {
            let id = info & 0x4000_F000;
            let Some(name) = iterator_name(id) else {
                warn!("Unknown fragment iterator 0x{:x}", id);
                continue;
            };
            let is_color = id == 0xA000 || id == 0xB000;
            let data_type = match info & 0x3010_0000 {
                0x2000_0000 => DataType::F16,
                0x1000_0000 => DataType::C10,
                0x0010_0000 if is_color => DataType::F32,
                _ if !is_color => DataType::F32,
                _ => DataType::U8,
            };

            debug!("Iterator: pa{} = ({}) {}", pa_offset, data_type.name(), name);
            if id <= 0x9000 {
                texcoords[(id >> 12) as usize] = Some(plan.iterators.len());
            }
            plan.iterators.push(IteratorBinding {
                name,
                source: iterator_location(id),
                pa_offset,
                components: ((info >> 22) & 3) + 1,
                data_type,
            });
            pa_offset += ((descriptor.size >> 4) & 3) + 1;
        }

        let coord_index = info & 0x40F;
        if coord_index == 0xF {
            continue;
        }
        let size = ((descriptor.size >> 6) & 3) + 1;
        let query_pa = pa_offset;
        pa_offset += size;

        let coord_index = coord_index & 0xF;
        if coord_index >= 10 {
            warn!("Texture query with coordinate index {} skipped", coord_index);
            continue;
        }

        let sampler = program
            .parameters()
            .iter()
            .find(|p| p.category == ParameterCategory::Sampler && p.resource_index == descriptor.resource_index as i32)
            .and_then(|p| plan.sampler_for_unit(p.resource_index as u32));
        let Some(sampler) = sampler else {
            warn!("Texture query on unit {} has no sampler", descriptor.resource_index);
            continue;
        };

        let store_type = match (descriptor.component_info >> 4) & 3 {
            0 => DataType::U8,
            3 => DataType::F32,
            2 => DataType::F16,
            other => {
                warn!("Unsupported texture query component type {}", other);
                DataType::F16
            }
        };
        let coords = match info & 0x300 {
            0x100 => QueryCoords::Xy,
            0x300 => QueryCoords::ProjXyz,
            _ => QueryCoords::ProjXyw,
        };

        let coord = match texcoords[coord_index as usize] {
            Some(pos) => pos,
            None => {
                texcoords[coord_index as usize] = Some(plan.iterators.len());
                plan.iterators.push(IteratorBinding {
                    name: format!("v_TexCoord{}", coord_index),
                    source: IteratorSource::Varying {
                        location: TEXCOORD_LOCATION + coord_index,
                    },
                    // Read by the query only, never stored in PA
                    pa_offset: u32::MAX,
                    components: 4,
                    data_type: DataType::F32,
                });
                plan.iterators.len() - 1
            }
        };

        debug!("pa{} = texture query on {} with texcoord {}", query_pa, plan.samplers[sampler].name, coord_index);
        plan.texture_queries.push(TextureQuery {
            sampler,
            coord,
            coords,
            store_type,
            pa_offset: query_pa,
        });
    }
}

fn bind_vertex_outputs(program: &Program, plan: &mut BindingPlan) {
    let set = program.vertex_outputs();
    let mut candidates = vec![
        (VertexOutputs::POSITION, VertexOutputKind::Position, "v_Position".to_string(), 0, 4),
        (VertexOutputs::COLOR0, VertexOutputKind::Color0, "v_Color0".to_string(), 1, 4),
        (VertexOutputs::COLOR1, VertexOutputKind::Color1, "v_Color1".to_string(), 2, 4),
        (VertexOutputs::FOG, VertexOutputKind::Fog, "v_Fog".to_string(), 3, 2),
    ];
    for (i, info) in set.texcoords.iter().enumerate() {
        candidates.push((
            VertexOutputs::texcoord(i),
            VertexOutputKind::TexCoord(i as u8),
            format!("v_TexCoord{}", i),
            TEXCOORD_LOCATION + i as u32,
            info.component_count(),
        ));
    }

    let mut o_offset = 0;
    for (flag, kind, name, location, components) in candidates {
        if !set.outputs.contains(flag) {
            continue;
        }
        plan.vertex_outputs.push(VertexOutput {
            kind,
            name,
            location,
            o_offset,
            components,
        });
        o_offset += components;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gxp::{Container, DependentSampler, FragmentInputDescriptor, ProgramBuilder};

    fn param(name: &str, category: ParameterCategory, container: u8, resource: i32) -> Parameter {
        Parameter {
            name: name.to_string(),
            category,
            param_type: ParameterType::F32,
            component_count: 4,
            container_index: container,
            semantic: 0,
            array_size: 1,
            resource_index: resource,
        }
    }

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("lights[2].color"), "lights_2_dd_color");
        assert_eq!(identifier("a.b"), "a_b");
        assert_eq!(identifier("2d"), "_2d");
    }

    #[test]
    fn test_uniform_buffer_sizing() {
        let mut mat = param("mvp", ParameterCategory::Uniform, 14, 0);
        mat.array_size = 4;
        let mut arr = param("weights", ParameterCategory::Uniform, 14, 16);
        arr.component_count = 3;
        arr.array_size = 2;

        let blob = ProgramBuilder::new(ProgramType::Vertex)
            .parameter(mat)
            .parameter(arr)
            .container(Container {
                container_index: 14,
                base_sa_offset: 8,
                max_resource_index: 32,
            })
            .build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], None);

        assert_eq!(plan.uniform_buffers.len(), 1);
        let buffer = &plan.uniform_buffers[0];
        assert_eq!(buffer.index, 0);
        assert_eq!(buffer.binding, 0);
        // vec3 in an array pads to 16 bytes: 16 + 2 * 4 = 24 words
        assert_eq!(buffer.size_words, 24);
        assert_eq!(buffer.reg_start_offset, 0);
        assert_eq!(buffer.preload_words(), 24);
        assert_eq!(plan.uniforms[1].sa_offset, 8 + 16);
    }

    #[test]
    fn test_fragment_buffer_binding_offset() {
        let blob = ProgramBuilder::new(ProgramType::Fragment)
            .parameter(param("tint", ParameterCategory::Uniform, 14, 2))
            .build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], None);
        assert_eq!(plan.uniform_buffers[0].binding, MAX_UNIFORM_BUFFERS);
        assert_eq!(plan.uniform_buffers[0].size_words, 8);
        assert_eq!(plan.uniform_buffers[0].reg_start_offset, 2);
    }

    #[test]
    fn test_samplers_and_dependent() {
        let mut cube = param("env", ParameterCategory::Sampler, 0, 3);
        cube.semantic = 1 << 12;
        let blob = ProgramBuilder::new(ProgramType::Fragment)
            .parameter(param("diffuse", ParameterCategory::Sampler, 0, 1))
            .parameter(cube)
            .container(Container {
                container_index: DATA_CONTAINER,
                base_sa_offset: 20,
                max_resource_index: 0,
            })
            .dependent_sampler(DependentSampler {
                resource_index_layout_offset: 12,
                sa_offset: 2,
            })
            .build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], None);

        assert_eq!(plan.samplers.len(), 2);
        assert!(plan.samplers[1].cube);
        assert_eq!(plan.dependent_samplers.get(&22), Some(&3));
        assert_eq!(plan.dependent_sampler(22), Some(1));
        assert_eq!(plan.dependent_sampler(4), None);
    }

    #[test]
    fn test_literals_fall_back_to_data_container() {
        let blob = ProgramBuilder::new(ProgramType::Vertex)
            .container(Container {
                container_index: DATA_CONTAINER,
                base_sa_offset: 40,
                max_resource_index: 0,
            })
            .literal(3, 2.0f32.to_bits())
            .build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], None);
        assert_eq!(
            plan.literals,
            vec![LiteralPreload {
                sa_offset: 43,
                bits: 2.0f32.to_bits()
            }]
        );
    }

    struct Normalized;

    impl AttributeReflector for Normalized {
        fn attribute_format(&self, _resource_index: u32) -> Option<AttributeFormat> {
            Some(AttributeFormat {
                data_type: DataType::U8,
                normalized: true,
            })
        }
    }

    #[test]
    fn test_attributes_and_hints() {
        let mut weights = param("aWeights", ParameterCategory::Attribute, 0, 4);
        weights.array_size = 2;
        let blob = ProgramBuilder::new(ProgramType::Vertex)
            .parameter(param("aPosition", ParameterCategory::Attribute, 0, 0))
            .parameter(weights)
            .parameter(param("aColor", ParameterCategory::Attribute, 0, 12))
            .build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], Some(&Normalized));

        let locations: Vec<u32> = plan.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 3]);
        assert!(plan.attributes.iter().all(|a| a.normalized));
        assert!(plan.attributes.iter().all(|a| a.input_type == DataType::F32));

        let hints = [HintAttribute {
            reg_index: 4,
            component_count: 3,
        }];
        let bytes = ProgramBuilder::new(ProgramType::Vertex).primary_reg_count(8).build();
        let program = Program::load(&bytes).unwrap();
        let plan = bind(&program, &hints, None);
        assert_eq!(plan.attributes.len(), 1);
        assert_eq!(plan.attributes[0].name, "attribute0");
        assert_eq!(plan.attributes[0].pa_offset, 4);
        assert_eq!(plan.attributes[0].components, 4);
    }

    #[test]
    fn test_fragment_iterators_and_queries() {
        let blob = ProgramBuilder::new(ProgramType::Fragment)
            .parameter(param("tex", ParameterCategory::Sampler, 0, 0))
            .fragment_input(FragmentInputDescriptor {
                // Color0, 4 components, no query
                attribute_info: 0xA000 | (3 << 22) | 0xF,
                resource_index: 0,
                size: 0x10,
                component_info: 0,
            })
            .fragment_input(FragmentInputDescriptor {
                // No iterator, query on texcoord 0, non-projective, F16 result
                attribute_info: 0xF000 | 0x100,
                resource_index: 0,
                size: 1 << 6,
                component_info: 2 << 4,
            })
            .build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], None);

        assert_eq!(plan.iterators[0].name, "v_Color0");
        assert_eq!(plan.iterators[0].data_type, DataType::U8);
        assert_eq!(plan.iterators[0].components, 4);
        assert_eq!(plan.iterators[0].source, IteratorSource::Varying { location: 1 });

        assert_eq!(plan.texture_queries.len(), 1);
        let query = &plan.texture_queries[0];
        assert_eq!(query.pa_offset, 2);
        assert_eq!(query.coords, QueryCoords::Xy);
        assert_eq!(query.store_type, DataType::F16);
        // Coordinates come from an input declared for the query
        assert_eq!(plan.iterators[query.coord].name, "v_TexCoord0");
        assert_eq!(
            plan.iterators[query.coord].source,
            IteratorSource::Varying {
                location: TEXCOORD_LOCATION
            }
        );
    }

    #[test]
    fn test_vertex_output_order() {
        // Fog, color0 and texcoord1 with xyz
        let blob = ProgramBuilder::new(ProgramType::Vertex)
            .vertex_outputs(0x200 | 0x800, 0b011 << 3)
            .build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], None);

        let layout: Vec<(VertexOutputKind, u32, u32)> = plan
            .vertex_outputs
            .iter()
            .map(|o| (o.kind, o.location, o.o_offset))
            .collect();
        assert_eq!(
            layout,
            vec![
                (VertexOutputKind::Position, 0, 0),
                (VertexOutputKind::Color0, 1, 4),
                (VertexOutputKind::Fog, 3, 8),
                (VertexOutputKind::TexCoord(1), 5, 10),
            ]
        );
    }
}
