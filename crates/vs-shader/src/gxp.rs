//! GXP program container
//!
//! Parses the header of a compiled shader binary together with the tables it
//! points at: parameters, containers, literals, dependent samplers and the
//! varyings block. Every offset is bounds checked against the blob, so a
//! malformed binary produces a [`ContainerError`] instead of a stray read.

use crate::types::ProgramType;
use bitflags::bitflags;
use serde::Serialize;
use sha1::{Digest, Sha1};
use vs_core::ContainerError;

/// `GXP\0`
pub const GXP_MAGIC: u32 = 0x0050_5847;

/// Size of the fixed header
pub const HEADER_SIZE: usize = 0x98;

const PARAMETER_SIZE: usize = 16;
const CONTAINER_SIZE: usize = 8;
const DEPENDENT_SAMPLER_SIZE: usize = 4;
const VARYINGS_SIZE: usize = 24;
const DESCRIPTOR_SIZE: usize = 16;

// Header field offsets
const OFF_MAJOR: usize = 0x04;
const OFF_MINOR: usize = 0x05;
const OFF_SIZE: usize = 0x08;
const OFF_TYPE: usize = 0x14;
const OFF_PARAM_COUNT: usize = 0x24;
const OFF_PARAM_OFFSET: usize = 0x28;
const OFF_VARYINGS_OFFSET: usize = 0x2C;
const OFF_PRIMARY_REGS: usize = 0x30;
const OFF_SECONDARY_REGS: usize = 0x32;
const OFF_TEMP_REGS1: usize = 0x34;
const OFF_TEMP_REGS2: usize = 0x38;
const OFF_PRIMARY_COUNT: usize = 0x3C;
const OFF_PRIMARY_OFFSET: usize = 0x40;
const OFF_SECONDARY_START: usize = 0x48;
const OFF_SECONDARY_END: usize = 0x4C;
const OFF_UNIFORM_BUFFERS: usize = 0x64;
const OFF_LITERAL_COUNT: usize = 0x70;
const OFF_LITERAL_OFFSET: usize = 0x74;
const OFF_SAMPLER_COUNT: usize = 0x80;
const OFF_SAMPLER_OFFSET: usize = 0x84;
const OFF_CONTAINER_COUNT: usize = 0x90;
const OFF_CONTAINER_OFFSET: usize = 0x94;

// Offsets inside the varyings block
const VAR_OUTPUT_TYPE: usize = 10;
const VAR_OUTPUT_COMPS: usize = 11;
const VAR_COUNT: usize = 12;
const VAR_OUTPUTS1: usize = 16;
const VAR_OUTPUTS2: usize = 20;

/// Container holding the literal pool
pub const LITERAL_CONTAINER: u16 = 16;
/// Default data container, also the literal fallback
pub const DATA_CONTAINER: u16 = 19;

//=============================================================================
// PARAMETERS
//=============================================================================

/// Parameter category, bits 0-3 of the parameter bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParameterCategory {
    Attribute,
    Uniform,
    Sampler,
    AuxiliarySurface,
    UniformBuffer,
    Unknown(u8),
}

impl From<u8> for ParameterCategory {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::Attribute,
            1 => Self::Uniform,
            2 => Self::Sampler,
            3 => Self::AuxiliarySurface,
            4 => Self::UniformBuffer,
            other => Self::Unknown(other),
        }
    }
}

impl ParameterCategory {
    fn bits(self) -> u8 {
        match self {
            Self::Attribute => 0,
            Self::Uniform => 1,
            Self::Sampler => 2,
            Self::AuxiliarySurface => 3,
            Self::UniformBuffer => 4,
            Self::Unknown(v) => v & 0xF,
        }
    }
}

/// Scalar type of a parameter, bits 4-7 of the parameter bitfield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ParameterType {
    F32,
    F16,
    C10,
    U32,
    S32,
    U16,
    S16,
    U8,
    S8,
    Aggregate,
}

impl From<u8> for ParameterType {
    fn from(v: u8) -> Self {
        match v {
            0 => Self::F32,
            1 => Self::F16,
            2 => Self::C10,
            3 => Self::U32,
            4 => Self::S32,
            5 => Self::U16,
            6 => Self::S16,
            7 => Self::U8,
            8 => Self::S8,
            _ => Self::Aggregate,
        }
    }
}

impl ParameterType {
    fn bits(self) -> u8 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
            Self::C10 => 2,
            Self::U32 => 3,
            Self::S32 => 4,
            Self::U16 => 5,
            Self::S16 => 6,
            Self::U8 => 7,
            Self::S8 => 8,
            Self::Aggregate => 9,
        }
    }

    /// Register data type used to store values of this type
    pub fn data_type(self) -> crate::types::DataType {
        use crate::types::DataType;
        match self {
            Self::F32 | Self::Aggregate => DataType::F32,
            Self::F16 => DataType::F16,
            Self::C10 => DataType::C10,
            Self::U32 => DataType::U32,
            Self::S32 => DataType::S32,
            Self::U16 => DataType::U16,
            Self::S16 => DataType::S16,
            Self::U8 => DataType::U8,
            Self::S8 => DataType::S8,
        }
    }
}

/// One entry of the parameter table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    /// Name as stored in the binary, e.g. `lights[2].color`
    pub name: String,
    pub category: ParameterCategory,
    pub param_type: ParameterType,
    pub component_count: u8,
    pub container_index: u8,
    pub semantic: u16,
    pub array_size: u32,
    pub resource_index: i32,
}

impl Parameter {
    pub fn is_sampler_cube(&self) -> bool {
        (self.semantic >> 12) & 1 != 0
    }

    /// Identifier-safe name, see [`flatten_name`]
    pub fn flat_name(&self) -> String {
        flatten_name(&self.name)
    }
}

/// Flatten a member access into one identifier.
///
/// `a.b` becomes `a_b` and `a[5].b` becomes `a_5_b`. A trailing array index
/// on the member is kept, so `a[5].b[2]` becomes `a_5_b[2]`.
pub fn flatten_name(name: &str) -> String {
    let Some(dot) = name.find('.') else {
        return name.to_string();
    };

    let (head, tail) = name.split_at(dot);
    let mut out = String::with_capacity(name.len());
    for c in head.chars() {
        match c {
            '[' => out.push('_'),
            ']' => {}
            c => out.push(c),
        }
    }
    out.extend(tail.chars().map(|c| if c == '.' { '_' } else { c }));
    out
}

//=============================================================================
// SMALL TABLES
//=============================================================================

/// Parameter container, maps a container index to its SA base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Container {
    pub container_index: u16,
    pub base_sa_offset: u16,
    /// Highest resource index kept in registers, the rest lives in memory
    pub max_resource_index: u16,
}

/// Literal pool entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Literal {
    /// SA offset relative to the literal container
    pub offset: u32,
    /// Raw 32-bit value
    pub bits: u32,
}

/// Sampler whose coordinates are computed by the shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DependentSampler {
    /// Sampler resource index times four
    pub resource_index_layout_offset: u16,
    /// SA offset relative to the data container
    pub sa_offset: u16,
}

impl DependentSampler {
    pub fn resource_index(&self) -> u32 {
        self.resource_index_layout_offset as u32 / 4
    }
}

/// Fragment input descriptor from the varyings block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FragmentInputDescriptor {
    pub attribute_info: u32,
    pub resource_index: u32,
    pub size: u32,
    pub component_info: u32,
}

/// Varyings header shared by both program types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Varyings {
    pub output_param_type: u8,
    pub output_comp_count: u8,
    pub varyings_count: u16,
    pub vertex_outputs1: u32,
    pub vertex_outputs2: u32,
}

bitflags! {
    /// Outputs written by a vertex program
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexOutputs: u32 {
        const POSITION = 1 << 0;
        const FOG = 1 << 1;
        const COLOR0 = 1 << 2;
        const COLOR1 = 1 << 3;
        const TEXCOORD0 = 1 << 4;
        const TEXCOORD1 = 1 << 5;
        const TEXCOORD2 = 1 << 6;
        const TEXCOORD3 = 1 << 7;
        const TEXCOORD4 = 1 << 8;
        const TEXCOORD5 = 1 << 9;
        const TEXCOORD6 = 1 << 10;
        const TEXCOORD7 = 1 << 11;
        const TEXCOORD8 = 1 << 12;
        const TEXCOORD9 = 1 << 13;
        const PSIZE = 1 << 14;
        const CLIP0 = 1 << 15;
        const CLIP1 = 1 << 16;
        const CLIP2 = 1 << 17;
        const CLIP3 = 1 << 18;
        const CLIP4 = 1 << 19;
        const CLIP5 = 1 << 20;
        const CLIP6 = 1 << 21;
        const CLIP7 = 1 << 22;
    }
}

impl VertexOutputs {
    pub fn texcoord(index: usize) -> Self {
        Self::from_bits_truncate(Self::TEXCOORD0.bits() << index)
    }
}

/// Component layout of one texture coordinate output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TexCoordInfo(pub u8);

impl TexCoordInfo {
    /// Components copied out: bit 0 selects xy, bit 1 z, bit 2 w
    pub fn component_count(self) -> u32 {
        let mut count = 0;
        if self.0 & 0b001 != 0 {
            count += 2;
        }
        if self.0 & 0b010 != 0 {
            count += 1;
        }
        if self.0 & 0b100 != 0 {
            count += 1;
        }
        count
    }
}

/// Decoded vertex output set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexOutputSet {
    pub outputs: VertexOutputs,
    pub texcoords: [TexCoordInfo; 10],
}

//=============================================================================
// HEADER READING
//=============================================================================

fn read_bytes<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], ContainerError> {
    let end = offset.checked_add(N).ok_or(ContainerError::Truncated {
        needed: usize::MAX,
        available: bytes.len(),
    })?;
    let slice = bytes.get(offset..end).ok_or(ContainerError::Truncated {
        needed: end,
        available: bytes.len(),
    })?;
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    Ok(out)
}

fn read_u8(bytes: &[u8], offset: usize) -> Result<u8, ContainerError> {
    Ok(read_bytes::<1>(bytes, offset)?[0])
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16, ContainerError> {
    Ok(u16::from_le_bytes(read_bytes(bytes, offset)?))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, ContainerError> {
    Ok(u32::from_le_bytes(read_bytes(bytes, offset)?))
}

fn read_i32(bytes: &[u8], offset: usize) -> Result<i32, ContainerError> {
    Ok(i32::from_le_bytes(read_bytes(bytes, offset)?))
}

/// Resolve a self-relative offset stored at `field` into a range of
/// `count * stride` bytes.
fn section(
    bytes: &[u8],
    field: usize,
    count: usize,
    stride: usize,
    name: &'static str,
) -> Result<usize, ContainerError> {
    let rel = read_u32(bytes, field)? as u64;
    let start = field as u64 + rel;
    let len = (count as u64).saturating_mul(stride as u64);
    if count != 0 && start.saturating_add(len) > bytes.len() as u64 {
        return Err(ContainerError::BadSectionOffset {
            section: name,
            offset: start,
        });
    }
    Ok(start as usize)
}

//=============================================================================
// PROGRAM
//=============================================================================

/// Decoded GXP binary
#[derive(Debug, Clone)]
pub struct Program {
    bytes: Vec<u8>,
    pub major_version: u8,
    pub minor_version: u8,
    pub program_type: ProgramType,
    /// Fragment program writes the color output register directly
    pub native_color: bool,
    pub reg_format: bool,
    pub primary_reg_count: u16,
    pub secondary_reg_count: u16,
    pub temp_reg_count1: u16,
    pub temp_reg_count2: u16,
    pub default_uniform_buffer_count: u32,
    primary: Vec<u64>,
    secondary: Vec<u64>,
    parameters: Vec<Parameter>,
    containers: Vec<Container>,
    literals: Vec<Literal>,
    dependent_samplers: Vec<DependentSampler>,
    varyings: Varyings,
    fragment_inputs: Vec<FragmentInputDescriptor>,
}

impl Program {
    /// Parse a GXP blob. The bytes are copied so the program can outlive
    /// the guest memory it came from.
    pub fn load(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ContainerError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }

        let magic = read_u32(bytes, 0)?;
        if magic != GXP_MAGIC {
            return Err(ContainerError::BadMagic(magic));
        }

        let declared = read_u32(bytes, OFF_SIZE)? as usize;
        if declared > bytes.len() {
            return Err(ContainerError::Truncated {
                needed: declared,
                available: bytes.len(),
            });
        }

        let type_byte = read_u8(bytes, OFF_TYPE)?;
        let program_type = if type_byte & 1 != 0 {
            ProgramType::Fragment
        } else {
            ProgramType::Vertex
        };

        let primary = Self::read_primary(bytes)?;
        let secondary = Self::read_secondary(bytes)?;
        let parameters = Self::read_parameters(bytes)?;
        let containers = Self::read_containers(bytes)?;
        let literals = Self::read_literals(bytes)?;
        let dependent_samplers = Self::read_dependent_samplers(bytes)?;
        let (varyings, varyings_start) = Self::read_varyings(bytes)?;

        let fragment_inputs = if program_type == ProgramType::Fragment {
            Self::read_fragment_inputs(bytes, varyings_start, &varyings)?
        } else {
            Vec::new()
        };

        let program = Self {
            major_version: read_u8(bytes, OFF_MAJOR)?,
            minor_version: read_u8(bytes, OFF_MINOR)?,
            program_type,
            native_color: type_byte & 0x40 != 0,
            reg_format: type_byte & 0x80 != 0,
            primary_reg_count: read_u16(bytes, OFF_PRIMARY_REGS)?,
            secondary_reg_count: read_u16(bytes, OFF_SECONDARY_REGS)?,
            temp_reg_count1: read_u16(bytes, OFF_TEMP_REGS1)?,
            temp_reg_count2: read_u16(bytes, OFF_TEMP_REGS2)?,
            default_uniform_buffer_count: read_u32(bytes, OFF_UNIFORM_BUFFERS)?,
            bytes: bytes.to_vec(),
            primary,
            secondary,
            parameters,
            containers,
            literals,
            dependent_samplers,
            varyings,
            fragment_inputs,
        };

        tracing::debug!(
            "Loaded {:?} program v{}.{}: {} primary, {} secondary instructions, {} parameters",
            program.program_type,
            program.major_version,
            program.minor_version,
            program.primary.len(),
            program.secondary.len(),
            program.parameters.len()
        );

        Ok(program)
    }

    fn read_words(bytes: &[u8], start: usize, count: usize) -> Result<Vec<u64>, ContainerError> {
        (0..count)
            .map(|i| Ok(u64::from_le_bytes(read_bytes(bytes, start + i * 8)?)))
            .collect()
    }

    fn read_primary(bytes: &[u8]) -> Result<Vec<u64>, ContainerError> {
        let count = read_u32(bytes, OFF_PRIMARY_COUNT)? as usize;
        let start = section(bytes, OFF_PRIMARY_OFFSET, count, 8, "primary program")?;
        Self::read_words(bytes, start, count)
    }

    fn read_secondary(bytes: &[u8]) -> Result<Vec<u64>, ContainerError> {
        let start_rel = read_u32(bytes, OFF_SECONDARY_START)? as u64;
        let end_rel = read_u32(bytes, OFF_SECONDARY_END)? as u64;
        if start_rel == 0 && end_rel == 0 {
            return Ok(Vec::new());
        }

        let start = OFF_SECONDARY_START as u64 + start_rel;
        let end = OFF_SECONDARY_END as u64 + end_rel;
        if end < start || end > bytes.len() as u64 {
            return Err(ContainerError::BadSectionOffset {
                section: "secondary program",
                offset: start,
            });
        }
        Self::read_words(bytes, start as usize, ((end - start) / 8) as usize)
    }

    fn read_parameters(bytes: &[u8]) -> Result<Vec<Parameter>, ContainerError> {
        let count = read_u32(bytes, OFF_PARAM_COUNT)? as usize;
        let rel = read_u32(bytes, OFF_PARAM_OFFSET)? as u64;
        let table = OFF_PARAM_OFFSET as u64 + rel;

        let mut parameters = Vec::with_capacity(count.min(1024));
        for index in 0..count {
            let entry = table + (index * PARAMETER_SIZE) as u64;
            if entry + PARAMETER_SIZE as u64 > bytes.len() as u64 {
                return Err(ContainerError::BadParameterOffset {
                    index,
                    offset: entry as i64,
                });
            }
            let entry = entry as usize;

            let name_offset = read_i32(bytes, entry)?;
            let bitfield = read_u16(bytes, entry + 4)?;
            let semantic = read_u16(bytes, entry + 6)?;
            let array_size = read_u32(bytes, entry + 8)?;
            let resource_index = read_i32(bytes, entry + 12)?;

            let name_at = entry as i64 + name_offset as i64;
            if name_at < 0 || name_at >= bytes.len() as i64 {
                return Err(ContainerError::BadParameterOffset {
                    index,
                    offset: name_at,
                });
            }
            let tail = &bytes[name_at as usize..];
            let len = tail
                .iter()
                .position(|&b| b == 0)
                .ok_or(ContainerError::BadName { index })?;
            let name = std::str::from_utf8(&tail[..len])
                .map_err(|_| ContainerError::BadName { index })?
                .to_string();

            parameters.push(Parameter {
                name,
                category: ParameterCategory::from((bitfield & 0xF) as u8),
                param_type: ParameterType::from(((bitfield >> 4) & 0xF) as u8),
                component_count: ((bitfield >> 8) & 0xF) as u8,
                container_index: ((bitfield >> 12) & 0xF) as u8,
                semantic,
                array_size,
                resource_index,
            });
        }
        Ok(parameters)
    }

    fn read_containers(bytes: &[u8]) -> Result<Vec<Container>, ContainerError> {
        let count = read_u32(bytes, OFF_CONTAINER_COUNT)? as usize;
        let start = section(bytes, OFF_CONTAINER_OFFSET, count, CONTAINER_SIZE, "containers")?;
        (0..count)
            .map(|i| {
                let at = start + i * CONTAINER_SIZE;
                Ok(Container {
                    container_index: read_u16(bytes, at)?,
                    base_sa_offset: read_u16(bytes, at + 4)?,
                    max_resource_index: read_u16(bytes, at + 6)?,
                })
            })
            .collect()
    }

    fn read_literals(bytes: &[u8]) -> Result<Vec<Literal>, ContainerError> {
        let count = read_u32(bytes, OFF_LITERAL_COUNT)? as usize;
        let start = section(bytes, OFF_LITERAL_OFFSET, count, 8, "literals")?;
        (0..count)
            .map(|i| {
                let at = start + i * 8;
                Ok(Literal {
                    offset: read_u32(bytes, at)?,
                    bits: read_u32(bytes, at + 4)?,
                })
            })
            .collect()
    }

    fn read_dependent_samplers(bytes: &[u8]) -> Result<Vec<DependentSampler>, ContainerError> {
        let count = read_u32(bytes, OFF_SAMPLER_COUNT)? as usize;
        let start = section(
            bytes,
            OFF_SAMPLER_OFFSET,
            count,
            DEPENDENT_SAMPLER_SIZE,
            "dependent samplers",
        )?;
        (0..count)
            .map(|i| {
                let at = start + i * DEPENDENT_SAMPLER_SIZE;
                Ok(DependentSampler {
                    resource_index_layout_offset: read_u16(bytes, at)?,
                    sa_offset: read_u16(bytes, at + 2)?,
                })
            })
            .collect()
    }

    fn read_varyings(bytes: &[u8]) -> Result<(Varyings, usize), ContainerError> {
        let start = section(bytes, OFF_VARYINGS_OFFSET, 1, VARYINGS_SIZE, "varyings")?;
        let varyings = Varyings {
            output_param_type: read_u8(bytes, start + VAR_OUTPUT_TYPE)?,
            output_comp_count: read_u8(bytes, start + VAR_OUTPUT_COMPS)?,
            varyings_count: read_u16(bytes, start + VAR_COUNT)?,
            vertex_outputs1: read_u32(bytes, start + VAR_OUTPUTS1)?,
            vertex_outputs2: read_u32(bytes, start + VAR_OUTPUTS2)?,
        };
        Ok((varyings, start))
    }

    fn read_fragment_inputs(
        bytes: &[u8],
        varyings_start: usize,
        varyings: &Varyings,
    ) -> Result<Vec<FragmentInputDescriptor>, ContainerError> {
        let count = varyings.varyings_count as usize;
        if count == 0 {
            return Ok(Vec::new());
        }
        let start = section(
            bytes,
            varyings_start + VAR_OUTPUTS1,
            count,
            DESCRIPTOR_SIZE,
            "fragment inputs",
        )?;
        (0..count)
            .map(|i| {
                let at = start + i * DESCRIPTOR_SIZE;
                Ok(FragmentInputDescriptor {
                    attribute_info: read_u32(bytes, at)?,
                    resource_index: read_u32(bytes, at + 4)?,
                    size: read_u32(bytes, at + 8)?,
                    component_info: read_u32(bytes, at + 12)?,
                })
            })
            .collect()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_vertex(&self) -> bool {
        self.program_type == ProgramType::Vertex
    }

    pub fn is_fragment(&self) -> bool {
        self.program_type == ProgramType::Fragment
    }

    pub fn primary_words(&self) -> &[u64] {
        &self.primary
    }

    pub fn secondary_words(&self) -> &[u64] {
        &self.secondary
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// Container by its container index, not by table position
    pub fn container(&self, index: u16) -> Option<&Container> {
        self.containers.iter().find(|c| c.container_index == index)
    }

    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    pub fn literal(&self, index: usize) -> Option<&Literal> {
        self.literals.get(index)
    }

    /// Container the literal offsets are relative to
    pub fn literal_container(&self) -> Option<&Container> {
        self.container(LITERAL_CONTAINER)
            .or_else(|| self.container(DATA_CONTAINER))
    }

    pub fn dependent_samplers(&self) -> &[DependentSampler] {
        &self.dependent_samplers
    }

    pub fn varyings(&self) -> &Varyings {
        &self.varyings
    }

    pub fn fragment_inputs(&self) -> &[FragmentInputDescriptor] {
        &self.fragment_inputs
    }

    /// Parameter type of the color written by a fragment program
    pub fn fragment_output_type(&self) -> ParameterType {
        ParameterType::from(self.varyings.output_param_type)
    }

    /// Vertex outputs with the per-texcoord component layout. Empty for
    /// fragment programs.
    pub fn vertex_outputs(&self) -> VertexOutputSet {
        let mut set = VertexOutputSet {
            outputs: VertexOutputs::empty(),
            texcoords: [TexCoordInfo::default(); 10],
        };
        if !self.is_vertex() {
            return set;
        }

        let vo1 = self.varyings.vertex_outputs1;
        let vo2 = self.varyings.vertex_outputs2;

        let mut outputs = VertexOutputs::POSITION;
        if vo1 & 0x200 != 0 {
            outputs |= VertexOutputs::FOG;
        }
        if vo1 & 0x800 != 0 {
            outputs |= VertexOutputs::COLOR0;
        }
        if vo1 & 0x400 != 0 {
            outputs |= VertexOutputs::COLOR1;
        }
        for (i, info) in set.texcoords.iter_mut().enumerate() {
            let bits = (vo2 >> (i * 3)) & 0b111;
            if bits != 0 {
                outputs |= VertexOutputs::texcoord(i);
                *info = TexCoordInfo(bits as u8);
            }
        }
        if vo1 & 0x100 != 0 {
            outputs |= VertexOutputs::PSIZE;
        }
        for clip in 0..8 {
            if vo1 & (1 << clip) != 0 {
                outputs |= VertexOutputs::from_bits_truncate(VertexOutputs::CLIP0.bits() << clip);
            }
        }

        set.outputs = outputs;
        set
    }

    /// SHA-1 of the whole blob as lowercase hex
    pub fn content_hash(&self) -> String {
        let digest = Sha1::digest(&self.bytes);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

//=============================================================================
// BUILDER
//=============================================================================

/// Assembles a GXP blob from its parts. The output is accepted by
/// [`Program::load`]; tools use it to wrap raw instruction streams.
#[derive(Debug, Clone)]
pub struct ProgramBuilder {
    program_type: ProgramType,
    native_color: bool,
    primary_reg_count: u16,
    primary: Vec<u64>,
    secondary: Vec<u64>,
    parameters: Vec<Parameter>,
    containers: Vec<Container>,
    literals: Vec<Literal>,
    dependent_samplers: Vec<DependentSampler>,
    varyings: Varyings,
    fragment_inputs: Vec<FragmentInputDescriptor>,
}

impl ProgramBuilder {
    pub fn new(program_type: ProgramType) -> Self {
        Self {
            program_type,
            native_color: false,
            primary_reg_count: 0,
            primary: Vec::new(),
            secondary: Vec::new(),
            parameters: Vec::new(),
            containers: Vec::new(),
            literals: Vec::new(),
            dependent_samplers: Vec::new(),
            varyings: Varyings::default(),
            fragment_inputs: Vec::new(),
        }
    }

    pub fn native_color(mut self, native: bool) -> Self {
        self.native_color = native;
        self
    }

    pub fn primary_reg_count(mut self, count: u16) -> Self {
        self.primary_reg_count = count;
        self
    }

    pub fn primary(mut self, words: &[u64]) -> Self {
        self.primary = words.to_vec();
        self
    }

    pub fn secondary(mut self, words: &[u64]) -> Self {
        self.secondary = words.to_vec();
        self
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn container(mut self, container: Container) -> Self {
        self.containers.push(container);
        self
    }

    pub fn literal(mut self, offset: u32, bits: u32) -> Self {
        self.literals.push(Literal { offset, bits });
        self
    }

    pub fn dependent_sampler(mut self, sampler: DependentSampler) -> Self {
        self.dependent_samplers.push(sampler);
        self
    }

    /// Raw vertex output words
    pub fn vertex_outputs(mut self, vo1: u32, vo2: u32) -> Self {
        self.varyings.vertex_outputs1 = vo1;
        self.varyings.vertex_outputs2 = vo2;
        self
    }

    pub fn fragment_output(mut self, param_type: ParameterType, comps: u8) -> Self {
        self.varyings.output_param_type = param_type.bits();
        self.varyings.output_comp_count = comps;
        self
    }

    pub fn fragment_input(mut self, descriptor: FragmentInputDescriptor) -> Self {
        self.fragment_inputs.push(descriptor);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        fn put_u16(out: &mut [u8], at: usize, v: u16) {
            out[at..at + 2].copy_from_slice(&v.to_le_bytes());
        }
        fn put_u32(out: &mut [u8], at: usize, v: u32) {
            out[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        fn align8(v: usize) -> usize {
            (v + 7) & !7
        }

        // Layout: header, parameters, names, containers, literals,
        // samplers, varyings, descriptors, then both programs
        let params_at = HEADER_SIZE;
        let names_at = params_at + self.parameters.len() * PARAMETER_SIZE;
        let names_len: usize = self.parameters.iter().map(|p| p.name.len() + 1).sum();
        let containers_at = align8(names_at + names_len);
        let literals_at = containers_at + self.containers.len() * CONTAINER_SIZE;
        let samplers_at = literals_at + self.literals.len() * 8;
        let varyings_at = align8(samplers_at + self.dependent_samplers.len() * DEPENDENT_SAMPLER_SIZE);
        let descriptors_at = varyings_at + VARYINGS_SIZE;
        let primary_at = align8(descriptors_at + self.fragment_inputs.len() * DESCRIPTOR_SIZE);
        let secondary_at = primary_at + self.primary.len() * 8;
        let total = secondary_at + self.secondary.len() * 8;

        let mut out = vec![0u8; total];
        put_u32(&mut out, 0, GXP_MAGIC);
        out[OFF_MAJOR] = 1;
        out[OFF_MINOR] = 4;
        put_u32(&mut out, OFF_SIZE, total as u32);

        let mut type_byte = 0u8;
        if self.program_type == ProgramType::Fragment {
            type_byte |= 1;
        }
        if self.native_color {
            type_byte |= 0x40;
        }
        out[OFF_TYPE] = type_byte;
        put_u16(&mut out, OFF_PRIMARY_REGS, self.primary_reg_count);

        put_u32(&mut out, OFF_PARAM_COUNT, self.parameters.len() as u32);
        put_u32(&mut out, OFF_PARAM_OFFSET, (params_at - OFF_PARAM_OFFSET) as u32);
        put_u32(&mut out, OFF_VARYINGS_OFFSET, (varyings_at - OFF_VARYINGS_OFFSET) as u32);
        put_u32(&mut out, OFF_PRIMARY_COUNT, self.primary.len() as u32);
        put_u32(&mut out, OFF_PRIMARY_OFFSET, (primary_at - OFF_PRIMARY_OFFSET) as u32);
        if !self.secondary.is_empty() {
            put_u32(&mut out, OFF_SECONDARY_START, (secondary_at - OFF_SECONDARY_START) as u32);
            put_u32(&mut out, OFF_SECONDARY_END, (total - OFF_SECONDARY_END) as u32);
        }
        put_u32(&mut out, OFF_LITERAL_COUNT, self.literals.len() as u32);
        put_u32(&mut out, OFF_LITERAL_OFFSET, (literals_at - OFF_LITERAL_OFFSET) as u32);
        put_u32(&mut out, OFF_SAMPLER_COUNT, self.dependent_samplers.len() as u32);
        put_u32(&mut out, OFF_SAMPLER_OFFSET, (samplers_at - OFF_SAMPLER_OFFSET) as u32);
        put_u32(&mut out, OFF_CONTAINER_COUNT, self.containers.len() as u32);
        put_u32(&mut out, OFF_CONTAINER_OFFSET, (containers_at - OFF_CONTAINER_OFFSET) as u32);

        let mut name_cursor = names_at;
        for (i, p) in self.parameters.iter().enumerate() {
            let entry = params_at + i * PARAMETER_SIZE;
            put_u32(&mut out, entry, (name_cursor - entry) as u32);
            let bitfield = (p.category.bits() as u16 & 0xF)
                | ((p.param_type.bits() as u16 & 0xF) << 4)
                | ((p.component_count as u16 & 0xF) << 8)
                | ((p.container_index as u16 & 0xF) << 12);
            put_u16(&mut out, entry + 4, bitfield);
            put_u16(&mut out, entry + 6, p.semantic);
            put_u32(&mut out, entry + 8, p.array_size);
            put_u32(&mut out, entry + 12, p.resource_index as u32);
            out[name_cursor..name_cursor + p.name.len()].copy_from_slice(p.name.as_bytes());
            name_cursor += p.name.len() + 1;
        }

        for (i, c) in self.containers.iter().enumerate() {
            let at = containers_at + i * CONTAINER_SIZE;
            put_u16(&mut out, at, c.container_index);
            put_u16(&mut out, at + 4, c.base_sa_offset);
            put_u16(&mut out, at + 6, c.max_resource_index);
        }

        for (i, l) in self.literals.iter().enumerate() {
            put_u32(&mut out, literals_at + i * 8, l.offset);
            put_u32(&mut out, literals_at + i * 8 + 4, l.bits);
        }

        for (i, s) in self.dependent_samplers.iter().enumerate() {
            let at = samplers_at + i * DEPENDENT_SAMPLER_SIZE;
            put_u16(&mut out, at, s.resource_index_layout_offset);
            put_u16(&mut out, at + 2, s.sa_offset);
        }

        out[varyings_at + VAR_OUTPUT_TYPE] = self.varyings.output_param_type;
        out[varyings_at + VAR_OUTPUT_COMPS] = self.varyings.output_comp_count;
        if self.program_type == ProgramType::Fragment {
            put_u16(&mut out, varyings_at + VAR_COUNT, self.fragment_inputs.len() as u16);
            put_u32(
                &mut out,
                varyings_at + VAR_OUTPUTS1,
                (descriptors_at - (varyings_at + VAR_OUTPUTS1)) as u32,
            );
        } else {
            put_u32(&mut out, varyings_at + VAR_OUTPUTS1, self.varyings.vertex_outputs1);
            put_u32(&mut out, varyings_at + VAR_OUTPUTS2, self.varyings.vertex_outputs2);
        }

        for (i, d) in self.fragment_inputs.iter().enumerate() {
            let at = descriptors_at + i * DESCRIPTOR_SIZE;
            put_u32(&mut out, at, d.attribute_info);
            put_u32(&mut out, at + 4, d.resource_index);
            put_u32(&mut out, at + 8, d.size);
            put_u32(&mut out, at + 12, d.component_info);
        }

        for (i, w) in self.primary.iter().enumerate() {
            out[primary_at + i * 8..primary_at + i * 8 + 8].copy_from_slice(&w.to_le_bytes());
        }
        for (i, w) in self.secondary.iter().enumerate() {
            out[secondary_at + i * 8..secondary_at + i * 8 + 8].copy_from_slice(&w.to_le_bytes());
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(name: &str, resource_index: i32) -> Parameter {
        Parameter {
            name: name.to_string(),
            category: ParameterCategory::Uniform,
            param_type: ParameterType::F32,
            component_count: 4,
            container_index: 14,
            semantic: 0,
            array_size: 1,
            resource_index,
        }
    }

    #[test]
    fn test_load_roundtrip() {
        let blob = ProgramBuilder::new(ProgramType::Vertex)
            .primary(&[0x1111, 0x2222])
            .secondary(&[0x3333])
            .parameter(uniform("mvp", 0))
            .parameter(uniform("lights[2].color", 8))
            .container(Container {
                container_index: 14,
                base_sa_offset: 4,
                max_resource_index: 16,
            })
            .literal(2, 1.5f32.to_bits())
            .vertex_outputs(0x800, 0b001)
            .build();

        let program = Program::load(&blob).unwrap();
        assert!(program.is_vertex());
        assert_eq!(program.primary_words(), &[0x1111, 0x2222]);
        assert_eq!(program.secondary_words(), &[0x3333]);
        assert_eq!(program.parameters().len(), 2);
        assert_eq!(program.parameters()[1].name, "lights[2].color");
        assert_eq!(program.parameters()[1].flat_name(), "lights_2_color");
        assert_eq!(program.container(14).map(|c| c.base_sa_offset), Some(4));
        assert_eq!(program.literal(0).map(|l| l.bits), Some(1.5f32.to_bits()));

        let outputs = program.vertex_outputs();
        assert!(outputs.outputs.contains(VertexOutputs::POSITION | VertexOutputs::COLOR0));
        assert!(outputs.outputs.contains(VertexOutputs::TEXCOORD0));
        assert_eq!(outputs.texcoords[0].component_count(), 2);
    }

    #[test]
    fn test_truncated_and_bad_magic() {
        assert!(matches!(
            Program::load(&[0u8; 16]),
            Err(ContainerError::Truncated { .. })
        ));

        let mut blob = ProgramBuilder::new(ProgramType::Fragment).build();
        blob[0] = b'X';
        assert!(matches!(Program::load(&blob), Err(ContainerError::BadMagic(_))));

        let mut blob = ProgramBuilder::new(ProgramType::Fragment).build();
        let len = blob.len() as u32;
        blob[OFF_SIZE..OFF_SIZE + 4].copy_from_slice(&(len + 64).to_le_bytes());
        assert!(matches!(Program::load(&blob), Err(ContainerError::Truncated { .. })));
    }

    #[test]
    fn test_bad_offsets() {
        let mut blob = ProgramBuilder::new(ProgramType::Fragment)
            .primary(&[0, 0])
            .build();
        blob[OFF_PRIMARY_OFFSET..OFF_PRIMARY_OFFSET + 4].copy_from_slice(&0xFFFFu32.to_le_bytes());
        assert!(matches!(
            Program::load(&blob),
            Err(ContainerError::BadSectionOffset { section: "primary program", .. })
        ));

        let mut blob = ProgramBuilder::new(ProgramType::Fragment)
            .parameter(uniform("u", 0))
            .build();
        let entry = HEADER_SIZE;
        blob[entry..entry + 4].copy_from_slice(&(-4096i32).to_le_bytes());
        assert!(matches!(
            Program::load(&blob),
            Err(ContainerError::BadParameterOffset { index: 0, .. })
        ));
    }

    #[test]
    fn test_unterminated_name() {
        let mut blob = ProgramBuilder::new(ProgramType::Vertex)
            .parameter(uniform("abc", 0))
            .build();
        // Point the name at the last byte of the blob, which is not zero
        let last = blob.len() - 1;
        blob[last] = b'x';
        let entry = HEADER_SIZE;
        blob[entry..entry + 4].copy_from_slice(&((last - entry) as i32).to_le_bytes());
        assert!(matches!(
            Program::load(&blob),
            Err(ContainerError::BadName { index: 0 })
        ));
    }

    #[test]
    fn test_flatten_name() {
        assert_eq!(flatten_name("color"), "color");
        assert_eq!(flatten_name("a.b"), "a_b");
        assert_eq!(flatten_name("abc[5].var"), "abc_5_var");
        assert_eq!(flatten_name("abc[5].var[2]"), "abc_5_var[2]");
    }

    #[test]
    fn test_fragment_inputs_and_output_type() {
        let blob = ProgramBuilder::new(ProgramType::Fragment)
            .fragment_output(ParameterType::F16, 4)
            .fragment_input(FragmentInputDescriptor {
                attribute_info: 0xA000,
                resource_index: 0,
                size: 0x10,
                component_info: 0,
            })
            .build();
        let program = Program::load(&blob).unwrap();
        assert_eq!(program.fragment_output_type(), ParameterType::F16);
        assert_eq!(program.fragment_inputs().len(), 1);
        assert_eq!(program.fragment_inputs()[0].attribute_info, 0xA000);
        assert!(program.vertex_outputs().outputs.is_empty());
    }

    #[test]
    fn test_content_hash_is_stable() {
        let blob = ProgramBuilder::new(ProgramType::Vertex).primary(&[1]).build();
        let a = Program::load(&blob).unwrap().content_hash();
        let b = Program::load(&blob).unwrap().content_hash();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);

        let other = ProgramBuilder::new(ProgramType::Vertex).primary(&[2]).build();
        assert_ne!(a, Program::load(&other).unwrap().content_hash());
    }
}
