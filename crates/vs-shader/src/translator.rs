//! Translation pipeline
//!
//! Parses a GXP blob, decodes both phases, recovers their structure, builds
//! the binding plan and runs the requested backend. Results go through the
//! [`ShaderCache`] when one is configured. Failures that leave no usable
//! shader behind are replaced by a magenta placeholder so a draw still has
//! something to bind.

use crate::backend::{
    emit_program, Backend, GlslBackend, PhaseCode, ProgramCode, SpirvBackend, TranslatedShader,
};
use crate::binding::{bind, AttributeReflector, BindingPlan, HintAttribute, VertexOutputKind};
use crate::cache::ShaderCache;
use crate::decoder::decode_phase;
use crate::disasm::{disassemble, disassemble_with_flow};
use crate::gxp::{Program, HEADER_SIZE};
use crate::recompiler::{analyze, ControlFlow};
use crate::types::{Instruction, Phase, ProgramType};
use tracing::{debug, error, info};
use vs_core::{Config, ContainerError, FeatureState, Result, ShaderBackend, TranslatorError};

const PLACEHOLDER_COLOR: [f32; 4] = [1.0, 0.0, 1.0, 1.0];

/// Per-request translation settings
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    pub backend: ShaderBackend,
    pub features: FeatureState,
    /// Attribute formats to assume when the binary carries no reflection
    pub hints: Vec<HintAttribute>,
    /// Store the blob and its disassembly next to the cached code
    pub dump_side_files: bool,
}

/// Read access to guest memory
pub trait MemoryReader {
    /// `len` bytes at `address`, `None` when the range is not mapped
    fn read(&self, address: u32, len: usize) -> Option<Vec<u8>>;
}

/// Outcome of one request
#[derive(Debug, Clone)]
pub struct Translation {
    pub shader: TranslatedShader,
    pub program_type: ProgramType,
    /// Content hash of the GXP blob
    pub hash: String,
    pub from_cache: bool,
    pub placeholder: bool,
}

/// A phase after decoding and structure recovery
#[derive(Debug, Clone)]
pub struct DecodedPhase {
    pub instructions: Vec<Instruction>,
    pub flow: ControlFlow,
}

impl DecodedPhase {
    fn code(&self) -> PhaseCode<'_> {
        PhaseCode {
            instructions: &self.instructions,
            flow: &self.flow,
        }
    }
}

/// Decode and structure one phase
pub fn decode_program_phase(program: &Program, phase: Phase) -> Result<DecodedPhase> {
    let words = match phase {
        Phase::Primary => program.primary_words(),
        Phase::Secondary => program.secondary_words(),
    };
    let instructions = decode_phase(words, phase, program.program_type)?;
    let flow = analyze(&instructions)?;
    debug!(
        "{} phase: {} instructions, {} loops",
        phase.name(),
        instructions.len(),
        flow.loop_count()
    );
    Ok(DecodedPhase { instructions, flow })
}

/// Disassembly of every non-empty phase of a program. Phases whose
/// structure cannot be recovered are listed without it.
pub fn disassemble_program(program: &Program) -> Result<String> {
    let mut out = String::new();
    for phase in [Phase::Secondary, Phase::Primary] {
        let words = match phase {
            Phase::Primary => program.primary_words(),
            Phase::Secondary => program.secondary_words(),
        };
        if words.is_empty() && phase == Phase::Secondary {
            continue;
        }
        let instructions = decode_phase(words, phase, program.program_type)?;
        match analyze(&instructions) {
            Ok(flow) => out.push_str(&disassemble_with_flow(&instructions, phase, &flow)),
            Err(e) => {
                out.push_str(&disassemble(&instructions, phase));
                out.push_str(&format!("; structure unavailable: {}\n", e));
            }
        }
    }
    Ok(out)
}

/// Generate code for a parsed program, without caching or placeholders
pub fn generate(
    program: &Program,
    options: &TranslateOptions,
    reflector: Option<&dyn AttributeReflector>,
) -> Result<TranslatedShader> {
    let plan = bind(program, &options.hints, reflector);
    generate_with_plan(program, &plan, options)
}

fn generate_with_plan(program: &Program, plan: &BindingPlan, options: &TranslateOptions) -> Result<TranslatedShader> {
    let primary = decode_program_phase(program, Phase::Primary)?;
    let secondary = if program.secondary_words().is_empty() {
        None
    } else {
        Some(decode_program_phase(program, Phase::Secondary)?)
    };

    let code = ProgramCode {
        plan,
        features: options.features,
        primary: primary.code(),
        secondary: secondary.as_ref().map(DecodedPhase::code),
    };
    let hash = program.content_hash();

    let shader = match options.backend {
        ShaderBackend::Glsl => {
            let mut backend = GlslBackend::new(plan, options.features, &hash);
            emit_program(&mut backend, &code)?;
            backend.finish()
        }
        ShaderBackend::Spirv => {
            let mut backend = SpirvBackend::new(plan, options.features, &hash);
            emit_program(&mut backend, &code)?;
            backend.finish()
        }
    };
    Ok(shader)
}

/// Shader that draws solid magenta with the program's interface. It reads
/// no framebuffer state, so it works without any optional host feature.
pub fn placeholder(plan: &BindingPlan, backend: ShaderBackend, hash: &str) -> TranslatedShader {
    let mut plan = plan.clone();
    plan.native_color = false;
    let features = FeatureState::default();

    match backend {
        ShaderBackend::Glsl => {
            let mut b = GlslBackend::new(&plan, features, hash);
            fill_placeholder(&mut b, &plan);
            b.finish()
        }
        ShaderBackend::Spirv => {
            let mut b = SpirvBackend::new(&plan, features, hash);
            fill_placeholder(&mut b, &plan);
            b.finish()
        }
    }
}

fn fill_placeholder<B: Backend>(backend: &mut B, plan: &BindingPlan) {
    backend.comment("placeholder");
    let zero = backend.const_float(0.0);
    let one = backend.const_float(1.0);
    let magenta = PLACEHOLDER_COLOR.map(|c| backend.const_float(c));

    match plan.program_type {
        ProgramType::Vertex => {
            for (i, output) in plan.vertex_outputs.iter().enumerate() {
                let values = match output.kind {
                    VertexOutputKind::Position => [zero, zero, zero, one],
                    VertexOutputKind::Color0 | VertexOutputKind::Color1 => magenta,
                    _ => [zero; 4],
                };
                backend.write_output(i, values);
            }
        }
        ProgramType::Fragment => backend.write_color(magenta, None),
    }
}

/// Front door of the translator
pub struct Translator {
    cache: Option<ShaderCache>,
    version: u32,
    placeholder_on_failure: bool,
    log_disassembly: bool,
}

impl Translator {
    pub fn new(cache: Option<ShaderCache>, version: u32) -> Self {
        Self {
            cache,
            version,
            placeholder_on_failure: true,
            log_disassembly: false,
        }
    }

    /// Translator configured from the user configuration. `identity` names
    /// the cache directory, usually the title the shaders come from.
    pub fn from_config(config: &Config, identity: &str) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| ShaderCache::new(&config.cache.path, identity));
        Self {
            cache,
            version: config.cache.version,
            placeholder_on_failure: config.translator.placeholder_on_failure,
            log_disassembly: config.debug.log_disassembly,
        }
    }

    pub fn with_placeholders(mut self, enabled: bool) -> Self {
        self.placeholder_on_failure = enabled;
        self
    }

    pub fn cache(&self) -> Option<&ShaderCache> {
        self.cache.as_ref()
    }

    /// Translate a GXP blob
    pub fn translate(
        &self,
        bytes: &[u8],
        options: &TranslateOptions,
        reflector: Option<&dyn AttributeReflector>,
    ) -> Result<Translation> {
        let program = Program::load(bytes)?;
        let content_hash = program.content_hash();
        let key = cache_key(&content_hash, options.features);
        let stage = program.program_type;

        if let Some(cache) = &self.cache {
            if let Some(shader) = cache.lookup(&key, self.version, stage, options.backend) {
                return Ok(Translation {
                    shader,
                    program_type: stage,
                    hash: content_hash,
                    from_cache: true,
                    placeholder: false,
                });
            }
        }

        if self.log_disassembly {
            match disassemble_program(&program) {
                Ok(listing) => info!("{} {}:\n{}", stage.short_name(), content_hash, listing),
                Err(e) => info!("{} {}: no listing: {}", stage.short_name(), content_hash, e),
            }
        }

        let plan = bind(&program, &options.hints, reflector);
        let (shader, placeholder) = match generate_with_plan(&program, &plan, options) {
            Ok(shader) => (shader, false),
            Err(e @ (TranslatorError::Decode(_) | TranslatorError::Structure(_))) if self.placeholder_on_failure => {
                error!(
                    "Failed to translate {} shader {}: {}; using placeholder",
                    stage.short_name(),
                    content_hash,
                    e
                );
                (placeholder(&plan, options.backend, &content_hash), true)
            }
            Err(e) => return Err(e),
        };

        if let Some(cache) = &self.cache {
            if !placeholder {
                cache.store(&key, self.version, stage, options.backend, &shader);
            }
            if options.dump_side_files {
                let listing = disassemble_program(&program).unwrap_or_else(|e| format!("; {}\n", e));
                cache.store_side_files(&key, self.version, stage, program.bytes(), &listing);
            }
        }

        Ok(Translation {
            shader,
            program_type: stage,
            hash: content_hash,
            from_cache: false,
            placeholder,
        })
    }

    /// Translate a program that lives in guest memory. The header is read
    /// first to learn the blob size.
    pub fn translate_from_memory(
        &self,
        memory: &dyn MemoryReader,
        address: u32,
        options: &TranslateOptions,
        reflector: Option<&dyn AttributeReflector>,
    ) -> Result<Translation> {
        let header = memory
            .read(address, HEADER_SIZE)
            .ok_or(ContainerError::Truncated {
                needed: HEADER_SIZE,
                available: 0,
            })?;
        let size = header
            .get(8..12)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .unwrap_or(0)
            .max(HEADER_SIZE);
        let bytes = memory.read(address, size).ok_or(ContainerError::Truncated {
            needed: size,
            available: header.len(),
        })?;
        self.translate(&bytes, options, reflector)
    }
}

/// Cache key of a program under a feature set. Generated code depends on
/// both, so the feature bits are appended to the content hash.
pub fn cache_key(content_hash: &str, features: FeatureState) -> String {
    let bits = features.support_shader_interlock as u32
        | (features.direct_fragcolor as u32) << 1
        | (features.preserve_f16_nan as u32) << 2
        | (features.use_mask as u32) << 3;
    format!("{}-{:x}", content_hash, bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gxp::ProgramBuilder;

    #[test]
    fn test_cache_key_distinguishes_features() {
        let plain = cache_key("ab", FeatureState::default());
        let masked = cache_key(
            "ab",
            FeatureState {
                use_mask: true,
                ..FeatureState::default()
            },
        );
        assert_eq!(plain, "ab-0");
        assert_eq!(masked, "ab-8");
    }

    #[test]
    fn test_translate_rejects_bad_container() {
        let translator = Translator::new(None, 1);
        let err = translator
            .translate(&[0u8; 4], &TranslateOptions::default(), None)
            .unwrap_err();
        assert!(matches!(err, TranslatorError::Container(_)));
    }

    #[test]
    fn test_empty_fragment_program() {
        let blob = ProgramBuilder::new(ProgramType::Fragment).build();
        let translator = Translator::new(None, 1);
        let options = TranslateOptions {
            backend: ShaderBackend::Glsl,
            ..TranslateOptions::default()
        };
        let result = translator.translate(&blob, &options, None).unwrap();
        assert!(!result.placeholder);
        assert!(!result.from_cache);
        assert_eq!(result.program_type, ProgramType::Fragment);
        let glsl = result.shader.as_glsl().unwrap();
        assert!(glsl.starts_with("#version 450"));
    }

    #[test]
    fn test_placeholder_writes_magenta() {
        let blob = ProgramBuilder::new(ProgramType::Fragment).build();
        let program = Program::load(&blob).unwrap();
        let plan = bind(&program, &[], None);
        let shader = placeholder(&plan, ShaderBackend::Glsl, "00");
        let glsl = shader.as_glsl().unwrap();
        assert!(glsl.contains("// placeholder"));
        assert!(glsl.contains("out_color"));
    }

    struct FlatMemory {
        base: u32,
        bytes: Vec<u8>,
    }

    impl MemoryReader for FlatMemory {
        fn read(&self, address: u32, len: usize) -> Option<Vec<u8>> {
            let start = address.checked_sub(self.base)? as usize;
            self.bytes.get(start..start + len).map(<[u8]>::to_vec)
        }
    }

    #[test]
    fn test_translate_from_memory() {
        let blob = ProgramBuilder::new(ProgramType::Vertex).build();
        let mut bytes = vec![0u8; 0x40];
        bytes.extend_from_slice(&blob);
        let memory = FlatMemory {
            base: 0x8100_0000,
            bytes,
        };

        let translator = Translator::new(None, 1);
        let result = translator
            .translate_from_memory(&memory, 0x8100_0040, &TranslateOptions::default(), None)
            .unwrap();
        assert_eq!(result.program_type, ProgramType::Vertex);
        assert!(result.shader.as_spirv().is_some());
    }
}
