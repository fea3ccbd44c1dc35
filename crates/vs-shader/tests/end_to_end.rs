mod common;

use common::{attribute, vmov_pa_to_o, Interpreter};
use vs_core::ShaderBackend;
use vs_shader::backend::{emit_program, PhaseCode, ProgramCode};
use vs_shader::binding::{bind, VertexOutputKind};
use vs_shader::operand::StorageBank;
use vs_shader::translator::decode_program_phase;
use vs_shader::types::{Phase, ProgramType};
use vs_shader::{Program, ProgramBuilder, TranslateOptions, Translator};

const SPIRV_MAGIC: u32 = 0x0723_0203;
const OP_STORE: u32 = 62;

fn passthrough_vertex() -> Vec<u8> {
    ProgramBuilder::new(ProgramType::Vertex)
        .parameter(attribute("aPosition", 0))
        .primary(&[vmov_pa_to_o(0, 0)])
        .build()
}

#[test]
fn test_mov_pa0_to_o0_executes() {
    let program = Program::load(&passthrough_vertex()).unwrap();
    let plan = bind(&program, &[], None);
    assert_eq!(plan.attributes.len(), 1);
    assert_eq!(plan.attributes[0].pa_offset, 0);
    assert_eq!(plan.vertex_outputs[0].kind, VertexOutputKind::Position);

    let primary = decode_program_phase(&program, Phase::Primary).unwrap();
    let code = ProgramCode {
        plan: &plan,
        features: Default::default(),
        primary: PhaseCode {
            instructions: &primary.instructions,
            flow: &primary.flow,
        },
        secondary: None,
    };

    let mut interp = Interpreter::new();
    interp.attributes.push([1.0, -2.0, 3.5, 1.0]);
    emit_program(&mut interp, &code).unwrap();

    for (word, expected) in [1.0, -2.0, 3.5, 1.0].into_iter().enumerate() {
        assert_eq!(interp.float(StorageBank::Output, word as u32), expected);
    }
    assert_eq!(interp.outputs.get(&0), Some(&[1.0, -2.0, 3.5, 1.0]));
}

#[test]
fn test_mov_pa0_to_o0_glsl() {
    let translator = Translator::new(None, 1);
    let options = TranslateOptions {
        backend: ShaderBackend::Glsl,
        ..TranslateOptions::default()
    };
    let result = translator.translate(&passthrough_vertex(), &options, None).unwrap();
    assert!(!result.placeholder);

    let source = result.shader.as_glsl().unwrap();
    assert!(source.starts_with("#version 450"));
    assert!(source.contains(&format!("// shader {}", result.hash)));
    assert!(source.contains("aPosition"));
    assert!(source.contains("pa[0] = "));
    assert!(source.contains("o[0] = "));
    assert!(source.contains("o[3] = "));
    assert!(source.contains("gl_Position = vec4("));

    // the move reads pa before it writes o
    let read = source.find("= pa[0];").unwrap();
    let write = source.find("o[0] = ").unwrap();
    assert!(read < write);
}

#[test]
fn test_mov_pa0_to_o0_spirv() {
    let translator = Translator::new(None, 1);
    let result = translator
        .translate(&passthrough_vertex(), &TranslateOptions::default(), None)
        .unwrap();
    assert!(!result.placeholder);

    let words = result.shader.as_spirv().unwrap();
    assert_eq!(words[0], SPIRV_MAGIC);

    let mut stores = 0;
    let mut i = 5;
    while i < words.len() {
        let count = (words[i] >> 16) as usize;
        assert!(count > 0);
        if words[i] & 0xFFFF == OP_STORE {
            stores += 1;
        }
        i += count;
    }
    assert_eq!(i, words.len());
    // four preamble stores into pa, four moves into o, one position write
    assert!(stores >= 9, "only {} stores", stores);
}

#[test]
fn test_backends_agree_on_interface() {
    let bytes = passthrough_vertex();
    let translator = Translator::new(None, 1);
    let glsl = translator
        .translate(
            &bytes,
            &TranslateOptions {
                backend: ShaderBackend::Glsl,
                ..TranslateOptions::default()
            },
            None,
        )
        .unwrap();
    let spirv = translator.translate(&bytes, &TranslateOptions::default(), None).unwrap();
    assert_eq!(glsl.hash, spirv.hash);
    assert_eq!(glsl.program_type, ProgramType::Vertex);
    assert_eq!(spirv.program_type, ProgramType::Vertex);
    assert_eq!(glsl.shader.backend(), ShaderBackend::Glsl);
    assert_eq!(spirv.shader.backend(), ShaderBackend::Spirv);
}
