mod common;

use common::Interpreter;
use vs_core::FeatureState;
use vs_shader::backend::lower::{emit_instruction, LowerContext};
use vs_shader::backend::{emit_program, Backend, GlslBackend, PhaseCode, ProgramCode, ScalarKind, SpirvBackend};
use vs_shader::binding::{bind, BindingPlan};
use vs_shader::compare::CompareOp;
use vs_shader::operand::StorageBank;
use vs_shader::recompiler::analyze;
use vs_shader::types::{
    CompareMode, DataType, ExtPredicate, Extra, Instruction, Opcode, Operand, Phase, ProgramType,
    RegisterBank, TestAlu, TestParams,
};
use vs_shader::{Program, ProgramBuilder};

const MODES: [CompareMode; 4] = [
    CompareMode::NotEqual,
    CompareMode::LessThan,
    CompareMode::GreaterThan,
    CompareMode::AllLanes,
];

/// Operand pairs, including the equality boundary
const PAIRS: [(f32, f32); 6] = [
    (1.0, 2.0),
    (2.0, 1.0),
    (3.0, 3.0),
    (-1.5, -1.5),
    (0.0, -0.5),
    (-4.0, 0.25),
];

fn fragment_plan() -> BindingPlan {
    let program = Program::load(&ProgramBuilder::new(ProgramType::Fragment).build()).unwrap();
    bind(&program, &[], None)
}

fn pa(num: u32) -> Operand {
    Operand::new(RegisterBank::PrimAttr, num, DataType::F32)
}

/// `p0 = (pa0.x - pa4.x) <mode> 0`
fn vtst(pc: usize, mode: CompareMode, inclusive: bool) -> Instruction {
    let mut inst = Instruction::new(pc, 0, Opcode::Vtst);
    inst.data_type = DataType::F32;
    inst.sources[1] = Some(pa(0));
    inst.sources[2] = Some(pa(4));
    inst.extra = Extra::Test(TestParams {
        alu: TestAlu::Sub,
        mode,
        inclusive,
        channel: 0,
        pdst: 0,
    });
    inst
}

fn vmov(pc: usize, dest: u32, src: u32) -> Instruction {
    let mut inst = Instruction::new(pc, 0, Opcode::Vmov);
    inst.data_type = DataType::F32;
    inst.dest = Some(Operand::new(RegisterBank::Output, dest, DataType::F32));
    inst.sources[1] = Some(pa(src));
    inst.write_mask = 0xF;
    inst
}

fn branch(pc: usize, offset: i32, predicate: ExtPredicate) -> Instruction {
    let mut inst = Instruction::new(pc, 0, Opcode::Br);
    inst.predicate = predicate;
    inst.extra = Extra::Branch {
        offset,
        absolute: false,
    };
    inst
}

fn spirv_opcodes(words: &[u32]) -> Vec<u16> {
    let mut out = Vec::new();
    let mut i = 5;
    while i < words.len() {
        out.push((words[i] & 0xFFFF) as u16);
        i += ((words[i] >> 16) as usize).max(1);
    }
    out
}

#[test]
fn test_compare_matrix_matches_reference() {
    let plan = fragment_plan();
    let cx = LowerContext::new(Phase::Primary, &plan);

    for mode in MODES {
        for inclusive in [false, true] {
            let op = CompareOp::select(mode, inclusive);
            for (a, b) in PAIRS {
                let mut interp = Interpreter::new();
                interp.set_float(StorageBank::PrimAttr, 0, a);
                interp.set_float(StorageBank::PrimAttr, 4, b);
                emit_instruction(&mut interp, &cx, &vtst(0, mode, inclusive)).unwrap();

                assert_eq!(
                    interp.predicates[0],
                    op.evaluate(a - b, 0.0),
                    "{:?} inclusive={} a={} b={}",
                    mode,
                    inclusive,
                    a,
                    b
                );
            }
        }
    }
}

#[test]
fn test_equality_boundary() {
    let plan = fragment_plan();
    let cx = LowerContext::new(Phase::Primary, &plan);

    for mode in MODES {
        let mut results = [false; 2];
        for inclusive in [false, true] {
            let mut interp = Interpreter::new();
            interp.set_float(StorageBank::PrimAttr, 0, 2.5);
            interp.set_float(StorageBank::PrimAttr, 4, 2.5);
            emit_instruction(&mut interp, &cx, &vtst(0, mode, inclusive)).unwrap();
            results[inclusive as usize] = interp.predicates[0];
        }
        if mode == CompareMode::AllLanes {
            assert_eq!(results, [true, true]);
        } else {
            assert_eq!(results, [false, true], "{:?}", mode);
        }
    }
}

#[test]
fn test_backends_emit_the_table_operator() {
    let plan = fragment_plan();
    let cx = LowerContext::new(Phase::Primary, &plan);

    for mode in MODES {
        for inclusive in [false, true] {
            let op = CompareOp::select(mode, inclusive);
            let inst = vtst(0, mode, inclusive);

            let mut glsl = GlslBackend::new(&plan, FeatureState::default(), "0");
            emit_instruction(&mut glsl, &cx, &inst).unwrap();
            let source = glsl.finish().as_glsl().unwrap().to_string();

            let mut spirv = SpirvBackend::new(&plan, FeatureState::default(), "0");
            emit_instruction(&mut spirv, &cx, &inst).unwrap();
            let shader = spirv.finish();
            let ops = spirv_opcodes(shader.as_spirv().unwrap());

            match (op.glsl_operator(), op.spirv_opcode(ScalarKind::Float)) {
                (Some(symbol), Some(opcode)) => {
                    assert!(
                        source.contains(&format!(" {} 0.0;", symbol)),
                        "{:?}: {}",
                        op,
                        source
                    );
                    assert!(ops.contains(&opcode), "{:?}", op);
                }
                (None, None) => {
                    assert_eq!(op, CompareOp::Always);
                    assert!(source.contains("p[0] = true;"));
                }
                other => panic!("table mismatch for {:?}: {:?}", op, other),
            }
        }
    }
}

#[test]
fn test_predicated_skip_runs_on_false_predicate() {
    let plan = fragment_plan();
    let instructions = vec![
        vtst(0, CompareMode::GreaterThan, false),
        branch(1, 2, ExtPredicate::P0),
        vmov(2, 0, 8),
        vmov(3, 4, 12),
    ];
    let flow = analyze(&instructions).unwrap();
    let code = ProgramCode {
        plan: &plan,
        features: FeatureState::default(),
        primary: PhaseCode {
            instructions: &instructions,
            flow: &flow,
        },
        secondary: None,
    };

    for (a, b, skipped) in [(3.0, 1.0, true), (1.0, 3.0, false), (2.0, 2.0, false)] {
        let mut interp = Interpreter::new();
        interp.set_float(StorageBank::PrimAttr, 0, a);
        interp.set_float(StorageBank::PrimAttr, 4, b);
        for word in 0..4 {
            interp.set_float(StorageBank::PrimAttr, 8 + word, 10.0 + word as f32);
            interp.set_float(StorageBank::PrimAttr, 12 + word, 20.0 + word as f32);
        }
        emit_program(&mut interp, &code).unwrap();

        let expected = if skipped { 0.0 } else { 10.0 };
        assert_eq!(interp.float(StorageBank::Output, 0), expected, "a={} b={}", a, b);
        assert_eq!(interp.float(StorageBank::Output, 4), 20.0);
        assert_eq!(interp.float(StorageBank::Output, 7), 23.0);
    }
}

#[test]
fn test_predicated_instruction_guard() {
    let plan = fragment_plan();
    let cx = LowerContext::new(Phase::Primary, &plan);
    let mut guarded = vmov(1, 0, 8);
    guarded.predicate = ExtPredicate::NegP0;

    for (a, b) in [(1.0, 0.0), (0.0, 1.0)] {
        let mut interp = Interpreter::new();
        interp.set_float(StorageBank::PrimAttr, 0, a);
        interp.set_float(StorageBank::PrimAttr, 4, b);
        interp.set_float(StorageBank::PrimAttr, 8, 5.0);
        emit_instruction(&mut interp, &cx, &vtst(0, CompareMode::GreaterThan, false)).unwrap();
        emit_instruction(&mut interp, &cx, &guarded).unwrap();

        let expected = if a > b { 0.0 } else { 5.0 };
        assert_eq!(interp.float(StorageBank::Output, 0), expected);
    }
}
