//! Textual listing of decoded USSE code

use crate::recompiler::ControlFlow;
use crate::swizzle::swizzle_to_string;
use crate::types::*;
use std::fmt::Write;

const LANE_NAMES: [char; 4] = ['x', 'y', 'z', 'w'];

/// Render one operand, e.g. `-|pa4|.xyzw`
pub fn format_operand(op: &Operand) -> String {
    let mut reg = match op.bank {
        RegisterBank::Immediate => format!("#{:#x}", op.num),
        bank => format!("{}{}", bank.prefix(), op.num),
    };
    if op.flags.contains(RegisterFlags::ABSOLUTE) {
        reg = format!("|{}|", reg);
    }
    if op.flags.contains(RegisterFlags::NEGATIVE) {
        reg.insert(0, '-');
    }
    if op.bank != RegisterBank::Immediate && op.swizzle != SWIZZLE_UNDEFINED {
        reg.push('.');
        reg.push_str(&swizzle_to_string(&op.swizzle));
    }
    reg
}

fn format_mask(mask: u8) -> String {
    LANE_NAMES
        .iter()
        .enumerate()
        .filter(|(i, _)| mask & (1 << i) != 0)
        .map(|(_, c)| *c)
        .collect()
}

fn format_extra(inst: &Instruction) -> Option<String> {
    let text = match inst.extra {
        Extra::None => return None,
        Extra::Move(method) => format!("{:?}", method).to_lowercase(),
        Extra::Test(t) => format!(
            "{:?} {:?}{} p{}.{}",
            t.alu,
            t.mode,
            if t.inclusive { "=" } else { "" },
            t.pdst,
            LANE_NAMES.get(t.channel as usize).copied().unwrap_or('?')
        )
        .to_lowercase(),
        Extra::Sample(s) => format!(
            "{}d {:?} -> {} +{}",
            s.dim,
            s.lod,
            s.dest_format.name(),
            s.dest_offset
        )
        .to_lowercase(),
        Extra::Pack(p) => format!(
            "{} -> {}{}",
            p.src_format.name(),
            p.dest_format.name(),
            if p.scale { " scale" } else { "" }
        ),
        Extra::Branch { .. } => match inst.branch_target() {
            Some(target) => format!("-> {}", target),
            None => return None,
        },
        Extra::Bitwise { immediate: Some(imm) } => format!("#{:#x}", imm),
        Extra::Bitwise { immediate: None } => return None,
        Extra::Dot { lanes } => format!("{} lanes", lanes),
        Extra::Scalar { lane } => format!(
            "lane {}",
            LANE_NAMES.get(lane as usize).copied().unwrap_or('?')
        ),
    };
    Some(text)
}

/// Render one instruction without its program counter
pub fn format_instruction(inst: &Instruction) -> String {
    let mut line = String::new();
    line.push_str(inst.predicate.prefix());
    line.push_str(inst.opcode.name());

    if inst.opcode.is_no_op() || inst.opcode == Opcode::Invalid {
        return line;
    }
    if inst.dest.is_some() || inst.sources.iter().any(Option::is_some) {
        let _ = write!(line, ".{}", inst.data_type.name());
    }
    if inst.repeat > 0 {
        let _ = write!(line, ".rpt{}", inst.repeat + 1);
    }

    let mut operands = Vec::with_capacity(4);
    if let Some(dest) = &inst.dest {
        let mut text = format!("{}{}", dest.bank.prefix(), dest.num);
        if inst.write_mask != 0 {
            text.push('.');
            text.push_str(&format_mask(inst.write_mask));
        }
        operands.push(text);
    }
    operands.extend(inst.sources.iter().flatten().map(format_operand));
    if !operands.is_empty() {
        line.push(' ');
        line.push_str(&operands.join(", "));
    }
    if let Some(extra) = format_extra(inst) {
        let _ = write!(line, " [{}]", extra);
    }
    if inst.control.contains(ControlBits::END) {
        line.push_str(" (end)");
    }
    line
}

/// Listing of a whole phase, one instruction per line
pub fn disassemble(instructions: &[Instruction], phase: Phase) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; {} phase, {} instructions", phase.name(), instructions.len());
    for inst in instructions {
        let _ = writeln!(
            out,
            "{:04}: {:016x}  {}",
            inst.pc,
            inst.raw,
            format_instruction(inst)
        );
    }
    out
}

/// Listing followed by the recovered control-flow tree
pub fn disassemble_with_flow(instructions: &[Instruction], phase: Phase, flow: &ControlFlow) -> String {
    let mut out = disassemble(instructions, phase);
    out.push_str("; structure\n");
    for line in flow.render().lines() {
        let _ = writeln!(out, "; {}", line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_modifiers() {
        let mut op = Operand::new(RegisterBank::PrimAttr, 4, DataType::F32);
        op.flags = RegisterFlags::NEGATIVE | RegisterFlags::ABSOLUTE;
        assert_eq!(format_operand(&op), "-|pa4|.xyzw");

        let imm = Operand::new(RegisterBank::Immediate, 0x3f80, DataType::U32);
        assert_eq!(format_operand(&imm), "#0x3f80");
    }

    #[test]
    fn test_mov_listing() {
        let mut inst = Instruction::new(0, 0, Opcode::Vmov);
        inst.dest = Some(Operand::new(RegisterBank::Output, 0, DataType::F32));
        inst.sources[1] = Some(Operand::new(RegisterBank::PrimAttr, 0, DataType::F32));
        inst.write_mask = 0xf;
        inst.predicate = ExtPredicate::NegP0;
        assert_eq!(format_instruction(&inst), "!p0 VMOV.f32 o0.xyzw, pa0.xyzw");
    }

    #[test]
    fn test_no_ops_and_branches() {
        let nop = Instruction::new(3, 0, Opcode::Nop);
        assert_eq!(format_instruction(&nop), "NOP");

        let mut br = Instruction::new(2, 0, Opcode::Br);
        br.extra = Extra::Branch {
            offset: 3,
            absolute: false,
        };
        assert_eq!(format_instruction(&br), "BR [-> 5]");

        let listing = disassemble(&[nop], Phase::Primary);
        assert!(listing.contains("0003: 0000000000000000  NOP"));
    }
}
