//! Structured control-flow recovery
//!
//! USSE code only has predicated branches. This module rebuilds loops,
//! conditionals, breaks and continues from them so the backends can emit
//! structured code. Nodes live in an arena and refer to each other by
//! [`NodeId`]; straight-line runs are kept as `Code` ranges into the phase's
//! instruction list, with the branch instructions themselves removed.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::debug;

use crate::types::{ExtPredicate, Instruction, Opcode};
use vs_core::StructureError;

/// Predicate storage index of the first exit flag, after the hardware
/// predicates
pub const EXIT_FLAG_BASE: u8 = 4;

/// Exit flags available to one phase
pub const MAX_EXIT_FLAGS: u8 = 4;

/// Predicate slots a backend declares: hardware predicates, then exit flags
pub const PREDICATE_SLOTS: usize = (EXIT_FLAG_BASE + MAX_EXIT_FLAGS) as usize;

/// Index of a node in its [`NodeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Guard of a conditional construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Always,
    Never,
    Predicate { register: u8, negate: bool },
    /// Exit flag set by an early exit that left a loop
    Flag { index: u8, negate: bool },
}

impl Condition {
    /// Condition under which a branch with `predicate` is taken
    pub fn from_predicate(predicate: ExtPredicate, pc: usize) -> Result<Self, StructureError> {
        if predicate == ExtPredicate::None {
            return Ok(Self::Always);
        }
        predicate
            .register()
            .map(|(register, negate)| Self::Predicate { register, negate })
            .ok_or(StructureError::UnsupportedCondition { pc })
    }

    pub fn negate(self) -> Self {
        match self {
            Self::Always => Self::Never,
            Self::Never => Self::Always,
            Self::Predicate { register, negate } => Self::Predicate {
                register,
                negate: !negate,
            },
            Self::Flag { index, negate } => Self::Flag {
                index,
                negate: !negate,
            },
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "true"),
            Self::Never => write!(f, "false"),
            Self::Predicate { register, negate } => {
                write!(f, "{}p{}", if *negate { "!" } else { "" }, register)
            }
            Self::Flag { index, negate } => {
                write!(f, "{}f{}", if *negate { "!" } else { "" }, index)
            }
        }
    }
}

/// Structured control-flow node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Block(Vec<NodeId>),
    /// Straight-line run of `len` instructions from `start`
    Code { start: usize, len: usize },
    Conditional {
        condition: Condition,
        then_block: NodeId,
        else_block: Option<NodeId>,
    },
    Loop { body: NodeId },
    Break { condition: Condition },
    Continue { condition: Condition },
    SetFlag { index: u8, value: bool },
}

/// Owner of every node of one phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeArena {
    nodes: Vec<Node>,
}

impl NodeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
}

/// Recovered structure of one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlow {
    pub arena: NodeArena,
    pub root: NodeId,
    /// Branch pc to target pc
    pub branch_targets: BTreeMap<usize, usize>,
}

impl ControlFlow {
    /// Instruction indices in pre-order, which is program order without the
    /// branches
    pub fn flatten(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.flatten_into(self.root, &mut out);
        out
    }

    fn flatten_into(&self, id: NodeId, out: &mut Vec<usize>) {
        match self.arena.get(id) {
            Node::Block(children) => {
                for &child in children {
                    self.flatten_into(child, out);
                }
            }
            Node::Code { start, len } => out.extend(*start..*start + *len),
            Node::Conditional {
                then_block,
                else_block,
                ..
            } => {
                self.flatten_into(*then_block, out);
                if let Some(else_block) = else_block {
                    self.flatten_into(*else_block, out);
                }
            }
            Node::Loop { body } => self.flatten_into(*body, out),
            Node::Break { .. } | Node::Continue { .. } | Node::SetFlag { .. } => {}
        }
    }

    pub fn loop_count(&self) -> usize {
        self.arena.iter().filter(|n| matches!(n, Node::Loop { .. })).count()
    }

    /// Indented tree listing for debugging
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root, 0, &mut out);
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let pad = "  ".repeat(depth);
        match self.arena.get(id) {
            Node::Block(children) => {
                for &child in children {
                    self.render_node(child, depth, out);
                }
            }
            Node::Code { start, len } => {
                let _ = writeln!(out, "{}code {}..{}", pad, start, start + len);
            }
            Node::Conditional {
                condition,
                then_block,
                else_block,
            } => {
                let _ = writeln!(out, "{}if {}", pad, condition);
                self.render_node(*then_block, depth + 1, out);
                if let Some(else_block) = else_block {
                    let _ = writeln!(out, "{}else", pad);
                    self.render_node(*else_block, depth + 1, out);
                }
                let _ = writeln!(out, "{}end", pad);
            }
            Node::Loop { body } => {
                let _ = writeln!(out, "{}loop", pad);
                self.render_node(*body, depth + 1, out);
                let _ = writeln!(out, "{}end", pad);
            }
            Node::Break { condition } => {
                let _ = writeln!(out, "{}break if {}", pad, condition);
            }
            Node::Continue { condition } => {
                let _ = writeln!(out, "{}continue if {}", pad, condition);
            }
            Node::SetFlag { index, value } => {
                let _ = writeln!(out, "{}f{} = {}", pad, index, value);
            }
        }
    }
}

/// Innermost loop around the range being structured
#[derive(Debug, Clone, Copy)]
struct LoopScope {
    head: usize,
    /// Pc of the back-edge branch
    latch: usize,
    /// Whether the back-edge is taken unconditionally
    latch_always: bool,
}

impl LoopScope {
    fn exit(&self) -> usize {
        self.latch + 1
    }
}

/// Early exit that left at least one loop and still has to skip the code
/// between the loop end and its target
#[derive(Debug, Clone, Copy)]
struct Escape {
    pc: usize,
    target: usize,
    flag: u8,
}

struct Builder<'a> {
    instructions: &'a [Instruction],
    targets: &'a BTreeMap<usize, usize>,
    arena: NodeArena,
    next_flag: u8,
}

/// Recover the structure of one decoded phase
pub fn analyze(instructions: &[Instruction]) -> Result<ControlFlow, StructureError> {
    let len = instructions.len();
    let mut targets = BTreeMap::new();

    for inst in instructions {
        let Some(target) = inst.branch_target() else {
            continue;
        };
        if target < 0 || target as usize > len {
            return Err(StructureError::TargetOutOfRange {
                pc: inst.pc,
                target,
                len,
            });
        }
        targets.insert(inst.pc, target as usize);
    }

    let mut builder = Builder {
        instructions,
        targets: &targets,
        arena: NodeArena::new(),
        next_flag: 0,
    };
    let (root, escapes) = builder.build_range(0, len, None)?;
    if let Some(e) = escapes.first() {
        return Err(Builder::irreducible(e.pc, e.target, "early exit leaves the phase"));
    }

    let flow = ControlFlow {
        arena: builder.arena,
        root,
        branch_targets: targets,
    };
    debug!(
        "Recovered {} nodes, {} loops from {} instructions",
        flow.arena.len(),
        flow.loop_count(),
        len
    );
    Ok(flow)
}

impl Builder<'_> {
    fn is_branch(&self, pc: usize) -> bool {
        self.instructions
            .get(pc)
            .map_or(false, |i| i.opcode == Opcode::Br && self.targets.contains_key(&pc))
    }

    fn condition(&self, pc: usize) -> Result<Condition, StructureError> {
        Condition::from_predicate(self.instructions[pc].predicate, pc)
    }

    fn irreducible(pc: usize, target: usize, reason: &'static str) -> StructureError {
        StructureError::Irreducible { pc, target, reason }
    }

    /// Outermost back-edge in `[head, end)` that targets `head`
    fn back_edge(&self, head: usize, end: usize) -> Option<usize> {
        self.targets
            .range(head..end)
            .filter(|(_, &t)| t == head)
            .map(|(&pc, _)| pc)
            .last()
    }

    /// A loop head is only entered through its first instruction
    fn check_dominates(&self, head: usize, latch: usize) -> Result<(), StructureError> {
        for (&pc, &target) in self.targets.iter() {
            let outside = pc < head || pc > latch;
            if outside && target > head && target <= latch {
                return Err(Self::irreducible(pc, target, "edge enters loop body past its head"));
            }
        }
        Ok(())
    }

    fn alloc_flag(&mut self, pc: usize, target: usize) -> Result<u8, StructureError> {
        if self.next_flag >= MAX_EXIT_FLAGS {
            return Err(Self::irreducible(pc, target, "too many early loop exits"));
        }
        let flag = self.next_flag;
        self.next_flag += 1;
        Ok(flag)
    }

    fn flush(&mut self, children: &mut Vec<NodeId>, start: usize, end: usize) {
        if end > start {
            children.push(self.arena.push(Node::Code {
                start,
                len: end - start,
            }));
        }
    }

    fn build_range(
        &mut self,
        start: usize,
        end: usize,
        scope: Option<LoopScope>,
    ) -> Result<(NodeId, Vec<Escape>), StructureError> {
        let mut children = Vec::new();
        let mut escapes = Vec::new();
        let mut run = start;
        let mut pc = start;

        while pc < end {
            let is_own_head = scope.map_or(false, |s| s.head == pc);
            if !is_own_head {
                if let Some(latch) = self.back_edge(pc, end) {
                    self.flush(&mut children, run, pc);
                    let (node, exits) = self.build_loop(pc, latch)?;
                    pc = self.place_loop(&mut children, &mut escapes, node, exits, latch + 1, end, scope)?;
                    run = pc;
                    continue;
                }
            }

            if !self.is_branch(pc) {
                pc += 1;
                continue;
            }

            self.flush(&mut children, run, pc);
            let target = self.targets[&pc];
            let condition = self.condition(pc)?;

            let next = if let Some(node) = self.loop_exit(pc, target, condition, scope, &mut escapes)? {
                children.push(node);
                pc + 1
            } else if target <= pc {
                return Err(Self::irreducible(pc, target, "backward branch is not a loop back-edge"));
            } else if target > end {
                return Err(Self::irreducible(pc, target, "forward branch leaves its enclosing construct"));
            } else {
                let (node, next, exits) = self.build_conditional(pc, target, end, condition, scope)?;
                escapes.extend(exits);
                children.push(node);
                next
            };

            pc = next;
            run = pc;
        }

        self.flush(&mut children, run, end);
        Ok((self.arena.push(Node::Block(children)), escapes))
    }

    /// Append loop `node` to `children` together with the handling of its
    /// early exits. Exits landing in `[exit, end)` clear their flag before the
    /// loop and guard the code they skip; exits landing further out break the
    /// enclosing loop as well and are passed up. Returns the pc after the
    /// guarded code.
    #[allow(clippy::too_many_arguments)]
    fn place_loop(
        &mut self,
        children: &mut Vec<NodeId>,
        escapes: &mut Vec<Escape>,
        node: NodeId,
        exits: Vec<Escape>,
        exit: usize,
        end: usize,
        scope: Option<LoopScope>,
    ) -> Result<usize, StructureError> {
        let (mut local, outer): (Vec<Escape>, Vec<Escape>) = exits.into_iter().partition(|e| e.target <= end);

        for e in &local {
            children.push(self.arena.push(Node::SetFlag {
                index: e.flag,
                value: false,
            }));
        }
        children.push(node);

        for e in &outer {
            match scope {
                Some(s) if e.target > s.latch => {
                    children.push(self.arena.push(Node::Break {
                        condition: Condition::Flag {
                            index: e.flag,
                            negate: false,
                        },
                    }));
                }
                _ => return Err(Self::irreducible(e.pc, e.target, "early exit leaves its enclosing construct")),
            }
        }
        escapes.extend(outer);

        // Nested guards, innermost for the nearest target
        local.sort_by_key(|e| e.target);
        let mut pos = exit;
        let mut guarded = Vec::new();
        for e in local {
            if e.target == exit {
                continue;
            }
            if e.target > pos {
                let (range, exits) = self.build_range(pos, e.target, scope)?;
                escapes.extend(exits);
                guarded.push(range);
                pos = e.target;
            }
            let then_block = self.arena.push(Node::Block(std::mem::take(&mut guarded)));
            guarded.push(self.arena.push(Node::Conditional {
                condition: Condition::Flag {
                    index: e.flag,
                    negate: true,
                },
                then_block,
                else_block: None,
            }));
        }
        children.extend(guarded);
        Ok(pos)
    }

    fn build_loop(&mut self, head: usize, latch: usize) -> Result<(NodeId, Vec<Escape>), StructureError> {
        self.check_dominates(head, latch)?;

        let latch_condition = self.condition(latch)?;
        let scope = LoopScope {
            head,
            latch,
            latch_always: latch_condition == Condition::Always,
        };
        let (body, exits) = self.build_range(head, latch, Some(scope))?;

        // A predicated back-edge leaves the loop when its predicate fails
        if latch_condition != Condition::Always {
            let exit = self.arena.push(Node::Break {
                condition: latch_condition.negate(),
            });
            if let Node::Block(children) = self.arena.get_mut(body) {
                children.push(exit);
            }
        }

        debug!("Loop {}..={}", head, latch);
        Ok((self.arena.push(Node::Loop { body }), exits))
    }

    /// Break or continue for a branch leaving the current loop iteration. A
    /// branch past the loop exit sets an exit flag before breaking.
    fn loop_exit(
        &mut self,
        pc: usize,
        target: usize,
        condition: Condition,
        scope: Option<LoopScope>,
        escapes: &mut Vec<Escape>,
    ) -> Result<Option<NodeId>, StructureError> {
        let Some(scope) = scope else {
            return Ok(None);
        };

        let node = if target == scope.exit() {
            Node::Break { condition }
        } else if target == scope.head || (target == scope.latch && scope.latch_always) {
            Node::Continue { condition }
        } else if target == scope.latch {
            return Err(Self::irreducible(pc, target, "branch to a predicated back-edge"));
        } else if target > scope.exit() {
            let flag = self.alloc_flag(pc, target)?;
            escapes.push(Escape { pc, target, flag });
            let set = self.arena.push(Node::SetFlag {
                index: flag,
                value: true,
            });
            let leave = self.arena.push(Node::Break {
                condition: Condition::Always,
            });
            let then_block = self.arena.push(Node::Block(vec![set, leave]));
            Node::Conditional {
                condition,
                then_block,
                else_block: None,
            }
        } else {
            return Ok(None);
        };
        Ok(Some(self.arena.push(node)))
    }

    /// A forward branch skips `[pc + 1, target)`. When that range ends in an
    /// unconditional forward branch, the range it skips is the else part.
    fn build_conditional(
        &mut self,
        pc: usize,
        target: usize,
        end: usize,
        condition: Condition,
        scope: Option<LoopScope>,
    ) -> Result<(NodeId, usize, Vec<Escape>), StructureError> {
        let mut then_end = target;
        let mut next = target;
        let mut else_range = None;

        if condition != Condition::Always && target > pc + 1 {
            let last = target - 1;
            if self.is_branch(last) && self.condition(last)? == Condition::Always {
                let skip = self.targets[&last];
                if skip > target && skip <= end {
                    then_end = last;
                    next = skip;
                    else_range = Some((target, skip));
                }
            }
        }

        let (then_block, mut escapes) = self.build_range(pc + 1, then_end, scope)?;
        let else_block = match else_range {
            Some((s, e)) => {
                let (block, exits) = self.build_range(s, e, scope)?;
                escapes.extend(exits);
                Some(block)
            }
            None => None,
        };

        // The body runs when the skip is not taken
        let node = self.arena.push(Node::Conditional {
            condition: condition.negate(),
            then_block,
            else_block,
        });
        Ok((node, next, escapes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Extra;

    fn alu(pc: usize) -> Instruction {
        Instruction::new(pc, 0, Opcode::Vmov)
    }

    fn br(pc: usize, offset: i32, predicate: ExtPredicate) -> Instruction {
        let mut inst = Instruction::new(pc, 0, Opcode::Br);
        inst.predicate = predicate;
        inst.extra = Extra::Branch {
            offset,
            absolute: false,
        };
        inst
    }

    fn program(layout: &[Option<(i32, ExtPredicate)>]) -> Vec<Instruction> {
        layout
            .iter()
            .enumerate()
            .map(|(pc, b)| match b {
                Some((offset, pred)) => br(pc, *offset, *pred),
                None => alu(pc),
            })
            .collect()
    }

    fn non_branch_pcs(insts: &[Instruction]) -> Vec<usize> {
        insts.iter().filter(|i| i.opcode != Opcode::Br).map(|i| i.pc).collect()
    }

    #[test]
    fn test_straight_line() {
        let insts = program(&[None, None, None]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 0);
        assert_eq!(flow.flatten(), vec![0, 1, 2]);
        assert_eq!(
            flow.arena.get(flow.root),
            &Node::Block(vec![NodeId(0)])
        );
    }

    #[test]
    fn test_predicated_skip_is_negated_conditional() {
        // 0: p0 br +3 ; 1, 2 skipped when p0 ; 3 joins
        let insts = program(&[Some((3, ExtPredicate::P0)), None, None, None]);
        let flow = analyze(&insts).unwrap();

        let Node::Block(children) = flow.arena.get(flow.root) else {
            panic!("root is a block");
        };
        let Node::Conditional { condition, else_block, .. } = flow.arena.get(children[0]) else {
            panic!("expected conditional");
        };
        assert_eq!(
            *condition,
            Condition::Predicate {
                register: 0,
                negate: true
            }
        );
        assert!(else_block.is_none());
        assert_eq!(flow.flatten(), vec![1, 2, 3]);
    }

    #[test]
    fn test_if_else() {
        // 0: !p1 br +3 ; 1 then ; 2: br +2 ; 3 else ; 4 join
        let insts = program(&[
            Some((3, ExtPredicate::NegP1)),
            None,
            Some((2, ExtPredicate::None)),
            None,
            None,
        ]);
        let flow = analyze(&insts).unwrap();
        let Node::Block(children) = flow.arena.get(flow.root) else {
            panic!("root is a block");
        };
        let Node::Conditional {
            condition,
            else_block: Some(_),
            ..
        } = flow.arena.get(children[0])
        else {
            panic!("expected if/else");
        };
        assert_eq!(
            *condition,
            Condition::Predicate {
                register: 1,
                negate: false
            }
        );
        assert_eq!(flow.flatten(), non_branch_pcs(&insts));
    }

    #[test]
    fn test_unconditional_skip_is_dead_code() {
        let insts = program(&[Some((2, ExtPredicate::None)), None, None]);
        let flow = analyze(&insts).unwrap();
        let Node::Block(children) = flow.arena.get(flow.root) else {
            panic!("root is a block");
        };
        assert!(matches!(
            flow.arena.get(children[0]),
            Node::Conditional {
                condition: Condition::Never,
                ..
            }
        ));
    }

    #[test]
    fn test_loop_with_break() {
        // 0 ; 1 head ; 2: p0 br +3 (exit at 5) ; 3 ; 4: br -3 (to 1) ; 5
        let insts = program(&[
            None,
            None,
            Some((3, ExtPredicate::P0)),
            None,
            Some((-3, ExtPredicate::None)),
            None,
        ]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 1);
        assert_eq!(
            flow.arena
                .iter()
                .filter(|n| matches!(n, Node::Break { .. }))
                .count(),
            1
        );
        assert!(flow.arena.iter().any(|n| matches!(
            n,
            Node::Break {
                condition: Condition::Predicate {
                    register: 0,
                    negate: false
                }
            }
        )));
        assert_eq!(flow.flatten(), vec![0, 1, 3, 5]);
        assert_eq!(flow.branch_targets.get(&4), Some(&1));
    }

    /// Instructions under the guard of exit flag `index`
    fn guarded_by(flow: &ControlFlow, index: u8) -> Vec<usize> {
        let mut out = Vec::new();
        for node in flow.arena.iter() {
            if let Node::Conditional {
                condition: Condition::Flag { index: f, negate: true },
                then_block,
                ..
            } = node
            {
                if *f == index {
                    flow.flatten_into(*then_block, &mut out);
                }
            }
        }
        out
    }

    fn has_set_flag(flow: &ControlFlow, index: u8, value: bool) -> bool {
        flow.arena
            .iter()
            .any(|n| *n == Node::SetFlag { index, value })
    }

    #[test]
    fn test_exit_past_loop_end_guards_skipped_code() {
        // 0 head ; 1: p0 br +4 (to 5) ; 2 ; 3: br -3 ; 4 skipped on exit ; 5
        let insts = program(&[
            None,
            Some((4, ExtPredicate::P0)),
            None,
            Some((-3, ExtPredicate::None)),
            None,
            None,
        ]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 1);
        assert!(has_set_flag(&flow, 0, true));
        assert!(has_set_flag(&flow, 0, false));
        assert!(flow.arena.iter().any(|n| *n
            == Node::Break {
                condition: Condition::Always
            }));
        assert_eq!(guarded_by(&flow, 0), vec![4]);
        assert_eq!(flow.flatten(), non_branch_pcs(&insts));

        let text = flow.render();
        assert!(text.contains("if p0"));
        assert!(text.contains("f0 = true"));
        assert!(text.contains("if !f0"));
    }

    #[test]
    fn test_exit_to_end_of_phase() {
        // 0 head ; 1: p0 br +5 (to 6, the end) ; 2 ; 3: br -3 ; 4 ; 5
        let insts = program(&[
            None,
            Some((5, ExtPredicate::P0)),
            None,
            Some((-3, ExtPredicate::None)),
            None,
            None,
        ]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 1);
        assert_eq!(guarded_by(&flow, 0), vec![4, 5]);
        assert_eq!(flow.flatten(), non_branch_pcs(&insts));
    }

    #[test]
    fn test_nested_exit_past_outer_loop() {
        // 0 outer head ; 1 inner head ; 2: p0 br +6 (to 8) ; 3 ; 4: br -3 ;
        // 5 ; 6: br -6 ; 7 skipped on exit ; 8
        let insts = program(&[
            None,
            None,
            Some((6, ExtPredicate::P0)),
            None,
            Some((-3, ExtPredicate::None)),
            None,
            Some((-6, ExtPredicate::None)),
            None,
            None,
        ]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 2);
        // the inner break is repeated in the outer body
        assert!(flow.arena.iter().any(|n| *n
            == Node::Break {
                condition: Condition::Flag {
                    index: 0,
                    negate: false
                }
            }));
        assert_eq!(guarded_by(&flow, 0), vec![7]);
        assert_eq!(flow.flatten(), non_branch_pcs(&insts));
    }

    #[test]
    fn test_nested_exit_inside_outer_body() {
        // 0 outer head ; 1 inner head ; 2: p0 br +4 (to 6) ; 3: br -2 ;
        // 4 ; 5 ; 6 ; 7: br -7
        let insts = program(&[
            None,
            None,
            Some((4, ExtPredicate::P0)),
            Some((-2, ExtPredicate::None)),
            None,
            None,
            None,
            Some((-7, ExtPredicate::None)),
        ]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 2);
        assert!(!flow
            .arena
            .iter()
            .any(|n| matches!(n, Node::Break { condition: Condition::Flag { .. } })));
        assert_eq!(guarded_by(&flow, 0), vec![4, 5]);
        assert_eq!(flow.flatten(), non_branch_pcs(&insts));
    }

    #[test]
    fn test_exits_share_nested_guards() {
        // 0 head ; 1: p0 br +5 (to 6) ; 2: p1 br +3 (to 5) ; 3: br -3 ; 4 ; 5 ; 6
        let insts = program(&[
            None,
            Some((5, ExtPredicate::P0)),
            Some((3, ExtPredicate::P1)),
            Some((-3, ExtPredicate::None)),
            None,
            None,
            None,
        ]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(guarded_by(&flow, 1), vec![4]);
        assert_eq!(guarded_by(&flow, 0), vec![4, 5]);
        assert_eq!(flow.flatten(), non_branch_pcs(&insts));
    }

    #[test]
    fn test_exit_out_of_conditional_is_irreducible() {
        // 0: p1 br +6 (to 6) ; 1 head ; 2: p0 br +5 (to 7) ; 3: br -2 ; 4 ; 5 ; 6 ; 7
        let insts = program(&[
            Some((6, ExtPredicate::P1)),
            None,
            Some((5, ExtPredicate::P0)),
            Some((-2, ExtPredicate::None)),
            None,
            None,
            None,
            None,
        ]);
        assert!(matches!(
            analyze(&insts),
            Err(StructureError::Irreducible { pc: 2, target: 7, .. })
        ));
    }

    #[test]
    fn test_predicated_back_edge_appends_exit() {
        // 0 ; 1: p2 br -1
        let insts = program(&[None, Some((-1, ExtPredicate::P2))]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 1);
        assert!(flow.arena.iter().any(|n| matches!(
            n,
            Node::Break {
                condition: Condition::Predicate {
                    register: 2,
                    negate: true
                }
            }
        )));
    }

    #[test]
    fn test_continue_to_head() {
        // 0 head ; 1: p0 br -1 ; 2 ; 3: br -3
        let insts = program(&[
            None,
            Some((-1, ExtPredicate::P0)),
            None,
            Some((-3, ExtPredicate::None)),
        ]);
        let flow = analyze(&insts).unwrap();
        assert_eq!(flow.loop_count(), 1);
        assert!(flow.arena.iter().any(|n| matches!(n, Node::Continue { .. })));
    }

    #[test]
    fn test_target_out_of_range() {
        let insts = program(&[Some((10, ExtPredicate::None)), None]);
        assert!(matches!(
            analyze(&insts),
            Err(StructureError::TargetOutOfRange { pc: 0, target: 10, .. })
        ));
    }

    #[test]
    fn test_overlapping_ranges_are_irreducible() {
        // 0: p0 br +3 (to 3) ; 1: p1 br +3 (to 4) ; 2 ; 3 ; 4
        let insts = program(&[
            Some((3, ExtPredicate::P0)),
            Some((3, ExtPredicate::P1)),
            None,
            None,
            None,
        ]);
        assert!(matches!(analyze(&insts), Err(StructureError::Irreducible { .. })));
    }

    #[test]
    fn test_jump_into_loop_is_irreducible() {
        // 0: p0 br +2 (into body) ; 1 head ; 2 ; 3: br -2
        let insts = program(&[
            Some((2, ExtPredicate::P0)),
            None,
            None,
            Some((-2, ExtPredicate::None)),
        ]);
        assert!(matches!(analyze(&insts), Err(StructureError::Irreducible { .. })));
    }

    #[test]
    fn test_per_lane_predicate_unsupported() {
        let insts = program(&[Some((2, ExtPredicate::Pn)), None, None]);
        assert_eq!(
            analyze(&insts),
            Err(StructureError::UnsupportedCondition { pc: 0 })
        );
    }

    #[test]
    fn test_render() {
        let insts = program(&[Some((2, ExtPredicate::P0)), None, None]);
        let text = analyze(&insts).unwrap().render();
        assert!(text.contains("if !p0"));
        assert!(text.contains("code 1..2"));
    }
}
