//! Comparison selection shared by the backends
//!
//! VTST, VTSTMSK and the conditional moves all reduce to one of the
//! operators below. Both backends take their operator from this table, so a
//! comparison lowers the same way to GLSL and SPIR-V.

use crate::backend::ScalarKind;
use crate::types::{CompareMethod, CompareMode};

/// Relational operator applied lane-wise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    /// Passes for every input
    Always,
}

/// Operator table indexed by `[inclusive][sign_test]`. Sign test 3 only
/// defines the all-lanes reduction, which is true for every lane, so it is
/// `Always` per lane.
const TEST_TABLE: [[CompareOp; 4]; 2] = [
    [
        CompareOp::NotEqual,
        CompareOp::Less,
        CompareOp::Greater,
        CompareOp::Always,
    ],
    [
        CompareOp::Equal,
        CompareOp::LessEqual,
        CompareOp::GreaterEqual,
        CompareOp::Always,
    ],
];

// SPIR-V comparison opcodes
const OP_LOGICAL_EQUAL: u16 = 164;
const OP_LOGICAL_NOT_EQUAL: u16 = 165;
const OP_IEQUAL: u16 = 170;
const OP_INOT_EQUAL: u16 = 171;
const OP_UGREATER_THAN: u16 = 172;
const OP_SGREATER_THAN: u16 = 173;
const OP_UGREATER_THAN_EQUAL: u16 = 174;
const OP_SGREATER_THAN_EQUAL: u16 = 175;
const OP_ULESS_THAN: u16 = 176;
const OP_SLESS_THAN: u16 = 177;
const OP_ULESS_THAN_EQUAL: u16 = 178;
const OP_SLESS_THAN_EQUAL: u16 = 179;
const OP_FORD_EQUAL: u16 = 180;
const OP_FORD_NOT_EQUAL: u16 = 182;
const OP_FORD_LESS_THAN: u16 = 184;
const OP_FORD_GREATER_THAN: u16 = 186;
const OP_FORD_LESS_THAN_EQUAL: u16 = 188;
const OP_FORD_GREATER_THAN_EQUAL: u16 = 190;

impl CompareOp {
    /// Operator of a test instruction. `inclusive` is the zero-test field
    /// selecting the variant that passes on equality.
    pub fn select(mode: CompareMode, inclusive: bool) -> Self {
        let sign_test = match mode {
            CompareMode::NotEqual => 0,
            CompareMode::LessThan => 1,
            CompareMode::GreaterThan => 2,
            CompareMode::AllLanes => 3,
        };
        TEST_TABLE[inclusive as usize][sign_test]
    }

    /// Operator a conditional move applies to its src0 lane against zero
    pub fn from_method(method: CompareMethod) -> Self {
        match method {
            CompareMethod::NeZero => Self::NotEqual,
            CompareMethod::EqZero => Self::Equal,
            CompareMethod::LtZero => Self::Less,
            CompareMethod::LteZero => Self::LessEqual,
        }
    }

    /// GLSL binary operator, `None` for [`CompareOp::Always`]
    pub fn glsl_operator(self) -> Option<&'static str> {
        match self {
            Self::Equal => Some("=="),
            Self::NotEqual => Some("!="),
            Self::Less => Some("<"),
            Self::LessEqual => Some("<="),
            Self::Greater => Some(">"),
            Self::GreaterEqual => Some(">="),
            Self::Always => None,
        }
    }

    /// SPIR-V opcode for operands of `kind`. Floats use the ordered forms,
    /// so a NaN operand fails every test. `None` for [`CompareOp::Always`]
    /// and for orderings of booleans.
    pub fn spirv_opcode(self, kind: ScalarKind) -> Option<u16> {
        let op = match (kind, self) {
            (_, Self::Always) => return None,
            (ScalarKind::Float, Self::Equal) => OP_FORD_EQUAL,
            (ScalarKind::Float, Self::NotEqual) => OP_FORD_NOT_EQUAL,
            (ScalarKind::Float, Self::Less) => OP_FORD_LESS_THAN,
            (ScalarKind::Float, Self::LessEqual) => OP_FORD_LESS_THAN_EQUAL,
            (ScalarKind::Float, Self::Greater) => OP_FORD_GREATER_THAN,
            (ScalarKind::Float, Self::GreaterEqual) => OP_FORD_GREATER_THAN_EQUAL,
            (ScalarKind::Int | ScalarKind::Uint, Self::Equal) => OP_IEQUAL,
            (ScalarKind::Int | ScalarKind::Uint, Self::NotEqual) => OP_INOT_EQUAL,
            (ScalarKind::Int, Self::Less) => OP_SLESS_THAN,
            (ScalarKind::Int, Self::LessEqual) => OP_SLESS_THAN_EQUAL,
            (ScalarKind::Int, Self::Greater) => OP_SGREATER_THAN,
            (ScalarKind::Int, Self::GreaterEqual) => OP_SGREATER_THAN_EQUAL,
            (ScalarKind::Uint, Self::Less) => OP_ULESS_THAN,
            (ScalarKind::Uint, Self::LessEqual) => OP_ULESS_THAN_EQUAL,
            (ScalarKind::Uint, Self::Greater) => OP_UGREATER_THAN,
            (ScalarKind::Uint, Self::GreaterEqual) => OP_UGREATER_THAN_EQUAL,
            (ScalarKind::Bool, Self::Equal) => OP_LOGICAL_EQUAL,
            (ScalarKind::Bool, Self::NotEqual) => OP_LOGICAL_NOT_EQUAL,
            (ScalarKind::Bool, _) => return None,
        };
        Some(op)
    }

    /// Reference evaluation. Unordered operands (NaN) fail every operator
    /// except [`CompareOp::Always`].
    pub fn evaluate<T: PartialOrd>(self, a: T, b: T) -> bool {
        use std::cmp::Ordering;

        if self == Self::Always {
            return true;
        }
        let Some(ord) = a.partial_cmp(&b) else {
            return false;
        };
        match self {
            Self::Equal => ord == Ordering::Equal,
            Self::NotEqual => ord != Ordering::Equal,
            Self::Less => ord == Ordering::Less,
            Self::LessEqual => ord != Ordering::Greater,
            Self::Greater => ord == Ordering::Greater,
            Self::GreaterEqual => ord != Ordering::Less,
            Self::Always => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [CompareMode; 4] = [
        CompareMode::NotEqual,
        CompareMode::LessThan,
        CompareMode::GreaterThan,
        CompareMode::AllLanes,
    ];

    #[test]
    fn test_select_table() {
        assert_eq!(CompareOp::select(CompareMode::NotEqual, false), CompareOp::NotEqual);
        assert_eq!(CompareOp::select(CompareMode::NotEqual, true), CompareOp::Equal);
        assert_eq!(CompareOp::select(CompareMode::LessThan, true), CompareOp::LessEqual);
        assert_eq!(CompareOp::select(CompareMode::GreaterThan, false), CompareOp::Greater);
        assert_eq!(CompareOp::select(CompareMode::AllLanes, false), CompareOp::Always);
        assert_eq!(CompareOp::select(CompareMode::AllLanes, true), CompareOp::Always);
    }

    #[test]
    fn test_inclusive_differs_only_on_equality() {
        for mode in MODES {
            let excl = CompareOp::select(mode, false);
            let incl = CompareOp::select(mode, true);
            for (a, b) in [(1.0f32, 2.0), (2.0, 1.0), (-3.0, 4.5)] {
                if mode == CompareMode::NotEqual {
                    assert_ne!(excl.evaluate(a, b), incl.evaluate(a, b));
                } else {
                    assert_eq!(excl.evaluate(a, b), incl.evaluate(a, b), "{:?}", mode);
                }
            }
            if mode == CompareMode::AllLanes {
                assert!(excl.evaluate(0.0f32, 0.0) && incl.evaluate(0.0f32, 0.0));
            } else {
                assert!(!excl.evaluate(0.0f32, 0.0));
                assert!(incl.evaluate(0.0f32, 0.0));
            }
        }
    }

    #[test]
    fn test_nan_fails_ordered() {
        for mode in MODES {
            for inclusive in [false, true] {
                let op = CompareOp::select(mode, inclusive);
                assert_eq!(op.evaluate(f32::NAN, 0.0), op == CompareOp::Always);
            }
        }
    }

    #[test]
    fn test_integer_kinds() {
        assert!(CompareOp::Less.evaluate(-1i32, 0));
        assert!(!CompareOp::Less.evaluate(u32::MAX, 0));
        assert_eq!(CompareOp::Less.spirv_opcode(ScalarKind::Int), Some(OP_SLESS_THAN));
        assert_eq!(CompareOp::Less.spirv_opcode(ScalarKind::Uint), Some(OP_ULESS_THAN));
        assert_eq!(CompareOp::Less.spirv_opcode(ScalarKind::Float), Some(OP_FORD_LESS_THAN));
        assert_eq!(CompareOp::Less.spirv_opcode(ScalarKind::Bool), None);
        assert_eq!(CompareOp::Always.spirv_opcode(ScalarKind::Float), None);
    }

    #[test]
    fn test_move_methods() {
        assert_eq!(CompareOp::from_method(CompareMethod::LteZero), CompareOp::LessEqual);
        assert!(CompareOp::from_method(CompareMethod::EqZero).evaluate(0.0f32, 0.0));
        assert!(CompareOp::from_method(CompareMethod::NeZero).evaluate(2u32, 0));
    }

    #[test]
    fn test_every_operator_has_both_forms() {
        for mode in MODES {
            for inclusive in [false, true] {
                let op = CompareOp::select(mode, inclusive);
                assert_eq!(op.glsl_operator().is_some(), op.spirv_opcode(ScalarKind::Float).is_some());
            }
        }
    }
}
