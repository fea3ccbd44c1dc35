//! Swizzle field tables
//!
//! Every table used by the decoder lives here together with the matching
//! encoder, so a decoded field can be turned back into its raw bits.

use crate::types::{Swizzle4, SwizzleChannel, SWIZZLE_UNDEFINED};

use SwizzleChannel::{Half as H, One as C1, Two as C2, Undefined as U, Zero as C0, W, X, Y, Z};

/// Vector width selector of the 4-bit swizzle fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwizzleKind {
    Scalar,
    Vec3,
    Vec4,
}

pub const VEC4_STD: [Swizzle4; 16] = [
    [X, X, X, X],
    [Y, Y, Y, Y],
    [Z, Z, Z, Z],
    [W, W, W, W],
    [X, Y, Z, W],
    [Y, Z, W, W],
    [X, Y, Z, Z],
    [X, X, Y, Z],
    [X, Y, X, Y],
    [X, Y, W, Z],
    [Z, X, Y, W],
    [Z, W, Z, W],
    [Y, Z, X, Z],
    [X, X, Y, Y],
    [X, Z, W, W],
    [X, Y, Z, C1],
];

pub const VEC4_EXT: [Swizzle4; 16] = [
    [Y, Z, X, W],
    [Z, W, X, Y],
    [X, Z, W, Y],
    [Y, Y, W, W],
    [W, Y, Z, W],
    [W, Z, W, Z],
    [X, Y, Z, X],
    [Z, Z, W, W],
    [X, W, Z, X],
    [Y, Y, Y, X],
    [Y, Y, Y, Z],
    [X, Z, Y, W],
    [X, X, X, Y],
    [Z, Y, X, W],
    [Y, Y, Z, Z],
    [Z, Z, Z, Y],
];

pub const VEC3_STD: [[SwizzleChannel; 3]; 16] = [
    [X, X, X],
    [Y, Y, Y],
    [Z, Z, Z],
    [W, W, W],
    [X, Y, Z],
    [Y, Z, W],
    [X, X, Y],
    [X, Y, X],
    [Y, Y, X],
    [Y, Y, Z],
    [Z, X, Y],
    [X, Z, Y],
    [Y, Z, X],
    [Z, Y, X],
    [Z, Z, Y],
    [X, Y, C1],
];

pub const VEC3_EXT: [[SwizzleChannel; 3]; 16] = [
    [X, Y, Y],
    [Y, X, Y],
    [X, X, Z],
    [Y, X, X],
    [X, Y, C0],
    [X, C1, C0],
    [C0, C0, C0],
    [C1, C1, C1],
    [H, H, H],
    [C2, C2, C2],
    [X, C0, C0],
    [U, U, U],
    [U, U, U],
    [U, U, U],
    [U, U, U],
    [U, U, U],
];

pub const SCALAR_STD: [Swizzle4; 8] = [
    [X, X, X, X],
    [Y, Y, Y, Y],
    [Z, Z, Z, Z],
    [W, W, W, W],
    [C0, C0, C0, C0],
    [C1, C1, C1, C1],
    [C2, C2, C2, C2],
    [H, H, H, H],
];

/// Source tables of the alternative multiply-add layout, selected by a
/// 3-bit field
pub const VMAD2_SRC0: [Swizzle4; 8] = [
    [X, X, X, X],
    [Y, Y, Y, Y],
    [Z, Z, Z, Z],
    [W, W, W, W],
    [X, Y, Z, W],
    [Y, Z, X, W],
    [X, Y, W, W],
    [Z, W, X, Y],
];

pub const VMAD2_SRC1: [Swizzle4; 8] = [
    [X, X, X, X],
    [Y, Y, Y, Y],
    [Z, Z, Z, Z],
    [W, W, W, W],
    [X, Y, Z, W],
    [X, Y, Y, Z],
    [Y, Y, W, W],
    [W, Y, Z, W],
];

pub const VMAD2_SRC2: [Swizzle4; 8] = [
    [X, X, X, X],
    [Y, Y, Y, Y],
    [Z, Z, Z, Z],
    [W, W, W, W],
    [X, Y, Z, W],
    [X, Z, W, W],
    [X, X, Y, Z],
    [X, Y, Z, Z],
];

/// Pad a three channel swizzle, the fourth lane reads X
pub fn to_swizzle4(s: [SwizzleChannel; 3]) -> Swizzle4 {
    [s[0], s[1], s[2], X]
}

/// Decode a 4-bit vector swizzle field
pub fn decode_vec34(swizzle: u8, extended: bool, kind: SwizzleKind) -> Swizzle4 {
    let index = (swizzle & 0xF) as usize;
    match kind {
        SwizzleKind::Scalar => {
            if extended {
                SWIZZLE_UNDEFINED
            } else {
                SCALAR_STD.get(index).copied().unwrap_or(SWIZZLE_UNDEFINED)
            }
        }
        SwizzleKind::Vec3 => {
            if extended {
                to_swizzle4(VEC3_EXT[index])
            } else {
                to_swizzle4(VEC3_STD[index])
            }
        }
        SwizzleKind::Vec4 => {
            if extended {
                VEC4_EXT[index]
            } else {
                VEC4_STD[index]
            }
        }
    }
}

/// Decode a 12-bit swizzle with three bits per channel, X in the low bits
pub fn decode_swizzle4(encoded: u32) -> Swizzle4 {
    [
        SwizzleChannel::from((encoded & 0x7) as u8),
        SwizzleChannel::from(((encoded >> 3) & 0x7) as u8),
        SwizzleChannel::from(((encoded >> 6) & 0x7) as u8),
        SwizzleChannel::from(((encoded >> 9) & 0x7) as u8),
    ]
}

/// Inverse of [`decode_swizzle4`]
pub fn encode_swizzle4(swizzle: &Swizzle4) -> Option<u32> {
    let mut encoded = 0;
    for (i, ch) in swizzle.iter().enumerate() {
        let bits = *ch as u32;
        if bits > 7 {
            return None;
        }
        encoded |= bits << (i * 3);
    }
    Some(encoded)
}

/// Inverse of [`decode_vec34`]: the field value and extension bit, preferring
/// the standard table when both contain the swizzle.
pub fn encode_vec34(swizzle: &Swizzle4, kind: SwizzleKind) -> Option<(u8, bool)> {
    match kind {
        SwizzleKind::Scalar => SCALAR_STD
            .iter()
            .position(|s| s == swizzle)
            .map(|i| (i as u8, false)),
        SwizzleKind::Vec3 => {
            let head = [swizzle[0], swizzle[1], swizzle[2]];
            if swizzle[3] != X || head.contains(&U) {
                return None;
            }
            VEC3_STD
                .iter()
                .position(|s| *s == head)
                .map(|i| (i as u8, false))
                .or_else(|| {
                    VEC3_EXT
                        .iter()
                        .position(|s| *s == head)
                        .map(|i| (i as u8, true))
                })
        }
        SwizzleKind::Vec4 => VEC4_STD
            .iter()
            .position(|s| s == swizzle)
            .map(|i| (i as u8, false))
            .or_else(|| {
                VEC4_EXT
                    .iter()
                    .position(|s| s == swizzle)
                    .map(|i| (i as u8, true))
            }),
    }
}

/// Inverse lookup in one of the 3-bit tables
pub fn encode_table(table: &[Swizzle4], swizzle: &Swizzle4) -> Option<u8> {
    table.iter().position(|s| s == swizzle).map(|i| i as u8)
}

/// Textual form used by the disassembler, e.g. `xyzw`
pub fn swizzle_to_string(swizzle: &Swizzle4) -> String {
    swizzle.iter().map(|c| c.as_char()).collect()
}
