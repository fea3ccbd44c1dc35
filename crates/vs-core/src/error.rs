//! Error types for the vita-shade translator

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for a translation request
#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("Cache error: {0}")]
    CacheIo(#[from] CacheIoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Malformed GXP header or parameter table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContainerError {
    #[error("Truncated program: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Bad magic: 0x{0:08x}")]
    BadMagic(u32),

    #[error("Parameter {index} has out-of-range offset {offset}")]
    BadParameterOffset { index: usize, offset: i64 },

    #[error("Section {section} has out-of-range offset 0x{offset:x}")]
    BadSectionOffset { section: &'static str, offset: u64 },

    #[error("Parameter {index} has an unterminated or non UTF-8 name")]
    BadName { index: usize },
}

/// Instruction-level decode failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid opcode at pc {pc}: 0x{word:016x}")]
    InvalidOpcode { pc: usize, word: u64 },

    #[error("Reserved {field} value {value} at pc {pc}")]
    Reserved { pc: usize, field: &'static str, value: u32 },

    #[error("Operand {bank}{index} exceeds bank limit {limit}")]
    OperandOutOfRange {
        bank: &'static str,
        index: u32,
        limit: u32,
        destination: bool,
    },

    #[error("Unsupported coercion from {from} to {to}")]
    UnsupportedCoercion { from: &'static str, to: &'static str },

    #[error("Unsupported texture sample mode {0}")]
    UnsupportedSampleMode(u8),

    #[error("Unimplemented instruction {opcode} at pc {pc}")]
    Unimplemented { pc: usize, opcode: &'static str },

    #[error("Encoding mismatch for {opcode} at pc {pc}")]
    TierMismatch { pc: usize, opcode: &'static str },

    #[error("No sampler bound at SA offset {0}")]
    MissingSampler(u32),
}

impl DecodeError {
    /// Whether the failing instruction can be skipped while the rest of the
    /// shader is still translated.
    pub fn is_contained(&self) -> bool {
        match self {
            Self::InvalidOpcode { .. }
            | Self::Reserved { .. }
            | Self::Unimplemented { .. }
            | Self::TierMismatch { .. }
            | Self::MissingSampler(_) => true,
            Self::OperandOutOfRange { destination, .. } => !destination,
            Self::UnsupportedCoercion { .. } | Self::UnsupportedSampleMode(_) => false,
        }
    }
}

/// Control flow that cannot be expressed as structured nodes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructureError {
    #[error("Irreducible branch at pc {pc} to {target}: {reason}")]
    Irreducible {
        pc: usize,
        target: usize,
        reason: &'static str,
    },

    #[error("Branch at pc {pc} targets {target}, outside phase of {len} instructions")]
    TargetOutOfRange { pc: usize, target: i64, len: usize },

    #[error("Unsupported branch condition at pc {pc}")]
    UnsupportedCondition { pc: usize },
}

/// Persisted cache failures, never fatal
#[derive(Error, Debug)]
pub enum CacheIoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt manifest {path:?}: {reason}")]
    CorruptManifest { path: PathBuf, reason: String },

    #[error("Corrupt artifact {0:?}")]
    CorruptArtifact(PathBuf),
}

/// Result type alias for translator operations
pub type Result<T> = std::result::Result<T, TranslatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ContainerError::BadMagic(0x12345678);
        assert_eq!(format!("{}", err), "Bad magic: 0x12345678");

        let err = DecodeError::InvalidOpcode {
            pc: 3,
            word: 0xDEAD_BEEF,
        };
        assert_eq!(
            format!("{}", err),
            "Invalid opcode at pc 3: 0x00000000deadbeef"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err = StructureError::UnsupportedCondition { pc: 0 };
        let top: TranslatorError = err.into();
        assert!(matches!(top, TranslatorError::Structure(_)));
    }

    #[test]
    fn test_decode_error_containment() {
        assert!(DecodeError::Unimplemented { pc: 0, opcode: "VDUAL" }.is_contained());
        assert!(!DecodeError::UnsupportedSampleMode(7).is_contained());

        let dest = DecodeError::OperandOutOfRange {
            bank: "r",
            index: 300,
            limit: 256,
            destination: true,
        };
        assert!(!dest.is_contained());

        let src = DecodeError::OperandOutOfRange {
            bank: "r",
            index: 300,
            limit: 256,
            destination: false,
        };
        assert!(src.is_contained());
    }
}
