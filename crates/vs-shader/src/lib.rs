//! USSE/GXP shader translation for vita-shade
//!
//! Takes compiled PS Vita shader binaries, decodes their USSE instruction
//! streams, recovers structured control flow and emits GLSL or SPIR-V.

pub mod backend;
pub mod binding;
pub mod cache;
pub mod compare;
pub mod decoder;
pub mod disasm;
pub mod gxp;
pub mod operand;
pub mod recompiler;
pub mod swizzle;
pub mod translator;
pub mod types;

pub use backend::{Backend, GlslBackend, SpirvBackend, TranslatedShader};
pub use binding::{bind, AttributeReflector, BindingPlan, HintAttribute};
pub use cache::ShaderCache;
pub use gxp::{Program, ProgramBuilder};
pub use translator::{MemoryReader, TranslateOptions, Translation, Translator};
