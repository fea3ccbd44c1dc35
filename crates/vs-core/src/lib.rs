//! Core support for the vita-shade translator
//!
//! This crate provides the error taxonomy, configuration, and logging
//! infrastructure shared by the translator and its front end.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, FeatureState, LogLevel, ShaderBackend, CACHE_FORMAT_VERSION};
pub use error::{
    CacheIoError, ContainerError, DecodeError, Result, StructureError, TranslatorError,
};
