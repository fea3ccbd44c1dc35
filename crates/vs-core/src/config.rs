//! Configuration system for the vita-shade translator

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Version tag written next to every cached artifact. Bump whenever generated
/// code changes shape.
pub const CACHE_FORMAT_VERSION: u32 = 3;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub translator: TranslatorConfig,
    pub features: FeatureState,
    pub cache: CacheConfig,
    pub debug: DebugConfig,
}

/// Translation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub backend: ShaderBackend,
    /// Substitute a placeholder shader instead of failing the request
    pub placeholder_on_failure: bool,
    /// Use renderer-supplied attribute hints when reflection is stripped
    pub use_hint_attributes: bool,
}

/// Target representation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
pub enum ShaderBackend {
    Glsl,
    #[default]
    Spirv,
}

impl ShaderBackend {
    /// File extension used for cached artifacts
    pub fn extension(self) -> &'static str {
        match self {
            Self::Glsl => "glsl",
            Self::Spirv => "spv",
        }
    }
}

/// Host GPU capabilities the generated code may rely on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct FeatureState {
    /// Native color programs read and write the color attachment as a
    /// storage image inside an interlocked section
    pub support_shader_interlock: bool,
    /// Framebuffer fetch is available for native color programs
    pub direct_fragcolor: bool,
    /// Also write the raw bits of a half precision color output
    pub preserve_f16_nan: bool,
    /// Discard fragments masked out by the mask surface
    pub use_mask: bool,
}

/// Persisted cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub version: u32,
    /// Write the source blob and disassembly next to cached code
    pub dump_side_files: bool,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_disassembly: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

// Default implementations

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            backend: ShaderBackend::default(),
            placeholder_on_failure: true,
            use_hint_attributes: true,
        }
    }
}

impl Default for FeatureState {
    fn default() -> Self {
        Self {
            support_shader_interlock: false,
            direct_fragcolor: false,
            preserve_f16_nan: false,
            use_mask: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let base = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vita-shade");

        Self {
            enabled: true,
            path: base.join("shaders"),
            version: CACHE_FORMAT_VERSION,
            dump_side_files: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_disassembly: false,
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path without creating it
    pub fn load_from(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vita-shade")
            .join("config.toml")
    }
}
