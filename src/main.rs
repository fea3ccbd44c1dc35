//! vita-shade - GXP shader translator
//!
//! Command line front end: translate shader binaries to GLSL or SPIR-V,
//! print their disassembly or dump their reflection data.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam::channel;
use std::fs;
use std::path::{Path, PathBuf};
use vs_core::{logging, Config, LogLevel, ShaderBackend};
use vs_shader::binding::bind;
use vs_shader::translator::disassemble_program;
use vs_shader::{Program, ShaderCache, TranslateOptions, Translator};

#[derive(Debug, Parser)]
#[command(name = "vita-shade", version, about = "GXP/USSE shader translator")]
struct Cli {
    /// Log level, overrides the configuration file
    #[arg(long, global = true, value_enum)]
    log: Option<CliLogLevel>,

    /// Configuration file to use instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Translate one or more GXP files
    Translate(TranslateArgs),
    /// Print the disassembly of a GXP file
    Disasm {
        file: PathBuf,
    },
    /// Print the header, parameters and bindings of a GXP file as JSON
    Info {
        file: PathBuf,
    },
}

#[derive(Debug, Args)]
struct TranslateArgs {
    files: Vec<PathBuf>,

    #[arg(long, short, value_enum)]
    backend: Option<CliBackend>,

    /// Output directory, defaults to the directory of each input
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Cache directory identity; disables the cache when absent
    #[arg(long)]
    cache_identity: Option<String>,

    /// Worker threads
    #[arg(long, short, default_value_t = 1)]
    jobs: usize,

    #[arg(long)]
    interlock: bool,

    #[arg(long)]
    framebuffer_fetch: bool,

    #[arg(long)]
    preserve_f16_nan: bool,

    #[arg(long)]
    use_mask: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliBackend {
    Glsl,
    Spirv,
}

impl From<CliBackend> for ShaderBackend {
    fn from(b: CliBackend) -> Self {
        match b {
            CliBackend::Glsl => ShaderBackend::Glsl,
            CliBackend::Spirv => ShaderBackend::Spirv,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LogLevel {
    fn from(l: CliLogLevel) -> Self {
        match l {
            CliLogLevel::Off => LogLevel::Off,
            CliLogLevel::Error => LogLevel::Error,
            CliLogLevel::Warn => LogLevel::Warn,
            CliLogLevel::Info => LogLevel::Info,
            CliLogLevel::Debug => LogLevel::Debug,
            CliLogLevel::Trace => LogLevel::Trace,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path).map_err(|e| anyhow!("{}: {}", path.display(), e)),
        None => Config::load().map_err(|e| anyhow!("failed to load configuration: {}", e)),
    }
}

fn read_program(path: &Path) -> Result<(Vec<u8>, Program)> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let program = Program::load(&bytes).with_context(|| format!("parsing {}", path.display()))?;
    Ok((bytes, program))
}

fn translate_one(translator: &Translator, options: &TranslateOptions, file: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let result = translator
        .translate(&bytes, options, None)
        .with_context(|| format!("translating {}", file.display()))?;

    let ext = format!("{}.{}", result.program_type.short_name(), options.backend.extension());
    let name = file.with_extension(ext);
    let target = match output {
        Some(dir) => dir.join(name.file_name().unwrap_or_default()),
        None => name,
    };
    fs::write(&target, result.shader.as_bytes()).with_context(|| format!("writing {}", target.display()))?;

    if result.placeholder {
        tracing::warn!("{}: wrote placeholder shader", file.display());
    }
    tracing::info!(
        "{} -> {}{}",
        file.display(),
        target.display(),
        if result.from_cache { " (cached)" } else { "" }
    );
    Ok(target)
}

fn run_translate(config: &Config, args: TranslateArgs) -> Result<()> {
    if args.files.is_empty() {
        return Err(anyhow!("no input files"));
    }
    if let Some(dir) = &args.output {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut features = config.features;
    features.support_shader_interlock |= args.interlock;
    features.direct_fragcolor |= args.framebuffer_fetch;
    features.preserve_f16_nan |= args.preserve_f16_nan;
    features.use_mask |= args.use_mask;

    let options = TranslateOptions {
        backend: args.backend.map_or(config.translator.backend, Into::into),
        features,
        hints: Vec::new(),
        dump_side_files: config.cache.dump_side_files,
    };

    let translator = match &args.cache_identity {
        Some(identity) if config.cache.enabled => Translator::from_config(config, identity),
        _ => Translator::new(None, config.cache.version)
            .with_placeholders(config.translator.placeholder_on_failure),
    };
    if let Some(cache) = translator.cache() {
        tracing::debug!("Using shader cache at {}", cache.dir().display());
    }

    let (tx, rx) = channel::unbounded::<PathBuf>();
    for file in &args.files {
        tx.send(file.clone())?;
    }
    drop(tx);

    let output = args.output.as_deref();
    let failures: Vec<String> = crossbeam::thread::scope(|s| {
        let workers: Vec<_> = (0..args.jobs.max(1))
            .map(|_| {
                let rx = rx.clone();
                let translator = &translator;
                let options = &options;
                s.spawn(move |_| {
                    let mut failed = Vec::new();
                    for file in rx.iter() {
                        if let Err(e) = translate_one(translator, options, &file, output) {
                            tracing::error!("{:#}", e);
                            failed.push(file.display().to_string());
                        }
                    }
                    failed
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap_or_default())
            .collect()
    })
    .map_err(|_| anyhow!("translation worker panicked"))?;

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} file(s) failed: {}", failures.len(), failures.join(", ")))
    }
}

fn run_disasm(file: &Path) -> Result<()> {
    let (_, program) = read_program(file)?;
    print!("{}", disassemble_program(&program)?);
    Ok(())
}

fn run_info(file: &Path) -> Result<()> {
    let (_, program) = read_program(file)?;
    let plan = bind(&program, &[], None);

    let info = serde_json::json!({
        "hash": program.content_hash(),
        "type": program.program_type,
        "version": format!("{}.{}", program.major_version, program.minor_version),
        "native_color": program.native_color,
        "primary_instructions": program.primary_words().len(),
        "secondary_instructions": program.secondary_words().len(),
        "parameters": program.parameters(),
        "bindings": {
            "uniform_buffers": plan.uniform_buffers.len(),
            "uniforms": plan.uniforms.iter().map(|u| &u.name).collect::<Vec<_>>(),
            "samplers": plan.samplers.iter().map(|s| &s.name).collect::<Vec<_>>(),
            "attributes": plan.attributes.iter().map(|a| &a.name).collect::<Vec<_>>(),
            "iterators": plan.iterators.iter().map(|i| &i.name).collect::<Vec<_>>(),
            "texture_queries": plan.texture_queries.len(),
            "vertex_outputs": plan.vertex_outputs.iter().map(|o| &o.name).collect::<Vec<_>>(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = cli.log.map_or(config.debug.log_level, Into::into);
    logging::init(level);

    match cli.command {
        Command::Translate(args) => run_translate(&config, args),
        Command::Disasm { file } => run_disasm(&file),
        Command::Info { file } => run_info(&file),
    }
}
