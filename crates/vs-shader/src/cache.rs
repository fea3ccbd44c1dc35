//! Shader cache with disk persistence
//!
//! Generated code is stored per program identity (usually the title and
//! executable the shaders belong to):
//!
//! ```text
//! <root>/<identity>/manifest
//! <root>/<identity>/<hash>-v<version>.<stage>.<ext>
//! ```
//!
//! The manifest records the format version the directory was written with
//! and the vertex/fragment pairs seen so far. Opening a directory with a
//! different version throws the whole directory away. I/O failures are
//! logged and reported as misses; they never fail a translation.

use crate::backend::TranslatedShader;
use crate::types::ProgramType;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use vs_core::{CacheIoError, ShaderBackend};

const MANIFEST_NAME: &str = "manifest";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Contents of an identity's manifest file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version: u32,
    /// (vertex hash, fragment hash)
    pub pairs: Vec<(String, String)>,
}

impl Manifest {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            pairs: Vec::new(),
        }
    }

    /// Text form: entry count, format version, then one pair per line
    pub fn to_text(&self) -> String {
        let mut text = format!("{}\n{}\n", self.pairs.len(), self.version);
        for (vert, frag) in &self.pairs {
            text.push_str(vert);
            text.push(' ');
            text.push_str(frag);
            text.push('\n');
        }
        text
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, CacheIoError> {
        let corrupt = |reason: &str| CacheIoError::CorruptManifest {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut lines = text.lines();
        let count: usize = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| corrupt("missing entry count"))?;
        let version: u32 = lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| corrupt("missing version"))?;

        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let line = lines.next().ok_or_else(|| corrupt("fewer pairs than the entry count"))?;
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(vert), Some(frag), None) => pairs.push((vert.to_string(), frag.to_string())),
                _ => return Err(corrupt("malformed pair")),
            }
        }

        Ok(Self { version, pairs })
    }
}

#[derive(Debug)]
struct ManifestState {
    manifest: Manifest,
    /// The manifest on disk matches `manifest`
    persisted: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

/// Persistent shader cache for one program identity
pub struct ShaderCache {
    dir: PathBuf,
    manifest: Mutex<Option<ManifestState>>,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    stats: Mutex<CacheStats>,
}

impl ShaderCache {
    /// Cache rooted at `root/identity`. Nothing is touched on disk until the
    /// first lookup or store.
    pub fn new<P: AsRef<Path>>(root: P, identity: &str) -> Self {
        Self {
            dir: root.as_ref().join(identity),
            manifest: Mutex::new(None),
            locks: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name of a cached artifact
    pub fn artifact_name(hash: &str, version: u32, stage: ProgramType, backend: ShaderBackend) -> String {
        format!("{}-v{}.{}.{}", hash, version, stage.short_name(), backend.extension())
    }

    /// Previously generated code for `hash`, if it was stored with the same
    /// format version.
    pub fn lookup(
        &self,
        hash: &str,
        version: u32,
        stage: ProgramType,
        backend: ShaderBackend,
    ) -> Option<TranslatedShader> {
        self.ensure_version(version);

        let name = Self::artifact_name(hash, version, stage, backend);
        let path = self.dir.join(&name);
        let lock = self.key_lock(&name);
        let read = {
            let _guard = lock.read();
            fs::read(&path)
        };
        self.release_key(&name, lock);

        let result = match read {
            Ok(bytes) => TranslatedShader::from_bytes(backend, &bytes)
                .ok_or(CacheIoError::CorruptArtifact(path.clone())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.stats.lock().misses += 1;
                trace!("Cache miss for {}", name);
                return None;
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(shader) => {
                self.stats.lock().hits += 1;
                debug!("Cache hit for {}", name);
                Some(shader)
            }
            Err(e) => {
                self.stats.lock().misses += 1;
                warn!("Ignoring cached shader {}: {}", name, e);
                None
            }
        }
    }

    /// Persist generated code. The write goes to a temporary file that is
    /// renamed into place, so readers never see a partial artifact.
    pub fn store(
        &self,
        hash: &str,
        version: u32,
        stage: ProgramType,
        backend: ShaderBackend,
        shader: &TranslatedShader,
    ) {
        let name = Self::artifact_name(hash, version, stage, backend);
        if let Err(e) = self.try_store(&name, version, shader.as_bytes()) {
            warn!("Failed to cache shader {}: {}", name, e);
        } else {
            self.stats.lock().stores += 1;
        }
    }

    /// Write the source blob (`.gxp`) and its disassembly (`.dsm`) next to
    /// the cached code.
    pub fn store_side_files(&self, hash: &str, version: u32, stage: ProgramType, gxp: &[u8], listing: &str) {
        let base = format!("{}-v{}.{}", hash, version, stage.short_name());
        for (ext, bytes) in [("gxp", gxp), ("dsm", listing.as_bytes())] {
            let name = format!("{}.{}", base, ext);
            if let Err(e) = self.try_store(&name, version, bytes) {
                warn!("Failed to write side file {}: {}", name, e);
            }
        }
    }

    /// Remember that a vertex and a fragment program were linked together
    pub fn record_pair(&self, vertex_hash: &str, fragment_hash: &str, version: u32) {
        self.ensure_version(version);

        let mut state = self.manifest.lock();
        let Some(state) = state.as_mut() else {
            return;
        };
        let pair = (vertex_hash.to_string(), fragment_hash.to_string());
        if state.manifest.pairs.contains(&pair) {
            return;
        }
        state.manifest.pairs.push(pair);
        state.persisted = false;
        if let Err(e) = self.write_manifest(state) {
            warn!("Failed to update cache manifest: {}", e);
        }
    }

    /// Manifest as currently known, loading it from disk if needed
    pub fn manifest(&self, version: u32) -> Manifest {
        self.ensure_version(version);
        self.manifest
            .lock()
            .as_ref()
            .map(|s| s.manifest.clone())
            .unwrap_or_else(|| Manifest::new(version))
    }

    /// Remove every cached file of this identity
    pub fn clear(&self) {
        let mut state = self.manifest.lock();
        *state = None;
        self.discard_dir();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    fn key_lock(&self, name: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Forget the lock of `name` once no other reader or writer holds it.
    /// Clones are only taken under the map lock, so a count of one there is
    /// final.
    fn release_key(&self, name: &str, lock: Arc<RwLock<()>>) {
        drop(lock);
        let mut locks = self.locks.lock();
        if locks.get(name).map_or(false, |l| Arc::strong_count(l) == 1) {
            locks.remove(name);
        }
    }

    fn try_store(&self, name: &str, version: u32, bytes: &[u8]) -> Result<(), CacheIoError> {
        self.ensure_version(version);

        let lock = self.key_lock(name);
        let written = {
            let _guard = lock.write();
            fs::create_dir_all(&self.dir)
                .map_err(CacheIoError::from)
                .and_then(|_| write_atomic(&self.dir.join(name), bytes))
        };
        self.release_key(name, lock);
        written?;

        let mut state = self.manifest.lock();
        if let Some(state) = state.as_mut() {
            if !state.persisted {
                self.write_manifest(state)?;
            }
        }
        Ok(())
    }

    fn write_manifest(&self, state: &mut ManifestState) -> Result<(), CacheIoError> {
        fs::create_dir_all(&self.dir)?;
        write_atomic(&self.dir.join(MANIFEST_NAME), state.manifest.to_text().as_bytes())?;
        state.persisted = true;
        Ok(())
    }

    /// Load the manifest on first use and drop the directory when it was
    /// written with another version.
    fn ensure_version(&self, version: u32) {
        let mut guard = self.manifest.lock();

        if let Some(state) = guard.as_ref() {
            if state.manifest.version == version {
                return;
            }
            warn!(
                "Shader cache version {} is outdated, recreating it at {}",
                state.manifest.version, version
            );
            self.discard_dir();
            *guard = Some(ManifestState {
                manifest: Manifest::new(version),
                persisted: false,
            });
            return;
        }

        let path = self.dir.join(MANIFEST_NAME);
        let loaded = match fs::read_to_string(&path) {
            Ok(text) => match Manifest::parse(&path, &text) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    warn!("{}", e);
                    self.discard_dir();
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                None
            }
        };

        let state = match loaded {
            Some(manifest) if manifest.version == version => ManifestState {
                manifest,
                persisted: true,
            },
            Some(manifest) => {
                warn!(
                    "Shader cache version {} is outdated, recreating it at {}",
                    manifest.version, version
                );
                self.discard_dir();
                ManifestState {
                    manifest: Manifest::new(version),
                    persisted: false,
                }
            }
            None => ManifestState {
                manifest: Manifest::new(version),
                persisted: false,
            },
        };
        *guard = Some(state);
    }

    fn discard_dir(&self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!("Discarded shader cache {:?}", self.dir),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to discard shader cache {:?}: {}", self.dir, e),
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheIoError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(
        ".{}.{}-{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&temp, bytes)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}
