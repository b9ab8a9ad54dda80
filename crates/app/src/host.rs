//! Isolation host: discovers, compiles and runs extension units.
//!
//! Each unit is compiled once, gets its own capability surface and failure
//! domain, and has its body run inside that domain. A unit that fails to
//! read or compile is logged and skipped; the others load normally.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use busscripts_domain::id::UnitId;

use crate::capabilities::Capabilities;
use crate::ports::{CompileError, CompiledUnit, ScriptCompiler, UnitSource};
use crate::runtime::Runtime;
use crate::supervisor::FailureDomain;

/// Where units come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sources {
    /// Loaded first, in the given order.
    pub files: Vec<PathBuf>,
    /// Scanned for recognised files, each in sorted order.
    pub dirs: Vec<PathBuf>,
}

impl Sources {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

/// Outcome of [`IsolationHost::load_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<UnitId>,
    pub failed: Vec<UnitId>,
}

/// Why a unit was not loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unit {0} is already loaded")]
    AlreadyLoaded(UnitId),

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CompileError in {unit}: {source}")]
    Compile {
        unit: UnitId,
        #[source]
        source: CompileError,
    },
}

struct LoadedUnit {
    domain: FailureDomain,
    /// Keeps the compiled unit (and the callbacks it registered) alive.
    compiled: Arc<dyn CompiledUnit>,
}

/// Owns every loaded unit.
pub struct IsolationHost<C> {
    runtime: Arc<Runtime>,
    compiler: C,
    units: Mutex<BTreeMap<UnitId, LoadedUnit>>,
}

impl<C: ScriptCompiler> IsolationHost<C> {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>, compiler: C) -> Self {
        Self {
            runtime,
            compiler,
            units: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    /// Load explicit files first, then every recognised file of each
    /// directory in sorted order. Failures are logged and reported, never
    /// propagated.
    pub fn load_all(&self, sources: &Sources) -> LoadReport {
        let mut paths = sources.files.clone();
        for dir in &sources.dirs {
            match discover(dir, |path| self.compiler.recognizes(path)) {
                Ok(found) => paths.extend(found),
                Err(err) => tracing::error!(%err, dir = %dir.display(), "failed to scan directory"),
            }
        }

        let mut report = LoadReport::default();
        for path in paths {
            match self.load_file(&path) {
                Ok(unit) => report.loaded.push(unit),
                Err(err) => {
                    tracing::error!(unit = %path.display(), "{err}");
                    report.failed.push(unit_id(&path));
                }
            }
        }
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "units loaded"
        );
        report
    }

    /// Read, compile and run one unit.
    ///
    /// A fault in the unit's body is contained and logged; the unit stays
    /// loaded with whatever it registered before the fault.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the path was already loaded, cannot be
    /// read, or does not compile.
    pub fn load_file(&self, path: &Path) -> Result<UnitId, LoadError> {
        let id = unit_id(path);
        if self.is_loaded(&id) {
            return Err(LoadError::AlreadyLoaded(id));
        }
        let code = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(unit = %id, "compiling");
        let domain = FailureDomain::new(id.clone());
        let capabilities = Capabilities::new(Arc::clone(&self.runtime), domain.clone());
        let source = UnitSource {
            id: id.clone(),
            path: path.to_path_buf(),
            code,
        };
        let compiled: Arc<dyn CompiledUnit> = self
            .compiler
            .compile(&source, capabilities)
            .map_err(|source| LoadError::Compile {
                unit: id.clone(),
                source,
            })?
            .into();

        match self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
        {
            Entry::Occupied(_) => return Err(LoadError::AlreadyLoaded(id)),
            Entry::Vacant(slot) => {
                slot.insert(LoadedUnit {
                    domain: domain.clone(),
                    compiled: Arc::clone(&compiled),
                });
            }
        }

        tracing::info!(unit = %id, "running");
        domain.run("body", || compiled.run());
        Ok(id)
    }

    #[must_use]
    pub fn is_loaded(&self, unit: &UnitId) -> bool {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(unit)
    }

    /// Loaded units in id order.
    #[must_use]
    pub fn units(&self) -> Vec<UnitId> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The failure domain of a loaded unit.
    #[must_use]
    pub fn domain(&self, unit: &UnitId) -> Option<FailureDomain> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(unit)
            .map(|loaded| loaded.domain.clone())
    }
}

/// Identity of the unit at `path`. Relative paths are anchored at the
/// working directory so that every spelling of a file maps to one unit.
fn unit_id(path: &Path) -> UnitId {
    UnitId::from_path(&std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()))
}

/// Recognised files directly inside `dir`, sorted by name.
///
/// # Errors
///
/// Returns the IO error when `dir` cannot be listed.
pub fn discover<F>(dir: &Path, recognizes: F) -> io::Result<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && recognizes(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
