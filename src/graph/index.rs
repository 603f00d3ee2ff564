//! Simple-name index over the candidate modules of a signing pass.
//!
//! [`ModuleGraphIndex`] loads every candidate module once, in parallel, and answers the
//! "which module is called `LibB`?" questions the identity patcher asks while rewriting
//! references. Names missing from the candidate set go to an optional [`ModuleResolver`];
//! its answers are memoized so concurrent workers parse each fallback module only once.
//!
//! # Key Components
//!
//! - [`ModuleGraphIndex`] - The read-only index shared by all workers of a pass
//! - [`IndexedModule`] - A candidate together with the path it was loaded from
//!
//! # Thread Safety
//!
//! The index is `Send + Sync` as long as the fallback resolver is. All lookups take `&self`.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use log::{debug, warn};
use rayon::prelude::*;

use crate::{graph::ModuleResolver, metadata::record::ModuleRecord};

/// A candidate module which loaded successfully.
#[derive(Debug, Clone)]
pub struct IndexedModule {
    /// The path the module was loaded from
    pub path: PathBuf,
    /// The parsed module
    pub record: Arc<ModuleRecord>,
}

/// Name to module resolution over the candidate modules of one signing pass.
///
/// The index is built once, before any module is patched, and is read-only afterwards. The
/// only interior mutability is the memo of fallback resolver answers, which lets workers share
/// lookups of modules outside the candidate set.
///
/// Lookups match simple names exactly and case-sensitively. When several candidates share a
/// simple name, the first one in candidate order wins and the others are reported with a
/// warning.
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::{DirectoryResolver, ModuleGraphIndex};
/// use std::path::PathBuf;
///
/// let candidates = vec![PathBuf::from("bin/LibA.dll"), PathBuf::from("bin/LibB.dll")];
/// let fallback = DirectoryResolver::new(vec![PathBuf::from("/usr/lib/dotnet/shared")]);
/// let index = ModuleGraphIndex::build(&candidates, Some(Box::new(fallback)));
///
/// if let Some(module) = index.resolve("LibB") {
///     println!("LibB -> {}", module.identity());
/// }
/// ```
pub struct ModuleGraphIndex {
    modules: Vec<IndexedModule>,
    by_name: HashMap<String, usize>,
    by_path: HashMap<PathBuf, usize>,
    fallback: Option<Box<dyn ModuleResolver>>,
    memo: DashMap<String, Option<Arc<ModuleRecord>>>,
}

impl ModuleGraphIndex {
    /// Create an empty index which only consults `fallback`.
    ///
    /// # Arguments
    /// * `fallback` - Resolver consulted for every name, or `None` to resolve nothing
    #[must_use]
    pub fn new(fallback: Option<Box<dyn ModuleResolver>>) -> Self {
        ModuleGraphIndex {
            modules: Vec::new(),
            by_name: HashMap::new(),
            by_path: HashMap::new(),
            fallback,
            memo: DashMap::new(),
        }
    }

    /// Load all `candidates` and index them by simple name.
    ///
    /// Candidates which do not exist or fail to parse are left out of the index; they are
    /// reported by the caller when it processes them.
    ///
    /// # Arguments
    /// * `candidates` - Module paths, in priority order
    /// * `fallback`   - Resolver consulted for names missing from the candidates
    ///
    /// # Returns
    /// The index over every candidate that loaded. When two candidates share a simple name,
    /// the earlier one is indexed under it and a warning is logged.
    #[must_use]
    pub fn build<P: AsRef<Path> + Sync>(
        candidates: &[P],
        fallback: Option<Box<dyn ModuleResolver>>,
    ) -> Self {
        let loaded: Vec<(PathBuf, Option<ModuleRecord>)> = candidates
            .par_iter()
            .map(|candidate| {
                let path = candidate.as_ref().to_path_buf();
                if !path.is_file() {
                    return (path, None);
                }

                match ModuleRecord::from_file(&path) {
                    Ok(record) => (path, Some(record)),
                    Err(error) => {
                        debug!("Not indexing {}: {}", path.display(), error);
                        (path, None)
                    }
                }
            })
            .collect();

        let mut index = Self::new(fallback);
        for (path, record) in loaded {
            if let Some(record) = record {
                index.insert(path, record);
            }
        }
        index
    }

    fn insert(&mut self, path: PathBuf, record: ModuleRecord) {
        if self.by_path.contains_key(&path) {
            return;
        }

        let position = self.modules.len();
        let name = record.name().to_string();
        match self.by_name.get(&name) {
            Some(existing) => warn!(
                "Module name {} is provided by {} and {}; using {}",
                name,
                self.modules[*existing].path.display(),
                path.display(),
                self.modules[*existing].path.display()
            ),
            None => {
                self.by_name.insert(name, position);
            }
        }

        self.by_path.insert(path.clone(), position);
        self.modules.push(IndexedModule {
            path,
            record: Arc::new(record),
        });
    }

    /// Number of indexed candidate modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no candidate module could be indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// All indexed candidates, in candidate order.
    #[must_use]
    pub fn modules(&self) -> &[IndexedModule] {
        &self.modules
    }

    /// The candidate loaded from `path`.
    ///
    /// # Arguments
    /// * `path` - The candidate path exactly as passed to [`ModuleGraphIndex::build`]
    #[must_use]
    pub fn module_at(&self, path: &Path) -> Option<&Arc<ModuleRecord>> {
        self.by_path
            .get(path)
            .map(|position| &self.modules[*position].record)
    }

    /// The candidate called `name`, without consulting the fallback resolver.
    #[must_use]
    pub fn resolve_local(&self, name: &str) -> Option<&Arc<ModuleRecord>> {
        self.by_name
            .get(name)
            .map(|position| &self.modules[*position].record)
    }

    /// Resolve the module called `name`.
    ///
    /// The candidates are searched first, then the fallback resolver. Not finding a module
    /// is not an error; the caller decides how to treat the reference.
    ///
    /// # Arguments
    /// * `name` - The simple name, compared case-sensitively
    ///
    /// # Returns
    /// The module, or `None` if neither the candidates nor the fallback provide it. A fallback
    /// module whose own name differs from `name` is ignored.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        if let Some(record) = self.resolve_local(name) {
            return Some(record.clone());
        }

        let fallback = self.fallback.as_ref()?;
        self.memo
            .entry(name.to_string())
            .or_insert_with(|| {
                let data = fallback.resolve(name)?;
                match ModuleRecord::from_mem(data) {
                    Ok(record) if record.name() == name => Some(Arc::new(record)),
                    Ok(record) => {
                        debug!(
                            "Fallback for {} returned module {}, ignoring it",
                            name,
                            record.name()
                        );
                        None
                    }
                    Err(error) => {
                        debug!("Fallback module for {} cannot be parsed: {}", name, error);
                        None
                    }
                }
            })
            .clone()
    }
}

impl std::fmt::Debug for ModuleGraphIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraphIndex")
            .field("modules", &self.modules.len())
            .field("has_fallback", &self.fallback.is_some())
            .field("memoized", &self.memo.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{cilassembly::ModuleBuilder, metadata::identity::AssemblyVersion};

    fn write_module(dir: &Path, file: &str, name: &str, version: AssemblyVersion) -> PathBuf {
        let path = dir.join(file);
        ModuleBuilder::new(name, version).write_to(&path).unwrap();
        path
    }

    #[test]
    fn local_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let lib_a = write_module(dir.path(), "LibA.dll", "LibA", AssemblyVersion::new(1, 0, 0, 0));
        let lib_b = write_module(dir.path(), "LibB.dll", "LibB", AssemblyVersion::new(1, 0, 0, 0));
        let missing = dir.path().join("Missing.dll");
        let garbage = dir.path().join("Garbage.dll");
        std::fs::write(&garbage, b"not a module").unwrap();

        let index = ModuleGraphIndex::build(&[lib_a.clone(), missing, garbage.clone(), lib_b], None);
        assert_eq!(index.len(), 2);
        assert_eq!(index.resolve("LibB").unwrap().name(), "LibB");
        assert!(index.resolve("libb").is_none());
        assert!(index.resolve("LibC").is_none());
        assert!(index.module_at(&lib_a).is_some());
        assert!(index.module_at(&garbage).is_none());
    }

    #[test]
    fn duplicate_names_prefer_first_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_module(dir.path(), "old.dll", "LibB", AssemblyVersion::new(1, 0, 0, 0));
        let new = write_module(dir.path(), "new.dll", "LibB", AssemblyVersion::new(2, 0, 0, 0));

        let index = ModuleGraphIndex::build(&[new, old], None);
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.resolve("LibB").unwrap().version(),
            AssemblyVersion::new(2, 0, 0, 0)
        );
    }

    #[test]
    fn fallback_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let image = ModuleBuilder::new("LibC", AssemblyVersion::new(3, 0, 0, 0))
            .to_bytes()
            .unwrap();
        let fallback = move |name: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            match name {
                "LibC" => Some(image.clone()),
                "Broken" => Some(vec![0u8; 16]),
                _ => None,
            }
        };

        let index = ModuleGraphIndex::build::<PathBuf>(&[], Some(Box::new(fallback)));
        assert!(index.is_empty());
        assert_eq!(index.resolve("LibC").unwrap().name(), "LibC");
        assert_eq!(index.resolve("LibC").unwrap().name(), "LibC");
        assert!(index.resolve("Broken").is_none());
        assert!(index.resolve("Broken").is_none());
        assert!(index.resolve("Unknown").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
