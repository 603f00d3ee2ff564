use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    cache::{CacheResult, IncrementalCache},
    driver::{redirect, SignerOptions},
    graph::{DirectoryResolver, ModuleGraphIndex, ModuleResolver},
    metadata::record::ModuleRecord,
    serializer::Serializer,
    strongname::{IdentityPatcher, KeyMaterial, PatchOutcome},
    Error, Result,
};

/// Where the key of a pass comes from.
#[derive(Clone)]
pub enum KeySource {
    /// A key container file, usually `.snk`
    File(PathBuf),
    /// Key container bytes
    Bytes(Vec<u8>),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::File(path) => f.debug_tuple("File").field(path).finish(),
            KeySource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// The inputs of one signing pass.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// Modules to consider, in order
    pub candidates: Vec<PathBuf>,
    /// The signing key
    pub key: Option<KeySource>,
    /// Directory receiving the signed modules
    pub output_dir: PathBuf,
    /// Dependent artifact list whose entries are remapped to signed outputs
    pub copy_local: Vec<PathBuf>,
}

impl SigningRequest {
    /// Create a request without a copy-local list.
    #[must_use]
    pub fn new(candidates: Vec<PathBuf>, key: KeySource, output_dir: impl Into<PathBuf>) -> Self {
        SigningRequest {
            candidates,
            key: Some(key),
            output_dir: output_dir.into(),
            copy_local: Vec::new(),
        }
    }

    /// Set the copy-local list.
    #[must_use]
    pub fn with_copy_local(mut self, copy_local: Vec<PathBuf>) -> Self {
        self.copy_local = copy_local;
        self
    }
}

/// Terminal state of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleState {
    /// The input did not exist; passed through
    NotYetAvailable,
    /// The module has a strong name of its own; passed through
    AlreadySigned,
    /// The existing output was produced from this input; reused
    CacheHit,
    /// A signed output was written
    Signed,
    /// Loading or writing failed; passed through unsigned
    Failed(String),
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::NotYetAvailable => write!(f, "not yet available"),
            ModuleState::AlreadySigned => write!(f, "already signed"),
            ModuleState::CacheHit => write!(f, "up to date"),
            ModuleState::Signed => write!(f, "signed"),
            ModuleState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOutcome {
    /// The candidate path as requested
    pub input: PathBuf,
    /// The path that was loaded; differs from `input` for reference-only variants
    pub source: PathBuf,
    /// The path consumers should use from now on
    pub final_path: PathBuf,
    /// The terminal state
    pub state: ModuleState,
}

/// Result of a signing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningReport {
    /// One outcome per candidate, in candidate order
    pub modules: Vec<ModuleOutcome>,
    /// The copy-local list with every replaced module pointing to its output
    pub copy_local: Vec<PathBuf>,
}

impl SigningReport {
    /// The final path of every candidate, parallel to the candidate list.
    #[must_use]
    pub fn final_paths(&self) -> Vec<PathBuf> {
        self.modules
            .iter()
            .map(|outcome| outcome.final_path.clone())
            .collect()
    }

    /// Number of outputs written in this pass.
    #[must_use]
    pub fn written(&self) -> usize {
        self.count(|state| *state == ModuleState::Signed)
    }

    /// Number of failed candidates.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|state| matches!(state, ModuleState::Failed(_)))
    }

    fn count(&self, filter: impl Fn(&ModuleState) -> bool) -> usize {
        self.modules
            .iter()
            .filter(|outcome| filter(&outcome.state))
            .count()
    }
}

/// Runs signing passes.
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::{KeySource, Signer, SignerOptions, SigningRequest};
/// use std::path::PathBuf;
///
/// let request = SigningRequest::new(
///     vec![PathBuf::from("bin/LibA.dll"), PathBuf::from("bin/LibB.dll")],
///     KeySource::File(PathBuf::from("key.snk")),
///     "obj/signed",
/// );
///
/// let report = Signer::new(SignerOptions::default()).sign(&request)?;
/// for outcome in &report.modules {
///     println!("{} -> {} ({})", outcome.input.display(), outcome.final_path.display(), outcome.state);
/// }
/// # Ok::<(), strongnamer::Error>(())
/// ```
#[derive(Default)]
pub struct Signer {
    options: SignerOptions,
    resolver: Option<Arc<dyn ModuleResolver>>,
}

impl Signer {
    /// Create a signer with `options`.
    #[must_use]
    pub fn new(options: SignerOptions) -> Self {
        Signer {
            options,
            resolver: None,
        }
    }

    /// Use `resolver` for modules outside the candidate list instead of probing
    /// [`SignerOptions::search_directories`].
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ModuleResolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// The active options.
    #[must_use]
    pub fn options(&self) -> &SignerOptions {
        &self.options
    }

    /// Run one signing pass.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] if the request has no key or no output
    /// directory, the key file is missing or the output directory cannot be created, and
    /// [`crate::Error::KeyFormat`] if the key is not a supported container. Failures of
    /// single modules are reported in the [`SigningReport`] instead.
    pub fn sign(&self, request: &SigningRequest) -> Result<SigningReport> {
        let key = Self::load_key(request)?;
        Self::prepare_output_dir(&request.output_dir)?;

        let patcher_token = key.token();
        info!(
            "Signing {} candidates with key {} into {}",
            request.candidates.len(),
            patcher_token,
            request.output_dir.display()
        );

        let sources: Vec<PathBuf> = request
            .candidates
            .iter()
            .map(|candidate| {
                match redirect::implementation_of(candidate, &request.copy_local) {
                    Some(implementation) => {
                        debug!(
                            "Using {} in place of reference-only {}",
                            implementation.display(),
                            candidate.display()
                        );
                        implementation
                    }
                    None => candidate.clone(),
                }
            })
            .collect();

        let index = ModuleGraphIndex::build(&sources, self.fallback());
        let pass = Pass {
            key: &key,
            index: &index,
            patcher: IdentityPatcher::new(&key)
                .with_graph(&index, self.options.unresolved_references),
            cache: IncrementalCache::new(self.options.cache, Some(patcher_token)),
            output_dir: &request.output_dir,
        };

        let jobs = Self::plan(&request.candidates, &sources);
        let processed: Vec<&Job> = jobs
            .iter()
            .filter(|job| matches!(job.kind, JobKind::Process))
            .collect();
        let results: Vec<(PathBuf, ModuleState)> = if self.options.parallel {
            processed.par_iter().map(|job| pass.process(job)).collect()
        } else {
            processed.iter().map(|job| pass.process(job)).collect()
        };

        let modules: Vec<ModuleOutcome> = jobs
            .iter()
            .map(|job| {
                let (final_path, state) = match &job.kind {
                    JobKind::Process => results[job.slot].clone(),
                    JobKind::Duplicate => results[job.slot].clone(),
                    JobKind::Collision(first) => (
                        job.input.clone(),
                        ModuleState::Failed(format!(
                            "output file name is already used by {}",
                            request.candidates[*first].display()
                        )),
                    ),
                };
                ModuleOutcome {
                    input: job.input.clone(),
                    source: job.source.clone(),
                    final_path,
                    state,
                }
            })
            .collect();

        let copy_local = remap_copy_local(&request.copy_local, &modules);
        let report = SigningReport {
            modules,
            copy_local,
        };

        info!(
            "Signing pass done: {} written, {} failed, {} candidates",
            report.written(),
            report.failed(),
            report.modules.len()
        );
        Ok(report)
    }

    fn load_key(request: &SigningRequest) -> Result<KeyMaterial> {
        match &request.key {
            None => Err(Error::Configuration("no signing key was provided".to_string())),
            Some(KeySource::File(path)) => {
                if !path.is_file() {
                    return Err(Error::Configuration(format!(
                        "key file {} does not exist",
                        path.display()
                    )));
                }
                KeyMaterial::from_file(path).map_err(|error| match error {
                    Error::FileError(io) => Error::Configuration(format!(
                        "key file {} cannot be read: {}",
                        path.display(),
                        io
                    )),
                    other => other,
                })
            }
            Some(KeySource::Bytes(bytes)) if bytes.is_empty() => {
                Err(Error::Configuration("the signing key is empty".to_string()))
            }
            Some(KeySource::Bytes(bytes)) => KeyMaterial::from_bytes(bytes.clone()),
        }
    }

    fn prepare_output_dir(output_dir: &Path) -> Result<()> {
        if output_dir.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "no output directory was provided".to_string(),
            ));
        }

        if !output_dir.is_dir() {
            std::fs::create_dir_all(output_dir).map_err(|error| {
                Error::Configuration(format!(
                    "output directory {} cannot be created: {}",
                    output_dir.display(),
                    error
                ))
            })?;
        }
        Ok(())
    }

    fn fallback(&self) -> Option<Box<dyn ModuleResolver>> {
        if let Some(resolver) = &self.resolver {
            let resolver = Arc::clone(resolver);
            return Some(Box::new(move |name: &str| resolver.resolve(name)));
        }

        if self.options.search_directories.is_empty() {
            None
        } else {
            Some(Box::new(DirectoryResolver::new(
                self.options.search_directories.clone(),
            )))
        }
    }

    /// Assign every candidate a job. Repeated candidates share the result of the first
    /// occurrence; a later candidate claiming an output name already in use fails.
    fn plan(candidates: &[PathBuf], sources: &[PathBuf]) -> Vec<Job> {
        let mut slot_of_input: HashMap<&Path, usize> = HashMap::new();
        let mut owner_of_output: HashMap<String, usize> = HashMap::new();
        let mut jobs = Vec::with_capacity(candidates.len());

        for (position, (input, source)) in candidates.iter().zip(sources).enumerate() {
            let (kind, slot) = if let Some(slot) = slot_of_input.get(input.as_path()) {
                (JobKind::Duplicate, *slot)
            } else {
                // Output names compare case-insensitively to stay safe on case-insensitive disks
                let output_name = input
                    .file_name()
                    .map(|name| name.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if let Some(owner) = owner_of_output.get(&output_name) {
                    (JobKind::Collision(*owner), 0)
                } else {
                    let slot = slot_of_input.len();
                    slot_of_input.insert(input.as_path(), slot);
                    owner_of_output.insert(output_name, position);
                    (JobKind::Process, slot)
                }
            };

            jobs.push(Job {
                input: input.clone(),
                source: source.clone(),
                slot,
                kind,
            });
        }
        jobs
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("options", &self.options)
            .field("custom_resolver", &self.resolver.is_some())
            .finish()
    }
}

struct Job {
    input: PathBuf,
    source: PathBuf,
    slot: usize,
    kind: JobKind,
}

enum JobKind {
    Process,
    /// Same input as an earlier candidate; shares its result slot
    Duplicate,
    /// Same output name as the candidate at this position
    Collision(usize),
}

/// Shared, read-only state of a pass.
struct Pass<'a> {
    key: &'a KeyMaterial,
    index: &'a ModuleGraphIndex,
    patcher: IdentityPatcher<'a>,
    cache: IncrementalCache,
    output_dir: &'a Path,
}

impl Pass<'_> {
    fn process(&self, job: &Job) -> (PathBuf, ModuleState) {
        let state = self.run(job);
        let final_path = match &state {
            ModuleState::Signed | ModuleState::CacheHit => self.output_path(&job.input),
            _ => job.input.clone(),
        };
        (final_path, state)
    }

    fn run(&self, job: &Job) -> ModuleState {
        if !job.source.is_file() {
            debug!("{} does not exist yet, passing it through", job.source.display());
            return ModuleState::NotYetAvailable;
        }

        let record = match self.load(&job.source) {
            Ok(record) => record,
            Err(error) => {
                warn!("Cannot load {}: {}", job.source.display(), error);
                return ModuleState::Failed(error.to_string());
            }
        };

        if record.has_public_key() {
            debug!("{} is already signed", job.source.display());
            return ModuleState::AlreadySigned;
        }

        let output_path = self.output_path(&job.input);
        if same_file(&output_path, &job.source) {
            warn!(
                "{} is its own output, leaving it unsigned",
                job.source.display()
            );
            return ModuleState::Failed(format!(
                "Output {} would overwrite the unsigned input",
                output_path.display()
            ));
        }

        if let CacheResult::Hit(path) = self.cache.check(record.fingerprint(), &output_path) {
            debug!("{} is up to date", path.display());
            return ModuleState::CacheHit;
        }

        let mut record = ModuleRecord::clone(&record);
        if let PatchOutcome::Patched(summary) = self.patcher.sign(&mut record) {
            debug!(
                "{}: {} references and {} friend declarations updated",
                record.name(),
                summary.references_updated.len(),
                summary.friends_updated.len()
            );
        }

        match Serializer::new(self.key).write(&record, &output_path) {
            Ok(()) => {
                debug!("Wrote {}", output_path.display());
                ModuleState::Signed
            }
            Err(error) => {
                warn!(
                    "Cannot write {}, keeping the unsigned {}: {}",
                    output_path.display(),
                    job.input.display(),
                    error
                );
                ModuleState::Failed(error.to_string())
            }
        }
    }

    fn load(&self, source: &Path) -> Result<Arc<ModuleRecord>> {
        match self.index.module_at(source) {
            Some(record) => Ok(Arc::clone(record)),
            None => ModuleRecord::from_file(source).map(Arc::new),
        }
    }

    fn output_path(&self, input: &Path) -> PathBuf {
        match input.file_name() {
            Some(name) => self.output_dir.join(name),
            None => self.output_dir.join(input),
        }
    }
}

/// Whether `output` and `source` name the same file.
fn same_file(output: &Path, source: &Path) -> bool {
    if output == source {
        return true;
    }

    match (output.canonicalize(), source.canonicalize()) {
        (Ok(output), Ok(source)) => output == source,
        _ => false,
    }
}

/// Replace every copy-local entry which equals the input path of a module whose final path
/// changed; all other entries pass through unchanged.
fn remap_copy_local(copy_local: &[PathBuf], modules: &[ModuleOutcome]) -> Vec<PathBuf> {
    let mut replacements: HashMap<&Path, &Path> = HashMap::new();
    for outcome in modules {
        if outcome.final_path != outcome.input {
            replacements.insert(&outcome.input, &outcome.final_path);
        }
    }

    copy_local
        .iter()
        .map(|entry| match replacements.get(entry.as_path()) {
            Some(replacement) => replacement.to_path_buf(),
            None => entry.clone(),
        })
        .collect()
}
