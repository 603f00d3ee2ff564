use std::path::PathBuf;

use crate::{cache::CachePolicy, strongname::UnresolvedPolicy};

/// Configuration of a [`crate::Signer`] pass.
///
/// The presets cover the common setups; individual fields can be adjusted afterwards.
///
/// # Examples
///
/// ```rust
/// use strongnamer::{CachePolicy, SignerOptions};
///
/// let mut options = SignerOptions::rebuild();
/// options.parallel = false;
/// assert_eq!(options.cache, CachePolicy::Disabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerOptions {
    /// Process modules on the rayon worker pool
    pub parallel: bool,

    /// Which existing outputs may be reused instead of being rewritten
    pub cache: CachePolicy,

    /// Treatment of tokenless references whose target cannot be found
    pub unresolved_references: UnresolvedPolicy,

    /// Directories searched for modules which are not among the candidates
    pub search_directories: Vec<PathBuf>,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            cache: CachePolicy::Fingerprint,
            unresolved_references: UnresolvedPolicy::Stamp,
            search_directories: Vec::new(),
        }
    }
}

impl SignerOptions {
    /// Single threaded processing, otherwise the defaults.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Rewrite every output, ignoring what is already in the output directory.
    #[must_use]
    pub fn rebuild() -> Self {
        Self {
            cache: CachePolicy::Disabled,
            ..Self::default()
        }
    }

    /// Reuse outputs only if they carry the session key, and never pin references to modules
    /// that cannot be found.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            parallel: true,
            cache: CachePolicy::FingerprintAndKey,
            unresolved_references: UnresolvedPolicy::LeaveUnset,
            search_directories: Vec::new(),
        }
    }

    /// Add a directory to search for modules outside the candidate list.
    #[must_use]
    pub fn search_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.search_directories.push(directory.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let default = SignerOptions::default();
        assert!(default.parallel);
        assert_eq!(default.cache, CachePolicy::Fingerprint);
        assert_eq!(default.unresolved_references, UnresolvedPolicy::Stamp);

        assert!(!SignerOptions::sequential().parallel);
        assert_eq!(SignerOptions::rebuild().cache, CachePolicy::Disabled);

        let strict = SignerOptions::strict().search_directory("/opt/dotnet");
        assert_eq!(strict.cache, CachePolicy::FingerprintAndKey);
        assert_eq!(strict.unresolved_references, UnresolvedPolicy::LeaveUnset);
        assert_eq!(strict.search_directories, vec![PathBuf::from("/opt/dotnet")]);
    }
}
