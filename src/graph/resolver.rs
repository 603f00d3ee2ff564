//! Fallback resolvers consulted when a reference is not among the candidate modules.

use std::path::{Path, PathBuf};

use log::debug;

/// A collaborator able to locate modules outside the candidate list.
///
/// Implementations return the raw image bytes of the module with the given simple name, or
/// `None` if they cannot find it. They are called from worker threads, at most once per name
/// and pass.
pub trait ModuleResolver: Send + Sync {
    /// Locate the module called `name`.
    fn resolve(&self, name: &str) -> Option<Vec<u8>>;
}

impl<F> ModuleResolver for F
where
    F: Fn(&str) -> Option<Vec<u8>> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Option<Vec<u8>> {
        self(name)
    }
}

/// Searches a list of directories for `<name>.dll`, then `<name>.exe`.
#[derive(Debug, Clone, Default)]
pub struct DirectoryResolver {
    directories: Vec<PathBuf>,
}

impl DirectoryResolver {
    /// Create a resolver searching `directories` in order.
    #[must_use]
    pub fn new(directories: Vec<PathBuf>) -> Self {
        DirectoryResolver { directories }
    }

    /// The searched directories.
    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    fn read_from(directory: &Path, name: &str) -> Option<Vec<u8>> {
        for extension in ["dll", "exe"] {
            let candidate = directory.join(format!("{name}.{extension}"));
            if !candidate.is_file() {
                continue;
            }

            match std::fs::read(&candidate) {
                Ok(data) => return Some(data),
                Err(error) => debug!("Cannot read {}: {}", candidate.display(), error),
            }
        }
        None
    }
}

impl ModuleResolver for DirectoryResolver {
    fn resolve(&self, name: &str) -> Option<Vec<u8>> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return None;
        }

        self.directories
            .iter()
            .find_map(|directory| Self::read_from(directory, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn searches_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("LibB.dll"), b"dll").unwrap();
        std::fs::write(first.path().join("LibB.exe"), b"exe").unwrap();
        std::fs::write(second.path().join("Tool.exe"), b"tool").unwrap();

        let resolver = DirectoryResolver::new(vec![
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        assert_eq!(resolver.resolve("LibB").unwrap(), b"exe");
        assert_eq!(resolver.resolve("Tool").unwrap(), b"tool");
        assert!(resolver.resolve("Missing").is_none());
        assert!(resolver.resolve("../LibB").is_none());
    }

    #[test]
    fn closures_resolve() {
        let resolver = |name: &str| (name == "LibB").then(|| vec![1, 2, 3]);
        assert_eq!(ModuleResolver::resolve(&resolver, "LibB"), Some(vec![1, 2, 3]));
        assert_eq!(ModuleResolver::resolve(&resolver, "LibC"), None);
    }
}
