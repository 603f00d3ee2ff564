//! Incremental output cache.
//!
//! The output directory is the cache: an output file is reused when the module version id
//! stored in it equals the one of the input module and the output carries a strong name. The
//! version id changes with every compilation, so a matching id means the output was produced
//! from this exact input; an output without a public key is the unsigned input copied over, or
//! a leftover of an aborted run, and is written again.
//!
//! Checking an output decodes its PE headers, the CLI header, the stream directory and the
//! `Module` and `Assembly` rows; the rest of the file is never decoded.

use std::path::{Path, PathBuf};

use log::debug;

use crate::{
    metadata::{identity::PublicKeyToken, view::ModuleView},
    Result,
};

/// Which outputs may be reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
    /// Reuse a strong-named output whose module version id matches the input
    #[default]
    Fingerprint,
    /// Additionally require the output to be signed with the session key
    FingerprintAndKey,
    /// Always write fresh outputs
    Disabled,
}

/// Result of [`IncrementalCache::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResult {
    /// The existing output at this path can be used as is
    Hit(PathBuf),
    /// The output has to be written
    Miss,
}

/// The facts about an existing output the cache decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSummary {
    /// Module version id of the output
    pub fingerprint: uguid::Guid,
    /// Public key of the output's assembly, `None` if it has no strong name
    pub public_key: Option<Vec<u8>>,
}

/// Decides whether existing outputs can be reused.
#[derive(Debug, Clone)]
pub struct IncrementalCache {
    policy: CachePolicy,
    token: Option<PublicKeyToken>,
}

impl IncrementalCache {
    /// Create a cache applying `policy`.
    ///
    /// # Arguments
    ///
    /// * `policy` - Which outputs may be reused.
    /// * `token` - The session key token, required by [`CachePolicy::FingerprintAndKey`].
    #[must_use]
    pub fn new(policy: CachePolicy, token: Option<PublicKeyToken>) -> Self {
        IncrementalCache { policy, token }
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Check whether `output_path` already holds the signed form of the input identified by
    /// `input_fingerprint`.
    ///
    /// Missing, unreadable or corrupt outputs are misses, never errors, and so are outputs
    /// without a public key.
    ///
    /// # Arguments
    ///
    /// * `input_fingerprint` - Module version id of the input module.
    /// * `output_path` - Where the signed output of the input goes.
    #[must_use]
    pub fn check(&self, input_fingerprint: uguid::Guid, output_path: &Path) -> CacheResult {
        if self.policy == CachePolicy::Disabled || !output_path.is_file() {
            return CacheResult::Miss;
        }

        let summary = match Self::read_output(output_path) {
            Ok(summary) => summary,
            Err(error) => {
                debug!(
                    "Existing output {} cannot be read, rewriting it: {}",
                    output_path.display(),
                    error
                );
                return CacheResult::Miss;
            }
        };

        if summary.fingerprint != input_fingerprint {
            return CacheResult::Miss;
        }

        let Some(public_key) = summary.public_key else {
            debug!(
                "Existing output {} has no strong name",
                output_path.display()
            );
            return CacheResult::Miss;
        };

        if self.policy == CachePolicy::FingerprintAndKey
            && self.token != Some(PublicKeyToken::from_public_key(&public_key))
        {
            debug!(
                "Existing output {} is not signed with the session key",
                output_path.display()
            );
            return CacheResult::Miss;
        }

        CacheResult::Hit(output_path.to_path_buf())
    }

    /// Read the module version id and public key of the image at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - An existing output image.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a PE module image or has no
    /// `Module` row with a version id.
    pub fn read_output(path: &Path) -> Result<OutputSummary> {
        let view = ModuleView::from_file(path)?;
        Ok(OutputSummary {
            fingerprint: view.fingerprint()?,
            public_key: view.public_key()?,
        })
    }

    /// Delete every `.dll` and `.exe` file in `output_dir`, forcing the next pass to sign
    /// everything again.
    ///
    /// Returns the number of deleted files. A missing directory counts as already clean.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be listed or a file cannot be deleted.
    pub fn clear(output_dir: &Path) -> Result<usize> {
        if !output_dir.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(output_dir)? {
            let path = entry?.path();
            let is_module = path.extension().is_some_and(|extension| {
                extension.eq_ignore_ascii_case("dll") || extension.eq_ignore_ascii_case("exe")
            });

            if is_module && path.is_file() {
                std::fs::remove_file(&path)?;
                debug!("Removed {}", path.display());
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cilassembly::ModuleBuilder, metadata::identity::AssemblyVersion,
        strongname::sign_record, KeyMaterial,
    };

    const PRIVATE_KEY: &[u8] = include_bytes!("../tests/fixtures/test.snk");
    const OTHER_KEY: &[u8] = include_bytes!("../tests/fixtures/other.snk");

    fn write_signed(path: &Path, fingerprint: uguid::Guid, key: &KeyMaterial) {
        let mut record = ModuleBuilder::new("LibA", AssemblyVersion::default())
            .mvid(fingerprint)
            .build();
        record.set_strong_name(key.public_key());
        std::fs::write(path, sign_record(&record, key).unwrap().into_bytes()).unwrap();
    }

    fn mvid(last: u8) -> uguid::Guid {
        let mut bytes = [0x11u8; 16];
        bytes[15] = last;
        uguid::Guid::from_bytes(bytes)
    }

    #[test]
    fn reads_the_version_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LibA.dll");
        ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
            .mvid(mvid(1))
            .reference("LibB", AssemblyVersion::new(1, 0, 0, 0))
            .friend("LibB")
            .write_to(&path)
            .unwrap();

        let summary = IncrementalCache::read_output(&path).unwrap();
        assert_eq!(summary.fingerprint, mvid(1));
        assert_eq!(summary.public_key, None);
    }

    #[test]
    fn hits_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("LibA.dll");
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let cache = IncrementalCache::new(CachePolicy::Fingerprint, None);

        assert_eq!(cache.check(mvid(1), &output), CacheResult::Miss);

        write_signed(&output, mvid(1), &key);
        assert_eq!(cache.check(mvid(1), &output), CacheResult::Hit(output.clone()));
        assert_eq!(cache.check(mvid(2), &output), CacheResult::Miss);

        let disabled = IncrementalCache::new(CachePolicy::Disabled, None);
        assert_eq!(disabled.check(mvid(1), &output), CacheResult::Miss);
    }

    #[test]
    fn unsigned_outputs_miss() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("LibA.dll");
        ModuleBuilder::new("LibA", AssemblyVersion::default())
            .mvid(mvid(1))
            .write_to(&output)
            .unwrap();

        let cache = IncrementalCache::new(CachePolicy::Fingerprint, None);
        assert_eq!(cache.check(mvid(1), &output), CacheResult::Miss);

        let keyed = IncrementalCache::new(
            CachePolicy::FingerprintAndKey,
            Some(PublicKeyToken::new([0; 8])),
        );
        assert_eq!(keyed.check(mvid(1), &output), CacheResult::Miss);
    }

    #[test]
    fn session_key_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("LibA.dll");
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let other = KeyMaterial::from_bytes(OTHER_KEY).unwrap();
        write_signed(&output, mvid(1), &key);

        let same = IncrementalCache::new(CachePolicy::FingerprintAndKey, Some(key.token()));
        assert_eq!(same.check(mvid(1), &output), CacheResult::Hit(output.clone()));

        let different = IncrementalCache::new(CachePolicy::FingerprintAndKey, Some(other.token()));
        assert_eq!(different.check(mvid(1), &output), CacheResult::Miss);
    }

    #[test]
    fn corrupt_outputs_miss() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("LibA.dll");
        let image = ModuleBuilder::new("LibA", AssemblyVersion::default())
            .mvid(mvid(1))
            .to_bytes()
            .unwrap();
        std::fs::write(&output, &image[..image.len() / 2]).unwrap();

        let cache = IncrementalCache::new(CachePolicy::Fingerprint, None);
        assert!(IncrementalCache::read_output(&output).is_err());
        assert_eq!(cache.check(mvid(1), &output), CacheResult::Miss);

        std::fs::write(&output, b"").unwrap();
        assert_eq!(cache.check(mvid(1), &output), CacheResult::Miss);
    }

    #[test]
    fn clear_removes_modules_only() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["LibA.dll", "Tool.EXE", "notes.txt", "LibA.pdb"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.dll")).unwrap();

        assert_eq!(IncrementalCache::clear(dir.path()).unwrap(), 2);
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("nested.dll").exists());
        assert!(!dir.path().join("Tool.EXE").exists());
        assert_eq!(IncrementalCache::clear(&dir.path().join("missing")).unwrap(), 0);
    }
}
