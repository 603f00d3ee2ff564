//! Writing signed modules to disk.
//!
//! The image is serialized and signed in memory, then written through an [`OutputFile`]: a
//! memory mapped temporary file in the directory of the target, renamed over the target once
//! its content is complete. Readers of the target see either the previous file or the
//! complete new one, never a partial write, and a temporary which is dropped before it was
//! finalized deletes itself.

use std::path::{Path, PathBuf};

use log::debug;
use memmap2::{MmapMut, MmapOptions};
use tempfile::NamedTempFile;

use crate::{
    metadata::record::ModuleRecord,
    strongname::{sign_record, KeyMaterial},
    Error, Result,
};

/// A memory mapped output which only appears at its target path once finalized.
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::serializer::OutputFile;
/// use std::path::Path;
///
/// let mut output = OutputFile::create(Path::new("out/LibA.dll"), 4)?;
/// output.as_mut_slice().copy_from_slice(b"MZ\0\0");
/// output.finalize()?;
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub struct OutputFile {
    mmap: MmapMut,
    temp: NamedTempFile,
    target_path: PathBuf,
}

impl OutputFile {
    /// Create a temporary file of `size` bytes next to `target_path` and map it.
    ///
    /// # Arguments
    ///
    /// * `target_path` - Where the file ends up on [`OutputFile::finalize`].
    /// * `size` - Size of the content in bytes, at least 1.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if the temporary file cannot be created, sized
    /// or mapped.
    pub fn create(target_path: &Path, size: usize) -> Result<Self> {
        let directory = match target_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temp = tempfile::Builder::new()
            .prefix(".strongnamer-")
            .suffix(".tmp")
            .tempfile_in(directory)
            .map_err(|e| Error::Serialization(format!("Failed to create temporary file: {e}")))?;

        temp.as_file()
            .set_len(size as u64)
            .map_err(|e| Error::Serialization(format!("Failed to set file size: {e}")))?;

        let mmap = unsafe { MmapOptions::new().map_mut(temp.as_file()) }
            .map_err(|e| Error::Serialization(format!("Failed to create memory mapping: {e}")))?;

        Ok(OutputFile {
            mmap,
            temp,
            target_path: target_path.to_path_buf(),
        })
    }

    /// The mapped file contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap[..]
    }

    /// The path the file is moved to.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Path of the temporary file.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Flush the contents and move the file to its target path, replacing any file there.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Serialization`] if flushing or renaming fails; the temporary
    /// file is removed and the target path is left as it was.
    pub fn finalize(self) -> Result<()> {
        let OutputFile {
            mmap,
            temp,
            target_path,
        } = self;

        mmap.flush()
            .map_err(|e| Error::Serialization(format!("Failed to flush memory mapping: {e}")))?;
        drop(mmap);

        temp.persist(&target_path).map_err(|e| {
            Error::Serialization(format!(
                "Failed to move output to {}: {}",
                target_path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

/// Serializes modules signed with one key.
pub struct Serializer<'a> {
    key: &'a KeyMaterial,
}

impl<'a> Serializer<'a> {
    /// Create a serializer signing with `key`.
    #[must_use]
    pub fn new(key: &'a KeyMaterial) -> Self {
        Serializer { key }
    }

    /// Serialize `record`, sign it and write it to `output_path`.
    ///
    /// On failure nothing is left at `output_path`, including any older file which was there
    /// before the call.
    ///
    /// # Errors
    /// Returns the error of the failing step; [`crate::Error::Serialization`] for I/O failures.
    pub fn write(&self, record: &ModuleRecord, output_path: &Path) -> Result<()> {
        let result = self.write_inner(record, output_path);
        if result.is_err() && output_path.is_file() {
            debug!("Removing stale output {}", output_path.display());
            let _ = std::fs::remove_file(output_path);
        }
        result
    }

    fn write_inner(&self, record: &ModuleRecord, output_path: &Path) -> Result<()> {
        let image = sign_record(record, self.key)?;
        let bytes = image.as_bytes();

        let mut output = OutputFile::create(output_path, bytes.len())?;
        output.as_mut_slice().copy_from_slice(bytes);
        output.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cilassembly::ModuleBuilder,
        metadata::{identity::AssemblyVersion, tables::{CodedIndex, TableId}},
    };

    const PRIVATE_KEY: &[u8] = include_bytes!("../tests/fixtures/test.snk");

    #[test]
    fn outputs_appear_on_finalize() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("LibA.dll");

        std::fs::write(&target, b"previous").unwrap();

        let temp_path = {
            let mut output = OutputFile::create(&target, 16).unwrap();
            output.as_mut_slice()[..4].copy_from_slice(b"BSJB");
            assert!(output.temp_path().exists());
            assert_eq!(output.temp_path().parent(), target.parent());
            assert_eq!(std::fs::read(&target).unwrap(), b"previous");
            output.temp_path().to_path_buf()
        };
        assert!(!temp_path.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"previous");

        let mut output = OutputFile::create(&target, 4).unwrap();
        output.as_mut_slice().copy_from_slice(b"BSJB");
        output.finalize().unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"BSJB");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn writes_signed_modules() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("LibA.dll");
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();

        let mut record = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0)).build();
        record.set_strong_name(key.public_key());
        Serializer::new(&key).write(&record, &target).unwrap();

        let written = ModuleRecord::from_file(&target).unwrap();
        assert_eq!(written.public_key(), Some(key.public_key()));
    }

    #[test]
    fn failures_leave_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("LibA.dll");
        std::fs::write(&target, b"stale output").unwrap();
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();

        let mut record = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0))
            .friend("LibB")
            .build();
        // TypeRef is not a valid attribute constructor
        record.custom_attributes[0].constructor = CodedIndex::new(TableId::TypeRef, 1);

        let error = Serializer::new(&key).write(&record, &target).unwrap_err();
        assert!(!error.is_fatal());
        assert!(!target.exists());

        let missing_dir = dir.path().join("missing").join("LibA.dll");
        let error = Serializer::new(&key)
            .write(&ModuleBuilder::new("LibA", AssemblyVersion::default()).build(), &missing_dir)
            .unwrap_err();
        assert!(matches!(error, Error::Serialization(_)));
        assert!(!missing_dir.exists());
    }
}
