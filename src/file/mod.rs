//! PE container access for module images.
//!
//! A [`crate::file::File`] owns the raw bytes of one module image, either memory-mapped from
//! disk or held in memory, together with the parsed PE/COFF structure of that image. Every
//! module this crate reads is a PE image carrying a CLI header in its data directories; the
//! metadata root, the heaps and the strong name signature slot are all located through the
//! CLI header and resolved from RVAs into file offsets here.
//!
//! # Architecture
//!
//! - **Backend system** - [`crate::file::Backend`] abstracts over mapped files and owned buffers
//! - **PE parsing** - `goblin` parses DOS header, COFF header, optional header and sections
//! - **Address translation** - [`crate::file::File::rva_to_offset`] maps RVAs onto raw data
//! - **Header geometry** - offsets of the structures a rewrite patches in place
//!
//! Parsing never copies the input; [`crate::metadata::view::ModuleView`] borrows from the
//! file and [`crate::ModuleRecord`] copies out only what it keeps.
//!
//! # Key Components
//!
//! - [`crate::file::File`] - Owner of module image bytes and their PE structure
//! - [`crate::file::parser::Parser`] - Cursor-based reader for heaps and blobs
//! - [`crate::file::io`] - Bounds-checked little-endian primitives
//!
//! # Examples
//!
//! ```rust,no_run
//! use strongnamer::File;
//! use std::path::Path;
//!
//! let file = File::from_file(Path::new("bin/LibA.dll"))?;
//! let (clr_rva, clr_size) = file.clr()?;
//! let clr_offset = file.rva_to_offset(clr_rva)?;
//! let clr_header = file.data_slice(clr_offset, clr_size)?;
//! println!("CLI header starts with {:02x?}", &clr_header[..8]);
//! # Ok::<(), strongnamer::Error>(())
//! ```
//!
//! # References
//!
//! - Microsoft PE/COFF Specification
//! - ECMA-335 6th Edition, Partition II, Section 25 - File format extensions to PE

pub mod io;
pub mod parser;

mod memory;
mod physical;

use std::path::Path;

use crate::{
    Error::{Empty, GoblinErr},
    Result,
};
use goblin::pe::{header::Header, section_table::SectionTable, PE};
use memory::Memory;
use ouroboros::self_referencing;
use physical::Physical;

/// Size of the PE signature plus the COFF file header.
pub const PE_FILE_HEADER_SIZE: usize = 24;

/// Size of one section table entry.
pub const SECTION_HEADER_SIZE: usize = 40;

/// Storage backend of a [`File`].
///
/// Implementations must be thread-safe; the index shares loaded files across the worker pool.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range is not inside the data.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(out_of_bounds_error!());
        };

        if offset_end > self.len() {
            return Err(out_of_bounds_error!());
        }

        Ok(&self.data()[offset..offset_end])
    }

    /// Returns the complete content.
    fn data(&self) -> &[u8];

    /// Returns the total length of the content.
    fn len(&self) -> usize {
        self.data().len()
    }
}

#[self_referencing]
/// A loaded module image and its parsed PE structure.
///
/// Loading validates that the image is a PE file with an optional header and a CLI header
/// data directory; anything else is not a managed module and is rejected up front.
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::file::File;
///
/// let file = File::from_mem(std::fs::read("bin/LibA.dll")?)?;
/// for section in file.sections() {
///     println!("{} at RVA 0x{:x}", section.name().unwrap_or("?"), section.virtual_address);
/// }
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub struct File {
    /// The underlying data source (memory or file).
    data: Box<dyn Backend>,
    /// The parsed PE structure, referencing the data.
    #[borrows(data)]
    #[not_covariant]
    pe: PE<'this>,
}

impl File {
    /// Map a module image from disk.
    ///
    /// # Arguments
    ///
    /// * `path` - Path of the image on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be opened or mapped ([`crate::Error::FileError`])
    /// - The file is empty ([`crate::Error::Empty`])
    /// - The content is not a PE image ([`crate::Error::GoblinErr`])
    /// - The PE image carries no CLI header ([`crate::Error::Malformed`])
    pub fn from_file(path: &Path) -> Result<File> {
        Self::load(Physical::new(path)?)
    }

    /// Wrap a module image that is already in memory.
    ///
    /// # Arguments
    ///
    /// * `data` - The bytes of the image.
    ///
    /// # Errors
    ///
    /// Same as [`File::from_file`], minus the filesystem errors.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        Self::load(Memory::new(data))
    }

    fn load<T: Backend + 'static>(data: T) -> Result<File> {
        if data.len() == 0 {
            return Err(Empty);
        }

        File::try_new(Box::new(data), |data| match PE::parse(data.data()) {
            Ok(pe) => {
                let Some(optional_header) = pe.header.optional_header.as_ref() else {
                    return Err(malformed_error!("Image does not have an OptionalHeader"));
                };

                let has_clr = matches!(
                    optional_header.data_directories.get_clr_runtime_header(),
                    Some(clr) if clr.virtual_address != 0
                );
                if has_clr {
                    Ok(pe)
                } else {
                    Err(malformed_error!(
                        "Image does not have a CLR runtime header directory"
                    ))
                }
            }
            Err(error) => Err(GoblinErr(error)),
        })
    }

    /// The complete image.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.with_data(|data| data.data())
    }

    /// A bounds-checked range of the image.
    ///
    /// # Arguments
    ///
    /// * `offset` - File offset of the first byte.
    /// * `len` - Number of bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range leaves the image.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        self.with_data(|data| data.data_slice(offset, len))
    }

    /// Size of the image in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_data(|data| data.len())
    }

    /// Always `false`; empty images are rejected on load.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The parsed DOS, COFF and optional headers.
    #[must_use]
    pub fn header(&self) -> &Header {
        self.with_pe(|pe| &pe.header)
    }

    /// The section table, in file order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionTable> {
        self.with_pe(|pe| pe.sections.iter())
    }

    /// RVA and size of the CLI header.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the directory vanished, which [`File::load`]
    /// already rules out.
    pub fn clr(&self) -> Result<(usize, usize)> {
        self.with_pe(|pe| {
            if let Some(header) = pe.header.optional_header.as_ref() {
                if let Some(dir) = header.data_directories.get_clr_runtime_header() {
                    return Ok((dir.virtual_address as usize, dir.size as usize));
                }
            }

            Err(malformed_error!("Image does not have a CLR runtime header"))
        })
    }

    /// `true` for PE32+ images.
    #[must_use]
    pub fn is_pe32_plus(&self) -> bool {
        self.with_pe(|pe| pe.is_64)
    }

    /// File alignment from the optional header.
    #[must_use]
    pub fn file_alignment(&self) -> u32 {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .map_or(0x200, |header| header.windows_fields.file_alignment)
        })
    }

    /// Section alignment from the optional header.
    #[must_use]
    pub fn section_alignment(&self) -> u32 {
        self.with_pe(|pe| {
            pe.header
                .optional_header
                .as_ref()
                .map_or(0x2000, |header| header.windows_fields.section_alignment)
        })
    }

    /// File offset of the `PE\0\0` signature.
    #[must_use]
    pub fn pe_signature_offset(&self) -> usize {
        self.with_pe(|pe| pe.header.dos_header.pe_pointer as usize)
    }

    /// File offset of the optional header.
    #[must_use]
    pub fn optional_header_offset(&self) -> usize {
        self.pe_signature_offset() + PE_FILE_HEADER_SIZE
    }

    /// File offset of the section table.
    #[must_use]
    pub fn section_table_offset(&self) -> usize {
        self.optional_header_offset()
            + self.with_pe(|pe| pe.header.coff_header.size_of_optional_header as usize)
    }

    /// Translate a relative virtual address into a file offset.
    ///
    /// # Arguments
    ///
    /// * `rva` - The RVA to resolve.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if no section maps the RVA onto raw data.
    pub fn rva_to_offset(&self, rva: usize) -> Result<usize> {
        self.with_pe(|pe| rva_to_offset(&pe.sections, rva))
    }
}

/// Resolve `rva` against a section table.
///
/// A section covers `VirtualSize` bytes from its virtual address (`SizeOfRawData` when the
/// virtual size is zero), and only the part backed by raw data resolves.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if no section covers the RVA.
pub fn rva_to_offset(sections: &[SectionTable], rva: usize) -> Result<usize> {
    let rva_u32 =
        u32::try_from(rva).map_err(|_| malformed_error!("RVA too large to fit in u32: {}", rva))?;

    for section in sections {
        let span = if section.virtual_size == 0 {
            section.size_of_raw_data
        } else {
            section.virtual_size
        };
        let Some(section_max) = section.virtual_address.checked_add(span) else {
            return Err(malformed_error!(
                "Section malformed, causing integer overflow - {} + {}",
                section.virtual_address,
                span
            ));
        };

        if section.virtual_address <= rva_u32 && section_max > rva_u32 {
            let delta = rva_u32 - section.virtual_address;
            if delta >= section.size_of_raw_data {
                return Err(malformed_error!(
                    "RVA 0x{:x} lies in the zero-filled tail of a section",
                    rva
                ));
            }

            return Ok(section.pointer_to_raw_data as usize + delta as usize);
        }
    }

    Err(malformed_error!(
        "RVA could not be converted to offset - {}",
        rva
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::identity::AssemblyVersion, ModuleBuilder};

    fn image() -> Vec<u8> {
        ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0)).to_bytes().unwrap()
    }

    #[test]
    fn empty_is_rejected() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Empty)));
    }

    #[test]
    fn non_pe_is_rejected() {
        assert!(matches!(
            File::from_mem(vec![0x42, 0x53, 0x4A, 0x42, 1, 2, 3, 4]),
            Err(GoblinErr(_))
        ));
    }

    #[test]
    fn headers_and_sections() {
        let file = File::from_mem(image()).unwrap();

        assert_eq!(&file.data()[..2], b"MZ");
        assert_eq!(file.pe_signature_offset(), 0x80);
        assert_eq!(&file.data()[0x80..0x84], b"PE\0\0");
        assert!(!file.is_pe32_plus());
        assert_eq!(file.file_alignment(), 0x200);

        let names: Vec<&str> = file.sections().map(|s| s.name().unwrap()).collect();
        assert_eq!(names, [".text", ".meta"]);

        let (clr_rva, clr_size) = file.clr().unwrap();
        assert_eq!(clr_size, 72);
        let offset = file.rva_to_offset(clr_rva).unwrap();
        assert_eq!(&file.data_slice(offset, 4).unwrap(), &72u32.to_le_bytes());
    }

    #[test]
    fn rva_translation() {
        let file = File::from_mem(image()).unwrap();
        let text = file.sections().next().unwrap().clone();

        assert_eq!(
            file.rva_to_offset(text.virtual_address as usize).unwrap(),
            text.pointer_to_raw_data as usize
        );
        assert_eq!(
            file.rva_to_offset(text.virtual_address as usize + 8).unwrap(),
            text.pointer_to_raw_data as usize + 8
        );
        assert!(file.rva_to_offset(0x10).is_err());
        assert!(file.rva_to_offset(usize::MAX).is_err());
    }

    #[test]
    fn slices() {
        let file = File::from_mem(image()).unwrap();
        let len = file.len();
        assert_eq!(file.data_slice(0, 2).unwrap(), b"MZ");
        assert!(file.data_slice(len - 1, 2).is_err());
        assert!(file.data_slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn physical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("LibA.dll");
        std::fs::write(&path, image()).unwrap();

        let file = File::from_file(&path).unwrap();
        assert_eq!(file.data(), image().as_slice());
        assert!(File::from_file(&dir.path().join("missing.dll")).is_err());
    }
}
