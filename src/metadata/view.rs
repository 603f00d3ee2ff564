//! Read-only, zero-copy view over a module image.
//!
//! [`ModuleView`] owns the underlying [`crate::File`] (memory mapped or in memory) and keeps
//! the decoded CLI header, metadata root, `#~` tables and heaps borrowing from it. Locations
//! in the CLI header are RVAs; they are resolved through the PE section table of the file
//! before any metadata is touched. It is the entry point for everything that reads an image:
//!
//! - [`ModuleView::record`] converts the image into an owned [`crate::ModuleRecord`]
//! - [`ModuleView::signature`] / [`ModuleView::signature_range`] expose the strong name
//!   signature slot for verification
//!
//! # Examples
//!
//! ```rust,no_run
//! use strongnamer::metadata::view::ModuleView;
//! use std::path::Path;
//!
//! let view = ModuleView::from_file(Path::new("bin/LibA.dll"))?;
//! println!("metadata version {}", view.root().version);
//! for (table, rows) in view.table_rows() {
//!     println!("{table}: {rows} rows");
//! }
//! # Ok::<(), strongnamer::Error>(())
//! ```

use ouroboros::self_referencing;
use std::{ops::Range, path::Path};
use strum::IntoEnumIterator;

use crate::{
    file::File,
    metadata::{
        cor20header::{Cor20Header, COR20_HEADER_SIZE},
        record::ModuleRecord,
        root::Root,
        streams::{Blob, Guid, Strings, TablesHeader},
        tables::{AssemblyRaw, MetadataTable, ModuleRaw, TableAccess, TableId},
    },
    Error, Result,
};

/// The decoded parts of an image, borrowing from its bytes.
pub struct ModuleViewData<'a> {
    /// The complete image
    pub data: &'a [u8],
    /// The CLI header
    pub header: Cor20Header,
    /// File offset of the CLI header
    pub header_offset: usize,
    /// File offset of the metadata root
    pub metadata_offset: usize,
    /// File range of the strong name signature slot, if the image has one
    pub signature_range: Option<Range<usize>>,
    /// The metadata root
    pub root: Root,
    /// The `#~` stream
    pub tables: TablesHeader<'a>,
    /// The raw `#Strings` heap
    pub string_heap: &'a [u8],
    /// The `#Strings` heap
    pub strings: Strings<'a>,
    /// The raw `#US` heap
    pub user_strings: &'a [u8],
    /// The raw `#GUID` heap
    pub guid_heap: &'a [u8],
    /// The `#GUID` heap
    pub guids: Option<Guid<'a>>,
    /// The raw `#Blob` heap
    pub blob_heap: &'a [u8],
    /// The `#Blob` heap
    pub blobs: Option<Blob<'a>>,
}

impl<'a> ModuleViewData<'a> {
    /// Decode the managed parts of `file`.
    ///
    /// # Arguments
    ///
    /// * `file` - A PE image carrying a CLI header.
    ///
    /// # Errors
    ///
    /// Returns an error if a location does not resolve into the image, the metadata is
    /// malformed, or the image uses a metadata layout a rewrite cannot carry
    /// ([`crate::Error::Unsupported`]).
    pub fn parse(file: &'a File) -> Result<Self> {
        let data = file.data();

        let (clr_rva, clr_size) = file.clr()?;
        if clr_size < COR20_HEADER_SIZE {
            return Err(malformed_error!(
                "CLR header directory is too small - {} bytes",
                clr_size
            ));
        }
        let header_offset = file.rva_to_offset(clr_rva)?;
        let header = Cor20Header::read(file.data_slice(header_offset, COR20_HEADER_SIZE)?)?;

        let metadata_offset = file.rva_to_offset(header.meta_data_rva as usize)?;
        let metadata_slice = file.data_slice(metadata_offset, header.meta_data_size as usize)?;

        let signature_range = if header.strong_name_signature_rva == 0 {
            None
        } else {
            let start = file.rva_to_offset(header.strong_name_signature_rva as usize)?;
            let size = header.strong_name_signature_size as usize;
            if file.data_slice(start, size).is_err() {
                return Err(malformed_error!(
                    "Strong name signature slot 0x{:X}+0x{:X} exceeds the image",
                    start,
                    size
                ));
            }
            Some(start..start + size)
        };

        let root = Root::read(metadata_slice)?;

        let mut tables = None;
        let mut string_heap: &'a [u8] = &[];
        let mut strings = None;
        let mut user_strings: &'a [u8] = &[];
        let mut guid_heap: &'a [u8] = &[];
        let mut guids = None;
        let mut blob_heap: &'a [u8] = &[];
        let mut blobs = None;

        for stream in &root.stream_headers {
            let start = stream.offset as usize;
            let Some(stream_data) = metadata_slice.get(start..start + stream.size as usize) else {
                return Err(malformed_error!(
                    "Stream {} exceeds the metadata - 0x{:X}+0x{:X}",
                    stream.name,
                    start,
                    stream.size
                ));
            };

            match stream.name.as_str() {
                "#~" => tables = Some(TablesHeader::from(stream_data)?),
                "#Strings" => {
                    string_heap = stream_data;
                    strings = Some(Strings::from(stream_data)?);
                }
                "#US" => user_strings = stream_data,
                "#GUID" => {
                    guid_heap = stream_data;
                    guids = Some(Guid::from(stream_data)?);
                }
                "#Blob" => {
                    blob_heap = stream_data;
                    blobs = Some(Blob::from(stream_data)?);
                }
                "#-" => {
                    return Err(Error::Unsupported(
                        "Uncompressed (#-) metadata tables cannot be rewritten".to_string(),
                    ))
                }
                other => {
                    return Err(Error::Unsupported(format!(
                        "Metadata stream {other} cannot be rewritten"
                    )))
                }
            }
        }

        let Some(tables) = tables else {
            return Err(malformed_error!("Image has no #~ stream"));
        };
        let Some(strings) = strings else {
            return Err(malformed_error!("Image has no #Strings heap"));
        };

        Ok(ModuleViewData {
            data,
            header,
            header_offset,
            metadata_offset,
            signature_range,
            root,
            tables,
            string_heap,
            strings,
            user_strings,
            guid_heap,
            guids,
            blob_heap,
            blobs,
        })
    }

    /// String at `index`, `None` for the null index.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds.
    pub fn string_at(&self, index: u32) -> Result<Option<&'a str>> {
        if index == 0 {
            return Ok(None);
        }
        Ok(Some(self.strings.get(index as usize)?))
    }

    /// GUID at the 1-based `index`, `None` for the null index.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds or the heap is missing.
    pub fn guid_at(&self, index: u32) -> Result<Option<uguid::Guid>> {
        if index == 0 {
            return Ok(None);
        }
        match &self.guids {
            Some(guids) => Ok(Some(guids.get(index as usize)?)),
            None => Err(malformed_error!("GUID index {} without a #GUID heap", index)),
        }
    }

    /// Blob at `index`, empty for the null index.
    ///
    /// # Errors
    /// Returns an error if the index is out of bounds or the heap is missing.
    pub fn blob_at(&self, index: u32) -> Result<&'a [u8]> {
        if index == 0 {
            return Ok(&[]);
        }
        match &self.blobs {
            Some(blobs) => blobs.get(index as usize),
            None => Err(malformed_error!("Blob index {} without a #Blob heap", index)),
        }
    }
}

#[self_referencing]
/// An image together with its decoded view.
pub struct ModuleView {
    file: File,

    #[borrows(file)]
    #[not_covariant]
    data: ModuleViewData<'this>,
}

impl ModuleView {
    /// Memory map and decode the image at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid image.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::load(File::from_file(path)?)
    }

    /// Decode an image held in memory.
    ///
    /// # Errors
    /// Returns an error if `data` is not a valid image.
    pub fn from_mem(data: Vec<u8>) -> Result<Self> {
        Self::load(File::from_mem(data)?)
    }

    fn load(file: File) -> Result<Self> {
        ModuleView::try_new(file, |file| ModuleViewData::parse(file))
    }

    /// The CLI header.
    #[must_use]
    pub fn header(&self) -> &Cor20Header {
        self.with_data(|data| &data.header)
    }

    /// The metadata root.
    #[must_use]
    pub fn root(&self) -> &Root {
        self.with_data(|data| &data.root)
    }

    /// The complete image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.borrow_file().data()
    }

    /// The PE container of the image.
    #[must_use]
    pub fn file(&self) -> &File {
        self.borrow_file()
    }

    /// Row counts of all tables carrying rows.
    #[must_use]
    pub fn table_rows(&self) -> Vec<(TableId, u32)> {
        self.with_data(|data| {
            TableId::iter()
                .filter(|id| data.tables.has_table(*id))
                .map(|id| (id, data.tables.info.rows(id)))
                .collect()
        })
    }

    /// Rows of `table` exactly as the image stores them.
    #[must_use]
    pub fn raw_table(&self, table: TableId) -> Option<&[u8]> {
        self.with_data(|data| data.tables.raw_table(table))
    }

    /// File range of the strong name signature slot.
    #[must_use]
    pub fn signature_range(&self) -> Option<Range<usize>> {
        self.with_data(|data| data.signature_range.clone())
    }

    /// The content of the strong name signature slot.
    #[must_use]
    pub fn signature(&self) -> Option<&[u8]> {
        let range = self.signature_range()?;
        self.data().get(range)
    }

    /// The module version id of the `Module` row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if there is no `Module` row or it has no version id.
    pub fn fingerprint(&self) -> Result<uguid::Guid> {
        self.with_data(|data| {
            let table: Option<&MetadataTable<ModuleRaw>> = data.tables.table();
            let Some(row) = table.and_then(|table| table.get(1)) else {
                return Err(malformed_error!("Image has no Module row"));
            };

            data.guid_at(row.mvid)?
                .ok_or_else(|| malformed_error!("Module row has no version id"))
        })
    }

    /// The public key of the `Assembly` row, `None` if the module has no strong name.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob index of the key is invalid.
    pub fn public_key(&self) -> Result<Option<Vec<u8>>> {
        self.with_data(|data| {
            let table: Option<&MetadataTable<AssemblyRaw>> = data.tables.table();
            let Some(row) = table.and_then(|table| table.get(1)) else {
                return Ok(None);
            };

            let public_key = data.blob_at(row.public_key)?;
            Ok((!public_key.is_empty()).then(|| public_key.to_vec()))
        })
    }

    /// Convert the image into an owned, mutable [`ModuleRecord`].
    ///
    /// # Errors
    /// Returns an error if a heap index is invalid or the image lacks a module or assembly row.
    pub fn record(&self) -> Result<ModuleRecord> {
        self.with_data(|data| ModuleRecord::from_view(data))
    }
}

impl std::fmt::Debug for ModuleView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleView")
            .field("len", &self.data().len())
            .field("header", self.header())
            .finish()
    }
}

impl TryFrom<Vec<u8>> for ModuleView {
    type Error = Error;

    fn try_from(data: Vec<u8>) -> Result<Self> {
        ModuleView::from_mem(data)
    }
}
