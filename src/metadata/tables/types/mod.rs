//! Generic table infrastructure.
//!
//! - [`MetadataTable`] is a typed, zero-copy view over the rows of one table
//! - [`TableInfo`] describes row counts and column widths of an image
//! - [`CodedIndex`] / [`CodedIndexType`] decode and encode multi-table references
//! - [`RowReadable`] / [`RowWritable`] are implemented by every decoded row type
//! - [`Column`] / [`transcode`] size and re-encode the rows of every other table

mod common;
mod read;
mod schema;
mod tableid;
mod tableinfo;
mod write;

use std::marker::PhantomData;

pub use common::{CodedIndex, CodedIndexType};
pub(crate) use read::impl_table_access;
pub use read::{RowReadable, TableAccess};
pub use schema::{transcode, Column};
pub use tableid::TableId;
pub use tableinfo::{TableInfo, TableInfoRef, TableRowInfo};
pub use write::RowWritable;

use crate::{
    metadata::tables::{
        AssemblyRaw, AssemblyRefRaw, CustomAttributeRaw, MemberRefRaw, ModuleRaw, ModuleRefRaw,
        TypeRefRaw,
    },
    Result,
};

/// One decoded table of an image, tagged by row type.
pub enum TableData<'a> {
    /// `Module` (0x00)
    Module(MetadataTable<'a, ModuleRaw>),
    /// `TypeRef` (0x01)
    TypeRef(MetadataTable<'a, TypeRefRaw>),
    /// `MemberRef` (0x0A)
    MemberRef(MetadataTable<'a, MemberRefRaw>),
    /// `CustomAttribute` (0x0C)
    CustomAttribute(MetadataTable<'a, CustomAttributeRaw>),
    /// `ModuleRef` (0x1A)
    ModuleRef(MetadataTable<'a, ModuleRefRaw>),
    /// `Assembly` (0x20)
    Assembly(MetadataTable<'a, AssemblyRaw>),
    /// `AssemblyRef` (0x23)
    AssemblyRef(MetadataTable<'a, AssemblyRefRaw>),
}

/// A typed view over the rows of one metadata table.
///
/// Rows are decoded on access; the table itself only borrows the stream data.
pub struct MetadataTable<'a, T> {
    data: &'a [u8],
    row_count: u32,
    row_size: u32,
    sizes: TableInfoRef,
    _phantom: PhantomData<T>,
}

impl<'a, T: RowReadable> MetadataTable<'a, T> {
    /// Create a table view over `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `row_count` rows.
    pub fn new(data: &'a [u8], row_count: u32, sizes: TableInfoRef) -> Result<Self> {
        let row_size = T::row_size(&sizes);
        let size = u64::from(row_count) * u64::from(row_size);
        if size > data.len() as u64 {
            return Err(out_of_bounds_error!());
        }

        Ok(MetadataTable {
            data,
            row_count,
            row_size,
            sizes,
            _phantom: PhantomData,
        })
    }

    /// Total size of the table in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        u64::from(self.row_count) * u64::from(self.row_size)
    }

    /// Size of one row in bytes.
    #[must_use]
    pub fn row_size(&self) -> u32 {
        self.row_size
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Decode the row with the 1-based id `index`.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<T> {
        if index == 0 || self.row_count < index {
            return None;
        }

        T::row_read(
            self.data,
            &mut ((index as usize - 1) * self.row_size as usize),
            index,
            &self.sizes,
        )
        .ok()
    }

    /// Iterate over all rows in order.
    #[must_use]
    pub fn iter(&'a self) -> TableIterator<'a, T> {
        TableIterator {
            table: self,
            current_row: 0,
            current_offset: 0,
        }
    }
}

impl<'a, T: RowReadable> IntoIterator for &'a MetadataTable<'a, T> {
    type Item = Result<T>;
    type IntoIter = TableIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the rows of a [`MetadataTable`].
///
/// Yields a `Result` per row; a decoding error ends the iteration after being reported.
pub struct TableIterator<'a, T> {
    table: &'a MetadataTable<'a, T>,
    current_row: u32,
    current_offset: usize,
}

impl<T: RowReadable> Iterator for TableIterator<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_row >= self.table.row_count {
            return None;
        }

        let row = T::row_read(
            self.table.data,
            &mut self.current_offset,
            self.current_row + 1,
            &self.table.sizes,
        );
        self.current_row = match row {
            Ok(_) => self.current_row + 1,
            Err(_) => self.table.row_count,
        };

        Some(row)
    }
}
