//! Row counts and index widths of a `#~` stream.
//!
//! The width of every heap index and coded index column depends on the size of the heaps and
//! on the row counts of the tables the index can point into (ECMA-335 II.24.2.6).
//! [`crate::metadata::tables::TableInfo`] captures these inputs once per image so that every
//! row reader and writer can compute its own layout.

use std::sync::Arc;
use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::{read_le, read_le_at},
    metadata::tables::types::{CodedIndexType, TableId},
    Result,
};

/// Row count of one table plus the number of bits needed to address its rows.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct TableRowInfo {
    /// Number of rows
    pub rows: u32,
    /// Bits needed to store a 1-based row index into this table
    pub bits: u8,
}

impl TableRowInfo {
    /// Create the row info for a table with `rows` rows.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            // 32 - leading_zeros is at most 32
            (32 - rows.leading_zeros()) as u8
        };

        Self { rows, bits }
    }
}

/// Layout inputs for all tables of one `#~` stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_indexes: Vec<u8>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

/// Shared handle to a [`TableInfo`].
pub type TableInfoRef = Arc<TableInfo>;

impl TableInfo {
    /// Read the row counts following the fixed 24-byte `#~` header.
    ///
    /// ## Arguments
    /// * `data`  - The `#~` stream, starting at its header
    /// * `valid` - The bit vector of present tables
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the row count array is truncated.
    pub fn new(data: &[u8], valid: u64) -> Result<Self> {
        if data.len() < 24 {
            return Err(out_of_bounds_error!());
        }

        let mut rows = Vec::with_capacity(TableId::COUNT);
        let mut next_row_offset = 24;
        for table_id in TableId::iter() {
            if valid & table_id.bit() == 0 {
                rows.push((table_id, 0));
                continue;
            }

            rows.push((table_id, read_le_at::<u32>(data, &mut next_row_offset)?));
        }

        let heap_size_flags = read_le::<u8>(&data[6..])?;
        Ok(Self::new_with(
            &rows,
            heap_size_flags & 0x01 == 0x01,
            heap_size_flags & 0x04 == 0x04,
            heap_size_flags & 0x02 == 0x02,
        ))
    }

    /// Build the layout from explicit row counts and heap widths.
    ///
    /// Tables not listed have zero rows.
    #[must_use]
    pub fn new_with(
        tables: &[(TableId, u32)],
        large_str: bool,
        large_blob: bool,
        large_guid: bool,
    ) -> Self {
        let mut table_info = TableInfo {
            rows: vec![TableRowInfo::default(); TableId::COUNT],
            coded_indexes: vec![0; CodedIndexType::COUNT],
            is_large_index_str: large_str,
            is_large_index_guid: large_guid,
            is_large_index_blob: large_blob,
        };

        for (table_id, rows) in tables {
            table_info.rows[*table_id as usize] = TableRowInfo::new(*rows);
        }

        table_info.calculate_coded_index_bits();
        table_info
    }

    /// Split a raw coded index value into the target table and the row.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the tag does not name a table of the coded
    /// index type.
    pub fn decode_coded_index(
        &self,
        value: u32,
        coded_index_type: CodedIndexType,
    ) -> Result<(TableId, u32)> {
        let tables = coded_index_type.tables();
        let tag_bits = coded_index_type.tag_bits();
        let tag_mask = (1 << tag_bits) - 1;

        let tag = value & tag_mask;
        let index = value >> tag_bits;

        if tag as usize >= tables.len() {
            return Err(out_of_bounds_error!());
        }

        Ok((tables[tag as usize], index))
    }

    /// Number of rows of `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize].rows
    }

    /// Whether a simple index into `table` is 4 bytes wide.
    ///
    /// Simple indexes switch to 4 bytes once the table holds 2^16 rows or more.
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows[table as usize].bits > 16
    }

    /// Width of a simple index column into `table`.
    #[must_use]
    pub fn table_index_bytes(&self, table: TableId) -> u8 {
        if self.is_large(table) {
            4
        } else {
            2
        }
    }

    /// Whether `#Strings` indexes are 4 bytes wide.
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.is_large_index_str
    }

    /// Whether `#GUID` indexes are 4 bytes wide.
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.is_large_index_guid
    }

    /// Whether `#Blob` indexes are 4 bytes wide.
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.is_large_index_blob
    }

    /// Width of a `#Strings` index column.
    #[must_use]
    pub fn str_bytes(&self) -> u8 {
        if self.is_large_index_str {
            4
        } else {
            2
        }
    }

    /// Width of a `#GUID` index column.
    #[must_use]
    pub fn guid_bytes(&self) -> u8 {
        if self.is_large_index_guid {
            4
        } else {
            2
        }
    }

    /// Width of a `#Blob` index column.
    #[must_use]
    pub fn blob_bytes(&self) -> u8 {
        if self.is_large_index_blob {
            4
        } else {
            2
        }
    }

    /// Whether a coded index column of this type is 4 bytes wide.
    #[must_use]
    pub fn is_large_coded(&self, coded_index_type: CodedIndexType) -> bool {
        self.coded_indexes[coded_index_type as usize] > 16
    }

    /// Width of a coded index column of this type.
    #[must_use]
    pub fn coded_index_bytes(&self, coded_index_type: CodedIndexType) -> u8 {
        if self.is_large_coded(coded_index_type) {
            4
        } else {
            2
        }
    }

    fn calculate_coded_index_bits(&mut self) {
        for coded_index in CodedIndexType::iter() {
            let max_bits = coded_index
                .tables()
                .iter()
                .map(|table| self.rows[*table as usize].bits)
                .max()
                .unwrap_or(1);

            self.coded_indexes[coded_index as usize] = max_bits + coded_index.tag_bits();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_bits() {
        assert_eq!(TableRowInfo::new(0).bits, 1);
        assert_eq!(TableRowInfo::new(1).bits, 1);
        assert_eq!(TableRowInfo::new(0x3FFF).bits, 14);
        assert_eq!(TableRowInfo::new(0x4000).bits, 15);
    }

    #[test]
    fn small_and_large_coded_indexes() {
        let info = TableInfo::new_with(&[(TableId::TypeRef, 10)], false, false, false);
        assert_eq!(info.coded_index_bytes(CodedIndexType::ResolutionScope), 2);
        assert_eq!(info.coded_index_bytes(CodedIndexType::HasCustomAttribute), 2);

        // ResolutionScope uses 2 tag bits, 0x4000 rows need 15 bits
        let info = TableInfo::new_with(&[(TableId::AssemblyRef, 0x4000)], true, true, true);
        assert_eq!(info.coded_index_bytes(CodedIndexType::ResolutionScope), 4);
        assert_eq!(info.coded_index_bytes(CodedIndexType::CustomAttributeType), 2);
        assert_eq!(info.str_bytes(), 4);
        assert_eq!(info.blob_bytes(), 4);
        assert_eq!(info.guid_bytes(), 4);
    }

    #[test]
    fn simple_index_widths() {
        let info = TableInfo::new_with(
            &[(TableId::Field, 0xFFFF), (TableId::MethodDef, 0x1_0000)],
            false,
            false,
            false,
        );
        assert_eq!(info.table_index_bytes(TableId::Field), 2);
        assert_eq!(info.table_index_bytes(TableId::MethodDef), 4);
        assert_eq!(info.table_index_bytes(TableId::Param), 2);
        assert_eq!(info.coded_index_bytes(CodedIndexType::MethodDefOrRef), 4);
        assert_eq!(info.coded_index_bytes(CodedIndexType::HasConstant), 4);
        assert_eq!(info.coded_index_bytes(CodedIndexType::TypeDefOrRef), 2);
    }

    #[test]
    fn read_row_counts() {
        let mut data = vec![0u8; 24];
        data[6] = 0x04;
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&3u32.to_le_bytes());

        let valid = TableId::Module.bit() | TableId::AssemblyRef.bit();
        let info = TableInfo::new(&data, valid).unwrap();
        assert_eq!(info.rows(TableId::Module), 1);
        assert_eq!(info.rows(TableId::AssemblyRef), 3);
        assert_eq!(info.rows(TableId::TypeRef), 0);
        assert!(info.is_large_blob());
        assert!(!info.is_large_str());

        assert!(TableInfo::new(&data[..26], valid).is_err());
    }

    #[test]
    fn decode() {
        let info = TableInfo::new_with(&[], false, false, false);
        // ResolutionScope: tag 2 = AssemblyRef
        assert_eq!(
            info.decode_coded_index((5 << 2) | 2, CodedIndexType::ResolutionScope)
                .unwrap(),
            (TableId::AssemblyRef, 5)
        );
        // MemberRefParent has 5 tables, tag 7 is invalid
        assert!(info
            .decode_coded_index(7, CodedIndexType::MemberRefParent)
            .is_err());
    }
}
