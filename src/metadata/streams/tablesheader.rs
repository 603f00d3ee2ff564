//! The `#~` stream header (ECMA-335 II.24.2.6).
//!
//! ```text
//! offset  size  field
//! 0       4     reserved (0)
//! 4       1     major version (2)
//! 5       1     minor version (0)
//! 6       1     heap sizes (0x01 #Strings, 0x02 #GUID, 0x04 #Blob use 4-byte indexes,
//!               0x40 four bytes of extra data follow the row counts)
//! 7       1     reserved (1)
//! 8       8     valid tables bit vector
//! 16      8     sorted tables bit vector
//! 24      4*n   row counts, one per valid table
//! ...           table rows, in table id order
//! ```
//!
//! Every table is located, since the start of a table is only known after summing the sizes
//! of all tables before it. The decoded tables are exposed as typed
//! [`crate::metadata::tables::MetadataTable`]s; every table, decoded or not, is also available
//! as its raw row bytes through [`TablesHeader::raw_table`] so a rewrite can carry it over.

use std::sync::Arc;
use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::read_le,
    metadata::tables::{
        impl_table_access, AssemblyRaw, AssemblyRefRaw, CustomAttributeRaw, MemberRefRaw,
        MetadataTable, ModuleRaw, ModuleRefRaw, TableAccess, TableData, TableId, TableInfo,
        TableInfoRef, TypeRefRaw,
    },
    Error, Result,
};

/// Heap size flag announcing four bytes of extra data after the row counts.
pub const HEAP_SIZE_EXTRA_DATA: u8 = 0x40;

/// The decoded `#~` stream of an image.
pub struct TablesHeader<'a> {
    /// Major version of the table schema
    pub major_version: u8,
    /// Minor version of the table schema
    pub minor_version: u8,
    /// Heap size flags
    pub heap_sizes: u8,
    /// Bit vector of present tables
    pub valid: u64,
    /// Bit vector of sorted tables
    pub sorted: u64,
    /// Row counts and column widths
    pub info: TableInfoRef,
    tables: Vec<Option<TableData<'a>>>,
    raw: Vec<Option<&'a [u8]>>,
}

impl<'a> TablesHeader<'a> {
    /// Parse the `#~` stream.
    ///
    /// # Arguments
    ///
    /// * `data` - The complete `#~` stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated data, [`crate::Error::Malformed`]
    /// if no table is present and [`crate::Error::Unsupported`] if tables beyond the
    /// ECMA-335 set are flagged as present.
    pub fn from(data: &'a [u8]) -> Result<TablesHeader<'a>> {
        if data.len() < 24 {
            return Err(out_of_bounds_error!());
        }

        let valid = read_le::<u64>(&data[8..])?;
        if valid == 0 {
            return Err(malformed_error!("No valid rows in any of the tables"));
        }

        if valid >> TableId::COUNT != 0 {
            return Err(Error::Unsupported(format!(
                "Tables beyond 0x{:02X} are present (valid = 0x{:016X})",
                TableId::COUNT - 1,
                valid
            )));
        }

        let info = Arc::new(TableInfo::new(data, valid)?);

        let mut tables_header = TablesHeader {
            major_version: read_le::<u8>(&data[4..])?,
            minor_version: read_le::<u8>(&data[5..])?,
            heap_sizes: read_le::<u8>(&data[6..])?,
            valid,
            sorted: read_le::<u64>(&data[16..])?,
            info,
            tables: Vec::with_capacity(TableId::COUNT),
            raw: vec![None; TableId::COUNT],
        };
        tables_header.tables.resize_with(TableId::COUNT, || None);

        let mut current_offset = 24 + valid.count_ones() as usize * 4;
        if tables_header.heap_sizes & HEAP_SIZE_EXTRA_DATA != 0 {
            current_offset += 4;
        }

        for table_id in TableId::iter() {
            let rows = tables_header.info.rows(table_id);
            if rows == 0 {
                continue;
            }

            let Some(size) = (table_id.row_size(&tables_header.info) as usize).checked_mul(rows as usize)
            else {
                return Err(out_of_bounds_error!());
            };
            let Some(end) = current_offset.checked_add(size) else {
                return Err(out_of_bounds_error!());
            };
            if end > data.len() {
                return Err(out_of_bounds_error!());
            }

            let table_data = &data[current_offset..end];
            if table_id.is_decoded() {
                tables_header.add_table(table_data, table_id, rows)?;
            }
            tables_header.raw[table_id as usize] = Some(table_data);
            current_offset = end;
        }

        Ok(tables_header)
    }

    /// The raw rows of `table_id`, laid out under [`TablesHeader::info`].
    ///
    /// Returns `None` for tables without rows.
    #[must_use]
    pub fn raw_table(&self, table_id: TableId) -> Option<&'a [u8]> {
        self.raw[table_id as usize]
    }

    /// Number of tables flagged as present.
    #[must_use]
    pub fn table_count(&self) -> u32 {
        self.valid.count_ones()
    }

    /// Whether `table_id` carries rows.
    #[must_use]
    pub fn has_table(&self, table_id: TableId) -> bool {
        self.info.rows(table_id) > 0
    }

    fn add_table(&mut self, data: &'a [u8], table_id: TableId, rows: u32) -> Result<()> {
        let info = self.info.clone();
        let table = match table_id {
            TableId::Module => TableData::Module(MetadataTable::new(data, rows, info)?),
            TableId::TypeRef => TableData::TypeRef(MetadataTable::new(data, rows, info)?),
            TableId::MemberRef => TableData::MemberRef(MetadataTable::new(data, rows, info)?),
            TableId::CustomAttribute => {
                TableData::CustomAttribute(MetadataTable::new(data, rows, info)?)
            }
            TableId::ModuleRef => TableData::ModuleRef(MetadataTable::new(data, rows, info)?),
            TableId::Assembly => TableData::Assembly(MetadataTable::new(data, rows, info)?),
            TableId::AssemblyRef => TableData::AssemblyRef(MetadataTable::new(data, rows, info)?),
            _ => return Err(malformed_error!("Table {} is not decoded", table_id)),
        };

        self.tables[table_id as usize] = Some(table);
        Ok(())
    }
}

impl_table_access!(ModuleRaw, TableId::Module, Module);
impl_table_access!(TypeRefRaw, TableId::TypeRef, TypeRef);
impl_table_access!(MemberRefRaw, TableId::MemberRef, MemberRef);
impl_table_access!(CustomAttributeRaw, TableId::CustomAttribute, CustomAttribute);
impl_table_access!(ModuleRefRaw, TableId::ModuleRef, ModuleRef);
impl_table_access!(AssemblyRaw, TableId::Assembly, Assembly);
impl_table_access!(AssemblyRefRaw, TableId::AssemblyRef, AssemblyRef);

#[cfg(test)]
mod tests {
    use super::*;

    fn header(valid: u64, rows: &[u32]) -> Vec<u8> {
        let mut data = vec![0u8; 24];
        data[4] = 2;
        data[7] = 1;
        data[8..16].copy_from_slice(&valid.to_le_bytes());
        for count in rows {
            data.extend_from_slice(&count.to_le_bytes());
        }
        data
    }

    #[test]
    fn module_and_reference() {
        let valid = TableId::Module.bit() | TableId::ModuleRef.bit();
        let mut data = header(valid, &[1, 1]);
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x06, 0x00]);

        let tables = TablesHeader::from(&data).unwrap();
        assert_eq!(tables.major_version, 2);
        assert_eq!(tables.table_count(), 2);
        assert!(tables.has_table(TableId::ModuleRef));
        assert!(!tables.has_table(TableId::AssemblyRef));

        let module: &MetadataTable<ModuleRaw> = tables.table().unwrap();
        assert_eq!(module.get(1).unwrap().mvid, 1);

        let module_refs: &MetadataTable<ModuleRefRaw> = tables.table().unwrap();
        assert_eq!(module_refs.get(1).unwrap().name, 6);

        let assembly_refs: Option<&MetadataTable<AssemblyRefRaw>> = tables.table();
        assert!(assembly_refs.is_none());
    }

    #[test]
    fn carries_undecoded_tables() {
        let valid = TableId::Module.bit() | TableId::TypeDef.bit() | TableId::AssemblyRef.bit();
        let mut data = header(valid, &[1, 2, 1]);
        data.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
        let type_defs: Vec<u8> = (0u8..28).collect();
        data.extend_from_slice(&type_defs);
        #[rustfmt::skip]
        data.extend_from_slice(&[
            1, 0, 0, 0, 0, 0, 0, 0, // version
            0, 0, 0, 0, // flags
            0, 0, // public key or token
            0x0A, 0, // name
            0, 0, // culture
            0, 0, // hash value
        ]);

        let tables = TablesHeader::from(&data).unwrap();
        assert_eq!(tables.raw_table(TableId::TypeDef).unwrap(), type_defs.as_slice());
        assert_eq!(tables.raw_table(TableId::Module).unwrap().len(), 10);
        assert!(tables.raw_table(TableId::MethodDef).is_none());

        let assembly_refs: &MetadataTable<AssemblyRefRaw> = tables.table().unwrap();
        assert_eq!(assembly_refs.get(1).unwrap().major_version, 1);
        assert_eq!(assembly_refs.get(1).unwrap().name, 0x0A);
    }

    #[test]
    fn extra_data_is_skipped() {
        let mut data = header(TableId::ModuleRef.bit(), &[1]);
        data[6] = HEAP_SIZE_EXTRA_DATA;
        data.extend_from_slice(&[0xEE; 4]);
        data.extend_from_slice(&[0x06, 0x00]);

        let tables = TablesHeader::from(&data).unwrap();
        let module_refs: &MetadataTable<ModuleRefRaw> = tables.table().unwrap();
        assert_eq!(module_refs.get(1).unwrap().name, 6);
    }

    #[test]
    fn rejects_unknown_tables() {
        let data = header(TableId::Module.bit() | (1 << 0x30), &[1, 1]);
        assert!(matches!(TablesHeader::from(&data), Err(Error::Unsupported(_))));
    }

    #[test]
    fn empty_and_truncated() {
        assert!(TablesHeader::from(&header(0, &[])).is_err());
        assert!(TablesHeader::from(&[0u8; 10]).is_err());

        let data = header(TableId::Module.bit(), &[1]);
        assert!(TablesHeader::from(&data).is_err());
    }
}
