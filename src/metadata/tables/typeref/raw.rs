use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::tables::{
        CodedIndex, CodedIndexType, RowReadable, RowWritable, TableInfoRef,
    },
    Result,
};

/// A row of the `TypeRef` table (ECMA-335 II.22.38).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeRefRaw {
    /// Row id
    pub rid: u32,
    /// `ResolutionScope` coded index
    pub resolution_scope: CodedIndex,
    /// `#Strings` index of the type name
    pub type_name: u32,
    /// `#Strings` index of the namespace
    pub type_namespace: u32,
}

impl RowReadable for TypeRefRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* resolution_scope */ sizes.coded_index_bytes(CodedIndexType::ResolutionScope) +
            /* type_name */        sizes.str_bytes() +
            /* type_namespace */   sizes.str_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(TypeRefRaw {
            rid,
            resolution_scope: CodedIndex::read(
                data,
                offset,
                sizes,
                CodedIndexType::ResolutionScope,
            )?,
            type_name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            type_namespace: read_le_at_dyn(data, offset, sizes.is_large_str())?,
        })
    }
}

impl RowWritable for TypeRefRaw {
    fn row_write(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        _rid: u32,
        sizes: &TableInfoRef,
    ) -> Result<()> {
        self.resolution_scope
            .write(data, offset, sizes, CodedIndexType::ResolutionScope)?;
        write_le_at_dyn(data, offset, self.type_name, sizes.is_large_str())?;
        write_le_at_dyn(data, offset, self.type_namespace, sizes.is_large_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metadata::tables::{MetadataTable, TableId, TableInfo};

    #[test]
    fn crafted_short() {
        let data = vec![
            0x0A, 0x00, // resolution_scope (AssemblyRef, row 2)
            0x03, 0x03, // type_name
            0x04, 0x04, // type_namespace
        ];

        let sizes = Arc::new(TableInfo::new_with(&[(TableId::TypeRef, 1)], false, false, false));
        let table = MetadataTable::<TypeRefRaw>::new(&data, 1, sizes.clone()).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.resolution_scope, CodedIndex::new(TableId::AssemblyRef, 2));
        assert_eq!(row.type_name, 0x0303);
        assert_eq!(row.type_namespace, 0x0404);

        let mut written = vec![0u8; data.len()];
        row.row_write(&mut written, &mut 0, 1, &sizes).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn crafted_long() {
        let data = vec![
            0x0A, 0x00, 0x00, 0x00, // resolution_scope (AssemblyRef, row 2)
            0x03, 0x03, 0x03, 0x03, // type_name
            0x04, 0x04, 0x04, 0x04, // type_namespace
        ];

        let sizes = Arc::new(TableInfo::new_with(
            &[(TableId::TypeRef, 1), (TableId::AssemblyRef, u32::from(u16::MAX) + 2)],
            true,
            true,
            true,
        ));
        let table = MetadataTable::<TypeRefRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.resolution_scope, CodedIndex::new(TableId::AssemblyRef, 2));
        assert_eq!(row.type_name, 0x0303_0303);
    }
}
