use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::tables::{
        CodedIndex, CodedIndexType, RowReadable, RowWritable, TableInfoRef,
    },
    Result,
};

/// A row of the `CustomAttribute` table (ECMA-335 II.22.10).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomAttributeRaw {
    /// Row id
    pub rid: u32,
    /// `HasCustomAttribute` coded index of the owner
    pub parent: CodedIndex,
    /// `CustomAttributeType` coded index of the constructor
    pub constructor: CodedIndex,
    /// `#Blob` index of the encoded arguments
    pub value: u32,
}

impl RowReadable for CustomAttributeRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* parent */      sizes.coded_index_bytes(CodedIndexType::HasCustomAttribute) +
            /* constructor */ sizes.coded_index_bytes(CodedIndexType::CustomAttributeType) +
            /* value */       sizes.blob_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(CustomAttributeRaw {
            rid,
            parent: CodedIndex::read(data, offset, sizes, CodedIndexType::HasCustomAttribute)?,
            constructor: CodedIndex::read(
                data,
                offset,
                sizes,
                CodedIndexType::CustomAttributeType,
            )?,
            value: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
        })
    }
}

impl RowWritable for CustomAttributeRaw {
    fn row_write(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        _rid: u32,
        sizes: &TableInfoRef,
    ) -> Result<()> {
        self.parent
            .write(data, offset, sizes, CodedIndexType::HasCustomAttribute)?;
        self.constructor
            .write(data, offset, sizes, CodedIndexType::CustomAttributeType)?;
        write_le_at_dyn(data, offset, self.value, sizes.is_large_blob())
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
            0x2E, 0x00, // parent (Assembly, row 1)
            0x0B, 0x00, // constructor (MemberRef, row 1)
            0x05, 0x00, // value
        ];

        let sizes = Arc::new(TableInfo::new_with(
            &[(TableId::CustomAttribute, 1)],
            false,
            false,
            false,
        ));
        let table = MetadataTable::<CustomAttributeRaw>::new(&data, 1, sizes.clone()).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.parent, CodedIndex::new(TableId::Assembly, 1));
        assert_eq!(row.constructor, CodedIndex::new(TableId::MemberRef, 1));
        assert_eq!(row.value, 5);

        let mut written = vec![0u8; data.len()];
        row.row_write(&mut written, &mut 0, 1, &sizes).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn crafted_long() {
        let data = vec![
            0x2E, 0x00, 0x00, 0x00, // parent (Assembly, row 1)
            0x0B, 0x00, // constructor (MemberRef, row 1)
            0x05, 0x00, 0x00, 0x00, // value
        ];

        // 0x1000 TypeRef rows need 13 bits, plus 5 tag bits
        let sizes = Arc::new(TableInfo::new_with(
            &[(TableId::CustomAttribute, 1), (TableId::TypeRef, 0x1000)],
            false,
            true,
            false,
        ));
        let table = MetadataTable::<CustomAttributeRaw>::new(&data, 1, sizes).unwrap();
        assert_eq!(table.row_size(), 10);
        let row = table.get(1).unwrap();
        assert_eq!(row.parent, CodedIndex::new(TableId::Assembly, 1));
        assert_eq!(row.value, 5);
    }
}
