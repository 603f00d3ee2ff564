use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::tables::{RowReadable, RowWritable, TableInfoRef},
    Result,
};

/// The row of the `Assembly` table (ECMA-335 II.22.2). Carries the identity of the module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyRaw {
    /// Row id
    pub rid: u32,
    /// A value of [`crate::metadata::tables::AssemblyHashAlgorithm`]
    pub hash_alg_id: u32,
    /// Major version
    pub major_version: u16,
    /// Minor version
    pub minor_version: u16,
    /// Build number
    pub build_number: u16,
    /// Revision number
    pub revision_number: u16,
    /// Bitmask of [`crate::metadata::tables::AssemblyFlags`]
    pub flags: u32,
    /// `#Blob` index of the public key, 0 if none
    pub public_key: u32,
    /// `#Strings` index of the simple name
    pub name: u32,
    /// `#Strings` index of the culture, 0 if neutral
    pub culture: u32,
}

impl RowReadable for AssemblyRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* hash_alg_id */     4 +
            /* major_version */   2 +
            /* minor_version */   2 +
            /* build_number */    2 +
            /* revision_number */ 2 +
            /* flags */           4 +
            /* public_key */      sizes.blob_bytes() +
            /* name */            sizes.str_bytes() +
            /* culture */         sizes.str_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(AssemblyRaw {
            rid,
            hash_alg_id: read_le_at::<u32>(data, offset)?,
            major_version: read_le_at::<u16>(data, offset)?,
            minor_version: read_le_at::<u16>(data, offset)?,
            build_number: read_le_at::<u16>(data, offset)?,
            revision_number: read_le_at::<u16>(data, offset)?,
            flags: read_le_at::<u32>(data, offset)?,
            public_key: read_le_at_dyn(data, offset, sizes.is_large_blob())?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            culture: read_le_at_dyn(data, offset, sizes.is_large_str())?,
        })
    }
}

impl RowWritable for AssemblyRaw {
    fn row_write(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        _rid: u32,
        sizes: &TableInfoRef,
    ) -> Result<()> {
        write_le_at(data, offset, self.hash_alg_id)?;
        write_le_at(data, offset, self.major_version)?;
        write_le_at(data, offset, self.minor_version)?;
        write_le_at(data, offset, self.build_number)?;
        write_le_at(data, offset, self.revision_number)?;
        write_le_at(data, offset, self.flags)?;
        write_le_at_dyn(data, offset, self.public_key, sizes.is_large_blob())?;
        write_le_at_dyn(data, offset, self.name, sizes.is_large_str())?;
        write_le_at_dyn(data, offset, self.culture, sizes.is_large_str())
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
            0x04, 0x80, 0x00, 0x00, // hash_alg_id
            0x01, 0x00, // major_version
            0x02, 0x00, // minor_version
            0x03, 0x00, // build_number
            0x04, 0x00, // revision_number
            0x01, 0x00, 0x00, 0x00, // flags
            0x07, 0x07, // public_key
            0x08, 0x08, // name
            0x00, 0x00, // culture
        ];

        let sizes = Arc::new(TableInfo::new_with(&[(TableId::Assembly, 1)], false, false, false));
        let table = MetadataTable::<AssemblyRaw>::new(&data, 1, sizes.clone()).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.hash_alg_id, 0x8004);
        assert_eq!(
            (row.major_version, row.minor_version, row.build_number, row.revision_number),
            (1, 2, 3, 4)
        );
        assert_eq!(row.flags, 1);
        assert_eq!(row.public_key, 0x0707);
        assert_eq!(row.name, 0x0808);
        assert_eq!(row.culture, 0);

        let mut written = vec![0u8; data.len()];
        row.row_write(&mut written, &mut 0, 1, &sizes).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn crafted_long() {
        let data = vec![
            0x04, 0x80, 0x00, 0x00, // hash_alg_id
            0x01, 0x00, // major_version
            0x02, 0x00, // minor_version
            0x03, 0x00, // build_number
            0x04, 0x00, // revision_number
            0x00, 0x00, 0x00, 0x00, // flags
            0x07, 0x07, 0x07, 0x07, // public_key
            0x08, 0x08, 0x08, 0x08, // name
            0x09, 0x09, 0x09, 0x09, // culture
        ];

        let sizes = Arc::new(TableInfo::new_with(&[(TableId::Assembly, 1)], true, true, true));
        let table = MetadataTable::<AssemblyRaw>::new(&data, 1, sizes).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.public_key, 0x0707_0707);
        assert_eq!(row.name, 0x0808_0808);
        assert_eq!(row.culture, 0x0909_0909);
    }
}
