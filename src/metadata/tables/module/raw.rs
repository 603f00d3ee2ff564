use crate::{
    file::io::{read_le_at, read_le_at_dyn, write_le_at, write_le_at_dyn},
    metadata::tables::{RowReadable, RowWritable, TableInfoRef},
    Result,
};

/// A row of the `Module` table (ECMA-335 II.22.30). Images carry exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRaw {
    /// Row id
    pub rid: u32,
    /// Reserved, always 0
    pub generation: u16,
    /// `#Strings` index of the module file name
    pub name: u32,
    /// `#GUID` index of the module version id
    pub mvid: u32,
    /// `#GUID` index, reserved
    pub encid: u32,
    /// `#GUID` index, reserved
    pub encbaseid: u32,
}

impl RowReadable for ModuleRaw {
    #[rustfmt::skip]
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(
            /* generation */ 2 +
            /* name */       sizes.str_bytes() +
            /* mvid */       sizes.guid_bytes() +
            /* encid */      sizes.guid_bytes() +
            /* encbaseid */  sizes.guid_bytes()
        )
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(ModuleRaw {
            rid,
            generation: read_le_at::<u16>(data, offset)?,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
            mvid: read_le_at_dyn(data, offset, sizes.is_large_guid())?,
            encid: read_le_at_dyn(data, offset, sizes.is_large_guid())?,
            encbaseid: read_le_at_dyn(data, offset, sizes.is_large_guid())?,
        })
    }
}

impl RowWritable for ModuleRaw {
    fn row_write(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        _rid: u32,
        sizes: &TableInfoRef,
    ) -> Result<()> {
        write_le_at(data, offset, self.generation)?;
        write_le_at_dyn(data, offset, self.name, sizes.is_large_str())?;
        write_le_at_dyn(data, offset, self.mvid, sizes.is_large_guid())?;
        write_le_at_dyn(data, offset, self.encid, sizes.is_large_guid())?;
        write_le_at_dyn(data, offset, self.encbaseid, sizes.is_large_guid())
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
            0x00, 0x00, // generation
            0x02, 0x02, // name
            0x01, 0x00, // mvid
            0x00, 0x00, // encid
            0x00, 0x00, // encbaseid
        ];

        let sizes = Arc::new(TableInfo::new_with(&[(TableId::Module, 1)], false, false, false));
        let table = MetadataTable::<ModuleRaw>::new(&data, 1, sizes.clone()).unwrap();
        let row = table.get(1).unwrap();
        assert_eq!(row.name, 0x0202);
        assert_eq!(row.mvid, 1);

        let mut written = vec![0u8; data.len()];
        row.row_write(&mut written, &mut 0, 1, &sizes).unwrap();
        assert_eq!(written, data);
    }

    #[test]
    fn crafted_long() {
        let data = vec![
            0x00, 0x00, // generation
            0x02, 0x02, 0x02, 0x02, // name
            0x01, 0x00, 0x00, 0x00, // mvid
            0x00, 0x00, 0x00, 0x00, // encid
            0x00, 0x00, 0x00, 0x00, // encbaseid
        ];

        let sizes = Arc::new(TableInfo::new_with(&[(TableId::Module, 1)], true, true, true));
        let table = MetadataTable::<ModuleRaw>::new(&data, 1, sizes).unwrap();
        assert_eq!(table.row_size(), 18);

        let row = table.get(1).unwrap();
        assert_eq!(row.name, 0x0202_0202);
        assert_eq!(row.mvid, 1);
        assert!(table.get(2).is_none());
    }
}
