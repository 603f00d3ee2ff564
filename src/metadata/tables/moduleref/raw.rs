use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::tables::{RowReadable, RowWritable, TableInfoRef},
    Result,
};

/// A row of the `ModuleRef` table (ECMA-335 II.22.31).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleRefRaw {
    /// Row id
    pub rid: u32,
    /// `#Strings` index of the referenced module name
    pub name: u32,
}

impl RowReadable for ModuleRefRaw {
    fn row_size(sizes: &TableInfoRef) -> u32 {
        u32::from(sizes.str_bytes())
    }

    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self> {
        Ok(ModuleRefRaw {
            rid,
            name: read_le_at_dyn(data, offset, sizes.is_large_str())?,
        })
    }
}

impl RowWritable for ModuleRefRaw {
    fn row_write(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        _rid: u32,
        sizes: &TableInfoRef,
    ) -> Result<()> {
        write_le_at_dyn(data, offset, self.name, sizes.is_large_str())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::metadata::tables::{MetadataTable, TableId, TableInfo};

    #[test]
    fn crafted() {
        let data = vec![0x01, 0x01, 0x02, 0x02];

        let sizes = Arc::new(TableInfo::new_with(&[(TableId::ModuleRef, 2)], false, false, false));
        let table = MetadataTable::<ModuleRefRaw>::new(&data, 2, sizes).unwrap();

        let rows: Vec<ModuleRefRaw> = table.iter().map(|row| row.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, 0x0101);
        assert_eq!(rows[1].rid, 2);
        assert_eq!(rows[1].name, 0x0202);
    }
}
