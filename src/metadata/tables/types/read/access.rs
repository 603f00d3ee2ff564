use crate::metadata::tables::{MetadataTable, RowReadable};

/// Typed access to one table of a [`crate::metadata::streams::TablesHeader`].
pub trait TableAccess<'a, T: RowReadable> {
    /// Returns the table for row type `T`, if the image carries rows for it.
    fn table(&'a self) -> Option<&'a MetadataTable<'a, T>>;
}

/// Implements [`TableAccess`] for one row type by matching its [`crate::metadata::tables::TableData`] variant.
macro_rules! impl_table_access {
    ($raw:ty, $id:expr, $variant:ident) => {
        impl<'a> TableAccess<'a, $raw> for TablesHeader<'a> {
            fn table(&'a self) -> Option<&'a MetadataTable<'a, $raw>> {
                match self.tables.get($id as usize)? {
                    Some(TableData::$variant(table)) => Some(table),
                    _ => None,
                }
            }
        }
    };
}

pub(crate) use impl_table_access;
