//! Column layout of every table of the `#~` stream (ECMA-335 II.22).
//!
//! Only a few tables are decoded into typed rows; all others are carried through a rewrite as
//! raw row bytes. Carrying them still requires knowing their layout: the stream has no per-table
//! size field, so locating any table means summing the sizes of all tables before it, and a
//! rewrite which changes a row count or heap size can change the width of index columns in
//! tables the crate never decodes. [`Column`] describes one column and
//! [`TableId::columns`] the full row of every table, which is enough to size and to transcode
//! any row.

use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::tables::types::{CodedIndexType, TableId, TableInfo},
    Result,
};

/// One column of a metadata table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// A constant of the given width in bytes
    Fixed(u8),
    /// Index into `#Strings`
    Str,
    /// Index into `#GUID`
    Guid,
    /// Index into `#Blob`
    Blob,
    /// Simple index into another table
    Table(TableId),
    /// Coded index into one of several tables
    Coded(CodedIndexType),
}

impl Column {
    /// Width of the column under `info`.
    #[must_use]
    pub fn size(&self, info: &TableInfo) -> u8 {
        match self {
            Column::Fixed(size) => *size,
            Column::Str => info.str_bytes(),
            Column::Guid => info.guid_bytes(),
            Column::Blob => info.blob_bytes(),
            Column::Table(table) => info.table_index_bytes(*table),
            Column::Coded(coded) => info.coded_index_bytes(*coded),
        }
    }
}

use CodedIndexType as C;
use Column::{Blob, Coded, Fixed, Guid, Str, Table};

const U8: Column = Fixed(1);
const U16: Column = Fixed(2);
const U32: Column = Fixed(4);

impl TableId {
    /// The columns of one row of this table, in storage order.
    #[must_use]
    pub fn columns(self) -> &'static [Column] {
        match self {
            TableId::Module => &[U16, Str, Guid, Guid, Guid],
            TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
            TableId::TypeDef => &[
                U32,
                Str,
                Str,
                Coded(C::TypeDefOrRef),
                Table(TableId::Field),
                Table(TableId::MethodDef),
            ],
            TableId::FieldPtr => &[Table(TableId::Field)],
            TableId::Field => &[U16, Str, Blob],
            TableId::MethodPtr => &[Table(TableId::MethodDef)],
            TableId::MethodDef => &[U32, U16, U16, Str, Blob, Table(TableId::Param)],
            TableId::ParamPtr => &[Table(TableId::Param)],
            TableId::Param => &[U16, U16, Str],
            TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(C::TypeDefOrRef)],
            TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
            TableId::Constant => &[U8, U8, Coded(C::HasConstant), Blob],
            TableId::CustomAttribute => {
                &[Coded(C::HasCustomAttribute), Coded(C::CustomAttributeType), Blob]
            }
            TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
            TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
            TableId::ClassLayout => &[U16, U32, Table(TableId::TypeDef)],
            TableId::FieldLayout => &[U32, Table(TableId::Field)],
            TableId::StandAloneSig => &[Blob],
            TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
            TableId::EventPtr => &[Table(TableId::Event)],
            TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
            TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
            TableId::PropertyPtr => &[Table(TableId::Property)],
            TableId::Property => &[U16, Str, Blob],
            TableId::MethodSemantics => {
                &[U16, Table(TableId::MethodDef), Coded(C::HasSemantics)]
            }
            TableId::MethodImpl => &[
                Table(TableId::TypeDef),
                Coded(C::MethodDefOrRef),
                Coded(C::MethodDefOrRef),
            ],
            TableId::ModuleRef => &[Str],
            TableId::TypeSpec => &[Blob],
            TableId::ImplMap => &[
                U16,
                Coded(C::MemberForwarded),
                Str,
                Table(TableId::ModuleRef),
            ],
            TableId::FieldRVA => &[U32, Table(TableId::Field)],
            TableId::EncLog => &[U32, U32],
            TableId::EncMap => &[U32],
            TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
            TableId::AssemblyProcessor => &[U32],
            TableId::AssemblyOS => &[U32, U32, U32],
            TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
            TableId::AssemblyRefProcessor => &[U32, Table(TableId::AssemblyRef)],
            TableId::AssemblyRefOS => &[U32, U32, U32, Table(TableId::AssemblyRef)],
            TableId::File => &[U32, Str, Blob],
            TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
            TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
            TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
            TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
            TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
            TableId::GenericParamConstraint => {
                &[Table(TableId::GenericParam), Coded(C::TypeDefOrRef)]
            }
        }
    }

    /// Size of one row of this table under `info`.
    #[must_use]
    pub fn row_size(self, info: &TableInfo) -> u32 {
        self.columns()
            .iter()
            .map(|column| u32::from(column.size(info)))
            .sum()
    }
}

/// Re-encode the rows of `table` from the column widths of `from` to those of `to`.
///
/// Every value is kept as is; only the width of index columns changes. Heap indexes stay
/// valid because rewritten heaps only ever append to the heaps the rows were read with.
///
/// # Arguments
///
/// * `table` - The table the rows belong to.
/// * `data` - The rows, laid out under `from`.
/// * `rows` - Number of rows in `data`.
/// * `from` - The layout the rows were read with.
/// * `to` - The layout of the image being written.
///
/// # Returns
///
/// The rows laid out under `to`. When both layouts produce the same row size the input is
/// returned unchanged.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` holds fewer than `rows` rows and
/// [`crate::Error::Malformed`] if a value does not fit its narrower target column.
pub fn transcode(
    table: TableId,
    data: &[u8],
    rows: u32,
    from: &TableInfo,
    to: &TableInfo,
) -> Result<Vec<u8>> {
    let columns = table.columns();
    let from_size = table.row_size(from) as usize;
    let to_size = table.row_size(to) as usize;

    let Some(expected) = from_size.checked_mul(rows as usize) else {
        return Err(out_of_bounds_error!());
    };
    if data.len() < expected {
        return Err(out_of_bounds_error!());
    }

    let unchanged = columns
        .iter()
        .all(|column| column.size(from) == column.size(to));
    if unchanged {
        return Ok(data[..expected].to_vec());
    }

    let mut output = vec![0u8; to_size * rows as usize];
    let mut read_offset = 0;
    let mut write_offset = 0;
    for _ in 0..rows {
        for column in columns {
            let value = read_column(data, &mut read_offset, column.size(from))?;
            let width = column.size(to);
            if width == 2 && value > u32::from(u16::MAX) {
                return Err(malformed_error!(
                    "Value 0x{:x} of table {} does not fit a 2-byte column",
                    value,
                    table
                ));
            }
            write_column(&mut output, &mut write_offset, value, width)?;
        }
    }

    Ok(output)
}

fn read_column(data: &[u8], offset: &mut usize, width: u8) -> Result<u32> {
    match width {
        1 => {
            let value = *data.get(*offset).ok_or(out_of_bounds_error!())?;
            *offset += 1;
            Ok(u32::from(value))
        }
        2 | 4 => read_le_at_dyn(data, offset, width == 4),
        _ => Err(malformed_error!("Unsupported column width {}", width)),
    }
}

fn write_column(data: &mut [u8], offset: &mut usize, value: u32, width: u8) -> Result<()> {
    match width {
        1 => {
            let slot = data.get_mut(*offset).ok_or(out_of_bounds_error!())?;
            *slot = u8::try_from(value)
                .map_err(|_| malformed_error!("Value 0x{:x} does not fit one byte", value))?;
            *offset += 1;
            Ok(())
        }
        2 | 4 => write_le_at_dyn(data, offset, value, width == 4),
        _ => Err(malformed_error!("Unsupported column width {}", width)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tables::{
        AssemblyRaw, AssemblyRefRaw, CustomAttributeRaw, MemberRefRaw, ModuleRaw, ModuleRefRaw,
        RowReadable, TypeRefRaw,
    };

    fn small() -> TableInfo {
        TableInfo::new_with(&[(TableId::TypeDef, 3), (TableId::Field, 2)], false, false, false)
    }

    #[test]
    fn row_sizes() {
        let info = small();
        assert_eq!(TableId::TypeDef.row_size(&info), 14);
        assert_eq!(TableId::MethodDef.row_size(&info), 14);
        assert_eq!(TableId::Constant.row_size(&info), 6);
        assert_eq!(TableId::EncMap.row_size(&info), 4);

        let wide = TableInfo::new_with(&[(TableId::Field, 0x1_0000)], true, true, true);
        assert_eq!(TableId::Field.row_size(&wide), 10);
        assert_eq!(TableId::FieldRVA.row_size(&wide), 8);
        assert_eq!(TableId::TypeDef.row_size(&wide), 20);
    }

    #[test]
    fn decoded_rows_agree() {
        for info in [
            small(),
            TableInfo::new_with(&[(TableId::AssemblyRef, 0x4000)], true, true, true),
        ] {
            let info = std::sync::Arc::new(info);
            assert_eq!(TableId::Module.row_size(&info), ModuleRaw::row_size(&info));
            assert_eq!(TableId::TypeRef.row_size(&info), TypeRefRaw::row_size(&info));
            assert_eq!(TableId::MemberRef.row_size(&info), MemberRefRaw::row_size(&info));
            assert_eq!(
                TableId::CustomAttribute.row_size(&info),
                CustomAttributeRaw::row_size(&info)
            );
            assert_eq!(TableId::ModuleRef.row_size(&info), ModuleRefRaw::row_size(&info));
            assert_eq!(TableId::Assembly.row_size(&info), AssemblyRaw::row_size(&info));
            assert_eq!(
                TableId::AssemblyRef.row_size(&info),
                AssemblyRefRaw::row_size(&info)
            );
        }
    }

    #[test]
    fn transcode_widens_heap_columns() {
        let from = small();
        let to = TableInfo::new_with(&[(TableId::TypeDef, 3), (TableId::Field, 2)], true, false, false);

        #[rustfmt::skip]
        let rows = [
            0x01, 0x00, 0x10, 0x00, // flags, name
            0x20, 0x00, // signature
            0x06, 0x00, 0x11, 0x00, // flags, name
            0x22, 0x00, // signature
        ];

        let widened = transcode(TableId::Field, &rows, 2, &from, &to).unwrap();
        #[rustfmt::skip]
        assert_eq!(
            widened,
            [
                0x01, 0x00, 0x10, 0x00, 0x00, 0x00, 0x20, 0x00,
                0x06, 0x00, 0x11, 0x00, 0x00, 0x00, 0x22, 0x00,
            ]
        );

        let narrowed = transcode(TableId::Field, &widened, 2, &to, &from).unwrap();
        assert_eq!(narrowed, rows);
    }

    #[test]
    fn transcode_keeps_unchanged_layouts() {
        let info = small();
        let rows = [0xAAu8; 14];
        assert_eq!(
            transcode(TableId::TypeDef, &rows, 1, &info, &info).unwrap(),
            rows
        );
        assert!(transcode(TableId::TypeDef, &rows, 2, &info, &info).is_err());
    }

    #[test]
    fn transcode_rejects_overflowing_values() {
        let wide = TableInfo::new_with(&[], true, false, false);
        let narrow = TableInfo::new_with(&[], false, false, false);
        let row = [0x00, 0x00, 0x01, 0x00];
        assert!(transcode(TableId::ModuleRef, &row, 1, &wide, &narrow).is_err());
    }
}
