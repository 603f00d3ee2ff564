//! Coded indexes (ECMA-335 II.24.2.6).
//!
//! A coded index packs a small table tag into the low bits of a row index so one column can
//! point into one of several tables. All thirteen kinds of the `#~` stream are modelled: the
//! decoded tables read and write them through [`crate::metadata::tables::CodedIndex`], and the
//! tables which are only carried through a rewrite need their widths to transcode rows when
//! the row counts change.

use strum::{EnumCount, EnumIter};

use crate::{
    file::io::{read_le_at_dyn, write_le_at_dyn},
    metadata::tables::{TableId, TableInfoRef},
    Result,
};

/// The coded index kinds of ECMA-335 II.24.2.6.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum CodedIndexType {
    /// `TypeDef.Extends`, `InterfaceImpl.Interface`, `Event.EventType`, ...
    TypeDefOrRef,
    /// `Constant.Parent`
    HasConstant,
    /// `CustomAttribute.Parent`
    HasCustomAttribute,
    /// `FieldMarshal.Parent`
    HasFieldMarshal,
    /// `DeclSecurity.Parent`
    HasDeclSecurity,
    /// `MemberRef.Class`
    MemberRefParent,
    /// `MethodSemantics.Association`
    HasSemantics,
    /// `MethodImpl.MethodBody`, `MethodImpl.MethodDeclaration`, `MethodSpec.Method`
    MethodDefOrRef,
    /// `ImplMap.MemberForwarded`
    MemberForwarded,
    /// `ExportedType.Implementation`, `ManifestResource.Implementation`
    Implementation,
    /// `CustomAttribute.Type`
    CustomAttributeType,
    /// `TypeRef.ResolutionScope`
    ResolutionScope,
    /// `GenericParam.Owner`
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// Tables addressed by this coded index, in tag order.
    #[must_use]
    pub fn tables(&self) -> &'static [TableId] {
        match self {
            CodedIndexType::TypeDefOrRef => &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec],
            CodedIndexType::HasConstant => &[TableId::Field, TableId::Param, TableId::Property],
            CodedIndexType::HasCustomAttribute => &[
                TableId::MethodDef,
                TableId::Field,
                TableId::TypeRef,
                TableId::TypeDef,
                TableId::Param,
                TableId::InterfaceImpl,
                TableId::MemberRef,
                TableId::Module,
                TableId::DeclSecurity,
                TableId::Property,
                TableId::Event,
                TableId::StandAloneSig,
                TableId::ModuleRef,
                TableId::TypeSpec,
                TableId::Assembly,
                TableId::AssemblyRef,
                TableId::File,
                TableId::ExportedType,
                TableId::ManifestResource,
                TableId::GenericParam,
                TableId::GenericParamConstraint,
                TableId::MethodSpec,
            ],
            CodedIndexType::HasFieldMarshal => &[TableId::Field, TableId::Param],
            CodedIndexType::HasDeclSecurity => {
                &[TableId::TypeDef, TableId::MethodDef, TableId::Assembly]
            }
            CodedIndexType::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndexType::HasSemantics => &[TableId::Event, TableId::Property],
            CodedIndexType::MethodDefOrRef => &[TableId::MethodDef, TableId::MemberRef],
            CodedIndexType::MemberForwarded => &[TableId::Field, TableId::MethodDef],
            CodedIndexType::Implementation => {
                &[TableId::File, TableId::AssemblyRef, TableId::ExportedType]
            }
            // Tags 0, 1 and 4 are unused; only 2 (MethodDef) and 3 (MemberRef) are valid
            CodedIndexType::CustomAttributeType => &[
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MemberRef,
                TableId::MemberRef,
            ],
            CodedIndexType::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
            CodedIndexType::TypeOrMethodDef => &[TableId::TypeDef, TableId::MethodDef],
        }
    }

    /// Number of low bits holding the tag.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tag_bits(&self) -> u8 {
        let count = self.tables().len();
        if count <= 1 {
            0
        } else {
            (usize::BITS - (count - 1).leading_zeros()) as u8
        }
    }

    /// Tag value for `table`, if the table can be addressed by this coded index.
    #[must_use]
    pub fn tag_of(&self, table: TableId) -> Option<u32> {
        match self {
            CodedIndexType::CustomAttributeType => match table {
                TableId::MethodDef => Some(2),
                TableId::MemberRef => Some(3),
                _ => None,
            },
            _ => self
                .tables()
                .iter()
                .position(|candidate| *candidate == table)
                .and_then(|tag| u32::try_from(tag).ok()),
        }
    }
}

/// A decoded coded index: the target table and the 1-based row (0 means null).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CodedIndex {
    /// The table this index points into
    pub tag: TableId,
    /// The row within `tag`
    pub row: u32,
}

impl CodedIndex {
    /// Create a new coded index.
    #[must_use]
    pub fn new(tag: TableId, row: u32) -> CodedIndex {
        CodedIndex { tag, row }
    }

    /// Read a coded index column.
    ///
    /// # Errors
    /// Returns an error if the data is truncated or the tag is invalid.
    pub fn read(
        data: &[u8],
        offset: &mut usize,
        info: &TableInfoRef,
        ci_type: CodedIndexType,
    ) -> Result<Self> {
        let coded_index = read_le_at_dyn(data, offset, info.is_large_coded(ci_type))?;
        let (tag, row) = info.decode_coded_index(coded_index, ci_type)?;
        Ok(CodedIndex::new(tag, row))
    }

    /// Pack this index into its raw column value.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the table cannot be addressed by `ci_type`.
    pub fn encode(&self, ci_type: CodedIndexType) -> Result<u32> {
        let Some(tag) = ci_type.tag_of(self.tag) else {
            return Err(malformed_error!(
                "Table {} cannot be addressed by {:?}",
                self.tag,
                ci_type
            ));
        };

        Ok((self.row << ci_type.tag_bits()) | tag)
    }

    /// Write this index as a coded index column.
    ///
    /// # Errors
    /// Returns an error if the table cannot be addressed or the buffer is too small.
    pub fn write(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        info: &TableInfoRef,
        ci_type: CodedIndexType,
    ) -> Result<()> {
        write_le_at_dyn(data, offset, self.encode(ci_type)?, info.is_large_coded(ci_type))
    }
}
