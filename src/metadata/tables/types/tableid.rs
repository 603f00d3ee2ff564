//! Metadata table identifiers.
//!
//! [`crate::metadata::tables::TableId`] enumerates every table of the ECMA-335 `#~` stream
//! (II.22). Every table is carried through a rewrite, but only a handful are decoded into
//! typed rows; the rest travel as raw row bytes laid out by [`TableId::columns`].

use strum::{Display, EnumCount, EnumIter};

/// Identifiers for the metadata tables defined in ECMA-335.
///
/// The discriminant of every variant equals the table number used in the `valid` bit vector
/// of the `#~` header and in the high byte of a metadata token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount, Display)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRVA = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOS = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOS = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Returns `true` for the tables whose rows are decoded and re-encoded on a rewrite.
    ///
    /// All other tables are copied verbatim, or transcoded when column widths change.
    #[must_use]
    pub fn is_decoded(self) -> bool {
        matches!(
            self,
            TableId::Module
                | TableId::TypeRef
                | TableId::MemberRef
                | TableId::CustomAttribute
                | TableId::ModuleRef
                | TableId::Assembly
                | TableId::AssemblyRef
        )
    }

    /// Bit of this table in the `valid` / `sorted` vectors of the `#~` header.
    #[must_use]
    pub fn bit(self) -> u64 {
        1u64 << (self as u8)
    }
}
