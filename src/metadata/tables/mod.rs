//! Metadata tables of the `#~` stream.
//!
//! Only the tables which describe identity and cross-module references are decoded:
//!
//! | Table             | Id   | Role                                         |
//! |-------------------|------|----------------------------------------------|
//! | `Module`          | 0x00 | Module name and version id (fingerprint)     |
//! | `TypeRef`         | 0x01 | Types referenced by custom attributes        |
//! | `MemberRef`       | 0x0A | Attribute constructors                       |
//! | `CustomAttribute` | 0x0C | Friend declarations and other attributes     |
//! | `ModuleRef`       | 0x1A | Referenced native modules                    |
//! | `Assembly`        | 0x20 | Identity: name, version, public key          |
//! | `AssemblyRef`     | 0x23 | Outgoing references and their tokens         |
//!
//! Every row type implements [`RowReadable`] and [`RowWritable`]; heap columns stay plain
//! indexes and are resolved by [`crate::metadata::view::ModuleView`].
//!
//! All other tables (type and method definitions, fields, signatures, generic parameters and
//! so on) are carried through a rewrite as raw rows. [`TableId::columns`] describes their
//! layout and [`transcode`] adapts them when a rewrite changes the width of index columns.

mod assembly;
mod assemblyref;
mod customattribute;
mod memberref;
mod module;
mod moduleref;
mod typeref;
mod types;

pub use assembly::{AssemblyFlags, AssemblyHashAlgorithm, AssemblyRaw};
pub use assemblyref::AssemblyRefRaw;
pub use customattribute::CustomAttributeRaw;
pub use memberref::MemberRefRaw;
pub use module::ModuleRaw;
pub use moduleref::ModuleRefRaw;
pub use typeref::TypeRefRaw;
pub(crate) use types::impl_table_access;
pub use types::{
    transcode, CodedIndex, CodedIndexType, Column, MetadataTable, RowReadable, RowWritable,
    TableAccess, TableData, TableId, TableInfo, TableInfoRef, TableIterator, TableRowInfo,
};
