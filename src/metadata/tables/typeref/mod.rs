//! The `TypeRef` table.

mod raw;

pub use raw::TypeRefRaw;
