//! The `AssemblyRef` table.

mod raw;

pub use raw::AssemblyRefRaw;
