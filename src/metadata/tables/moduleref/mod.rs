//! The `ModuleRef` table.

mod raw;

pub use raw::ModuleRefRaw;
