//! The `Module` table.

mod raw;

pub use raw::ModuleRaw;
