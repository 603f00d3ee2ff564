//! The `CustomAttribute` table.

mod raw;

pub use raw::CustomAttributeRaw;
