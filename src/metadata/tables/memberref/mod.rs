//! The `MemberRef` table.

mod raw;

pub use raw::MemberRefRaw;
