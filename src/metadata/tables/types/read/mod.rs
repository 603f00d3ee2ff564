mod access;
mod traits;

pub(crate) use access::impl_table_access;
pub use access::TableAccess;
pub use traits::RowReadable;
