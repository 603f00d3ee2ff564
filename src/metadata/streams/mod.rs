//! Metadata streams (ECMA-335 II.24.2.2 - II.24.2.6).
//!
//! - [`StreamHeader`] locates a stream inside the metadata root
//! - [`Strings`], [`Guid`] and [`Blob`] give indexed access to the heaps
//! - [`TablesHeader`] decodes the `#~` stream
//!
//! The `#US` heap is never interpreted; it is carried through a rewrite verbatim.

mod blob;
mod guid;
mod streamheader;
mod strings;
mod tablesheader;

pub use blob::Blob;
pub use guid::Guid;
pub use streamheader::{StreamHeader, STREAM_NAMES};
pub use strings::Strings;
pub use tablesheader::TablesHeader;
