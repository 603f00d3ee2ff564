//! Decoding of table rows.

use crate::{metadata::tables::TableInfoRef, Result};

/// A table row which can be decoded from the `#~` stream.
///
/// Implementors are the raw row types: heap columns stay plain indexes, coded index columns
/// are decoded into [`crate::metadata::tables::CodedIndex`].
pub trait RowReadable: Sized + Send {
    /// Size in bytes of one row, given the column widths in `sizes`.
    fn row_size(sizes: &TableInfoRef) -> u32;

    /// Decode one row at `offset`, advancing it past the row.
    ///
    /// ## Arguments
    /// * `data`   - The table data
    /// * `offset` - Read position, updated on success
    /// * `rid`    - 1-based row id of the row being read
    /// * `sizes`  - Column widths
    ///
    /// # Errors
    /// Returns an error if the row is truncated or contains an invalid coded index.
    fn row_read(data: &[u8], offset: &mut usize, rid: u32, sizes: &TableInfoRef) -> Result<Self>;
}
