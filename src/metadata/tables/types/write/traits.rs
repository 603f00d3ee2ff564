//! Encoding of table rows.

use crate::{metadata::tables::TableInfoRef, Result};

/// A table row which can be encoded into the `#~` stream.
pub trait RowWritable {
    /// Encode this row at `offset`, advancing it past the row.
    ///
    /// ## Arguments
    /// * `data`   - Destination buffer, sized for the whole table
    /// * `offset` - Write position, updated on success
    /// * `rid`    - 1-based row id of the row being written
    /// * `sizes`  - Column widths
    ///
    /// # Errors
    /// Returns an error if the buffer is too small or a value does not fit its column.
    fn row_write(
        &self,
        data: &mut [u8],
        offset: &mut usize,
        rid: u32,
        sizes: &TableInfoRef,
    ) -> Result<()>;
}
