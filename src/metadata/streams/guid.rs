//! GUID Heap (`#GUID`) for module metadata
//!
//! Provides access to the ECMA-335 `#GUID` heap, a plain array of 16-byte GUIDs addressed with
//! 1-based indexes. Index `0` means "no GUID" and is never stored.
//!
//! The module version id (Mvid) lives here, which makes this heap the home of the content
//! fingerprint used by [`crate::IncrementalCache`]: a recompiled module gets a new Mvid, while
//! signing and identity patching leave it untouched.
//!
//! # Reference
//! - [ECMA-335 II.24.2.5](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use crate::Result;

/// Read-only view over a `#GUID` heap.
///
/// # Examples
///
/// ```rust
/// use strongnamer::metadata::streams::Guid;
///
/// let heap = Guid::from(&[0xAA; 32])?;
/// assert_eq!(heap.get(2)?, uguid::guid!("AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA"));
/// assert!(heap.get(0).is_err());
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub struct Guid<'a> {
    data: &'a [u8],
}

impl<'a> Guid<'a> {
    /// Create a view over the raw heap bytes.
    ///
    /// # Arguments
    /// * `data` - The heap contents, as sliced from the metadata root
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap cannot hold a single GUID.
    pub fn from(data: &'a [u8]) -> Result<Guid<'a>> {
        if data.len() < 16 {
            return Err(malformed_error!("Data for #Guid heap is too small"));
        }

        Ok(Guid { data })
    }

    /// Get the GUID at the 1-based `index`.
    ///
    /// GUIDs are copied out of the heap, there is no borrowed view.
    ///
    /// # Arguments
    /// * `index` - The heap index, as stored in a metadata table column
    ///
    /// # Returns
    /// The GUID stored at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for index `0` or an index past the heap.
    pub fn get(&self, index: usize) -> Result<uguid::Guid> {
        if index < 1 || index * 16 > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let offset_start = (index - 1) * 16;

        let mut buffer = [0u8; 16];
        buffer.copy_from_slice(&self.data[offset_start..offset_start + 16]);

        Ok(uguid::Guid::from_bytes(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data : [u8; 48] = [
            0x8e, 0x90, 0x37, 0xd4, 0xe6, 0x65, 0x7c, 0x48, 0x97, 0x35, 0x7b, 0xdf, 0xf6, 0x99, 0xbe, 0xa5,
            0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let guids = Guid::from(&data).unwrap();

        assert_eq!(
            guids.get(1).unwrap(),
            uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5")
        );
        assert_eq!(
            guids.get(2).unwrap(),
            uguid::guid!("AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA")
        );
        assert_eq!(guids.get(3).unwrap(), uguid::Guid::ZERO);
        assert!(guids.get(0).is_err());
        assert!(guids.get(4).is_err());
    }
}
