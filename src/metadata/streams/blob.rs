//! The `#Blob` heap (ECMA-335 II.24.2.4).
//!
//! Binary values prefixed with their compressed length. Index `0` always refers to the empty
//! blob.

use crate::{file::parser::Parser, Result};

/// Read-only view over a `#Blob` heap.
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Create a view over the raw heap bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty blob.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob { data })
    }

    /// Get the blob starting at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the length prefix or content leave the heap.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        parser.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data = [
            0x00,
            0x03, 0x0A, 0x0B, 0x0C,
            0x08, 0x88, 0x22, 0x65, 0xD1, 0x39, 0x09, 0x53, 0xFD,
        ];

        let blobs = Blob::from(&data).unwrap();

        assert!(blobs.get(0).unwrap().is_empty());
        assert_eq!(blobs.get(1).unwrap(), &[0x0A, 0x0B, 0x0C]);
        assert_eq!(blobs.get(5).unwrap().len(), 8);
    }

    #[test]
    fn truncated() {
        let data = [0x00, 0x05, 0x01, 0x02];
        let blobs = Blob::from(&data).unwrap();

        assert!(blobs.get(1).is_err());
        assert!(blobs.get(4).is_err());
        assert!(Blob::from(&[0x01]).is_err());
    }
}
