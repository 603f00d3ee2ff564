//! The serialized image, before and after the signature slot is filled.

use std::ops::Range;

use crate::Result;

use super::pe::pe_checksum;

/// A fully laid out module image.
///
/// The signature slot, if any, is zero-filled until [`ImageOutput::set_signature`] stores the
/// signature. The PE checksum is kept current with every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutput {
    data: Vec<u8>,
    signature: Option<Range<usize>>,
    checksum_offset: usize,
}

impl ImageOutput {
    pub(crate) fn new(
        data: Vec<u8>,
        signature: Option<(usize, usize)>,
        checksum_offset: usize,
    ) -> Self {
        let mut output = ImageOutput {
            data,
            signature: signature.map(|(offset, size)| offset..offset + size),
            checksum_offset,
        };
        output.update_checksum();
        output
    }

    /// Whether the image reserves a signature slot.
    #[must_use]
    pub fn has_signature_slot(&self) -> bool {
        self.signature.is_some()
    }

    /// File offsets of the signature slot.
    #[must_use]
    pub fn signature_range(&self) -> Option<Range<usize>> {
        self.signature.clone()
    }

    /// Store `signature` in the slot and recompute the checksum.
    ///
    /// # Arguments
    ///
    /// * `signature` - The signature in the byte order it is stored in the image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the image has no slot or the signature does not
    /// have the size of the slot.
    pub fn set_signature(&mut self, signature: &[u8]) -> Result<()> {
        let Some(range) = self.signature.clone() else {
            return Err(malformed_error!("Image reserves no signature slot"));
        };
        if range.len() != signature.len() {
            return Err(malformed_error!(
                "Signature of {} bytes does not fit a slot of {} bytes",
                signature.len(),
                range.len()
            ));
        }

        self.data[range].copy_from_slice(signature);
        self.update_checksum();
        Ok(())
    }

    /// The PE checksum currently stored in the optional header.
    #[must_use]
    pub fn checksum(&self) -> u32 {
        self.data
            .get(self.checksum_offset..self.checksum_offset + 4)
            .map_or(0, |bytes| {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            })
    }

    fn update_checksum(&mut self) {
        let checksum = pe_checksum(&self.data, self.checksum_offset);
        if let Some(field) = self
            .data
            .get_mut(self.checksum_offset..self.checksum_offset + 4)
        {
            field.copy_from_slice(&checksum.to_le_bytes());
        }
    }

    /// The complete image.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take the complete image.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
