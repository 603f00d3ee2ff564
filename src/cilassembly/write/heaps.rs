//! Heap builders.
//!
//! Every value is interned once; the first occurrence decides its index, so the heaps depend
//! only on the order values are interned in. Empty strings, empty blobs and null GUIDs map to
//! index 0 without being stored.
//!
//! A heap can start from the heap of an existing image ([`StringHeapBuilder::with_base`] and
//! friends). The base is kept byte for byte and new values are appended behind it, so every
//! index held by a table the rewrite does not decode stays valid. Values already present in
//! the base are found again instead of being appended.

use std::collections::HashMap;

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    Result,
};

/// Heaps of this size or larger need 4-byte indexes (ECMA-335 II.24.2.6).
pub const LARGE_HEAP_THRESHOLD: usize = 0x1_0000;

fn padded(mut data: Vec<u8>) -> Vec<u8> {
    data.resize((data.len() + 3) & !3, 0);
    data
}

/// Builder for the `#Strings` heap.
pub struct StringHeapBuilder {
    data: Vec<u8>,
    indexes: HashMap<String, u32>,
}

impl StringHeapBuilder {
    /// Create a heap holding only the mandatory empty string.
    #[must_use]
    pub fn new() -> Self {
        StringHeapBuilder {
            data: vec![0],
            indexes: HashMap::new(),
        }
    }

    /// Create a heap continuing the `#Strings` heap `base`.
    ///
    /// # Arguments
    ///
    /// * `base` - A complete `#Strings` heap; an empty slice starts a fresh heap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `base` does not start with the empty string.
    pub fn with_base(base: &[u8]) -> Result<Self> {
        if base.is_empty() {
            return Ok(Self::new());
        }
        if base[0] != 0 {
            return Err(malformed_error!("#Strings heap does not start with a null byte"));
        }

        let mut indexes = HashMap::new();
        let mut start = 1;
        while start < base.len() {
            let Some(length) = base[start..].iter().position(|byte| *byte == 0) else {
                break;
            };
            if length > 0 {
                if let Ok(value) = std::str::from_utf8(&base[start..start + length]) {
                    let index = u32::try_from(start)
                        .map_err(|_| malformed_error!("#Strings heap exceeds 4GB"))?;
                    indexes.entry(value.to_string()).or_insert(index);
                }
            }
            start += length + 1;
        }

        Ok(StringHeapBuilder {
            data: base.to_vec(),
            indexes,
        })
    }

    /// Intern `value`, returning its heap index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the value contains a null character or the heap
    /// outgrows a 32-bit index.
    pub fn intern(&mut self, value: &str) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(index) = self.indexes.get(value) {
            return Ok(*index);
        }
        if value.contains('\0') {
            return Err(malformed_error!("String {:?} contains a null character", value));
        }

        let index = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Strings heap exceeds 4GB"))?;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.indexes.insert(value.to_string(), index);
        Ok(index)
    }

    /// Whether indexes into this heap are 4 bytes wide.
    #[must_use]
    pub fn is_large(&self) -> bool {
        self.data.len() >= LARGE_HEAP_THRESHOLD
    }

    /// The finished heap, padded to 4 bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        padded(self.data)
    }
}

impl Default for StringHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the `#Blob` heap.
pub struct BlobHeapBuilder {
    data: Vec<u8>,
    indexes: HashMap<Vec<u8>, u32>,
}

impl BlobHeapBuilder {
    /// Create a heap holding only the mandatory empty blob.
    #[must_use]
    pub fn new() -> Self {
        BlobHeapBuilder {
            data: vec![0],
            indexes: HashMap::new(),
        }
    }

    /// Create a heap continuing the `#Blob` heap `base`.
    ///
    /// Scanning stops at the first entry whose length prefix is invalid; the bytes are kept
    /// regardless.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `base` does not start with the empty blob.
    pub fn with_base(base: &[u8]) -> Result<Self> {
        if base.is_empty() {
            return Ok(Self::new());
        }
        if base[0] != 0 {
            return Err(malformed_error!("#Blob heap does not start with the empty blob"));
        }

        let mut indexes = HashMap::new();
        let mut parser = Parser::new(base);
        parser.advance_by(1)?;
        while parser.has_more_data() {
            let index = u32::try_from(parser.pos())
                .map_err(|_| malformed_error!("#Blob heap exceeds 4GB"))?;
            let Ok(length) = parser.read_compressed_uint() else {
                break;
            };
            let Ok(value) = parser.read_bytes(length as usize) else {
                break;
            };
            if !value.is_empty() {
                indexes.entry(value.to_vec()).or_insert(index);
            }
        }

        Ok(BlobHeapBuilder {
            data: base.to_vec(),
            indexes,
        })
    }

    /// Intern `value`, returning its heap index.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob is too long for a compressed length or
    /// the heap outgrows a 32-bit index.
    pub fn intern(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(index) = self.indexes.get(value) {
            return Ok(*index);
        }

        let index = u32::try_from(self.data.len())
            .map_err(|_| malformed_error!("#Blob heap exceeds 4GB"))?;
        let length =
            u32::try_from(value.len()).map_err(|_| malformed_error!("Blob exceeds 4GB"))?;
        write_compressed_uint(&mut self.data, length)?;
        self.data.extend_from_slice(value);
        self.indexes.insert(value.to_vec(), index);
        Ok(index)
    }

    /// Whether indexes into this heap are 4 bytes wide.
    #[must_use]
    pub fn is_large(&self) -> bool {
        self.data.len() >= LARGE_HEAP_THRESHOLD
    }

    /// Whether the heap holds nothing but the empty blob.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }

    /// The finished heap, padded to 4 bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        padded(self.data)
    }
}

impl Default for BlobHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the `#GUID` heap.
#[derive(Default)]
pub struct GuidHeapBuilder {
    data: Vec<u8>,
    indexes: HashMap<uguid::Guid, u32>,
}

impl GuidHeapBuilder {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a heap continuing the `#GUID` heap `base`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `base` is not a whole number of GUIDs.
    pub fn with_base(base: &[u8]) -> Result<Self> {
        if base.len() % 16 != 0 {
            return Err(malformed_error!(
                "#GUID heap of {} bytes is not a multiple of 16",
                base.len()
            ));
        }

        let mut indexes = HashMap::new();
        for (position, chunk) in base.chunks_exact(16).enumerate() {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(chunk);
            let index = u32::try_from(position + 1)
                .map_err(|_| malformed_error!("#GUID heap exceeds 4GB"))?;
            indexes.entry(uguid::Guid::from_bytes(bytes)).or_insert(index);
        }

        Ok(GuidHeapBuilder {
            data: base.to_vec(),
            indexes,
        })
    }

    /// Intern `value`, returning its 1-based index. `None` maps to index 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap outgrows a 32-bit index.
    pub fn intern(&mut self, value: Option<uguid::Guid>) -> Result<u32> {
        let Some(guid) = value else {
            return Ok(0);
        };
        if let Some(index) = self.indexes.get(&guid) {
            return Ok(*index);
        }

        let index = u32::try_from(self.data.len() / 16 + 1)
            .map_err(|_| malformed_error!("#GUID heap exceeds 4GB"))?;
        self.data.extend_from_slice(&guid.to_bytes());
        self.indexes.insert(guid, index);
        Ok(index)
    }

    /// Whether indexes into this heap are 4 bytes wide.
    #[must_use]
    pub fn is_large(&self) -> bool {
        self.data.len() / 16 >= LARGE_HEAP_THRESHOLD
    }

    /// Whether no GUID has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The finished heap.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::streams::{Blob, Guid, Strings};

    #[test]
    fn strings_dedup() {
        let mut heap = StringHeapBuilder::new();
        assert_eq!(heap.intern("").unwrap(), 0);
        assert_eq!(heap.intern("LibA").unwrap(), 1);
        assert_eq!(heap.intern("LibB").unwrap(), 6);
        assert_eq!(heap.intern("LibA").unwrap(), 1);
        assert!(heap.intern("a\0b").is_err());
        assert!(!heap.is_large());

        let data = heap.finish();
        assert_eq!(data.len(), 12);
        let strings = Strings::from(&data).unwrap();
        assert_eq!(strings.get(6).unwrap(), "LibB");
    }

    #[test]
    fn blobs_dedup() {
        let mut heap = BlobHeapBuilder::new();
        assert!(heap.is_empty());
        assert_eq!(heap.intern(&[]).unwrap(), 0);
        assert_eq!(heap.intern(&[0x20, 0x00, 0x01]).unwrap(), 1);
        assert_eq!(heap.intern(&[0xAB; 200]).unwrap(), 5);
        assert_eq!(heap.intern(&[0x20, 0x00, 0x01]).unwrap(), 1);

        let data = heap.finish();
        let blobs = Blob::from(&data).unwrap();
        assert_eq!(blobs.get(5).unwrap(), &[0xAB; 200][..]);
    }

    #[test]
    fn guids_are_one_based() {
        let mvid = uguid::guid!("01234567-89ab-cdef-0123-456789abcdef");
        let mut heap = GuidHeapBuilder::new();
        assert_eq!(heap.intern(None).unwrap(), 0);
        assert_eq!(heap.intern(Some(mvid)).unwrap(), 1);
        assert_eq!(heap.intern(Some(uguid::Guid::ZERO)).unwrap(), 2);
        assert_eq!(heap.intern(Some(mvid)).unwrap(), 1);

        let data = heap.finish();
        assert_eq!(data.len(), 32);
        assert_eq!(Guid::from(&data).unwrap().get(1).unwrap(), mvid);
    }

    #[test]
    fn strings_continue_a_base() {
        let base = b"\0Widget\0LibA\0\0\0";
        let mut heap = StringHeapBuilder::with_base(base).unwrap();
        assert_eq!(heap.intern("LibA").unwrap(), 8);
        assert_eq!(heap.intern("Widget").unwrap(), 1);
        assert_eq!(heap.intern("LibB").unwrap(), 15);

        let data = heap.finish();
        assert_eq!(&data[..15], base);
        assert_eq!(Strings::from(&data).unwrap().get(15).unwrap(), "LibB");

        assert!(StringHeapBuilder::with_base(b"x\0").is_err());
        assert_eq!(StringHeapBuilder::with_base(&[]).unwrap().finish(), [0, 0, 0, 0]);
    }

    #[test]
    fn blobs_continue_a_base() {
        let base = [0x00, 0x02, 0xAA, 0xBB, 0x01, 0xCC, 0x00, 0x00];
        let mut heap = BlobHeapBuilder::with_base(&base).unwrap();
        assert_eq!(heap.intern(&[0xCC]).unwrap(), 4);
        assert_eq!(heap.intern(&[0xAA, 0xBB]).unwrap(), 1);
        assert_eq!(heap.intern(&[0xDD]).unwrap(), 8);

        let data = heap.finish();
        assert_eq!(&data[..8], &base);
        assert_eq!(Blob::from(&data).unwrap().get(8).unwrap(), &[0xDD]);

        assert!(BlobHeapBuilder::with_base(&[0x01, 0xAA]).is_err());
    }

    #[test]
    fn guids_continue_a_base() {
        let mvid = uguid::guid!("01234567-89ab-cdef-0123-456789abcdef");
        let mut base = vec![0u8; 16];
        base.extend_from_slice(&mvid.to_bytes());

        let mut heap = GuidHeapBuilder::with_base(&base).unwrap();
        assert_eq!(heap.intern(Some(mvid)).unwrap(), 2);
        assert_eq!(heap.intern(Some(uguid::Guid::ZERO)).unwrap(), 1);
        assert_eq!(heap.finish(), base);

        assert!(GuidHeapBuilder::with_base(&[0u8; 17]).is_err());
    }

    #[test]
    fn large_heap_threshold() {
        let mut heap = StringHeapBuilder::new();
        let long = "x".repeat(LARGE_HEAP_THRESHOLD);
        heap.intern(&long).unwrap();
        assert!(heap.is_large());
    }
}
