//! Strong name signatures of module images.
//!
//! The signature is the RSA PKCS#1 v1.5 signature of a SHA-1 digest over the PE image, stored
//! in the slot the CLI header points at in little-endian byte order. The digest covers:
//!
//! - the DOS header and stub
//! - the PE signature, COFF header and optional header, with `CheckSum` and the certificate
//!   table directory zeroed
//! - the section table
//! - the raw data of every section, minus the signature slot
//!
//! Bytes outside these regions (header padding, data behind the last section) are not covered,
//! and neither are the fields a later Authenticode signature or checksum update changes.

use std::ops::Range;

use sha1::{Digest, Sha1};

use crate::{
    cilassembly::{write_image, ImageOutput, WriteOptions},
    file::{io::read_le_at, PE_FILE_HEADER_SIZE, SECTION_HEADER_SIZE},
    metadata::{cor20header::ImageFlags, record::ModuleRecord, view::ModuleView},
    strongname::KeyMaterial,
    Result,
};

const PE32_PLUS_MAGIC: u16 = 0x20B;
const CHECKSUM_FIELD: usize = 64;
const CERTIFICATE_DIRECTORY_PE32: usize = 96 + 4 * 8;
const CERTIFICATE_DIRECTORY_PE32_PLUS: usize = 112 + 4 * 8;

/// Outcome of checking the signature of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The image reserves no signature slot
    Unsigned,
    /// The slot is reserved but the image is not declared signed
    DelaySigned,
    /// The signature matches the image and the key
    Valid,
    /// The signature does not match
    Invalid,
}

impl std::fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SignatureStatus::Unsigned => "unsigned",
            SignatureStatus::DelaySigned => "delay-signed",
            SignatureStatus::Valid => "valid",
            SignatureStatus::Invalid => "invalid",
        };
        f.write_str(text)
    }
}

fn region(image: &[u8], range: Range<usize>) -> Result<&[u8]> {
    image.get(range).ok_or_else(|| out_of_bounds_error!())
}

/// SHA-1 digest of the parts of a PE image a strong name signature covers.
///
/// # Arguments
///
/// * `image` - A complete PE image.
/// * `signature` - File range of the signature slot, excluded from the digest.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the headers or a section leave the image, and
/// [`crate::Error::Malformed`] if the image has no optional header.
pub fn image_digest(image: &[u8], signature: Option<Range<usize>>) -> Result<[u8; 20]> {
    let mut offset = 0x3C;
    let pe_offset = read_le_at::<u32>(image, &mut offset)? as usize;

    let mut offset = pe_offset + 6;
    let section_count = read_le_at::<u16>(image, &mut offset)? as usize;
    let mut offset = pe_offset + 20;
    let optional_size = read_le_at::<u16>(image, &mut offset)? as usize;
    if optional_size < CERTIFICATE_DIRECTORY_PE32 {
        return Err(malformed_error!(
            "Optional header of {} bytes is too small",
            optional_size
        ));
    }
    let mut offset = pe_offset + PE_FILE_HEADER_SIZE;
    let magic = read_le_at::<u16>(image, &mut offset)?;

    let section_table = pe_offset + PE_FILE_HEADER_SIZE + optional_size;
    let headers_end = section_table + section_count * SECTION_HEADER_SIZE;

    let mut hasher = Sha1::new();
    hasher.update(region(image, 0..pe_offset)?);

    let mut headers = region(image, pe_offset..headers_end)?.to_vec();
    let checksum = PE_FILE_HEADER_SIZE + CHECKSUM_FIELD;
    headers[checksum..checksum + 4].fill(0);
    let certificates = PE_FILE_HEADER_SIZE
        + if magic == PE32_PLUS_MAGIC {
            CERTIFICATE_DIRECTORY_PE32_PLUS
        } else {
            CERTIFICATE_DIRECTORY_PE32
        };
    if certificates + 8 <= PE_FILE_HEADER_SIZE + optional_size {
        headers[certificates..certificates + 8].fill(0);
    }
    hasher.update(&headers);

    for index in 0..section_count {
        let mut offset = section_table + index * SECTION_HEADER_SIZE + 16;
        let size = read_le_at::<u32>(image, &mut offset)? as usize;
        let start = read_le_at::<u32>(image, &mut offset)? as usize;
        if size == 0 {
            continue;
        }

        let section = start..start + size;
        match &signature {
            Some(slot) if slot.start < section.end && slot.end > section.start => {
                hasher.update(region(image, section.start..slot.start.max(section.start))?);
                hasher.update(region(image, slot.end.min(section.end)..section.end)?);
            }
            _ => hasher.update(region(image, section)?),
        }
    }

    let mut digest = [0u8; 20];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

/// Serialize `record` and sign it with `key`.
///
/// A key without a private part reserves a zero-filled slot and leaves the image flagged as
/// unsigned (delay signing). The PE checksum is computed after the signature is stored.
///
/// # Arguments
///
/// * `record` - The module, already bound to the public key of `key`.
/// * `key` - The signing key.
///
/// # Errors
///
/// Returns an error if the record cannot be encoded or the signature cannot be produced.
pub fn sign_record(record: &ModuleRecord, key: &KeyMaterial) -> Result<ImageOutput> {
    let options = if key.can_sign() {
        WriteOptions::signed(key.signature_size())
    } else {
        WriteOptions::delay_signed(key.signature_size())
    };

    let mut output = write_image(record, &options)?;
    if key.can_sign() {
        let digest = image_digest(output.as_bytes(), output.signature_range())?;
        let mut signature = key.sign_digest(&digest)?;
        signature.reverse();
        output.set_signature(&signature)?;
    }

    Ok(output)
}

/// Check the signature of `view` against `key`.
#[must_use]
pub fn verify_image(view: &ModuleView, key: &KeyMaterial) -> SignatureStatus {
    let (Some(range), Some(slot)) = (view.signature_range(), view.signature()) else {
        return SignatureStatus::Unsigned;
    };
    if !view.header().flags.contains(ImageFlags::STRONGNAMESIGNED) {
        return SignatureStatus::DelaySigned;
    }

    let Ok(digest) = image_digest(view.data(), Some(range)) else {
        return SignatureStatus::Invalid;
    };

    let mut signature = slot.to_vec();
    signature.reverse();
    if key.verify_digest(&digest, &signature) {
        SignatureStatus::Valid
    } else {
        SignatureStatus::Invalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cilassembly::ModuleBuilder, metadata::identity::AssemblyVersion};

    const PRIVATE_KEY: &[u8] = include_bytes!("../../tests/fixtures/test.snk");
    const PUBLIC_KEY: &[u8] = include_bytes!("../../tests/fixtures/test_public.snk");

    fn signed_lib_a(key: &KeyMaterial) -> Vec<u8> {
        let mut record = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0)).build();
        record.set_strong_name(key.public_key());
        sign_record(&record, key).unwrap().into_bytes()
    }

    #[test]
    fn sign_and_verify() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let public = KeyMaterial::from_bytes(PUBLIC_KEY).unwrap();

        let image = signed_lib_a(&key);
        let view = ModuleView::from_mem(image.clone()).unwrap();
        assert_eq!(verify_image(&view, &public), SignatureStatus::Valid);

        let slot = view.signature_range().unwrap();
        let mut tampered = image.clone();
        tampered[slot.start - 1] ^= 0xFF;
        let view = ModuleView::from_mem(tampered).unwrap();
        assert_eq!(verify_image(&view, &public), SignatureStatus::Invalid);
    }

    #[test]
    fn digest_skips_checksum_and_slot() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let image = signed_lib_a(&key);
        let view = ModuleView::from_mem(image.clone()).unwrap();
        let slot = view.signature_range();
        let digest = image_digest(&image, slot.clone()).unwrap();

        let checksum = view.file().optional_header_offset() + 64;
        let mut changed = image.clone();
        changed[checksum..checksum + 4].copy_from_slice(&[1, 2, 3, 4]);
        let signature_start = slot.clone().unwrap().start;
        changed[signature_start] ^= 0xFF;
        assert_eq!(image_digest(&changed, slot.clone()).unwrap(), digest);

        // the section table is covered
        let section_table = view.file().section_table_offset();
        changed[section_table] ^= 0x01;
        assert_ne!(image_digest(&changed, slot).unwrap(), digest);

        assert!(image_digest(&image[..0x100], None).is_err());
    }

    #[test]
    fn checksum_follows_the_signature() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let image = signed_lib_a(&key);
        let file = crate::File::from_mem(image.clone()).unwrap();
        let checksum = file.optional_header_offset() + 64;

        let stored = u32::from_le_bytes(image[checksum..checksum + 4].try_into().unwrap());
        assert_eq!(
            stored,
            crate::cilassembly::write::pe::pe_checksum(&image, checksum)
        );
    }

    #[test]
    fn delay_signing() {
        let public = KeyMaterial::from_bytes(PUBLIC_KEY).unwrap();
        let view = ModuleView::from_mem(signed_lib_a(&public)).unwrap();

        assert_eq!(view.signature().unwrap(), &[0u8; 128][..]);
        assert_eq!(verify_image(&view, &public), SignatureStatus::DelaySigned);
        assert_eq!(SignatureStatus::DelaySigned.to_string(), "delay-signed");
    }

    #[test]
    fn unsigned_images() {
        let key = KeyMaterial::from_bytes(PUBLIC_KEY).unwrap();
        let image = ModuleBuilder::new("LibB", AssemblyVersion::default())
            .to_bytes()
            .unwrap();
        let view = ModuleView::from_mem(image).unwrap();
        assert_eq!(verify_image(&view, &key), SignatureStatus::Unsigned);
    }
}
