//! Strong name key containers.
//!
//! Three container layouts are accepted:
//!
//! ```text
//! PRIVATEKEYBLOB  (.snk)   BLOBHEADER { 0x07, 2, 0, alg } 'RSA2' bitlen pubexp
//!                          modulus p q dp dq iq d            (all little-endian)
//! PUBLICKEYBLOB            BLOBHEADER { 0x06, 2, 0, alg } 'RSA1' bitlen pubexp modulus
//! public key blob (sn -p)  sig alg u32, hash alg u32, length u32, PUBLICKEYBLOB
//! ```
//!
//! Whatever the input, the public key blob embedded in modules is always re-encoded as
//! `CALG_RSA_SIGN` / `CALG_SHA1` followed by a `PUBLICKEYBLOB`, so every container holding the
//! same RSA key yields the same public key and token.

use std::{fmt, path::Path};

use rsa::{traits::PublicKeyParts, BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use crate::{file::parser::Parser, metadata::identity::PublicKeyToken, Error, Result};

const PUBLICKEYBLOB: u8 = 0x06;
const PRIVATEKEYBLOB: u8 = 0x07;
const CUR_BLOB_VERSION: u8 = 0x02;
const MAGIC_RSA1: u32 = 0x3141_5352;
const MAGIC_RSA2: u32 = 0x3241_5352;

/// `CALG_RSA_SIGN`
pub const CALG_RSA_SIGN: u32 = 0x0000_2400;
/// `CALG_RSA_KEYX`
pub const CALG_RSA_KEYX: u32 = 0x0000_A400;
/// `CALG_SHA1`
pub const CALG_SHA1: u32 = 0x0000_8004;

/// Size of the header preceding the `PUBLICKEYBLOB` in a public key blob.
pub const PUBLIC_KEY_HEADER_SIZE: usize = 12;

/// An RSA key loaded from a key container, with its derived public key blob and token.
///
/// Key material is immutable after loading and shared read-only by all workers of a pass.
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::KeyMaterial;
/// use std::path::Path;
///
/// let key = KeyMaterial::from_file(Path::new("tests/fixtures/test.snk"))?;
/// assert!(key.can_sign());
/// println!("public key token: {}", key.token());
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub struct KeyMaterial {
    raw: Vec<u8>,
    public_key: Vec<u8>,
    token: PublicKeyToken,
    bit_length: u32,
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl KeyMaterial {
    /// Load a key container from disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be read and
    /// [`crate::Error::KeyFormat`] if its content is not a supported key container.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Self::from_bytes(raw)
    }

    /// Load a key container held in memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyFormat`] if `raw` is not a supported key container.
    pub fn from_bytes(raw: impl Into<Vec<u8>>) -> Result<Self> {
        let raw = raw.into();
        let blob = strip_public_key_header(&raw)?;
        let container = CapiBlob::parse(blob).map_err(|error| match error {
            Error::KeyFormat(_) => error,
            other => Error::KeyFormat(other.to_string()),
        })?;

        let public = RsaPublicKey::new(
            BigUint::from_bytes_le(container.modulus),
            BigUint::from(container.public_exponent),
        )
        .map_err(|error| Error::KeyFormat(format!("Invalid RSA public key - {error}")))?;

        let private = match &container.private {
            Some(private) => Some(
                RsaPrivateKey::from_components(
                    BigUint::from_bytes_le(container.modulus),
                    BigUint::from(container.public_exponent),
                    BigUint::from_bytes_le(private.private_exponent),
                    vec![
                        BigUint::from_bytes_le(private.prime1),
                        BigUint::from_bytes_le(private.prime2),
                    ],
                )
                .map_err(|error| Error::KeyFormat(format!("Invalid RSA private key - {error}")))?,
            ),
            None => None,
        };

        let public_key = container.encode_public_key();
        let token = PublicKeyToken::from_public_key(&public_key);

        Ok(KeyMaterial {
            bit_length: container.bit_length,
            raw,
            public_key,
            token,
            public,
            private,
        })
    }

    /// The container bytes as loaded.
    #[must_use]
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// The public key blob embedded into signed modules.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The public key token.
    #[must_use]
    pub fn token(&self) -> PublicKeyToken {
        self.token
    }

    /// RSA modulus length in bits.
    #[must_use]
    pub fn bit_length(&self) -> u32 {
        self.bit_length
    }

    /// Whether the container holds the private key. Without it, modules are delay-signed.
    #[must_use]
    pub fn can_sign(&self) -> bool {
        self.private.is_some()
    }

    /// Size of a signature, which is the modulus length in bytes.
    #[must_use]
    pub fn signature_size(&self) -> u32 {
        u32::try_from(self.public.size()).unwrap_or(u32::MAX)
    }

    /// Sign a SHA-1 digest with RSA PKCS#1 v1.5.
    ///
    /// The signature is returned big-endian, as produced by RSA.
    ///
    /// # Errors
    /// Returns [`crate::Error::Signing`] if the key has no private part or signing fails.
    pub fn sign_digest(&self, digest: &[u8]) -> Result<Vec<u8>> {
        let Some(private) = &self.private else {
            return Err(Error::Signing(
                "The key container holds no private key".to_string(),
            ));
        };

        private
            .sign(Pkcs1v15Sign::new::<Sha1>(), digest)
            .map_err(|error| Error::Signing(error.to_string()))
    }

    /// Check a big-endian signature of a SHA-1 digest.
    #[must_use]
    pub fn verify_digest(&self, digest: &[u8], signature: &[u8]) -> bool {
        self.public
            .verify(Pkcs1v15Sign::new::<Sha1>(), digest, signature)
            .is_ok()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("token", &self.token.to_string())
            .field("bit_length", &self.bit_length)
            .field("can_sign", &self.can_sign())
            .finish_non_exhaustive()
    }
}

/// Skip the 12-byte header of a public key blob, if the data starts with one.
fn strip_public_key_header(data: &[u8]) -> Result<&[u8]> {
    if data.is_empty() {
        return Err(Error::KeyFormat("Key container is empty".to_string()));
    }

    if matches!(data[0], PUBLICKEYBLOB | PRIVATEKEYBLOB) {
        return Ok(data);
    }

    if data.len() > PUBLIC_KEY_HEADER_SIZE {
        let mut parser = Parser::new(data);
        let _sig_alg = parser.read_le::<u32>()?;
        let _hash_alg = parser.read_le::<u32>()?;
        let length = parser.read_le::<u32>()? as usize;
        if length == data.len() - PUBLIC_KEY_HEADER_SIZE
            && data[PUBLIC_KEY_HEADER_SIZE] == PUBLICKEYBLOB
        {
            return Ok(&data[PUBLIC_KEY_HEADER_SIZE..]);
        }
    }

    Err(Error::KeyFormat(format!(
        "Unknown key container type 0x{:02X}",
        data[0]
    )))
}

struct CapiPrivateParts<'a> {
    prime1: &'a [u8],
    prime2: &'a [u8],
    private_exponent: &'a [u8],
}

/// A decoded CAPI RSA key blob, borrowing its numbers.
struct CapiBlob<'a> {
    bit_length: u32,
    public_exponent: u32,
    modulus: &'a [u8],
    private: Option<CapiPrivateParts<'a>>,
}

impl<'a> CapiBlob<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let mut parser = Parser::new(data);

        let blob_type = parser.read_le::<u8>()?;
        let version = parser.read_le::<u8>()?;
        let _reserved = parser.read_le::<u16>()?;
        let algorithm = parser.read_le::<u32>()?;
        if version != CUR_BLOB_VERSION {
            return Err(Error::KeyFormat(format!(
                "Unsupported key blob version {version}"
            )));
        }
        if algorithm != CALG_RSA_SIGN && algorithm != CALG_RSA_KEYX {
            return Err(Error::KeyFormat(format!(
                "Unsupported key algorithm 0x{algorithm:04X}"
            )));
        }

        let magic = parser.read_le::<u32>()?;
        let expected_magic = match blob_type {
            PRIVATEKEYBLOB => MAGIC_RSA2,
            PUBLICKEYBLOB => MAGIC_RSA1,
            other => {
                return Err(Error::KeyFormat(format!(
                    "Unknown key container type 0x{other:02X}"
                )))
            }
        };
        if magic != expected_magic {
            return Err(Error::KeyFormat(format!(
                "Key blob magic 0x{magic:08X} does not match blob type 0x{blob_type:02X}"
            )));
        }

        let bit_length = parser.read_le::<u32>()?;
        if bit_length == 0 || bit_length % 16 != 0 {
            return Err(Error::KeyFormat(format!(
                "Invalid RSA key length {bit_length}"
            )));
        }
        let public_exponent = parser.read_le::<u32>()?;

        let modulus_len = bit_length as usize / 8;
        let half_len = bit_length as usize / 16;
        let modulus = parser.read_bytes(modulus_len)?;

        let private = if blob_type == PRIVATEKEYBLOB {
            let prime1 = parser.read_bytes(half_len)?;
            let prime2 = parser.read_bytes(half_len)?;
            // exponent1, exponent2 and coefficient are recomputed from the primes
            parser.advance_by(half_len * 3)?;
            let private_exponent = parser.read_bytes(modulus_len)?;
            Some(CapiPrivateParts {
                prime1,
                prime2,
                private_exponent,
            })
        } else {
            None
        };

        Ok(CapiBlob {
            bit_length,
            public_exponent,
            modulus,
            private,
        })
    }

    /// The strong name public key blob for this key.
    fn encode_public_key(&self) -> Vec<u8> {
        let csp_length = 20 + self.modulus.len();

        let mut blob = Vec::with_capacity(PUBLIC_KEY_HEADER_SIZE + csp_length);
        blob.extend_from_slice(&CALG_RSA_SIGN.to_le_bytes());
        blob.extend_from_slice(&CALG_SHA1.to_le_bytes());
        blob.extend_from_slice(&(csp_length as u32).to_le_bytes());
        blob.extend_from_slice(&[PUBLICKEYBLOB, CUR_BLOB_VERSION, 0, 0]);
        blob.extend_from_slice(&CALG_RSA_SIGN.to_le_bytes());
        blob.extend_from_slice(&MAGIC_RSA1.to_le_bytes());
        blob.extend_from_slice(&self.bit_length.to_le_bytes());
        blob.extend_from_slice(&self.public_exponent.to_le_bytes());
        blob.extend_from_slice(self.modulus);
        blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::Digest;

    const PRIVATE_KEY: &[u8] = include_bytes!("../../tests/fixtures/test.snk");
    const PUBLIC_KEY: &[u8] = include_bytes!("../../tests/fixtures/test_public.snk");

    #[test]
    fn private_key_container() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        assert!(key.can_sign());
        assert_eq!(key.bit_length(), 1024);
        assert_eq!(key.signature_size(), 128);
        assert_eq!(key.public_key(), PUBLIC_KEY);
        assert_eq!(key.token().to_string(), "882265d1390953fd");
        assert_eq!(key.raw_bytes(), PRIVATE_KEY);
    }

    #[test]
    fn public_key_containers() {
        let from_blob = KeyMaterial::from_bytes(PUBLIC_KEY).unwrap();
        assert!(!from_blob.can_sign());
        assert_eq!(from_blob.public_key(), PUBLIC_KEY);
        assert_eq!(from_blob.token().to_string(), "882265d1390953fd");

        let capi = KeyMaterial::from_bytes(&PUBLIC_KEY[PUBLIC_KEY_HEADER_SIZE..]).unwrap();
        assert_eq!(capi.public_key(), PUBLIC_KEY);
        assert!(capi.sign_digest(&[0u8; 20]).is_err());
    }

    #[test]
    fn signatures() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let public = KeyMaterial::from_bytes(PUBLIC_KEY).unwrap();
        let digest = Sha1::digest(b"module image");

        let signature = key.sign_digest(&digest).unwrap();
        assert_eq!(signature.len(), 128);
        assert_eq!(key.sign_digest(&digest).unwrap(), signature);
        assert!(public.verify_digest(&digest, &signature));
        assert!(!public.verify_digest(&Sha1::digest(b"other image"), &signature));
    }

    #[test]
    fn rejects_garbage() {
        for data in [
            &[][..],
            &[0x01, 0x02, 0x03][..],
            &PRIVATE_KEY[..40],
            &[0x07, 0x02, 0x00, 0x00, 0x00, 0x24, 0x00, 0x00, 0x52, 0x53, 0x41, 0x31][..],
        ] {
            let error = KeyMaterial::from_bytes(data).unwrap_err();
            assert!(matches!(error, Error::KeyFormat(_)), "{error}");
            assert!(error.is_fatal());
        }
    }
}
