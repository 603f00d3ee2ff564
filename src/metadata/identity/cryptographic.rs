//! Public keys and public key tokens.
//!
//! A strong-named module carries its full public key blob; a reference to it usually carries
//! only the 8-byte token. The token is the tail of the SHA-1 digest of the public key blob in
//! reversed byte order (ECMA-335 II.6.2.1.3), so the ECMA standard key
//! `00000000000000000400000000000000` has the token `b77a5c561934e089`.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::Result;

/// An 8-byte public key token, in the byte order it is stored in an `AssemblyRef` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyToken([u8; 8]);

impl PublicKeyToken {
    /// Wrap raw token bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 8]) -> Self {
        PublicKeyToken(bytes)
    }

    /// Derive the token of a public key blob.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use strongnamer::metadata::identity::PublicKeyToken;
    ///
    /// let ecma = [0u8, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
    /// assert_eq!(PublicKeyToken::from_public_key(&ecma).to_string(), "b77a5c561934e089");
    /// ```
    #[must_use]
    pub fn from_public_key(public_key: &[u8]) -> Self {
        let digest = Sha1::digest(public_key);

        let mut token = [0u8; 8];
        for (target, source) in token.iter_mut().zip(digest.iter().rev()) {
            *target = *source;
        }

        PublicKeyToken(token)
    }

    /// Wrap token bytes read from a blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `data` is not exactly 8 bytes long.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| malformed_error!("Public key token must be 8 bytes, got {}", data.len()))?;
        Ok(PublicKeyToken(bytes))
    }

    /// The token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// The strong name part of a module identity or of a reference to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The full public key blob
    PubKey(Vec<u8>),
    /// The 8-byte token of the public key
    Token(PublicKeyToken),
}

impl Identity {
    /// Interpret a `PublicKey` / `PublicKeyOrToken` blob.
    ///
    /// ## Arguments
    /// * `data`   - The blob content
    /// * `is_pub` - `true` if the row's `PUBLIC_KEY` flag says the blob is a full key
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a token blob is not 8 bytes long.
    pub fn from(data: &[u8], is_pub: bool) -> Result<Self> {
        Ok(if is_pub {
            Identity::PubKey(data.to_vec())
        } else {
            Identity::Token(PublicKeyToken::from_bytes(data)?)
        })
    }

    /// The token of this identity, deriving it from the key if needed.
    #[must_use]
    pub fn to_token(&self) -> PublicKeyToken {
        match self {
            Identity::PubKey(data) => PublicKeyToken::from_public_key(data),
            Identity::Token(token) => *token,
        }
    }

    /// The raw blob as stored in metadata.
    #[must_use]
    pub fn blob(&self) -> &[u8] {
        match self {
            Identity::PubKey(data) => data,
            Identity::Token(token) => token.as_bytes(),
        }
    }

    /// Whether the blob is a full public key.
    #[must_use]
    pub fn is_public_key(&self) -> bool {
        matches!(self, Identity::PubKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecma_token() {
        let ecma = [0u8, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
        let token = PublicKeyToken::from_public_key(&ecma);
        assert_eq!(
            token.as_bytes(),
            &[0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]
        );
        assert_eq!(token.to_string(), "b77a5c561934e089");

        let identity = Identity::PubKey(ecma.to_vec());
        assert_eq!(identity.to_token(), token);
        assert!(identity.is_public_key());
    }

    #[test]
    fn token_blob() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        let identity = Identity::from(&data, false).unwrap();
        assert_eq!(identity.blob(), &data);
        assert_eq!(identity.to_token().to_string(), "123456789abcdef0");

        assert!(Identity::from(&data[..3], false).is_err());
        assert!(Identity::from(&[], true).is_ok());
    }
}
