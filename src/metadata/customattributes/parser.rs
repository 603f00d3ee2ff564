//! Encoding and decoding of friend declaration blobs (ECMA-335 II.23.3).
//!
//! ```text
//! 01 00            prolog
//! len utf8...      SerString fixed argument (0xFF = null string)
//! nn nn ...        NumNamed and named arguments, carried verbatim
//! ```

use crate::{
    file::{io::write_compressed_uint, parser::Parser},
    metadata::customattributes::FriendDeclaration,
    Result,
};

const PROLOG: u16 = 0x0001;

impl FriendDeclaration {
    /// Decode the value blob of an `InternalsVisibleToAttribute`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob lacks the prolog, carries a null or
    /// invalid string, or is truncated.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(blob);

        let prolog = parser.read_le::<u16>()?;
        if prolog != PROLOG {
            return Err(malformed_error!(
                "Invalid custom attribute prolog - 0x{:04X}",
                prolog
            ));
        }

        if parser.peek_byte()? == 0xFF {
            return Err(malformed_error!("Friend declaration holds a null string"));
        }

        let length = parser.read_compressed_uint()? as usize;
        let bytes = parser.read_bytes(length)?;
        let text = std::str::from_utf8(bytes)
            .map_err(|e| malformed_error!("Friend declaration is not valid UTF-8 - {}", e))?
            .to_string();

        Ok(FriendDeclaration {
            text,
            trailer: parser.remaining().to_vec(),
        })
    }

    /// Encode the declaration into a value blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the text is too long for a compressed length.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut blob = Vec::with_capacity(self.text.len() + 8);
        blob.extend_from_slice(&PROLOG.to_le_bytes());

        let length = u32::try_from(self.text.len())
            .map_err(|_| malformed_error!("Friend declaration too long"))?;
        write_compressed_uint(&mut blob, length)?;
        blob.extend_from_slice(self.text.as_bytes());
        blob.extend_from_slice(&self.trailer);

        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_crafted() {
        let blob = [0x01, 0x00, 0x04, b'L', b'i', b'b', b'B', 0x00, 0x00];
        let declaration = FriendDeclaration::decode(&blob).unwrap();
        assert_eq!(declaration.text, "LibB");
        assert_eq!(declaration.trailer, vec![0x00, 0x00]);
        assert_eq!(declaration.encode().unwrap(), blob);
    }

    #[test]
    fn long_text_uses_two_byte_length() {
        let mut declaration = FriendDeclaration::new("LibB");
        declaration.append_public_key(&[0xAB; 160]);
        assert_eq!(declaration.text.len(), 4 + 12 + 320);

        let blob = declaration.encode().unwrap();
        assert_eq!(&blob[2..4], &[0x81, 0x50]);
        assert_eq!(FriendDeclaration::decode(&blob).unwrap(), declaration);
    }

    #[test]
    fn invalid() {
        assert!(FriendDeclaration::decode(&[0x02, 0x00, 0x00]).is_err());
        assert!(FriendDeclaration::decode(&[0x01, 0x00, 0xFF, 0x00, 0x00]).is_err());
        assert!(FriendDeclaration::decode(&[0x01, 0x00, 0x09, b'L']).is_err());
        assert!(FriendDeclaration::decode(&[0x01]).is_err());
    }
}
