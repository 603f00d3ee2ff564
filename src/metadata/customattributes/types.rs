//! Custom attribute model.
//!
//! Attributes are kept as a structured list: each entry knows its owner, its constructor and
//! a decoded value. Only friend declarations are decoded; every other value is carried as the
//! opaque blob it was read from.

use crate::metadata::tables::CodedIndex;

/// Namespace of [`FRIEND_ATTRIBUTE_NAME`].
pub const FRIEND_ATTRIBUTE_NAMESPACE: &str = "System.Runtime.CompilerServices";
/// Type name of the attribute which declares a friend module.
pub const FRIEND_ATTRIBUTE_NAME: &str = "InternalsVisibleToAttribute";

/// One row of the `CustomAttribute` table with its value decoded where possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAttribute {
    /// The owning row (`HasCustomAttribute`)
    pub parent: CodedIndex,
    /// The attribute constructor (`CustomAttributeType`)
    pub constructor: CodedIndex,
    /// The decoded value
    pub value: CustomAttributeValue,
}

/// The value blob of a custom attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomAttributeValue {
    /// An `InternalsVisibleToAttribute` instance
    FriendDeclaration(FriendDeclaration),
    /// Any other attribute, kept verbatim
    Opaque(Vec<u8>),
}

impl CustomAttributeValue {
    /// Encode the value into its blob form.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a friend declaration is too long to encode.
    pub fn to_blob(&self) -> crate::Result<Vec<u8>> {
        match self {
            CustomAttributeValue::FriendDeclaration(declaration) => declaration.encode(),
            CustomAttributeValue::Opaque(blob) => Ok(blob.clone()),
        }
    }
}

/// A friend declaration: the name of a module granted access to internal members, optionally
/// followed by a key clause such as `, PublicKey=0024...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendDeclaration {
    /// The constructor argument, e.g. `LibB` or `LibB, PublicKey=0024...`
    pub text: String,
    /// Encoded named arguments following the fixed argument
    pub trailer: Vec<u8>,
}

impl FriendDeclaration {
    /// Create a declaration without named arguments.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        FriendDeclaration {
            text: text.into(),
            trailer: vec![0x00, 0x00],
        }
    }

    /// The friend module's simple name, without any clauses.
    #[must_use]
    pub fn friend_name(&self) -> &str {
        self.text.split(',').next().unwrap_or("").trim()
    }

    /// Whether the declaration already names a public key or token.
    ///
    /// Clause names compare case-insensitively and may carry whitespace around the `=`.
    #[must_use]
    pub fn has_key_clause(&self) -> bool {
        self.text.split(',').skip(1).any(|clause| {
            let Some((name, _)) = clause.split_once('=') else {
                return false;
            };
            let name = name.trim();
            name.eq_ignore_ascii_case("PublicKey") || name.eq_ignore_ascii_case("PublicKeyToken")
        })
    }

    /// Append `, PublicKey=<HEX>` unless a key clause is present.
    ///
    /// Returns `true` if the declaration changed.
    pub fn append_public_key(&mut self, public_key: &[u8]) -> bool {
        if self.has_key_clause() {
            return false;
        }

        self.text.push_str(", PublicKey=");
        for byte in public_key {
            self.text.push_str(&format!("{byte:02X}"));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_clause_detection() {
        assert!(!FriendDeclaration::new("LibB").has_key_clause());
        assert!(FriendDeclaration::new("LibB, PublicKey=0024").has_key_clause());
        assert!(FriendDeclaration::new("LibB,publickeytoken=b77a5c561934e089").has_key_clause());
        assert!(!FriendDeclaration::new("PublicKey=00").has_key_clause());
        assert!(FriendDeclaration::new("LibB, PublicKey = 0024000004800000").has_key_clause());
        assert!(FriendDeclaration::new("LibB,\tPUBLICKEYTOKEN\t=b77a5c561934e089").has_key_clause());
        assert!(!FriendDeclaration::new("LibB, PublicKeyHash=00").has_key_clause());
        assert!(!FriendDeclaration::new("LibB, Culture=neutral").has_key_clause());

        let mut spaced = FriendDeclaration::new("LibB, PublicKey = 0024000004800000");
        assert!(!spaced.append_public_key(&[0xAB, 0xCD]));
        assert_eq!(spaced.text, "LibB, PublicKey = 0024000004800000");
        assert_eq!(FriendDeclaration::new(" LibB , PublicKey=00").friend_name(), "LibB");
    }

    #[test]
    fn append_is_idempotent() {
        let mut declaration = FriendDeclaration::new("LibB");
        assert!(declaration.append_public_key(&[0x00, 0x24, 0xAB]));
        assert_eq!(declaration.text, "LibB, PublicKey=0024AB");

        assert!(!declaration.append_public_key(&[0xFF]));
        assert_eq!(declaration.text, "LibB, PublicKey=0024AB");
    }
}
