//! Module identities and version numbers.
//!
//! A module is identified by its simple name, a four-part version, its culture and optionally
//! a strong name. [`AssemblyIdentity::display_name`] renders the identity the way the runtime
//! prints it, e.g. `LibB, Version=1.0.0.0, Culture=neutral, PublicKeyToken=882265d1390953fd`.

use std::{fmt, str::FromStr};

use crate::{metadata::identity::Identity, Error, Result};

/// Four-part version number (ECMA-335 II.6.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
    /// Build number
    pub build: u16,
    /// Revision number
    pub revision: u16,
}

impl AssemblyVersion {
    /// Create a version from its four parts.
    #[must_use]
    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        AssemblyVersion {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse a dotted version string with two to four parts; missing parts are 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] for malformed input.
    pub fn parse(version: &str) -> Result<Self> {
        let parts: Vec<&str> = version.trim().split('.').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(Error::Error(format!("Invalid version - {version}")));
        }

        let mut numbers = [0u16; 4];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u16>()
                .map_err(|_| Error::Error(format!("Invalid version component - {part}")))?;
        }

        Ok(AssemblyVersion::new(
            numbers[0], numbers[1], numbers[2], numbers[3],
        ))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl FromStr for AssemblyVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// The full identity of a module or of a module reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyIdentity {
    /// Simple name
    pub name: String,
    /// Version
    pub version: AssemblyVersion,
    /// Culture, `None` for culture-neutral modules
    pub culture: Option<String>,
    /// Public key or token, `None` for modules without a strong name
    pub strong_name: Option<Identity>,
}

impl AssemblyIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: AssemblyVersion,
        culture: Option<String>,
        strong_name: Option<Identity>,
    ) -> Self {
        AssemblyIdentity {
            name: name.into(),
            version,
            culture,
            strong_name,
        }
    }

    /// Render the runtime display name, with `PublicKeyToken=null` for unsigned identities.
    #[must_use]
    pub fn display_name(&self) -> String {
        let culture = self.culture.as_deref().unwrap_or("neutral");
        let token = self
            .strong_name
            .as_ref()
            .map_or_else(|| "null".to_string(), |identity| identity.to_token().to_string());

        format!(
            "{}, Version={}, Culture={}, PublicKeyToken={}",
            self.name, self.version, culture, token
        )
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::identity::PublicKeyToken;

    #[test]
    fn version_parse() {
        assert_eq!(
            "1.2.3.4".parse::<AssemblyVersion>().unwrap(),
            AssemblyVersion::new(1, 2, 3, 4)
        );
        assert_eq!(
            AssemblyVersion::parse("4.0").unwrap(),
            AssemblyVersion::new(4, 0, 0, 0)
        );
        assert!(AssemblyVersion::parse("1").is_err());
        assert!(AssemblyVersion::parse("1.2.3.4.5").is_err());
        assert!(AssemblyVersion::parse("1.x").is_err());
        assert!(AssemblyVersion::parse("1.70000").is_err());
    }

    #[test]
    fn display_names() {
        let unsigned = AssemblyIdentity::new("LibB", AssemblyVersion::new(1, 0, 0, 0), None, None);
        assert_eq!(
            unsigned.display_name(),
            "LibB, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
        );

        let token = PublicKeyToken::from_bytes(&[0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89])
            .unwrap();
        let signed = AssemblyIdentity::new(
            "mscorlib",
            AssemblyVersion::new(4, 0, 0, 0),
            Some("en-US".to_string()),
            Some(Identity::Token(token)),
        );
        assert_eq!(
            signed.to_string(),
            "mscorlib, Version=4.0.0.0, Culture=en-US, PublicKeyToken=b77a5c561934e089"
        );
    }
}
