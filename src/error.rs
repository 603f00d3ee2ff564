use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Pass-fatal errors
/// - [`Error::Configuration`] - Missing key, missing output directory, invalid request
/// - [`Error::KeyFormat`] - Key bytes do not form a recognizable key container
///
/// ## Module image errors
/// - [`Error::Malformed`] - Corrupted or invalid module structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a buffer
/// - [`Error::Unsupported`] - Valid metadata which uses tables or features this crate does not carry
/// - [`Error::Empty`] - Empty input provided
/// - [`Error::GoblinErr`] - The PE container could not be parsed
///
/// ## Output errors
/// - [`Error::Signing`] - The RSA signature could not be produced
/// - [`Error::Serialization`] - The module could not be serialized or persisted
/// - [`Error::FileError`] - Filesystem I/O errors
///
/// Only the pass-fatal kinds abort a signing pass; everything else is isolated to the module
/// that caused it and reported through [`crate::ModuleState::Failed`].
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::{Error, KeyMaterial};
/// use std::path::Path;
///
/// match KeyMaterial::from_file(Path::new("key.snk")) {
///     Ok(key) => println!("token: {}", key.token()),
///     Err(Error::KeyFormat(message)) => eprintln!("not a key: {message}"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The module is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The module uses a metadata layout this crate cannot carry through a rewrite.
    ///
    /// Uncompressed (`#-`) table streams and tables beyond the ECMA-335 set would be dropped
    /// silently by a rewrite, so such modules are rejected instead.
    #[error("Not supported - {0}")]
    Unsupported(String),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The image is not a valid PE file.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// The signing request is incomplete or inconsistent.
    ///
    /// Raised before any module is touched; aborts the whole pass.
    #[error("Configuration error - {0}")]
    Configuration(String),

    /// The key bytes do not parse as a supported key container.
    ///
    /// Aborts the whole pass.
    #[error("Invalid key container - {0}")]
    KeyFormat(String),

    /// Producing the strong name signature failed.
    #[error("Signing failed - {0}")]
    Signing(String),

    /// Writing a module image failed.
    #[error("Serialization failed - {0}")]
    Serialization(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}

impl Error {
    /// Returns `true` for errors which must abort an entire signing pass.
    ///
    /// Everything else is a per-module condition: the module is passed through unsigned and
    /// the remaining modules are still processed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::KeyFormat(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(Error::Configuration("no key".into()).is_fatal());
        assert!(Error::KeyFormat("bad magic".into()).is_fatal());
        assert!(!Error::Serialization("disk full".into()).is_fatal());
        assert!(!malformed_error!("broken {}", 1).is_fatal());
        assert!(!out_of_bounds_error!().is_fatal());
    }

    #[test]
    fn malformed_carries_location() {
        let Error::Malformed { message, file, .. } = malformed_error!("bad {}", "heap") else {
            panic!("expected Malformed");
        };
        assert_eq!(message, "bad heap");
        assert!(file.ends_with("error.rs"));
    }
}
