//! Metadata of a module image.
//!
//! # Key Components
//!
//! - [`view::ModuleView`] - Zero-copy view over an image, the entry point for reading
//! - [`record::ModuleRecord`] - Owned, mutable model of a module
//! - [`cor20header`] / [`root`] - Image header and metadata root
//! - [`streams`] - The heaps and the `#~` stream header
//! - [`tables`] - The carried metadata tables
//! - [`identity`] - Names, versions, public keys and tokens
//! - [`customattributes`] - Custom attributes and friend declarations
//!
//! # Examples
//!
//! ```rust,no_run
//! use strongnamer::ModuleView;
//! use std::path::Path;
//!
//! let view = ModuleView::from_file(Path::new("LibA.dll"))?;
//! let record = view.record()?;
//! println!("{} ({})", record.identity(), record.fingerprint());
//! # Ok::<(), strongnamer::Error>(())
//! ```

/// Implementation of the image header
pub mod cor20header;
/// Implementation of custom attribute parsing and friend declarations
pub mod customattributes;
/// Module identities, public keys and tokens
pub mod identity;
/// The owned module model
pub mod record;
/// Implementation of the metadata root
pub mod root;
/// Implementation of the metadata streams
pub mod streams;
/// Implementation of the carried metadata tables
pub mod tables;
/// Read-only view over a module image
pub mod view;
