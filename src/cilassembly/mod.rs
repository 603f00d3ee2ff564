//! Module image writing.
//!
//! Reading happens through [`crate::metadata::view::ModuleView`]; this module produces images.
//! [`write_image`] serializes a [`crate::ModuleRecord`] into a PE image with an optional
//! signature slot, and [`ModuleBuilder`] synthesizes records from scratch.
//!
//! A record read from disk keeps the PE image it came from. Writing it replaces only the
//! metadata: the new metadata goes into a trailing `.meta` section, the CLI header is pointed
//! at it and every other section is copied unchanged. Records without a source image are laid
//! out in a minimal PE32 DLL.
//!
//! # Key Components
//!
//! - [`write::write_image`] - Rebuilds the heaps and tables and lays out a deterministic image
//! - [`write::pe`] - Section table, CLI header and checksum maintenance
//! - [`write::ImageOutput`] - The laid out image with access to the signature slot
//! - [`ModuleBuilder`] - Creates module images for tests, benchmarks and demos
//!
//! # Examples
//!
//! ```rust
//! use strongnamer::{
//!     cilassembly::{write_image, ModuleBuilder, WriteOptions},
//!     metadata::identity::AssemblyVersion,
//! };
//!
//! let record = ModuleBuilder::new("LibA", AssemblyVersion::new(1, 0, 0, 0)).build();
//! let image = write_image(&record, &WriteOptions::signed(128))?;
//! assert_eq!(image.signature_range().map(|slot| slot.len()), Some(128));
//! assert_eq!(&image.as_bytes()[..2], b"MZ");
//! # Ok::<(), strongnamer::Error>(())
//! ```

mod builder;
pub mod write;

pub use builder::{ModuleBuilder, RUNTIME_REFERENCE, RUNTIME_TOKEN};
pub use write::{write_image, ImageOutput, WriteOptions};
