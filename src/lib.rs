// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'serializer.rs' maps the output file for writing

//! # strongnamer
//!
//! Retrofit strong names onto already compiled, unsigned .NET metadata modules, so that a
//! closure of modules which reference each other stays consistent without recompiling any of
//! them from source.
//!
//! ## Features
//!
//! - **🔑 Key containers** - `.snk` key pairs, public key blobs and `sn -p` public keys
//! - **🔗 Closure consistency** - references between unsigned modules are pinned to the new key,
//!   friend declarations receive the matching public key clause
//! - **♻️ Incremental** - outputs produced from the same compilation are reused, not rewritten
//! - **🧱 Deterministic** - the same module and key always produce byte-identical output
//! - **⚡ Parallel** - modules of a pass are processed on a rayon worker pool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strongnamer::prelude::*;
//! use std::path::PathBuf;
//!
//! let request = SigningRequest::new(
//!     vec![PathBuf::from("bin/LibA.dll"), PathBuf::from("bin/LibB.dll")],
//!     KeySource::File(PathBuf::from("key.snk")),
//!     "obj/signed",
//! );
//!
//! let report = Signer::new(SignerOptions::default()).sign(&request)?;
//! for path in report.final_paths() {
//!     println!("{}", path.display());
//! }
//! # Ok::<(), strongnamer::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`metadata`] - Reading module images into an owned [`ModuleRecord`]
//! - [`cilassembly`] - Writing a [`ModuleRecord`] back into an image, and building modules
//! - [`strongname`] - Key containers, identity rewriting and image signatures
//! - [`graph`] - Name to module resolution for one signing pass
//! - [`cache`] - Reusing outputs of earlier passes
//! - [`serializer`] - Persisting signed modules without leaving partial files
//! - [`driver`] - The signing pass tying everything together
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result`]. Only configuration problems and unreadable keys
//! abort a pass ([`Error::is_fatal`]); everything else is reported per module as a
//! [`ModuleState`].

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust,no_run
/// use strongnamer::prelude::*;
///
/// let key = KeyMaterial::from_file("key.snk".as_ref())?;
/// println!("{}", key.token());
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub mod prelude;

/// Reading module images.
///
/// A module image is the ECMA-335 metadata of one module behind a small image header. This
/// module decodes the header, the metadata root, the heaps and the tables carried through a
/// rewrite, and converts them into an owned [`ModuleRecord`].
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::ModuleRecord;
/// use std::path::Path;
///
/// let record = ModuleRecord::from_file(Path::new("LibA.dll"))?;
/// println!("{} has {} references", record.identity(), record.references.len());
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub mod metadata;

/// Writing module images and building modules from scratch.
pub mod cilassembly;

/// Strong name keys, identity rewriting and signatures.
pub mod strongname;

/// Module resolution.
pub mod graph;

pub mod cache;
pub mod driver;
pub mod serializer;

/// `strongnamer` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `strongnamer` Error type
///
/// See [`error::Error`] for the full list of variants.
pub use error::Error;

/// Raw access to module bytes, memory mapped or in memory
pub use file::File;

/// Bounds checked reader over metadata bytes
pub use file::parser::Parser;

pub use cache::{CachePolicy, CacheResult, IncrementalCache};
pub use cilassembly::{write_image, ImageOutput, ModuleBuilder, WriteOptions};
pub use driver::{
    KeySource, ModuleOutcome, ModuleState, Signer, SignerOptions, SigningReport, SigningRequest,
};
pub use graph::{DirectoryResolver, ModuleGraphIndex, ModuleResolver};
pub use metadata::{record::ModuleRecord, view::ModuleView};
pub use serializer::Serializer;
pub use strongname::{IdentityPatcher, KeyMaterial, PatchOutcome, UnresolvedPolicy};
