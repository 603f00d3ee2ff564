//! # strongnamer Prelude
//!
//! The types needed to run a signing pass or to inspect modules, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all strongnamer operations
pub use crate::Error;

/// The result type used throughout strongnamer
pub use crate::Result;

// ================================================================================================
// Signing Pass
// ================================================================================================

pub use crate::driver::{
    KeySource, ModuleOutcome, ModuleState, Signer, SignerOptions, SigningReport, SigningRequest,
};

pub use crate::cache::{CachePolicy, IncrementalCache};

pub use crate::strongname::{
    IdentityPatcher, KeyMaterial, PatchOutcome, SignatureStatus, UnresolvedPolicy,
};

pub use crate::graph::{DirectoryResolver, ModuleGraphIndex, ModuleResolver};

// ================================================================================================
// Modules
// ================================================================================================

pub use crate::metadata::{
    customattributes::FriendDeclaration,
    identity::{AssemblyIdentity, AssemblyVersion, PublicKeyToken},
    record::{ModuleRecord, ReferenceEntry},
    view::ModuleView,
};

pub use crate::cilassembly::ModuleBuilder;
