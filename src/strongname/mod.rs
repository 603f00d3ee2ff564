//! Strong naming: key containers, identity rewriting and image signatures.
//!
//! # Key Components
//!
//! - [`KeyMaterial`] - A loaded key container with its public key blob and token
//! - [`IdentityPatcher`] - Binds unsigned modules and their references to the key
//! - [`sign_record`] / [`verify_image`] - Strong name signatures over module images

mod keys;
mod patcher;
mod signature;

pub use keys::{KeyMaterial, CALG_RSA_KEYX, CALG_RSA_SIGN, CALG_SHA1, PUBLIC_KEY_HEADER_SIZE};
pub use patcher::{IdentityPatcher, PatchOutcome, PatchSummary, UnresolvedPolicy};
pub use signature::{image_digest, sign_record, verify_image, SignatureStatus};
