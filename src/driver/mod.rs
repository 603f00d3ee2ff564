//! The signing pass.
//!
//! A [`Signer`] takes a [`SigningRequest`] (the candidate modules, a key and an output
//! directory) and drives every candidate to one terminal [`ModuleState`]:
//!
//! ```text
//! candidate ─┬─ input missing ─────────────────────────────▶ NotYetAvailable
//!            ├─ has a public key ──────────────────────────▶ AlreadySigned
//!            ├─ output holds the same module version id ───▶ CacheHit
//!            ├─ patched, signed and written ───────────────▶ Signed
//!            └─ load or write failed ──────────────────────▶ Failed
//! ```
//!
//! Only a broken request (no output directory, no key, an unreadable key) fails the pass as a
//! whole. Everything else is reported per module, and failed modules keep their original
//! path so nothing downstream picks up a partial artifact.

mod options;
pub mod redirect;
mod signer;

pub use options::SignerOptions;
pub use signer::{KeySource, ModuleOutcome, ModuleState, Signer, SigningReport, SigningRequest};
