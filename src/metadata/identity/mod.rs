//! Module identity: names, versions, public keys and tokens.

mod assembly;
mod cryptographic;

pub use assembly::{AssemblyIdentity, AssemblyVersion};
pub use cryptographic::{Identity, PublicKeyToken};
