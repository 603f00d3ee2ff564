//! Module resolution for a signing pass.
//!
//! [`ModuleGraphIndex`] answers "which module is called `name`?" for the references of the
//! modules being signed. It knows the candidate modules of the pass and delegates everything
//! else to a [`ModuleResolver`], such as the [`DirectoryResolver`] probing search directories.

mod index;
mod resolver;

pub use index::{IndexedModule, ModuleGraphIndex};
pub use resolver::{DirectoryResolver, ModuleResolver};
