//! Identity rewriting of unsigned modules.

use log::{debug, warn};

use crate::{
    graph::ModuleGraphIndex,
    metadata::{identity::PublicKeyToken, record::ModuleRecord},
    strongname::KeyMaterial,
};

/// How references whose target cannot be resolved are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Pin them to the session token anyway and warn
    #[default]
    Stamp,
    /// Leave them tokenless and warn
    LeaveUnset,
}

/// What [`IdentityPatcher::sign`] changed in a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchSummary {
    /// Names of references which received the session token
    pub references_updated: Vec<String>,
    /// Names of tokenless references whose target could not be resolved
    pub references_unresolved: Vec<String>,
    /// Friend declarations which received a key clause, by friend name
    pub friends_updated: Vec<String>,
}

/// Outcome of [`IdentityPatcher::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The module already has a strong name and was not touched
    Unchanged,
    /// The module now carries the session key
    Patched(PatchSummary),
}

/// Rewrites the identity of unsigned modules to the session key.
///
/// The token of the session key is derived once, when the patcher is created, and shared by
/// every module of the pass.
///
/// # Examples
///
/// ```rust,no_run
/// use strongnamer::{IdentityPatcher, KeyMaterial, ModuleRecord, PatchOutcome};
/// use std::path::Path;
///
/// let key = KeyMaterial::from_file(Path::new("key.snk"))?;
/// let patcher = IdentityPatcher::new(&key);
///
/// let mut record = ModuleRecord::from_file(Path::new("LibA.dll"))?;
/// if let PatchOutcome::Patched(summary) = patcher.sign(&mut record) {
///     println!("updated {} references", summary.references_updated.len());
/// }
/// # Ok::<(), strongnamer::Error>(())
/// ```
pub struct IdentityPatcher<'a> {
    key: &'a KeyMaterial,
    token: PublicKeyToken,
    graph: Option<&'a ModuleGraphIndex>,
    policy: UnresolvedPolicy,
}

impl<'a> IdentityPatcher<'a> {
    /// Create a patcher for `key` which pins every tokenless reference.
    #[must_use]
    pub fn new(key: &'a KeyMaterial) -> Self {
        IdentityPatcher {
            key,
            token: key.token(),
            graph: None,
            policy: UnresolvedPolicy::default(),
        }
    }

    /// Resolve references through `graph` and apply `policy` to those it cannot resolve.
    #[must_use]
    pub fn with_graph(mut self, graph: &'a ModuleGraphIndex, policy: UnresolvedPolicy) -> Self {
        self.graph = Some(graph);
        self.policy = policy;
        self
    }

    /// The session token.
    #[must_use]
    pub fn token(&self) -> PublicKeyToken {
        self.token
    }

    /// Bind `record` to the session key.
    ///
    /// A module which already has a public key is returned untouched. Otherwise the module
    /// identity receives the public key and SHA-1 as hash algorithm, every tokenless
    /// reference receives the session token and every friend declaration without a key
    /// clause receives the public key.
    pub fn sign(&self, record: &mut ModuleRecord) -> PatchOutcome {
        if record.has_public_key() {
            debug!("{} already has a strong name, skipping", record.identity());
            return PatchOutcome::Unchanged;
        }

        let module_name = record.name().to_string();
        record.set_strong_name(self.key.public_key());

        let mut summary = PatchSummary::default();
        for reference in &mut record.references {
            if reference.has_token() {
                continue;
            }

            if let Some(graph) = self.graph {
                match graph.resolve(&reference.name) {
                    Some(target) => {
                        if let Some(public_key) = target.public_key() {
                            let target_token = PublicKeyToken::from_public_key(public_key);
                            if target_token != self.token {
                                warn!(
                                    "{}: reference {} resolves to a module signed with {}, not {}",
                                    module_name, reference.name, target_token, self.token
                                );
                            }
                        }
                    }
                    None => {
                        summary.references_unresolved.push(reference.name.clone());
                        if self.policy == UnresolvedPolicy::LeaveUnset {
                            warn!(
                                "{}: reference {} cannot be resolved, leaving it unsigned",
                                module_name, reference.name
                            );
                            continue;
                        }
                        warn!(
                            "{}: reference {} cannot be resolved, pinning it to {} anyway",
                            module_name, reference.name, self.token
                        );
                    }
                }
            }

            reference.set_token(self.token);
            debug!(
                "{}: reference {} now pinned to {}",
                module_name, reference.name, self.token
            );
            summary.references_updated.push(reference.name.clone());
        }

        for declaration in record.friend_declarations_mut() {
            if declaration.append_public_key(self.key.public_key()) {
                debug!(
                    "{}: friend declaration {} now carries the public key",
                    module_name,
                    declaration.friend_name()
                );
                summary
                    .friends_updated
                    .push(declaration.friend_name().to_string());
            }
        }

        PatchOutcome::Patched(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cilassembly::ModuleBuilder,
        metadata::{
            identity::{AssemblyVersion, Identity},
            tables::{AssemblyFlags, AssemblyHashAlgorithm},
        },
    };

    const PRIVATE_KEY: &[u8] = include_bytes!("../../tests/fixtures/test.snk");

    fn version() -> AssemblyVersion {
        AssemblyVersion::new(1, 0, 0, 0)
    }

    #[test]
    fn patches_identity_references_and_friends() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let foreign = PublicKeyToken::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut record = ModuleBuilder::new("LibA", version())
            .reference("LibB", version())
            .signed_reference("Vendor", version(), foreign)
            .friend("LibB")
            .friend("LibB.Tests, PublicKey=0024")
            .build();

        let PatchOutcome::Patched(summary) = IdentityPatcher::new(&key).sign(&mut record) else {
            panic!("expected the module to be patched");
        };

        assert!(record.has_public_key());
        assert_eq!(record.public_key(), Some(key.public_key()));
        assert_eq!(record.assembly.hash_algorithm, AssemblyHashAlgorithm::SHA1);
        assert_ne!(record.assembly.flags & AssemblyFlags::PUBLIC_KEY, 0);

        assert_eq!(record.references[0].token(), Some(key.token()));
        assert_eq!(
            record.references[1].identity,
            Some(Identity::Token(foreign))
        );
        assert_eq!(summary.references_updated, vec!["LibB".to_string()]);
        assert!(summary.references_unresolved.is_empty());

        let friends: Vec<&str> = record
            .friend_declarations()
            .map(|declaration| declaration.text.as_str())
            .collect();
        assert!(friends[0].starts_with("LibB, PublicKey=00240000048000009400000006020000"));
        assert_eq!(friends[1], "LibB.Tests, PublicKey=0024");
        assert_eq!(summary.friends_updated, vec!["LibB".to_string()]);
    }

    #[test]
    fn signed_modules_are_untouched() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let mut record = ModuleBuilder::new("Vendor", version())
            .public_key(vec![0u8, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0])
            .reference("LibB", version())
            .friend("LibB")
            .build();
        let before = record.clone();

        assert_eq!(IdentityPatcher::new(&key).sign(&mut record), PatchOutcome::Unchanged);
        assert_eq!(record, before);
    }

    #[test]
    fn patching_twice_is_stable() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let mut record = ModuleBuilder::new("LibA", version())
            .reference("LibB", version())
            .friend("LibB")
            .build();

        let patcher = IdentityPatcher::new(&key);
        assert!(matches!(patcher.sign(&mut record), PatchOutcome::Patched(_)));
        let patched = record.clone();
        assert_eq!(patcher.sign(&mut record), PatchOutcome::Unchanged);
        assert_eq!(record, patched);
    }

    #[test]
    fn unresolved_policy() {
        let key = KeyMaterial::from_bytes(PRIVATE_KEY).unwrap();
        let graph = ModuleGraphIndex::new(None);
        let build = || {
            ModuleBuilder::new("LibA", version())
                .reference("LibB", version())
                .build()
        };

        let mut stamped = build();
        let patcher = IdentityPatcher::new(&key).with_graph(&graph, UnresolvedPolicy::Stamp);
        let PatchOutcome::Patched(summary) = patcher.sign(&mut stamped) else {
            panic!("expected the module to be patched");
        };
        assert_eq!(summary.references_unresolved, vec!["LibB".to_string()]);
        assert!(stamped.references[0].has_token());

        let mut left = build();
        let patcher = IdentityPatcher::new(&key).with_graph(&graph, UnresolvedPolicy::LeaveUnset);
        let PatchOutcome::Patched(summary) = patcher.sign(&mut left) else {
            panic!("expected the module to be patched");
        };
        assert!(summary.references_updated.is_empty());
        assert!(!left.references[0].has_token());
        assert!(left.has_public_key());
    }
}
