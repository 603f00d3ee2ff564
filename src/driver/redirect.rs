//! Mapping reference-only variants to their implementation.
//!
//! Build outputs often hand over the compile-time `ref/` variant of a package module, which
//! has no method bodies. Signing such a module would ship a broken artifact, so the driver
//! signs the copy-local implementation with the same file name instead.

use std::path::{Component, Path, PathBuf};

use log::warn;

/// Whether `path` points into a `ref` directory.
#[must_use]
pub fn is_reference_only(path: &Path) -> bool {
    path.parent().is_some_and(|parent| {
        parent
            .components()
            .any(|component| matches!(component, Component::Normal(name) if name == "ref"))
    })
}

/// Find the implementation of the reference-only variant `candidate` among `copy_local`.
///
/// Entries match on file name, ignoring ASCII case. Among several matches the one sharing
/// the longest leading run of path components with `candidate` wins, then the earliest one.
/// Returns `None` if `candidate` is not reference-only or nothing matches.
#[must_use]
pub fn implementation_of(candidate: &Path, copy_local: &[PathBuf]) -> Option<PathBuf> {
    if !is_reference_only(candidate) {
        return None;
    }
    let file_name = candidate.file_name()?.to_str()?;

    let mut best: Option<(usize, &PathBuf)> = None;
    let mut tied = false;
    for entry in copy_local {
        if is_reference_only(entry) {
            continue;
        }
        let matches = entry
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.eq_ignore_ascii_case(file_name));
        if !matches {
            continue;
        }

        let shared = shared_prefix(candidate, entry);
        match best {
            Some((score, _)) if score > shared => {}
            Some((score, _)) if score == shared => tied = true,
            _ => {
                best = Some((shared, entry));
                tied = false;
            }
        }
    }

    let (_, chosen) = best?;
    if tied {
        warn!(
            "Several implementations match {}, using {}",
            candidate.display(),
            chosen.display()
        );
    }
    Some(chosen.clone())
}

fn shared_prefix(left: &Path, right: &Path) -> usize {
    left.components()
        .zip(right.components())
        .take_while(|(l, r)| l == r)
        .count()
}
