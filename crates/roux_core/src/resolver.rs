//! Wiki-link target resolution.
//!
//! Turns the raw text inside `[[...]]` into a canonical node id using
//! Obsidian-style disambiguation. Resolution is pure over a snapshot of the
//! known real ids; it performs no I/O, so a target that matches nothing
//! becomes a ghost id rather than an error.

use roux_common::normalize_id;
use std::collections::BTreeSet;

/// Extensions a pathed target may carry without `.md` being appended.
const KNOWN_EXTENSIONS: [&str; 1] = ["md"];

/// Resolve one raw target against the set of known real ids (all lowercase).
///
/// Pathed targets (containing `/`) resolve by path, trying `.md` when the
/// target lacks a known extension. Unpathed targets resolve by basename with
/// and without `.md`; a unique match wins, ties break to the
/// lexicographically smallest id, and a miss constructs a root-level ghost.
pub fn resolve_target(raw: &str, known_ids: &BTreeSet<String>) -> String {
    let target = normalize_id(raw);

    if target.contains('/') {
        return resolve_pathed(&target, known_ids);
    }

    // Basename search over every known id.
    let mut matches: Vec<&String> = known_ids
        .iter()
        .filter(|id| {
            let base = id.rsplit('/').next().unwrap_or(id);
            base == target || base.strip_suffix(".md") == Some(target.as_str())
        })
        .collect();

    match matches.len() {
        1 => matches[0].clone(),
        0 => ghost_id(&target),
        _ => {
            // Deterministic tie-break. BTreeSet iterates sorted, so the
            // first match is already the smallest, but make it explicit.
            matches.sort();
            matches[0].clone()
        }
    }
}

fn resolve_pathed(target: &str, known_ids: &BTreeSet<String>) -> String {
    if has_known_extension(target) {
        return target.to_string();
    }

    let with_md = format!("{}.md", target);
    if known_ids.contains(&with_md) {
        return with_md;
    }
    if known_ids.contains(target) {
        return target.to_string();
    }
    // Neither form is known; the ghost keeps the conventional extension.
    with_md
}

fn has_known_extension(target: &str) -> bool {
    let base = target.rsplit('/').next().unwrap_or(target);
    match base.rfind('.') {
        Some(dot) if dot > 0 => KNOWN_EXTENSIONS.contains(&&base[dot + 1..]),
        _ => false,
    }
}

fn ghost_id(target: &str) -> String {
    if has_known_extension(target) {
        target.to_string()
    } else {
        format!("{}.md", target)
    }
}
