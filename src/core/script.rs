//! Unlock script synthesis and structured rewriting
//!
//! Scripts are line-oriented Lua consumed by the unlock tool. Two directive
//! forms matter here:
//!
//! ```text
//! addappid(228980, 1, "<key>")        -- register app/depot with key
//! setManifestid(228990, "1829726630") -- pin a depot to one revision
//! ```
//!
//! The surface syntax is an external compatibility contract and must not
//! drift. Correction rewrites lines through a typed parse of the directive
//! arguments, never blind string patching, so an untouched script stays
//! byte-identical.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;

use crate::core::types::{AppId, DepotId, DepotRecord, ManifestId, ManifestIndex};

/// What a single script line contains, as far as correction cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// `addappid(<id>, ...)`; id extracted for first-wins dedup.
    AddApp { id: AppId },
    /// `setManifestid(<depot>, "<manifest>" ...` with both args typed.
    PinManifest {
        depot_id: DepotId,
        manifest_id: ManifestId,
    },
    /// Anything else passes through untouched.
    Other,
}

/// Regex pair shared by classification and rewriting.
struct Patterns {
    add_app: Regex,
    pin: Regex,
}

impl Patterns {
    fn new() -> Self {
        Self {
            // Argument shapes mirror what the synthesizer and the legacy
            // decoder both emit
            add_app: Regex::new(r"addappid\((\d+)").expect("static regex"),
            pin: Regex::new(r#"setManifestid\((\d+),\s*"(\d+)""#).expect("static regex"),
        }
    }

    fn classify(&self, line: &str) -> LineKind {
        if let Some(caps) = self.pin.captures(line) {
            if let (Ok(depot_id), Ok(manifest_id)) = (caps[1].parse(), caps[2].parse()) {
                return LineKind::PinManifest {
                    depot_id,
                    manifest_id,
                };
            }
        }
        if let Some(caps) = self.add_app.captures(line) {
            if let Ok(id) = caps[1].parse() {
                return LineKind::AddApp { id };
            }
        }
        LineKind::Other
    }
}

/// Synthesize an unlock script for one app.
///
/// The top-level app registration always comes first. Depot records follow in
/// key-file order, deduplicated first-wins by depot id. With `pin_versions`
/// set, each depot emits one register/pin pair per recorded manifest revision
/// (newest first once the index is sorted); the duplicates act as a fallback
/// chain for the consuming tool. A depot with no recorded revisions emits
/// nothing in pinned mode.
pub fn synthesize(
    app_id: AppId,
    depots: &[DepotRecord],
    manifests: &ManifestIndex,
    pin_versions: bool,
) -> String {
    let mut out = format!("addappid({app_id}, 1, \"None\")\n");
    let mut seen = HashSet::new();

    for record in depots {
        if !seen.insert(record.depot_id) {
            continue;
        }
        if pin_versions {
            for manifest_id in manifests.revisions(record.depot_id) {
                out.push_str(&format!(
                    "addappid({}, 1, \"{}\")\n",
                    record.depot_id, record.decryption_key
                ));
                out.push_str(&format!(
                    "setManifestid({}, \"{}\")\n",
                    record.depot_id, manifest_id
                ));
            }
        } else {
            out.push_str(&format!(
                "addappid({}, 1, \"{}\")\n",
                record.depot_id, record.decryption_key
            ));
        }
    }
    out
}

/// Outcome of correcting one script against an authoritative manifest map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub content: String,
    /// Pin rewrites performed, as (depot, stale, corrected).
    pub rewritten: Vec<(DepotId, ManifestId, ManifestId)>,
    /// Duplicate `addappid` ids whose later occurrences were dropped.
    pub deduped: Vec<AppId>,
}

impl Correction {
    /// True when the script came through byte-identical.
    pub fn is_unchanged(&self) -> bool {
        self.rewritten.is_empty() && self.deduped.is_empty()
    }
}

/// Rewrite stale pin directives and drop duplicate `addappid` registrations.
///
/// `authoritative` maps each depot to its single correct current revision.
/// Pins for depots absent from the map are left alone. Line content outside
/// the matched directive arguments (trailing args, comments) is preserved;
/// when nothing disagrees and nothing is duplicated, the returned content is
/// the input, byte for byte.
pub fn correct(content: &str, authoritative: &BTreeMap<DepotId, ManifestId>) -> Correction {
    let patterns = Patterns::new();
    let mut rewritten = Vec::new();
    let mut deduped = Vec::new();
    let mut seen_apps = HashSet::new();
    let mut lines = Vec::new();

    for line in content.split_inclusive('\n') {
        match patterns.classify(line) {
            LineKind::PinManifest {
                depot_id,
                manifest_id,
            } => {
                match authoritative.get(&depot_id) {
                    Some(&correct_id) if correct_id != manifest_id => {
                        let replacement = format!("setManifestid({depot_id}, \"{correct_id}\"");
                        lines.push(patterns.pin.replace(line, replacement.as_str()).into_owned());
                        rewritten.push((depot_id, manifest_id, correct_id));
                    }
                    _ => lines.push(line.to_string()),
                }
            }
            LineKind::AddApp { id } => {
                if seen_apps.insert(id) {
                    lines.push(line.to_string());
                } else {
                    deduped.push(id);
                }
            }
            LineKind::Other => lines.push(line.to_string()),
        }
    }

    Correction {
        content: lines.concat(),
        rewritten,
        deduped,
    }
}
