//! Rebuilding an archive in the slot order of a reference archive.
//!
//! Consumers of these archives often address entries by index, so a rebuilt
//! archive has to keep every reference slot where it was, even when no
//! replacement file exists for it.
use crate::{BuildEntry, Sarc, SarcError};
use indexmap::IndexSet;
use std::io;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Archive(#[from] SarcError),
    #[error("Failed to load {path}")]
    Load {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Converts an OS path into archive form.
///
/// `.` segments are dropped, `..` removes the preceding segment, and only
/// the last two remaining segments are kept, joined by `/`. Both `/` and
/// `\` separate segments.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(|c| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }
    match segments.len() {
        0 => ".".to_owned(),
        n => segments[n.saturating_sub(2)..].join("/"),
    }
}

/// Returns true for an input path that is a shell pattern which was never
/// expanded.
pub fn is_glob_pattern(path: &str) -> bool {
    path.contains(|c| c == '*' || c == '?')
}

/// Derives a writer entry list that mirrors the slot order of `reference`.
///
/// Each reference entry is matched by name against the normalized form of
/// the `candidates` paths; a matching candidate's bytes are read with
/// `load`, and a reference entry without a match becomes
/// [`BuildEntry::Nil`]. Candidates that matched nothing are appended after
/// the reference entries, except unexpanded glob patterns.
pub fn reconcile<P, F>(
    reference: &Sarc,
    candidates: &[P],
    mut load: F,
) -> Result<Vec<BuildEntry>, ReconcileError>
where
    P: AsRef<str>,
    F: FnMut(&str) -> io::Result<Vec<u8>>,
{
    let normalized: Vec<String> = candidates
        .iter()
        .map(|c| normalize_path(c.as_ref()))
        .collect();
    let mut consumed: IndexSet<&str> = IndexSet::new();
    let mut entries = Vec::with_capacity(reference.file_count() as usize + candidates.len());

    for index in 0..reference.file_count() as usize {
        let name = match reference.name_at(index)? {
            Some(name) => name,
            None => {
                warn!("Reference entry {} has no resolvable name", index + 1);
                entries.push(BuildEntry::Nil);
                continue;
            }
        };

        let found = normalized
            .iter()
            .position(|path| path == name && !consumed.contains(path.as_str()));
        match found {
            Some(c) => {
                let path = candidates[c].as_ref();
                debug!("Match found ({:03}. {}) in {}", index + 1, name, path);
                let data = load(path).map_err(|source| ReconcileError::Load {
                    path: path.to_owned(),
                    source,
                })?;
                consumed.insert(normalized[c].as_str());
                entries.push(BuildEntry::file(name, data));
            }
            None => {
                debug!("Match not found for entry {:03} ({})", index + 1, name);
                entries.push(BuildEntry::Nil);
            }
        }
    }

    for (candidate, path) in candidates.iter().zip(normalized.iter()) {
        let candidate = candidate.as_ref();
        if consumed.contains(path.as_str()) || is_glob_pattern(candidate) {
            continue;
        }
        debug!("Additive file found ({})", path);
        let data = load(candidate).map_err(|source| ReconcileError::Load {
            path: candidate.to_owned(),
            source,
        })?;
        consumed.insert(path.as_str());
        entries.push(BuildEntry::file(path.as_str(), data));
    }

    Ok(entries)
}
