//!
//! src/matching.rs
//!
//! Decides whether two track references denote the same underlying
//! recording, and whether two candidate files are the same file
//! re-shared under a near-identical name
//!

use crate::config::MatchingConfig;
use crate::types::{CandidateFile, CanonicalTrack, Isrc, ScoredResult, TrackIdentity};

/// A comparable view over an identity plus whatever canonical metadata
/// was resolved for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackRef<'a> {
    pub artist: &'a str,
    pub title: Option<&'a str>,
    pub isrc: Option<&'a Isrc>,
    pub external_id: Option<&'a str>
}

impl<'a> TrackRef<'a> {
    pub fn of(identity: &'a TrackIdentity, canonical: Option<&'a CanonicalTrack>) -> Self {
        Self {
            artist: &identity.artist,
            title: identity.title.as_deref(),
            // the identity's own ISRC wins; canonical fills the gap
            isrc: identity.isrc.as_ref().or_else(|| canonical.and_then(|c| c.isrc.as_ref())),
            external_id: canonical.map(|c| c.external_id.as_str())
        }
    }
}

fn strip_brackets(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0_usize;
    for c in s.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Lowercase, drop bracketed qualifiers ("(Remastered)", "[feat. X]"),
/// map punctuation to spaces, collapse whitespace.
pub fn normalize(s: &str) -> String {
    let mut cleaned = String::with_capacity(s.len());
    for c in strip_brackets(s).chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                cleaned.push(lower);
            }
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity ratio on normalized text, 0.0..=1.0.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize(a), &normalize(b))
}

/// Whether two references denote the same underlying recording.
/// Strategies run in priority order; the first decisive one wins.
/// Symmetric in its arguments.
pub fn same_recording(a: &TrackRef, b: &TrackRef, cfg: &MatchingConfig) -> bool {
    // ISRC is ground truth when both sides carry one
    if let (Some(ia), Some(ib)) = (a.isrc, b.isrc) {
        if !ia.is_empty() && !ib.is_empty() && ia.canonical() == ib.canonical() {
            return true;
        }
    }

    // two searches that resolve to the same catalog entry
    if let (Some(xa), Some(xb)) = (a.external_id, b.external_id) {
        if !xa.is_empty() && xa == xb {
            return true;
        }
    }

    // fuzzy fallback, intentionally conservative: prefer keeping a
    // possible duplicate over silently merging distinct recordings
    let title_a = normalize(a.title.unwrap_or(""));
    let title_b = normalize(b.title.unwrap_or(""));
    if title_a.is_empty() || title_b.is_empty() {
        // artist-only identities dedup by exact key in the store, not here
        return false;
    }

    let artist_sim = strsim::normalized_levenshtein(
        &normalize(a.artist), &normalize(b.artist)
    );
    if artist_sim < cfg.min_artist_similarity {
        return false;
    }

    let title_sim = strsim::normalized_levenshtein(&title_a, &title_b);
    if title_sim >= cfg.min_title_similarity {
        return true;
    }

    let contained = title_a.contains(&title_b) || title_b.contains(&title_a);
    contained && title_sim >= cfg.min_superset_similarity
}

/// Exact within-record dedup key: one peer sharing one path.
pub fn dedup_key(file: &CandidateFile) -> (String, String) {
    (file.peer.clone(), file.filename.clone())
}

/// Whether two candidates are the same file: exact (peer, filename),
/// or sizes within tolerance and near-identical filenames.
pub fn duplicate_files(a: &CandidateFile, b: &CandidateFile, cfg: &MatchingConfig) -> bool {
    if a.peer == b.peer && a.filename == b.filename {
        return true;
    }
    let larger = a.size.max(b.size);
    if larger == 0 {
        return false;
    }
    let delta = a.size.abs_diff(b.size) as f64;
    if delta / larger as f64 > cfg.size_tolerance {
        return false;
    }
    similarity(&a.filename, &b.filename) >= cfg.min_filename_similarity
}

/// Drops within-record duplicates, keeping the better-ranked copy.
pub fn dedup_within(mut results: Vec<ScoredResult>, cfg: &MatchingConfig) -> Vec<ScoredResult> {
    results.sort_by(crate::score::ranking);
    let mut kept: Vec<ScoredResult> = Vec::with_capacity(results.len());
    'candidates: for result in results {
        for retained in &kept {
            if duplicate_files(&retained.file, &result.file, cfg) {
                continue 'candidates;
            }
        }
        kept.push(result);
    }
    kept
}
