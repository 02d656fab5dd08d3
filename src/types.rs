//!
//! src/types.rs
//!
//! Core data model: track identities, canonical metadata,
//! raw search candidates and the per-track result record
//!

use serde::{Deserialize, Serialize};

use crate::matching;
use crate::score;

// International standard recording code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Isrc(pub String);

impl Isrc {
    /// Comparison form: whitespace stripped, upper-cased.
    pub fn canonical(&self) -> String {
        self.0.split_whitespace().collect::<String>().to_ascii_uppercase()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// One unit of search work. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackIdentity {
    pub artist: String,
    pub title: Option<String>,
    pub album: Option<String>,
    pub isrc: Option<Isrc>
}

impl TrackIdentity {
    pub fn new(artist: &str, title: Option<&str>) -> Self {
        Self {
            artist: artist.to_string(),
            title: title.map(str::to_string),
            album: None,
            isrc: None
        }
    }

    /// Work-queue uniqueness key: normalized (artist, title), or the
    /// normalized artist alone for artist-only identities.
    pub fn queue_key(&self) -> String {
        let artist = matching::normalize(&self.artist);
        match self.title.as_deref().map(matching::normalize) {
            Some(title) if !title.is_empty() => format!("{artist}\u{1f}{title}"),
            _ => artist
        }
    }

    /// Text submitted to the peer search service.
    pub fn query(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => {
                format!("{} {}", self.artist, title)
            }
            _ => self.artist.clone()
        }
    }

    /// Human-facing label for progress reporting.
    pub fn label(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => {
                format!("{} - {}", self.artist, title)
            }
            _ => self.artist.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseType {
    Album,
    Single,
    Ep,
    Compilation,
    Unknown
}

impl ReleaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseType::Album       => "album",
            ReleaseType::Single      => "single",
            ReleaseType::Ep          => "ep",
            ReleaseType::Compilation => "compilation",
            ReleaseType::Unknown     => "unknown"
        }
    }

    pub fn parse(s: &str) -> ReleaseType {
        match s.to_ascii_lowercase().as_str() {
            "album"       => ReleaseType::Album,
            "single"      => ReleaseType::Single,
            "ep"          => ReleaseType::Ep,
            "compilation" => ReleaseType::Compilation,
            _             => ReleaseType::Unknown
        }
    }
}

/// Authoritative descriptor resolved from the metadata service.
/// Never mutated after creation, only replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTrack {
    pub external_id: String,
    pub title: String,
    pub artist: String,
    pub duration_secs: u32,
    pub release_type: ReleaseType,
    pub isrc: Option<Isrc>
}

/// One raw search hit from a peer. bitrate 0 means unknown/variable
/// (lossless formats report 0 and are scored via extension).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub peer: String,
    pub filename: String,
    pub size: u64,
    pub bitrate: u32,
    pub extension: String,
    pub queue_depth: u32,
    pub has_free_slot: bool,
    pub speed_bytes: u64,
    pub locked: bool
}

/// An accepted candidate with its computed quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredResult {
    pub file: CandidateFile,
    pub score: f64,
    pub instant: bool
}

/// The persistent aggregate for one identity. Owned by the store;
/// replaced (not merged) on re-search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub identity: TrackIdentity,
    pub canonical: Option<CanonicalTrack>,
    pub results: Vec<ScoredResult>,
    pub reviewed: bool,
    pub searched_at: i64,
    pub session_id: String
}

impl TrackRecord {
    /// Builds a record with its retained list ranking-sorted and capped
    /// at `top_results`.
    pub fn new(
        identity: TrackIdentity,
        canonical: Option<CanonicalTrack>,
        mut results: Vec<ScoredResult>,
        top_results: usize,
        session_id: &str
    ) -> Self {
        results.sort_by(score::ranking);
        results.truncate(top_results);
        Self {
            identity,
            canonical,
            results,
            reviewed: false,
            searched_at: chrono::Utc::now().timestamp(),
            session_id: session_id.to_string()
        }
    }
}
