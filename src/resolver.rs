//!
//! src/resolver.rs
//!
//! Canonical-metadata boundary: looks a track up on MusicBrainz and
//! caches the verdict for the life of the process
//!

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::errors::ScoutError;
use crate::fetch::{http_with_retry, MusicBrainzClient};
use crate::matching;
use crate::types::{CanonicalTrack, Isrc, ReleaseType};

/// Zero-or-one canonical descriptor per (artist, title). Lookup
/// failures degrade to None; they never abort the caller.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, artist: &str, title: &str) -> Option<CanonicalTrack>;

    /// Drops the cached entry so a forced re-search resolves fresh.
    async fn evict(&self, artist: &str, title: &str);
}

/// Minimum spacing between calls to the metadata service.
#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    state: tokio::sync::Mutex<Instant>
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: tokio::sync::Mutex::new(Instant::now() - min_interval)
        }
    }

    pub async fn wait(&self) {
        let mut last = self.state.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

pub struct MusicBrainzResolver {
    client: MusicBrainzClient,
    retry: RetryConfig,
    gate: RateGate,
    cache: tokio::sync::Mutex<HashMap<String, Option<CanonicalTrack>>>
}

impl MusicBrainzResolver {
    pub fn new(client: MusicBrainzClient, retry: RetryConfig, min_interval: Duration) -> Self {
        Self {
            client,
            retry,
            gate: RateGate::new(min_interval),
            cache: tokio::sync::Mutex::new(HashMap::new())
        }
    }

    async fn lookup(&self, artist: &str, title: &str) ->
        Result<Option<CanonicalTrack>, ScoutError> {
        self.gate.wait().await;
        let lucene = format!(
            "artist:\"{}\" AND recording:\"{}\"",
            escape_lucene(artist), escape_lucene(title)
        );
        let value = http_with_retry(
            self.client.search_recording(&lucene), &self.retry
        ).await?;
        Ok(parse_recording(&value, artist, title))
    }
}

#[async_trait]
impl MetadataResolver for MusicBrainzResolver {
    async fn resolve(&self, artist: &str, title: &str) -> Option<CanonicalTrack> {
        let key = cache_key(artist, title);
        if let Some(hit) = self.cache.lock().await.get(&key) {
            debug!(%artist, %title, "musicbrainz.cache.hit");
            return hit.clone();
        }

        match self.lookup(artist, title).await {
            Ok(found) => {
                match &found {
                    Some(canonical) => debug!(%artist, %title,
                        mbid = %canonical.external_id,
                        release_type = canonical.release_type.as_str(),
                        "musicbrainz.resolve.hit"),
                    None => debug!(%artist, %title, "musicbrainz.resolve.miss")
                }
                // both hits and genuine not-found verdicts are cached
                self.cache.lock().await.insert(key, found.clone());
                found
            }
            Err(e) => {
                // transient failure: degrade to fuzzy-only matching, do not cache
                warn!(%artist, %title, error = %e, "musicbrainz.resolve.degraded");
                None
            }
        }
    }

    async fn evict(&self, artist: &str, title: &str) {
        self.cache.lock().await.remove(&cache_key(artist, title));
    }
}

fn cache_key(artist: &str, title: &str) -> String {
    format!("{}\u{1f}{}", matching::normalize(artist), matching::normalize(title))
}

fn escape_lucene(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Maps the best search hit to a canonical descriptor. Absent fields
/// degrade rather than fail.
fn parse_recording(
    value: &serde_json::Value,
    artist: &str,
    title: &str
) -> Option<CanonicalTrack> {
    let best = value.get("recordings")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())?;

    let external_id = best.get("id").and_then(|v| v.as_str())?.to_string();
    let mb_title = best.get("title")
        .and_then(|v| v.as_str())
        .unwrap_or(title)
        .to_string();
    let mb_artist = best.pointer("/artist-credit/0/name")
        .and_then(|v| v.as_str())
        .unwrap_or(artist)
        .to_string();
    let duration_secs = best.get("length")
        .and_then(|v| v.as_u64())
        .map(|ms| (ms / 1000) as u32)
        .unwrap_or(0);
    let release_type = best.pointer("/releases/0/release-group/primary-type")
        .and_then(|v| v.as_str())
        .map(ReleaseType::parse)
        .unwrap_or(ReleaseType::Unknown);
    let isrc = best.get("isrcs")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|v| v.as_str())
        .map(|s| Isrc(s.to_string()));

    Some(CanonicalTrack {
        external_id,
        title: mb_title,
        artist: mb_artist,
        duration_secs,
        release_type,
        isrc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_best_recording_hit() {
        let value = serde_json::json!({
            "recordings": [
                {
                    "id": "8f3471b5-7e6a-48da-86a9-c1c07a0f47ae",
                    "title": "うっせぇわ",
                    "length": 204_000_u64,
                    "isrcs": ["JPU902002524"],
                    "artist-credit": [ { "name": "Ado" } ],
                    "releases": [
                        { "release-group": { "primary-type": "Single" } }
                    ]
                },
                { "id": "ignored-second-hit", "title": "other" }
            ]
        });

        let canonical = parse_recording(&value, "Ado", "Usseewa").unwrap();
        assert_eq!(canonical.external_id, "8f3471b5-7e6a-48da-86a9-c1c07a0f47ae");
        assert_eq!(canonical.title, "うっせぇわ");
        assert_eq!(canonical.artist, "Ado");
        assert_eq!(canonical.duration_secs, 204);
        assert_eq!(canonical.release_type, ReleaseType::Single);
        assert_eq!(canonical.isrc, Some(Isrc("JPU902002524".to_string())));
    }

    #[test]
    fn missing_fields_degrade_to_defaults() {
        let value = serde_json::json!({
            "recordings": [ { "id": "mbid-1" } ]
        });
        let canonical = parse_recording(&value, "Ado", "Usseewa").unwrap();
        assert_eq!(canonical.title, "Usseewa");
        assert_eq!(canonical.artist, "Ado");
        assert_eq!(canonical.duration_secs, 0);
        assert_eq!(canonical.release_type, ReleaseType::Unknown);
        assert!(canonical.isrc.is_none());
    }

    #[test]
    fn empty_result_set_is_a_miss() {
        assert!(parse_recording(&serde_json::json!({"recordings": []}), "a", "t").is_none());
        assert!(parse_recording(&serde_json::json!({}), "a", "t").is_none());
    }

    #[test]
    fn cache_key_ignores_case_and_qualifiers() {
        assert_eq!(
            cache_key("The Artist", "Song (Remastered)"),
            cache_key("the ARTIST", "song")
        );
    }

    #[test]
    fn lucene_quotes_are_escaped() {
        assert_eq!(escape_lucene("say \"hi\""), "say \\\"hi\\\"");
    }

    #[tokio::test]
    async fn rate_gate_spaces_out_calls() {
        let gate = RateGate::new(Duration::from_millis(40));
        let start = Instant::now();
        gate.wait().await; // first call passes immediately
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
