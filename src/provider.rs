//!
//! src/provider.rs
//!
//! Peer-search boundary: opens a search on slskd, waits out the
//! configured window and flattens whatever arrived into candidates
//!

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::errors::ScoutError;
use crate::fetch::{http_with_retry, SlskdClient};
use crate::types::CandidateFile;

/// Best-effort search against the peer network. Returns whatever
/// arrived before the timeout; an empty list is a valid outcome.
/// Connectivity and auth failures surface as `ScoutError::Transport`.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        timeout: Duration
    ) -> Result<Vec<CandidateFile>, ScoutError>;
}

pub struct SlskdProvider {
    client: SlskdClient,
    retry: RetryConfig,
    poll_interval: Duration
}

impl SlskdProvider {
    pub fn new(client: SlskdClient, retry: RetryConfig, poll_interval: Duration) -> Self {
        Self { client, retry, poll_interval }
    }
}

#[async_trait]
impl SearchProvider for SlskdProvider {
    async fn search(
        &self,
        query: &str,
        timeout: Duration
    ) -> Result<Vec<CandidateFile>, ScoutError> {
        let started = Instant::now();

        let opened = http_with_retry(
            self.client.start_search(query, timeout.as_millis() as u64),
            &self.retry
        ).await?;
        let search_id = opened.get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ScoutError::Parse("search response missing id".to_string()))?
            .to_string();
        debug!(%query, search_id = %search_id, "slskd.search.open");

        // wait for slskd to finish collecting, bounded by the window
        while started.elapsed() < timeout {
            sleep(self.poll_interval).await;
            let state = match http_with_retry(
                self.client.search_state(&search_id), &self.retry
            ).await {
                Ok(v) => v,
                Err(e @ ScoutError::Transport(_)) => return Err(e),
                Err(e) => {
                    warn!(search_id = %search_id, error = %e, "slskd.search.state");
                    continue;
                }
            };
            let done = state.get("state")
                .and_then(|v| v.as_str())
                .map(|s| s.starts_with("Completed"))
                .unwrap_or(false);
            if done {
                break;
            }
        }

        let responses = match http_with_retry(
            self.client.search_responses(&search_id), &self.retry
        ).await {
            Ok(v) => v,
            Err(e @ ScoutError::Transport(_)) => return Err(e),
            Err(e) => {
                // whatever went wrong collecting, treat as zero results
                warn!(search_id = %search_id, error = %e, "slskd.search.responses");
                return Ok(Vec::new());
            }
        };

        let files = parse_responses(&responses);
        info!(
            %query,
            results = files.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "slskd.search.done"
        );
        Ok(files)
    }
}

/// Flattens slskd search responses (one entry per peer, carrying both
/// open and locked file lists) into candidates.
fn parse_responses(v: &serde_json::Value) -> Vec<CandidateFile> {
    let mut out = Vec::new();
    let Some(responses) = v.as_array() else { return out };
    for response in responses {
        let peer = response.get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let has_free_slot = response.get("hasFreeUploadSlot")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let queue_depth = response.get("queueLength")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let speed_bytes = response.get("uploadSpeed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        for (list, locked) in [("files", false), ("lockedFiles", true)] {
            let Some(files) = response.get(list).and_then(|v| v.as_array()) else {
                continue;
            };
            for file in files {
                let filename = file.get("filename")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if filename.is_empty() {
                    continue;
                }
                out.push(CandidateFile {
                    peer: peer.clone(),
                    extension: extension_of(&filename),
                    size: file.get("size").and_then(|v| v.as_u64()).unwrap_or(0),
                    bitrate: file.get("bitRate").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
                    filename,
                    queue_depth,
                    has_free_slot,
                    speed_bytes,
                    locked
                });
            }
        }
    }
    out
}

pub fn extension_of(filename: &str) -> String {
    match filename.rfind('.') {
        Some(pos) if pos + 1 < filename.len() => filename[pos + 1..].to_ascii_lowercase(),
        _ => String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_suffix() {
        assert_eq!(extension_of("Music\\Ado\\01 - Usseewa.FLAC"), "flac");
        assert_eq!(extension_of("track.mp3"), "mp3");
        assert_eq!(extension_of("no-extension"), "");
        assert_eq!(extension_of("trailing-dot."), "");
    }

    #[test]
    fn responses_flatten_to_candidates() {
        let payload = serde_json::json!([
            {
                "username": "peer-a",
                "hasFreeUploadSlot": true,
                "queueLength": 0,
                "uploadSpeed": 3_000_000_u64,
                "files": [
                    { "filename": "Music\\Ado\\01 - Usseewa.flac", "size": 38_000_000_u64, "bitRate": 0 },
                    { "filename": "Music\\Ado\\02 - Readymade.mp3", "size": 9_000_000_u64, "bitRate": 320 }
                ],
                "lockedFiles": [
                    { "filename": "Private\\Ado\\03 - Gira Gira.flac", "size": 41_000_000_u64 }
                ]
            },
            {
                "username": "peer-b",
                "hasFreeUploadSlot": false,
                "queueLength": 12,
                "uploadSpeed": 90_000_u64,
                "files": [
                    { "filename": "shared/ado - usseewa.mp3", "size": 7_500_000_u64, "bitRate": 192 }
                ]
            }
        ]);

        let files = parse_responses(&payload);
        assert_eq!(files.len(), 4);

        let flac = &files[0];
        assert_eq!(flac.peer, "peer-a");
        assert_eq!(flac.extension, "flac");
        assert_eq!(flac.bitrate, 0);
        assert!(flac.has_free_slot);
        assert!(!flac.locked);

        let locked = files.iter().find(|f| f.locked).unwrap();
        assert_eq!(locked.filename, "Private\\Ado\\03 - Gira Gira.flac");
        assert_eq!(locked.peer, "peer-a");

        let queued = files.iter().find(|f| f.peer == "peer-b").unwrap();
        assert_eq!(queued.queue_depth, 12);
        assert_eq!(queued.speed_bytes, 90_000);
        assert!(!queued.has_free_slot);
    }

    #[test]
    fn malformed_payload_yields_no_candidates() {
        assert!(parse_responses(&serde_json::json!({"not": "an array"})).is_empty());
        assert!(parse_responses(&serde_json::json!([{ "username": "x" }])).is_empty());
    }
}
