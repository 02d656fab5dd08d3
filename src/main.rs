//!
//! src/main.rs
//!
//! CLI surface over the scout: start a batch from a list file and poll
//! progress until the queue drains, plus small store maintenance
//! commands for the review workflow
//!

mod config;
mod errors;
mod fetch;
mod logging;
mod matching;
mod persistent;
mod provider;
mod resolver;
mod score;
mod scout;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::errors::ScoutError;
use crate::persistent::{DownloadRecord, Persistent};
use crate::scout::BatchState;
use crate::types::TrackIdentity;

/// "Artist - Title", "Artist<TAB>Title", or just "Artist".
fn parse_line(line: &str) -> Option<TrackIdentity> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (artist, title) = if let Some((artist, title)) = line.split_once('\t') {
        (artist, Some(title))
    } else if let Some((artist, title)) = line.split_once(" - ") {
        (artist, Some(title))
    } else {
        (line, None)
    };
    Some(TrackIdentity::new(
        artist.trim(),
        title.map(str::trim).filter(|t| !t.is_empty())
    ))
}

/// One identity per line; blank lines and '#' comments are skipped.
fn read_identities(path: &str) -> Result<Vec<TrackIdentity>, ScoutError> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().filter_map(parse_line).collect())
}

fn usage() -> ScoutError {
    ScoutError::Config(
        "usage: track-scout search [--force] <list-file> \
         | stats | review <line> | delete <line> | downloaded <line>".to_string()
    )
}

async fn open_store(cfg: &AppConfig) -> Result<Arc<Persistent>, ScoutError> {
    std::fs::create_dir_all(&cfg.persistence.data_dir)?;
    Ok(Arc::new(Persistent::init(&cfg.persistence.db_url).await?))
}

async fn run_search(cfg: AppConfig, path: &str, force: bool) -> Result<(), ScoutError> {
    let identities = read_identities(path)?;
    if identities.is_empty() {
        return Err(ScoutError::Config(format!("no identities found in {path}")));
    }

    let store = open_store(&cfg).await?;
    let slskd = fetch::SlskdClient::new(&cfg.http, &cfg.slskd)?;
    let musicbrainz = fetch::MusicBrainzClient::new(&cfg.http, &cfg.musicbrainz)?;

    // fail fast when the search service is unreachable or rejects the key
    match fetch::http_with_retry(slskd.application_state(), &cfg.http.retry).await {
        Ok(_) => info!(url = %cfg.slskd.base_url, "slskd.health.ok"),
        Err(e) => {
            error!(url = %cfg.slskd.base_url, error = %e, "slskd.health.failed");
            return Err(e);
        }
    }

    let provider = provider::SlskdProvider::new(
        slskd, cfg.http.retry.clone(), cfg.concurrency.poll_interval
    );
    let resolver = resolver::MusicBrainzResolver::new(
        musicbrainz, cfg.http.retry.clone(), cfg.musicbrainz.min_interval
    );
    let scout = Arc::new(scout::Scout::new(
        cfg.thresholds,
        cfg.matching,
        cfg.concurrency.clone(),
        Arc::new(provider),
        Arc::new(resolver),
        store.clone()
    ));

    let start = scout.start_batch(identities, force).await?;
    for (identity, reason) in &start.skipped {
        warn!(artist = %identity.artist, title = ?identity.title,
            reason = reason.as_str(), "scout.enqueue.skip");
    }
    info!(session = %start.session_id, queued = start.queued, "scout.cli.start");

    {
        let scout = scout.clone();
        let session = start.session_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(msg = "cancelling batch", "scout.signal");
                scout.cancel(&session);
            }
        });
    }

    loop {
        let progress = scout.progress();
        info!(
            state = progress.state.as_str(),
            completed = progress.completed,
            total = progress.total,
            current = progress.current.as_deref().unwrap_or("-"),
            "scout.cli.progress"
        );
        if progress.state != BatchState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let finished = scout.progress();
    let stats = store.stats().await?;
    info!(
        state = finished.state.as_str(),
        completed = finished.completed,
        total_records = stats.total_records,
        with_results = stats.with_results,
        reviewed = stats.reviewed,
        total_files = stats.total_files,
        "scout.cli.summary"
    );

    if finished.state == BatchState::Failed {
        return Err(ScoutError::Transport(
            finished.error.unwrap_or_else(|| "batch failed".to_string())
        ));
    }
    Ok(())
}

async fn run_stats(cfg: AppConfig) -> Result<(), ScoutError> {
    let store = open_store(&cfg).await?;
    let stats = store.stats().await?;
    let downloads = store.download_stats().await?;
    info!(
        total_records = stats.total_records,
        with_results = stats.with_results,
        reviewed = stats.reviewed,
        total_files = stats.total_files,
        downloads = downloads.total_downloads,
        downloads_with_isrc = downloads.with_isrc,
        downloads_without_isrc = downloads.without_isrc,
        "scout.cli.stats"
    );
    Ok(())
}

async fn run_review(cfg: AppConfig, line: &str) -> Result<(), ScoutError> {
    let identity = parse_line(line).ok_or_else(usage)?;
    let store = open_store(&cfg).await?;
    if !store.mark_reviewed(&identity.queue_key()).await? {
        return Err(ScoutError::NotFound(identity.label()));
    }
    info!(record = %identity.label(), "scout.cli.reviewed");
    Ok(())
}

async fn run_delete(cfg: AppConfig, line: &str) -> Result<(), ScoutError> {
    let identity = parse_line(line).ok_or_else(usage)?;
    let store = open_store(&cfg).await?;
    if !store.delete_record(&identity.queue_key()).await? {
        return Err(ScoutError::NotFound(identity.label()));
    }
    info!(record = %identity.label(), "scout.cli.deleted");
    Ok(())
}

/// Records the top retained result of a record as manually downloaded,
/// carrying the canonical ISRC into the ledger when one was resolved.
async fn run_downloaded(cfg: AppConfig, line: &str) -> Result<(), ScoutError> {
    let identity = parse_line(line).ok_or_else(usage)?;
    let store = open_store(&cfg).await?;
    let record = store.get_record(&identity.queue_key()).await?
        .ok_or_else(|| ScoutError::NotFound(identity.label()))?;

    let best = record.results.first();
    store.record_download(&DownloadRecord {
        isrc: record.canonical.as_ref().and_then(|c| c.isrc.clone()),
        artist: record.identity.artist.clone(),
        title: record.identity.title.clone().unwrap_or_default(),
        album: record.identity.album.clone(),
        peer: best.map(|r| r.file.peer.clone()),
        filename: best.map(|r| r.file.filename.clone()),
        size: best.map(|r| r.file.size as i64),
        bitrate: best.map(|r| i64::from(r.file.bitrate)),
        external_id: record.canonical.as_ref().map(|c| c.external_id.clone()),
        downloaded_at: 0
    }).await?;

    info!(record = %identity.label(),
        filename = best.map(|r| r.file.filename.as_str()).unwrap_or("-"),
        "scout.cli.downloaded");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ScoutError> {
    let cfg = config::load_config()?;
    let _logger = logging::init_logging(&cfg.logging);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else { return Err(usage()) };

    match command.as_str() {
        "stats" => run_stats(cfg).await,
        "review" => run_review(cfg, args.get(1).ok_or_else(usage)?).await,
        "delete" => run_delete(cfg, args.get(1).ok_or_else(usage)?).await,
        "downloaded" => run_downloaded(cfg, args.get(1).ok_or_else(usage)?).await,
        _ => {
            let rest = if command == "search" { &args[1..] } else { &args[..] };
            let mut force = false;
            let mut path: Option<&str> = None;
            for arg in rest {
                match arg.as_str() {
                    "--force" => force = true,
                    _ if arg.starts_with("--") => return Err(usage()),
                    _ => path = Some(arg)
                }
            }
            let path = path.ok_or_else(usage)?;
            run_search(cfg, path, force).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_file_parses_artists_and_titles() -> Result<(), ScoutError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tracks.txt");
        std::fs::write(&path, "\
# favourites
Ado - Usseewa
Chon\tStory
Kikuo

Polyphia - G.O.A.T. - Live
")?;

        let identities = read_identities(path.to_str().unwrap())?;
        assert_eq!(identities.len(), 4);
        assert_eq!(identities[0].artist, "Ado");
        assert_eq!(identities[0].title.as_deref(), Some("Usseewa"));
        assert_eq!(identities[1].artist, "Chon");
        assert_eq!(identities[1].title.as_deref(), Some("Story"));
        assert_eq!(identities[2].artist, "Kikuo");
        assert!(identities[2].title.is_none());
        // only the first " - " splits, the rest stays in the title
        assert_eq!(identities[3].title.as_deref(), Some("G.O.A.T. - Live"));
        Ok(())
    }

    #[test]
    fn comments_and_blanks_are_ignored() {
        assert!(parse_line("# comment").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("Ado").is_some());
    }

    #[tokio::test]
    async fn full_stack_testbench() -> Result<(), ScoutError> {
        dotenvy::dotenv().ok();
        if std::env::var("LIVE_HTTP").ok().as_deref() != Some("1") {
            eprintln!("Set LIVE_HTTP=1 to run");
            return Ok(());
        }

        let cfg = config::load_config()?;
        let slskd = fetch::SlskdClient::new(&cfg.http, &cfg.slskd)?;
        let response = slskd.application_state().send().await?;
        assert!(response.status().is_success(),
            "slskd application state: {}", response.status());

        let musicbrainz = fetch::MusicBrainzClient::new(&cfg.http, &cfg.musicbrainz)?;
        let response = musicbrainz
            .search_recording("artist:\"Ado\" AND recording:\"Usseewa\"")
            .send()
            .await?;
        assert!(response.status().is_success(),
            "musicbrainz search: {}", response.status());

        let body: serde_json::Value = response.json().await?;
        println!("musicbrainz: {}", serde_json::to_string_pretty(&body)?);
        Ok(())
    }
}
