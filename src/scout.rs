//!
//! src/scout.rs
//!
//! Batch driver: pulls identities off the pending queue with a fixed
//! worker pool, runs each through resolve -> search -> score -> dedup,
//! and merges the outcome into the store. One batch at a time.
//!

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{ConcurrencyConfig, MatchingConfig, QualityThresholds};
use crate::errors::ScoutError;
use crate::matching::{self, TrackRef};
use crate::persistent::Persistent;
use crate::provider::SearchProvider;
use crate::resolver::MetadataResolver;
use crate::score::{self, Evaluation};
use crate::types::{CanonicalTrack, ScoredResult, TrackIdentity, TrackRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed
}

impl BatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchState::Idle      => "idle",
            BatchState::Running   => "running",
            BatchState::Completed => "completed",
            BatchState::Cancelled => "cancelled",
            BatchState::Failed    => "failed"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyArtist,
    AlreadySearched,
    DuplicateInBatch
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::EmptyArtist      => "empty-artist",
            SkipReason::AlreadySearched  => "already-searched",
            SkipReason::DuplicateInBatch => "duplicate-in-batch"
        }
    }
}

/// Point-in-time view of the active (or last) batch. Cloned out under
/// one lock, so total/completed are never observed torn.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub session_id: Option<String>,
    pub state: BatchState,
    pub total: usize,
    pub completed: usize,
    pub current: Option<String>,
    pub error: Option<String>
}

#[derive(Debug)]
pub struct BatchStart {
    pub session_id: String,
    pub queued: usize,
    pub skipped: Vec<(TrackIdentity, SkipReason)>
}

#[derive(Debug, Clone)]
struct ProgressInner {
    session_id: Option<String>,
    state: BatchState,
    total: usize,
    completed: usize,
    current: Option<String>,
    error: Option<String>
}

impl ProgressInner {
    fn idle() -> Self {
        Self {
            session_id: None,
            state: BatchState::Idle,
            total: 0,
            completed: 0,
            current: None,
            error: None
        }
    }
}

pub struct Scout {
    thresholds: QualityThresholds,
    matching: MatchingConfig,
    concurrency: ConcurrencyConfig,
    provider: Arc<dyn SearchProvider>,
    resolver: Arc<dyn MetadataResolver>,
    store: Arc<Persistent>,
    progress: Arc<Mutex<ProgressInner>>,
    cancel: Mutex<CancellationToken>
}

impl Scout {
    pub fn new(
        thresholds: QualityThresholds,
        matching: MatchingConfig,
        concurrency: ConcurrencyConfig,
        provider: Arc<dyn SearchProvider>,
        resolver: Arc<dyn MetadataResolver>,
        store: Arc<Persistent>
    ) -> Self {
        Self {
            thresholds,
            matching,
            concurrency,
            provider,
            resolver,
            store,
            progress: Arc::new(Mutex::new(ProgressInner::idle())),
            cancel: Mutex::new(CancellationToken::new())
        }
    }

    /// Enqueues a batch and returns immediately; the worker pool runs
    /// in the background. Rejected while another batch is running.
    /// Identities already in the store are skipped unless `force`.
    pub async fn start_batch(
        &self,
        identities: Vec<TrackIdentity>,
        force: bool
    ) -> Result<BatchStart, ScoutError> {
        let mut queued: VecDeque<TrackIdentity> = VecDeque::new();
        let mut skipped: Vec<(TrackIdentity, SkipReason)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for identity in identities {
            if identity.artist.trim().is_empty() {
                skipped.push((identity, SkipReason::EmptyArtist));
                continue;
            }
            let key = identity.queue_key();
            if !seen.insert(key.clone()) {
                skipped.push((identity, SkipReason::DuplicateInBatch));
                continue;
            }
            if !force && self.store.contains(&key).await? {
                skipped.push((identity, SkipReason::AlreadySearched));
                continue;
            }
            queued.push_back(identity);
        }

        if force {
            // forced re-search must not reuse stale canonical metadata
            for identity in &queued {
                let title = identity.title.as_deref().unwrap_or("");
                self.resolver.evict(&identity.artist, title).await;
            }
        }

        let session_id = Uuid::new_v4().to_string();
        let total = queued.len();
        let token = CancellationToken::new();
        {
            // token swap happens under the progress lock so a racing
            // cancel() can never hit a stale token
            let mut progress = self.progress.lock().unwrap();
            if progress.state == BatchState::Running {
                return Err(ScoutError::BatchActive(
                    progress.session_id.clone().unwrap_or_default()
                ));
            }
            *progress = ProgressInner {
                session_id: Some(session_id.clone()),
                state: BatchState::Running,
                total,
                completed: 0,
                current: None,
                error: None
            };
            *self.cancel.lock().unwrap() = token.clone();
        }

        let ctx = BatchCtx {
            thresholds: self.thresholds,
            matching: self.matching,
            concurrency: self.concurrency.clone(),
            provider: self.provider.clone(),
            resolver: self.resolver.clone(),
            store: self.store.clone(),
            progress: self.progress.clone(),
            queue: Arc::new(tokio::sync::Mutex::new(queued)),
            token,
            session_id: session_id.clone(),
            fatal: Arc::new(Mutex::new(None))
        };
        tokio::spawn(run_batch(ctx));

        info!(session = %session_id, queued = total, skipped = skipped.len(),
            "scout.batch.queued");
        Ok(BatchStart { session_id, queued: total, skipped })
    }

    /// Requests cooperative cancellation of the given session. In-flight
    /// searches finish; nothing new is dispatched. Returns false when
    /// the session is not the one currently running.
    pub fn cancel(&self, session_id: &str) -> bool {
        let progress = self.progress.lock().unwrap();
        let active = progress.state == BatchState::Running
            && progress.session_id.as_deref() == Some(session_id);
        if !active {
            return false;
        }
        self.cancel.lock().unwrap().cancel();
        warn!(session = %session_id, "scout.batch.cancel");
        true
    }

    pub fn progress(&self) -> ProgressSnapshot {
        let progress = self.progress.lock().unwrap();
        ProgressSnapshot {
            session_id: progress.session_id.clone(),
            state: progress.state,
            total: progress.total,
            completed: progress.completed,
            current: progress.current.clone(),
            error: progress.error.clone()
        }
    }
}

/// Everything a worker needs, cloned per task.
#[derive(Clone)]
struct BatchCtx {
    thresholds: QualityThresholds,
    matching: MatchingConfig,
    concurrency: ConcurrencyConfig,
    provider: Arc<dyn SearchProvider>,
    resolver: Arc<dyn MetadataResolver>,
    store: Arc<Persistent>,
    progress: Arc<Mutex<ProgressInner>>,
    queue: Arc<tokio::sync::Mutex<VecDeque<TrackIdentity>>>,
    token: CancellationToken,
    session_id: String,
    fatal: Arc<Mutex<Option<String>>>
}

async fn run_batch(ctx: BatchCtx) {
    info!(session = %ctx.session_id, workers = ctx.concurrency.workers,
        "scout.batch.start");

    let mut handles = Vec::with_capacity(ctx.concurrency.workers);
    for worker_id in 0..ctx.concurrency.workers {
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move { worker_loop(ctx, worker_id).await }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    let fatal = ctx.fatal.lock().unwrap().take();
    let mut progress = ctx.progress.lock().unwrap();
    progress.current = None;
    progress.state = if let Some(reason) = fatal {
        progress.error = Some(reason);
        BatchState::Failed
    } else if ctx.token.is_cancelled() {
        BatchState::Cancelled
    } else {
        BatchState::Completed
    };
    info!(session = %ctx.session_id, state = progress.state.as_str(),
        completed = progress.completed, total = progress.total, "scout.batch.stop");
}

async fn worker_loop(ctx: BatchCtx, worker_id: usize) {
    debug!(worker = worker_id, "scout.worker.start");
    let mut rng = SmallRng::from_entropy();

    loop {
        if ctx.token.is_cancelled() {
            break;
        }
        let identity = { ctx.queue.lock().await.pop_front() };
        let Some(identity) = identity else { break };

        {
            let mut progress = ctx.progress.lock().unwrap();
            progress.current = Some(identity.label());
        }

        match process_identity(&ctx, &identity).await {
            Ok(()) => {
                let mut progress = ctx.progress.lock().unwrap();
                progress.completed += 1;
            }
            Err(ScoutError::Transport(reason)) => {
                // retrying further items is pointless; park the batch
                error!(worker = worker_id, artist = %identity.artist,
                    error = %reason, "scout.batch.transport");
                *ctx.fatal.lock().unwrap() = Some(reason);
                ctx.token.cancel();
            }
            Err(e) => {
                error!(worker = worker_id, artist = %identity.artist,
                    error = %e, "scout.item.failed");
                let mut progress = ctx.progress.lock().unwrap();
                progress.completed += 1;
            }
        }

        // small randomized delay before releasing the slot, so the
        // pool doesn't burst the search service
        if !ctx.token.is_cancelled() {
            let min = ctx.concurrency.jitter_min.as_millis() as u64;
            let max = ctx.concurrency.jitter_max.as_millis() as u64;
            let jitter = if max > min { rng.gen_range(min..=max) } else { min };
            if jitter > 0 {
                sleep(Duration::from_millis(jitter)).await;
            }
        }
    }
    debug!(worker = worker_id, "scout.worker.stop");
}

async fn process_identity(ctx: &BatchCtx, identity: &TrackIdentity) ->
    Result<(), ScoutError> {
    debug!(artist = %identity.artist, title = ?identity.title, "scout.item.process");

    let canonical = match identity.title.as_deref() {
        Some(title) if !title.trim().is_empty() => {
            ctx.resolver.resolve(&identity.artist, title).await
        }
        _ => None
    };

    if let Some(isrc) = canonical.as_ref().and_then(|c| c.isrc.as_ref()) {
        // a prior manual download of this recording, possibly under a
        // different language or edition, is worth flagging up front
        if ctx.store.is_downloaded(isrc).await? {
            warn!(artist = %identity.artist, isrc = %isrc.canonical(),
                "scout.item.already_downloaded");
        }
    }

    let candidates = ctx.provider
        .search(&identity.query(), ctx.concurrency.search_timeout)
        .await?;
    let found = candidates.len();

    let mut results: Vec<ScoredResult> = Vec::new();
    let mut rejected = 0_usize;
    for file in candidates {
        match score::evaluate(&file, &ctx.thresholds) {
            Evaluation::Accepted { score, instant } => {
                results.push(ScoredResult { file, score, instant });
            }
            Evaluation::Rejected(reason) => {
                rejected += 1;
                debug!(peer = %file.peer, filename = %file.filename,
                    reason = reason.as_str(), "scout.candidate.reject");
            }
        }
    }

    let results = matching::dedup_within(results, &ctx.matching);
    let results = suppress_cross_record(ctx, identity, canonical.as_ref(), results).await?;

    let record = TrackRecord::new(
        identity.clone(),
        canonical,
        results,
        ctx.thresholds.top_results,
        &ctx.session_id
    );
    let retained = record.results.len();
    ctx.store.replace_record(&record).await?;

    info!(artist = %identity.artist, title = ?identity.title,
        found, rejected, retained, "scout.item.done");
    Ok(())
}

/// Best-effort cross-record suppression: when another stored record is
/// judged to be the same underlying recording, drop candidates sourced
/// from (peer, filename) pairs that record already retains.
async fn suppress_cross_record(
    ctx: &BatchCtx,
    identity: &TrackIdentity,
    canonical: Option<&CanonicalTrack>,
    results: Vec<ScoredResult>
) -> Result<Vec<ScoredResult>, ScoutError> {
    if results.is_empty() {
        return Ok(results);
    }

    let own_key = identity.queue_key();
    let me = TrackRef::of(identity, canonical);
    let mut taken: HashSet<(String, String)> = HashSet::new();

    for record in ctx.store.all_records().await? {
        if record.identity.queue_key() == own_key {
            continue; // re-search replaces this record anyway
        }
        let other = TrackRef::of(&record.identity, record.canonical.as_ref());
        if matching::same_recording(&me, &other, &ctx.matching) {
            for retained in &record.results {
                taken.insert(matching::dedup_key(&retained.file));
            }
        }
    }

    if taken.is_empty() {
        return Ok(results);
    }
    let before = results.len();
    let kept: Vec<ScoredResult> = results
        .into_iter()
        .filter(|r| !taken.contains(&matching::dedup_key(&r.file)))
        .collect();
    if kept.len() < before {
        debug!(artist = %identity.artist, dropped = before - kept.len(),
            "scout.item.cross_record_dedup");
    }
    Ok(kept)
}
