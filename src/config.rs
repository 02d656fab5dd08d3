//!
//! src/config.rs
//!
//! All tunables live here as immutable structs passed by value at
//! construction time; nothing reads the environment at call time
//!

use std::time::Duration;
use url::Url;

use crate::errors::ScoutError;

/// Constants for HTTP Config
pub const HTTP_TIMEOUT_MS: u64 = 8000;
pub const HTTP_CONNECT_TIMEOUT_MS: u64 = 2000;
pub const HTTP_POOL_MAX_IDLE: usize = 16;
pub const HTTP_POOL_IDLE_TIMEOUT_MS: u64 = 90000;
pub const HTTP_MAX_REDIRECTS: u8 = 4;

pub const RETRY_MAX_ATTEMPTS: u8 = 3;
pub const RETRY_BASE_BACKOFF_MS: u64 = 250;
pub const RETRY_JITTER: bool = true;
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Wrapper over env::var to return an invalid environment var error
fn env_check(s: &str) -> Result<String, ScoutError> {
    match std::env::var(s) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ScoutError::Config(format!("{s} was not set"))),
    }
}

fn env_to_u32(s: &str, default: u32) -> u32 {
    std::env::var(s).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_to_u64(s: &str, default: u64) -> u64 {
    std::env::var(s).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_to_usize(s: &str, default: usize) -> usize {
    std::env::var(s).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_to_f64(s: &str, default: f64) -> f64 {
    std::env::var(s).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Ensures that url is https
fn ensure_https(url: &Url) -> Result<(), String> {
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(format!("URL must be https: {url}"))
    }
}

fn ensure_host(url: &Url, expected_host: &str) -> Result<(), String> {
    match url.host_str() {
        Some(h) if h.eq_ignore_ascii_case(expected_host) => Ok(()),
        Some(h) => Err(
            format!("Unexpected host for {url} (got {h}, expected {expected_host})")
        ),
        None => Err(format!("URL missing host: {url}"))
    }
}

fn ensure_trailing_slash(url: &mut Url) {
    if !url.path().ends_with('/') {
        let mut path = url.path().to_string();
        path.push('/');
        url.set_path(&path);
    }
}

///
/// Configuration for the slskd peer-search service
///
#[derive(Debug, Clone)]
pub struct SlskdConfig {
    pub base_url: Url,
    pub api_key: String
}

fn build_slskd() -> Result<SlskdConfig, ScoutError> {
    let api_key = env_check("SLSKD_API_KEY")?;

    let base_url = std::env::var("SLSKD_URL")
        .unwrap_or_else(|_| "http://localhost:5030/".to_string());
    let mut base_url = Url::parse(&base_url)
        .map_err(|e| ScoutError::Config(format!("SLSKD_URL invalid {e}")))?;

    // slskd is usually a LAN service, so http is fine; anything else is not
    if base_url.scheme() != "http" && base_url.scheme() != "https" {
        return Err(ScoutError::Config(format!("SLSKD_URL must be http(s): {base_url}")));
    }
    ensure_trailing_slash(&mut base_url);

    Ok(SlskdConfig { base_url, api_key })
}

///
/// Configuration for the MusicBrainz metadata service
///
#[derive(Debug, Clone)]
pub struct MusicBrainzConfig {
    pub base_url: Url,
    pub user_agent: String,
    pub search_limit: u32,
    pub min_interval: Duration
}

fn build_musicbrainz() -> Result<MusicBrainzConfig, ScoutError> {
    let base_url = std::env::var("MB_BASE_URL")
        .unwrap_or_else(|_| "https://musicbrainz.org/ws/2/".to_string());
    let mut base_url = Url::parse(&base_url)
        .map_err(|e| ScoutError::Config(format!("MB_BASE_URL invalid {e}")))?;

    ensure_https(&base_url)
        .map_err(ScoutError::Config)?;
    ensure_host(&base_url, "musicbrainz.org")
        .map_err(ScoutError::Config)?;
    ensure_trailing_slash(&mut base_url);

    let user_agent = std::env::var("MB_USER_AGENT")
        .unwrap_or_else(|_| "track-scout/0.1 ( admin@localhost )".to_string());
    let search_limit = env_to_u32("MB_SEARCH_LIMIT", 5);
    // MusicBrainz guidelines: stay under 1 request per second
    let min_interval = Duration::from_millis(env_to_u64("MB_MIN_INTERVAL_MS", 1100));

    Ok(MusicBrainzConfig { base_url, user_agent, search_limit, min_interval })
}

///
/// Configuration for Http timeouts, retries, etc.
///
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_backoff: Duration,
    pub jitter: bool,
    pub retryable_statuses: Vec<u16>
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(RETRY_BASE_BACKOFF_MS),
            jitter: RETRY_JITTER,
            retryable_statuses: RETRYABLE_STATUSES.to_vec()
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub max_redirects: u8,
    pub retry: RetryConfig
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(HTTP_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(HTTP_CONNECT_TIMEOUT_MS),
            pool_max_idle_per_host: HTTP_POOL_MAX_IDLE,
            pool_idle_timeout: Duration::from_millis(HTTP_POOL_IDLE_TIMEOUT_MS),
            max_redirects: HTTP_MAX_REDIRECTS,
            retry: RetryConfig::default()
        }
    }
}

///
/// Quality gates and scoring limits for raw search candidates
///
#[derive(Debug, Clone, Copy)]
pub struct QualityThresholds {
    pub min_bitrate: u32,       // kbps floor, waived for lossless extensions
    pub max_queue_depth: u32,
    pub min_speed_bytes: u64,   // peer upload speed floor, bytes/sec
    pub top_results: usize      // retained results per record
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_bitrate: 192,
            max_queue_depth: 50,
            min_speed_bytes: 50 * 1024,
            top_results: 5
        }
    }
}

fn build_thresholds() -> QualityThresholds {
    let d = QualityThresholds::default();
    QualityThresholds {
        min_bitrate: env_to_u32("SCOUT_MIN_BITRATE", d.min_bitrate),
        max_queue_depth: env_to_u32("SCOUT_MAX_QUEUE", d.max_queue_depth),
        min_speed_bytes: env_to_u64("SCOUT_MIN_SPEED_BYTES", d.min_speed_bytes),
        top_results: env_to_usize("SCOUT_TOP_RESULTS", d.top_results)
    }
}

///
/// Thresholds for deciding whether two track references denote the
/// same underlying recording, and for spotting re-shared files
///
#[derive(Debug, Clone, Copy)]
pub struct MatchingConfig {
    pub min_artist_similarity: f64,
    pub min_title_similarity: f64,
    pub min_superset_similarity: f64, // floor when one title contains the other
    pub min_filename_similarity: f64,
    pub size_tolerance: f64           // relative size window for duplicate files
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_artist_similarity: 0.9,
            min_title_similarity: 0.8,
            min_superset_similarity: 0.6,
            min_filename_similarity: 0.95,
            size_tolerance: 0.01
        }
    }
}

fn build_matching() -> MatchingConfig {
    let d = MatchingConfig::default();
    MatchingConfig {
        min_artist_similarity: env_to_f64("SCOUT_ARTIST_SIMILARITY", d.min_artist_similarity),
        min_title_similarity: env_to_f64("SCOUT_TITLE_SIMILARITY", d.min_title_similarity),
        min_superset_similarity: env_to_f64("SCOUT_SUPERSET_SIMILARITY", d.min_superset_similarity),
        min_filename_similarity: env_to_f64("SCOUT_FILENAME_SIMILARITY", d.min_filename_similarity),
        size_tolerance: env_to_f64("SCOUT_SIZE_TOLERANCE", d.size_tolerance)
    }
}

///
/// Configuration for the worker pool and per-search pacing
///
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub workers: usize,
    pub search_timeout: Duration,   // hard ceiling per identity
    pub poll_interval: Duration,    // how often to pull search state
    pub jitter_min: Duration,       // delay before a worker releases its slot
    pub jitter_max: Duration
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            search_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(500),
            jitter_min: Duration::from_millis(200),
            jitter_max: Duration::from_millis(500)
        }
    }
}

fn build_concurrency() -> ConcurrencyConfig {
    let d = ConcurrencyConfig::default();
    ConcurrencyConfig {
        workers: env_to_usize("SCOUT_WORKERS", d.workers).max(1),
        search_timeout: Duration::from_secs(env_to_u64(
            "SEARCH_TIMEOUT", d.search_timeout.as_secs()
        )),
        poll_interval: Duration::from_millis(env_to_u64(
            "SCOUT_POLL_INTERVAL_MS", d.poll_interval.as_millis() as u64
        )),
        jitter_min: Duration::from_millis(env_to_u64(
            "SCOUT_JITTER_MIN_MS", d.jitter_min.as_millis() as u64
        )),
        jitter_max: Duration::from_millis(env_to_u64(
            "SCOUT_JITTER_MAX_MS", d.jitter_max.as_millis() as u64
        ))
    }
}

///
/// Configuration for persistent storage in a sqlite db
///
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub data_dir: String,
    pub db_url: String
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            db_url: "sqlite:./data/scout.db".to_string()
        }
    }
}

fn build_persistence() -> PersistenceConfig {
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let db_url = std::env::var("DB_URL")
        .unwrap_or_else(|_| format!("sqlite:{data_dir}/scout.db"));
    PersistenceConfig { data_dir, db_url }
}

///
/// Configuration for Logger
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub filter_directives: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub include_file_line: bool,
    pub include_target: bool
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter_directives: "info,track_scout=debug,reqwest=warn".to_string(),
            format: LogFormat::Pretty,
            with_ansi: true,
            include_file_line: false,
            include_target: true
        }
    }
}

fn build_logging() -> LoggingConfig {
    let d = LoggingConfig::default();
    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => d.format
    };
    LoggingConfig { format, ..d }
}

///
/// AppConfig which holds everything the wiring in main needs
///
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub slskd: SlskdConfig,
    pub musicbrainz: MusicBrainzConfig,
    pub http: HttpConfig,
    pub persistence: PersistenceConfig,
    pub thresholds: QualityThresholds,
    pub matching: MatchingConfig,
    pub concurrency: ConcurrencyConfig,
    pub logging: LoggingConfig
}

///
/// Return all environment variables to caller at program start.
///
pub fn load_config() -> Result<AppConfig, ScoutError> {
    dotenvy::dotenv().ok();

    let slskd       = build_slskd()?;
    let musicbrainz = build_musicbrainz()?;
    let http        = HttpConfig::default();
    let persistence = build_persistence();
    let thresholds  = build_thresholds();
    let matching    = build_matching();
    let concurrency = build_concurrency();
    let logging     = build_logging();

    Ok(AppConfig {
        slskd, musicbrainz, http, persistence,
        thresholds, matching, concurrency, logging
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_defaults_match_documented_values() {
        let t = QualityThresholds::default();
        assert_eq!(t.min_bitrate, 192);
        assert_eq!(t.max_queue_depth, 50);
        assert_eq!(t.min_speed_bytes, 51_200);
        assert_eq!(t.top_results, 5);
    }

    #[test]
    fn matching_defaults_match_documented_values() {
        let m = MatchingConfig::default();
        assert!((m.min_artist_similarity - 0.9).abs() < f64::EPSILON);
        assert!((m.min_title_similarity - 0.8).abs() < f64::EPSILON);
        assert!((m.min_superset_similarity - 0.6).abs() < f64::EPSILON);
        assert!((m.min_filename_similarity - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn concurrency_defaults() {
        let c = ConcurrencyConfig::default();
        assert_eq!(c.workers, 8);
        assert_eq!(c.search_timeout, Duration::from_secs(15));
        assert!(c.jitter_min <= c.jitter_max);
    }

    #[test]
    fn trailing_slash_is_enforced() {
        let mut url = Url::parse("http://localhost:5030/api").unwrap();
        ensure_trailing_slash(&mut url);
        assert_eq!(url.path(), "/api/");
        ensure_trailing_slash(&mut url);
        assert_eq!(url.path(), "/api/");
    }
}
