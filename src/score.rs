//!
//! src/score.rs
//!
//! Quality gate and scoring for raw search candidates. Pure functions,
//! no I/O; absolute scores only rank candidates within one run
//!

use std::cmp::Ordering;

use crate::config::QualityThresholds;
use crate::types::{CandidateFile, ScoredResult};

/// Extensions scored as lossless; the bitrate floor is waived for these.
pub const LOSSLESS_EXTENSIONS: [&str; 4] = ["flac", "wav", "ape", "alac"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Locked,
    LowBitrate,
    QueueTooLong,
    TooSlow
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Locked       => "locked",
            RejectReason::LowBitrate   => "low-bitrate",
            RejectReason::QueueTooLong => "queue-too-long",
            RejectReason::TooSlow      => "too-slow"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evaluation {
    Accepted { score: f64, instant: bool },
    Rejected(RejectReason)
}

pub fn is_lossless(extension: &str) -> bool {
    LOSSLESS_EXTENSIONS.iter().any(|e| extension.eq_ignore_ascii_case(e))
}

/// Gate then score one candidate. Rejection predicates run in a fixed
/// order and the first hit wins, so the recorded reason is stable.
pub fn evaluate(file: &CandidateFile, thresholds: &QualityThresholds) -> Evaluation {
    if file.locked && !file.has_free_slot && file.queue_depth > 0 {
        return Evaluation::Rejected(RejectReason::Locked);
    }
    if file.bitrate < thresholds.min_bitrate && !is_lossless(&file.extension) {
        return Evaluation::Rejected(RejectReason::LowBitrate);
    }
    if file.queue_depth > thresholds.max_queue_depth {
        return Evaluation::Rejected(RejectReason::QueueTooLong);
    }
    if file.speed_bytes < thresholds.min_speed_bytes {
        return Evaluation::Rejected(RejectReason::TooSlow);
    }

    let score = format_component(file)
        + speed_component(file.speed_bytes)
        + queue_component(file.queue_depth)
        + if file.has_free_slot { 25.0 } else { 0.0 };

    Evaluation::Accepted { score, instant: file.queue_depth == 0 }
}

fn format_component(file: &CandidateFile) -> f64 {
    if is_lossless(&file.extension) {
        return 100.0;
    }
    match file.bitrate {
        b if b >= 320 => 90.0,
        b if b >= 256 => 70.0,
        b if b >= 192 => 50.0,
        _ => 20.0
    }
}

fn speed_component(speed_bytes: u64) -> f64 {
    match speed_bytes {
        s if s >= 2 * 1024 * 1024 => 50.0,
        s if s >= 1024 * 1024     => 40.0,
        s if s >= 500 * 1024      => 30.0,
        s if s >= 100 * 1024      => 20.0,
        s if s >= 50 * 1024       => 10.0,
        _ => 0.0
    }
}

fn queue_component(queue_depth: u32) -> f64 {
    match queue_depth {
        0        => 50.0,
        1..=5    => -10.0,
        6..=10   => -30.0,
        11..=25  => -50.0,
        _        => -100.0
    }
}

/// Ranking order for retained results: score descending, then instant
/// first, then larger files, then filename for reproducibility.
pub fn ranking(a: &ScoredResult, b: &ScoredResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.instant.cmp(&a.instant))
        .then_with(|| b.file.size.cmp(&a.file.size))
        .then_with(|| a.file.filename.cmp(&b.file.filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateFile {
        CandidateFile {
            peer: "peer-a".to_string(),
            filename: "Music\\Ado\\01 - Usseewa.flac".to_string(),
            size: 38_000_000,
            bitrate: 0,
            extension: "flac".to_string(),
            queue_depth: 0,
            has_free_slot: true,
            speed_bytes: 3_000_000,
            locked: false
        }
    }

    #[test]
    fn lossless_instant_free_slot_scores_225() {
        let file = candidate();
        let eval = evaluate(&file, &QualityThresholds::default());
        // 100 format + 50 speed + 50 no queue + 25 free slot
        assert_eq!(eval, Evaluation::Accepted { score: 225.0, instant: true });
    }

    #[test]
    fn evaluate_is_deterministic() {
        let file = candidate();
        let thresholds = QualityThresholds::default();
        assert_eq!(evaluate(&file, &thresholds), evaluate(&file, &thresholds));
    }

    #[test]
    fn low_bitrate_mp3_is_rejected() {
        let file = CandidateFile {
            bitrate: 128,
            extension: "mp3".to_string(),
            speed_bytes: 60_000,
            ..candidate()
        };
        let eval = evaluate(&file, &QualityThresholds::default());
        assert_eq!(eval, Evaluation::Rejected(RejectReason::LowBitrate));
    }

    #[test]
    fn bitrate_floor_is_waived_for_lossless() {
        let file = CandidateFile { bitrate: 0, ..candidate() };
        assert!(matches!(
            evaluate(&file, &QualityThresholds::default()),
            Evaluation::Accepted { .. }
        ));
    }

    #[test]
    fn deep_queue_is_rejected() {
        let file = CandidateFile {
            bitrate: 192,
            extension: "mp3".to_string(),
            queue_depth: 60,
            ..candidate()
        };
        let eval = evaluate(&file, &QualityThresholds::default());
        assert_eq!(eval, Evaluation::Rejected(RejectReason::QueueTooLong));
    }

    #[test]
    fn slow_peer_is_rejected() {
        let file = CandidateFile { speed_bytes: 10_000, ..candidate() };
        let eval = evaluate(&file, &QualityThresholds::default());
        assert_eq!(eval, Evaluation::Rejected(RejectReason::TooSlow));
    }

    #[test]
    fn locked_without_free_slot_wins_over_other_reasons() {
        // also low-bitrate and slow, but locked is checked first
        let file = CandidateFile {
            bitrate: 96,
            extension: "mp3".to_string(),
            queue_depth: 4,
            has_free_slot: false,
            speed_bytes: 1_000,
            locked: true,
            ..candidate()
        };
        let eval = evaluate(&file, &QualityThresholds::default());
        assert_eq!(eval, Evaluation::Rejected(RejectReason::Locked));
    }

    #[test]
    fn locked_with_empty_queue_is_not_rejected_as_locked() {
        let file = CandidateFile { locked: true, has_free_slot: false, ..candidate() };
        // queue_depth 0, so the locked gate does not apply
        assert!(matches!(
            evaluate(&file, &QualityThresholds::default()),
            Evaluation::Accepted { .. }
        ));
    }

    #[test]
    fn queue_component_steps() {
        assert_eq!(queue_component(0), 50.0);
        assert_eq!(queue_component(1), -10.0);
        assert_eq!(queue_component(5), -10.0);
        assert_eq!(queue_component(6), -30.0);
        assert_eq!(queue_component(10), -30.0);
        assert_eq!(queue_component(11), -50.0);
        assert_eq!(queue_component(25), -50.0);
        assert_eq!(queue_component(26), -100.0);
    }

    #[test]
    fn speed_component_steps() {
        assert_eq!(speed_component(2 * 1024 * 1024), 50.0);
        assert_eq!(speed_component(1024 * 1024), 40.0);
        assert_eq!(speed_component(500 * 1024), 30.0);
        assert_eq!(speed_component(100 * 1024), 20.0);
        assert_eq!(speed_component(50 * 1024), 10.0);
        assert_eq!(speed_component(49 * 1024), 0.0);
    }

    #[test]
    fn queued_candidate_is_not_instant() {
        let file = CandidateFile {
            bitrate: 320,
            extension: "mp3".to_string(),
            queue_depth: 3,
            ..candidate()
        };
        match evaluate(&file, &QualityThresholds::default()) {
            Evaluation::Accepted { instant, .. } => assert!(!instant),
            other => panic!("expected acceptance, got {other:?}")
        }
    }

    #[test]
    fn ranking_breaks_ties_on_instant_then_size_then_name() {
        let base = ScoredResult { file: candidate(), score: 100.0, instant: true };
        let queued = ScoredResult {
            file: CandidateFile { queue_depth: 2, ..candidate() },
            score: 100.0,
            instant: false
        };
        let smaller = ScoredResult {
            file: CandidateFile { size: 1_000, ..candidate() },
            score: 100.0,
            instant: true
        };
        let later_name = ScoredResult {
            file: CandidateFile {
                filename: "Music\\Ado\\02 - Usseewa.flac".to_string(),
                ..candidate()
            },
            score: 100.0,
            instant: true
        };

        assert_eq!(ranking(&base, &queued), Ordering::Less);
        assert_eq!(ranking(&base, &smaller), Ordering::Less);
        assert_eq!(ranking(&base, &later_name), Ordering::Less);

        let mut list = vec![queued.clone(), later_name.clone(), base.clone(), smaller.clone()];
        list.sort_by(ranking);
        assert_eq!(list[0].file.filename, base.file.filename);
        assert!(!list[3].instant);
    }
}
