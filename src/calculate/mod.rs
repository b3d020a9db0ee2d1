//! Result normalization and derived metrics.
//!
//! Turns an upstream `RawResult` into a `NormalizedResult`:
//! - every judgement counter defaulted to zero
//! - accuracy populated, computed from the counters when upstream has none
//! - display score resolved, falling back to the legacy total

use thiserror::Error;

use crate::models::{AccuracySource, GameMode, HitCounts, NormalizedResult, RawResult};

/// Errors that can occur during normalization.
#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("Accuracy undefined for score {score_id}: no judgements recorded")]
    UndefinedAccuracy { score_id: u64 },
}

/// Calculate accuracy from judgement counts using the mode's hit values.
///
/// Returns `None` when the mode's denominator would be zero.
pub fn calculate_accuracy(mode: GameMode, hits: &HitCounts) -> Option<f64> {
    let (weighted, total_hits) = if mode.is_mania_family() {
        let weighted = 50 * hits.meh as u64
            + 100 * hits.ok as u64
            + 200 * hits.good as u64
            + 300 * hits.great as u64
            + 300 * hits.perfect as u64;
        let total = hits.miss as u64
            + hits.meh as u64
            + hits.ok as u64
            + hits.good as u64
            + hits.great as u64
            + hits.perfect as u64;
        (weighted, total)
    } else {
        let weighted = 300 * hits.great as u64 + 100 * hits.ok as u64 + 50 * hits.meh as u64;
        let total = hits.great as u64 + hits.ok as u64 + hits.meh as u64 + hits.miss as u64;
        (weighted, total)
    };

    if total_hits == 0 {
        None
    } else {
        Some(weighted as f64 / (300 * total_hits) as f64)
    }
}

/// Score shown to users: the current total, or the legacy total when the
/// current one was never populated.
pub fn display_score(total_score: u64, legacy_total_score: Option<u64>) -> u64 {
    if total_score != 0 {
        total_score
    } else {
        legacy_total_score.unwrap_or(0)
    }
}

/// Normalize a raw upstream result.
///
/// An upstream accuracy of exactly zero is treated like a missing one. A
/// genuine 0% play still computes to 0.0, since every counter that carries
/// weight is zero.
pub fn normalize(raw: &RawResult) -> Result<NormalizedResult, NormalizeError> {
    let statistics = HitCounts::from(&raw.statistics);

    let (accuracy, accuracy_source) = match raw.accuracy {
        Some(acc) if acc != 0.0 && acc.is_finite() => (acc, AccuracySource::Upstream),
        _ => {
            let computed = calculate_accuracy(raw.mode, &statistics)
                .ok_or(NormalizeError::UndefinedAccuracy { score_id: raw.id })?;
            (computed, AccuracySource::Computed)
        }
    };

    Ok(NormalizedResult {
        id: raw.id,
        user_id: raw.user_id,
        mode: raw.mode,
        beatmap: raw.beatmap.clone(),
        beatmapset: raw.beatmapset.clone(),
        statistics,
        accuracy,
        accuracy_source,
        display_score: display_score(raw.total_score, raw.legacy_total_score),
        pp: raw.pp,
        rank: raw.rank.clone(),
        mods: raw.mods.iter().map(|m| m.acronym.clone()).collect(),
        max_combo: raw.max_combo,
        ended_at: raw.ended_at,
        user: raw.user.clone(),
    })
}
