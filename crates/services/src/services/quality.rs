//! Contributor trust scoring. A score is always a full recomputation over
//! the author's terminal verdicts, never an incremental adjustment, so
//! repeated recomputes can never drift.

use db::models::{agent::Agent, finding::Finding};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

/// Reviews required before the flag rule applies.
pub const MIN_REVIEWS_TO_FLAG: i64 = 3;
/// Scores strictly below this, with enough reviews, flag the contributor.
pub const FLAG_SCORE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub score: f64,
    pub passes: i64,
    pub fails: i64,
    pub flagged: bool,
}

/// Pure scoring rule. No reviews means no penalty: the score stays 1.0.
pub fn evaluate(passes: i64, fails: i64) -> QualityReport {
    let reviewed = passes + fails;
    let score = if reviewed > 0 {
        passes as f64 / reviewed as f64
    } else {
        1.0
    };
    let flagged = reviewed >= MIN_REVIEWS_TO_FLAG && score < FLAG_SCORE_FLOOR;
    QualityReport {
        score,
        passes,
        fails,
        flagged,
    }
}

/// Recompute one contributor's trust from their finding history and persist
/// it on the agent row.
pub async fn recompute(pool: &SqlitePool, agent_id: Uuid) -> Result<QualityReport, sqlx::Error> {
    let tally = Finding::verdict_tally(pool, agent_id).await?;
    let report = evaluate(tally.passes, tally.fails);
    Agent::store_quality(
        pool,
        agent_id,
        report.score,
        report.passes,
        report.fails,
        report.flagged,
    )
    .await?;
    if report.flagged {
        warn!(agent_id = %agent_id, score = report.score, "contributor flagged for low quality");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_reviews_scores_full_trust() {
        let report = evaluate(0, 0);
        assert_eq!(report.score, 1.0);
        assert!(!report.flagged);
    }

    #[test]
    fn two_reviews_never_flag() {
        let report = evaluate(1, 1);
        assert_eq!(report.score, 0.5);
        assert!(!report.flagged);

        let report = evaluate(0, 2);
        assert_eq!(report.score, 0.0);
        assert!(!report.flagged);
    }

    #[test]
    fn three_fails_flag_at_zero() {
        let report = evaluate(0, 3);
        assert_eq!(report.score, 0.0);
        assert!(report.flagged);
    }

    #[test]
    fn exactly_half_is_not_flagged() {
        // The floor is strict: 0.5 survives no matter how many reviews.
        let report = evaluate(2, 2);
        assert_eq!(report.score, 0.5);
        assert!(!report.flagged);
    }

    #[test]
    fn below_half_with_enough_reviews_flags() {
        let report = evaluate(1, 2);
        assert!(report.score < FLAG_SCORE_FLOOR);
        assert!(report.flagged);
    }

    #[test]
    fn evaluation_is_deterministic() {
        for _ in 0..100 {
            let a = evaluate(7, 3);
            let b = evaluate(7, 3);
            assert_eq!(a.score, b.score);
            assert_eq!(a.flagged, b.flagged);
        }
    }
}
