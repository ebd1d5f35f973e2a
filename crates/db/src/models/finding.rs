use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq)]
#[sqlx(type_name = "confidence", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Default for Confidence {
    fn default() -> Self {
        Self::Medium
    }
}

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq)]
#[sqlx(type_name = "qc_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QcStatus {
    Pending,
    Passed,
    Flagged,
    Rejected,
}

impl QcStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QcStatus::Pending)
    }
}

/// One cited source backing a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationRecord {
    pub title: String,
    pub authors: Option<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub identifier: Option<String>,
    pub source_type: Option<String>,
    pub sample_size: Option<i64>,
    pub key_claim: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub mission_id: Uuid,
    pub division_id: Option<String>,
    pub queue_id: Option<String>,
    pub title: String,
    pub summary: String,
    pub citations: String,             // JSON array of CitationRecord
    pub confidence: Confidence,
    pub contradictions: Option<String>, // JSON array of strings
    pub gaps: Option<String>,           // JSON array of strings
    pub papers_analyzed: i64,
    pub submitted_at: DateTime<Utc>,
    pub qc_status: QcStatus,
    pub qc_notes: Option<String>,
    pub qc_agent_id: Option<Uuid>,
    pub qc_cycles: i64,
    pub qc_reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateFinding {
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub mission_id: Uuid,
    pub division_id: Option<String>,
    pub queue_id: Option<String>,
    pub title: String,
    pub summary: String,
    pub citations: Vec<CitationRecord>,
    pub confidence: Confidence,
    pub contradictions: Vec<String>,
    pub gaps: Vec<String>,
    pub papers_analyzed: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct VerdictTally {
    pub passes: i64,
    pub fails: i64,
}

impl Finding {
    pub fn citation_list(&self) -> Vec<CitationRecord> {
        serde_json::from_str(&self.citations).unwrap_or_default()
    }

    pub async fn create(
        pool: &SqlitePool,
        data: &CreateFinding,
        finding_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let citations_json = serde_json::to_string(&data.citations).unwrap();
        let contradictions_json = serde_json::to_string(&data.contradictions).unwrap();
        let gaps_json = serde_json::to_string(&data.gaps).unwrap();

        sqlx::query_as::<_, Finding>(
            r#"
            INSERT INTO findings (
                id, agent_id, task_id, mission_id, division_id, queue_id,
                title, summary, citations, confidence,
                contradictions, gaps, papers_analyzed
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            RETURNING *
            "#,
        )
        .bind(finding_id)
        .bind(data.agent_id)
        .bind(data.task_id)
        .bind(data.mission_id)
        .bind(&data.division_id)
        .bind(&data.queue_id)
        .bind(&data.title)
        .bind(&data.summary)
        .bind(citations_json)
        .bind(data.confidence.clone())
        .bind(contradictions_json)
        .bind(gaps_json)
        .bind(data.papers_analyzed.max(0))
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Finding>(r#"SELECT * FROM findings WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_mission(
        pool: &SqlitePool,
        mission_id: Uuid,
        qc_status: Option<QcStatus>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        match qc_status {
            Some(status) => {
                sqlx::query_as::<_, Finding>(
                    r#"
                    SELECT * FROM findings
                    WHERE mission_id = ?1 AND qc_status = ?2
                    ORDER BY submitted_at ASC
                    "#,
                )
                .bind(mission_id)
                .bind(status)
                .fetch_all(pool)
                .await
            }
            None => {
                sqlx::query_as::<_, Finding>(
                    r#"
                    SELECT * FROM findings
                    WHERE mission_id = ?1
                    ORDER BY submitted_at ASC
                    "#,
                )
                .bind(mission_id)
                .fetch_all(pool)
                .await
            }
        }
    }

    pub async fn count_by_mission(pool: &SqlitePool, mission_id: Uuid) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM findings WHERE mission_id = ?1"#)
                .bind(mission_id)
                .fetch_one(pool)
                .await?;
        Ok(row.0)
    }

    /// The finding most in need of verification, never one authored by the
    /// requesting agent. Priority: unreviewed work first, then flagged
    /// authors, then the lowest-trust authors (authors with no terminal
    /// reviews keep score 1.0 and sort last), then least-recently reviewed,
    /// then oldest submission.
    pub async fn next_for_review(
        pool: &SqlitePool,
        mission_id: Uuid,
        exclude_agent_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Finding>(
            r#"
            SELECT f.* FROM findings f
            JOIN agents a ON a.id = f.agent_id
            WHERE f.mission_id = ?1 AND f.agent_id != ?2
            ORDER BY
                CASE WHEN f.qc_status = 'pending' THEN 0 ELSE 1 END ASC,
                CASE WHEN a.flagged THEN 0 ELSE 1 END ASC,
                a.quality_score ASC,
                CASE WHEN f.qc_reviewed_at IS NULL THEN 0 ELSE 1 END ASC,
                f.qc_reviewed_at ASC,
                f.submitted_at ASC
            LIMIT 1
            "#,
        )
        .bind(mission_id)
        .bind(exclude_agent_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn record_verdict(
        pool: &SqlitePool,
        id: Uuid,
        verdict: QcStatus,
        notes: Option<&str>,
        reviewer_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Finding>(
            r#"
            UPDATE findings
            SET qc_status = ?2,
                qc_notes = ?3,
                qc_agent_id = ?4,
                qc_cycles = qc_cycles + 1,
                qc_reviewed_at = datetime('now', 'subsec')
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(verdict)
        .bind(notes)
        .bind(reviewer_id)
        .fetch_one(pool)
        .await
    }

    /// Administrative re-queue: the finding returns to `pending` but keeps
    /// its cycle count and last review timestamp.
    pub async fn reset_review(pool: &SqlitePool, id: Uuid) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Finding>(
            r#"
            UPDATE findings
            SET qc_status = 'pending',
                qc_notes = NULL,
                qc_agent_id = NULL
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await
    }

    /// Terminal-verdict tally for one author; `pending` findings are
    /// invisible to scoring.
    pub async fn verdict_tally(
        pool: &SqlitePool,
        agent_id: Uuid,
    ) -> Result<VerdictTally, sqlx::Error> {
        sqlx::query_as::<_, VerdictTally>(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN qc_status = 'passed' THEN 1 ELSE 0 END), 0) AS passes,
                COALESCE(SUM(CASE WHEN qc_status IN ('flagged', 'rejected') THEN 1 ELSE 0 END), 0) AS fails
            FROM findings
            WHERE agent_id = ?1
            "#,
        )
        .bind(agent_id)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::Agent;
    use crate::models::mission::MissionPhase;
    use crate::models::test_utils::{
        create_test_agent, create_test_mission, seed_test_finding, setup_test_pool,
    };

    #[tokio::test]
    async fn review_queue_never_returns_own_finding() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 2, MissionPhase::Research).await;
        let author = create_test_agent(&pool, mission_id, 0).await;
        seed_test_finding(&pool, mission_id, author).await;

        let own = Finding::next_for_review(&pool, mission_id, author)
            .await
            .expect("query failed");
        assert!(own.is_none());

        let reviewer = create_test_agent(&pool, mission_id, 0).await;
        let other = Finding::next_for_review(&pool, mission_id, reviewer)
            .await
            .expect("query failed");
        assert_eq!(other.expect("expected a candidate").agent_id, author);
    }

    #[tokio::test]
    async fn review_queue_prefers_pending_then_flagged_then_low_score() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 8, MissionPhase::Research).await;
        let reviewer = create_test_agent(&pool, mission_id, 0).await;

        let trusted = create_test_agent(&pool, mission_id, 0).await;
        let shaky = create_test_agent(&pool, mission_id, 0).await;
        let flagged = create_test_agent(&pool, mission_id, 0).await;
        Agent::store_quality(&pool, shaky, 0.6, 3, 2, false)
            .await
            .expect("quality update failed");
        Agent::store_quality(&pool, flagged, 0.2, 1, 4, true)
            .await
            .expect("quality update failed");

        // Everything reviewed: the flagged author's work is re-checked first,
        // then the lowest score; an unreviewed author (score 1.0) goes last.
        let f_trusted = seed_test_finding(&pool, mission_id, trusted).await;
        let f_shaky = seed_test_finding(&pool, mission_id, shaky).await;
        let f_flagged = seed_test_finding(&pool, mission_id, flagged).await;
        for f in [f_trusted, f_shaky, f_flagged] {
            Finding::record_verdict(&pool, f, QcStatus::Passed, None, reviewer)
                .await
                .expect("verdict failed");
        }

        let pick = Finding::next_for_review(&pool, mission_id, reviewer)
            .await
            .expect("query failed")
            .expect("expected candidate");
        assert_eq!(pick.id, f_flagged);

        // A pending finding jumps the whole reviewed pile, regardless of
        // author trust.
        let f_pending = seed_test_finding(&pool, mission_id, trusted).await;
        let pick = Finding::next_for_review(&pool, mission_id, reviewer)
            .await
            .expect("query failed")
            .expect("expected candidate");
        assert_eq!(pick.id, f_pending);
    }

    #[tokio::test]
    async fn verdicts_accumulate_cycles_and_reset_requeues() {
        let pool = setup_test_pool().await;
        let mission_id = create_test_mission(&pool, 1, MissionPhase::Research).await;
        let author = create_test_agent(&pool, mission_id, 0).await;
        let reviewer = create_test_agent(&pool, mission_id, 0).await;
        let finding_id = seed_test_finding(&pool, mission_id, author).await;

        let reviewed =
            Finding::record_verdict(&pool, finding_id, QcStatus::Flagged, Some("thin"), reviewer)
                .await
                .expect("verdict failed");
        assert_eq!(reviewed.qc_status, QcStatus::Flagged);
        assert_eq!(reviewed.qc_cycles, 1);
        assert!(reviewed.qc_reviewed_at.is_some());

        let reset = Finding::reset_review(&pool, finding_id)
            .await
            .expect("reset failed");
        assert_eq!(reset.qc_status, QcStatus::Pending);
        assert_eq!(reset.qc_cycles, 1);
        assert!(reset.qc_notes.is_none());

        let tally = Finding::verdict_tally(&pool, author)
            .await
            .expect("tally failed");
        assert_eq!((tally.passes, tally.fails), (0, 0));
    }
}
