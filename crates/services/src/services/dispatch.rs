//! Assignment coordination: decides, per agent interaction, whether to hand
//! out a research task or a verification review, and performs the atomic
//! claim bookkeeping around that decision.

use std::sync::{Arc, Mutex};

use db::DBService;
use db::models::{
    activity::ActivityLog,
    agent::{Agent, AgentStatus, CreateAgent},
    finding::{CitationRecord, Confidence, CreateFinding, Finding, QcStatus},
    mission::{Mission, MissionPhase},
    task::{Task, TaskStatus},
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::{mission_control, quality};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("No mission is currently active")]
    NoActiveMission,
    #[error("Mission not found")]
    MissionNotFound,
    #[error("Agent not found")]
    AgentNotFound,
    #[error("Finding not found")]
    FindingNotFound,
    #[error("Invalid submission: {0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
}

/// Tunable knobs for the assignment policy.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Probability that a post-warm-up interaction is diverted to QC.
    pub qc_rate: f64,
    /// Findings a mission must accumulate before any QC is handed out.
    pub warmup_findings: i64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            qc_rate: 0.30,
            warmup_findings: 5,
        }
    }
}

impl DispatchPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let qc_rate = std::env::var("FLEET_QC_RATE")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|p| (0.0..=1.0).contains(p))
            .unwrap_or(defaults.qc_rate);
        let warmup_findings = std::env::var("FLEET_QC_WARMUP")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .unwrap_or(defaults.warmup_findings);
        Self {
            qc_rate,
            warmup_findings,
        }
    }
}

/// One unit of work handed to an agent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Assignment {
    Research { task: Task },
    Qc { finding: Finding },
}

#[derive(Debug, Deserialize)]
pub struct SubmitFinding {
    pub title: String,
    pub summary: String,
    pub citations: Vec<CitationRecord>,
    pub confidence: Option<Confidence>,
    pub contradictions: Option<Vec<String>>,
    pub gaps: Option<Vec<String>>,
    pub papers_analyzed: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RegisterOutcome {
    pub agent: Agent,
    pub mission: Mission,
    pub assignment: Option<Assignment>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionOutcome {
    pub finding: Finding,
    pub agent: Agent,
    pub next: Option<Assignment>,
}

#[derive(Debug, Serialize)]
pub struct VerdictOutcome {
    pub finding: Finding,
    pub author_quality: quality::QualityReport,
    pub agent: Agent,
    pub next: Option<Assignment>,
}

/// The coordination engine. Holds no authoritative state of its own; every
/// decision is made against the store at call time. All randomness flows
/// through one seedable source.
#[derive(Clone)]
pub struct Dispatcher {
    db: DBService,
    policy: DispatchPolicy,
    rng: Arc<Mutex<StdRng>>,
}

impl Dispatcher {
    pub fn new(db: DBService) -> Self {
        Self {
            db,
            policy: DispatchPolicy::from_env(),
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    pub fn with_policy(db: DBService, policy: DispatchPolicy, seed: u64) -> Self {
        Self {
            db,
            policy,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    fn roll_qc(&self) -> bool {
        let mut rng = self.rng.lock().expect("dispatch rng poisoned");
        rng.gen_bool(self.policy.qc_rate)
    }

    fn pick_index(&self, len: usize) -> usize {
        let mut rng = self.rng.lock().expect("dispatch rng poisoned");
        rng.gen_range(0..len)
    }

    /// Least-loaded-queue task selection: among queues that still have
    /// available work, take the one with the fewest active agents (ties
    /// broken uniformly at random), then one of its available tasks at
    /// random. Read-only.
    pub async fn select_task(&self, mission_id: Uuid) -> Result<Option<Task>, DispatchError> {
        let mut loads = Task::queue_loads(&self.db.pool, mission_id).await?;

        while !loads.is_empty() {
            let min_load = loads.iter().map(|l| l.active_agents).min().unwrap();
            let tied: Vec<usize> = loads
                .iter()
                .enumerate()
                .filter(|(_, l)| l.active_agents == min_load)
                .map(|(i, _)| i)
                .collect();
            let chosen = tied[self.pick_index(tied.len())];
            let queue_id = loads.swap_remove(chosen).queue_id;

            let candidates =
                Task::find_available_in_queue(&self.db.pool, mission_id, &queue_id).await?;
            if candidates.is_empty() {
                // Queue drained between the two reads; try the next one.
                continue;
            }
            let task = candidates[self.pick_index(candidates.len())].clone();
            return Ok(Some(task));
        }

        Ok(None)
    }

    /// The assignment policy, evaluated without side effects:
    /// 1. below the warm-up threshold, research only;
    /// 2. otherwise a Bernoulli draw at the QC rate decides whether QC is
    ///    tried first;
    /// 3. research when QC produced nothing;
    /// 4. QC as the last resort when research is exhausted;
    /// 5. none when the mission has no work left for this agent.
    pub async fn next_assignment(
        &self,
        mission_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<Assignment>, DispatchError> {
        let submitted = Finding::count_by_mission(&self.db.pool, mission_id).await?;
        if submitted < self.policy.warmup_findings {
            let task = self.select_task(mission_id).await?;
            return Ok(task.map(|task| Assignment::Research { task }));
        }

        let wants_qc = self.roll_qc();
        if wants_qc {
            if let Some(finding) =
                Finding::next_for_review(&self.db.pool, mission_id, agent_id).await?
            {
                return Ok(Some(Assignment::Qc { finding }));
            }
        }

        if let Some(task) = self.select_task(mission_id).await? {
            return Ok(Some(Assignment::Research { task }));
        }

        if !wants_qc {
            if let Some(finding) =
                Finding::next_for_review(&self.db.pool, mission_id, agent_id).await?
            {
                return Ok(Some(Assignment::Qc { finding }));
            }
        }

        Ok(None)
    }

    /// Select and commit one assignment for an agent. Research tasks are
    /// claimed with a conditional update; losing the race just re-runs
    /// selection, invisibly to the caller.
    pub async fn dispatch(
        &self,
        mission_id: Uuid,
        agent: &Agent,
    ) -> Result<Option<Assignment>, DispatchError> {
        if agent.status != AgentStatus::Active {
            return Ok(None);
        }

        // An agent with an open task gets the same task back rather than a
        // second claim on top of it.
        if let Some(task_id) = agent.current_task_id {
            if let Some(task) = Task::find_by_id(&self.db.pool, task_id).await? {
                if task.status == TaskStatus::Assigned
                    && task.assigned_agent_id == Some(agent.id)
                {
                    return Ok(Some(Assignment::Research { task }));
                }
            }
        }

        loop {
            match self.next_assignment(mission_id, agent.id).await? {
                None => return Ok(None),
                Some(Assignment::Qc { finding }) => {
                    ActivityLog::append(
                        &self.db.pool,
                        Some(mission_id),
                        Some(agent.id),
                        "qc_assigned",
                        Some(json!({ "finding_id": finding.id })),
                    )
                    .await?;
                    debug!(agent_id = %agent.id, finding_id = %finding.id, "handing out QC review");
                    return Ok(Some(Assignment::Qc { finding }));
                }
                Some(Assignment::Research { task }) => {
                    match Task::claim(&self.db.pool, task.id, agent.id).await? {
                        Some(claimed) => {
                            Agent::begin_task(&self.db.pool, agent.id, &claimed).await?;
                            ActivityLog::append(
                                &self.db.pool,
                                Some(mission_id),
                                Some(agent.id),
                                "task_assigned",
                                Some(json!({
                                    "task_id": claimed.id,
                                    "queue_id": claimed.queue_id,
                                })),
                            )
                            .await?;
                            debug!(agent_id = %agent.id, task_id = %claimed.id, "claimed research task");
                            return Ok(Some(Assignment::Research { task: claimed }));
                        }
                        None => {
                            debug!(task_id = %task.id, "lost claim race, reselecting");
                            continue;
                        }
                    }
                }
            }
        }
    }

    /// Enroll a new agent and hand it its first assignment. Without an
    /// explicit mission the agent joins the currently active one.
    pub async fn register(
        &self,
        mission_id: Option<Uuid>,
        data: &CreateAgent,
    ) -> Result<RegisterOutcome, DispatchError> {
        let mission = match mission_id {
            Some(id) => {
                let mission = Mission::find_by_id(&self.db.pool, id)
                    .await?
                    .ok_or(DispatchError::MissionNotFound)?;
                if mission.phase == MissionPhase::Completed {
                    return Err(DispatchError::Conflict(
                        "mission has already completed".to_string(),
                    ));
                }
                mission
            }
            None => Mission::find_active(&self.db.pool)
                .await?
                .ok_or(DispatchError::NoActiveMission)?,
        };

        let agent = Agent::create(&self.db.pool, mission.id, data, Uuid::new_v4()).await?;
        ActivityLog::append(
            &self.db.pool,
            Some(mission.id),
            Some(agent.id),
            "agent_registered",
            Some(json!({ "role": agent.role, "max_tasks": agent.max_tasks })),
        )
        .await?;
        info!(agent_id = %agent.id, mission_id = %mission.id, "agent registered");

        let assignment = self.dispatch(mission.id, &agent).await?;
        let agent = Agent::find_by_id(&self.db.pool, agent.id)
            .await?
            .ok_or(DispatchError::AgentNotFound)?;

        Ok(RegisterOutcome {
            agent,
            mission,
            assignment,
        })
    }

    /// Accept a research result for the agent's held task, advance the
    /// mission, and hand out the next unit of work.
    pub async fn submit_finding(
        &self,
        agent_id: Uuid,
        payload: SubmitFinding,
    ) -> Result<SubmissionOutcome, DispatchError> {
        let agent = Agent::find_by_id(&self.db.pool, agent_id)
            .await?
            .ok_or(DispatchError::AgentNotFound)?;
        if agent.status != AgentStatus::Active {
            return Err(DispatchError::Conflict("agent is not active".to_string()));
        }
        let task_id = agent.current_task_id.ok_or_else(|| {
            DispatchError::Conflict("agent holds no research task".to_string())
        })?;
        let task = Task::find_by_id(&self.db.pool, task_id)
            .await?
            .ok_or_else(|| {
                DispatchError::Conflict("assigned task no longer exists".to_string())
            })?;

        if payload.title.trim().is_empty() || payload.summary.trim().is_empty() {
            return Err(DispatchError::Validation(
                "a finding needs a title and a summary".to_string(),
            ));
        }
        if payload.citations.is_empty() {
            return Err(DispatchError::Validation(
                "a finding needs at least one citation".to_string(),
            ));
        }

        let papers_analyzed = payload.papers_analyzed.unwrap_or(0).max(0);
        let finding = Finding::create(
            &self.db.pool,
            &CreateFinding {
                agent_id: agent.id,
                task_id: task.id,
                mission_id: task.mission_id,
                division_id: Some(task.division_id.clone()),
                queue_id: Some(task.queue_id.clone()),
                title: payload.title,
                summary: payload.summary,
                citations: payload.citations,
                confidence: payload.confidence.unwrap_or_default(),
                contradictions: payload.contradictions.unwrap_or_default(),
                gaps: payload.gaps.unwrap_or_default(),
                papers_analyzed,
            },
            Uuid::new_v4(),
        )
        .await?;

        Task::complete(&self.db.pool, task.id, agent.id).await?;
        let agent = Agent::finish_task(&self.db.pool, agent.id, papers_analyzed).await?;
        ActivityLog::append(
            &self.db.pool,
            Some(task.mission_id),
            Some(agent.id),
            "finding_submitted",
            Some(json!({ "finding_id": finding.id, "task_id": task.id })),
        )
        .await?;

        mission_control::on_task_completed(&self.db.pool, task.mission_id).await?;

        let agent = self.enforce_budget(agent).await?;
        let next = self.dispatch(task.mission_id, &agent).await?;
        let agent = Agent::find_by_id(&self.db.pool, agent.id)
            .await?
            .ok_or(DispatchError::AgentNotFound)?;

        Ok(SubmissionOutcome {
            finding,
            agent,
            next,
        })
    }

    /// Record a QC verdict, rescore the finding's author, and hand the
    /// reviewer its next unit of work.
    pub async fn submit_verdict(
        &self,
        agent_id: Uuid,
        finding_id: Uuid,
        verdict: &str,
        notes: Option<String>,
    ) -> Result<VerdictOutcome, DispatchError> {
        let verdict = match verdict {
            "passed" => QcStatus::Passed,
            "flagged" => QcStatus::Flagged,
            "rejected" => QcStatus::Rejected,
            other => {
                return Err(DispatchError::Validation(format!(
                    "unknown verdict '{other}'"
                )));
            }
        };

        let agent = Agent::find_by_id(&self.db.pool, agent_id)
            .await?
            .ok_or(DispatchError::AgentNotFound)?;
        if agent.status != AgentStatus::Active {
            return Err(DispatchError::Conflict("agent is not active".to_string()));
        }
        let finding = Finding::find_by_id(&self.db.pool, finding_id)
            .await?
            .ok_or(DispatchError::FindingNotFound)?;
        if finding.agent_id == agent.id {
            return Err(DispatchError::Conflict(
                "agents cannot review their own findings".to_string(),
            ));
        }

        let finding = Finding::record_verdict(
            &self.db.pool,
            finding.id,
            verdict.clone(),
            notes.as_deref(),
            agent.id,
        )
        .await?;
        let author_quality = quality::recompute(&self.db.pool, finding.agent_id).await?;
        ActivityLog::append(
            &self.db.pool,
            Some(finding.mission_id),
            Some(agent.id),
            "verdict_recorded",
            Some(json!({
                "finding_id": finding.id,
                "verdict": verdict,
                "author_id": finding.agent_id,
                "author_flagged": author_quality.flagged,
            })),
        )
        .await?;
        info!(
            finding_id = %finding.id,
            reviewer_id = %agent.id,
            author_score = author_quality.score,
            "verdict recorded"
        );

        let agent = Agent::record_review(&self.db.pool, agent.id).await?;
        let agent = self.enforce_budget(agent).await?;
        let next = self.dispatch(finding.mission_id, &agent).await?;
        let agent = Agent::find_by_id(&self.db.pool, agent.id)
            .await?
            .ok_or(DispatchError::AgentNotFound)?;

        Ok(VerdictOutcome {
            finding,
            author_quality,
            agent,
            next,
        })
    }

    pub async fn heartbeat(&self, agent_id: Uuid) -> Result<(), DispatchError> {
        let agent = Agent::find_by_id(&self.db.pool, agent_id)
            .await?
            .ok_or(DispatchError::AgentNotFound)?;
        if agent.status != AgentStatus::Active {
            return Err(DispatchError::Conflict("agent is not active".to_string()));
        }
        Agent::touch_heartbeat(&self.db.pool, agent.id).await?;
        Ok(())
    }

    /// Orderly goodbye: the agent's held task goes back on the board.
    pub async fn disconnect(&self, agent_id: Uuid) -> Result<(), DispatchError> {
        let agent = Agent::find_by_id(&self.db.pool, agent_id)
            .await?
            .ok_or(DispatchError::AgentNotFound)?;
        if !Agent::mark_disconnected(&self.db.pool, agent.id).await? {
            return Ok(());
        }
        if let Some(task_id) = agent.current_task_id {
            if Task::release(&self.db.pool, task_id, agent.id).await? {
                info!(agent_id = %agent.id, task_id = %task_id, "released task on disconnect");
            }
        }
        ActivityLog::append(
            &self.db.pool,
            Some(agent.mission_id),
            Some(agent.id),
            "agent_disconnected",
            None,
        )
        .await?;
        Ok(())
    }

    /// Budget stop: once a bounded agent has spent its task allowance it is
    /// retired and never dispatched again.
    async fn enforce_budget(&self, agent: Agent) -> Result<Agent, DispatchError> {
        if agent.status == AgentStatus::Active
            && agent.max_tasks > 0
            && agent.tasks_completed >= agent.max_tasks
        {
            let retired = Agent::retire(&self.db.pool, agent.id).await?;
            ActivityLog::append(
                &self.db.pool,
                Some(retired.mission_id),
                Some(retired.id),
                "agent_budget_spent",
                Some(json!({ "tasks_completed": retired.tasks_completed })),
            )
            .await?;
            info!(agent_id = %retired.id, "agent reached its task budget");
            return Ok(retired);
        }
        Ok(agent)
    }
}
