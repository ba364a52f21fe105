//! Test-run registry -- the state machine governing one persisted run per
//! (subscription, PR number) attempt.
//!
//! States: pending -> running -> {completed, failed}. Terminal states are
//! absorbing; a scenario-level rerun edits the result payload without a
//! status transition. All status and timestamp mutation goes through this
//! registry so every consumer observes a single source of truth.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::github::PullRequest;
use crate::scenario::ScenarioResult;
use crate::storage::Pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("Unknown run status '{}'", other),
        }
    }
}

/// One persisted attempt to test a specific PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: i64,
    pub subscription_id: i64,
    pub pr_number: i64,
    pub pr_title: Option<String>,
    pub pr_url: Option<String>,
    pub branch_name: Option<String>,
    pub repo_full_name: Option<String>,
    pub status: RunStatus,
    pub results: Option<Vec<ScenarioResult>>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome of `create_pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new pending run was inserted.
    Created(i64),
    /// A pending or running run already exists; its id is returned and
    /// nothing was inserted. This is the duplicate-run guard: polling may
    /// overlap a prior unfinished run.
    AlreadyInFlight(i64),
}

impl CreateOutcome {
    pub fn run_id(&self) -> i64 {
        match self {
            CreateOutcome::Created(id) | CreateOutcome::AlreadyInFlight(id) => *id,
        }
    }
}

#[derive(Clone)]
pub struct RunRegistry {
    pool: Pool,
}

impl RunRegistry {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a pending run for (subscription, PR), unless one is already
    /// in flight. Check-then-insert runs inside an immediate transaction,
    /// and the partial unique index on in-flight runs backstops the race
    /// between two concurrent pollers.
    pub fn create_pending(&self, subscription_id: i64, pr: &PullRequest, repo_full_name: &str) -> Result<CreateOutcome> {
        let mut conn = self.pool.get()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM test_runs
                 WHERE subscription_id = ?1 AND pr_number = ?2
                   AND status IN ('pending', 'running')
                 LIMIT 1",
                params![subscription_id, pr.number],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            tx.commit()?;
            return Ok(CreateOutcome::AlreadyInFlight(id));
        }

        tx.execute(
            "INSERT INTO test_runs
                (subscription_id, pr_number, pr_title, pr_url, branch_name,
                 repo_full_name, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
            params![
                subscription_id,
                pr.number,
                pr.title,
                pr.url,
                pr.head_branch,
                repo_full_name
            ],
        )
        .context("Failed to insert pending run")?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(CreateOutcome::Created(id))
    }

    /// pending -> running. A missing or already-terminal run is a warning,
    /// not an error: the orchestrator must not crash because persistence
    /// and the in-memory run diverged.
    pub fn mark_running(&self, run_id: i64) -> Result<bool> {
        self.guarded_transition(run_id, RunStatus::Running, None)
    }

    /// running -> completed, storing the ordered result payload.
    pub fn mark_completed(&self, run_id: i64, results: &[ScenarioResult]) -> Result<bool> {
        let payload = serde_json::to_string(results)?;
        self.guarded_transition(run_id, RunStatus::Completed, Some(payload))
    }

    /// running -> failed. Any partial results already recorded are kept.
    pub fn mark_failed(&self, run_id: i64, results: Option<&[ScenarioResult]>) -> Result<bool> {
        let payload = results.map(serde_json::to_string).transpose()?;
        self.guarded_transition(run_id, RunStatus::Failed, payload)
    }

    fn guarded_transition(
        &self,
        run_id: i64,
        to: RunStatus,
        results_json: Option<String>,
    ) -> Result<bool> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM test_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            warn!(run_id, to = %to, "Ignoring status transition for unknown run");
            return Ok(false);
        };
        let current: RunStatus = current.parse()?;
        if current.is_terminal() {
            warn!(run_id, from = %current, to = %to, "Ignoring transition out of terminal state");
            return Ok(false);
        }

        // completed_at is set iff the run enters a terminal state.
        if to.is_terminal() {
            tx.execute(
                "UPDATE test_runs
                 SET status = ?2, results_json = COALESCE(?3, results_json),
                     completed_at = ?4
                 WHERE id = ?1",
                params![run_id, to.to_string(), results_json, Utc::now().to_rfc3339()],
            )?;
        } else {
            tx.execute(
                "UPDATE test_runs SET status = ?2 WHERE id = ?1",
                params![run_id, to.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// PR numbers that have any run record at all for this subscription.
    /// The detector uses this as the crash-compensation safeguard alongside
    /// the watermark.
    pub fn existing_pr_numbers(&self, subscription_id: i64) -> Result<HashSet<i64>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT pr_number FROM test_runs WHERE subscription_id = ?1",
        )?;
        let rows = stmt.query_map(params![subscription_id], |row| row.get::<_, i64>(0))?;
        let mut numbers = HashSet::new();
        for r in rows {
            numbers.insert(r?);
        }
        Ok(numbers)
    }

    pub fn get(&self, run_id: i64) -> Result<Option<TestRun>> {
        let conn = self.pool.get()?;
        let run = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM test_runs WHERE id = ?1"),
                params![run_id],
                from_row,
            )
            .optional()?;
        Ok(run)
    }

    pub fn list(&self, subscription_id: Option<i64>, limit: u32) -> Result<Vec<TestRun>> {
        let conn = self.pool.get()?;
        let mut runs = Vec::new();
        match subscription_id {
            Some(sub_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM test_runs WHERE subscription_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![sub_id, limit], from_row)?;
                for r in rows {
                    runs.push(r?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM test_runs ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], from_row)?;
                for r in rows {
                    runs.push(r?);
                }
            }
        }
        Ok(runs)
    }

    /// Replace one scenario entry in a terminal run's result payload.
    /// Rerun bookkeeping only: status and completed_at stay untouched.
    pub fn replace_scenario_result(
        &self,
        run_id: i64,
        index: usize,
        result: &ScenarioResult,
    ) -> Result<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let payload: Option<String> = tx
            .query_row(
                "SELECT results_json FROM test_runs WHERE id = ?1",
                params![run_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let Some(payload) = payload else {
            anyhow::bail!("Run {} has no stored results", run_id);
        };

        let mut results: Vec<ScenarioResult> =
            serde_json::from_str(&payload).context("Failed to decode stored results")?;
        if index >= results.len() {
            anyhow::bail!(
                "Scenario index {} out of range for run {} ({} scenarios)",
                index,
                run_id,
                results.len()
            );
        }
        results[index] = result.clone();

        tx.execute(
            "UPDATE test_runs SET results_json = ?2 WHERE id = ?1",
            params![run_id, serde_json::to_string(&results)?],
        )?;
        tx.commit()?;
        Ok(())
    }
}

const COLUMNS: &str = "id, subscription_id, pr_number, pr_title, pr_url, branch_name, \
                       repo_full_name, status, results_json, created_at, completed_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<TestRun> {
    let status_raw: String = row.get(7)?;
    let results_raw: Option<String> = row.get(8)?;
    let created_raw: Option<String> = row.get(9)?;
    let completed_raw: Option<String> = row.get(10)?;

    Ok(TestRun {
        id: row.get(0)?,
        subscription_id: row.get(1)?,
        pr_number: row.get(2)?,
        pr_title: row.get(3)?,
        pr_url: row.get(4)?,
        branch_name: row.get(5)?,
        repo_full_name: row.get(6)?,
        status: status_raw.parse().unwrap_or(RunStatus::Failed),
        results: results_raw.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_sqlite_time(created_raw),
        completed_at: parse_sqlite_time(completed_raw),
    })
}

/// Timestamps come back either as RFC 3339 (written by us) or as SQLite's
/// `datetime('now')` format (column defaults).
fn parse_sqlite_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
