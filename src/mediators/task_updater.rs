//! Applies a task status report, merges any context the task emitted, tells
//! the sibling parties, and re-triggers scheduling on terminal statuses.
//!
//! Reports come from two directions: the local worker driving one of our
//! own vertices, and the peer surface mirroring progress on a vertex owned
//! by another party. Only locally-owned transitions are re-broadcast, and
//! the context sent to each peer is filtered down to `common` plus that
//! peer's own subtree. Other parties' subtrees never leave this node.

use crate::errors::*;
use crate::mediators::common;
use crate::mediators::job_triggerer;
use crate::merge::deep_merge;
use crate::model::{self, Status, TaskTransition};
use crate::peer_client::{PeerClient, UpdateTaskParams};
use crate::settings::Settings;
use crate::store;
use crate::time_helpers;
use crate::worker::WorkerSpawner;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use slog::Logger;

pub struct Mediator<'a> {
    pub conn:        &'a mut SqliteConnection,
    pub settings:    &'a Settings,
    pub peer_client: &'a dyn PeerClient,
    pub spawner:     &'a dyn WorkerSpawner,

    pub job_id:           String,
    pub task_name:        String,
    pub task_status:      String,
    pub external_context: Option<Value>,
    pub errors:           Option<String>,
}

impl<'a> Mediator<'a> {
    pub fn run(&mut self, log: &Logger) -> Result<RunResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| self.run_inner(log))
    }

    fn run_inner(&mut self, log: &Logger) -> Result<RunResult> {
        let status = Status::parse(&self.task_status)?;
        if !matches!(status, Status::Running | Status::Success | Status::Failed) {
            return Err(error::validation(format!(
                "unexpected task status {}",
                status
            )));
        }

        let task = self.apply_with_retry(log, status)?;
        info!(log, "Updated task";
            "job_id" => self.job_id.as_str(), "task_name" => self.task_name.as_str(),
            "task_status" => status.as_str());

        if task.party == self.settings.party {
            self.broadcast_update(log, status)?;
        }

        let triggered = if status.is_terminal() {
            Some(
                job_triggerer::Mediator {
                    conn:     &mut *self.conn,
                    settings: self.settings,
                    spawner:  self.spawner,
                    job_id:   self.job_id.clone(),
                }
                .run(log)?,
            )
        } else {
            None
        };

        Ok(RunResult {
            task_status: status,
            triggered,
        })
    }

    //
    // Steps
    //

    /// Read-apply-commit under the optimistic lock, re-reading on version
    /// conflicts up to the retry budget. The one exception is the local
    /// RUNNING claim: a conflict there means another worker owns the task,
    /// and the only correct reaction is to give up immediately.
    fn apply_with_retry(&mut self, log: &Logger, status: Status) -> Result<model::Task> {
        for _ in 0..common::MAX_UPDATE_RETRIES {
            let task = store::task_require(self.conn, &self.job_id, &self.task_name)?;
            let job = store::job_require(self.conn, &self.job_id)?;

            // Once a terminal aggregate status is on the job row, no more
            // task transitions happen here. This is also how a worker on a
            // canceled job finds out it is working for nothing.
            if job.parsed_status()?.is_terminal() {
                return Err(error::validation(format!(
                    "job {} is already {}",
                    self.job_id, job.status
                )));
            }

            let res = match status {
                Status::Running => self.apply_running(&task),
                Status::Success => self.apply_success(&task, &job),
                Status::Failed => {
                    store::task_apply_transition(
                        self.conn,
                        &task,
                        &TaskTransition::Fail(self.errors.clone()),
                    )
                }
                _ => unreachable!(),
            };
            match res {
                Ok(()) => {
                    return store::task_require(self.conn, &self.job_id, &self.task_name);
                }
                Err(ref e)
                    if e.is_stale_data()
                        && !(status == Status::Running
                            && task.party == self.settings.party) =>
                {
                    warn!(log, "Task update hit stale data -- re-reading";
                        "job_id" => self.job_id.as_str(),
                        "task_name" => self.task_name.as_str());
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(error::stale_data(format!(
            "task {}.{}",
            self.job_id, self.task_name
        )))
    }

    fn apply_running(&mut self, task: &model::Task) -> Result<()> {
        if task.party == self.settings.party {
            // The worker's claim: only an INIT row at the observed version
            // can move to RUNNING. Losing this race is how a duplicate
            // worker learns to exit without running the operator.
            return store::task_claim_running(self.conn, task);
        }
        // A mirror of a peer-owned vertex. Notifications can arrive late or
        // twice; anything past INIT just stands.
        match task.parsed_status()? {
            Status::Init => store::task_apply_transition(self.conn, task, &TaskTransition::Run),
            _ => Ok(()),
        }
    }

    /// The task flips to SUCCESS and any emitted context lands in the same
    /// transaction, so peers and the trigger never observe one without the
    /// other.
    fn apply_success(&mut self, task: &model::Task, job: &model::Job) -> Result<()> {
        let external_context = self.external_context.clone();
        let conn = &mut *self.conn;
        conn.transaction::<_, Error, _>(|conn| {
            store::task_apply_transition(conn, task, &TaskTransition::Success)?;
            if let Some(ref context) = external_context {
                let mut merged = job.parsed_context()?;
                deep_merge(&mut merged, context);
                store::job_update_context(conn, job, &merged)?;
            }
            Ok(())
        })
    }

    fn broadcast_update(&mut self, log: &Logger, status: Status) -> Result<()> {
        let job = store::job_require(self.conn, &self.job_id)?;
        let join_parties = job.parsed_join_parties()?;
        let context = job.parsed_context()?;

        for party in common::other_parties(&join_parties, &self.settings.party) {
            let params = match status {
                Status::Success => {
                    // Only what the recipient may see: the shared section
                    // and its own subtree.
                    let mut filtered = serde_json::Map::new();
                    filtered.insert(
                        "common".to_owned(),
                        context.get("common").cloned().unwrap_or_else(|| json!({})),
                    );
                    filtered.insert(
                        party.clone(),
                        context.get(&party).cloned().unwrap_or_else(|| json!({})),
                    );
                    UpdateTaskParams {
                        task_status: status.as_str().to_owned(),
                        job_context: Some(Value::Object(filtered)),
                        errors:      None,
                    }
                }
                Status::Failed => UpdateTaskParams {
                    task_status: status.as_str().to_owned(),
                    job_context: None,
                    errors:      self.errors.clone(),
                },
                _ => UpdateTaskParams {
                    task_status: status.as_str().to_owned(),
                    job_context: None,
                    errors:      None,
                },
            };
            self.peer_client
                .update_task(log, &party, &self.job_id, &self.task_name, &params)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RunResult {
    pub task_status: Status,

    /// Set when the update was terminal and scheduling re-ran.
    pub triggered: Option<job_triggerer::RunResult>,
}

//
// Tests
//
