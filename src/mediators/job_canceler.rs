//! Takes a job down on request: siblings are told first (when this node is
//! the main party), the job row goes to CANCELED, and locally-owned running
//! tasks are marked CANCELED with an end time. Worker processes are not
//! killed; they discover the cancellation when their next status report is
//! refused.

use crate::errors::*;
use crate::mediators::common;
use crate::mediators::job_triggerer;
use crate::model::{Status, TaskTransition};
use crate::peer_client::PeerClient;
use crate::settings::Settings;
use crate::store;
use crate::time_helpers;
use crate::worker::WorkerSpawner;

use diesel::sqlite::SqliteConnection;
use slog::Logger;

pub struct Mediator<'a> {
    pub conn:        &'a mut SqliteConnection,
    pub settings:    &'a Settings,
    pub peer_client: &'a dyn PeerClient,
    pub spawner:     &'a dyn WorkerSpawner,
    pub job_id:      String,
}

impl<'a> Mediator<'a> {
    pub fn run(&mut self, log: &Logger) -> Result<RunResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| self.run_inner(log))
    }

    fn run_inner(&mut self, log: &Logger) -> Result<RunResult> {
        let job = store::job_require(self.conn, &self.job_id)?;

        if job.main_party == self.settings.party {
            let join_parties = job.parsed_join_parties()?;
            for party in common::other_parties(&join_parties, &self.settings.party) {
                self.peer_client.cancel(log, &party, &self.job_id)?;
            }
        }

        self.cancel_job(log)?;
        let canceled_tasks = self.cancel_running_tasks(log)?;

        // The trigger sees a terminal job row and goes quiet; running it
        // anyway keeps cancel on the same path as every other mutation.
        job_triggerer::Mediator {
            conn:     &mut *self.conn,
            settings: self.settings,
            spawner:  self.spawner,
            job_id:   self.job_id.clone(),
        }
        .run(log)?;

        Ok(RunResult { canceled_tasks })
    }

    //
    // Steps
    //

    fn cancel_job(&mut self, log: &Logger) -> Result<()> {
        for _ in 0..common::MAX_UPDATE_RETRIES {
            let job = store::job_require(self.conn, &self.job_id)?;
            if job.parsed_status()? == Status::Canceled {
                return Ok(());
            }
            match store::job_update_status(self.conn, &job, Status::Canceled) {
                Ok(()) => {
                    info!(log, "Job canceled"; "job_id" => self.job_id.as_str());
                    return Ok(());
                }
                Err(ref e) if e.is_stale_data() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(error::stale_data(format!("job {}", self.job_id)))
    }

    fn cancel_running_tasks(&mut self, log: &Logger) -> Result<Vec<String>> {
        let mut canceled = Vec::new();
        let tasks = store::tasks_for_job(self.conn, &self.job_id)?;
        for task in tasks {
            if task.party != self.settings.party
                || task.parsed_status()? != Status::Running
            {
                continue;
            }
            let mut current = task;
            for attempt in 0..common::MAX_UPDATE_RETRIES {
                match store::task_apply_transition(self.conn, &current, &TaskTransition::Cancel) {
                    Ok(()) => break,
                    Err(ref e) if e.is_stale_data()
                        && attempt + 1 < common::MAX_UPDATE_RETRIES =>
                    {
                        current =
                            store::task_require(self.conn, &self.job_id, &current.name)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            info!(log, "Canceled running task";
                "job_id" => self.job_id.as_str(), "task_name" => current.name.as_str());
            canceled.push(current.name);
        }
        Ok(canceled)
    }
}

pub struct RunResult {
    pub canceled_tasks: Vec<String>,
}

//
// Tests
//
