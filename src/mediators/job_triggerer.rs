//! Drives a job forward after anything observable happened to it: rebuilds
//! the DAG from the store, spawns a worker per locally-ready task while the
//! job is live, and otherwise persists the aggregate status.
//!
//! Safe to run concurrently from the HTTP layer and from worker callbacks:
//! spawning is advisory (the worker's own RUNNING claim is the one decision
//! point) and status persistence is version-guarded.

use crate::dag::{Dag, LogicTask};
use crate::errors::*;
use crate::mediators::common;
use crate::model::Status;
use crate::settings::Settings;
use crate::store;
use crate::time_helpers;
use crate::worker::WorkerSpawner;

use diesel::sqlite::SqliteConnection;
use slog::Logger;

pub struct Mediator<'a> {
    pub conn:     &'a mut SqliteConnection,
    pub settings: &'a Settings,
    pub spawner:  &'a dyn WorkerSpawner,
    pub job_id:   String,
}

impl<'a> Mediator<'a> {
    pub fn run(&mut self, log: &Logger) -> Result<RunResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| self.run_inner(log))
    }

    fn run_inner(&mut self, log: &Logger) -> Result<RunResult> {
        let job = store::job_require(self.conn, &self.job_id)?;
        let persisted = job.parsed_status()?;

        // A job that has already been driven to rest stays at rest. Without
        // this, canceling a job whose tasks are all still INIT would
        // re-derive RUNNING from the task set and start spawning workers.
        if persisted.is_terminal() {
            info!(log, "Job already terminal -- not triggering";
                "job_id" => self.job_id.as_str(), "status" => persisted.as_str());
            return Ok(RunResult {
                job_status: persisted,
                spawned:    Vec::new(),
            });
        }

        let dag = Dag::load(self.conn, &self.job_id)?;
        let status = dag.judge_job_status();

        if status == Status::Running {
            let spawned = self.spawn_ready_tasks(log, &dag)?;
            return Ok(RunResult {
                job_status: status,
                spawned,
            });
        }

        self.persist_status(log, status)?;
        if status == Status::Failed || status == Status::Canceled {
            for task in dag.local_running_tasks(&self.settings.party) {
                self.stop_task(log, task);
            }
        }
        Ok(RunResult {
            job_status: status,
            spawned:    Vec::new(),
        })
    }

    //
    // Steps
    //

    fn spawn_ready_tasks(&mut self, log: &Logger, dag: &Dag) -> Result<Vec<String>> {
        let mut spawned = Vec::new();
        for task in dag.local_ready_tasks(&self.settings.party)? {
            info!(log, "Spawning worker for ready task";
                "job_id" => self.job_id.as_str(), "task_name" => task.name.as_str());
            self.spawner.spawn(log, &self.job_id, &task.name)?;
            spawned.push(task.name.clone());
        }
        Ok(spawned)
    }

    fn persist_status(&mut self, log: &Logger, status: Status) -> Result<()> {
        for _ in 0..common::MAX_UPDATE_RETRIES {
            let job = store::job_require(self.conn, &self.job_id)?;
            if job.parsed_status()?.is_terminal() {
                return Ok(());
            }
            match store::job_update_status(self.conn, &job, status) {
                Ok(()) => {
                    info!(log, "Persisted aggregate job status";
                        "job_id" => self.job_id.as_str(), "status" => status.as_str());
                    return Ok(());
                }
                Err(ref e) if e.is_stale_data() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(error::stale_data(format!("job {}", self.job_id)))
    }

    // Cancellation of running workers is advisory: the worker finds out
    // when its next status report is refused by the terminal job. Forcible
    // process termination stays outside the scheduler.
    fn stop_task(&self, log: &Logger, task: &LogicTask) {
        info!(log, "Task left running on terminal job; stop is advisory";
            "job_id" => self.job_id.as_str(), "task_name" => task.name.as_str());
    }
}

#[derive(Debug)]
pub struct RunResult {
    pub job_status: Status,

    /// Names of the tasks a worker was spawned for on this pass.
    pub spawned: Vec<String>,
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::mediators::job_triggerer::*;
    use crate::model::{Status, TaskTransition};
    use crate::store;
    use crate::test_data;
    use crate::test_helpers;
    use crate::worker::WorkerSpawnerPassThrough;

    #[test]
    fn test_job_triggerer_spawns_ready_tasks() {
        let mut bootstrap = TestBootstrap::new("party_a");
        let job_id = bootstrap.job_id.clone();

        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        assert_eq!(Status::Running, res.job_status);
        assert_eq!(vec!["psi_a".to_owned()], res.spawned);
        assert_eq!(
            vec![(job_id, "psi_a".to_owned())],
            bootstrap.spawner.recorded()
        );
    }

    #[test]
    fn test_job_triggerer_no_local_work_for_other_party() {
        let mut bootstrap = TestBootstrap::new("party_b");

        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        // psi_b depends on psi_a which hasn't succeeded, so party_b idles.
        assert_eq!(Status::Running, res.job_status);
        assert!(res.spawned.is_empty());
    }

    #[test]
    fn test_job_triggerer_persists_terminal_status() {
        let mut bootstrap = TestBootstrap::new("party_a");
        let job_id = bootstrap.job_id.clone();

        for name in &["psi_a", "psi_b"] {
            let task = store::task_require(&mut bootstrap.conn, &job_id, name).unwrap();
            store::task_apply_transition(&mut bootstrap.conn, &task, &TaskTransition::Success)
                .unwrap();
        }

        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        assert_eq!(Status::Success, res.job_status);
        assert!(res.spawned.is_empty());

        let job = store::job_require(&mut bootstrap.conn, &job_id).unwrap();
        assert_eq!(Status::Success.as_str(), job.status);
    }

    #[test]
    fn test_job_triggerer_terminal_job_is_inert() {
        let mut bootstrap = TestBootstrap::new("party_a");
        let job_id = bootstrap.job_id.clone();

        let job = store::job_require(&mut bootstrap.conn, &job_id).unwrap();
        store::job_update_status(&mut bootstrap.conn, &job, Status::Canceled).unwrap();

        // All tasks are still INIT, which would re-derive RUNNING; the
        // persisted CANCELED wins and nothing spawns.
        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        assert_eq!(Status::Canceled, res.job_status);
        assert!(res.spawned.is_empty());
        assert!(bootstrap.spawner.recorded().is_empty());
    }

    //
    // Private types/functions
    //

    struct TestBootstrap {
        conn:     diesel::sqlite::SqliteConnection,
        job_id:   String,
        log:      slog::Logger,
        settings: crate::settings::Settings,
        spawner:  WorkerSpawnerPassThrough,
    }

    impl TestBootstrap {
        fn new(party: &str) -> Self {
            let mut conn = test_helpers::connection();
            let job = test_data::job::insert(&mut conn);
            TestBootstrap {
                conn,
                job_id: job.job_id,
                log: test_helpers::log(),
                settings: test_helpers::settings(party),
                spawner: WorkerSpawnerPassThrough::new(),
            }
        }

        fn mediator(&mut self) -> (Mediator, slog::Logger) {
            (
                Mediator {
                    conn:     &mut self.conn,
                    settings: &self.settings,
                    spawner:  &self.spawner,
                    job_id:   self.job_id.clone(),
                },
                self.log.clone(),
            )
        }
    }
}
