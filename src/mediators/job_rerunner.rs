//! Puts a failed or canceled job back into rotation: failed/canceled tasks
//! reset to INIT with their timestamps and errors cleared, the job returns
//! to RUNNING, and scheduling picks up from whatever still holds. Succeeded
//! tasks keep their results; only the broken parts re-execute.

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
        let status = job.parsed_status()?;

        // Only jobs that ended badly can be rerun. Anything else is a
        // caller-level no-op, not an error.
        if !matches!(status, Status::Failed | Status::Canceled) {
            info!(log, "Job not rerunnable -- skipping";
                "job_id" => self.job_id.as_str(), "status" => job.status.as_str());
            return Ok(RunResult {
                rerun:   false,
                spawned: Vec::new(),
            });
        }

        if job.main_party == self.settings.party {
            let join_parties = job.parsed_join_parties()?;
            for party in common::other_parties(&join_parties, &self.settings.party) {
                self.peer_client.rerun(log, &party, &self.job_id)?;
            }
        }

        self.revive_job(log)?;
        self.reset_tasks(log)?;

        let triggered = job_triggerer::Mediator {
            conn:     &mut *self.conn,
            settings: self.settings,
            spawner:  self.spawner,
            job_id:   self.job_id.clone(),
        }
        .run(log)?;

        Ok(RunResult {
            rerun:   true,
            spawned: triggered.spawned,
        })
    }

    //
    // Steps
    //

    fn revive_job(&mut self, log: &Logger) -> Result<()> {
        for _ in 0..common::MAX_UPDATE_RETRIES {
            let job = store::job_require(self.conn, &self.job_id)?;
            match store::job_update_status(self.conn, &job, Status::Running) {
                Ok(()) => {
                    info!(log, "Job back to RUNNING for rerun"; "job_id" => self.job_id.as_str());
                    return Ok(());
                }
                Err(ref e) if e.is_stale_data() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(error::stale_data(format!("job {}", self.job_id)))
    }

    fn reset_tasks(&mut self, log: &Logger) -> Result<()> {
        let tasks = store::tasks_for_job(self.conn, &self.job_id)?;
        for task in tasks {
            if !matches!(
                task.parsed_status()?,
                Status::Failed | Status::Canceled
            ) {
                continue;
            }
            let mut current = task;
            for attempt in 0..common::MAX_UPDATE_RETRIES {
                match store::task_apply_transition(self.conn, &current, &TaskTransition::Reset) {
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
            info!(log, "Reset task for rerun";
                "job_id" => self.job_id.as_str(), "task_name" => current.name.as_str());
        }
        Ok(())
    }
}

pub struct RunResult {
    /// False when the job wasn't in a rerunnable state.
    pub rerun: bool,

    pub spawned: Vec<String>,
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::mediators::job_rerunner::*;
    use crate::model::{Status, TaskTransition};
    use crate::peer_client::PeerClientPassThrough;
    use crate::store;
    use crate::test_data;
    use crate::test_helpers;
    use crate::worker::WorkerSpawnerPassThrough;

    #[test]
    fn test_job_rerunner_failed_job() {
        let mut bootstrap = TestBootstrap::new("party_a");
        bootstrap.fail_task("psi_a", "operator exploded");

        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        assert!(res.rerun);

        let job = store::job_require(&mut bootstrap.conn, &bootstrap.job_id).unwrap();
        assert_eq!(Status::Running.as_str(), job.status);

        // The failed task is factory-new again and got respawned.
        let task = store::task_require(&mut bootstrap.conn, &bootstrap.job_id, "psi_a").unwrap();
        assert_eq!(Status::Init.as_str(), task.status);
        assert!(task.start_time.is_none());
        assert!(task.end_time.is_none());
        assert!(task.errors.is_none());
        assert_eq!(vec!["psi_a".to_owned()], res.spawned);

        // As the main party, the rerun was broadcast.
        let calls = bootstrap.peer_client.recorded();
        assert_eq!(1, calls.len());
        assert_eq!("rerun", calls[0].operation);
        assert_eq!("party_b", calls[0].party);
    }

    #[test]
    fn test_job_rerunner_noop_on_running_job() {
        let mut bootstrap = TestBootstrap::new("party_a");

        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        assert!(!res.rerun);
        assert!(bootstrap.peer_client.recorded().is_empty());
        assert!(bootstrap.spawner.recorded().is_empty());
    }

    #[test]
    fn test_job_rerunner_noop_on_success_job() {
        let mut bootstrap = TestBootstrap::new("party_a");
        let job = store::job_require(&mut bootstrap.conn, &bootstrap.job_id).unwrap();
        store::job_update_status(&mut bootstrap.conn, &job, Status::Success).unwrap();

        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        assert!(!res.rerun);
    }

    #[test]
    fn test_job_rerunner_join_party_does_not_rebroadcast() {
        let mut bootstrap = TestBootstrap::new("party_b");
        bootstrap.fail_task("psi_a", "boom");

        let (mut mediator, log) = bootstrap.mediator();
        let res = mediator.run(&log).unwrap();
        assert!(res.rerun);
        assert!(bootstrap.peer_client.recorded().is_empty());
    }

    #[test]
    fn test_job_rerunner_keeps_succeeded_tasks() {
        let mut bootstrap = TestBootstrap::new("party_a");
        let task = store::task_require(&mut bootstrap.conn, &bootstrap.job_id, "psi_a").unwrap();
        store::task_apply_transition(&mut bootstrap.conn, &task, &TaskTransition::Success).unwrap();
        bootstrap.fail_task("psi_b", "boom");

        let (mut mediator, log) = bootstrap.mediator();
        mediator.run(&log).unwrap();

        let kept = store::task_require(&mut bootstrap.conn, &bootstrap.job_id, "psi_a").unwrap();
        assert_eq!(Status::Success.as_str(), kept.status);
        let reset = store::task_require(&mut bootstrap.conn, &bootstrap.job_id, "psi_b").unwrap();
        assert_eq!(Status::Init.as_str(), reset.status);
    }

    //
    // Private types/functions
    //

    struct TestBootstrap {
        conn:        diesel::sqlite::SqliteConnection,
        job_id:      String,
        log:         slog::Logger,
        peer_client: PeerClientPassThrough,
        settings:    crate::settings::Settings,
        spawner:     WorkerSpawnerPassThrough,
    }

    impl TestBootstrap {
        fn new(party: &str) -> Self {
            let mut conn = test_helpers::connection();
            let job = test_data::job::insert(&mut conn);
            TestBootstrap {
                conn,
                job_id: job.job_id,
                log: test_helpers::log(),
                peer_client: PeerClientPassThrough::new(),
                settings: test_helpers::settings(party),
                spawner: WorkerSpawnerPassThrough::new(),
            }
        }

        fn fail_task(&mut self, name: &str, errors: &str) {
            let task = store::task_require(&mut self.conn, &self.job_id, name).unwrap();
            store::task_apply_transition(
                &mut self.conn,
                &task,
                &TaskTransition::Fail(Some(errors.to_owned())),
            )
            .unwrap();
            let job = store::job_require(&mut self.conn, &self.job_id).unwrap();
            store::job_update_status(&mut self.conn, &job, Status::Failed).unwrap();
        }

        fn mediator(&mut self) -> (Mediator, slog::Logger) {
            (
                Mediator {
                    conn:        &mut self.conn,
                    settings:    &self.settings,
                    peer_client: &self.peer_client,
                    spawner:     &self.spawner,
                    job_id:      self.job_id.clone(),
                },
                self.log.clone(),
            )
        }
    }
}
