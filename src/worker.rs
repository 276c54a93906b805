//! Spawning of task executor workers. Each ready task gets its own OS
//! process: operators are not trusted to share an address space with the
//! scheduler, and a crashing operator must not take the service down.

use crate::errors::*;

use slog::Logger;
use std::env;
use std::process::Command;
use std::sync::{Arc, Mutex};

//
// WorkerSpawner trait + implementations
//

pub trait WorkerSpawner: Send + Sync {
    // This is here because it's difficult to make a trait cloneable.
    fn clone_box(&self) -> Box<dyn WorkerSpawner>;

    fn spawn(&self, log: &Logger, job_id: &str, task_name: &str) -> Result<()>;
}

/// Re-invokes the current executable as `run-task`. The child inherits the
/// environment, so it reconnects to the same database and party config, and
/// it is not waited on: it reports its outcome through the task-update
/// path like any other worker.
#[derive(Clone, Debug, Default)]
pub struct WorkerSpawnerLive {}

impl WorkerSpawner for WorkerSpawnerLive {
    fn clone_box(&self) -> Box<dyn WorkerSpawner> {
        Box::new(self.clone())
    }

    fn spawn(&self, log: &Logger, job_id: &str, task_name: &str) -> Result<()> {
        let exe = env::current_exe().chain_err(|| "Error locating current executable")?;
        let child = Command::new(exe)
            .arg("run-task")
            .arg("--job-id")
            .arg(job_id)
            .arg("--task-name")
            .arg(task_name)
            .spawn()
            .chain_err(|| format!("Error spawning worker for {}.{}", job_id, task_name))?;
        info!(log, "Spawned task worker";
            "job_id" => job_id, "task_name" => task_name, "pid" => child.id());
        Ok(())
    }
}

/// Records spawn requests instead of forking. Tests assert scheduling
/// decisions against `spawned`.
#[derive(Clone, Debug, Default)]
pub struct WorkerSpawnerPassThrough {
    pub spawned: Arc<Mutex<Vec<(String, String)>>>,
}

impl WorkerSpawnerPassThrough {
    pub fn new() -> WorkerSpawnerPassThrough {
        WorkerSpawnerPassThrough::default()
    }

    pub fn recorded(&self) -> Vec<(String, String)> {
        self.spawned.lock().unwrap().clone()
    }
}

impl WorkerSpawner for WorkerSpawnerPassThrough {
    fn clone_box(&self) -> Box<dyn WorkerSpawner> {
        Box::new(self.clone())
    }

    fn spawn(&self, _log: &Logger, job_id: &str, task_name: &str) -> Result<()> {
        self.spawned
            .lock()
            .unwrap()
            .push((job_id.to_owned(), task_name.to_owned()));
        Ok(())
    }
}

//
// Tests
//
