//! In-memory projection of one job: the mission's operator graph joined
//! with the current task rows. Always rebuilt from the store, never cached,
//! so readiness decisions are only as stale as the last read.

use crate::errors::*;
use crate::model::Status;
use crate::store;

use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use std::collections::BTreeMap;

//
// Public types
//

/// One vertex: the operator declaration from the mission template plus the
/// live status of its task row.
#[derive(Clone, Debug)]
pub struct LogicTask {
    pub name:       String,
    pub party:      String,
    pub args:       BTreeMap<String, Value>,
    pub status:     Status,
    pub depends:    Vec<String>,
    pub class_name: String,
    pub class_path: String,
}

#[derive(Clone, Debug)]
pub struct Dag {
    pub job_id:          String,
    pub mission_name:    String,
    pub mission_version: i32,
    tasks:               BTreeMap<String, LogicTask>,
}

impl Dag {
    /// Joins the job's mission template against its task rows.
    /// Construction fails if any operator is missing its task row; that
    /// invariant is established at submit time and a violation means the
    /// store is corrupt.
    pub fn load(conn: &mut SqliteConnection, job_id: &str) -> Result<Dag> {
        let job = store::job_require(conn, job_id)?;
        let mission = store::mission_find(conn, &job.mission_name, Some(job.mission_version))?
            .ok_or_else(|| {
                error::not_found(format!(
                    "mission {}@v{}",
                    job.mission_name, job.mission_version
                ))
            })?;
        let rows = store::tasks_for_job(conn, job_id)?;

        let document = mission.dag_document()?;
        let mut tasks: BTreeMap<String, LogicTask> = BTreeMap::new();
        for operator in &document.operators {
            tasks.insert(
                operator.name.clone(),
                LogicTask {
                    name:       operator.name.clone(),
                    party:      operator.party.clone(),
                    args:       operator.args.clone().unwrap_or_default(),
                    status:     Status::Init,
                    depends:    operator.depends.clone().unwrap_or_default(),
                    class_name: operator.class.clone(),
                    class_path: operator.class_path.clone(),
                },
            );
        }

        for row in &rows {
            if let Some(task) = tasks.get_mut(&row.name) {
                task.status = row.parsed_status()?;
            }
        }
        let missing: Vec<&str> = tasks
            .values()
            .filter(|task| !rows.iter().any(|row| row.name == task.name))
            .map(|task| task.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(error::dag_inconsistent(format!(
                "job {} is missing task rows for: {}",
                job_id,
                missing.join(", ")
            )));
        }

        Ok(Dag {
            job_id: job_id.to_owned(),
            mission_name: job.mission_name,
            mission_version: job.mission_version,
            tasks,
        })
    }

    pub fn from_parts(
        job_id: &str,
        mission_name: &str,
        mission_version: i32,
        tasks: Vec<LogicTask>,
    ) -> Dag {
        Dag {
            job_id: job_id.to_owned(),
            mission_name: mission_name.to_owned(),
            mission_version,
            tasks: tasks.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn task(&self, name: &str) -> Result<&LogicTask> {
        self.tasks
            .get(name)
            .ok_or_else(|| error::not_found(format!("task {} in dag of job {}", name, self.job_id)))
    }

    /// Vertices this party may start right now: owned here, still INIT, and
    /// every dependency SUCCESS. Dependencies on peer-owned vertices only
    /// count once the peer's SUCCESS notification has been applied locally.
    pub fn local_ready_tasks(&self, party: &str) -> Result<Vec<&LogicTask>> {
        let mut ready = Vec::new();
        for task in self.tasks.values() {
            if task.party != party || task.status != Status::Init {
                continue;
            }
            let mut is_ready = true;
            for dep_name in &task.depends {
                let dep = self.tasks.get(dep_name).ok_or_else(|| {
                    error::dag_inconsistent(format!(
                        "task {} depends on {} which is not in the dag",
                        task.name, dep_name
                    ))
                })?;
                if dep.status != Status::Success {
                    is_ready = false;
                    break;
                }
            }
            if is_ready {
                ready.push(task);
            }
        }
        Ok(ready)
    }

    pub fn local_running_tasks(&self, party: &str) -> Vec<&LogicTask> {
        self.tasks
            .values()
            .filter(|task| task.party == party && task.status == Status::Running)
            .collect()
    }

    /// Aggregate job status, evaluated in priority order: any failure
    /// dooms the job, then any cancellation, then full success; anything
    /// else (including all-INIT) is still running.
    pub fn judge_job_status(&self) -> Status {
        let mut num_success = 0;
        for task in self.tasks.values() {
            match task.status {
                Status::Failed => return Status::Failed,
                Status::Success => num_success += 1,
                _ => (),
            }
        }
        if self.tasks.values().any(|t| t.status == Status::Canceled) {
            return Status::Canceled;
        }
        if num_success == self.tasks.len() {
            return Status::Success;
        }
        Status::Running
    }
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::dag::*;
    use crate::test_data;
    use crate::test_helpers;

    #[test]
    fn test_dag_load() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);

        let dag = Dag::load(&mut conn, &job.job_id).unwrap();
        assert_eq!("psi", dag.mission_name);
        assert_eq!("party_a", dag.task("psi_a").unwrap().party);
        assert_eq!(vec!["psi_a".to_owned()], dag.task("psi_b").unwrap().depends);
    }

    #[test]
    fn test_dag_local_ready_tasks() {
        let dag = two_party_dag(Status::Init, Status::Init);
        let ready = dag.local_ready_tasks("party_a").unwrap();
        assert_eq!(1, ready.len());
        assert_eq!("psi_a", ready[0].name);

        // The downstream vertex is blocked until its dependency succeeds.
        assert!(dag.local_ready_tasks("party_b").unwrap().is_empty());

        let dag = two_party_dag(Status::Success, Status::Init);
        let ready = dag.local_ready_tasks("party_b").unwrap();
        assert_eq!(1, ready.len());
        assert_eq!("psi_b", ready[0].name);
    }

    #[test]
    fn test_dag_local_running_tasks() {
        let dag = two_party_dag(Status::Running, Status::Init);
        assert_eq!(1, dag.local_running_tasks("party_a").len());
        assert!(dag.local_running_tasks("party_b").is_empty());
    }

    #[test]
    fn test_dag_judge_job_status() {
        // FAILED beats everything else.
        assert_eq!(
            Status::Failed,
            two_party_dag(Status::Failed, Status::Canceled).judge_job_status()
        );
        // CANCELED beats success and progress.
        assert_eq!(
            Status::Canceled,
            two_party_dag(Status::Success, Status::Canceled).judge_job_status()
        );
        // All SUCCESS is the only way to finish cleanly.
        assert_eq!(
            Status::Success,
            two_party_dag(Status::Success, Status::Success).judge_job_status()
        );
        // INIT and RUNNING both mean there's still work to do.
        assert_eq!(
            Status::Running,
            two_party_dag(Status::Init, Status::Init).judge_job_status()
        );
        assert_eq!(
            Status::Running,
            two_party_dag(Status::Success, Status::Running).judge_job_status()
        );
        assert_eq!(
            Status::Running,
            two_party_dag(Status::Success, Status::Init).judge_job_status()
        );
    }

    #[test]
    fn test_dag_unknown_dependency() {
        let tasks = vec![LogicTask {
            name:       "solo".to_owned(),
            party:      "party_a".to_owned(),
            args:       Default::default(),
            status:     Status::Init,
            depends:    vec!["ghost".to_owned()],
            class_name: "NoOp".to_owned(),
            class_path: "operators.builtin".to_owned(),
        }];
        let dag = Dag::from_parts("j_x", "psi", 1, tasks);
        assert!(dag.local_ready_tasks("party_a").is_err());
    }

    //
    // Private functions
    //

    fn two_party_dag(status_a: Status, status_b: Status) -> Dag {
        let task = |name: &str, party: &str, status: Status, depends: Vec<String>| LogicTask {
            name: name.to_owned(),
            party: party.to_owned(),
            args: Default::default(),
            status,
            depends,
            class_name: "NoOp".to_owned(),
            class_path: "operators.builtin".to_owned(),
        };
        Dag::from_parts(
            "j_x",
            "psi",
            1,
            vec![
                task("psi_a", "party_a", status_a, vec![]),
                task("psi_b", "party_b", status_b, vec!["psi_a".to_owned()]),
            ],
        )
    }
}
