//! Accepts a job submission, fans it out to the sibling parties, persists
//! the job with one INIT task per operator, and kicks off scheduling.
//!
//! The peer fan-out deliberately happens before the local commit, matching
//! the platform's established ordering: a refusing peer means no job is
//! created locally, while a local commit failure after fan-out can leave
//! orphan jobs on peers.

use crate::errors::*;
use crate::mediators::common;
use crate::mediators::job_triggerer;
use crate::model::{self, Status};
use crate::peer_client::PeerClient;
use crate::settings::Settings;
use crate::store;
use crate::time_helpers;
use crate::worker::WorkerSpawner;

use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use slog::Logger;

pub struct Mediator<'a> {
    pub conn:        &'a mut SqliteConnection,
    pub settings:    &'a Settings,
    pub peer_client: &'a dyn PeerClient,
    pub spawner:     &'a dyn WorkerSpawner,

    pub job_id:    String,
    /// The submission body as received. Relayed to join parties verbatim,
    /// enriched with the resolved mission identity.
    pub params:    Value,
    pub user_name: String,
}

impl<'a> Mediator<'a> {
    pub fn run(&mut self, log: &Logger) -> Result<RunResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| self.run_inner(log))
    }

    fn run_inner(&mut self, log: &Logger) -> Result<RunResult> {
        if !self.params.is_object() {
            return Err(error::validation("submit params must be a JSON object"));
        }
        self.check_job_limit()?;

        let mission = self.resolve_mission()?;
        let document = mission.dag_document()?;
        let main_party = self
            .params
            .get("main_party")
            .and_then(Value::as_str)
            .unwrap_or(&self.settings.party)
            .to_owned();
        let join_parties = document.join_parties();

        if main_party == self.settings.party {
            self.broadcast_submit(log, &mission, &main_party, &join_parties)?;
        }

        let job = self.persist_job(log, &mission, &document, &main_party, &join_parties)?;
        info!(log, "Created new job";
            "job_id" => job.job_id.as_str(),
            "mission" => format!("{}@v{}", mission.name, mission.version),
            "main_party" => main_party.as_str());

        let triggered = job_triggerer::Mediator {
            conn:     &mut *self.conn,
            settings: self.settings,
            spawner:  self.spawner,
            job_id:   self.job_id.clone(),
        }
        .run(log)?;

        Ok(RunResult {
            job,
            spawned: triggered.spawned,
        })
    }

    //
    // Steps
    //

    fn check_job_limit(&mut self) -> Result<()> {
        let num_running = store::job_count_running(self.conn)?;
        if num_running >= self.settings.max_job_limit {
            return Err(error::validation(format!(
                "too many running jobs ({} >= {}), please wait until one finishes",
                num_running, self.settings.max_job_limit
            )));
        }
        Ok(())
    }

    fn resolve_mission(&mut self) -> Result<model::Mission> {
        let mission_name = self
            .params
            .get("mission_name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MISSION)
            .to_owned();
        let version = match self.params.get("mission_version") {
            None | Some(Value::Null) => None,
            Some(Value::String(token)) if token == "latest" => None,
            Some(Value::String(token)) => Some(token.parse::<i32>().map_err(|_| {
                error::validation(format!("invalid mission_version {}", token))
            })?),
            Some(Value::Number(n)) => Some(n.as_i64().ok_or_else(|| {
                error::validation(format!("invalid mission_version {}", n))
            })? as i32),
            Some(other) => {
                return Err(error::validation(format!(
                    "invalid mission_version {}",
                    other
                )))
            }
        };
        store::mission_find(self.conn, &mission_name, version)?.ok_or_else(|| {
            error::not_found(format!(
                "mission {}@v{}",
                mission_name,
                version.map_or("latest".to_owned(), |v| v.to_string())
            ))
        })
    }

    /// Tells every other join party to create the same job under the same
    /// id, pinned to the exact mission version we resolved. A peer refusal
    /// aborts the submission before anything is persisted here.
    fn broadcast_submit(
        &mut self,
        log: &Logger,
        mission: &model::Mission,
        main_party: &str,
        join_parties: &[String],
    ) -> Result<()> {
        let mut relayed = self.params.clone();
        relayed["main_party"] = json!(main_party);
        relayed["mission_name"] = json!(mission.name);
        relayed["mission_version"] = json!(mission.version.to_string());
        relayed["job_id"] = json!(self.job_id);

        for party in common::other_parties(join_parties, &self.settings.party) {
            self.peer_client.submit(log, &party, &relayed)?;
        }
        Ok(())
    }

    fn persist_job(
        &mut self,
        log: &Logger,
        mission: &model::Mission,
        document: &model::MissionDag,
        main_party: &str,
        join_parties: &[String],
    ) -> Result<model::Job> {
        let mission_params = match self.params.get("mission_params") {
            Some(params @ Value::Object(_)) => params.clone(),
            _ => json!({}),
        };
        let mut context = json!({
            "common": {"__user_input": mission_params, "job_id": self.job_id},
        });
        for party in join_parties {
            context[party] = json!({});
        }
        if context.get(main_party).is_none() {
            context[main_party] = json!({});
        }

        let job_ins = model::insertable::Job {
            job_id:          self.job_id.clone(),
            mission_name:    mission.name.clone(),
            mission_version: mission.version,
            job_context:     serde_json::to_string(&context)
                .chain_err(|| "Error serializing job context")?,
            main_party:      main_party.to_owned(),
            join_parties:    serde_json::to_string(join_parties)
                .chain_err(|| "Error serializing join parties")?,
            status:          Status::Running.as_str().to_owned(),
            user_name:       self.user_name.clone(),
        };
        let task_ins: Vec<model::insertable::Task> = document
            .operators
            .iter()
            .map(|operator| {
                Ok(model::insertable::Task {
                    job_id: self.job_id.clone(),
                    name:   operator.name.clone(),
                    party:  operator.party.clone(),
                    args:   match operator.args {
                        Some(ref args) => Some(
                            serde_json::to_string(args)
                                .chain_err(|| "Error serializing task args")?,
                        ),
                        None => None,
                    },
                    status: Status::Init.as_str().to_owned(),
                })
            })
            .collect::<Result<_>>()?;

        store::with_backoff(log, || {
            store::job_insert_with_tasks(self.conn, &job_ins, &task_ins)
        })
    }
}

pub struct RunResult {
    pub job: model::Job,

    /// Tasks started immediately by the post-submit trigger.
    pub spawned: Vec<String>,
}

//
// Private constants
//

/// Mission submitted when the caller names none.
const DEFAULT_MISSION: &str = "ecdh_psi_optimized";

//
// Tests
//
