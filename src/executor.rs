//! The task executor: the body of a worker process. Claims its task by
//! reporting RUNNING (exiting quietly if another worker got there first),
//! assembles the operator's configmap and arguments from the job context,
//! runs the operator, and reports the terminal status back through the
//! task-update path.

use crate::contexts::ConfigManager;
use crate::dag::{Dag, LogicTask};
use crate::errors::*;
use crate::mediators::task_updater;
use crate::merge::deep_merge;
use crate::model::Status;
use crate::network::NetworkConfig;
use crate::operators;
use crate::paths;
use crate::peer_client::PeerClient;
use crate::settings::Settings;
use crate::time_helpers;
use crate::worker::WorkerSpawner;

use diesel::sqlite::SqliteConnection;
use regex::Regex;
use serde_json::{Map, Value};
use slog::Logger;
use std::collections::BTreeMap;

pub struct TaskExecutor<'a> {
    pub conn:           &'a mut SqliteConnection,
    pub settings:       &'a Settings,
    pub network_config: &'a NetworkConfig,
    pub peer_client:    &'a dyn PeerClient,
    pub spawner:        &'a dyn WorkerSpawner,

    /// Context accessors on their own connection, handed to the operator.
    pub config_manager: ConfigManager,

    pub job_id:    String,
    pub task_name: String,
}

impl<'a> TaskExecutor<'a> {
    pub fn run(&mut self, log: &Logger) -> Result<RunResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| self.run_inner(log))
    }

    fn run_inner(&mut self, log: &Logger) -> Result<RunResult> {
        let dag = Dag::load(self.conn, &self.job_id)?;
        let task = dag.task(&self.task_name)?.clone();

        if !self.claim(log)? {
            return Ok(RunResult {
                claimed:   false,
                succeeded: false,
            });
        }

        let outcome = self.execute_operator(log, &task);
        let (succeeded, errors) = match outcome {
            Ok(true) => (true, None),
            Ok(false) => (false, None),
            Err(ref e) => (false, Some(error_strings(e).join(": "))),
        };
        info!(log, "Task execution finished";
            "job_id" => self.job_id.as_str(), "task_name" => self.task_name.as_str(),
            "success" => succeeded, "errors" => errors.clone().unwrap_or_default());

        self.report(log, succeeded, errors);
        Ok(RunResult {
            claimed: true,
            succeeded,
        })
    }

    //
    // Steps
    //

    /// Reports RUNNING, which doubles as the claim on the task row. A
    /// stale-data refusal means another worker already owns this task and
    /// this process has nothing left to do.
    fn claim(&mut self, log: &Logger) -> Result<bool> {
        let res = task_updater::Mediator {
            conn:             &mut *self.conn,
            settings:         self.settings,
            peer_client:      self.peer_client,
            spawner:          self.spawner,
            job_id:           self.job_id.clone(),
            task_name:        self.task_name.clone(),
            task_status:      Status::Running.as_str().to_owned(),
            external_context: None,
            errors:           None,
        }
        .run(log);
        match res {
            Ok(_) => Ok(true),
            Err(ref e) if e.is_stale_data() => {
                warn!(log, "Task already claimed by another worker -- exiting";
                    "job_id" => self.job_id.as_str(), "task_name" => self.task_name.as_str());
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn execute_operator(&mut self, log: &Logger, task: &LogicTask) -> Result<bool> {
        let operator =
            operators::lookup(&task.class_path, &task.class_name).ok_or_else(|| {
                error::not_found(format!(
                    "operator {}.{} in registry",
                    task.class_path, task.class_name
                ))
            })?;

        let passphrase = format!("{}.{}.{}", self.job_id, task.class_path, task.class_name);
        let job_context = self.config_manager.job_context().get_all()?;
        let configmap = build_configmap(
            job_context,
            self.network_config,
            &passphrase,
            &self.settings.safe_work_dir,
        )?;
        let args = resolve_args(&mut self.config_manager, &task.args)?;
        info!(log, "Ready to execute operator";
            "job_id" => self.job_id.as_str(), "task_name" => self.task_name.as_str(),
            "class" => format!("{}.{}", task.class_path, task.class_name));

        let mut harness = operators::Harness {
            party: task.party.clone(),
            args,
            config_manager: &mut self.config_manager,
        };
        operator.run(log, &mut harness, &configmap)
    }

    /// Terminal status reports are best-effort: the job may have been
    /// canceled underneath us, in which case the refusal is the signal that
    /// nobody wants this result anymore.
    fn report(&mut self, log: &Logger, succeeded: bool, errors: Option<String>) {
        let status = if succeeded {
            Status::Success
        } else {
            Status::Failed
        };
        let res = task_updater::Mediator {
            conn:             &mut *self.conn,
            settings:         self.settings,
            peer_client:      self.peer_client,
            spawner:          self.spawner,
            job_id:           self.job_id.clone(),
            task_name:        self.task_name.clone(),
            task_status:      status.as_str().to_owned(),
            external_context: None,
            errors,
        }
        .run(log);
        if let Err(ref e) = res {
            error!(log, "Failed to report terminal task status";
                "job_id" => self.job_id.as_str(), "task_name" => self.task_name.as_str(),
                "error" => e.to_string());
        }
    }
}

pub struct RunResult {
    /// False when another worker had already claimed the task.
    pub claimed: bool,

    pub succeeded: bool,
}

//
// Public functions
//

/// Assembles the configuration document an operator runs against from the
/// raw job context: per-party subtrees with the submitter's per-party input
/// merged in, the remaining user input merged into `common`, the network
/// descriptor laid on top, and every path-like string sandboxed.
pub fn build_configmap(
    job_context: Value,
    network_config: &NetworkConfig,
    passphrase: &str,
    safe_work_dir: &str,
) -> Result<Value> {
    let mut document = match job_context {
        Value::Object(map) => map,
        _ => return Err(error::validation("job context is not a JSON object")),
    };

    let parties: Vec<String> = document
        .keys()
        .filter(|key| key.as_str() != "common")
        .cloned()
        .collect();

    let mut common = document
        .remove("common")
        .unwrap_or_else(|| json!({}));
    let mut user_input = common
        .as_object_mut()
        .and_then(|map| map.remove("__user_input"))
        .unwrap_or_else(|| json!({}));

    let mut configmap = Map::new();
    for party in &parties {
        let mut subtree = document.remove(party).unwrap_or_else(|| json!({}));
        if let Some(party_input) = user_input
            .as_object_mut()
            .and_then(|map| map.remove(party))
        {
            deep_merge(&mut subtree, &party_input);
        }
        configmap.insert(party.clone(), subtree);
    }
    deep_merge(&mut common, &user_input);

    // The network descriptor is shallow-merged: its top-level keys land in
    // common as-is.
    let descriptor = network_config.generate(&parties, passphrase)?;
    if let (Some(common_map), Some(descriptor_map)) =
        (common.as_object_mut(), descriptor.as_object())
    {
        for (key, value) in descriptor_map {
            common_map.insert(key.clone(), value.clone());
        }
    }
    configmap.insert("common".to_owned(), common);

    let mut assembled = Value::Object(configmap);
    paths::sandbox_document(&mut assembled, safe_work_dir)?;
    Ok(assembled)
}

/// Resolves `${scope.dotted.path}` argument references against the job
/// context, mission context, or global config; anything else passes
/// through verbatim.
pub fn resolve_args(
    config_manager: &mut ConfigManager,
    args: &BTreeMap<String, Value>,
) -> Result<Map<String, Value>> {
    lazy_static! {
        static ref ARG_REFERENCE: Regex = Regex::new(r"\$\{(.*?)\}").unwrap();
    }

    let mut resolved = Map::new();
    for (key, value) in args {
        let resolved_value = match value {
            Value::String(raw) if raw.starts_with('$') => {
                let reference = ARG_REFERENCE
                    .captures(raw)
                    .and_then(|captures| captures.get(1))
                    .map(|group| group.as_str())
                    .ok_or_else(|| {
                        error::validation(format!("malformed args reference {}", raw))
                    })?;
                if let Some(path) = reference.strip_prefix("job_context.") {
                    config_manager
                        .job_context()
                        .get(path, None)?
                        .unwrap_or(Value::Null)
                } else if let Some(path) = reference.strip_prefix("mission_context.") {
                    config_manager
                        .mission_context()
                        .get(path)?
                        .map_or(Value::Null, Value::String)
                } else if let Some(path) = reference.strip_prefix("global_config.") {
                    config_manager
                        .global_config()
                        .get(path)?
                        .map_or(Value::Null, Value::String)
                } else {
                    return Err(error::validation(format!(
                        "no context found for args reference {}",
                        raw
                    )));
                }
            }
            other => other.clone(),
        };
        resolved.insert(key.clone(), resolved_value);
    }
    Ok(resolved)
}

//
// Tests
//
