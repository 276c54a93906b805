//! The application's data layer containing models that will be queried from
//! and inserted into the database.
//!
//! Simple helper functions are allowed, but they should be kept extremely
//! simple, with preference for any and all domain logic to be offloaded to a
//! mediator. All writes that touch a `version_id` column go through `store`
//! so that optimistic locking is never bypassed.
//!
//! Insertable models are found in the `insertable` module. These are distinct
//! from queryable models so that we can take advantage of default values
//! provided by the database (the best example being ID sequences, but applies
//! to any field with a `DEFAULT`).

use crate::errors::*;

use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

//
// Statuses and roles
//

/// Lifecycle state shared by jobs and tasks. Stored as its uppercase token
/// in the database and on the wire.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    Init,
    Running,
    Success,
    Failed,
    Canceled,
}

impl Status {
    pub fn parse(token: &str) -> Result<Status> {
        match token {
            "INIT" => Ok(Status::Init),
            "RUNNING" => Ok(Status::Running),
            "SUCCESS" => Ok(Status::Success),
            "FAILED" => Ok(Status::Failed),
            "CANCELED" => Ok(Status::Canceled),
            _ => Err(error::invalid_status(token)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Init => "INIT",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
            Status::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(*self, Status::Success | Status::Failed | Status::Canceled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserStatus {
    Normal,
    Revoked,
}

impl UserStatus {
    pub fn parse(token: &str) -> Result<UserStatus> {
        match token {
            "Normal" => Ok(UserStatus::Normal),
            "Revoked" => Ok(UserStatus::Revoked),
            _ => Err(error::validation(format!("invalid user status {}", token))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            UserStatus::Normal => "Normal",
            UserStatus::Revoked => "Revoked",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserRole {
    Operator,
    Node,
    Admin,
}

impl UserRole {
    pub fn parse(token: &str) -> Result<UserRole> {
        match token {
            "Operator" => Ok(UserRole::Operator),
            "Node" => Ok(UserRole::Node),
            "Admin" => Ok(UserRole::Admin),
            _ => Err(error::validation(format!("invalid user role {}", token))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            UserRole::Operator => "Operator",
            UserRole::Node => "Node",
            UserRole::Admin => "Admin",
        }
    }
}

//
// Queryable models
//

#[derive(Clone, Debug, Queryable)]
pub struct GlobalConfig {
    pub id:           i64,
    pub config_key:   String,
    pub config_value: String,
    pub create_time:  NaiveDateTime,
    pub update_time:  NaiveDateTime,
}

#[derive(Clone, Debug, Queryable)]
pub struct Mission {
    pub id:          i64,
    pub name:        String,
    pub version:     i32,
    pub dag:         String,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

impl Mission {
    pub fn dag_document(&self) -> Result<MissionDag> {
        serde_json::from_str(&self.dag)
            .chain_err(|| format!("Error parsing dag for mission {}@v{}", self.name, self.version))
    }
}

#[derive(Clone, Debug, Queryable)]
pub struct MissionContext {
    pub id:           i64,
    pub mission_name: String,
    pub config_key:   String,
    pub config_value: String,
    pub expire_time:  NaiveDateTime,
    pub create_time:  NaiveDateTime,
    pub update_time:  NaiveDateTime,
    pub version_id:   i32,
}

#[derive(Clone, Debug, Queryable)]
pub struct Job {
    pub id:              i64,
    pub job_id:          String,
    pub mission_name:    String,
    pub mission_version: i32,
    pub job_context:     String,
    pub main_party:      String,
    pub join_parties:    String,
    pub main_host:       Option<String>,
    pub status:          String,
    pub user_name:       String,
    pub create_time:     NaiveDateTime,
    pub update_time:     NaiveDateTime,
    pub version_id:      i32,
}

impl Job {
    pub fn parsed_status(&self) -> Result<Status> {
        Status::parse(&self.status)
    }

    /// The distinct parties participating in this job, as persisted at
    /// submit time.
    pub fn parsed_join_parties(&self) -> Result<Vec<String>> {
        serde_json::from_str(&self.join_parties)
            .chain_err(|| format!("Error parsing join_parties for job {}", self.job_id))
    }

    pub fn parsed_context(&self) -> Result<Value> {
        let context: Value = serde_json::from_str(&self.job_context)
            .chain_err(|| format!("Error parsing job_context for job {}", self.job_id))?;
        if !context.is_object() {
            return Err(error::validation(format!(
                "job_context for job {} is not a JSON object",
                self.job_id
            )));
        }
        Ok(context)
    }

    pub fn simple_view(&self) -> Value {
        json!({"job_id": self.job_id, "status": self.status})
    }
}

#[derive(Clone, Debug, Queryable)]
pub struct Task {
    pub id:          i64,
    pub job_id:      String,
    pub name:        String,
    pub party:       String,
    pub args:        Option<String>,
    pub status:      String,
    pub start_time:  Option<NaiveDateTime>,
    pub end_time:    Option<NaiveDateTime>,
    pub errors:      Option<String>,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
    pub version_id:  i32,
}

impl Task {
    pub fn parsed_status(&self) -> Result<Status> {
        Status::parse(&self.status)
    }

    pub fn parsed_args(&self) -> Result<serde_json::Map<String, Value>> {
        match self.args {
            Some(ref raw) => serde_json::from_str(raw)
                .chain_err(|| format!("Error parsing args for task {}.{}", self.job_id, self.name)),
            None => Ok(serde_json::Map::new()),
        }
    }

    /// The per-task slice of a job details response. Timestamps render as
    /// `"NA"` when unset; errors only appear on failed tasks.
    pub fn details(&self) -> Value {
        let mut details = json!({
            "name": self.name,
            "status": self.status,
            "start_time": format_time(self.start_time),
            "end_time": format_time(self.end_time),
        });
        if self.status == Status::Failed.as_str() {
            if let Some(ref errors) = self.errors {
                if !errors.is_empty() {
                    details["errors"] = Value::String(errors.clone());
                }
            }
        }
        details
    }
}

/// A single status transition applied to a task row. `store` turns these
/// into version-guarded updates; the variants mirror the task lifecycle:
/// reset puts a terminal task back to INIT, the rest walk it forward.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskTransition {
    Reset,
    Run,
    Success,
    Fail(Option<String>),
    Cancel,
}

impl TaskTransition {
    pub fn status(&self) -> Status {
        match *self {
            TaskTransition::Reset => Status::Init,
            TaskTransition::Run => Status::Running,
            TaskTransition::Success => Status::Success,
            TaskTransition::Fail(_) => Status::Failed,
            TaskTransition::Cancel => Status::Canceled,
        }
    }
}

#[derive(Clone, Debug, Queryable)]
pub struct User {
    pub id:          i64,
    pub name:        String,
    pub status:      String,
    pub role:        String,
    pub create_time: NaiveDateTime,
    pub update_time: NaiveDateTime,
}

impl User {
    pub fn is_normal(&self) -> bool {
        self.status == UserStatus::Normal.as_str()
    }

    pub fn parsed_role(&self) -> Result<UserRole> {
        UserRole::parse(&self.role)
    }
}

//
// Mission DAG document
//

/// The JSON document stored in `Mission.dag`. Mission templates are loaded
/// from YAML at init and persisted in this shape; it is never mutated
/// afterwards.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MissionDag {
    #[serde(default)]
    pub meta:      MissionMeta,
    pub operators: Vec<OperatorSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MissionMeta {
    #[serde(default)]
    pub name:    Option<String>,
    #[serde(default)]
    pub version: Option<i32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OperatorSpec {
    pub name:       String,
    pub party:      String,
    pub class:      String,
    pub class_path: String,
    #[serde(default)]
    pub args:       Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub depends:    Option<Vec<String>>,
}

impl MissionDag {
    /// Distinct parties appearing in the operator list, in first-seen order.
    pub fn join_parties(&self) -> Vec<String> {
        let mut parties: Vec<String> = Vec::new();
        for operator in &self.operators {
            if !parties.contains(&operator.party) {
                parties.push(operator.party.clone());
            }
        }
        parties
    }
}

//
// Insertable models
//

pub mod insertable {
    use crate::schema::{
        jobmesh_global_config, jobmesh_job, jobmesh_mission, jobmesh_mission_context, jobmesh_task,
        jobmesh_user,
    };

    use chrono::NaiveDateTime;

    #[derive(Insertable)]
    #[diesel(table_name = jobmesh_global_config)]
    pub struct GlobalConfig {
        pub config_key:   String,
        pub config_value: String,
    }

    #[derive(Insertable)]
    #[diesel(table_name = jobmesh_mission)]
    pub struct Mission {
        pub name:    String,
        pub version: i32,
        pub dag:     String,
    }

    #[derive(Insertable)]
    #[diesel(table_name = jobmesh_mission_context)]
    pub struct MissionContext {
        pub mission_name: String,
        pub config_key:   String,
        pub config_value: String,
        pub expire_time:  NaiveDateTime,
    }

    #[derive(Insertable)]
    #[diesel(table_name = jobmesh_job)]
    pub struct Job {
        pub job_id:          String,
        pub mission_name:    String,
        pub mission_version: i32,
        pub job_context:     String,
        pub main_party:      String,
        pub join_parties:    String,
        pub status:          String,
        pub user_name:       String,
    }

    #[derive(Insertable)]
    #[diesel(table_name = jobmesh_task)]
    pub struct Task {
        pub job_id: String,
        pub name:   String,
        pub party:  String,
        pub args:   Option<String>,
        pub status: String,
    }

    #[derive(Insertable)]
    #[diesel(table_name = jobmesh_user)]
    pub struct User {
        pub name:   String,
        pub status: String,
        pub role:   String,
    }
}

//
// Private functions
//

fn format_time(time: Option<NaiveDateTime>) -> Value {
    match time {
        Some(t) => Value::String(t.format("%Y-%m-%d %H:%M:%S").to_string()),
        None => Value::String("NA".to_owned()),
    }
}

//
// Tests
//
