//! Row-level access to the durable entities, including the two concurrency
//! mechanisms everything above relies on: bounded retry on transient
//! database contention and version-guarded updates for optimistic locking.
//!
//! Guarded updates filter on the `version_id` observed at read time and bump
//! it on success. Zero affected rows means somebody else got there first and
//! surfaces as `ErrorKind::StaleData`; callers re-read and re-apply if the
//! operation allows it.

use crate::errors::*;
use crate::model::{self, Status, TaskTransition};
use crate::schema;

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use slog::Logger;
use std::thread;
use std::time::Duration;

//
// Public constants
//

/// Maximum number of attempts for an operation retried on transient
/// database contention. SQLite reports a busy database as an opaque
/// error, so the worker processes sharing our database file make these
/// retries a normal part of operation rather than an anomaly.
pub const MAX_COMMIT_ATTEMPTS: u32 = 3;

//
// Public functions
//

/// Runs an operation, retrying on transient database contention with
/// exponential backoff (1 ms, 2 ms, ...). Stale-data conflicts are *not*
/// retried here: re-reading and re-applying is the caller's decision.
pub fn with_backoff<T, F>(log: &Logger, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Ok(res) => return Ok(res),
            Err(e) => {
                if attempt + 1 >= MAX_COMMIT_ATTEMPTS || !is_transient(&e) {
                    return Err(e);
                }
                let sleep = Duration::from_millis(1 << attempt);
                warn!(log, "Transient database error -- retrying";
                    "attempt" => attempt, "sleep_ms" => sleep.as_millis() as u64,
                    "error" => e.to_string());
                thread::sleep(sleep);
                attempt += 1;
            }
        }
    }
}

//
// Global config
//

pub fn global_config_find(conn: &mut SqliteConnection, key: &str) -> Result<Option<model::GlobalConfig>> {
    schema::jobmesh_global_config::table
        .filter(schema::jobmesh_global_config::config_key.eq(key))
        .first(conn)
        .optional()
        .chain_err(|| format!("Error loading global config {}", key))
}

pub fn global_config_insert_if_absent(
    conn: &mut SqliteConnection,
    ins: &model::insertable::GlobalConfig,
) -> Result<()> {
    diesel::insert_into(schema::jobmesh_global_config::table)
        .values(ins)
        .on_conflict(schema::jobmesh_global_config::config_key)
        .do_nothing()
        .execute(conn)
        .chain_err(|| format!("Error inserting global config {}", ins.config_key))?;
    Ok(())
}

//
// Missions
//

/// Finds a mission by name, either pinned to an exact version or the
/// highest version on record (`version == None`, the "latest" resolution).
pub fn mission_find(
    conn: &mut SqliteConnection,
    name: &str,
    version: Option<i32>,
) -> Result<Option<model::Mission>> {
    let query = schema::jobmesh_mission::table.filter(schema::jobmesh_mission::name.eq(name));
    let res = match version {
        Some(v) => query
            .filter(schema::jobmesh_mission::version.eq(v))
            .first(conn)
            .optional(),
        None => query
            .order(schema::jobmesh_mission::version.desc())
            .first(conn)
            .optional(),
    };
    res.chain_err(|| format!("Error loading mission {}", name))
}

pub fn mission_insert_if_absent(
    conn: &mut SqliteConnection,
    ins: &model::insertable::Mission,
) -> Result<()> {
    diesel::insert_into(schema::jobmesh_mission::table)
        .values(ins)
        .on_conflict((schema::jobmesh_mission::name, schema::jobmesh_mission::version))
        .do_nothing()
        .execute(conn)
        .chain_err(|| format!("Error inserting mission {}@v{}", ins.name, ins.version))?;
    Ok(())
}

//
// Mission context
//

pub fn mission_context_find(
    conn: &mut SqliteConnection,
    mission_name: &str,
    key: &str,
) -> Result<Option<model::MissionContext>> {
    schema::jobmesh_mission_context::table
        .filter(schema::jobmesh_mission_context::mission_name.eq(mission_name))
        .filter(schema::jobmesh_mission_context::config_key.eq(key))
        .first(conn)
        .optional()
        .chain_err(|| format!("Error loading mission context {}.{}", mission_name, key))
}

pub fn mission_context_insert(
    conn: &mut SqliteConnection,
    ins: &model::insertable::MissionContext,
) -> Result<()> {
    diesel::insert_into(schema::jobmesh_mission_context::table)
        .values(ins)
        .execute(conn)
        .chain_err(|| {
            format!(
                "Error inserting mission context {}.{}",
                ins.mission_name, ins.config_key
            )
        })?;
    Ok(())
}

pub fn mission_context_update(
    conn: &mut SqliteConnection,
    record: &model::MissionContext,
    value: &str,
    expire_time: NaiveDateTime,
) -> Result<()> {
    let updated = diesel::update(
        schema::jobmesh_mission_context::table
            .filter(schema::jobmesh_mission_context::id.eq(record.id))
            .filter(schema::jobmesh_mission_context::version_id.eq(record.version_id)),
    )
    .set((
        schema::jobmesh_mission_context::config_value.eq(value),
        schema::jobmesh_mission_context::expire_time.eq(expire_time),
        schema::jobmesh_mission_context::update_time.eq(now()),
        schema::jobmesh_mission_context::version_id.eq(record.version_id + 1),
    ))
    .execute(conn)
    .chain_err(|| {
        format!(
            "Error updating mission context {}.{}",
            record.mission_name, record.config_key
        )
    })?;
    guard(updated, || {
        format!(
            "mission context {}.{}",
            record.mission_name, record.config_key
        )
    })
}

//
// Jobs
//

pub fn job_find(conn: &mut SqliteConnection, job_id: &str) -> Result<Option<model::Job>> {
    schema::jobmesh_job::table
        .filter(schema::jobmesh_job::job_id.eq(job_id))
        .first(conn)
        .optional()
        .chain_err(|| format!("Error loading job {}", job_id))
}

pub fn job_require(conn: &mut SqliteConnection, job_id: &str) -> Result<model::Job> {
    job_find(conn, job_id)?.ok_or_else(|| error::not_found(format!("job {}", job_id)))
}

pub fn job_count_running(conn: &mut SqliteConnection) -> Result<i64> {
    schema::jobmesh_job::table
        .filter(schema::jobmesh_job::status.eq(Status::Running.as_str()))
        .count()
        .first(conn)
        .chain_err(|| "Error counting running jobs")
}

/// Creates a job and its full task set in one transaction. Tasks and job
/// either all exist or none do, which is what keeps the one-task-per-
/// operator invariant trivially true from the moment of creation.
pub fn job_insert_with_tasks(
    conn: &mut SqliteConnection,
    job: &model::insertable::Job,
    tasks: &[model::insertable::Task],
) -> Result<model::Job> {
    conn.transaction::<_, Error, _>(|conn| {
        diesel::insert_into(schema::jobmesh_job::table)
            .values(job)
            .execute(conn)
            .chain_err(|| format!("Error inserting job {}", job.job_id))?;
        diesel::insert_into(schema::jobmesh_task::table)
            .values(tasks)
            .execute(conn)
            .chain_err(|| format!("Error inserting tasks for job {}", job.job_id))?;
        job_require(conn, &job.job_id)
    })
}

pub fn job_update_status(
    conn: &mut SqliteConnection,
    job: &model::Job,
    status: Status,
) -> Result<()> {
    let updated = diesel::update(
        schema::jobmesh_job::table
            .filter(schema::jobmesh_job::id.eq(job.id))
            .filter(schema::jobmesh_job::version_id.eq(job.version_id)),
    )
    .set((
        schema::jobmesh_job::status.eq(status.as_str()),
        schema::jobmesh_job::update_time.eq(now()),
        schema::jobmesh_job::version_id.eq(job.version_id + 1),
    ))
    .execute(conn)
    .chain_err(|| format!("Error updating status for job {}", job.job_id))?;
    guard(updated, || format!("job {}", job.job_id))
}

pub fn job_update_context(
    conn: &mut SqliteConnection,
    job: &model::Job,
    context: &serde_json::Value,
) -> Result<()> {
    let serialized =
        serde_json::to_string(context).chain_err(|| "Error serializing job context")?;
    let updated = diesel::update(
        schema::jobmesh_job::table
            .filter(schema::jobmesh_job::id.eq(job.id))
            .filter(schema::jobmesh_job::version_id.eq(job.version_id)),
    )
    .set((
        schema::jobmesh_job::job_context.eq(serialized),
        schema::jobmesh_job::update_time.eq(now()),
        schema::jobmesh_job::version_id.eq(job.version_id + 1),
    ))
    .execute(conn)
    .chain_err(|| format!("Error updating context for job {}", job.job_id))?;
    guard(updated, || format!("job {}", job.job_id))
}

//
// Tasks
//

pub fn task_find(
    conn: &mut SqliteConnection,
    job_id: &str,
    name: &str,
) -> Result<Option<model::Task>> {
    schema::jobmesh_task::table
        .filter(schema::jobmesh_task::job_id.eq(job_id))
        .filter(schema::jobmesh_task::name.eq(name))
        .first(conn)
        .optional()
        .chain_err(|| format!("Error loading task {}.{}", job_id, name))
}

pub fn task_require(conn: &mut SqliteConnection, job_id: &str, name: &str) -> Result<model::Task> {
    task_find(conn, job_id, name)?
        .ok_or_else(|| error::not_found(format!("task {}.{}", job_id, name)))
}

pub fn tasks_for_job(conn: &mut SqliteConnection, job_id: &str) -> Result<Vec<model::Task>> {
    schema::jobmesh_task::table
        .filter(schema::jobmesh_task::job_id.eq(job_id))
        .load(conn)
        .chain_err(|| format!("Error loading tasks for job {}", job_id))
}

/// Applies a lifecycle transition to a task row under the version guard.
pub fn task_apply_transition(
    conn: &mut SqliteConnection,
    task: &model::Task,
    transition: &TaskTransition,
) -> Result<()> {
    let target = schema::jobmesh_task::table
        .filter(schema::jobmesh_task::id.eq(task.id))
        .filter(schema::jobmesh_task::version_id.eq(task.version_id));
    let bumped = task.version_id + 1;

    let updated = match *transition {
        TaskTransition::Reset => diesel::update(target)
            .set((
                schema::jobmesh_task::status.eq(Status::Init.as_str()),
                schema::jobmesh_task::start_time.eq(None::<NaiveDateTime>),
                schema::jobmesh_task::end_time.eq(None::<NaiveDateTime>),
                schema::jobmesh_task::errors.eq(None::<String>),
                schema::jobmesh_task::update_time.eq(now()),
                schema::jobmesh_task::version_id.eq(bumped),
            ))
            .execute(conn),
        TaskTransition::Run => diesel::update(target)
            .set((
                schema::jobmesh_task::status.eq(Status::Running.as_str()),
                schema::jobmesh_task::start_time.eq(Some(now())),
                schema::jobmesh_task::update_time.eq(now()),
                schema::jobmesh_task::version_id.eq(bumped),
            ))
            .execute(conn),
        TaskTransition::Success => diesel::update(target)
            .set((
                schema::jobmesh_task::status.eq(Status::Success.as_str()),
                schema::jobmesh_task::end_time.eq(Some(now())),
                schema::jobmesh_task::update_time.eq(now()),
                schema::jobmesh_task::version_id.eq(bumped),
            ))
            .execute(conn),
        TaskTransition::Fail(ref errors) => diesel::update(target)
            .set((
                schema::jobmesh_task::status.eq(Status::Failed.as_str()),
                schema::jobmesh_task::end_time.eq(Some(now())),
                schema::jobmesh_task::errors.eq(errors.clone().unwrap_or_default()),
                schema::jobmesh_task::update_time.eq(now()),
                schema::jobmesh_task::version_id.eq(bumped),
            ))
            .execute(conn),
        TaskTransition::Cancel => diesel::update(target)
            .set((
                schema::jobmesh_task::status.eq(Status::Canceled.as_str()),
                schema::jobmesh_task::end_time.eq(Some(now())),
                schema::jobmesh_task::update_time.eq(now()),
                schema::jobmesh_task::version_id.eq(bumped),
            ))
            .execute(conn),
    }
    .chain_err(|| format!("Error updating task {}.{}", task.job_id, task.name))?;
    guard(updated, || format!("task {}.{}", task.job_id, task.name))
}

/// The worker-side RUNNING claim: succeeds only if the row is still INIT at
/// the observed version. Two workers racing for the same task means exactly
/// one gets a row here; the loser sees stale data and must exit without
/// running the operator.
pub fn task_claim_running(conn: &mut SqliteConnection, task: &model::Task) -> Result<()> {
    let updated = diesel::update(
        schema::jobmesh_task::table
            .filter(schema::jobmesh_task::id.eq(task.id))
            .filter(schema::jobmesh_task::version_id.eq(task.version_id))
            .filter(schema::jobmesh_task::status.eq(Status::Init.as_str())),
    )
    .set((
        schema::jobmesh_task::status.eq(Status::Running.as_str()),
        schema::jobmesh_task::start_time.eq(Some(now())),
        schema::jobmesh_task::update_time.eq(now()),
        schema::jobmesh_task::version_id.eq(task.version_id + 1),
    ))
    .execute(conn)
    .chain_err(|| format!("Error claiming task {}.{}", task.job_id, task.name))?;
    guard(updated, || format!("task {}.{}", task.job_id, task.name))
}

//
// Users
//

pub fn user_find(conn: &mut SqliteConnection, name: &str) -> Result<Option<model::User>> {
    schema::jobmesh_user::table
        .filter(schema::jobmesh_user::name.eq(name))
        .first(conn)
        .optional()
        .chain_err(|| format!("Error loading user {}", name))
}

pub fn user_insert_if_absent(
    conn: &mut SqliteConnection,
    ins: &model::insertable::User,
) -> Result<()> {
    diesel::insert_into(schema::jobmesh_user::table)
        .values(ins)
        .on_conflict(schema::jobmesh_user::name)
        .do_nothing()
        .execute(conn)
        .chain_err(|| format!("Error inserting user {}", ins.name))?;
    Ok(())
}

//
// Private functions
//

fn guard<F>(updated: usize, entity: F) -> Result<()>
where
    F: FnOnce() -> String,
{
    if updated == 0 {
        return Err(error::stale_data(entity()));
    }
    Ok(())
}

fn is_transient(error: &Error) -> bool {
    match *error.kind() {
        ErrorKind::Database(diesel::result::Error::DatabaseError(_, ref info)) => {
            let message = info.message();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

//
// Connections
//

pub const MIGRATIONS: diesel_migrations::EmbeddedMigrations =
    diesel_migrations::embed_migrations!("./migrations");

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    use diesel_migrations::MigrationHarness;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::from(format!("Error running migrations: {}", e)))?;
    Ok(())
}

/// Builds the connection pool. Every checkout turns on WAL and a busy
/// timeout: worker processes share the database file with the server, so
/// short lock waits are routine and must not surface as hard errors.
pub fn pool(db_uri: &str, max_size: u32) -> Result<diesel::r2d2::Pool<diesel::r2d2::ConnectionManager<SqliteConnection>>> {
    let manager = diesel::r2d2::ConnectionManager::<SqliteConnection>::new(db_uri);
    diesel::r2d2::Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(ConnectionCustomizer {}))
        .build(manager)
        .chain_err(|| format!("Error building connection pool for {}", db_uri))
}

/// Applies the per-connection pragmas outside of pooling too (worker
/// processes open plain connections).
pub fn configure_connection(conn: &mut SqliteConnection) -> Result<()> {
    use diesel::connection::SimpleConnection;
    conn.batch_execute(CONNECTION_PRAGMAS)
        .chain_err(|| "Error applying connection pragmas")
}

const CONNECTION_PRAGMAS: &str =
    "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; \
     PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;";

#[derive(Debug)]
struct ConnectionCustomizer {}

impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error>
    for ConnectionCustomizer
{
    fn on_acquire(
        &self,
        conn: &mut SqliteConnection,
    ) -> std::result::Result<(), diesel::r2d2::Error> {
        use diesel::connection::SimpleConnection;
        conn.batch_execute(CONNECTION_PRAGMAS)
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

//
// Tests
//
