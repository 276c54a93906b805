//! Read-side job manager operations. Queries carry no job-scoped state and
//! never mutate, so they live apart from the mediators as plain functions.

use crate::errors::*;
use crate::model::Status;
use crate::schema;
use crate::store;

use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_json::Value;

/// Default page size for job listings.
pub const DEFAULT_LIST_LIMIT: i64 = 10;

/// Everything a caller polls for: aggregate status, a percentage of
/// succeeded tasks, and per-task detail sorted by start time (tasks that
/// never started sort last).
pub fn job_details(conn: &mut SqliteConnection, job_id: &str) -> Result<Value> {
    let job = store::job_require(conn, job_id)?;
    let mut tasks = store::tasks_for_job(conn, job_id)?;
    if tasks.is_empty() {
        return Err(error::not_found(format!("tasks for job {}", job_id)));
    }

    let num_success = tasks
        .iter()
        .filter(|t| t.status == Status::Success.as_str())
        .count();
    let progress = format!("{:.2}%", 100.0 * num_success as f64 / tasks.len() as f64);

    let now = Utc::now().naive_utc();
    tasks.sort_by_key(|t| sort_time(t.start_time, now));
    let task_details: Vec<Value> = tasks.iter().map(|t| t.details()).collect();

    Ok(json!({
        "job_id": job.job_id,
        "progress": progress,
        "job_status": job.status,
        "task_details": task_details,
    }))
}

/// The most recent jobs owned by a user, optionally narrowed by status and
/// by a creation-time horizon in hours.
pub fn list_jobs(
    conn: &mut SqliteConnection,
    user_name: &str,
    status: Option<Status>,
    hours: Option<i64>,
    limit: i64,
) -> Result<Vec<Value>> {
    let mut query = schema::jobmesh_job::table
        .filter(schema::jobmesh_job::user_name.eq(user_name))
        .into_boxed();
    if let Some(status) = status {
        query = query.filter(schema::jobmesh_job::status.eq(status.as_str()));
    }
    if let Some(hours) = hours {
        let horizon = Utc::now().naive_utc() - Duration::hours(hours);
        query = query.filter(schema::jobmesh_job::create_time.ge(horizon));
    }

    let jobs: Vec<crate::model::Job> = query
        .order(schema::jobmesh_job::create_time.desc())
        .limit(limit)
        .load(conn)
        .chain_err(|| format!("Error listing jobs for user {}", user_name))?;
    Ok(jobs.iter().map(|job| job.simple_view()).collect())
}

//
// Private functions
//

fn sort_time(start_time: Option<NaiveDateTime>, now: NaiveDateTime) -> NaiveDateTime {
    start_time.unwrap_or(now)
}

//
// Tests
//
