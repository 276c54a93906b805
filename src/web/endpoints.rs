//! The v1 HTTP surface. Handlers stay thin: extract, authenticate, run the
//! matching mediator or query on a pooled connection inside a blocking
//! task, and let the central error mapper shape failures.

use crate::errors::*;
use crate::ids;
use crate::mediators::{job_canceler, job_rerunner, job_submitter, task_updater};
use crate::model::Status;
use crate::peer_client::PeerClient;
use crate::queries;
use crate::settings::Settings;
use crate::web::auth;
use crate::web::middleware::RequestLog;
use crate::worker::WorkerSpawner;

use actix_web::http::StatusCode;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use slog::Logger;

//
// Public types
//

pub struct State {
    pub log:         Logger,
    pub pool:        Pool<ConnectionManager<SqliteConnection>>,
    pub settings:    Settings,
    pub peer_client: Box<dyn PeerClient>,
    pub spawner:     Box<dyn WorkerSpawner>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub hours:  Option<String>,
    pub limit:  Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskBody {
    pub task_status: String,
    pub job_context: Option<Value>,
    pub errors:      Option<String>,
}

//
// Handlers
//

pub async fn index(state: web::Data<State>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": format!("{} server is running!", state.settings.party),
    }))
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"success": true}))
}

pub async fn submit_job(
    req: HttpRequest,
    state: web::Data<State>,
    body: web::Json<Value>,
) -> HttpResponse {
    let log = request_log(&req, &state);
    let token = auth::bearer_token(&req);
    let params = body.into_inner();
    let blocking_log = log.clone();

    run_blocking(log, move || {
        let mut conn = state.pool.get()?;
        let user = auth::authenticate(&mut conn, state.settings.secret.as_deref(), token.as_deref())?;
        auth::require_job_mutation_role(&user)?;

        let job_id = params
            .get("job_id")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(ids::generate_job_id);
        if !ids::is_job_id(&job_id) {
            return Err(error::validation(format!("invalid job_id {}", job_id)));
        }

        job_submitter::Mediator {
            conn:        &mut conn,
            settings:    &state.settings,
            peer_client: &*state.peer_client,
            spawner:     &*state.spawner,
            job_id:      job_id.clone(),
            params,
            user_name:   user.name,
        }
        .run(&blocking_log)?;
        Ok(json!({"success": true, "job_id": job_id}))
    })
    .await
}

pub async fn rerun_job(
    req: HttpRequest,
    state: web::Data<State>,
    path: web::Path<String>,
) -> HttpResponse {
    let log = request_log(&req, &state);
    let token = auth::bearer_token(&req);
    let job_id = path.into_inner();
    let blocking_log = log.clone();

    run_blocking(log, move || {
        let mut conn = state.pool.get()?;
        let user = auth::authenticate(&mut conn, state.settings.secret.as_deref(), token.as_deref())?;
        auth::require_job_mutation_role(&user)?;
        auth::check_job_permission(&mut conn, &user, &job_id)?;

        job_rerunner::Mediator {
            conn:        &mut conn,
            settings:    &state.settings,
            peer_client: &*state.peer_client,
            spawner:     &*state.spawner,
            job_id,
        }
        .run(&blocking_log)?;
        Ok(json!({"success": true}))
    })
    .await
}

pub async fn cancel_job(
    req: HttpRequest,
    state: web::Data<State>,
    path: web::Path<String>,
) -> HttpResponse {
    let log = request_log(&req, &state);
    let token = auth::bearer_token(&req);
    let job_id = path.into_inner();
    let blocking_log = log.clone();

    run_blocking(log, move || {
        let mut conn = state.pool.get()?;
        let user = auth::authenticate(&mut conn, state.settings.secret.as_deref(), token.as_deref())?;
        auth::require_job_mutation_role(&user)?;
        auth::check_job_permission(&mut conn, &user, &job_id)?;

        job_canceler::Mediator {
            conn:        &mut conn,
            settings:    &state.settings,
            peer_client: &*state.peer_client,
            spawner:     &*state.spawner,
            job_id,
        }
        .run(&blocking_log)?;
        Ok(json!({"success": true}))
    })
    .await
}

pub async fn get_job(
    req: HttpRequest,
    state: web::Data<State>,
    path: web::Path<String>,
) -> HttpResponse {
    let log = request_log(&req, &state);
    let token = auth::bearer_token(&req);
    let job_id = path.into_inner();

    run_blocking(log, move || {
        let mut conn = state.pool.get()?;
        let user = auth::authenticate(&mut conn, state.settings.secret.as_deref(), token.as_deref())?;
        auth::check_job_permission(&mut conn, &user, &job_id)?;

        let job = queries::job_details(&mut conn, &job_id)?;
        Ok(json!({"success": true, "job": job}))
    })
    .await
}

pub async fn list_jobs(
    req: HttpRequest,
    state: web::Data<State>,
    query: web::Query<ListQuery>,
) -> HttpResponse {
    let log = request_log(&req, &state);
    let token = auth::bearer_token(&req);
    let query = query.into_inner();

    run_blocking(log, move || {
        let mut conn = state.pool.get()?;
        let user = auth::authenticate(&mut conn, state.settings.secret.as_deref(), token.as_deref())?;

        let status = match query.status {
            Some(ref token) => Some(Status::parse(token)?),
            None => None,
        };
        let hours = match query.hours {
            Some(ref raw) => Some(parse_positive(raw, "hours")?),
            None => None,
        };
        let limit = match query.limit {
            Some(ref raw) => parse_positive(raw, "limit")?,
            None => queries::DEFAULT_LIST_LIMIT,
        };

        let jobs = queries::list_jobs(&mut conn, &user.name, status, hours, limit)?;
        Ok(json!({"success": true, "jobs": jobs}))
    })
    .await
}

pub async fn update_task(
    req: HttpRequest,
    state: web::Data<State>,
    path: web::Path<(String, String)>,
    body: web::Json<UpdateTaskBody>,
) -> HttpResponse {
    let log = request_log(&req, &state);
    let token = auth::bearer_token(&req);
    let (job_id, task_name) = path.into_inner();
    let body = body.into_inner();
    let blocking_log = log.clone();

    run_blocking(log, move || {
        let mut conn = state.pool.get()?;
        let user = auth::authenticate(&mut conn, state.settings.secret.as_deref(), token.as_deref())?;
        auth::require_node(&user)?;

        task_updater::Mediator {
            conn:             &mut conn,
            settings:         &state.settings,
            peer_client:      &*state.peer_client,
            spawner:          &*state.spawner,
            job_id,
            task_name,
            task_status:      body.task_status,
            external_context: body.job_context,
            errors:           body.errors,
        }
        .run(&blocking_log)?;
        Ok(json!({"success": true}))
    })
    .await
}

//
// Public functions
//

/// The one place errors become HTTP: validation problems are 401,
/// permission problems 403, everything else a 500, always with the
/// `{success, error_message}` body shape.
pub fn error_response(error: &Error) -> HttpResponse {
    let status = match *error.kind() {
        ErrorKind::Validation(_) | ErrorKind::InvalidStatus(_) => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpResponse::build(status).json(json!({
        "success": false,
        "error_message": error.to_string(),
    }))
}

//
// Private functions
//

fn parse_positive(raw: &str, name: &str) -> Result<i64> {
    let value: i64 = raw
        .parse()
        .map_err(|_| error::validation(format!("{} must be a positive integer", name)))?;
    if value < 1 {
        return Err(error::validation(format!(
            "{} must be a positive integer",
            name
        )));
    }
    Ok(value)
}

fn request_log(req: &HttpRequest, state: &web::Data<State>) -> Logger {
    req.extensions()
        .get::<RequestLog>()
        .map(|request_log| request_log.0.clone())
        .unwrap_or_else(|| state.log.clone())
}

async fn run_blocking<F>(log: Logger, f: F) -> HttpResponse
where
    F: FnOnce() -> Result<Value> + Send + 'static,
{
    match web::block(f).await {
        Ok(Ok(body)) => HttpResponse::Ok().json(body),
        Ok(Err(ref e)) => {
            error!(log, "Request failed"; "error" => e.to_string());
            error_response(e)
        }
        Err(e) => {
            error!(log, "Blocking task panicked or was canceled"; "error" => e.to_string());
            HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error_message": "internal error",
            }))
        }
    }
}

//
// Tests
//
