//! Assembly of the HTTP server: routes, middleware, and the shared state
//! handed to every handler.

use crate::errors::*;
use crate::network::NetworkConfig;
use crate::peer_client::PeerClientLive;
use crate::settings::Settings;
use crate::web::endpoints;
use crate::web::middleware;
use crate::worker::WorkerSpawnerLive;

use actix_web::{web, App, HttpServer};
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sqlite::SqliteConnection;
use slog::Logger;

pub struct Server {
    pub log:            Logger,
    pub pool:           Pool<ConnectionManager<SqliteConnection>>,
    pub settings:       Settings,
    pub network_config: NetworkConfig,
    pub port:           String,
}

impl Server {
    pub fn run(&self) -> Result<()> {
        let host = format!("0.0.0.0:{}", self.port.as_str());
        info!(self.log, "API server starting";
            "host" => host.as_str(), "party" => self.settings.party.as_str());

        let state = web::Data::new(endpoints::State {
            log:         self.log.clone(),
            pool:        self.pool.clone(),
            settings:    self.settings.clone(),
            peer_client: Box::new(PeerClientLive::new(
                &self.network_config,
                self.settings.jwt_token.clone(),
            )?),
            spawner:     Box::new(WorkerSpawnerLive {}),
        });
        let log = self.log.clone();

        actix_web::rt::System::new()
            .block_on(async move {
                HttpServer::new(move || {
                    App::new()
                        .app_data(state.clone())
                        .wrap(middleware::RequestLogger { log: log.clone() })
                        .route("/", web::get().to(endpoints::index))
                        .route("/health", web::get().to(endpoints::health))
                        .route("/api/v1/jobs", web::post().to(endpoints::submit_job))
                        .route("/api/v1/jobs", web::get().to(endpoints::list_jobs))
                        .route("/api/v1/jobs/{job_id}", web::get().to(endpoints::get_job))
                        .route(
                            "/api/v1/jobs/{job_id}/rerun",
                            web::post().to(endpoints::rerun_job),
                        )
                        .route(
                            "/api/v1/jobs/{job_id}/cancel",
                            web::post().to(endpoints::cancel_job),
                        )
                        .route(
                            "/api/v1/tasks/{job_id}/{task_name}",
                            web::patch().to(endpoints::update_task),
                        )
                })
                .bind(host)?
                .run()
                .await
            })
            .chain_err(|| "API server failed")
    }
}
