use crate::settings::{NetworkScheme, Settings};
use crate::store;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use slog::{Drain, Logger};

/// A fresh in-memory database with all migrations applied. Each call is a
/// fully isolated store; use `shared_db` when more than one connection must
/// see the same data.
pub fn connection() -> SqliteConnection {
    let mut conn = SqliteConnection::establish(":memory:").unwrap();
    store::run_migrations(&mut conn).unwrap();
    conn
}

/// An on-disk scratch database for tests exercising the multi-connection
/// reality of the platform (scheduler and executor hold separate
/// connections).
pub struct SharedDb {
    pub url: String,

    // Held so the backing directory outlives the connections.
    _dir: tempfile::TempDir,
}

impl SharedDb {
    pub fn connect(&self) -> SqliteConnection {
        let mut conn = SqliteConnection::establish(&self.url).unwrap();
        store::configure_connection(&mut conn).unwrap();
        conn
    }
}

pub fn shared_db() -> SharedDb {
    let dir = tempfile::tempdir().unwrap();
    let url = dir
        .path()
        .join("jobmesh_test.db")
        .to_string_lossy()
        .into_owned();
    let db = SharedDb { url, _dir: dir };
    let mut conn = db.connect();
    store::run_migrations(&mut conn).unwrap();
    db
}

pub fn log() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build();
    let drain = std::sync::Mutex::new(drain).fuse();
    Logger::root(drain, o!("env" => "test"))
}

/// Settings for a node of the given party, pointed at nothing real.
pub fn settings(party: &str) -> Settings {
    Settings {
        db_uri:           ":memory:".to_owned(),
        party:            party.to_owned(),
        config_file:      "parties/party.json".to_owned(),
        safe_work_dir:    "./data".to_owned(),
        network_scheme:   NetworkScheme::Agent,
        port_lower_bound: 49152,
        port_upper_bound: 65535,
        max_job_limit:    10,
        secret:           Some("test-secret".to_owned()),
        jwt_token:        Some("test-jwt-token".to_owned()),
        mission_dir:      "missions".to_owned(),
    }
}
