//! Scoped key/value accessors layered over the store: process-global
//! configuration, per-mission shared state with TTL, and the per-job JSON
//! context document. Operator code receives all three bundled in a
//! `ConfigManager`.

mod global_config;
mod job_context;
mod mission_context;

pub use self::global_config::GlobalConfig;
pub use self::job_context::JobContext;
pub use self::mission_context::MissionContext;

use crate::errors::*;
use crate::settings::Settings;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Common TTLs, in seconds.
pub mod time_duration {
    pub const SECOND: i64 = 1;
    pub const MINUTE: i64 = 60 * SECOND;
    pub const HOUR: i64 = 60 * MINUTE;
    pub const DAY: i64 = 24 * HOUR;
    pub const WEEK: i64 = 7 * DAY;
}

/// The bundle of context accessors handed to operator code. Owns its own
/// database connection so an operator's reads and writes are independent of
/// whatever the scheduler is doing on its connection.
pub struct ConfigManager {
    conn:             SqliteConnection,
    pub mission_name: String,
    pub job_id:       String,
    pub party:        String,
}

impl ConfigManager {
    pub fn connect(settings: &Settings, mission_name: &str, job_id: &str) -> Result<ConfigManager> {
        let conn = SqliteConnection::establish(&settings.db_uri)
            .chain_err(|| format!("Error connecting to database at {}", settings.db_uri))?;
        Ok(Self::new(conn, mission_name, job_id, &settings.party))
    }

    pub fn new(
        conn: SqliteConnection,
        mission_name: &str,
        job_id: &str,
        party: &str,
    ) -> ConfigManager {
        ConfigManager {
            conn,
            mission_name: mission_name.to_owned(),
            job_id: job_id.to_owned(),
            party: party.to_owned(),
        }
    }

    pub fn global_config(&mut self) -> GlobalConfig {
        GlobalConfig::new(&mut self.conn)
    }

    pub fn mission_context(&mut self) -> MissionContext {
        MissionContext::new(&mut self.conn, &self.mission_name)
    }

    pub fn job_context(&mut self) -> JobContext {
        JobContext::new(&mut self.conn, &self.job_id, &self.party)
    }
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::contexts::*;
    use crate::test_data;
    use crate::test_helpers;

    #[test]
    fn test_contexts_config_manager() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);
        test_data::global_config::insert(&mut conn, "party", "party_a");

        let mut manager = ConfigManager::new(conn, "psi", &job.job_id, "party_a");

        let party = manager.global_config().get("party").unwrap();
        assert_eq!(Some("party_a".to_owned()), party);

        assert!(manager
            .job_context()
            .set("output_table", &json!("t_out"), "party_a", 3)
            .unwrap());
        let value = manager.job_context().get("output_table", None).unwrap();
        assert_eq!(Some(json!("t_out")), value);
    }
}
