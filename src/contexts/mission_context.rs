use crate::contexts::time_duration;
use crate::errors::*;
use crate::model::insertable;
use crate::store;

use chrono::{Duration, Utc};
use diesel::sqlite::SqliteConnection;

/// Cross-job state shared by every job of a mission, with per-entry TTL.
/// Operators use this for things like negotiated encryption keys that
/// outlive a single job but must not live forever.
pub struct MissionContext<'a> {
    conn:         &'a mut SqliteConnection,
    mission_name: String,
}

impl<'a> MissionContext<'a> {
    pub fn new(conn: &'a mut SqliteConnection, mission_name: &str) -> MissionContext<'a> {
        MissionContext {
            conn,
            mission_name: mission_name.to_owned(),
        }
    }

    /// An expired entry reads the same as a missing one.
    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        let record = match store::mission_context_find(self.conn, &self.mission_name, key)? {
            Some(record) => record,
            None => return Ok(None),
        };
        if record.expire_time < Utc::now().naive_utc() {
            return Ok(None);
        }
        Ok(Some(record.config_value))
    }

    pub fn set(&mut self, key: &str, value: &str, ttl_seconds: i64) -> Result<bool> {
        self.set_with_ttl(key, value, ttl_seconds)
    }

    pub fn set_default_ttl(&mut self, key: &str, value: &str) -> Result<bool> {
        self.set_with_ttl(key, value, time_duration::DAY)
    }

    //
    // Steps
    //

    /// Upserts the entry with a fresh expiry. Returns `false` when another
    /// writer got in between our read and write; whether to read again and
    /// retry is left to the caller.
    fn set_with_ttl(&mut self, key: &str, value: &str, ttl_seconds: i64) -> Result<bool> {
        let expire_time = Utc::now().naive_utc() + Duration::seconds(ttl_seconds);
        match store::mission_context_find(self.conn, &self.mission_name, key)? {
            None => {
                store::mission_context_insert(
                    self.conn,
                    &insertable::MissionContext {
                        mission_name: self.mission_name.clone(),
                        config_key: key.to_owned(),
                        config_value: value.to_owned(),
                        expire_time,
                    },
                )?;
                Ok(true)
            }
            Some(record) => {
                match store::mission_context_update(self.conn, &record, value, expire_time) {
                    Ok(()) => Ok(true),
                    Err(ref e) if e.is_stale_data() => Ok(false),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

//
// Tests
//
