use crate::errors::*;
use crate::store;

use diesel::sqlite::SqliteConnection;
use std::collections::BTreeMap;

/// Read-only process-global configuration. Values are seeded at init time
/// and never mutated at runtime.
pub struct GlobalConfig<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> GlobalConfig<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> GlobalConfig<'a> {
        GlobalConfig { conn }
    }

    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(store::global_config_find(self.conn, key)?.map(|record| record.config_value))
    }

    /// Bulk lookup. Missing keys are present in the result with a `None`
    /// value so callers can distinguish "unset" without a second query.
    pub fn get_all(&mut self, keys: &[&str]) -> Result<BTreeMap<String, Option<String>>> {
        let mut ret = BTreeMap::new();
        for key in keys {
            let value = self.get(key)?;
            ret.insert((*key).to_owned(), value);
        }
        Ok(ret)
    }
}

//
// Tests
//
