use crate::errors::*;
use crate::merge::deep_merge;
use crate::store;

use diesel::sqlite::SqliteConnection;
use serde_json::{Map, Value};

/// Accessor over the JSON document in `Job.job_context`. The document is
/// partitioned by party plus a shared `"common"` section; keys below that
/// are opaque to the framework and addressed with dotted paths.
///
/// Writes are read-merge-write under the job row's optimistic lock, so
/// concurrent updaters from different tasks serialize per job.
pub struct JobContext<'a> {
    conn:   &'a mut SqliteConnection,
    job_id: String,
    party:  String,
}

impl<'a> JobContext<'a> {
    pub fn new(conn: &'a mut SqliteConnection, job_id: &str, party: &str) -> JobContext<'a> {
        JobContext {
            conn,
            job_id: job_id.to_owned(),
            party: party.to_owned(),
        }
    }

    /// Resolves a dotted path. With an explicit party only that party's
    /// subtree is searched; otherwise this party's subtree first, then
    /// `"common"`. The first subtree resolving the full path wins.
    pub fn get(&mut self, key: &str, party: Option<&str>) -> Result<Option<Value>> {
        let context = self.get_all()?;
        let search_domain: Vec<&str> = match party {
            Some(p) => vec![p],
            None => vec![self.party.as_str(), "common"],
        };
        for domain in search_domain {
            let subtree = match context.get(domain) {
                Some(subtree) => subtree,
                None => continue,
            };
            if let Some(found) = resolve_path(subtree, key) {
                return Ok(Some(found.clone()));
            }
        }
        Ok(None)
    }

    /// Sets a dotted path inside a party's subtree by deep-merging a nested
    /// one-key-per-level object into the document. Returns `false` when the
    /// retry budget is exhausted on version conflicts.
    pub fn set(&mut self, key: &str, value: &Value, party: &str, max_retry: u32) -> Result<bool> {
        let mut nested = value.clone();
        for part in key.split('.').rev() {
            let mut wrapper = Map::new();
            wrapper.insert(part.to_owned(), nested);
            nested = Value::Object(wrapper);
        }
        let update = party_update(party, nested);

        for _ in 0..max_retry {
            match self.merge_once(&update, party) {
                Ok(()) => return Ok(true),
                Err(ref e) if e.is_stale_data() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Merges a flat mapping into a party's subtree. Dots are the path
    /// separator everywhere else, so keys containing them are rejected.
    pub fn set_all(
        &mut self,
        configs: &Map<String, Value>,
        party: &str,
        max_retry: u32,
    ) -> Result<bool> {
        for key in configs.keys() {
            if key.contains('.') {
                return Err(error::validation(format!(
                    "unexpected special character '.' in key {}",
                    key
                )));
            }
        }
        let update = party_update(party, Value::Object(configs.clone()));

        for _ in 0..max_retry {
            match self.merge_once(&update, party) {
                Ok(()) => return Ok(true),
                Err(ref e) if e.is_stale_data() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    pub fn get_all(&mut self) -> Result<Value> {
        let job = store::job_require(self.conn, &self.job_id)?;
        job.parsed_context()
    }

    //
    // Steps
    //

    fn merge_once(&mut self, update: &Value, party: &str) -> Result<()> {
        let job = store::job_require(self.conn, &self.job_id)?;
        let mut context = job.parsed_context()?;
        match context.get(party) {
            Some(subtree) if subtree.is_object() => (),
            Some(_) => {
                return Err(error::validation(format!(
                    "job_context[{}] is not an object",
                    party
                )))
            }
            None => return Err(error::not_found(format!("party {} in job context", party))),
        }
        deep_merge(&mut context, update);
        store::job_update_context(self.conn, &job, &context)
    }
}

//
// Private functions
//

fn party_update(party: &str, subtree: Value) -> Value {
    let mut update = Map::new();
    update.insert(party.to_owned(), subtree);
    Value::Object(update)
}

fn resolve_path<'v>(subtree: &'v Value, key: &str) -> Option<&'v Value> {
    let mut target = subtree;
    for part in key.split('.') {
        target = target.as_object()?.get(part)?;
    }
    Some(target)
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::contexts::JobContext;
    use crate::test_data;
    use crate::test_helpers;

    #[test]
    fn test_job_context_set_get() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);
        let mut context = JobContext::new(&mut conn, &job.job_id, "party_a");

        assert!(context
            .set("a.b.c", &json!({"d": "123"}), "common", 3)
            .unwrap());
        assert_eq!(Some(json!("123")), context.get("a.b.c.d", None).unwrap());

        // The same path scoped to the party's own subtree resolves nothing:
        // the write went to common.
        assert_eq!(None, context.get("a.b.c.d", Some("party_a")).unwrap());
    }

    #[test]
    fn test_job_context_search_order() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);
        let mut context = JobContext::new(&mut conn, &job.job_id, "party_a");

        context.set("table", &json!("common_t"), "common", 3).unwrap();
        assert_eq!(Some(json!("common_t")), context.get("table", None).unwrap());

        // The party subtree shadows common for the unscoped lookup.
        context.set("table", &json!("party_t"), "party_a", 3).unwrap();
        assert_eq!(Some(json!("party_t")), context.get("table", None).unwrap());

        // Another party's subtree is never consulted implicitly.
        context.set("only_b", &json!(1), "party_b", 3).unwrap();
        assert_eq!(None, context.get("only_b", None).unwrap());
        assert_eq!(Some(json!(1)), context.get("only_b", Some("party_b")).unwrap());
    }

    #[test]
    fn test_job_context_set_unknown_party() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);
        let mut context = JobContext::new(&mut conn, &job.job_id, "party_a");

        let res = context.set("k", &json!(1), "party_zz", 3);
        assert!(res.is_err());
    }

    #[test]
    fn test_job_context_set_all() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);
        let mut context = JobContext::new(&mut conn, &job.job_id, "party_a");

        let mut configs = serde_json::Map::new();
        configs.insert("out".to_owned(), json!("t1"));
        configs.insert("rows".to_owned(), json!(10));
        assert!(context.set_all(&configs, "party_a", 3).unwrap());
        assert_eq!(Some(json!("t1")), context.get("out", None).unwrap());
        assert_eq!(Some(json!(10)), context.get("rows", None).unwrap());

        let mut bad = serde_json::Map::new();
        bad.insert("a.b".to_owned(), json!(1));
        assert!(context.set_all(&bad, "party_a", 3).is_err());
    }

    #[test]
    fn test_job_context_get_all() {
        let mut conn = test_helpers::connection();
        let job = test_data::job::insert(&mut conn);
        let mut context = JobContext::new(&mut conn, &job.job_id, "party_a");

        let document = context.get_all().unwrap();
        assert!(document.get("common").is_some());
        assert!(document.get("party_a").is_some());
        assert!(document.get("party_b").is_some());
        assert_eq!(
            Some(&json!(job.job_id)),
            document.get("common").and_then(|c| c.get("job_id"))
        );
    }
}
