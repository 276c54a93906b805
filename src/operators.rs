//! The operator registry. The platform loads operator implementations by
//! `(class_path, class_name)` as declared in mission templates; entries
//! register here at compile time, which makes the available set a
//! compile-time fact instead of a runtime import.
//!
//! Real privacy-computation operators ship out of tree. The built-ins below
//! are the scaffolding set: enough to wire missions end to end and to
//! exercise the context machinery the way real operators do.

use crate::contexts::ConfigManager;
use crate::errors::*;

use serde_json::{Map, Value};
use slog::Logger;

//
// Public types
//

/// What an operator runs against: the party it executes for, its resolved
/// arguments, and the context accessors for reading inputs and publishing
/// results.
pub struct Harness<'a> {
    pub party:          String,
    pub args:           Map<String, Value>,
    pub config_manager: &'a mut ConfigManager,
}

pub trait Operator {
    /// Executes the operator against an assembled configmap. `Ok(false)`
    /// is a clean "didn't work" (task FAILED without errors); `Err` is a
    /// failure with a captured message.
    fn run(&self, log: &Logger, harness: &mut Harness, configmap: &Value) -> Result<bool>;
}

//
// Public functions
//

pub fn lookup(class_path: &str, class_name: &str) -> Option<Box<dyn Operator>> {
    match (class_path, class_name) {
        (builtin::CLASS_PATH, builtin::no_op::CLASS_NAME) => {
            Some(Box::new(builtin::no_op::NoOp {}))
        }
        (builtin::CLASS_PATH, builtin::context_writer::CLASS_NAME) => {
            Some(Box::new(builtin::context_writer::ContextWriter {}))
        }
        (builtin::CLASS_PATH, builtin::always_fail::CLASS_NAME) => {
            Some(Box::new(builtin::always_fail::AlwaysFail {}))
        }
        _ => None,
    }
}

pub mod builtin {
    pub const CLASS_PATH: &str = "operators.builtin";

    pub mod no_op {
        use crate::errors::*;
        use crate::operators::Harness;

        use serde_json::Value;
        use slog::Logger;

        pub const CLASS_NAME: &str = "NoOp";

        pub struct NoOp {}

        impl crate::operators::Operator for NoOp {
            fn run(&self, log: &Logger, harness: &mut Harness, _configmap: &Value) -> Result<bool> {
                info!(log, "No-op operator"; "party" => harness.party.as_str());
                Ok(true)
            }
        }

    }

    pub mod context_writer {
        use crate::errors::*;
        use crate::operators::Harness;

        use serde_json::Value;
        use slog::Logger;

        pub const CLASS_NAME: &str = "ContextWriter";

        /// Publishes its `outputs` argument (a flat object) into the
        /// running party's job context subtree.
        pub struct ContextWriter {}

        impl crate::operators::Operator for ContextWriter {
            fn run(&self, log: &Logger, harness: &mut Harness, _configmap: &Value) -> Result<bool> {
                let outputs = match harness.args.get("outputs") {
                    Some(Value::Object(outputs)) => outputs.clone(),
                    _ => return Err(error::validation("outputs arg must be an object")),
                };
                info!(log, "Writing outputs into job context";
                    "party" => harness.party.as_str(), "num_outputs" => outputs.len());
                let party = harness.party.clone();
                let written = harness
                    .config_manager
                    .job_context()
                    .set_all(&outputs, &party, 3)?;
                Ok(written)
            }
        }

        #[cfg(test)]
        mod tests {
            use crate::operators::builtin::context_writer::*;
            use crate::operators::{Harness, Operator};
            use crate::test_data;
            use crate::test_helpers;

            #[test]
            fn test_operator_context_writer_run() {
                let mut conn = test_helpers::connection();
                let job = test_data::job::insert(&mut conn);
                let mut manager =
                    crate::contexts::ConfigManager::new(conn, "psi", &job.job_id, "party_a");

                let mut args = serde_json::Map::new();
                args.insert("outputs".to_owned(), json!({"result_table": "t_out"}));
                let mut harness = Harness {
                    party:          "party_a".to_owned(),
                    args,
                    config_manager: &mut manager,
                };
                let ok = ContextWriter {}
                    .run(&test_helpers::log(), &mut harness, &json!({}))
                    .unwrap();
                assert!(ok);
                assert_eq!(
                    Some(json!("t_out")),
                    manager.job_context().get("result_table", None).unwrap()
                );
            }

            #[test]
            fn test_operator_context_writer_rejects_non_object() {
                let conn = test_helpers::connection();
                let mut manager = crate::contexts::ConfigManager::new(conn, "psi", "j_x", "party_a");
                let mut args = serde_json::Map::new();
                args.insert("outputs".to_owned(), json!("not an object"));
                let mut harness = Harness {
                    party:          "party_a".to_owned(),
                    args,
                    config_manager: &mut manager,
                };
                assert!(ContextWriter {}
                    .run(&test_helpers::log(), &mut harness, &json!({}))
                    .is_err());
            }
        }
    }

    pub mod always_fail {
        use crate::errors::*;
        use crate::operators::Harness;

        use serde_json::Value;
        use slog::Logger;

        pub const CLASS_NAME: &str = "AlwaysFail";

        /// Fails with a configurable message. Exists to exercise the
        /// failure-reporting path end to end.
        pub struct AlwaysFail {}

        impl crate::operators::Operator for AlwaysFail {
            fn run(&self, _log: &Logger, harness: &mut Harness, _configmap: &Value) -> Result<bool> {
                let message = harness
                    .args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("always_fail operator failed");
                Err(error::validation(message))
            }
        }
    }
}

//
// Tests
//

#[cfg(test)]
mod tests {
    use crate::operators::*;

    #[test]
    fn test_operators_lookup() {
        assert!(lookup("operators.builtin", "NoOp").is_some());
        assert!(lookup("operators.builtin", "ContextWriter").is_some());
        assert!(lookup("operators.builtin", "AlwaysFail").is_some());
        assert!(lookup("operators.builtin", "Mystery").is_none());
        assert!(lookup("operators.external", "NoOp").is_none());
    }
}
