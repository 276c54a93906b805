//! Insert helpers for test fixtures. Everything here goes through the same
//! insertable models as production code.

pub mod global_config {
    use crate::model::insertable;
    use crate::store;

    use diesel::sqlite::SqliteConnection;

    pub fn insert(conn: &mut SqliteConnection, key: &str, value: &str) {
        store::global_config_insert_if_absent(
            conn,
            &insertable::GlobalConfig {
                config_key:   key.to_owned(),
                config_value: value.to_owned(),
            },
        )
        .unwrap();
    }
}

pub mod user {
    use crate::model::{self, insertable};
    use crate::store;

    use diesel::sqlite::SqliteConnection;

    pub fn insert(conn: &mut SqliteConnection, name: &str, role: &str) -> model::User {
        insert_with_status(conn, name, role, "Normal")
    }

    pub fn insert_with_status(
        conn: &mut SqliteConnection,
        name: &str,
        role: &str,
        status: &str,
    ) -> model::User {
        store::user_insert_if_absent(
            conn,
            &insertable::User {
                name:   name.to_owned(),
                status: status.to_owned(),
                role:   role.to_owned(),
            },
        )
        .unwrap();
        store::user_find(conn, name).unwrap().unwrap()
    }
}

pub mod mission {
    use crate::model::{self, insertable};
    use crate::store;

    use diesel::sqlite::SqliteConnection;
    use serde_json::Value;

    /// Identifier for one of the canned mission shapes below.
    pub type Template = &'static str;

    /// psi_a at party_a feeding psi_b at party_b; the standard two-party
    /// happy-path fixture.
    pub const TWO_PARTY_PSI: Template = "psi";

    /// A single party_a task that publishes outputs into the job context.
    pub const CONTEXT_WRITER: Template = "context_writer";

    /// A single party_a task that always fails.
    pub const ALWAYS_FAIL: Template = "always_fail";

    pub fn insert(conn: &mut SqliteConnection) -> model::Mission {
        insert_template(conn, TWO_PARTY_PSI)
    }

    pub fn insert_template(conn: &mut SqliteConnection, template: Template) -> model::Mission {
        store::mission_insert_if_absent(
            conn,
            &insertable::Mission {
                name:    template.to_owned(),
                version: 1,
                dag:     serde_json::to_string(&dag_document(template)).unwrap(),
            },
        )
        .unwrap();
        store::mission_find(conn, template, Some(1)).unwrap().unwrap()
    }

    pub fn insert_versions(conn: &mut SqliteConnection, name: &str, versions: &[i32]) {
        for version in versions {
            store::mission_insert_if_absent(
                conn,
                &insertable::Mission {
                    name:    name.to_owned(),
                    version: *version,
                    dag:     serde_json::to_string(&dag_document(TWO_PARTY_PSI)).unwrap(),
                },
            )
            .unwrap();
        }
    }

    pub fn dag_document(template: Template) -> Value {
        match template {
            TWO_PARTY_PSI => json!({
                "meta": {"name": "psi", "version": 1},
                "operators": [
                    {
                        "name": "psi_a",
                        "party": "party_a",
                        "class": "NoOp",
                        "class_path": "operators.builtin",
                        "depends": [],
                    },
                    {
                        "name": "psi_b",
                        "party": "party_b",
                        "class": "NoOp",
                        "class_path": "operators.builtin",
                        "depends": ["psi_a"],
                    },
                ],
            }),
            CONTEXT_WRITER => json!({
                "meta": {"name": "context_writer", "version": 1},
                "operators": [
                    {
                        "name": "write_out",
                        "party": "party_a",
                        "class": "ContextWriter",
                        "class_path": "operators.builtin",
                        "args": {"outputs": {"result_table": "t_out"}},
                        "depends": [],
                    },
                ],
            }),
            ALWAYS_FAIL => json!({
                "meta": {"name": "always_fail", "version": 1},
                "operators": [
                    {
                        "name": "doomed",
                        "party": "party_a",
                        "class": "AlwaysFail",
                        "class_path": "operators.builtin",
                        "args": {"message": "deliberately broken"},
                        "depends": [],
                    },
                ],
            }),
            _ => panic!("unknown mission template {}", template),
        }
    }
}

pub mod job {
    use crate::ids;
    use crate::model::{self, insertable, Status};
    use crate::store;
    use crate::test_data::mission;

    use diesel::sqlite::SqliteConnection;

    /// A RUNNING two-party job with both tasks INIT, owned by `user_0`.
    pub fn insert(conn: &mut SqliteConnection) -> model::Job {
        let job_id = insert_for_mission(conn, mission::TWO_PARTY_PSI);
        store::job_require(conn, &job_id).unwrap()
    }

    /// Inserts the mission template plus a RUNNING job instance of it, with
    /// one INIT task per operator, and returns the job id.
    pub fn insert_for_mission(
        conn: &mut SqliteConnection,
        template: mission::Template,
    ) -> String {
        let inserted = mission::insert_template(conn, template);
        let document = inserted.dag_document().unwrap();
        let join_parties = document.join_parties();
        let job_id = ids::generate_job_id();

        let mut context = json!({
            "common": {"__user_input": {}, "job_id": job_id},
        });
        for party in &join_parties {
            context[party] = json!({});
        }

        let job_ins = insertable::Job {
            job_id:          job_id.clone(),
            mission_name:    inserted.name.clone(),
            mission_version: inserted.version,
            job_context:     serde_json::to_string(&context).unwrap(),
            main_party:      "party_a".to_owned(),
            join_parties:    serde_json::to_string(&join_parties).unwrap(),
            status:          Status::Running.as_str().to_owned(),
            user_name:       "user_0".to_owned(),
        };
        let task_ins: Vec<insertable::Task> = document
            .operators
            .iter()
            .map(|operator| insertable::Task {
                job_id: job_id.clone(),
                name:   operator.name.clone(),
                party:  operator.party.clone(),
                args:   operator
                    .args
                    .as_ref()
                    .map(|args| serde_json::to_string(args).unwrap()),
                status: Status::Init.as_str().to_owned(),
            })
            .collect();
        store::job_insert_with_tasks(conn, &job_ins, &task_ins).unwrap();
        job_id
    }
}
