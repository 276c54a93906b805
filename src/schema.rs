table! {
    jobmesh_global_config (id) {
        id -> BigInt,
        config_key -> Text,
        config_value -> Text,
        create_time -> Timestamp,
        update_time -> Timestamp,
    }
}

table! {
    jobmesh_mission (id) {
        id -> BigInt,
        name -> Text,
        version -> Integer,
        dag -> Text,
        create_time -> Timestamp,
        update_time -> Timestamp,
    }
}

table! {
    jobmesh_mission_context (id) {
        id -> BigInt,
        mission_name -> Text,
        config_key -> Text,
        config_value -> Text,
        expire_time -> Timestamp,
        create_time -> Timestamp,
        update_time -> Timestamp,
        version_id -> Integer,
    }
}

table! {
    jobmesh_job (id) {
        id -> BigInt,
        job_id -> Text,
        mission_name -> Text,
        mission_version -> Integer,
        job_context -> Text,
        main_party -> Text,
        join_parties -> Text,
        main_host -> Nullable<Text>,
        status -> Text,
        user_name -> Text,
        create_time -> Timestamp,
        update_time -> Timestamp,
        version_id -> Integer,
    }
}

table! {
    jobmesh_task (id) {
        id -> BigInt,
        job_id -> Text,
        name -> Text,
        party -> Text,
        args -> Nullable<Text>,
        status -> Text,
        start_time -> Nullable<Timestamp>,
        end_time -> Nullable<Timestamp>,
        errors -> Nullable<Text>,
        create_time -> Timestamp,
        update_time -> Timestamp,
        version_id -> Integer,
    }
}

table! {
    jobmesh_user (id) {
        id -> BigInt,
        name -> Text,
        status -> Text,
        role -> Text,
        create_time -> Timestamp,
        update_time -> Timestamp,
    }
}

allow_tables_to_appear_in_same_query!(
    jobmesh_global_config,
    jobmesh_job,
    jobmesh_mission,
    jobmesh_mission_context,
    jobmesh_task,
    jobmesh_user,
);
