//! Diesel table definitions mirroring the post-migration schema, §3
//! and §6 "Database schema".

diesel::table! {
    use diesel::sql_types::*;

    project (project_id) {
        project_id -> BigInt,
        slug -> Varchar,
        project_slug -> Nullable<Varchar>,
        latest_event_date -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    event (event_id, project_id) {
        event_id -> Uuid,
        project_id -> BigInt,
        status -> Varchar,
        created_date -> Timestamptz,
        execution_date -> Timestamptz,
        event_date -> Timestamptz,
        batch_date -> Timestamptz,
        event_body -> Jsonb,
        message -> Nullable<Text>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    event_payload (event_id, project_id) {
        event_id -> Uuid,
        project_id -> BigInt,
        payload -> Bytea,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    status_processing_time (event_id, project_id, status) {
        event_id -> Uuid,
        project_id -> BigInt,
        status -> Varchar,
        processing_time_ms -> BigInt,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    subscriber (delivery_id) {
        delivery_id -> Uuid,
        delivery_url -> Varchar,
        source_url -> Varchar,
        capacity -> Nullable<Integer>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    event_delivery (delivery_id) {
        event_id -> Nullable<Uuid>,
        project_id -> BigInt,
        event_type_id -> Nullable<Varchar>,
        delivery_id -> Uuid,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    subscription_category_sync_time (project_id, category_name) {
        project_id -> BigInt,
        category_name -> Varchar,
        last_synced -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    clean_up_events_queue (slug) {
        slug -> Varchar,
        date -> Timestamptz,
        project_id -> BigInt,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    status_change_events_queue (id) {
        id -> BigInt,
        project_id -> BigInt,
        payload -> Jsonb,
        enqueued_at -> Timestamptz,
    }
}

diesel::joinable!(event -> project (project_id));
diesel::joinable!(event_payload -> project (project_id));
diesel::joinable!(event_delivery -> subscriber (delivery_id));

diesel::allow_tables_to_appear_in_same_query!(
    project,
    event,
    event_payload,
    status_processing_time,
    subscriber,
    event_delivery,
    subscription_category_sync_time,
    clean_up_events_queue,
    status_change_events_queue,
);
