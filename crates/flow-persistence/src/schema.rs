//! Esquema Diesel de las tablas master y child.

diesel::table! {
    master_flows (flow_id) {
        flow_id -> Uuid,
        flow_type -> Text,
        flow_name -> Text,
        flow_status -> Text,
        current_phase -> Text,
        progress_percentage -> Float8,
        configuration -> Jsonb,
        persistence_data -> Jsonb,
        flow_metadata -> Jsonb,
        client_account_id -> Uuid,
        engagement_id -> Uuid,
        created_by -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        revision -> Int8,
    }
}

diesel::table! {
    child_flows (flow_id) {
        flow_id -> Uuid,
        master_flow_id -> Nullable<Uuid>,
        flow_type -> Text,
        client_account_id -> Uuid,
        engagement_id -> Uuid,
        status -> Nullable<Text>,
        current_phase -> Nullable<Text>,
        progress_percentage -> Float8,
        data -> Jsonb,
        marked_for_deletion -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(master_flows, child_flows);
