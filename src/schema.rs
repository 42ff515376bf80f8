diesel::table! {
    sessions (id) {
        id -> Int4,
        year -> Int4,
        round_number -> Int4,
        session_type -> Varchar,
        fps -> Int4,
        event_name -> Varchar,
        event_date -> Date,
        total_laps -> Int4,
        driver_colors -> Jsonb,
        track_statuses -> Jsonb,
        degraded -> Bool,
        failed_drivers -> Jsonb,
    }
}

diesel::table! {
    frames (id) {
        id -> Int4,
        session_id -> Int4,
        frame_index -> Int4,
        time -> Float8,
        payload -> Jsonb,
    }
}

diesel::joinable!(frames -> sessions (session_id));

diesel::allow_tables_to_appear_in_same_query!(sessions, frames,);
