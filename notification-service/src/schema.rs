diesel::table! {
    profiles (id) {
        id -> Uuid,
        email -> Nullable<Varchar>,
        full_name -> Nullable<Varchar>,
    }
}

diesel::table! {
    user_roles (user_id, role) {
        user_id -> Uuid,
        role -> Varchar,
    }
}

diesel::table! {
    processed_notifications (order_id) {
        order_id -> Uuid,
        recipients -> Int4,
        processed_at -> Timestamptz,
    }
}

diesel::joinable!(user_roles -> profiles (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    profiles,
    user_roles,
    processed_notifications,
);
