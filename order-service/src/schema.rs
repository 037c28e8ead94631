diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        description -> Nullable<Text>,
        price -> Numeric,
        stock -> Int4,
        category -> Varchar,
        image_url -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

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
    cart_items (id) {
        id -> Uuid,
        user_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        total -> Numeric,
        status -> Varchar,
        customer_name -> Varchar,
        phone -> Varchar,
        address -> Varchar,
        city -> Varchar,
        district -> Nullable<Varchar>,
        ward -> Nullable<Varchar>,
        notes -> Nullable<Text>,
        idempotency_key -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        price -> Numeric,
    }
}

diesel::table! {
    checkout_sagas (id) {
        id -> Uuid,
        user_id -> Uuid,
        idempotency_key -> Varchar,
        steps -> Jsonb,
        current_step -> Int4,
        status -> Varchar,
        context -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(cart_items -> products (product_id));
diesel::joinable!(order_items -> products (product_id));
diesel::joinable!(order_items -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    products,
    profiles,
    user_roles,
    cart_items,
    orders,
    order_items,
    checkout_sagas,
    outbox_events,
);
