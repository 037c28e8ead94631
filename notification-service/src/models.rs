use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::processed_notifications)]
pub struct ProcessedNotification {
    pub order_id: Uuid,
    pub recipients: i32,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_notifications)]
pub struct NewProcessedNotification {
    pub order_id: Uuid,
    pub recipients: i32,
}
