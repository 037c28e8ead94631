use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// Who to notify, and which orders were already announced.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn admin_emails(&self) -> Result<Vec<String>>;
    async fn is_processed(&self, order_id: Uuid) -> Result<bool>;
    async fn mark_processed(&self, order_id: Uuid, recipients: usize) -> Result<()>;
}

pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationLedger for PgLedger {
    async fn admin_emails(&self) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;

        let emails: Vec<Option<String>> = user_roles::table
            .inner_join(profiles::table)
            .filter(user_roles::role.eq("admin"))
            .filter(profiles::email.is_not_null())
            .select(profiles::email)
            .distinct()
            .load(&mut conn)
            .await?;

        Ok(emails.into_iter().flatten().collect())
    }

    async fn is_processed(&self, order_id: Uuid) -> Result<bool> {
        let mut conn = self.pool.get().await?;

        let existing = processed_notifications::table
            .find(order_id)
            .select(ProcessedNotification::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(existing.is_some())
    }

    async fn mark_processed(&self, order_id: Uuid, recipients: usize) -> Result<()> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(processed_notifications::table)
            .values(&NewProcessedNotification {
                order_id,
                recipients: i32::try_from(recipients)?,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
