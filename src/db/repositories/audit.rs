use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use crate::entities::audit_events;

pub struct AuditRepository {
    conn: DatabaseConnection,
}

impl AuditRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn add(
        &self,
        category: &str,
        actor: &str,
        user_id: Option<i32>,
        message: &str,
        details: Option<String>,
    ) -> Result<()> {
        audit_events::ActiveModel {
            category: Set(category.to_string()),
            actor: Set(actor.to_string()),
            user_id: Set(user_id),
            message: Set(message.to_string()),
            details: Set(details),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert audit event")?;

        Ok(())
    }

    pub async fn list_recent(
        &self,
        limit: u64,
        category_filter: Option<String>,
    ) -> Result<Vec<audit_events::Model>> {
        let mut query = audit_events::Entity::find()
            .order_by_desc(audit_events::Column::CreatedAt)
            .limit(limit);

        if let Some(category) = category_filter {
            query = query.filter(audit_events::Column::Category.eq(category));
        }

        query.all(&self.conn).await.context("Failed to list audit events")
    }
}
