use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};

use crate::entities::sessions;

pub struct SessionRepository {
    conn: DatabaseConnection,
}

impl SessionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Create a live session for a fresh login or confirmation.
    pub async fn create(
        &self,
        user_id: i32,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<sessions::Model> {
        let now = Utc::now();

        sessions::ActiveModel {
            user_id: Set(user_id),
            ip_address: Set(ip_address.to_string()),
            user_agent: Set(user_agent.to_string()),
            active: Set(true),
            remember_token: Set(None),
            remember_created_at: Set(None),
            last_activity_at: Set(Some(now)),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert session")
    }

    /// Only live sessions resolve; a terminated one looks like a missing one.
    pub async fn find_active(&self, id: i32) -> Result<Option<sessions::Model>> {
        sessions::Entity::find_by_id(id)
            .filter(sessions::Column::Active.eq(true))
            .one(&self.conn)
            .await
            .context("Failed to query session by ID")
    }

    pub async fn find_active_by_remember_token(
        &self,
        token: &str,
    ) -> Result<Option<sessions::Model>> {
        sessions::Entity::find()
            .filter(sessions::Column::RememberToken.eq(token))
            .filter(sessions::Column::Active.eq(true))
            .one(&self.conn)
            .await
            .context("Failed to query session by remember token")
    }

    /// Idempotent: flips `active` off and clears the remember token. A second
    /// call finds nothing left to change and is a no-op.
    pub async fn terminate(&self, id: i32) -> Result<()> {
        let Some(session) = sessions::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query session for termination")?
        else {
            return Ok(());
        };

        if !session.active && session.remember_token.is_none() {
            return Ok(());
        }

        let mut active: sessions::ActiveModel = session.into();
        active.active = Set(false);
        active.remember_token = Set(None);
        active.remember_created_at = Set(None);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn list_active_for_user(&self, user_id: i32) -> Result<Vec<sessions::Model>> {
        sessions::Entity::find()
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::Active.eq(true))
            .order_by_desc(sessions::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to list active sessions")
    }

    /// Raw `DbErr` so the caller can distinguish a unique-constraint collision
    /// (retried during token issuance) from other storage failures.
    pub async fn set_remember_token(
        &self,
        id: i32,
        token: &str,
        issued_at: DateTime<Utc>,
    ) -> std::result::Result<(), DbErr> {
        let Some(session) = sessions::Entity::find_by_id(id).one(&self.conn).await? else {
            return Err(DbErr::RecordNotFound(format!("session {id}")));
        };

        let mut active: sessions::ActiveModel = session.into();
        active.remember_token = Set(Some(token.to_string()));
        active.remember_created_at = Set(Some(issued_at));
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn clear_remember_token(&self, id: i32) -> Result<()> {
        let Some(session) = sessions::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query session for token clear")?
        else {
            return Ok(());
        };

        let mut active: sessions::ActiveModel = session.into();
        active.remember_token = Set(None);
        active.remember_created_at = Set(None);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn touch_last_activity(&self, id: i32, now: DateTime<Utc>) -> Result<()> {
        let Some(session) = sessions::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query session for activity touch")?
        else {
            return Ok(());
        };

        let mut active: sessions::ActiveModel = session.into();
        active.last_activity_at = Set(Some(now));
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Bulk termination for "sign out everywhere else". Returns how many
    /// sessions were closed.
    pub async fn terminate_all_for_user_except(
        &self,
        user_id: i32,
        keep_id: i32,
    ) -> Result<u64> {
        let others = sessions::Entity::find()
            .filter(sessions::Column::UserId.eq(user_id))
            .filter(sessions::Column::Active.eq(true))
            .filter(sessions::Column::Id.ne(keep_id))
            .all(&self.conn)
            .await
            .context("Failed to list sessions for bulk termination")?;

        let count = others.len() as u64;
        for session in others {
            let mut active: sessions::ActiveModel = session.into();
            active.active = Set(false);
            active.remember_token = Set(None);
            active.remember_created_at = Set(None);
            active.update(&self.conn).await?;
        }

        Ok(count)
    }
}
