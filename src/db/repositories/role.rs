use anyhow::{Context, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect, Set,
};

use crate::entities::{roles, user_roles};

pub struct RoleRepository {
    conn: DatabaseConnection,
}

impl RoleRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<roles::Model>> {
        roles::Entity::find()
            .filter(roles::Column::Name.eq(name))
            .one(&self.conn)
            .await
            .context("Failed to query role by name")
    }

    pub async fn list_all(&self) -> Result<Vec<roles::Model>> {
        roles::Entity::find()
            .all(&self.conn)
            .await
            .context("Failed to list roles")
    }

    /// Assign a role. The (user, role) pair is unique; assigning twice is a
    /// no-op, not an error.
    pub async fn assign(&self, user_id: i32, role_name: &str) -> Result<()> {
        let role = self
            .find_by_name(role_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Unknown role: {role_name}"))?;

        let insert = user_roles::Entity::insert(user_roles::ActiveModel {
            user_id: Set(user_id),
            role_id: Set(role.id),
        })
        .on_conflict(
            OnConflict::columns([user_roles::Column::UserId, user_roles::Column::RoleId])
                .do_nothing()
                .to_owned(),
        )
        .exec(&self.conn)
        .await;

        match insert {
            Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
            Err(e) => Err(e).context("Failed to assign role"),
        }
    }

    pub async fn remove(&self, user_id: i32, role_name: &str) -> Result<bool> {
        let Some(role) = self.find_by_name(role_name).await? else {
            return Ok(false);
        };

        let res = user_roles::Entity::delete_many()
            .filter(user_roles::Column::UserId.eq(user_id))
            .filter(user_roles::Column::RoleId.eq(role.id))
            .exec(&self.conn)
            .await
            .context("Failed to remove role assignment")?;

        Ok(res.rows_affected > 0)
    }

    pub async fn roles_for_user(&self, user_id: i32) -> Result<Vec<String>> {
        let names: Vec<String> = user_roles::Entity::find()
            .filter(user_roles::Column::UserId.eq(user_id))
            .inner_join(roles::Entity)
            .select_only()
            .column(roles::Column::Name)
            .into_tuple()
            .all(&self.conn)
            .await
            .context("Failed to query roles for user")?;

        Ok(names)
    }
}
