use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Role names every installation starts with. "admin" is the elevated role
/// the policy registry checks for.
const SEED_ROLES: [&str; 2] = ["admin", "member"];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(Users)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Sessions)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Roles)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(UserRoles)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(AuditEvents)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Session lookups are always scoped to active rows for one user.
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_sessions_user_active")
                    .table(Sessions)
                    .col(crate::entities::sessions::Column::UserId)
                    .col(crate::entities::sessions::Column::Active)
                    .to_owned(),
            )
            .await?;

        for role in SEED_ROLES {
            let insert = sea_orm_migration::sea_query::Query::insert()
                .into_table(Roles)
                .columns([crate::entities::roles::Column::Name])
                .values_panic([role.into()])
                .to_owned();
            manager.exec_stmt(insert).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AuditEvents).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserRoles).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Roles).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Sessions).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users).to_owned())
            .await?;

        Ok(())
    }
}
