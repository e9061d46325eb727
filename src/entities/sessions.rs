use sea_orm::entity::prelude::*;

/// One authenticated device/login. Never deleted on logout; `active` flips to
/// false so the row survives as an audit trail.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub user_id: i32,

    pub ip_address: String,

    pub user_agent: String,

    pub active: bool,

    /// At most one live value system-wide per token (unique constraint).
    #[sea_orm(unique)]
    pub remember_token: Option<String>,

    pub remember_created_at: Option<DateTimeUtc>,

    pub last_activity_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
