use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::SecurityConfig;
use crate::entities::{audit_events, roles, sessions};

pub mod migrator;
pub mod repositories;

pub use repositories::user::{FailedAttemptOutcome, User, normalize_email};

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let in_memory = db_url.contains(":memory:");

        if !in_memory {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        // An in-memory sqlite database exists per connection; a pool of them
        // would hand out empty databases. Pin it to one connection.
        let (max_connections, min_connections) = if in_memory {
            (1, 1)
        } else {
            (max_connections, min_connections)
        };

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn session_repo(&self) -> repositories::session::SessionRepository {
        repositories::session::SessionRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn role_repo(&self) -> repositories::role::RoleRepository {
        repositories::role::RoleRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn audit_repo(&self) -> repositories::audit::AuditRepository {
        repositories::audit::AuditRepository::new(self.conn.clone())
    }

    // ========== User Repository Methods ==========

    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        config: &SecurityConfig,
    ) -> Result<(User, String)> {
        self.user_repo()
            .create(email, password, display_name, config)
            .await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.user_repo().get_by_email(email).await
    }

    pub async fn get_user_by_email_with_password(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>> {
        self.user_repo().get_by_email_with_password(email).await
    }

    pub async fn get_user_by_id(&self, id: i32) -> Result<Option<User>> {
        self.user_repo().get_by_id(id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        self.user_repo().list_all().await
    }

    pub async fn user_count(&self) -> Result<u64> {
        self.user_repo().count().await
    }

    pub async fn record_failed_attempt(
        &self,
        user_id: i32,
        threshold: u32,
    ) -> Result<FailedAttemptOutcome> {
        self.user_repo()
            .record_failed_attempt(user_id, threshold)
            .await
    }

    pub async fn reset_lockout(&self, user_id: i32) -> Result<()> {
        self.user_repo().reset_lockout(user_id).await
    }

    // ========== Session Repository Methods ==========

    pub async fn create_session(
        &self,
        user_id: i32,
        user_agent: &str,
        ip_address: &str,
    ) -> Result<sessions::Model> {
        self.session_repo()
            .create(user_id, user_agent, ip_address)
            .await
    }

    pub async fn find_active_session(&self, id: i32) -> Result<Option<sessions::Model>> {
        self.session_repo().find_active(id).await
    }

    pub async fn terminate_session(&self, id: i32) -> Result<()> {
        self.session_repo().terminate(id).await
    }

    pub async fn list_active_sessions_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<sessions::Model>> {
        self.session_repo().list_active_for_user(user_id).await
    }

    pub async fn touch_session_activity(&self, id: i32, now: DateTime<Utc>) -> Result<()> {
        self.session_repo().touch_last_activity(id, now).await
    }

    // ========== Role Repository Methods ==========

    pub async fn assign_role(&self, user_id: i32, role_name: &str) -> Result<()> {
        self.role_repo().assign(user_id, role_name).await
    }

    pub async fn remove_role(&self, user_id: i32, role_name: &str) -> Result<bool> {
        self.role_repo().remove(user_id, role_name).await
    }

    pub async fn roles_for_user(&self, user_id: i32) -> Result<Vec<String>> {
        self.role_repo().roles_for_user(user_id).await
    }

    pub async fn list_roles(&self) -> Result<Vec<roles::Model>> {
        self.role_repo().list_all().await
    }

    // ========== Audit Repository Methods ==========

    pub async fn add_audit_event(
        &self,
        category: &str,
        actor: &str,
        user_id: Option<i32>,
        message: &str,
        details: Option<String>,
    ) -> Result<()> {
        self.audit_repo()
            .add(category, actor, user_id, message, details)
            .await
    }

    pub async fn list_audit_events(
        &self,
        limit: u64,
        category_filter: Option<String>,
    ) -> Result<Vec<audit_events::Model>> {
        self.audit_repo().list_recent(limit, category_filter).await
    }
}
