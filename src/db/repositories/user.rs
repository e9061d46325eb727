use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use tokio::task;

use crate::config::SecurityConfig;
use crate::entities::users;

/// User data returned from the repository (without the password hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub display_name: String,
    pub failed_login_attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub password_changed_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            email: model.email,
            display_name: model.display_name,
            failed_login_attempts: model.failed_login_attempts,
            locked_at: model.locked_at,
            password_changed_at: model.password_changed_at,
            confirmed_at: model.confirmed_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Outcome of recording one failed login attempt.
#[derive(Debug, Clone, Copy)]
pub struct FailedAttemptOutcome {
    pub attempts: i32,
    pub locked_now: bool,
}

/// Emails are unique only after normalization; every lookup and insert goes
/// through this.
#[must_use]
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Create a user. The returned token is the email-confirmation token the
    /// mail collaborator is expected to deliver.
    pub async fn create(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        config: &SecurityConfig,
    ) -> Result<(User, String)> {
        let email = normalize_email(email);
        let password = password.to_string();
        let config = config.clone();
        let password_hash = task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .context("Password hashing task panicked")??;

        let confirmation_token = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now();

        let model = users::ActiveModel {
            email: Set(email),
            password_hash: Set(password_hash),
            display_name: Set(display_name.to_string()),
            failed_login_attempts: Set(0),
            locked_at: Set(None),
            password_changed_at: Set(now),
            confirmed_at: Set(None),
            confirmation_token: Set(Some(confirmation_token.clone())),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert user")?;

        Ok((User::from(model), confirmation_token))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(User::from))
    }

    /// Variant used by the login path, which needs the stored hash.
    pub async fn get_by_email_with_password(&self, email: &str) -> Result<Option<(User, String)>> {
        let user = users::Entity::find()
            .filter(users::Column::Email.eq(normalize_email(email)))
            .one(&self.conn)
            .await
            .context("Failed to query user by email")?;

        Ok(user.map(|u| {
            let password_hash = u.password_hash.clone();
            (User::from(u), password_hash)
        }))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<User>> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    pub async fn get_by_confirmation_token(&self, token: &str) -> Result<Option<User>> {
        let user = users::Entity::find()
            .filter(users::Column::ConfirmationToken.eq(token))
            .one(&self.conn)
            .await
            .context("Failed to query user by confirmation token")?;

        Ok(user.map(User::from))
    }

    pub async fn list_all(&self) -> Result<Vec<User>> {
        let rows = users::Entity::find()
            .order_by_desc(users::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn count(&self) -> Result<u64> {
        users::Entity::find()
            .count(&self.conn)
            .await
            .context("Failed to count users")
    }

    /// Increment the failed-attempt counter; once it reaches `threshold` the
    /// lock timestamp is stamped. Concurrent increments may undercount, which
    /// is accepted.
    pub async fn record_failed_attempt(
        &self,
        id: i32,
        threshold: u32,
    ) -> Result<FailedAttemptOutcome> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for failed attempt")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let attempts = user.failed_login_attempts + 1;
        let locked_now = attempts >= i32::try_from(threshold).unwrap_or(i32::MAX);

        let mut active: users::ActiveModel = user.into();
        active.failed_login_attempts = Set(attempts);
        if locked_now {
            active.locked_at = Set(Some(Utc::now()));
        }
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(FailedAttemptOutcome {
            attempts,
            locked_now,
        })
    }

    /// Reset counter and lock unconditionally. Used on successful login and
    /// for the administrative unlock.
    pub async fn reset_lockout(&self, id: i32) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for lockout reset")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let mut active: users::ActiveModel = user.into();
        active.failed_login_attempts = Set(0);
        active.locked_at = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn confirm(&self, id: i32) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for confirmation")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let mut active: users::ActiveModel = user.into();
        active.confirmed_at = Set(Some(Utc::now()));
        active.confirmation_token = Set(None);
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Update password (hashes the new password, stamps `password_changed_at`).
    pub async fn update_password(
        &self,
        id: i32,
        new_password: &str,
        config: &SecurityConfig,
    ) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for password update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let password = new_password.to_string();
        let config = config.clone();
        let new_hash = task::spawn_blocking(move || hash_password(&password, &config))
            .await
            .context("Password hashing task panicked")??;

        let now = Utc::now();
        let mut active: users::ActiveModel = user.into();
        active.password_hash = Set(new_hash);
        active.password_changed_at = Set(now);
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }

    pub async fn update_display_name(&self, id: i32, display_name: &str) -> Result<()> {
        let user = users::Entity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query user for update")?
            .ok_or_else(|| anyhow::anyhow!("User not found: {id}"))?;

        let mut active: users::ActiveModel = user.into();
        active.display_name = Set(display_name.to_string());
        active.updated_at = Set(Utc::now());
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Hard delete with explicit cascade: sessions and role assignments go
    /// with the row.
    pub async fn delete(&self, id: i32) -> Result<bool> {
        use crate::entities::{sessions, user_roles};

        sessions::Entity::delete_many()
            .filter(sessions::Column::UserId.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to delete user sessions")?;

        user_roles::Entity::delete_many()
            .filter(user_roles::Column::UserId.eq(id))
            .exec(&self.conn)
            .await
            .context("Failed to delete user role assignments")?;

        let res = users::Entity::delete_by_id(id)
            .exec(&self.conn)
            .await
            .context("Failed to delete user")?;

        Ok(res.rows_affected > 0)
    }
}

/// Hash a password using Argon2id with the configured params.
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let params = Params::new(
        config.argon2_memory_cost_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
        None,
    )
    .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Verify a candidate password against a stored hash.
/// Note: runs on a blocking task because Argon2 is CPU-intensive and would
/// stall the async runtime if run inline.
pub async fn verify_password_hash(password_hash: String, password: String) -> Result<bool> {
    let is_valid = task::spawn_blocking(move || {
        let parsed_hash = PasswordHash::new(&password_hash)
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

        let argon2 = Argon2::default();
        Ok::<bool, anyhow::Error>(
            argon2
                .verify_password(password.as_bytes(), &parsed_hash)
                .is_ok(),
        )
    })
    .await
    .context("Password verification task panicked")??;

    Ok(is_valid)
}
