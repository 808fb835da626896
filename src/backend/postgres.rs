//! `profiles` table access over a Postgres pool.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, Connection, FromRow, PgPool};
use std::time::Duration;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{Identity, NewProfile, ProfileStore, ProfileUpdate, Role, StoreFuture};

const PROFILE_COLUMNS: &str = "id, username, phone, full_name, role::text AS role, avatar_url, \
     is_active, employee_id, specialization, created_at, updated_at, created_by";

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct ProfileRow {
    id: Uuid,
    username: String,
    phone: Option<String>,
    full_name: String,
    role: String,
    avatar_url: Option<String>,
    is_active: bool,
    employee_id: Option<String>,
    specialization: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<Uuid>,
}

impl ProfileRow {
    /// Rows whose role is outside the known set never become identities.
    fn into_identity(self) -> Option<Identity> {
        let role = match self.role.parse::<Role>() {
            Ok(role) => role,
            Err(err) => {
                warn!(profile_id = %self.id, "Ignoring profile: {err}");
                return None;
            }
        };
        Some(Identity {
            id: self.id,
            username: self.username,
            email: None,
            phone: self.phone,
            full_name: self.full_name,
            role,
            employee_id: self.employee_id,
            specialization: self.specialization,
            avatar_url: self.avatar_url,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            created_by: self.created_by,
        })
    }
}

impl PgProfileStore {
    /// Connect to the database
    /// # Errors
    /// Returns an error if the pool cannot be established.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn select_profile(&self, id: Uuid) -> Result<Option<Identity>> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1");
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query.as_str()
        );
        let row: Option<ProfileRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to select profile")?;
        Ok(row.and_then(ProfileRow::into_identity))
    }

    async fn select_id_by_username(&self, username: &str) -> Result<Option<Uuid>> {
        let query = "SELECT id FROM profiles WHERE username = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_scalar(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to look up username")
    }

    async fn select_role(&self, id: Uuid) -> Result<Option<String>> {
        let query = "SELECT role::text FROM profiles WHERE id = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        sqlx::query_scalar(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to select role")
    }

    async fn update(&self, id: Uuid, update: &ProfileUpdate) -> Result<bool> {
        let query = r"
            UPDATE profiles SET
                phone = COALESCE($2, phone),
                full_name = COALESCE($3, full_name),
                avatar_url = COALESCE($4, avatar_url),
                employee_id = COALESCE($5, employee_id),
                specialization = COALESCE($6, specialization),
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(update.phone.as_deref())
            .bind(update.full_name.as_deref())
            .bind(update.avatar_url.as_deref())
            .bind(update.employee_id.as_deref())
            .bind(update.specialization.as_deref())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to update profile")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, profile: &NewProfile) -> Result<()> {
        let query = r"
            INSERT INTO profiles
                (id, username, phone, full_name, role, employee_id, specialization, created_by)
            VALUES ($1, $2, $3, $4, $5::user_role, $6, $7, $8)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(profile.id)
            .bind(&profile.username)
            .bind(profile.phone.as_deref())
            .bind(&profile.full_name)
            .bind(profile.role.as_str())
            .bind(profile.employee_id.as_deref())
            .bind(profile.specialization.as_deref())
            .bind(profile.created_by)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to insert profile")?;
        Ok(())
    }

    async fn ping_database(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("Failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("Failed to ping database")
    }
}

impl ProfileStore for PgProfileStore {
    fn profile_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<Identity>> {
        Box::pin(self.select_profile(id))
    }

    fn profile_id_by_username<'a>(&'a self, username: &'a str) -> StoreFuture<'a, Option<Uuid>> {
        Box::pin(self.select_id_by_username(username))
    }

    fn role_by_id(&self, id: Uuid) -> StoreFuture<'_, Option<String>> {
        Box::pin(self.select_role(id))
    }

    fn update_profile<'a>(&'a self, id: Uuid, update: &'a ProfileUpdate) -> StoreFuture<'a, bool> {
        Box::pin(self.update(id, update))
    }

    fn insert_profile<'a>(&'a self, profile: &'a NewProfile) -> StoreFuture<'a, ()> {
        Box::pin(self.insert(profile))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(self.ping_database())
    }
}
