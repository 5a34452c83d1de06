use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::authz::Principal;
use crate::db::row_parsers::{profile_from_row, user_from_row};
use crate::errors::{unique_as_validation, AppError, AppResult};
use crate::models::permission::Capability;
use crate::models::user::{NewUser, Profile, Role, User};
use crate::permission_store;
use crate::utils::utc_now;

/// Inserts the three roles if they are missing. Returns how many rows were added.
pub async fn seed_roles(pool: &SqlitePool) -> AppResult<u64> {
    let mut inserted = 0;
    for role in Role::ALL {
        let result = sqlx::query("INSERT OR IGNORE INTO roles (name, description) VALUES (?, ?)")
            .bind(role.as_str())
            .bind(role.description())
            .execute(pool)
            .await?;
        inserted += result.rows_affected();
    }
    tracing::info!(inserted, "roles seeded");
    Ok(inserted)
}

const PRINCIPAL_SELECT: &str = r#"
    SELECT u.id, u.is_superuser, p.user_id AS profile_user_id, p.role, p.active
    FROM users u
    LEFT JOIN profiles p ON p.user_id = u.id
    WHERE u.id = ?
"#;

/// Loads the identity facts the authorization engine consumes.
pub async fn load_principal(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Option<Principal>> {
    let row = sqlx::query(PRINCIPAL_SELECT)
        .bind(user_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let is_superuser: bool = sqlx::Row::try_get(&row, "is_superuser")?;
    Ok(Some(Principal {
        user_id,
        is_superuser,
        profile: profile_from_row(&row)?,
    }))
}

/// User and profile lookups backed by the `users` / `profiles` tables.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    pool: SqlitePool,
}

impl UserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the user together with its default profile (active reader).
    pub async fn create_user(&self, new: NewUser) -> AppResult<User> {
        let email = new.email.trim().to_lowercase();
        let name = new.name.trim().to_string();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::validation("a valid email is required"));
        }
        if name.is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            name,
            is_superuser: new.is_superuser,
            created_at: utc_now(),
        };
        let profile = Profile::default_for(user.id);

        let mut tx = self.pool.begin().await?;

        // Profiles reference the role row
        sqlx::query("INSERT OR IGNORE INTO roles (name, description) VALUES (?, ?)")
            .bind(Role::Reader.as_str())
            .bind(Role::Reader.description())
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO users (id, email, name, is_superuser, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(user.id.to_string())
            .bind(&user.email)
            .bind(&user.name)
            .bind(user.is_superuser)
            .bind(user.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(unique_as_validation("email already registered"))?;

        insert_profile(&mut tx, &profile).await?;

        tx.commit().await?;

        tracing::info!(user_id = %user.id, email = %user.email, "user created");
        Ok(user)
    }

    /// Returns the user's profile, creating the default one if it is missing.
    pub async fn ensure_profile(&self, user_id: Uuid) -> AppResult<Profile> {
        let mut tx = self.pool.begin().await?;
        let profile = ensure_profile_with(&mut tx, user_id).await?;
        tx.commit().await?;
        Ok(profile)
    }

    pub async fn get_user(&self, user_id: Uuid) -> AppResult<User> {
        let row = sqlx::query("SELECT id, email, name, is_superuser, created_at FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {user_id}")))?;
        user_from_row(&row)
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT id, email, name, is_superuser, created_at FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn principal(&self, user_id: Uuid) -> AppResult<Principal> {
        let mut conn = self.pool.acquire().await?;
        load_principal(&mut conn, user_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {user_id}")))
    }

    pub async fn set_role(&self, user_id: Uuid, role: Option<Role>) -> AppResult<Profile> {
        let mut tx = self.pool.begin().await?;
        let mut profile = ensure_profile_with(&mut tx, user_id).await?;
        sqlx::query("UPDATE profiles SET role = ? WHERE user_id = ?")
            .bind(role.map(|r| r.as_str()))
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        profile.role = role;
        tracing::info!(%user_id, role = ?role, "role changed");
        Ok(profile)
    }

    pub async fn set_active(&self, user_id: Uuid, active: bool) -> AppResult<Profile> {
        let mut tx = self.pool.begin().await?;
        let mut profile = ensure_profile_with(&mut tx, user_id).await?;
        sqlx::query("UPDATE profiles SET active = ? WHERE user_id = ?")
            .bind(active)
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        profile.active = active;
        tracing::info!(%user_id, active, "profile activity changed");
        Ok(profile)
    }

    pub async fn grant_capability(&self, user_id: Uuid, capability: Capability) -> AppResult<()> {
        self.get_user(user_id).await?;
        let mut conn = self.pool.acquire().await?;
        permission_store::grant_capability(&mut conn, user_id, capability).await
    }

    pub async fn revoke_capability(&self, user_id: Uuid, capability: Capability) -> AppResult<()> {
        let mut conn = self.pool.acquire().await?;
        permission_store::revoke_capability(&mut conn, user_id, capability).await
    }
}

async fn ensure_profile_with(conn: &mut SqliteConnection, user_id: Uuid) -> AppResult<Profile> {
    let principal = load_principal(conn, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("user {user_id}")))?;

    match principal.profile {
        Some(profile) => Ok(profile),
        None => {
            let profile = Profile::default_for(user_id);
            insert_profile(conn, &profile).await?;
            tracing::info!(%user_id, "created missing profile");
            Ok(profile)
        }
    }
}

async fn insert_profile(conn: &mut SqliteConnection, profile: &Profile) -> AppResult<()> {
    sqlx::query("INSERT OR IGNORE INTO profiles (user_id, role, active) VALUES (?, ?, ?)")
        .bind(profile.user_id.to_string())
        .bind(profile.role.map(|r| r.as_str()))
        .bind(profile.active)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
