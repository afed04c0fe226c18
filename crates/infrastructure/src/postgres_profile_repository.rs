use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use milagro_application::{ProfileFilter, ProfileRepository};
use milagro_core::{AppError, AppResult};
use milagro_domain::{
    AdminId, AdminProfile, AdminProfilePatch, AdminStatus, EmailAddress, Permission, ProfileDraft,
    Role,
};

const PROFILE_COLUMNS: &str = "id, name, email, role, status, permissions, avatar_url, \
     signature_url, department, phone, last_login, created_at, version";

/// PostgreSQL-backed repository for the `profiles` table.
#[derive(Clone)]
pub struct PostgresProfileRepository {
    pool: PgPool,
}

impl PostgresProfileRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_version(&self, id: Uuid) -> AppResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT version FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to read profile version: {error}"))
            })
    }
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    status: String,
    permissions: Vec<String>,
    avatar_url: String,
    signature_url: Option<String>,
    department: Option<String>,
    phone: Option<String>,
    last_login: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<ProfileRow> for AdminProfile {
    type Error = AppError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let permissions = row
            .permissions
            .iter()
            .map(|value| value.parse::<Permission>())
            .collect::<AppResult<BTreeSet<_>>>()
            .map_err(|error| stored_value_error("permissions", error))?;

        Ok(Self {
            id: AdminId::new(row.id.to_string())?,
            name: row.name,
            email: EmailAddress::new(row.email).map_err(|error| stored_value_error("email", error))?,
            role: row
                .role
                .parse::<Role>()
                .map_err(|error| stored_value_error("role", error))?,
            status: row
                .status
                .parse::<AdminStatus>()
                .map_err(|error| stored_value_error("status", error))?,
            permissions,
            avatar_ref: row.avatar_url,
            signature_ref: row.signature_url,
            department: row.department,
            phone: row.phone,
            last_login_at: row.last_login,
            created_at: row.created_at,
            version: u64::try_from(row.version).unwrap_or_default(),
        })
    }
}

fn stored_value_error(column: &str, error: AppError) -> AppError {
    AppError::Internal(format!("profile row has invalid {column}: {error}"))
}

fn parse_id(id: &AdminId) -> AppResult<Uuid> {
    Uuid::parse_str(id.as_str())
        .map_err(|error| AppError::Validation(format!("invalid profile id '{id}': {error}")))
}

fn version_param(version: Option<u64>) -> AppResult<Option<i64>> {
    version
        .map(|value| {
            i64::try_from(value)
                .map_err(|_| AppError::Validation(format!("version {value} is out of range")))
        })
        .transpose()
}

fn permission_tags(permissions: &BTreeSet<Permission>) -> Vec<String> {
    permissions
        .iter()
        .map(|permission| permission.as_str().to_owned())
        .collect()
}

fn map_write_error(action: &str, error: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(database_error) = &error
        && database_error.code().as_deref() == Some("23505")
    {
        return AppError::Conflict(format!("failed to {action}: email is already in use"));
    }

    AppError::Internal(format!("failed to {action}: {error}"))
}

#[async_trait]
impl ProfileRepository for PostgresProfileRepository {
    async fn list_profiles(&self, filter: ProfileFilter) -> AppResult<Vec<AdminProfile>> {
        let roles: Vec<String> = filter
            .roles
            .iter()
            .map(|role| role.as_str().to_owned())
            .collect();
        let status = filter.status.map(|status| status.as_str().to_owned());

        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            SELECT {PROFILE_COLUMNS}
            FROM profiles
            WHERE (cardinality($1::TEXT[]) = 0 OR role = ANY($1))
                AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            "#
        ))
        .bind(roles)
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list profiles: {error}")))?;

        rows.into_iter().map(AdminProfile::try_from).collect()
    }

    async fn find_profile(&self, id: &AdminId) -> AppResult<Option<AdminProfile>> {
        let Ok(id) = Uuid::parse_str(id.as_str()) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to find profile: {error}")))?;

        row.map(AdminProfile::try_from).transpose()
    }

    async fn insert_profile(&self, draft: ProfileDraft) -> AppResult<AdminProfile> {
        let id = draft.id.as_ref().map(parse_id).transpose()?;

        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            INSERT INTO profiles (
                id,
                name,
                email,
                role,
                status,
                permissions,
                avatar_url,
                signature_url,
                department,
                phone
            )
            VALUES (COALESCE($1, gen_random_uuid()), $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(draft.name)
        .bind(draft.email.as_str())
        .bind(draft.role.as_str())
        .bind(draft.status.as_str())
        .bind(permission_tags(&draft.permissions))
        .bind(draft.avatar_ref)
        .bind(draft.signature_ref)
        .bind(draft.department)
        .bind(draft.phone)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| map_write_error("insert profile", error))?;

        AdminProfile::try_from(row)
    }

    async fn update_profile(
        &self,
        id: &AdminId,
        patch: AdminProfilePatch,
    ) -> AppResult<AdminProfile> {
        let uuid = parse_id(id)?;
        let expected_version = version_param(patch.expected_version)?;

        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            r#"
            UPDATE profiles
            SET
                name = COALESCE($2, name),
                avatar_url = COALESCE($3, avatar_url),
                signature_url = COALESCE($4, signature_url),
                role = COALESCE($5, role),
                status = COALESCE($6, status),
                department = COALESCE($7, department),
                phone = COALESCE($8, phone),
                permissions = COALESCE($9, permissions),
                version = version + 1
            WHERE id = $1
                AND ($10::BIGINT IS NULL OR version = $10)
            RETURNING {PROFILE_COLUMNS}
            "#
        ))
        .bind(uuid)
        .bind(patch.name)
        .bind(patch.avatar_ref)
        .bind(patch.signature_ref)
        .bind(patch.role.map(|role| role.as_str()))
        .bind(patch.status.map(|status| status.as_str()))
        .bind(patch.department)
        .bind(patch.phone)
        .bind(patch.permissions.as_ref().map(permission_tags))
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| map_write_error("update profile", error))?;

        if let Some(row) = row {
            return AdminProfile::try_from(row);
        }

        match self.current_version(uuid).await? {
            Some(current) => Err(AppError::Conflict(format!(
                "profile '{id}' was modified (expected version {}, found {current})",
                expected_version.unwrap_or_default()
            ))),
            None => Err(AppError::NotFound(format!("profile '{id}' does not exist"))),
        }
    }

    async fn delete_profile(&self, id: &AdminId, expected_version: Option<u64>) -> AppResult<()> {
        let uuid = parse_id(id)?;
        let expected_version = version_param(expected_version)?;

        let result = sqlx::query(
            r#"
            DELETE FROM profiles
            WHERE id = $1
                AND ($2::BIGINT IS NULL OR version = $2)
            "#,
        )
        .bind(uuid)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to delete profile: {error}")))?;

        if result.rows_affected() == 0
            && let Some(expected) = expected_version
            && let Some(current) = self.current_version(uuid).await?
        {
            return Err(AppError::Conflict(format!(
                "profile '{id}' was modified (expected version {expected}, found {current})"
            )));
        }

        Ok(())
    }

    async fn touch_last_login(&self, id: &AdminId, at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE profiles
            SET last_login = $2, version = version + 1
            WHERE id = $1
            "#,
        )
        .bind(parse_id(id)?)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to record last login: {error}")))?;

        Ok(())
    }
}
