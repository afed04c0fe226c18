use async_trait::async_trait;
use chrono::{DateTime, Utc};

use milagro_core::AppResult;
use milagro_domain::{AdminId, EmailAddress, Role, StoredSession};

/// Account known to the hosted auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Provider-assigned id, shared with the profile row.
    pub id: AdminId,
    /// Sign-in email.
    pub email: EmailAddress,
}

/// Metadata attached to a new auth account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateAuthUser {
    /// Sign-in email, confirmed on creation.
    pub email: EmailAddress,
    /// Initial password.
    pub password: String,
    /// Display name.
    pub name: String,
    /// Administrative role.
    pub role: Role,
    /// Department label.
    pub department: Option<String>,
    /// Contact phone number.
    pub phone: Option<String>,
}

/// Session issued by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    /// Bearer token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: Option<String>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Authenticated account.
    pub user: AuthUser,
}

/// Port for the hosted auth provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Creates a confirmed account with a password. Requires service privileges.
    async fn create_user(&self, input: CreateAuthUser) -> AppResult<AuthUser>;

    /// Deletes an account. The remote store cascades to its profile.
    async fn delete_user(&self, id: &AdminId) -> AppResult<()>;

    /// Exchanges credentials for a session.
    async fn sign_in_with_password(
        &self,
        email: &EmailAddress,
        password: &str,
    ) -> AppResult<AuthSession>;

    /// Resolves the account behind a bearer token, `None` when it is no longer valid.
    async fn current_user(&self, access_token: &str) -> AppResult<Option<AuthUser>>;

    /// Revokes a bearer token.
    async fn sign_out(&self, access_token: &str) -> AppResult<()>;
}

/// Port for local session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the stored session, if any.
    async fn load(&self) -> AppResult<Option<StoredSession>>;

    /// Replaces the stored session.
    async fn save(&self, session: &StoredSession) -> AppResult<()>;

    /// Removes the stored session.
    async fn clear(&self) -> AppResult<()>;
}
