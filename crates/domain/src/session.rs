use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{AdminId, AdminProfile, AdminStatus, EmailAddress, Permission, Role};

/// Fixed identifier of the configured bootstrap superadmin.
pub const BOOTSTRAP_ADMIN_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Who issued a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    /// Issued by the hosted auth provider.
    Provider,
    /// Issued locally for the configured bootstrap credential.
    Bootstrap,
}

/// Session persisted in local session storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Issuer of the session.
    pub origin: SessionOrigin,
    /// Bearer token for the remote API.
    pub access_token: String,
    /// Refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Authenticated user id.
    pub user_id: AdminId,
    /// Authenticated email.
    pub email: EmailAddress,
}

impl StoredSession {
    /// Returns whether the session has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Authenticated admin resolved for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    /// Profile backing the session.
    pub profile: AdminProfile,
    /// Issuer of the session.
    pub origin: SessionOrigin,
}

impl SessionUser {
    /// Builds the synthesized profile of the bootstrap superadmin.
    #[must_use]
    pub fn bootstrap(email: EmailAddress, now: DateTime<Utc>) -> Self {
        let created_at = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(now);

        Self {
            profile: AdminProfile {
                id: bootstrap_admin_id(),
                name: "Super Admin".to_owned(),
                email,
                role: Role::SuperAdmin,
                status: AdminStatus::Active,
                permissions: BTreeSet::from([Permission::All]),
                avatar_ref: String::new(),
                signature_ref: None,
                department: None,
                phone: None,
                last_login_at: Some(now),
                created_at,
                version: 0,
            },
            origin: SessionOrigin::Bootstrap,
        }
    }
}

/// Returns the identifier used by bootstrap sessions.
#[must_use]
pub fn bootstrap_admin_id() -> AdminId {
    AdminId::from_static(BOOTSTRAP_ADMIN_ID)
}
