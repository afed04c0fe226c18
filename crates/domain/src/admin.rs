use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use milagro_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::{EmailAddress, Permission, Role, validate_password};

/// Identifier assigned by the remote store to an admin profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdminId(String);

impl AdminId {
    /// Creates an identifier from a remote-assigned value.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "admin id must not be empty".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    pub(crate) fn from_static(value: &'static str) -> Self {
        Self(value.to_owned())
    }

    /// Returns the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for AdminId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Whether an admin may currently sign in and act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    /// Account is usable.
    Active,
    /// Account is suspended.
    Inactive,
}

impl AdminStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl FromStr for AdminStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            _ => Err(AppError::Validation(format!("unknown status '{value}'"))),
        }
    }
}

/// Administrator record mirrored from the remote `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminProfile {
    /// Remote-assigned stable identifier.
    pub id: AdminId,
    /// Display name.
    pub name: String,
    /// Unique sign-in email.
    pub email: EmailAddress,
    /// Administrative role.
    pub role: Role,
    /// Account status.
    pub status: AdminStatus,
    /// Explicit grants. Ignored for superadmins.
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    /// Public URL of the avatar image.
    #[serde(rename = "avatar_url", default)]
    pub avatar_ref: String,
    /// Public URL of the signature image.
    #[serde(rename = "signature_url", default)]
    pub signature_ref: Option<String>,
    /// Department label.
    #[serde(default)]
    pub department: Option<String>,
    /// Contact phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Last successful sign-in.
    #[serde(rename = "last_login", default)]
    pub last_login_at: Option<DateTime<Utc>>,
    /// Creation timestamp assigned by the remote store.
    pub created_at: DateTime<Utc>,
    /// Optimistic-concurrency token incremented on every remote write.
    #[serde(default)]
    pub version: u64,
}

impl AdminProfile {
    /// Returns whether the profile may act.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AdminStatus::Active
    }

    /// Applies the set fields of a patch in place.
    ///
    /// Does not touch `version`; the store owning the record bumps it.
    pub fn apply_patch(&mut self, patch: &AdminProfilePatch) {
        if let Some(name) = &patch.name {
            self.name.clone_from(name);
        }
        if let Some(avatar_ref) = &patch.avatar_ref {
            self.avatar_ref.clone_from(avatar_ref);
        }
        if let Some(signature_ref) = &patch.signature_ref {
            self.signature_ref = Some(signature_ref.clone());
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(department) = &patch.department {
            self.department = Some(department.clone());
        }
        if let Some(phone) = &patch.phone {
            self.phone = Some(phone.clone());
        }
        if let Some(permissions) = &patch.permissions {
            self.permissions.clone_from(permissions);
        }
    }
}

/// Profile payload sent to the remote store on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDraft {
    /// Identifier to reuse, e.g. the auth account id. `None` lets the store assign one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AdminId>,
    /// Display name.
    pub name: String,
    /// Unique sign-in email.
    pub email: EmailAddress,
    /// Administrative role.
    pub role: Role,
    /// Initial status.
    pub status: AdminStatus,
    /// Initial grants.
    pub permissions: BTreeSet<Permission>,
    /// Public URL of the avatar image.
    #[serde(rename = "avatar_url")]
    pub avatar_ref: String,
    /// Public URL of the signature image.
    #[serde(rename = "signature_url")]
    pub signature_ref: Option<String>,
    /// Department label.
    pub department: Option<String>,
    /// Contact phone number.
    pub phone: Option<String>,
}

/// Admin creation form input, including the initial password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAdminProfile {
    /// Display name.
    pub name: String,
    /// Raw email input.
    pub email: String,
    /// Initial password for the auth account.
    pub password: String,
    /// Administrative role.
    pub role: Role,
    /// Initial grants.
    pub permissions: BTreeSet<Permission>,
    /// Public URL of an already uploaded avatar.
    pub avatar_ref: Option<String>,
    /// Department label.
    pub department: Option<String>,
    /// Contact phone number.
    pub phone: Option<String>,
}

impl NewAdminProfile {
    /// Returns every validation problem of the input.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("name is required".to_owned());
        }

        if self.email.trim().is_empty() {
            errors.push("email is required".to_owned());
        } else if EmailAddress::new(self.email.as_str()).is_err() {
            errors.push("invalid email format".to_owned());
        }

        if let Err(AppError::Validation(message)) = validate_password(self.password.as_str()) {
            errors.push(message);
        }

        errors
    }

    /// Validates the input and converts it into an insert payload.
    pub fn into_draft(self, id: Option<AdminId>) -> AppResult<ProfileDraft> {
        let errors = self.validation_errors();
        if !errors.is_empty() {
            return Err(AppError::Validation(errors.join("; ")));
        }

        Ok(ProfileDraft {
            id,
            name: NonEmptyString::new(self.name.trim())?.into(),
            email: EmailAddress::new(self.email)?,
            role: self.role,
            status: AdminStatus::Active,
            permissions: self.permissions,
            avatar_ref: self.avatar_ref.unwrap_or_default(),
            signature_ref: None,
            department: self.department,
            phone: self.phone,
        })
    }
}

/// Partial update of an admin profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminProfilePatch {
    /// New display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New avatar URL.
    #[serde(
        rename = "avatar_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_ref: Option<String>,
    /// New signature URL.
    #[serde(
        rename = "signature_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub signature_ref: Option<String>,
    /// New role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AdminStatus>,
    /// New department.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// New phone number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Replacement grant set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<BTreeSet<Permission>>,
    /// Version the caller last observed. A mismatch fails with a conflict.
    #[serde(skip)]
    pub expected_version: Option<u64>,
}

impl AdminProfilePatch {
    /// Returns a patch that only replaces the grant set.
    #[must_use]
    pub fn permissions(permissions: BTreeSet<Permission>) -> Self {
        Self {
            permissions: Some(permissions),
            ..Self::default()
        }
    }

    /// Returns whether the patch changes no field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.avatar_ref.is_none()
            && self.signature_ref.is_none()
            && self.role.is_none()
            && self.status.is_none()
            && self.department.is_none()
            && self.phone.is_none()
            && self.permissions.is_none()
    }

    /// Validates field contents that have invariants.
    pub fn validate(&self) -> AppResult<()> {
        if self.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(AppError::Validation("name is required".to_owned()));
        }

        Ok(())
    }
}
