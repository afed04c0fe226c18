use std::str::FromStr;

use chrono::{DateTime, Utc};
use milagro_core::AppError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AdminId, Role};

/// Stable actions recorded in the activity trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    /// Emitted when an admin account is created.
    AdminCreated,
    /// Emitted when admin profile fields change.
    AdminUpdated,
    /// Emitted when an admin's grant set is replaced.
    PermissionsUpdated,
    /// Emitted right before an admin account is removed.
    AdminDeleted,
}

impl ActivityAction {
    /// Returns a stable storage value for this action.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminCreated => "admin_created",
            Self::AdminUpdated => "admin_updated",
            Self::PermissionsUpdated => "permissions_updated",
            Self::AdminDeleted => "admin_deleted",
        }
    }
}

impl FromStr for ActivityAction {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin_created" => Ok(Self::AdminCreated),
            "admin_updated" => Ok(Self::AdminUpdated),
            "permissions_updated" => Ok(Self::PermissionsUpdated),
            "admin_deleted" => Ok(Self::AdminDeleted),
            _ => Err(AppError::Validation(format!(
                "unknown activity action '{value}'"
            ))),
        }
    }
}

/// Activity entry payload before the remote store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewActivityLogEntry {
    /// Admin the entry is about.
    #[serde(rename = "user_id")]
    pub actor_user_id: AdminId,
    /// What happened.
    pub action: ActivityAction,
    /// Structured detail payload.
    pub details: Value,
}

/// Persisted append-only activity entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    /// Remote-assigned identifier.
    pub id: String,
    /// Admin the entry is about.
    #[serde(rename = "user_id")]
    pub actor_user_id: AdminId,
    /// What happened.
    pub action: ActivityAction,
    /// Structured detail payload.
    pub details: Value,
    /// Append timestamp.
    pub created_at: DateTime<Utc>,
}

/// Activity entry joined with the actor's display fields.
///
/// The actor fields are empty once the profile has been deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogView {
    /// The underlying entry.
    pub entry: ActivityLogEntry,
    /// Actor display name at read time.
    pub actor_name: Option<String>,
    /// Actor role at read time.
    pub actor_role: Option<Role>,
}
