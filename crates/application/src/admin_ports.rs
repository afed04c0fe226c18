use async_trait::async_trait;
use chrono::{DateTime, Utc};

use milagro_core::AppResult;
use milagro_domain::{
    ActivityLogEntry, ActivityLogView, AdminId, AdminProfile, AdminProfilePatch, AdminStatus,
    NewActivityLogEntry, ProfileDraft, Role, StorageBucket,
};

/// Selection applied when listing profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileFilter {
    /// Roles to include. Empty includes every role.
    pub roles: Vec<Role>,
    /// Optional status restriction.
    pub status: Option<AdminStatus>,
}

impl ProfileFilter {
    /// Selects every administrator regardless of status.
    #[must_use]
    pub fn admins() -> Self {
        Self {
            roles: vec![Role::Admin, Role::SuperAdmin],
            status: None,
        }
    }

    /// Returns whether a profile passes the filter.
    #[must_use]
    pub fn matches(&self, profile: &AdminProfile) -> bool {
        (self.roles.is_empty() || self.roles.contains(&profile.role))
            && self.status.is_none_or(|status| status == profile.status)
    }
}

/// Repository port for the remote `profiles` table.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Lists matching profiles, most recently created first.
    async fn list_profiles(&self, filter: ProfileFilter) -> AppResult<Vec<AdminProfile>>;

    /// Finds one profile by id.
    async fn find_profile(&self, id: &AdminId) -> AppResult<Option<AdminProfile>>;

    /// Inserts a profile and returns the stored record.
    async fn insert_profile(&self, draft: ProfileDraft) -> AppResult<AdminProfile>;

    /// Applies a patch and returns the stored record.
    ///
    /// Fails with `NotFound` for unknown ids and `Conflict` when the patch's
    /// expected version is stale.
    async fn update_profile(&self, id: &AdminId, patch: AdminProfilePatch)
    -> AppResult<AdminProfile>;

    /// Deletes a profile. Deleting an unknown id succeeds.
    ///
    /// Fails with `Conflict` when `expected_version` is set and stale.
    async fn delete_profile(&self, id: &AdminId, expected_version: Option<u64>) -> AppResult<()>;

    /// Records a successful sign-in.
    async fn touch_last_login(&self, id: &AdminId, at: DateTime<Utc>) -> AppResult<()>;
}

/// Append-only port for the remote activity trail.
#[async_trait]
pub trait ActivityLogRepository: Send + Sync {
    /// Appends one entry.
    async fn append_entry(&self, entry: NewActivityLogEntry) -> AppResult<ActivityLogEntry>;

    /// Lists the newest entries joined with actor display fields.
    async fn list_recent(&self, limit: usize) -> AppResult<Vec<ActivityLogView>>;
}

/// Port for the hosted object storage.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Uploads an object, replacing any existing one, and returns its public URL.
    async fn upload(
        &self,
        bucket: StorageBucket,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<String>;

    /// Resolves the public URL of an object without contacting the store.
    fn public_url(&self, bucket: StorageBucket, path: &str) -> String;

    /// Removes the listed objects. Missing objects are ignored.
    async fn remove(&self, bucket: StorageBucket, paths: &[String]) -> AppResult<()>;

    /// Removes every object whose path starts with `prefix`.
    async fn remove_prefix(&self, bucket: StorageBucket, prefix: &str) -> AppResult<()>;
}
