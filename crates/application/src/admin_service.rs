use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use milagro_core::{AppError, AppResult};
use milagro_domain::{
    ActivityAction, AdminId, AdminProfile, AdminProfilePatch, NewActivityLogEntry,
    NewAdminProfile, Permission, ProfileImageKind, SessionUser, StorageBucket, generate_file_path,
    profile_image_prefix,
};

use crate::{
    ActivityLogRepository, AuthProvider, AuthorizationService, CreateAuthUser, FileStorage,
    ProfileFilter, ProfileRepository,
};

/// Application service for admin account management.
///
/// Every workflow requires the actor to hold `admins.manage`.
#[derive(Clone)]
pub struct AdminService {
    authorization: AuthorizationService,
    profiles: Arc<dyn ProfileRepository>,
    activity: Arc<dyn ActivityLogRepository>,
    auth: Arc<dyn AuthProvider>,
    storage: Arc<dyn FileStorage>,
}

impl AdminService {
    /// Creates a new admin service.
    #[must_use]
    pub fn new(
        authorization: AuthorizationService,
        profiles: Arc<dyn ProfileRepository>,
        activity: Arc<dyn ActivityLogRepository>,
        auth: Arc<dyn AuthProvider>,
        storage: Arc<dyn FileStorage>,
    ) -> Self {
        Self {
            authorization,
            profiles,
            activity,
            auth,
            storage,
        }
    }

    /// Creates an auth account and its profile.
    ///
    /// The auth account is removed again when the profile insert fails.
    pub async fn create_admin(
        &self,
        actor: &SessionUser,
        input: NewAdminProfile,
    ) -> AppResult<AdminProfile> {
        self.authorization
            .require_permission(actor, Permission::AdminsManage)
            .await?;

        let password = input.password.clone();
        let mut draft = input.into_draft(None)?;

        let auth_user = self
            .auth
            .create_user(CreateAuthUser {
                email: draft.email.clone(),
                password,
                name: draft.name.clone(),
                role: draft.role,
                department: draft.department.clone(),
                phone: draft.phone.clone(),
            })
            .await?;
        draft.id = Some(auth_user.id.clone());

        let profile = match self.profiles.insert_profile(draft).await {
            Ok(profile) => profile,
            Err(error) => {
                if let Err(cleanup_error) = self.auth.delete_user(&auth_user.id).await {
                    warn!(
                        admin_id = %auth_user.id,
                        error = %cleanup_error,
                        "failed to remove auth account after profile insert failure"
                    );
                }
                return Err(error);
            }
        };

        self.record_activity(
            &profile.id,
            ActivityAction::AdminCreated,
            json!({
                "role": profile.role,
                "department": profile.department,
            }),
        )
        .await;

        info!(admin_id = %profile.id, role = profile.role.as_str(), "admin created");
        Ok(profile)
    }

    /// Lists administrators, most recently created first.
    pub async fn list_admins(&self, actor: &SessionUser) -> AppResult<Vec<AdminProfile>> {
        self.authorization
            .require_permission(actor, Permission::AdminsManage)
            .await?;

        self.profiles.list_profiles(ProfileFilter::admins()).await
    }

    /// Updates profile fields.
    pub async fn update_admin(
        &self,
        actor: &SessionUser,
        id: &AdminId,
        patch: AdminProfilePatch,
    ) -> AppResult<AdminProfile> {
        self.authorization
            .require_permission(actor, Permission::AdminsManage)
            .await?;

        patch.validate()?;
        if patch.is_empty() {
            return Err(AppError::Validation(
                "admin update must change at least one field".to_owned(),
            ));
        }

        let details = serde_json::to_value(&patch).map_err(|error| {
            AppError::Internal(format!("failed to serialize admin update: {error}"))
        })?;
        let profile = self.profiles.update_profile(id, patch).await?;
        self.record_activity(id, ActivityAction::AdminUpdated, details)
            .await;

        Ok(profile)
    }

    /// Replaces the grant set of an admin.
    pub async fn update_permissions(
        &self,
        actor: &SessionUser,
        id: &AdminId,
        permissions: BTreeSet<Permission>,
    ) -> AppResult<AdminProfile> {
        self.authorization
            .require_permission(actor, Permission::AdminsManage)
            .await?;

        let details = json!({ "permissions": &permissions });
        let profile = self
            .profiles
            .update_profile(id, AdminProfilePatch::permissions(permissions))
            .await?;
        self.record_activity(id, ActivityAction::PermissionsUpdated, details)
            .await;

        Ok(profile)
    }

    /// Deletes an admin's auth account; the remote store cascades to the profile.
    ///
    /// Stored avatar and signature images are removed best-effort afterwards.
    pub async fn delete_admin(&self, actor: &SessionUser, id: &AdminId) -> AppResult<()> {
        self.authorization
            .require_permission(actor, Permission::AdminsManage)
            .await?;

        if &actor.profile.id == id {
            return Err(AppError::Validation(
                "admins cannot delete their own account".to_owned(),
            ));
        }

        self.record_activity(id, ActivityAction::AdminDeleted, json!({}))
            .await;
        self.auth.delete_user(id).await?;

        let prefix = profile_image_prefix(id.as_str());
        for kind in [ProfileImageKind::Avatar, ProfileImageKind::Signature] {
            if let Err(error) = self.storage.remove_prefix(kind.bucket(), &prefix).await {
                warn!(
                    admin_id = %id,
                    bucket = kind.bucket().as_str(),
                    error = %error,
                    "failed to remove admin images"
                );
            }
        }

        info!(admin_id = %id, "admin deleted");
        Ok(())
    }

    /// Uploads an avatar or signature image and returns its public URL.
    pub async fn upload_profile_image(
        &self,
        actor: &SessionUser,
        id: &AdminId,
        kind: ProfileImageKind,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AppResult<String> {
        self.authorization
            .require_permission(actor, Permission::AdminsManage)
            .await?;

        if bytes.is_empty() {
            return Err(AppError::Validation("image file is empty".to_owned()));
        }

        let bucket = kind.bucket();
        let path = generate_file_path(
            bucket,
            file_name,
            id.as_str(),
            Utc::now().timestamp_millis(),
        );
        self.storage
            .upload(bucket, &path, bytes, content_type_for(file_name))
            .await
    }

    /// Resolves the public URL of a stored object.
    #[must_use]
    pub fn public_url(&self, bucket: StorageBucket, path: &str) -> String {
        self.storage.public_url(bucket, path)
    }

    async fn record_activity(&self, subject: &AdminId, action: ActivityAction, details: Value) {
        let entry = NewActivityLogEntry {
            actor_user_id: subject.clone(),
            action,
            details,
        };
        if let Err(error) = self.activity.append_entry(entry).await {
            warn!(
                admin_id = %subject,
                action = action.as_str(),
                error = %error,
                "failed to append admin activity"
            );
        }
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
