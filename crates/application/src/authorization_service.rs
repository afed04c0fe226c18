use std::sync::Arc;

use milagro_core::{AppError, AppResult};
use milagro_domain::{AdminProfile, Permission, Role, SessionOrigin, SessionUser};

use crate::ProfileRepository;

/// Returns whether a grant set satisfies a required permission.
///
/// The wildcard grant satisfies every requirement.
#[must_use]
pub fn has_permission<'a>(
    granted: impl IntoIterator<Item = &'a Permission>,
    required: Permission,
) -> bool {
    granted
        .into_iter()
        .any(|permission| *permission == required || *permission == Permission::All)
}

/// Evaluates whether an actor may perform `action` on `subject`.
///
/// Superadmins pass unconditionally. Everyone else needs the wildcard grant
/// or the catalog permission named by `subject.action`.
#[must_use]
pub fn can_perform<'a>(
    role: Role,
    granted: impl IntoIterator<Item = &'a Permission>,
    action: &str,
    subject: &str,
) -> bool {
    match role {
        Role::SuperAdmin => true,
        Role::Admin => {
            let granted: Vec<&Permission> = granted.into_iter().collect();
            granted.contains(&&Permission::All)
                || Permission::from_parts(subject, action)
                    .is_some_and(|required| has_permission(granted, required))
        }
    }
}

/// Returns whether a profile satisfies a permission, honoring its role.
#[must_use]
pub fn profile_has_permission(profile: &AdminProfile, permission: Permission) -> bool {
    match profile.role {
        Role::SuperAdmin => true,
        Role::Admin => has_permission(&profile.permissions, permission),
    }
}

/// Application service guarding admin workflows.
///
/// Every check reads the actor's current profile; grants are never cached.
#[derive(Clone)]
pub struct AuthorizationService {
    profiles: Arc<dyn ProfileRepository>,
}

impl AuthorizationService {
    /// Creates a new authorization service from a profile repository.
    #[must_use]
    pub fn new(profiles: Arc<dyn ProfileRepository>) -> Self {
        Self { profiles }
    }

    /// Ensures the actor holds the permission and returns their current profile.
    pub async fn require_permission(
        &self,
        actor: &SessionUser,
        permission: Permission,
    ) -> AppResult<AdminProfile> {
        let profile = self.resolve_profile(actor).await?;

        if !profile.is_active() {
            return Err(AppError::Forbidden(format!(
                "admin '{}' is inactive",
                profile.id
            )));
        }

        if !profile_has_permission(&profile, permission) {
            return Err(AppError::Forbidden(format!(
                "admin '{}' is missing permission '{}'",
                profile.id,
                permission.as_str()
            )));
        }

        Ok(profile)
    }

    /// Returns whether the actor currently holds the permission.
    pub async fn has_permission_for(
        &self,
        actor: &SessionUser,
        permission: Permission,
    ) -> AppResult<bool> {
        match self.require_permission(actor, permission).await {
            Ok(_) => Ok(true),
            Err(AppError::Forbidden(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn resolve_profile(&self, actor: &SessionUser) -> AppResult<AdminProfile> {
        if actor.origin == SessionOrigin::Bootstrap {
            return Ok(actor.profile.clone());
        }

        self.profiles
            .find_profile(&actor.profile.id)
            .await?
            .ok_or_else(|| {
                AppError::Unauthorized(format!(
                    "no profile exists for admin '{}'",
                    actor.profile.id
                ))
            })
    }
}

#[cfg(test)]
mod tests;
