use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use milagro_application::AdminService;
use milagro_core::{AppError, AppResult};
use milagro_domain::{
    AdminId, AdminProfile, AdminProfilePatch, AdminStatus, NewAdminProfile, Permission,
    ProfileImageKind, Role, SessionUser,
};
use tracing::info;

const USAGE: &str = "expected admins list | create <name> <email> [role] [permissions] | \
permissions <id> <permissions> | status <id> <active|inactive> | delete <id> | \
avatar <id> <file> | signature <id> <file>";

/// Admin management request given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    List,
    Create {
        name: String,
        email: String,
        role: Role,
        permissions: Option<BTreeSet<Permission>>,
    },
    SetPermissions {
        id: AdminId,
        permissions: BTreeSet<Permission>,
    },
    SetStatus {
        id: AdminId,
        status: AdminStatus,
    },
    Delete {
        id: AdminId,
    },
    UploadImage {
        id: AdminId,
        kind: ProfileImageKind,
        file: PathBuf,
    },
}

impl AdminCommand {
    /// Parses the arguments following `admins`.
    pub fn parse(arguments: &[String]) -> AppResult<Self> {
        let arguments: Vec<&str> = arguments.iter().map(String::as_str).collect();
        match arguments.as_slice() {
            ["list"] => Ok(Self::List),
            ["create", name, email, rest @ ..] if rest.len() <= 2 => Ok(Self::Create {
                name: (*name).to_owned(),
                email: (*email).to_owned(),
                role: rest.first().map_or(Ok(Role::Admin), |role| role.parse())?,
                permissions: rest.get(1).map(|list| parse_permissions(list)).transpose()?,
            }),
            ["permissions", id, list] => Ok(Self::SetPermissions {
                id: AdminId::new(*id)?,
                permissions: parse_permissions(list)?,
            }),
            ["status", id, status] => Ok(Self::SetStatus {
                id: AdminId::new(*id)?,
                status: status.parse()?,
            }),
            ["delete", id] => Ok(Self::Delete {
                id: AdminId::new(*id)?,
            }),
            ["avatar", id, file] => Ok(Self::UploadImage {
                id: AdminId::new(*id)?,
                kind: ProfileImageKind::Avatar,
                file: PathBuf::from(file),
            }),
            ["signature", id, file] => Ok(Self::UploadImage {
                id: AdminId::new(*id)?,
                kind: ProfileImageKind::Signature,
                file: PathBuf::from(file),
            }),
            _ => Err(AppError::Validation(format!(
                "invalid admins command, {USAGE}"
            ))),
        }
    }
}

/// Parses a comma separated permission list. An empty list revokes everything.
fn parse_permissions(list: &str) -> AppResult<BTreeSet<Permission>> {
    list.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::parse)
        .collect()
}

/// Runs one admin command as `actor`. `password` is only read for `create`.
pub async fn execute(
    admins: &AdminService,
    actor: &SessionUser,
    command: AdminCommand,
    password: impl FnOnce() -> AppResult<String>,
) -> AppResult<()> {
    match command {
        AdminCommand::List => {
            let profiles = admins.list_admins(actor).await?;
            for profile in &profiles {
                log_profile("admin", profile);
            }
            info!(admin_count = profiles.len(), "listed admins");
        }
        AdminCommand::Create {
            name,
            email,
            role,
            permissions,
        } => {
            let input = NewAdminProfile {
                name,
                email,
                password: password()?,
                role,
                permissions: permissions
                    .unwrap_or_else(|| role.default_permissions().into_iter().collect()),
                avatar_ref: None,
                department: None,
                phone: None,
            };
            let profile = admins.create_admin(actor, input).await?;
            log_profile("admin created", &profile);
        }
        AdminCommand::SetPermissions { id, permissions } => {
            let profile = admins.update_permissions(actor, &id, permissions).await?;
            log_profile("admin permissions updated", &profile);
        }
        AdminCommand::SetStatus { id, status } => {
            let patch = AdminProfilePatch {
                status: Some(status),
                ..AdminProfilePatch::default()
            };
            let profile = admins.update_admin(actor, &id, patch).await?;
            log_profile("admin status updated", &profile);
        }
        AdminCommand::Delete { id } => {
            admins.delete_admin(actor, &id).await?;
            info!(admin_id = %id, "admin deleted");
        }
        AdminCommand::UploadImage { id, kind, file } => {
            let bytes = tokio::fs::read(&file).await.map_err(|error| {
                AppError::Validation(format!("failed to read '{}': {error}", file.display()))
            })?;
            let url = admins
                .upload_profile_image(actor, &id, kind, file_name(&file), bytes)
                .await?;
            let patch = match kind {
                ProfileImageKind::Avatar => AdminProfilePatch {
                    avatar_ref: Some(url),
                    ..AdminProfilePatch::default()
                },
                ProfileImageKind::Signature => AdminProfilePatch {
                    signature_ref: Some(url),
                    ..AdminProfilePatch::default()
                },
            };
            let profile = admins.update_admin(actor, &id, patch).await?;
            log_profile("admin image updated", &profile);
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("upload")
}

fn log_profile(message: &str, profile: &AdminProfile) {
    info!(
        admin_id = %profile.id,
        email = %profile.email,
        role = profile.role.as_str(),
        status = profile.status.as_str(),
        permissions = profile.permissions.len(),
        "{message}"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use milagro_domain::{AdminStatus, Permission, ProfileImageKind, Role};

    use super::AdminCommand;

    fn arguments(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn create_defaults_to_admin_role_and_role_grants() {
        let command = AdminCommand::parse(&arguments(&["create", "Nisha", "nisha@tiles.example"]));

        assert!(matches!(
            command,
            Ok(AdminCommand::Create {
                role: Role::Admin,
                permissions: None,
                ..
            })
        ));
    }

    #[test]
    fn permission_lists_are_comma_separated() {
        let command = AdminCommand::parse(&arguments(&[
            "permissions",
            "42",
            "orders.view, users.view",
        ]));

        let expected = BTreeSet::from([Permission::OrdersView, Permission::UsersView]);
        assert!(matches!(
            command,
            Ok(AdminCommand::SetPermissions { permissions, .. }) if permissions == expected
        ));
        assert!(AdminCommand::parse(&arguments(&["permissions", "42", "orders.fly"])).is_err());
    }

    #[test]
    fn status_and_image_commands_parse() {
        assert!(matches!(
            AdminCommand::parse(&arguments(&["status", "42", "inactive"])),
            Ok(AdminCommand::SetStatus {
                status: AdminStatus::Inactive,
                ..
            })
        ));
        assert!(matches!(
            AdminCommand::parse(&arguments(&["signature", "42", "sig.png"])),
            Ok(AdminCommand::UploadImage {
                kind: ProfileImageKind::Signature,
                ..
            })
        ));
        assert!(AdminCommand::parse(&arguments(&["delete"])).is_err());
        assert!(AdminCommand::parse(&arguments(&["purge", "42"])).is_err());
    }
}
