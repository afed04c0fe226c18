use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;

use milagro_core::AppError;
use milagro_domain::{AdminStatus, Permission, Role, SessionUser};

use crate::test_support::{FakeProfileRepository, email, profile, provider_user};

use super::{AuthorizationService, can_perform, has_permission};

#[test]
fn superadmin_can_perform_anything() {
    let empty = BTreeSet::new();
    assert!(can_perform(Role::SuperAdmin, &empty, "create", "users"));
    assert!(can_perform(Role::SuperAdmin, &empty, "launch", "rockets"));
}

#[test]
fn admin_with_view_grant_cannot_create() {
    let granted = BTreeSet::from([Permission::UsersView]);
    assert!(can_perform(Role::Admin, &granted, "view", "users"));
    assert!(!can_perform(Role::Admin, &granted, "create", "users"));
}

#[test]
fn wildcard_grant_covers_every_pair() {
    let granted = BTreeSet::from([Permission::All]);
    assert!(can_perform(Role::Admin, &granted, "manage", "settings"));
    assert!(can_perform(Role::Admin, &granted, "launch", "rockets"));
    assert!(!can_perform(Role::Admin, &BTreeSet::new(), "launch", "rockets"));
    assert!(has_permission(&granted, Permission::AdminsManage));
}

#[test]
fn admin_matches_catalog_membership_for_every_pair() {
    let granted = BTreeSet::from([Permission::OrdersEdit, Permission::ProductsView]);
    for permission in Permission::catalog() {
        let expected = granted.contains(permission);
        assert_eq!(
            can_perform(
                Role::Admin,
                &granted,
                permission.action(),
                permission.domain()
            ),
            expected,
            "{permission}"
        );
    }
}

#[tokio::test]
async fn require_permission_reads_current_profile() {
    let stored = profile("7", Role::Admin, &[Permission::AdminsManage]);
    let repository = Arc::new(FakeProfileRepository::with_profiles(vec![stored.clone()]));
    let service = AuthorizationService::new(repository.clone());

    // Session snapshot predates the grant; the stored profile wins.
    let mut actor = provider_user(&stored);
    actor.profile.permissions.clear();

    let result = service.require_permission(&actor, Permission::AdminsManage).await;
    assert!(result.is_ok());
    assert!(service
        .require_permission(&actor, Permission::AdminsManage)
        .await
        .is_ok());
    assert_eq!(repository.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn require_permission_denies_missing_grant() {
    let stored = profile("7", Role::Admin, &[Permission::UsersView]);
    let repository = Arc::new(FakeProfileRepository::with_profiles(vec![stored.clone()]));
    let service = AuthorizationService::new(repository);

    let result = service
        .require_permission(&provider_user(&stored), Permission::AdminsManage)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let allowed = service
        .has_permission_for(&provider_user(&stored), Permission::AdminsManage)
        .await;
    assert_eq!(allowed, Ok(false));
}

#[tokio::test]
async fn inactive_superadmin_is_rejected() {
    let mut stored = profile("1", Role::SuperAdmin, &[]);
    stored.status = AdminStatus::Inactive;
    let repository = Arc::new(FakeProfileRepository::with_profiles(vec![stored.clone()]));
    let service = AuthorizationService::new(repository);

    let result = service
        .require_permission(&provider_user(&stored), Permission::UsersView)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn deleted_actor_is_unauthorized() {
    let stored = profile("3", Role::Admin, &[Permission::AdminsManage]);
    let service = AuthorizationService::new(Arc::new(FakeProfileRepository::default()));

    let result = service
        .require_permission(&provider_user(&stored), Permission::AdminsManage)
        .await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}

#[tokio::test]
async fn bootstrap_actor_skips_profile_lookup() {
    let repository = Arc::new(FakeProfileRepository::default());
    let service = AuthorizationService::new(repository.clone());
    let actor = SessionUser::bootstrap(email("root@tiles.example"), Utc::now());

    let result = service
        .require_permission(&actor, Permission::AdminsManage)
        .await;
    assert!(result.is_ok());
    assert_eq!(repository.lookups.load(Ordering::SeqCst), 0);
}
