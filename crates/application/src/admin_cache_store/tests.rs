use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use milagro_core::AppError;
use milagro_domain::{AdminProfilePatch, AdminStatus, Permission, Role};

use crate::test_support::{FakeProfileRepository, admin_id, draft, profile, timestamp};
use crate::{ChangeHandler, ChangeKind, FeedTable, RowChange};

use super::{AdminCacheOptions, AdminCacheStore};

fn store_with(repository: Arc<FakeProfileRepository>, options: AdminCacheOptions) -> AdminCacheStore {
    AdminCacheStore::new(repository, options)
}

fn seeded_repository() -> Arc<FakeProfileRepository> {
    let mut older = profile("41", Role::Admin, &[Permission::UsersView]);
    older.created_at = timestamp(-600);
    let mut newer = profile("42", Role::Admin, &[Permission::OrdersView]);
    newer.created_at = timestamp(-300);
    Arc::new(FakeProfileRepository::with_profiles(vec![older, newer]))
}

fn row_image(id: &str, status: &str, version: u64) -> serde_json::Value {
    json!({
        "id": id,
        "name": "Replaced Name",
        "email": format!("replaced{id}@tiles.example"),
        "role": "admin",
        "status": status,
        "permissions": ["orders.edit"],
        "avatar_url": "",
        "signature_url": null,
        "department": "Logistics",
        "phone": null,
        "last_login": null,
        "created_at": "2024-04-24T22:55:00Z",
        "version": version
    })
}

fn change(kind: ChangeKind, new: Option<serde_json::Value>, old: Option<serde_json::Value>) -> RowChange {
    RowChange {
        table: FeedTable::Profiles,
        kind,
        new,
        old,
    }
}

#[tokio::test]
async fn fetch_orders_admins_newest_first() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());

    let result = store.fetch().await;
    assert!(result.is_ok());

    let ids: Vec<String> = store
        .list()
        .await
        .iter()
        .map(|admin| admin.id.to_string())
        .collect();
    assert_eq!(ids, vec!["42".to_owned(), "41".to_owned()]);
    assert!(!store.is_loading());
}

#[tokio::test]
async fn insert_notification_is_idempotent() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    let insert = change(ChangeKind::Insert, Some(row_image("77", "active", 1)), None);

    assert!(store.apply_change(insert.clone()).await.is_ok());
    assert!(store.apply_change(insert).await.is_ok());

    let admins = store.list().await;
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].id.as_str(), "77");
}

#[tokio::test]
async fn update_notification_replaces_the_whole_record() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    let cached = store.get(&admin_id("42")).await;
    store.set_selected(cached).await;

    let update = change(
        ChangeKind::Update,
        Some(row_image("42", "inactive", 2)),
        Some(json!({ "id": "42" })),
    );
    assert!(store.apply_change(update).await.is_ok());

    let replaced = store.get(&admin_id("42")).await;
    let replaced = replaced.unwrap_or_else(|| unreachable!());
    assert_eq!(replaced.status, AdminStatus::Inactive);
    assert_eq!(replaced.name, "Replaced Name");
    assert_eq!(replaced.department.as_deref(), Some("Logistics"));
    assert_eq!(
        replaced.permissions.iter().copied().collect::<Vec<_>>(),
        vec![Permission::OrdersEdit]
    );
    assert_eq!(store.selected().await, Some(replaced));
}

#[tokio::test]
async fn stale_update_notification_is_ignored() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    let mut current = profile("42", Role::Admin, &[]);
    current.version = 5;
    assert!(store.apply_update(current).await);

    let update = change(ChangeKind::Update, Some(row_image("42", "inactive", 4)), None);
    assert!(store.apply_change(update).await.is_ok());

    let cached = store.get(&admin_id("42")).await;
    assert_eq!(cached.map(|admin| admin.status), Some(AdminStatus::Active));
}

#[tokio::test]
async fn undecodable_notification_leaves_cache_unchanged() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    let before = store.list().await;

    let update = change(
        ChangeKind::Update,
        Some(json!({ "id": "42", "role": "admin", "status": "inactive" })),
        None,
    );
    let result = store.apply_change(update).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(store.list().await, before);
}

#[tokio::test]
async fn partial_update_without_role_keeps_the_cached_admin() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());

    let update = change(
        ChangeKind::Update,
        Some(json!({ "id": "42", "status": "inactive" })),
        None,
    );
    let result = store.apply_change(update).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(store.list().await.len(), 2);
    let cached = store.get(&admin_id("42")).await;
    assert_eq!(cached.map(|admin| admin.status), Some(AdminStatus::Active));
}

#[tokio::test]
async fn update_to_non_admin_role_drops_the_cached_row() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    let mut image = row_image("42", "active", 2);
    image["role"] = json!("customer");

    let update = change(ChangeKind::Update, Some(image), None);
    assert!(store.apply_change(update).await.is_ok());

    assert_eq!(store.get(&admin_id("42")).await, None);
    assert_eq!(store.list().await.len(), 1);
}

#[tokio::test]
async fn delete_notification_twice_is_a_no_op() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    store.set_selected(store.get(&admin_id("41")).await).await;

    let delete = change(ChangeKind::Delete, None, Some(json!({ "id": "41" })));
    assert!(store.apply_change(delete.clone()).await.is_ok());
    assert!(store.apply_change(delete).await.is_ok());

    assert_eq!(store.list().await.len(), 1);
    assert_eq!(store.selected().await, None);
}

#[tokio::test]
async fn non_admin_rows_are_skipped() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    let mut image = row_image("90", "active", 1);
    image["role"] = json!("customer");

    let insert = change(ChangeKind::Insert, Some(image), None);
    assert!(store.apply_change(insert).await.is_ok());
    assert!(store.list().await.is_empty());
}

#[tokio::test]
async fn concurrent_creates_land_once_newest_first() {
    let repository = Arc::new(FakeProfileRepository::default());
    repository
        .delay_calls(&[Duration::from_millis(60), Duration::ZERO])
        .await;
    let store = store_with(Arc::clone(&repository), AdminCacheOptions::default());

    let (first, second) = tokio::join!(store.create(draft("Asha")), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.create(draft("Bilal")).await
    });
    let first = first.unwrap_or_else(|_| unreachable!());
    let second = second.unwrap_or_else(|_| unreachable!());

    // Feed echoes of both inserts arrive after the remote responses.
    assert!(!store.apply_insert(first.clone()).await);
    assert!(!store.apply_insert(second.clone()).await);

    let names: Vec<String> = store.list().await.into_iter().map(|admin| admin.name).collect();
    assert_eq!(names, vec!["Bilal".to_owned(), "Asha".to_owned()]);
}

#[tokio::test]
async fn create_after_feed_delivery_does_not_duplicate() {
    let repository = Arc::new(FakeProfileRepository::default());
    let store = store_with(Arc::clone(&repository), AdminCacheOptions::default());

    let created = store.create(draft("Chen")).await;
    let created = created.unwrap_or_else(|_| unreachable!());
    assert!(!store.apply_insert(created).await);
    assert_eq!(store.list().await.len(), 1);
}

#[tokio::test]
async fn failed_create_sets_error_and_keeps_collection() {
    let repository = seeded_repository();
    let store = store_with(Arc::clone(&repository), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    repository
        .fail_next(AppError::Unavailable("network down".to_owned()))
        .await;

    let result = store.create(draft("Dana")).await;

    assert!(matches!(result, Err(AppError::Unavailable(_))));
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.admins.len(), 2);
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.error.as_deref(), Some("unavailable: network down"));
}

#[tokio::test]
async fn update_merges_remote_record_and_selection() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    store.set_selected(store.get(&admin_id("41")).await).await;

    let patch = AdminProfilePatch {
        phone: Some("+91 22 5555".to_owned()),
        ..AdminProfilePatch::default()
    };
    let updated = store.update(&admin_id("41"), patch).await;
    let updated = updated.unwrap_or_else(|_| unreachable!());

    assert_eq!(updated.version, 2);
    assert_eq!(store.get(&admin_id("41")).await, Some(updated.clone()));
    assert_eq!(store.selected().await, Some(updated));
}

#[tokio::test]
async fn update_runs_remotely_for_uncached_ids() {
    let repository = seeded_repository();
    let store = store_with(Arc::clone(&repository), AdminCacheOptions::default());

    let result = store
        .update(&admin_id("42"), AdminProfilePatch::permissions(Default::default()))
        .await;

    assert!(result.is_ok());
    assert!(store.list().await.is_empty());
    assert!(repository.calls.lock().await.contains(&"update:42".to_owned()));
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());

    let patch = AdminProfilePatch {
        name: Some("Renamed".to_owned()),
        expected_version: Some(7),
        ..AdminProfilePatch::default()
    };
    let result = store.update(&admin_id("42"), patch).await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(
        store.get(&admin_id("42")).await.map(|admin| admin.name),
        Some("Admin 42".to_owned())
    );

    let result = store.delete_at_version(&admin_id("42"), 9).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(store.list().await.len(), 2);
}

#[tokio::test]
async fn delete_clears_selection_and_tolerates_missing_ids() {
    let store = store_with(seeded_repository(), AdminCacheOptions::default());
    assert!(store.fetch().await.is_ok());
    store.set_selected(store.get(&admin_id("42")).await).await;

    assert!(store.delete(&admin_id("42")).await.is_ok());
    assert!(store.delete(&admin_id("42")).await.is_ok());

    assert_eq!(store.selected().await, None);
    assert_eq!(store.list().await.len(), 1);
}

#[tokio::test]
async fn slow_remote_calls_time_out() {
    let repository = seeded_repository();
    repository.delay_calls(&[Duration::from_millis(200)]).await;
    let store = store_with(
        repository,
        AdminCacheOptions {
            remote_timeout: Duration::from_millis(20),
            reconcile_on_error: false,
        },
    );

    let result = store.fetch().await;

    assert!(matches!(result, Err(AppError::Timeout(_))));
    assert!(result.err().is_some_and(|error| error.is_retryable()));
    assert!(!store.is_loading());
}

#[tokio::test]
async fn loading_flag_tracks_in_flight_calls() {
    let repository = seeded_repository();
    repository.delay_calls(&[Duration::from_millis(80)]).await;
    let store = Arc::new(store_with(repository, AdminCacheOptions::default()));

    let background = Arc::clone(&store);
    let task = tokio::spawn(async move { background.fetch().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(store.is_loading());

    let result = task.await;
    assert!(result.is_ok_and(|outcome| outcome.is_ok()));
    assert!(!store.is_loading());
}

#[tokio::test]
async fn reconcile_on_error_refetches_after_failed_mutation() {
    let repository = seeded_repository();
    let store = store_with(
        Arc::clone(&repository),
        AdminCacheOptions {
            reconcile_on_error: true,
            ..AdminCacheOptions::default()
        },
    );
    repository
        .fail_next(AppError::Unavailable("gateway".to_owned()))
        .await;

    let result = store.delete(&admin_id("41")).await;

    assert!(result.is_err());
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.admins.len(), 2);
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn successful_fetch_clears_error() {
    let repository = seeded_repository();
    let store = store_with(Arc::clone(&repository), AdminCacheOptions::default());
    repository
        .fail_next(AppError::Unavailable("gateway".to_owned()))
        .await;

    assert!(store.fetch().await.is_err());
    assert!(store.error().await.is_some());
    assert!(store.resynchronize().await.is_ok());
    assert_eq!(store.error().await, None);
}
