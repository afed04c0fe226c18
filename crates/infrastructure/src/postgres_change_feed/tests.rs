use std::collections::BTreeSet;
use std::time::Duration;

use milagro_application::{
    ChangeFeed, ChangeFilter, ChangeKind, FeedTable, ProfileRepository,
};
use milagro_domain::{AdminProfile, AdminStatus, EmailAddress, ProfileDraft, Role};
use serde_json::json;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::{PostgresChangeFeed, decode_payload};
use crate::PostgresProfileRepository;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(4)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres change feed tests: {error}");
    }

    Some(pool)
}

#[test]
fn trigger_payloads_decode_into_row_changes() {
    let payload = json!({
        "table": "profiles",
        "type": "DELETE",
        "record": null,
        "old_record": { "id": "a1", "role": "admin" }
    })
    .to_string();

    let change = decode_payload(payload.as_str()).unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(change.table, FeedTable::Profiles);
    assert_eq!(change.kind, ChangeKind::Delete);
    assert_eq!(change.new, None);
    assert_eq!(
        change.old.as_ref().and_then(|image| image.get("id")),
        Some(&json!("a1"))
    );
}

#[test]
fn unknown_tables_are_rejected() {
    let payload = r#"{"table":"orders","type":"INSERT","record":{}}"#;
    assert!(decode_payload(payload).is_err());
}

#[tokio::test]
async fn inserted_profiles_arrive_as_decodable_images() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let feed = PostgresChangeFeed::new(pool.clone());
    let repository = PostgresProfileRepository::new(pool);

    let email = format!("kiln-{}@tiles.example", Uuid::new_v4().simple());
    let filter = ChangeFilter::table(FeedTable::Profiles)
        .with_kinds(&[ChangeKind::Insert])
        .with_predicate("email", email.as_str());
    let mut stream = feed
        .subscribe(filter)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let created = repository
        .insert_profile(ProfileDraft {
            id: None,
            name: "Kiln".to_owned(),
            email: EmailAddress::new(email).unwrap_or_else(|_| unreachable!()),
            role: Role::Admin,
            status: AdminStatus::Active,
            permissions: BTreeSet::new(),
            avatar_ref: String::new(),
            signature_ref: None,
            department: None,
            phone: None,
        })
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let change = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| panic!("no row change delivered"));
    let image = change
        .current_image()
        .cloned()
        .unwrap_or_else(|| panic!("insert without row image"));
    let decoded: AdminProfile =
        serde_json::from_value(image).unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(decoded, created);
}
