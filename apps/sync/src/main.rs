//! Milagro admin dashboard sync daemon.

#![forbid(unsafe_code)]

mod admin_commands;
mod sync_config;

use std::sync::Arc;

use milagro_application::{
    ActivityFeed, ActivityLogRepository, AdminCacheOptions, AdminCacheStore, AdminService,
    AnalyticsFeed, AnalyticsSource, AuthProvider, AuthorizationService, ChangeFeed, ChangeFeedSynchronizer, ChangeFilter,
    ChangeKind, FeedTable, ProfileRepository, SessionService, SubscriptionRegistry, SyncStatus,
};
use milagro_core::{AppError, AppResult};
use milagro_domain::{Permission, SessionUser};
use milagro_infrastructure::{
    FileSessionStore, HttpAuthProvider, HttpFileStorage, PostgresActivityLogRepository,
    PostgresAnalyticsSource, PostgresChangeFeed, PostgresProfileRepository, RemoteEndpoint,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::sync_config::{
    SyncCommand, SyncConfig, init_tracing, login_credentials, new_admin_password,
};

const PROFILES_SUBSCRIPTION: &str = "admin_profiles_changes";
const ACTIVITY_SUBSCRIPTION: &str = "admin-activities";
const ANALYTICS_SUBSCRIPTIONS: [(&str, FeedTable); 3] = [
    ("orders-changes", FeedTable::Orders),
    ("profiles-changes", FeedTable::Profiles),
    ("revenue-changes", FeedTable::RevenueAnalytics),
];

struct SyncRuntime {
    profiles: Arc<dyn ProfileRepository>,
    activity: Arc<dyn ActivityLogRepository>,
    analytics: Arc<dyn AnalyticsSource>,
    feed: Arc<dyn ChangeFeed>,
    authorization: AuthorizationService,
    sessions: SessionService,
    admins: AdminService,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SyncConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    if config.command == SyncCommand::Migrate {
        info!("migrations applied");
        return Ok(());
    }

    let runtime = build_runtime(&config, pool)?;
    match config.command.clone() {
        SyncCommand::Migrate => Ok(()),
        SyncCommand::Login => {
            let (email, password) = login_credentials()?;
            let user = runtime
                .sessions
                .login(email.as_str(), password.as_str())
                .await?;
            log_session_user("signed in", &user);
            Ok(())
        }
        SyncCommand::Logout => {
            runtime.sessions.logout().await?;
            info!("signed out");
            Ok(())
        }
        SyncCommand::Whoami => {
            let user = runtime.sessions.current_user().await?;
            log_session_user("current session", &user);
            Ok(())
        }
        SyncCommand::Admins(command) => {
            let actor = runtime.sessions.current_user().await?;
            admin_commands::execute(&runtime.admins, &actor, command, new_admin_password).await
        }
        SyncCommand::Run => run(runtime, &config).await,
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn build_runtime(config: &SyncConfig, pool: PgPool) -> AppResult<SyncRuntime> {
    let http_client = reqwest::Client::builder()
        .timeout(config.remote_timeout)
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
    let endpoint = RemoteEndpoint::new(
        http_client,
        config.auth_url.as_str(),
        config.service_key.as_str(),
    )?;

    let profiles: Arc<dyn ProfileRepository> =
        Arc::new(PostgresProfileRepository::new(pool.clone()));
    let activity: Arc<dyn ActivityLogRepository> =
        Arc::new(PostgresActivityLogRepository::new(pool.clone()));
    let analytics: Arc<dyn AnalyticsSource> =
        Arc::new(PostgresAnalyticsSource::new(pool.clone()));
    let feed: Arc<dyn ChangeFeed> = Arc::new(PostgresChangeFeed::new(pool));
    let auth: Arc<dyn AuthProvider> = Arc::new(HttpAuthProvider::new(endpoint.clone()));
    let sessions = SessionService::new(
        auth.clone(),
        profiles.clone(),
        Arc::new(FileSessionStore::new(config.session_path.clone())),
        config.bootstrap.clone(),
    );
    let authorization = AuthorizationService::new(profiles.clone());
    let admins = AdminService::new(
        authorization.clone(),
        profiles.clone(),
        activity.clone(),
        auth,
        Arc::new(HttpFileStorage::new(endpoint)),
    );

    Ok(SyncRuntime {
        authorization,
        admins,
        profiles,
        activity,
        analytics,
        feed,
        sessions,
    })
}

async fn run(runtime: SyncRuntime, config: &SyncConfig) -> AppResult<()> {
    let actor = runtime.sessions.current_user().await?;
    runtime
        .authorization
        .require_permission(&actor, Permission::AdminsManage)
        .await?;
    log_session_user("syncing admin dashboard", &actor);

    let cache = Arc::new(AdminCacheStore::new(
        runtime.profiles.clone(),
        AdminCacheOptions {
            remote_timeout: config.remote_timeout,
            reconcile_on_error: true,
        },
    ));
    cache.fetch().await?;
    info!(admin_count = cache.list().await.len(), "admin cache loaded");

    let activity_feed = Arc::new(ActivityFeed::new(runtime.activity.clone()));
    if let Err(error) = activity_feed.refresh().await {
        warn!(error = %error, "initial activity refresh failed");
    }

    let analytics_feed = Arc::new(AnalyticsFeed::new(runtime.analytics.clone()));
    analytics_feed.refresh().await;

    let mut registry = SubscriptionRegistry::new();
    registry.subscribe(
        PROFILES_SUBSCRIPTION,
        ChangeFeedSynchronizer::new(
            runtime.feed.clone(),
            cache.clone(),
            ChangeFilter::table(FeedTable::Profiles),
            config.reconnect,
        ),
    );
    registry.subscribe(
        ACTIVITY_SUBSCRIPTION,
        ChangeFeedSynchronizer::new(
            runtime.feed.clone(),
            activity_feed.clone(),
            ChangeFilter::table(FeedTable::UserActivityLogs).with_kinds(&[ChangeKind::Insert]),
            config.reconnect,
        ),
    );

    for (name, table) in ANALYTICS_SUBSCRIPTIONS {
        registry.subscribe(
            name,
            ChangeFeedSynchronizer::new(
                runtime.feed.clone(),
                analytics_feed.clone(),
                ChangeFilter::table(table),
                config.reconnect,
            ),
        );
    }

    let watchers: Vec<JoinHandle<()>> = registry
        .names()
        .filter_map(|name| {
            registry
                .status(name)
                .map(|status| watch_status(name.to_owned(), status))
        })
        .collect();

    info!(subscriptions = registry.len(), "milagro-sync started");
    tokio::signal::ctrl_c()
        .await
        .map_err(|error| AppError::Internal(format!("failed to listen for shutdown: {error}")))?;

    registry.unsubscribe_all();
    for watcher in watchers {
        watcher.abort();
    }
    let metrics = analytics_feed.metrics().await;
    info!(
        admin_count = cache.list().await.len(),
        activity_count = activity_feed.entries().await.len(),
        total_users = metrics.total_users.value,
        active_orders = metrics.active_orders.value,
        "milagro-sync stopped"
    );
    Ok(())
}

fn watch_status(name: String, mut status: watch::Receiver<SyncStatus>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match current {
                SyncStatus::Subscribed => info!(subscription = %name, "change feed subscribed"),
                SyncStatus::Unsubscribed => info!(subscription = %name, "change feed closed"),
                SyncStatus::Reconnecting { attempt } => {
                    warn!(subscription = %name, attempt, "change feed reconnecting");
                }
                SyncStatus::Degraded {
                    attempt,
                    last_error,
                } => warn!(
                    subscription = %name,
                    attempt,
                    error = %last_error,
                    "change feed degraded, cached data may be stale"
                ),
            }
        }
    })
}

fn log_session_user(message: &str, user: &SessionUser) {
    info!(
        admin_id = %user.profile.id,
        email = %user.profile.email,
        role = user.profile.role.as_str(),
        origin = ?user.origin,
        "{message}"
    );
}
