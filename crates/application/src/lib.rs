//! Application services and ports.

#![forbid(unsafe_code)]

mod activity_feed;
mod admin_cache_store;
mod admin_ports;
mod admin_service;
mod analytics_feed;
mod analytics_ports;
mod authorization_service;
mod change_feed_ports;
mod change_feed_synchronizer;
mod session_ports;
mod session_service;
mod subscription_registry;

#[cfg(test)]
mod test_support;

pub use activity_feed::{ActivityFeed, RECENT_ACTIVITY_LIMIT};
pub use admin_cache_store::{AdminCacheOptions, AdminCacheSnapshot, AdminCacheStore};
pub use admin_ports::{ActivityLogRepository, FileStorage, ProfileFilter, ProfileRepository};
pub use admin_service::AdminService;
pub use analytics_feed::{ANALYTICS_TABLES, AnalyticsFeed};
pub use analytics_ports::AnalyticsSource;
pub use authorization_service::{
    AuthorizationService, can_perform, has_permission, profile_has_permission,
};
pub use change_feed_ports::{
    ChangeFeed, ChangeFilter, ChangeHandler, ChangeKind, ChangeStream, ColumnPredicate,
    FeedTable, RowChange,
};
pub use change_feed_synchronizer::{ChangeFeedSynchronizer, ReconnectPolicy, SyncStatus};
pub use session_ports::{AuthProvider, AuthSession, AuthUser, CreateAuthUser, SessionStore};
pub use session_service::{BOOTSTRAP_SESSION_TTL_SECONDS, BootstrapCredential, SessionService};
pub use subscription_registry::SubscriptionRegistry;
