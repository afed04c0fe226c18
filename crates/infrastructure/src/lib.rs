//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_auth_provider;
mod http_file_storage;
mod in_memory_remote_store;
mod postgres_activity_log_repository;
mod postgres_analytics_source;
mod postgres_change_feed;
mod postgres_profile_repository;
mod remote_endpoint;
mod session_store;

pub use http_auth_provider::HttpAuthProvider;
pub use http_file_storage::HttpFileStorage;
pub use in_memory_remote_store::InMemoryRemoteStore;
pub use postgres_activity_log_repository::PostgresActivityLogRepository;
pub use postgres_analytics_source::PostgresAnalyticsSource;
pub use postgres_change_feed::{PostgresChangeFeed, ROW_CHANGE_CHANNEL};
pub use postgres_profile_repository::PostgresProfileRepository;
pub use remote_endpoint::RemoteEndpoint;
pub use session_store::{FileSessionStore, InMemorySessionStore};
