//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod activity;
mod admin;
mod analytics;
mod security;
mod session;
mod storage;
mod user;

pub use activity::{ActivityAction, ActivityLogEntry, ActivityLogView, NewActivityLogEntry};
pub use admin::{AdminId, AdminProfile, AdminProfilePatch, AdminStatus, NewAdminProfile, ProfileDraft};
pub use analytics::{
    ChartPoint, ChartSeries, DashboardMetric, DashboardMetrics, MetricKind, MetricReading,
    MetricReadings, OrderStatus, percent_change,
};
pub use security::{Permission, PermissionGroup, Role, permission_groups};
pub use session::{
    BOOTSTRAP_ADMIN_ID, SessionOrigin, SessionUser, StoredSession, bootstrap_admin_id,
};
pub use storage::{ProfileImageKind, StorageBucket, generate_file_path, profile_image_prefix};
pub use user::{
    EmailAddress, PASSWORD_MAX_LENGTH, PASSWORD_MIN_LENGTH, validate_login_input,
    validate_password,
};
