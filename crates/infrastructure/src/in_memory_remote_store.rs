use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::warn;
use uuid::Uuid;

use milagro_application::{
    ActivityLogRepository, AnalyticsSource, AuthProvider, AuthSession, AuthUser, ChangeFeed, ChangeFilter,
    ChangeKind, ChangeStream, CreateAuthUser, FeedTable, FileStorage, ProfileFilter,
    ProfileRepository, RowChange,
};
use milagro_core::{AppError, AppResult};
use milagro_domain::{
    ActivityLogEntry, ActivityLogView, AdminId, AdminProfile, AdminProfilePatch, ChartPoint,
    ChartSeries, EmailAddress, MetricReading, MetricReadings, NewActivityLogEntry, OrderStatus,
    ProfileDraft, StorageBucket, percent_change,
};

const CHANGE_BUFFER: usize = 256;
const SESSION_TTL_SECONDS: i64 = 3600;
const METRIC_WINDOW_DAYS: i64 = 30;

struct Account {
    user: AuthUser,
    password_digest: [u8; 32],
}

#[derive(Clone)]
struct OrderRecord {
    id: String,
    status: OrderStatus,
    total_amount: f64,
    created_at: DateTime<Utc>,
}

impl OrderRecord {
    fn image(&self) -> Value {
        json!({
            "id": self.id,
            "status": self.status.as_str(),
            "total_amount": self.total_amount,
            "created_at": self.created_at,
        })
    }
}

/// Process-local stand-in for the hosted backend.
///
/// Holds profiles, the activity trail, orders, daily revenue, auth accounts
/// and stored objects, and publishes row changes for every table. Deleting an
/// auth account cascades to its profile like the hosted store does.
pub struct InMemoryRemoteStore {
    profiles: RwLock<Vec<AdminProfile>>,
    activity: RwLock<Vec<ActivityLogEntry>>,
    accounts: RwLock<HashMap<AdminId, Account>>,
    tokens: RwLock<HashMap<String, AdminId>>,
    objects: RwLock<BTreeMap<(StorageBucket, String), Vec<u8>>>,
    orders: RwLock<Vec<OrderRecord>>,
    revenue: RwLock<BTreeMap<NaiveDate, f64>>,
    changes: Mutex<broadcast::Sender<RowChange>>,
    public_base_url: String,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new("memory://storage")
    }
}

impl InMemoryRemoteStore {
    /// Creates an empty store whose public object URLs start with `public_base_url`.
    #[must_use]
    pub fn new(public_base_url: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            profiles: RwLock::new(Vec::new()),
            activity: RwLock::new(Vec::new()),
            accounts: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            objects: RwLock::new(BTreeMap::new()),
            orders: RwLock::new(Vec::new()),
            revenue: RwLock::new(BTreeMap::new()),
            changes: Mutex::new(changes),
            public_base_url: public_base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Ends every open change stream, as a dropped realtime connection would.
    pub async fn interrupt_change_feeds(&self) {
        let (replacement, _) = broadcast::channel(CHANGE_BUFFER);
        *self.changes.lock().await = replacement;
    }

    /// Returns the bytes of a stored object.
    pub async fn object(&self, bucket: StorageBucket, path: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(&(bucket, path.to_owned()))
            .cloned()
    }

    /// Places an order and returns its id.
    pub async fn place_order(&self, status: OrderStatus, total_amount: f64) -> AppResult<String> {
        if !total_amount.is_finite() || total_amount < 0.0 {
            return Err(AppError::Validation(format!(
                "order total must be a non-negative amount, got {total_amount}"
            )));
        }

        let order = OrderRecord {
            id: Uuid::new_v4().to_string(),
            status,
            total_amount,
            created_at: Utc::now(),
        };
        self.orders.write().await.push(order.clone());

        self.publish(FeedTable::Orders, ChangeKind::Insert, Some(order.image()), None)
            .await;
        Ok(order.id)
    }

    /// Moves an order to another status.
    pub async fn set_order_status(&self, id: &str, status: OrderStatus) -> AppResult<()> {
        let (old, updated) = {
            let mut orders = self.orders.write().await;
            let order = orders
                .iter_mut()
                .find(|order| order.id == id)
                .ok_or_else(|| AppError::NotFound(format!("order '{id}' does not exist")))?;
            let old = order.image();
            order.status = status;
            (old, order.image())
        };

        self.publish(FeedTable::Orders, ChangeKind::Update, Some(updated), Some(old))
            .await;
        Ok(())
    }

    /// Sets the revenue total of one day.
    pub async fn record_revenue(&self, day: NaiveDate, amount: f64) {
        let previous = self.revenue.write().await.insert(day, amount);
        let image = |amount: f64| json!({ "day": day, "amount": amount });

        let (kind, old) = match previous {
            Some(previous) => (ChangeKind::Update, Some(image(previous))),
            None => (ChangeKind::Insert, None),
        };
        self.publish(FeedTable::RevenueAnalytics, kind, Some(image(amount)), old)
            .await;
    }

    async fn publish(
        &self,
        table: FeedTable,
        kind: ChangeKind,
        new: Option<Value>,
        old: Option<Value>,
    ) {
        let change = RowChange {
            table,
            kind,
            new,
            old,
        };
        // No receivers is not an error.
        let _ = self.changes.lock().await.send(change);
    }

    async fn remove_profile(&self, id: &AdminId, expected_version: Option<u64>) -> AppResult<()> {
        let removed = {
            let mut profiles = self.profiles.write().await;
            let Some(index) = profiles.iter().position(|profile| &profile.id == id) else {
                return Ok(());
            };
            if let Some(expected) = expected_version
                && profiles[index].version != expected
            {
                return Err(AppError::Conflict(format!(
                    "profile '{id}' was modified (expected version {expected}, found {})",
                    profiles[index].version
                )));
            }
            profiles.remove(index)
        };

        self.publish(
            FeedTable::Profiles,
            ChangeKind::Delete,
            None,
            Some(row_image(&removed)?),
        )
        .await;
        Ok(())
    }
}

fn row_image<T: serde::Serialize>(value: &T) -> AppResult<Value> {
    serde_json::to_value(value)
        .map_err(|error| AppError::Internal(format!("failed to encode row image: {error}")))
}

fn digest(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// Counts values in the trailing window and in the window before it.
fn windowed<T>(
    values: impl Iterator<Item = T>,
    weight: impl Fn(&T) -> f64,
    days_ago: impl Fn(&T) -> i64,
) -> (f64, f64) {
    values.fold((0.0, 0.0), |(recent, previous), value| {
        match days_ago(&value) {
            age if age < METRIC_WINDOW_DAYS => (recent + weight(&value), previous),
            age if age < METRIC_WINDOW_DAYS * 2 => (recent, previous + weight(&value)),
            _ => (recent, previous),
        }
    })
}

fn reading(value: f64, recent: f64, previous: f64) -> Option<MetricReading> {
    Some(MetricReading {
        value,
        change: percent_change(recent, previous),
    })
}

fn distribution<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<ChartPoint> {
    let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_default() += 1.0;
    }

    let mut points: Vec<ChartPoint> = counts
        .into_iter()
        .map(|(name, value)| ChartPoint {
            name: name.to_owned(),
            value,
        })
        .collect();
    points.sort_by(|left, right| right.value.total_cmp(&left.value));
    points
}

fn trend(days: impl Iterator<Item = (NaiveDate, f64)>) -> Vec<ChartPoint> {
    let mut totals: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (day, value) in days {
        *totals.entry(day).or_default() += value;
    }

    totals
        .into_iter()
        .map(|(day, value)| ChartPoint {
            name: day.format("%Y-%m-%d").to_string(),
            value,
        })
        .collect()
}

#[async_trait]
impl ProfileRepository for InMemoryRemoteStore {
    async fn list_profiles(&self, filter: ProfileFilter) -> AppResult<Vec<AdminProfile>> {
        let mut profiles: Vec<AdminProfile> = self
            .profiles
            .read()
            .await
            .iter()
            .filter(|profile| filter.matches(profile))
            .cloned()
            .collect();
        profiles.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(profiles)
    }

    async fn find_profile(&self, id: &AdminId) -> AppResult<Option<AdminProfile>> {
        Ok(self
            .profiles
            .read()
            .await
            .iter()
            .find(|profile| &profile.id == id)
            .cloned())
    }

    async fn insert_profile(&self, draft: ProfileDraft) -> AppResult<AdminProfile> {
        let id = match draft.id {
            Some(id) => id,
            None => AdminId::new(Uuid::new_v4().to_string())?,
        };

        let profile = {
            let mut profiles = self.profiles.write().await;
            if profiles
                .iter()
                .any(|profile| profile.id == id || profile.email == draft.email)
            {
                return Err(AppError::Conflict(format!(
                    "profile '{id}' or email '{}' already exists",
                    draft.email
                )));
            }

            let profile = AdminProfile {
                id,
                name: draft.name,
                email: draft.email,
                role: draft.role,
                status: draft.status,
                permissions: draft.permissions,
                avatar_ref: draft.avatar_ref,
                signature_ref: draft.signature_ref,
                department: draft.department,
                phone: draft.phone,
                last_login_at: None,
                created_at: Utc::now(),
                version: 1,
            };
            profiles.push(profile.clone());
            profile
        };

        self.publish(
            FeedTable::Profiles,
            ChangeKind::Insert,
            Some(row_image(&profile)?),
            None,
        )
        .await;
        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: &AdminId,
        patch: AdminProfilePatch,
    ) -> AppResult<AdminProfile> {
        let (old, updated) = {
            let mut profiles = self.profiles.write().await;
            let profile = profiles
                .iter_mut()
                .find(|profile| &profile.id == id)
                .ok_or_else(|| AppError::NotFound(format!("profile '{id}' does not exist")))?;

            if let Some(expected) = patch.expected_version
                && profile.version != expected
            {
                return Err(AppError::Conflict(format!(
                    "profile '{id}' was modified (expected version {expected}, found {})",
                    profile.version
                )));
            }

            let old = profile.clone();
            profile.apply_patch(&patch);
            profile.version += 1;
            (old, profile.clone())
        };

        self.publish(
            FeedTable::Profiles,
            ChangeKind::Update,
            Some(row_image(&updated)?),
            Some(row_image(&old)?),
        )
        .await;
        Ok(updated)
    }

    async fn delete_profile(&self, id: &AdminId, expected_version: Option<u64>) -> AppResult<()> {
        self.remove_profile(id, expected_version).await
    }

    async fn touch_last_login(&self, id: &AdminId, at: DateTime<Utc>) -> AppResult<()> {
        let patch_result = {
            let mut profiles = self.profiles.write().await;
            profiles
                .iter_mut()
                .find(|profile| &profile.id == id)
                .map(|profile| {
                    let old = profile.clone();
                    profile.last_login_at = Some(at);
                    profile.version += 1;
                    (old, profile.clone())
                })
        };

        if let Some((old, updated)) = patch_result {
            self.publish(
                FeedTable::Profiles,
                ChangeKind::Update,
                Some(row_image(&updated)?),
                Some(row_image(&old)?),
            )
            .await;
        }
        Ok(())
    }
}

#[async_trait]
impl ActivityLogRepository for InMemoryRemoteStore {
    async fn append_entry(&self, entry: NewActivityLogEntry) -> AppResult<ActivityLogEntry> {
        let stored = ActivityLogEntry {
            id: Uuid::new_v4().to_string(),
            actor_user_id: entry.actor_user_id,
            action: entry.action,
            details: entry.details,
            created_at: Utc::now(),
        };
        self.activity.write().await.push(stored.clone());

        self.publish(
            FeedTable::UserActivityLogs,
            ChangeKind::Insert,
            Some(row_image(&stored)?),
            None,
        )
        .await;
        Ok(stored)
    }

    async fn list_recent(&self, limit: usize) -> AppResult<Vec<ActivityLogView>> {
        let profiles = self.profiles.read().await;
        let activity = self.activity.read().await;

        let mut entries: Vec<&ActivityLogEntry> = activity.iter().collect();
        entries.sort_by(|left, right| right.created_at.cmp(&left.created_at));

        Ok(entries
            .into_iter()
            .take(limit)
            .map(|entry| {
                let actor = profiles
                    .iter()
                    .find(|profile| profile.id == entry.actor_user_id);
                ActivityLogView {
                    entry: entry.clone(),
                    actor_name: actor.map(|profile| profile.name.clone()),
                    actor_role: actor.map(|profile| profile.role),
                }
            })
            .collect())
    }
}

#[async_trait]
impl AnalyticsSource for InMemoryRemoteStore {
    async fn fetch_metrics(&self) -> AppResult<MetricReadings> {
        let now = Utc::now();
        let today = now.date_naive();
        let profiles = self.profiles.read().await;
        let orders = self.orders.read().await;
        let revenue = self.revenue.read().await;

        let (users_recent, users_previous) = windowed(
            profiles.iter(),
            |_| 1.0,
            |profile| (now - profile.created_at).num_days(),
        );
        let (orders_recent, orders_previous) = windowed(
            orders.iter(),
            |_| 1.0,
            |order| (now - order.created_at).num_days(),
        );
        let (revenue_recent, revenue_previous) = windowed(
            revenue.iter(),
            |(_, amount)| **amount,
            |(day, _)| (today - **day).num_days(),
        );

        let active = orders.iter().filter(|order| order.status.is_active()).count();
        let pending = orders
            .iter()
            .filter(|order| order.status == OrderStatus::Pending)
            .count();

        Ok(MetricReadings {
            total_users: reading(profiles.len() as f64, users_recent, users_previous),
            active_orders: reading(active as f64, orders_recent, orders_previous),
            revenue: reading(revenue_recent, revenue_recent, revenue_previous),
            pending_approvals: Some(MetricReading {
                value: pending as f64,
                change: 0.0,
            }),
        })
    }

    async fn fetch_series(&self, series: ChartSeries) -> AppResult<Vec<ChartPoint>> {
        Ok(match series {
            ChartSeries::RevenueTrend => {
                trend(self.revenue.read().await.iter().map(|(day, amount)| (*day, *amount)))
            }
            ChartSeries::UserTrend => trend(
                self.profiles
                    .read()
                    .await
                    .iter()
                    .map(|profile| (profile.created_at.date_naive(), 1.0)),
            ),
            ChartSeries::UserTypes => distribution(
                self.profiles
                    .read()
                    .await
                    .iter()
                    .map(|profile| profile.role.as_str()),
            ),
            ChartSeries::OrderStatus => distribution(
                self.orders
                    .read()
                    .await
                    .iter()
                    .map(|order| order.status.as_str()),
            ),
        })
    }
}

#[async_trait]
impl FileStorage for InMemoryRemoteStore {
    async fn upload(
        &self,
        bucket: StorageBucket,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> AppResult<String> {
        self.objects
            .write()
            .await
            .insert((bucket, path.to_owned()), bytes);
        Ok(self.public_url(bucket, path))
    }

    fn public_url(&self, bucket: StorageBucket, path: &str) -> String {
        format!("{}/{}/{path}", self.public_base_url, bucket.as_str())
    }

    async fn remove(&self, bucket: StorageBucket, paths: &[String]) -> AppResult<()> {
        let mut objects = self.objects.write().await;
        for path in paths {
            objects.remove(&(bucket, path.clone()));
        }
        Ok(())
    }

    async fn remove_prefix(&self, bucket: StorageBucket, prefix: &str) -> AppResult<()> {
        self.objects
            .write()
            .await
            .retain(|(stored_bucket, path), _| *stored_bucket != bucket || !path.starts_with(prefix));
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for InMemoryRemoteStore {
    async fn subscribe(&self, filter: ChangeFilter) -> AppResult<ChangeStream> {
        let mut receiver = self.changes.lock().await.subscribe();
        let (sender, stream) = ChangeStream::channel(CHANGE_BUFFER);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    () = sender.closed() => break,
                    received = receiver.recv() => received,
                };

                match received {
                    Ok(change) => {
                        if filter.matches(&change) && sender.send(change).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Ending the stream makes the synchronizer resynchronize.
                        warn!(table = %filter.table, skipped, "change subscriber lagged behind");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(stream)
    }
}

#[async_trait]
impl AuthProvider for InMemoryRemoteStore {
    async fn create_user(&self, input: CreateAuthUser) -> AppResult<AuthUser> {
        let mut accounts = self.accounts.write().await;
        if accounts
            .values()
            .any(|account| account.user.email == input.email)
        {
            return Err(AppError::Conflict(format!(
                "a user with email '{}' has already been registered",
                input.email
            )));
        }

        let user = AuthUser {
            id: AdminId::new(Uuid::new_v4().to_string())?,
            email: input.email,
        };
        accounts.insert(
            user.id.clone(),
            Account {
                user: user.clone(),
                password_digest: digest(input.password.as_str()),
            },
        );
        Ok(user)
    }

    async fn delete_user(&self, id: &AdminId) -> AppResult<()> {
        if self.accounts.write().await.remove(id).is_none() {
            return Err(AppError::NotFound(format!("user '{id}' does not exist")));
        }
        self.tokens.write().await.retain(|_, owner| owner != id);
        self.remove_profile(id, None).await
    }

    async fn sign_in_with_password(
        &self,
        email: &EmailAddress,
        password: &str,
    ) -> AppResult<AuthSession> {
        let user = self
            .accounts
            .read()
            .await
            .values()
            .find(|account| {
                &account.user.email == email && account.password_digest == digest(password)
            })
            .map(|account| account.user.clone())
            .ok_or_else(|| AppError::Unauthorized("invalid login credentials".to_owned()))?;

        let access_token = Uuid::new_v4().simple().to_string();
        self.tokens
            .write()
            .await
            .insert(access_token.clone(), user.id.clone());

        Ok(AuthSession {
            access_token,
            refresh_token: Some(Uuid::new_v4().simple().to_string()),
            expires_at: Utc::now() + Duration::seconds(SESSION_TTL_SECONDS),
            user,
        })
    }

    async fn current_user(&self, access_token: &str) -> AppResult<Option<AuthUser>> {
        let Some(id) = self.tokens.read().await.get(access_token).cloned() else {
            return Ok(None);
        };
        Ok(self
            .accounts
            .read()
            .await
            .get(&id)
            .map(|account| account.user.clone()))
    }

    async fn sign_out(&self, access_token: &str) -> AppResult<()> {
        self.tokens.write().await.remove(access_token);
        Ok(())
    }
}
