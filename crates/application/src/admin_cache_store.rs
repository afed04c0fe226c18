use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use milagro_core::{AppError, AppResult};
use milagro_domain::{AdminId, AdminProfile, AdminProfilePatch, ProfileDraft, Role};

use crate::{ChangeHandler, ChangeKind, ProfileFilter, ProfileRepository, RowChange};

/// Tuning of the admin cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminCacheOptions {
    /// Deadline for every remote call.
    pub remote_timeout: Duration,
    /// Refetch the full collection after a failed mutation.
    pub reconcile_on_error: bool,
}

impl Default for AdminCacheOptions {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(30),
            reconcile_on_error: false,
        }
    }
}

/// Point-in-time copy of the cache state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminCacheSnapshot {
    /// Cached admins, most recently created first.
    pub admins: Vec<AdminProfile>,
    /// Admin currently open in a detail view.
    pub selected: Option<AdminProfile>,
    /// Whether a remote call is in flight.
    pub is_loading: bool,
    /// Message of the last failure.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct CacheState {
    admins: Vec<AdminProfile>,
    selected: Option<AdminProfile>,
    error: Option<String>,
}

impl CacheState {
    fn position(&self, id: &AdminId) -> Option<usize> {
        self.admins.iter().position(|admin| &admin.id == id)
    }

    /// Inserts keeping `created_at` descending; ties go in front.
    fn insert_sorted(&mut self, profile: AdminProfile) {
        let index = self
            .admins
            .iter()
            .position(|admin| admin.created_at <= profile.created_at)
            .unwrap_or(self.admins.len());
        self.admins.insert(index, profile);
    }

    /// Inserts a record unless its id is already cached. Returns whether it was added.
    fn insert_if_absent(&mut self, profile: AdminProfile) -> bool {
        if self.position(&profile.id).is_some() {
            return false;
        }
        self.insert_sorted(profile);
        true
    }

    fn upsert(&mut self, profile: AdminProfile) {
        match self.position(&profile.id) {
            Some(index) if self.admins[index].version <= profile.version => {
                self.admins[index] = profile;
            }
            Some(_) => {}
            None => self.insert_sorted(profile),
        }
    }

    /// Replaces the cached record and selection. Returns false for stale or unknown ids.
    fn replace(&mut self, profile: AdminProfile) -> bool {
        let Some(index) = self.position(&profile.id) else {
            return false;
        };
        if self.admins[index].version > profile.version {
            return false;
        }

        if self
            .selected
            .as_ref()
            .is_some_and(|selected| selected.id == profile.id)
        {
            self.selected = Some(profile.clone());
        }
        self.admins[index] = profile;
        true
    }

    fn remove(&mut self, id: &AdminId) -> bool {
        let before = self.admins.len();
        self.admins.retain(|admin| &admin.id != id);
        if self
            .selected
            .as_ref()
            .is_some_and(|selected| &selected.id == id)
        {
            self.selected = None;
        }
        self.admins.len() != before
    }
}

/// Decrements the in-flight counter when the remote call settles.
struct LoadingGuard<'a>(&'a AtomicUsize);

impl<'a> LoadingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Session-scoped cache of admin profiles kept in sync with the remote store.
///
/// Mutations call the remote store first and then apply the returned record
/// locally. Failures are recorded in `error` and never roll back local state.
/// The state lock is never held across a remote call, so overlapping
/// operations apply in completion order.
pub struct AdminCacheStore {
    profiles: Arc<dyn ProfileRepository>,
    options: AdminCacheOptions,
    state: RwLock<CacheState>,
    in_flight: AtomicUsize,
}

impl AdminCacheStore {
    /// Creates an empty store backed by a profile repository.
    #[must_use]
    pub fn new(profiles: Arc<dyn ProfileRepository>, options: AdminCacheOptions) -> Self {
        Self {
            profiles,
            options,
            state: RwLock::new(CacheState::default()),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Replaces the collection with the remote admin list.
    pub async fn fetch(&self) -> AppResult<()> {
        match self.load_remote().await {
            Ok(()) => {
                self.state.write().await.error = None;
                Ok(())
            }
            Err(error) => Err(self.record_failure("fetch", error).await),
        }
    }

    /// Returns cached admins, most recently created first.
    pub async fn list(&self) -> Vec<AdminProfile> {
        self.state.read().await.admins.clone()
    }

    /// Returns one cached admin.
    pub async fn get(&self, id: &AdminId) -> Option<AdminProfile> {
        let state = self.state.read().await;
        state.position(id).map(|index| state.admins[index].clone())
    }

    /// Returns a copy of the whole state.
    pub async fn snapshot(&self) -> AdminCacheSnapshot {
        let state = self.state.read().await;
        AdminCacheSnapshot {
            admins: state.admins.clone(),
            selected: state.selected.clone(),
            is_loading: self.is_loading(),
            error: state.error.clone(),
        }
    }

    /// Returns whether any remote call is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Returns the message of the last failure.
    pub async fn error(&self) -> Option<String> {
        self.state.read().await.error.clone()
    }

    /// Creates a profile remotely and caches the stored record.
    pub async fn create(&self, draft: ProfileDraft) -> AppResult<AdminProfile> {
        let profiles = Arc::clone(&self.profiles);
        match self
            .remote("create", async move { profiles.insert_profile(draft).await })
            .await
        {
            Ok(profile) => {
                self.state.write().await.upsert(profile.clone());
                Ok(profile)
            }
            Err(error) => Err(self.record_failure("create", error).await),
        }
    }

    /// Updates a profile remotely and merges the stored record locally.
    ///
    /// The remote call runs even when the id is not cached.
    pub async fn update(&self, id: &AdminId, patch: AdminProfilePatch) -> AppResult<AdminProfile> {
        let profiles = Arc::clone(&self.profiles);
        let remote_id = id.clone();
        match self
            .remote("update", async move {
                profiles.update_profile(&remote_id, patch).await
            })
            .await
        {
            Ok(profile) => {
                self.state.write().await.replace(profile.clone());
                Ok(profile)
            }
            Err(error) => Err(self.record_failure("update", error).await),
        }
    }

    /// Deletes a profile remotely and drops it locally.
    pub async fn delete(&self, id: &AdminId) -> AppResult<()> {
        self.delete_with_version(id, None).await
    }

    /// Deletes a profile only if it still carries `version`.
    pub async fn delete_at_version(&self, id: &AdminId, version: u64) -> AppResult<()> {
        self.delete_with_version(id, Some(version)).await
    }

    /// Sets or clears the selected admin. Local only.
    pub async fn set_selected(&self, profile: Option<AdminProfile>) {
        self.state.write().await.selected = profile;
    }

    /// Returns the selected admin.
    pub async fn selected(&self) -> Option<AdminProfile> {
        self.state.read().await.selected.clone()
    }

    /// Caches a record delivered by an insert notification.
    ///
    /// Returns false when the id is already cached.
    pub async fn apply_insert(&self, profile: AdminProfile) -> bool {
        self.state.write().await.insert_if_absent(profile)
    }

    /// Replaces a cached record with an update notification's row image.
    ///
    /// Returns false for unknown ids and for images older than the cached record.
    pub async fn apply_update(&self, profile: AdminProfile) -> bool {
        self.state.write().await.replace(profile)
    }

    /// Drops a record named by a delete notification.
    pub async fn apply_delete(&self, id: &AdminId) -> bool {
        self.state.write().await.remove(id)
    }

    async fn delete_with_version(&self, id: &AdminId, version: Option<u64>) -> AppResult<()> {
        let profiles = Arc::clone(&self.profiles);
        let remote_id = id.clone();
        match self
            .remote("delete", async move {
                profiles.delete_profile(&remote_id, version).await
            })
            .await
        {
            Ok(()) => {
                self.state.write().await.remove(id);
                Ok(())
            }
            Err(error) => Err(self.record_failure("delete", error).await),
        }
    }

    async fn load_remote(&self) -> AppResult<()> {
        let profiles = Arc::clone(&self.profiles);
        let mut admins = self
            .remote("fetch", async move {
                profiles.list_profiles(ProfileFilter::admins()).await
            })
            .await?;
        admins.sort_by(|left, right| right.created_at.cmp(&left.created_at));

        let mut state = self.state.write().await;
        state.selected = state.selected.take().and_then(|selected| {
            admins
                .iter()
                .find(|admin| admin.id == selected.id)
                .cloned()
        });
        state.admins = admins;
        Ok(())
    }

    async fn remote<T, F>(&self, operation: &'static str, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let _loading = LoadingGuard::enter(&self.in_flight);
        match tokio::time::timeout(self.options.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "admin {operation} timed out after {} ms",
                self.options.remote_timeout.as_millis()
            ))),
        }
    }

    async fn record_failure(&self, operation: &'static str, error: AppError) -> AppError {
        warn!(operation, error = %error, "admin cache operation failed");
        self.state.write().await.error = Some(error.to_string());

        if self.options.reconcile_on_error
            && operation != "fetch"
            && let Err(reload_error) = self.load_remote().await
        {
            warn!(error = %reload_error, "admin cache reconciliation failed");
        }

        error
    }
}

fn decode_image(image: Option<Value>, kind: ChangeKind) -> AppResult<Option<AdminProfile>> {
    let Some(image) = image else {
        return Err(AppError::Validation(format!(
            "{kind:?} notification carries no row image"
        )));
    };

    let Some(role) = image.get("role").and_then(Value::as_str) else {
        return Err(AppError::Validation(format!(
            "{kind:?} notification row image carries no role"
        )));
    };
    if role.parse::<Role>().is_err() {
        return Ok(None);
    }

    serde_json::from_value(image)
        .map(Some)
        .map_err(|error| AppError::Validation(format!("invalid profile row image: {error}")))
}

fn deleted_id(change: &RowChange) -> AppResult<AdminId> {
    let id = change
        .old
        .as_ref()
        .and_then(|image| image.get("id"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AppError::Validation("delete notification carries no row id".to_owned())
        })?;
    AdminId::new(id)
}

#[async_trait]
impl ChangeHandler for AdminCacheStore {
    async fn apply_change(&self, change: RowChange) -> AppResult<()> {
        match change.kind {
            ChangeKind::Insert => {
                if let Some(profile) = decode_image(change.new, change.kind)?
                    && !self.apply_insert(profile).await
                {
                    debug!("ignored insert notification for a cached admin");
                }
            }
            ChangeKind::Update => match decode_image(change.new.clone(), change.kind)? {
                Some(profile) => {
                    let id = profile.id.clone();
                    if !self.apply_update(profile).await {
                        debug!(admin_id = %id, "ignored update notification");
                    }
                }
                None => {
                    if let Some(id) = change
                        .new
                        .as_ref()
                        .and_then(|image| image.get("id"))
                        .and_then(Value::as_str)
                    {
                        self.apply_delete(&AdminId::new(id)?).await;
                    }
                }
            },
            ChangeKind::Delete => {
                let id = deleted_id(&change)?;
                self.apply_delete(&id).await;
            }
        }

        Ok(())
    }

    async fn resynchronize(&self) -> AppResult<()> {
        self.fetch().await
    }
}

#[cfg(test)]
mod tests;
