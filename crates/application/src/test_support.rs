//! Hand-written port fakes shared by the service tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Mutex, mpsc};

use milagro_core::{AppError, AppResult};
use milagro_domain::{
    ActivityLogEntry, ActivityLogView, AdminId, AdminProfile, AdminProfilePatch, AdminStatus,
    EmailAddress, NewActivityLogEntry, Permission, ProfileDraft, Role, SessionOrigin, SessionUser,
    StorageBucket, StoredSession,
};

use crate::{
    ActivityLogRepository, AuthProvider, AuthSession, AuthUser, ChangeFeed, ChangeFilter,
    ChangeStream, CreateAuthUser, FileStorage, ProfileFilter, ProfileRepository, RowChange,
    SessionStore,
};

pub fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_000_000 + seconds, 0)
        .single()
        .unwrap_or_else(|| unreachable!())
}

pub fn admin_id(value: &str) -> AdminId {
    AdminId::new(value).unwrap_or_else(|_| unreachable!())
}

pub fn email(value: &str) -> EmailAddress {
    EmailAddress::new(value).unwrap_or_else(|_| unreachable!())
}

pub fn profile(id: &str, role: Role, permissions: &[Permission]) -> AdminProfile {
    AdminProfile {
        id: admin_id(id),
        name: format!("Admin {id}"),
        email: email(format!("admin{id}@tiles.example").as_str()),
        role,
        status: AdminStatus::Active,
        permissions: permissions.iter().copied().collect(),
        avatar_ref: String::new(),
        signature_ref: None,
        department: None,
        phone: None,
        last_login_at: None,
        created_at: timestamp(0),
        version: 1,
    }
}

pub fn provider_user(profile: &AdminProfile) -> SessionUser {
    SessionUser {
        profile: profile.clone(),
        origin: SessionOrigin::Provider,
    }
}

pub fn draft(name: &str) -> ProfileDraft {
    ProfileDraft {
        id: None,
        name: name.to_owned(),
        email: email(format!("{}@tiles.example", name.to_lowercase()).as_str()),
        role: Role::Admin,
        status: AdminStatus::Active,
        permissions: BTreeSet::from([Permission::UsersView]),
        avatar_ref: String::new(),
        signature_ref: None,
        department: None,
        phone: None,
    }
}

#[derive(Default)]
pub struct FakeProfileRepository {
    pub profiles: Mutex<Vec<AdminProfile>>,
    pub failure: Mutex<Option<AppError>>,
    pub delays: Mutex<Vec<Duration>>,
    pub calls: Mutex<Vec<String>>,
    pub lookups: AtomicUsize,
    clock: AtomicUsize,
}

impl FakeProfileRepository {
    pub fn with_profiles(profiles: Vec<AdminProfile>) -> Self {
        Self {
            profiles: Mutex::new(profiles),
            ..Self::default()
        }
    }

    pub async fn fail_next(&self, error: AppError) {
        *self.failure.lock().await = Some(error);
    }

    /// Queues per-call delays consumed in call order.
    pub async fn delay_calls(&self, delays: &[Duration]) {
        self.delays.lock().await.extend_from_slice(delays);
    }

    async fn enter(&self, call: String) -> AppResult<()> {
        self.calls.lock().await.push(call);
        let delay = {
            let mut delays = self.delays.lock().await;
            if delays.is_empty() {
                None
            } else {
                Some(delays.remove(0))
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.failure.lock().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProfileRepository for FakeProfileRepository {
    async fn list_profiles(&self, filter: ProfileFilter) -> AppResult<Vec<AdminProfile>> {
        self.enter("list".to_owned()).await?;
        let mut profiles: Vec<AdminProfile> = self
            .profiles
            .lock()
            .await
            .iter()
            .filter(|profile| filter.matches(profile))
            .cloned()
            .collect();
        profiles.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(profiles)
    }

    async fn find_profile(&self, id: &AdminId) -> AppResult<Option<AdminProfile>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .profiles
            .lock()
            .await
            .iter()
            .find(|profile| &profile.id == id)
            .cloned())
    }

    async fn insert_profile(&self, draft: ProfileDraft) -> AppResult<AdminProfile> {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        self.enter(format!("insert:{}", draft.name)).await?;
        let tick = i64::try_from(tick).unwrap_or_default();
        let profile = AdminProfile {
            id: draft
                .id
                .unwrap_or_else(|| admin_id(format!("generated-{tick}").as_str())),
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
            created_at: timestamp(tick * 60),
            version: 1,
        };
        self.profiles.lock().await.push(profile.clone());
        Ok(profile)
    }

    async fn update_profile(
        &self,
        id: &AdminId,
        patch: AdminProfilePatch,
    ) -> AppResult<AdminProfile> {
        self.enter(format!("update:{id}")).await?;
        let mut profiles = self.profiles.lock().await;
        let profile = profiles
            .iter_mut()
            .find(|profile| &profile.id == id)
            .ok_or_else(|| AppError::NotFound(format!("profile '{id}' does not exist")))?;
        if patch
            .expected_version
            .is_some_and(|expected| expected != profile.version)
        {
            return Err(AppError::Conflict(format!("profile '{id}' was modified")));
        }
        profile.apply_patch(&patch);
        profile.version += 1;
        Ok(profile.clone())
    }

    async fn delete_profile(&self, id: &AdminId, expected_version: Option<u64>) -> AppResult<()> {
        self.enter(format!("delete:{id}")).await?;
        let mut profiles = self.profiles.lock().await;
        if let Some(current) = profiles.iter().find(|profile| &profile.id == id)
            && expected_version.is_some_and(|expected| expected != current.version)
        {
            return Err(AppError::Conflict(format!("profile '{id}' was modified")));
        }
        profiles.retain(|profile| &profile.id != id);
        Ok(())
    }

    async fn touch_last_login(&self, id: &AdminId, at: DateTime<Utc>) -> AppResult<()> {
        self.calls.lock().await.push(format!("touch:{id}"));
        if let Some(profile) = self
            .profiles
            .lock()
            .await
            .iter_mut()
            .find(|profile| &profile.id == id)
        {
            profile.last_login_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeActivityLogRepository {
    pub entries: Mutex<Vec<ActivityLogEntry>>,
    pub list_calls: AtomicUsize,
}

#[async_trait]
impl ActivityLogRepository for FakeActivityLogRepository {
    async fn append_entry(&self, entry: NewActivityLogEntry) -> AppResult<ActivityLogEntry> {
        let mut entries = self.entries.lock().await;
        let sequence = i64::try_from(entries.len()).unwrap_or_default();
        let stored = ActivityLogEntry {
            id: format!("activity-{}", entries.len() + 1),
            actor_user_id: entry.actor_user_id,
            action: entry.action,
            details: entry.details,
            created_at: timestamp(sequence),
        };
        entries.push(stored.clone());
        Ok(stored)
    }

    async fn list_recent(&self, limit: usize) -> AppResult<Vec<ActivityLogView>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .map(|entry| ActivityLogView {
                entry,
                actor_name: None,
                actor_role: None,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct FakeAuthProvider {
    pub accounts: Mutex<HashMap<String, (AuthUser, String)>>,
    pub deleted: Mutex<Vec<AdminId>>,
    pub tokens: Mutex<HashMap<String, AuthUser>>,
    pub sign_ins: AtomicUsize,
    pub sign_outs: AtomicUsize,
    created: AtomicUsize,
}

impl FakeAuthProvider {
    pub async fn register(&self, id: &str, email_value: &str, password: &str) {
        let user = AuthUser {
            id: admin_id(id),
            email: email(email_value),
        };
        self.accounts
            .lock()
            .await
            .insert(email_value.to_owned(), (user, password.to_owned()));
    }
}

#[async_trait]
impl AuthProvider for FakeAuthProvider {
    async fn create_user(&self, input: CreateAuthUser) -> AppResult<AuthUser> {
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(input.email.as_str()) {
            return Err(AppError::Conflict(format!(
                "account '{}' already exists",
                input.email
            )));
        }
        let sequence = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let user = AuthUser {
            id: admin_id(format!("auth-{sequence}").as_str()),
            email: input.email.clone(),
        };
        accounts.insert(
            input.email.as_str().to_owned(),
            (user.clone(), input.password),
        );
        Ok(user)
    }

    async fn delete_user(&self, id: &AdminId) -> AppResult<()> {
        self.accounts
            .lock()
            .await
            .retain(|_, (user, _)| &user.id != id);
        self.deleted.lock().await.push(id.clone());
        Ok(())
    }

    async fn sign_in_with_password(
        &self,
        email: &EmailAddress,
        password: &str,
    ) -> AppResult<AuthSession> {
        self.sign_ins.fetch_add(1, Ordering::SeqCst);
        let accounts = self.accounts.lock().await;
        let Some((user, stored_password)) = accounts.get(email.as_str()) else {
            return Err(AppError::Unauthorized("invalid login credentials".to_owned()));
        };
        if stored_password != password {
            return Err(AppError::Unauthorized("invalid login credentials".to_owned()));
        }

        let access_token = format!("token-{}", user.id);
        self.tokens
            .lock()
            .await
            .insert(access_token.clone(), user.clone());
        Ok(AuthSession {
            access_token,
            refresh_token: Some("refresh".to_owned()),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            user: user.clone(),
        })
    }

    async fn current_user(&self, access_token: &str) -> AppResult<Option<AuthUser>> {
        Ok(self.tokens.lock().await.get(access_token).cloned())
    }

    async fn sign_out(&self, access_token: &str) -> AppResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().await.remove(access_token);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFileStorage {
    pub objects: Mutex<BTreeMap<(StorageBucket, String), Vec<u8>>>,
    pub fail_removals: bool,
}

#[async_trait]
impl FileStorage for FakeFileStorage {
    async fn upload(
        &self,
        bucket: StorageBucket,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> AppResult<String> {
        self.objects
            .lock()
            .await
            .insert((bucket, path.to_owned()), bytes);
        Ok(self.public_url(bucket, path))
    }

    fn public_url(&self, bucket: StorageBucket, path: &str) -> String {
        format!("https://cdn.tiles.example/{}/{path}", bucket.as_str())
    }

    async fn remove(&self, bucket: StorageBucket, paths: &[String]) -> AppResult<()> {
        if self.fail_removals {
            return Err(AppError::Unavailable("storage offline".to_owned()));
        }
        let mut objects = self.objects.lock().await;
        for path in paths {
            objects.remove(&(bucket, path.clone()));
        }
        Ok(())
    }

    async fn remove_prefix(&self, bucket: StorageBucket, prefix: &str) -> AppResult<()> {
        if self.fail_removals {
            return Err(AppError::Unavailable("storage offline".to_owned()));
        }
        self.objects
            .lock()
            .await
            .retain(|(object_bucket, path), _| *object_bucket != bucket || !path.starts_with(prefix));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSessionStore {
    pub session: Mutex<Option<StoredSession>>,
}

#[async_trait]
impl SessionStore for FakeSessionStore {
    async fn load(&self) -> AppResult<Option<StoredSession>> {
        Ok(self.session.lock().await.clone())
    }

    async fn save(&self, session: &StoredSession) -> AppResult<()> {
        *self.session.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> AppResult<()> {
        *self.session.lock().await = None;
        Ok(())
    }
}

/// Change feed fake whose streams the test controls.
#[derive(Default)]
pub struct FakeChangeFeed {
    pub senders: Mutex<Vec<mpsc::Sender<RowChange>>>,
    pub subscriptions: AtomicUsize,
    pub failures_remaining: AtomicUsize,
    /// Hands out streams whose sender is already gone.
    pub close_streams_at_once: AtomicBool,
}

impl FakeChangeFeed {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub async fn publish(&self, change: RowChange) {
        let senders = self.senders.lock().await.clone();
        for sender in senders {
            let _ = sender.send(change.clone()).await;
        }
    }

    /// Closes every open stream, simulating a dropped connection.
    pub async fn drop_streams(&self) {
        self.senders.lock().await.clear();
    }

    pub async fn open_streams(&self) -> usize {
        self.senders
            .lock()
            .await
            .iter()
            .filter(|sender| !sender.is_closed())
            .count()
    }
}

#[async_trait]
impl ChangeFeed for FakeChangeFeed {
    async fn subscribe(&self, _filter: ChangeFilter) -> AppResult<ChangeStream> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::Unavailable("realtime endpoint refused".to_owned()));
        }

        let (sender, stream) = ChangeStream::channel(16);
        if !self.close_streams_at_once.load(Ordering::SeqCst) {
            self.senders.lock().await.push(sender);
        }
        Ok(stream)
    }
}

/// Polls until the condition holds or a second elapses.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
