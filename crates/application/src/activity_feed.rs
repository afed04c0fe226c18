use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use milagro_core::AppResult;
use milagro_domain::ActivityLogView;

use crate::{ActivityLogRepository, ChangeHandler, RowChange};

/// Number of entries shown in the recent activity panel.
pub const RECENT_ACTIVITY_LIMIT: usize = 10;

/// Recent admin activity, re-fetched whenever the activity table changes.
pub struct ActivityFeed {
    repository: Arc<dyn ActivityLogRepository>,
    entries: RwLock<Vec<ActivityLogView>>,
    loading: AtomicBool,
}

impl ActivityFeed {
    /// Creates a feed that has not loaded yet.
    #[must_use]
    pub fn new(repository: Arc<dyn ActivityLogRepository>) -> Self {
        Self {
            repository,
            entries: RwLock::new(Vec::new()),
            loading: AtomicBool::new(true),
        }
    }

    /// Reloads the newest entries. On failure the previous entries are kept.
    pub async fn refresh(&self) -> AppResult<()> {
        let result = self.repository.list_recent(RECENT_ACTIVITY_LIMIT).await;
        self.loading.store(false, Ordering::SeqCst);

        match result {
            Ok(entries) => {
                *self.entries.write().await = entries;
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "failed to fetch recent activity");
                Err(error)
            }
        }
    }

    /// Returns the loaded entries, newest first.
    pub async fn entries(&self) -> Vec<ActivityLogView> {
        self.entries.read().await.clone()
    }

    /// Returns whether the first load is still pending.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeHandler for ActivityFeed {
    async fn apply_change(&self, _change: RowChange) -> AppResult<()> {
        self.refresh().await
    }

    async fn resynchronize(&self) -> AppResult<()> {
        self.refresh().await
    }
}
