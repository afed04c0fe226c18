use std::collections::BTreeMap;

use tokio::sync::watch;

use crate::{ChangeFeedSynchronizer, SyncStatus};

/// Named set of live change feed subscriptions.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: BTreeMap<String, ChangeFeedSynchronizer>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a synchronizer under `name`, tearing down any subscription it replaces.
    pub fn subscribe(&mut self, name: impl Into<String>, mut synchronizer: ChangeFeedSynchronizer) {
        let name = name.into();
        if let Some(mut previous) = self.subscriptions.remove(&name) {
            previous.teardown();
        }

        synchronizer.subscribe();
        self.subscriptions.insert(name, synchronizer);
    }

    /// Tears down one subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, name: &str) -> bool {
        match self.subscriptions.remove(name) {
            Some(mut synchronizer) => {
                synchronizer.teardown();
                true
            }
            None => false,
        }
    }

    /// Tears down every subscription.
    pub fn unsubscribe_all(&mut self) {
        for (_, mut synchronizer) in std::mem::take(&mut self.subscriptions) {
            synchronizer.teardown();
        }
    }

    /// Returns the registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    /// Returns a status receiver for one subscription.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<watch::Receiver<SyncStatus>> {
        self.subscriptions
            .get(name)
            .map(ChangeFeedSynchronizer::status)
    }

    /// Returns the number of registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns whether no subscription is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use crate::test_support::{FakeChangeFeed, FakeProfileRepository, eventually};
    use crate::{
        AdminCacheOptions, AdminCacheStore, ChangeFeedSynchronizer, ChangeFilter, FeedTable,
        ReconnectPolicy,
    };

    use super::SubscriptionRegistry;

    fn synchronizer(feed: &Arc<FakeChangeFeed>) -> ChangeFeedSynchronizer {
        let store = AdminCacheStore::new(
            Arc::new(FakeProfileRepository::default()),
            AdminCacheOptions::default(),
        );
        ChangeFeedSynchronizer::new(
            feed.clone(),
            Arc::new(store),
            ChangeFilter::table(FeedTable::Profiles),
            ReconnectPolicy::default(),
        )
    }

    #[tokio::test]
    async fn same_name_replaces_previous_subscription() {
        let feed = Arc::new(FakeChangeFeed::default());
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe("admin_profiles_changes", synchronizer(&feed));
        assert!(eventually(|| async { feed.open_streams().await == 1 }).await);
        registry.subscribe("admin_profiles_changes", synchronizer(&feed));

        assert!(eventually(|| async { feed.subscriptions.load(Ordering::SeqCst) == 2 }).await);
        assert!(eventually(|| async { feed.open_streams().await == 1 }).await);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_all_closes_every_stream() {
        let feed = Arc::new(FakeChangeFeed::default());
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe("admin_profiles_changes", synchronizer(&feed));
        registry.subscribe("admin-activities", synchronizer(&feed));
        assert!(eventually(|| async { feed.open_streams().await == 2 }).await);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["admin-activities", "admin_profiles_changes"]
        );

        assert!(registry.unsubscribe("admin-activities"));
        assert!(!registry.unsubscribe("admin-activities"));
        registry.unsubscribe_all();

        assert!(registry.is_empty());
        assert!(registry.status("admin_profiles_changes").is_none());
        assert!(eventually(|| async { feed.open_streams().await == 0 }).await);
    }
}
