use std::fmt::{Display, Formatter};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use milagro_core::{AppError, AppResult};

/// Remote tables that publish change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedTable {
    /// Admin and user profiles.
    Profiles,
    /// Append-only activity trail.
    UserActivityLogs,
    /// Marketplace orders.
    Orders,
    /// Daily revenue totals.
    RevenueAnalytics,
}

impl FeedTable {
    /// Returns the remote table name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::UserActivityLogs => "user_activity_logs",
            Self::Orders => "orders",
            Self::RevenueAnalytics => "revenue_analytics",
        }
    }
}

impl FromStr for FeedTable {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "profiles" => Ok(Self::Profiles),
            "user_activity_logs" => Ok(Self::UserActivityLogs),
            "orders" => Ok(Self::Orders),
            "revenue_analytics" => Ok(Self::RevenueAnalytics),
            _ => Err(AppError::Validation(format!(
                "unknown change feed table '{value}'"
            ))),
        }
    }
}

impl Display for FeedTable {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Row-level change kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
    /// A row was deleted.
    Delete,
}

/// One change notification with the old and/or new row image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// Table the row belongs to.
    pub table: FeedTable,
    /// What happened to the row.
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Row image after the change. Absent for deletes.
    #[serde(rename = "record", default)]
    pub new: Option<Value>,
    /// Row image before the change. Present for updates and deletes.
    #[serde(rename = "old_record", default)]
    pub old: Option<Value>,
}

impl RowChange {
    /// Returns the image a column predicate is evaluated against.
    #[must_use]
    pub fn current_image(&self) -> Option<&Value> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Equality predicate on one column of the row image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPredicate {
    /// Column name.
    pub column: String,
    /// Expected value, compared against the column's string rendering.
    pub value: String,
}

/// Subscription filter: table, change kinds and an optional column predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    /// Table to follow.
    pub table: FeedTable,
    /// Kinds to deliver. Empty delivers every kind.
    pub kinds: Vec<ChangeKind>,
    /// Optional column equality predicate.
    pub predicate: Option<ColumnPredicate>,
}

impl ChangeFilter {
    /// Follows every change of a table.
    #[must_use]
    pub fn table(table: FeedTable) -> Self {
        Self {
            table,
            kinds: Vec::new(),
            predicate: None,
        }
    }

    /// Restricts delivery to the listed kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[ChangeKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// Restricts delivery to rows whose `column` equals `value`.
    #[must_use]
    pub fn with_predicate(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicate = Some(ColumnPredicate {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    /// Returns whether a change passes the filter.
    #[must_use]
    pub fn matches(&self, change: &RowChange) -> bool {
        if change.table != self.table {
            return false;
        }

        if !self.kinds.is_empty() && !self.kinds.contains(&change.kind) {
            return false;
        }

        let Some(predicate) = &self.predicate else {
            return true;
        };

        change
            .current_image()
            .and_then(|image| image.get(predicate.column.as_str()))
            .is_some_and(|value| match value {
                Value::String(text) => text == &predicate.value,
                other => other.to_string() == predicate.value,
            })
    }
}

/// Live stream of change notifications.
///
/// The stream ends when the transport drops the subscription.
#[derive(Debug)]
pub struct ChangeStream {
    receiver: mpsc::Receiver<RowChange>,
}

impl ChangeStream {
    /// Wraps a receiver fed by a transport adapter.
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<RowChange>) -> Self {
        Self { receiver }
    }

    /// Creates a bounded sender/stream pair.
    #[must_use]
    pub fn channel(buffer: usize) -> (mpsc::Sender<RowChange>, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (sender, Self::new(receiver))
    }

    /// Waits for the next change. `None` means the subscription was lost.
    pub async fn next(&mut self) -> Option<RowChange> {
        self.receiver.recv().await
    }
}

/// Port for the remote change notification transport.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens one subscription for the filter.
    async fn subscribe(&self, filter: ChangeFilter) -> AppResult<ChangeStream>;
}

/// Consumer of change notifications driven by a synchronizer.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// Applies one change notification.
    async fn apply_change(&self, change: RowChange) -> AppResult<()>;

    /// Rebuilds local state after notifications may have been missed.
    async fn resynchronize(&self) -> AppResult<()>;
}
