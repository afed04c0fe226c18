use std::fmt::{Display, Formatter};
use std::str::FromStr;

use milagro_core::AppError;
use serde::{Deserialize, Serialize};

/// Headline figures shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Registered profiles.
    TotalUsers,
    /// Orders still pending or processing.
    ActiveOrders,
    /// Revenue over the trailing window.
    Revenue,
    /// Orders awaiting approval.
    PendingApprovals,
}

impl MetricKind {
    /// Every metric in dashboard order.
    pub const ALL: [Self; 4] = [
        Self::TotalUsers,
        Self::ActiveOrders,
        Self::Revenue,
        Self::PendingApprovals,
    ];

    /// Returns the card label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::TotalUsers => "Total Users",
            Self::ActiveOrders => "Active Orders",
            Self::Revenue => "Revenue",
            Self::PendingApprovals => "Pending Approvals",
        }
    }

    /// Returns the card icon name.
    #[must_use]
    pub fn icon(&self) -> &'static str {
        match self {
            Self::TotalUsers => "users",
            Self::ActiveOrders => "shopping-cart",
            Self::Revenue => "dollar-sign",
            Self::PendingApprovals => "clock",
        }
    }
}

/// One raw figure as reported by the remote metrics function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// Current value.
    #[serde(default)]
    pub value: f64,
    /// Change against the previous window, in percent.
    #[serde(default)]
    pub change: f64,
}

/// Raw figures keyed the way the remote metrics function reports them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReadings {
    /// Registered profiles.
    #[serde(default)]
    pub total_users: Option<MetricReading>,
    /// Open orders.
    #[serde(default)]
    pub active_orders: Option<MetricReading>,
    /// Trailing revenue.
    #[serde(default)]
    pub revenue: Option<MetricReading>,
    /// Orders awaiting approval.
    #[serde(default)]
    pub pending_approvals: Option<MetricReading>,
}

/// One dashboard card.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetric {
    /// Which figure this card shows.
    pub kind: MetricKind,
    /// Current value. Missing or non-finite readings show as zero.
    pub value: f64,
    /// Change in percent. Missing or non-finite readings show as zero.
    pub change: f64,
}

impl DashboardMetric {
    fn from_reading(kind: MetricKind, reading: Option<MetricReading>) -> Self {
        let reading = reading.unwrap_or_default();
        Self {
            kind,
            value: finite_or_zero(reading.value),
            change: finite_or_zero(reading.change),
        }
    }

    /// Returns the card label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }

    /// Returns the card icon name.
    #[must_use]
    pub fn icon(&self) -> &'static str {
        self.kind.icon()
    }
}

/// The four headline cards of the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    /// Registered profiles.
    pub total_users: DashboardMetric,
    /// Open orders.
    pub active_orders: DashboardMetric,
    /// Trailing revenue.
    pub revenue: DashboardMetric,
    /// Orders awaiting approval.
    pub pending_approvals: DashboardMetric,
}

impl DashboardMetrics {
    /// Every card at zero, shown when the remote figures are unavailable.
    #[must_use]
    pub fn zeroed() -> Self {
        Self::from_readings(&MetricReadings::default())
    }

    /// Builds the cards from raw readings.
    #[must_use]
    pub fn from_readings(readings: &MetricReadings) -> Self {
        Self {
            total_users: DashboardMetric::from_reading(MetricKind::TotalUsers, readings.total_users),
            active_orders: DashboardMetric::from_reading(
                MetricKind::ActiveOrders,
                readings.active_orders,
            ),
            revenue: DashboardMetric::from_reading(MetricKind::Revenue, readings.revenue),
            pending_approvals: DashboardMetric::from_reading(
                MetricKind::PendingApprovals,
                readings.pending_approvals,
            ),
        }
    }

    /// Returns the cards in dashboard order.
    #[must_use]
    pub fn cards(&self) -> [DashboardMetric; 4] {
        [
            self.total_users,
            self.active_orders,
            self.revenue,
            self.pending_approvals,
        ]
    }
}

impl Default for DashboardMetrics {
    fn default() -> Self {
        Self::zeroed()
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Returns the change from `previous` to `current` in percent, one decimal.
///
/// A zero baseline reports no change.
#[must_use]
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    ((current - previous) / previous * 1000.0).round() / 10.0
}

/// Chart datasets shown below the headline cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartSeries {
    /// Daily revenue, oldest first.
    RevenueTrend,
    /// Daily profile sign-ups, oldest first.
    UserTrend,
    /// Profiles per role.
    UserTypes,
    /// Orders per status.
    OrderStatus,
}

impl ChartSeries {
    /// Every series in dashboard order.
    pub const ALL: [Self; 4] = [
        Self::RevenueTrend,
        Self::UserTrend,
        Self::UserTypes,
        Self::OrderStatus,
    ];

    /// Returns the remote view backing the series.
    #[must_use]
    pub fn source(&self) -> &'static str {
        match self {
            Self::RevenueTrend => "revenue_trend",
            Self::UserTrend => "user_trend",
            Self::UserTypes => "user_distribution",
            Self::OrderStatus => "order_status_distribution",
        }
    }

    /// Returns whether points are ordered by date.
    #[must_use]
    pub fn is_trend(&self) -> bool {
        matches!(self, Self::RevenueTrend | Self::UserTrend)
    }
}

impl Display for ChartSeries {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.source())
    }
}

/// One labelled chart value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Category or date label.
    pub name: String,
    /// Plotted value.
    pub value: f64,
}

/// Fulfilment state of a marketplace order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placed and awaiting approval.
    Pending,
    /// Approved and being prepared.
    Processing,
    /// Handed to the carrier.
    Shipped,
    /// Received by the customer.
    Delivered,
    /// Cancelled before delivery.
    Cancelled,
}

impl OrderStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns whether the order still needs work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(AppError::Validation(format!(
                "unknown order status '{value}'"
            ))),
        }
    }
}
