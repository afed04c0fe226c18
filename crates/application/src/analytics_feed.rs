use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use milagro_core::AppResult;
use milagro_domain::{ChartPoint, ChartSeries, DashboardMetrics};

use crate::{AnalyticsSource, ChangeHandler, FeedTable, RowChange};

/// Tables whose changes move the dashboard figures.
pub const ANALYTICS_TABLES: [FeedTable; 3] = [
    FeedTable::Orders,
    FeedTable::Profiles,
    FeedTable::RevenueAnalytics,
];

/// Dashboard cards and charts, re-fetched whenever an underlying table changes.
///
/// Failed reads degrade instead of failing: metrics fall back to zero and a
/// chart falls back to empty.
pub struct AnalyticsFeed {
    source: Arc<dyn AnalyticsSource>,
    metrics: RwLock<DashboardMetrics>,
    charts: RwLock<BTreeMap<ChartSeries, Vec<ChartPoint>>>,
}

impl AnalyticsFeed {
    /// Creates a feed showing zeroed metrics and no charts.
    #[must_use]
    pub fn new(source: Arc<dyn AnalyticsSource>) -> Self {
        Self {
            source,
            metrics: RwLock::new(DashboardMetrics::zeroed()),
            charts: RwLock::new(BTreeMap::new()),
        }
    }

    /// Reloads the metrics and every chart.
    pub async fn refresh(&self) {
        let metrics = self.load_metrics().await;
        *self.metrics.write().await = metrics;

        let mut charts = BTreeMap::new();
        for series in ChartSeries::ALL {
            charts.insert(series, self.load_series(series).await);
        }
        *self.charts.write().await = charts;
    }

    /// Fetches the headline cards, zeroed when the remote read fails.
    pub async fn load_metrics(&self) -> DashboardMetrics {
        match self.source.fetch_metrics().await {
            Ok(readings) => DashboardMetrics::from_readings(&readings),
            Err(error) => {
                warn!(error = %error, "failed to fetch dashboard metrics");
                DashboardMetrics::zeroed()
            }
        }
    }

    /// Fetches one chart, empty when the remote read fails.
    pub async fn load_series(&self, series: ChartSeries) -> Vec<ChartPoint> {
        self.source
            .fetch_series(series)
            .await
            .unwrap_or_else(|error| {
                warn!(series = %series, error = %error, "failed to fetch chart data");
                Vec::new()
            })
    }

    /// Returns the last loaded cards.
    pub async fn metrics(&self) -> DashboardMetrics {
        *self.metrics.read().await
    }

    /// Returns the last loaded points of one chart.
    pub async fn series(&self, series: ChartSeries) -> Vec<ChartPoint> {
        self.charts
            .read()
            .await
            .get(&series)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChangeHandler for AnalyticsFeed {
    async fn apply_change(&self, _change: RowChange) -> AppResult<()> {
        self.refresh().await;
        Ok(())
    }

    async fn resynchronize(&self) -> AppResult<()> {
        self.refresh().await;
        Ok(())
    }
}
