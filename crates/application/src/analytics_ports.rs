use async_trait::async_trait;

use milagro_core::AppResult;
use milagro_domain::{ChartPoint, ChartSeries, MetricReadings};

/// Read port for dashboard figures computed by the remote store.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    /// Returns the raw headline figures.
    async fn fetch_metrics(&self) -> AppResult<MetricReadings>;

    /// Returns one chart dataset. Trend series come oldest first.
    async fn fetch_series(&self, series: ChartSeries) -> AppResult<Vec<ChartPoint>>;
}
