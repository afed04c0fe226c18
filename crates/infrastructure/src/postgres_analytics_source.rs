use async_trait::async_trait;
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use milagro_application::AnalyticsSource;
use milagro_core::{AppError, AppResult};
use milagro_domain::{ChartPoint, ChartSeries, MetricReadings};

/// PostgreSQL-backed dashboard figures.
///
/// Headline figures come from `get_dashboard_metrics()`; charts read the
/// analytics views.
#[derive(Clone)]
pub struct PostgresAnalyticsSource {
    pool: PgPool,
}

impl PostgresAnalyticsSource {
    /// Creates a source with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ChartRow {
    name: String,
    value: f64,
}

fn series_query(series: ChartSeries) -> String {
    let order = if series.is_trend() {
        "ORDER BY day ASC"
    } else {
        "ORDER BY value DESC, name ASC"
    };
    format!("SELECT name, value FROM {} {order}", series.source())
}

#[async_trait]
impl AnalyticsSource for PostgresAnalyticsSource {
    async fn fetch_metrics(&self) -> AppResult<MetricReadings> {
        let readings = sqlx::query_scalar::<_, Option<Value>>("SELECT get_dashboard_metrics()")
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to fetch dashboard metrics: {error}"))
            })?;

        match readings {
            Some(readings) => serde_json::from_value(readings).map_err(|error| {
                AppError::Internal(format!("dashboard metrics are malformed: {error}"))
            }),
            None => Ok(MetricReadings::default()),
        }
    }

    async fn fetch_series(&self, series: ChartSeries) -> AppResult<Vec<ChartPoint>> {
        let rows = sqlx::query_as::<_, ChartRow>(series_query(series).as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to fetch chart '{series}': {error}"))
            })?;

        Ok(rows
            .into_iter()
            .map(|row| ChartPoint {
                name: row.name,
                value: row.value,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests;
