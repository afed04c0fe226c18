use milagro_application::AnalyticsSource;
use milagro_domain::ChartSeries;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use super::{PostgresAnalyticsSource, series_query};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        return None;
    };

    let pool = match PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url.as_str())
        .await
    {
        Ok(pool) => pool,
        Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
    };

    if let Err(error) = MIGRATOR.run(&pool).await {
        panic!("failed to run migrations for postgres analytics tests: {error}");
    }

    Some(pool)
}

#[test]
fn trends_are_read_oldest_first() {
    assert_eq!(
        series_query(ChartSeries::RevenueTrend),
        "SELECT name, value FROM revenue_trend ORDER BY day ASC"
    );
    assert!(series_query(ChartSeries::OrderStatus).starts_with(
        "SELECT name, value FROM order_status_distribution ORDER BY value DESC"
    ));
}

#[tokio::test]
async fn pending_orders_count_as_active_and_awaiting_approval() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let source = PostgresAnalyticsSource::new(pool.clone());

    let inserted = sqlx::query("INSERT INTO orders (status, total_amount) VALUES ('pending', 420.0)")
        .execute(&pool)
        .await;
    assert!(inserted.is_ok());

    let readings = source
        .fetch_metrics()
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let active = readings.active_orders.map(|reading| reading.value);
    let pending = readings.pending_approvals.map(|reading| reading.value);
    assert!(active.is_some_and(|value| value >= 1.0));
    assert!(pending.is_some_and(|value| value >= 1.0));

    let statuses = source
        .fetch_series(ChartSeries::OrderStatus)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(
        statuses
            .iter()
            .any(|point| point.name == "pending" && point.value >= 1.0)
    );
}

#[tokio::test]
async fn every_chart_view_is_readable() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let source = PostgresAnalyticsSource::new(pool);

    for series in ChartSeries::ALL {
        let result = source.fetch_series(series).await;
        assert!(result.is_ok(), "{series}: {result:?}");
    }
}
