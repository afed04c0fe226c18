use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::{debug, warn};

use milagro_application::{ChangeFeed, ChangeFilter, ChangeStream, RowChange};
use milagro_core::{AppError, AppResult};

/// Notification channel the row-change triggers publish on.
pub const ROW_CHANGE_CHANNEL: &str = "milagro_row_changes";

const STREAM_BUFFER: usize = 128;

/// Change feed backed by PostgreSQL `LISTEN`/`NOTIFY`.
///
/// Every subscription holds its own listener connection. The stream ends
/// when that connection drops, even if the listener would reconnect on its
/// own, because notifications sent in between are lost.
#[derive(Clone)]
pub struct PostgresChangeFeed {
    pool: PgPool,
}

impl PostgresChangeFeed {
    /// Creates a change feed that opens listener connections from `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_payload(payload: &str) -> AppResult<RowChange> {
    serde_json::from_str(payload)
        .map_err(|error| AppError::Validation(format!("invalid row change payload: {error}")))
}

#[async_trait]
impl ChangeFeed for PostgresChangeFeed {
    async fn subscribe(&self, filter: ChangeFilter) -> AppResult<ChangeStream> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(|error| {
            AppError::Unavailable(format!("failed to open change listener: {error}"))
        })?;
        listener.listen(ROW_CHANGE_CHANNEL).await.map_err(|error| {
            AppError::Unavailable(format!("failed to listen for row changes: {error}"))
        })?;

        let (sender, stream) = ChangeStream::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    () = sender.closed() => break,
                    received = listener.try_recv() => received,
                };

                let notification = match received {
                    Ok(Some(notification)) => notification,
                    Ok(None) => {
                        warn!(table = %filter.table, "change listener connection dropped");
                        break;
                    }
                    Err(error) => {
                        warn!(table = %filter.table, error = %error, "change listener failed");
                        break;
                    }
                };

                let change = match decode_payload(notification.payload()) {
                    Ok(change) => change,
                    Err(error) => {
                        warn!(error = %error, "skipping undecodable row change");
                        continue;
                    }
                };

                if !filter.matches(&change) {
                    continue;
                }

                debug!(table = %change.table, kind = ?change.kind, "forwarding row change");
                if sender.send(change).await.is_err() {
                    break;
                }
            }
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests;
