use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

/// Every statement a worker runs is short: watermark updates, single-row
/// transfer inserts, balance upserts. Anything slower means the database is
/// wedged, and waiting longer only pins the connection.
const STATEMENT_TIMEOUT: &str = "5s";

/// How long a cycle may wait for a free connection before the step is
/// treated as failed and retried next cycle.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the pool a worker or the launcher shares across its cycles. Workers
/// are single-threaded, so `max_connections` stays small; the timeouts keep
/// a stuck statement from stalling the loop past its own retry.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute(format!("SET statement_timeout = '{STATEMENT_TIMEOUT}'").as_str())
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}
