use sqlx::SqliteConnection;

use crate::AppResult;

/// Number of nations that currently count towards live quorums.
///
/// Never cached: call it on the same connection (and transaction) as the
/// threshold comparison it feeds.
pub async fn eligible_nation_count(conn: &mut SqliteConnection) -> AppResult<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM nations WHERE deleted = FALSE AND observer = FALSE")
            .fetch_one(conn)
            .await?;
    Ok(count)
}
