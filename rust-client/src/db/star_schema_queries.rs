use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{DateDimRow, StarTable};

/// Total number of rows currently in `table`.
pub async fn count_rows(pool: &PgPool, table: StarTable) -> Result<i64> {
    // Table names come from a closed enum, never from user input.
    let sql = format!("SELECT COUNT(*) FROM {}", table.name());
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(count)
}

/// Number of surrogate keys that appear more than once in a dimension table.
pub async fn count_duplicate_skeys(pool: &PgPool, table: StarTable) -> Result<i64> {
    let sql = format!(
        r#"
        SELECT COUNT(*) FROM (
            SELECT skey
            FROM {}
            GROUP BY skey
            HAVING COUNT(*) > 1
        ) dup
        "#,
        table.name()
    );
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(count)
}

/// Number of `(customer_skey, date_skey)` pairs loaded more than once.
pub async fn count_duplicate_fact_pairs(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM (
            SELECT customer_skey, date_skey
            FROM metering_fact
            GROUP BY customer_skey, date_skey
            HAVING COUNT(*) > 1
        ) dup
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// First and last day loaded into `date_dim`, ordered by surrogate key.
pub async fn date_dim_bounds(pool: &PgPool) -> Result<Option<(DateDimRow, DateDimRow)>> {
    let first = sqlx::query_as::<_, DateDimRow>(
        r#"
        SELECT skey, "date", "day", "month", "year", day_of_week, week, quarter
        FROM date_dim
        ORDER BY skey ASC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    let last = sqlx::query_as::<_, DateDimRow>(
        r#"
        SELECT skey, "date", "day", "month", "year", day_of_week, week, quarter
        FROM date_dim
        ORDER BY skey DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(first.zip(last))
}
