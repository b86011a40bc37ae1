use rust_client::{
    db::star_schema_queries,
    domain::StarTable,
};
use sqlx::PgPool;

use crate::{
    config::GenerationConfig,
    generate::date_row,
    pipeline::{PipelineError, RunSummary},
};

/// Checks the loaded tables against what the run reports having written.
///
/// Assumes the tables were empty before the run.
pub async fn verify_destination(
    pool: &PgPool,
    cfg: &GenerationConfig,
    summary: &RunSummary,
) -> Result<(), PipelineError> {
    let query_err = |e: anyhow::Error| PipelineError::Sink(format!("verification query failed: {e}"));

    for (table, expected) in [
        (StarTable::DateDim, summary.date_dim.rows),
        (StarTable::CustomerDim, summary.customer_dim.rows),
        (StarTable::MeteringFact, summary.metering_fact.rows),
    ] {
        let actual = star_schema_queries::count_rows(pool, table).await.map_err(query_err)?;
        if actual as u64 != expected {
            return Err(PipelineError::Integrity(format!(
                "{} holds {actual} rows, run wrote {expected}",
                table.name()
            )));
        }
    }

    for table in [StarTable::DateDim, StarTable::CustomerDim] {
        let dup = star_schema_queries::count_duplicate_skeys(pool, table)
            .await
            .map_err(query_err)?;
        if dup > 0 {
            return Err(PipelineError::Integrity(format!(
                "{} has {dup} duplicated surrogate keys",
                table.name()
            )));
        }
    }

    let dup = star_schema_queries::count_duplicate_fact_pairs(pool)
        .await
        .map_err(query_err)?;
    if dup > 0 {
        return Err(PipelineError::Integrity(format!(
            "metering_fact has {dup} duplicated (customer_skey, date_skey) pairs"
        )));
    }

    let expected_bounds = (date_row(cfg.start_date), date_row(cfg.end_date));
    match star_schema_queries::date_dim_bounds(pool).await.map_err(query_err)? {
        Some(bounds) if bounds == expected_bounds => {}
        Some((first, last)) => {
            return Err(PipelineError::Integrity(format!(
                "date_dim spans {}..{}, expected {}..{}",
                first.skey, last.skey, expected_bounds.0.skey, expected_bounds.1.skey
            )));
        }
        None => return Err(PipelineError::Integrity("date_dim is empty".to_string())),
    }

    tracing::info!(
        date_dim = summary.date_dim.rows,
        customer_dim = summary.customer_dim.rows,
        metering_fact = summary.metering_fact.rows,
        "destination verified"
    );

    Ok(())
}
