use std::{marker::PhantomData, time::Instant};

use sqlx::{postgres::PgPool, Postgres, QueryBuilder};

use crate::{
    pipeline::{PipelineError, Sink},
    sinks::TableRow,
};

/// Postgres caps a single statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

/// Loads each batch with multi-row parameterized INSERTs inside one
/// transaction, committed once per batch.
pub struct RowInsertSink<T> {
    pool: PgPool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TableRow> RowInsertSink<T> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }

    fn rows_per_statement() -> usize {
        (MAX_BIND_PARAMS / T::COLUMNS.len()).max(1)
    }

    fn insert_prefix() -> String {
        let columns: Vec<String> = T::COLUMNS.iter().map(|c| format!("\"{c}\"")).collect();
        format!("INSERT INTO {} ({}) ", T::TABLE, columns.join(", "))
    }

    async fn insert_batch(&self, batch: &[T]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for chunk in batch.chunks(Self::rows_per_statement()) {
            let mut builder = QueryBuilder::<Postgres>::new(Self::insert_prefix());
            builder.push_values(chunk, |mut b, row| row.push_binds(&mut b));
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await
    }
}

#[async_trait::async_trait]
impl<T> Sink<T> for RowInsertSink<T>
where
    T: TableRow,
{
    async fn write(&self, batch: &[T]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        match self.insert_batch(batch).await {
            Ok(()) => {
                tracing::debug!(
                    table = T::TABLE,
                    rows = batch.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "batch inserted and committed"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, table = T::TABLE, "row insert failed");
                Err(PipelineError::Sink(format!("insert into {} failed: {e}", T::TABLE)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_client::domain::{CustomerDimRow, MeteringFactRow};

    #[test]
    fn insert_prefix_quotes_columns_in_order() {
        assert_eq!(
            RowInsertSink::<CustomerDimRow>::insert_prefix(),
            "INSERT INTO customer_dim (\"skey\", \"zipcode\", \"county\", \"state\") "
        );
    }

    #[test]
    fn statements_stay_under_the_bind_limit() {
        let rows = RowInsertSink::<MeteringFactRow>::rows_per_statement();
        assert_eq!(rows, 10_922);
        assert!(rows * 6 <= MAX_BIND_PARAMS);
    }
}
