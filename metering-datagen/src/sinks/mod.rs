use rust_client::domain::{CustomerDimRow, DateDimRow, MeteringFactRow};
use sqlx::{postgres::PgPool, query_builder::Separated, Postgres};

use crate::{
    config::{BulkCommandConfig, SinkKind, TableSinkConfig},
    pipeline::{PipelineError, Sink},
};

pub mod bulk_file;
pub mod row_insert;
pub mod staging;

pub use bulk_file::BulkFileSink;
pub use row_insert::RowInsertSink;
pub use staging::StagingFileWriter;

/// A row that can be loaded into one table of the star schema, either through
/// bound INSERT parameters or as a delimited staging line.
pub trait TableRow: Send + Sync {
    const TABLE: &'static str;
    /// Column names in load order.
    const COLUMNS: &'static [&'static str];

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>);

    /// Field values in column order, as written to a staging file.
    fn record(&self) -> Vec<String>;
}

impl TableRow for DateDimRow {
    const TABLE: &'static str = DateDimRow::TABLE;
    const COLUMNS: &'static [&'static str] = DateDimRow::COLUMNS;

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.skey)
            .push_bind(self.date)
            .push_bind(self.day)
            .push_bind(self.month)
            .push_bind(self.year)
            .push_bind(self.day_of_week)
            .push_bind(self.week)
            .push_bind(self.quarter);
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.skey.to_string(),
            self.date.to_string(),
            self.day.to_string(),
            self.month.to_string(),
            self.year.to_string(),
            self.day_of_week.to_string(),
            self.week.to_string(),
            self.quarter.to_string(),
        ]
    }
}

impl TableRow for CustomerDimRow {
    const TABLE: &'static str = CustomerDimRow::TABLE;
    const COLUMNS: &'static [&'static str] = CustomerDimRow::COLUMNS;

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.skey)
            .push_bind(&self.zipcode)
            .push_bind(&self.county)
            .push_bind(&self.state);
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.skey.to_string(),
            self.zipcode.clone(),
            self.county.clone(),
            self.state.clone(),
        ]
    }
}

impl TableRow for MeteringFactRow {
    const TABLE: &'static str = MeteringFactRow::TABLE;
    const COLUMNS: &'static [&'static str] = MeteringFactRow::COLUMNS;

    fn push_binds<'args>(&'args self, b: &mut Separated<'_, 'args, Postgres, &'static str>) {
        b.push_bind(self.customer_skey)
            .push_bind(self.date_skey)
            .push_bind(self.consumption)
            .push_bind(self.min_voltage)
            .push_bind(self.max_voltage)
            .push_bind(self.outage);
    }

    /// Measures use the shortest round-tripping float form.
    fn record(&self) -> Vec<String> {
        vec![
            self.customer_skey.to_string(),
            self.date_skey.to_string(),
            self.consumption.to_string(),
            self.min_voltage.to_string(),
            self.max_voltage.to_string(),
            self.outage.to_string(),
        ]
    }
}

/// Sink chosen per table from configuration.
pub enum ConfiguredSink<T> {
    RowInsert(RowInsertSink<T>),
    BulkFile(BulkFileSink<T>),
}

impl<T: TableRow> ConfiguredSink<T> {
    /// Builds the sink named by `table_cfg`. A row-insert sink needs a
    /// database pool, a bulk-file sink needs the `[bulk]` command.
    pub fn from_config(
        table_cfg: &TableSinkConfig,
        pool: Option<&PgPool>,
        bulk: Option<&BulkCommandConfig>,
    ) -> Result<Self, PipelineError> {
        match table_cfg.kind {
            SinkKind::RowInsert => {
                let pool = pool.ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "{} uses row_insert but no [database] is configured",
                        T::TABLE
                    ))
                })?;
                Ok(Self::RowInsert(RowInsertSink::new(pool.clone())))
            }
            SinkKind::BulkFile => {
                let bulk = bulk.ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "{} uses bulk_file but no [bulk] command is configured",
                        T::TABLE
                    ))
                })?;
                Ok(Self::BulkFile(BulkFileSink::new(bulk)?))
            }
        }
    }
}

#[async_trait::async_trait]
impl<T> Sink<T> for ConfiguredSink<T>
where
    T: TableRow,
{
    async fn write(&self, batch: &[T]) -> Result<(), PipelineError> {
        match self {
            Self::RowInsert(s) => s.write(batch).await,
            Self::BulkFile(s) => s.write(batch).await,
        }
    }
}
