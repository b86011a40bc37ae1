use rand::{rngs::StdRng, SeedableRng};
use rust_client::domain::{CustomerDimRow, DateDimRow, MeteringFactRow};

use crate::{
    config::GenerationConfig,
    generate::{CustomerDimensionGenerator, DateDimensionGenerator, FactModel, MeteringFactGenerator},
    sources::ZipPool,
};

pub mod loader;

pub use loader::{BatchLoader, LoadStats};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("data source error: {0}")]
    DataSource(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Durable destination for batches of one row type.
///
/// A successful `write` means the whole batch is persisted; there is no
/// partial success.
#[async_trait::async_trait]
pub trait Sink<T: Sync>: Send + Sync {
    async fn write(&self, batch: &[T]) -> Result<(), PipelineError>;
}

/// Per-table batch sizes used by the three load phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub date_dim: usize,
    pub customer_dim: usize,
    pub metering_fact: usize,
}

impl BatchSizes {
    pub fn uniform(batch_size: usize) -> Self {
        Self {
            date_dim: batch_size,
            customer_dim: batch_size,
            metering_fact: batch_size,
        }
    }
}

/// What each phase pushed through its sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub date_dim: LoadStats,
    pub customer_dim: LoadStats,
    pub metering_fact: LoadStats,
}

/// Generates the star schema and loads it phase by phase:
/// dates, then customers, then the customer × date fact cross join.
///
/// The RNG is seeded once from `random_seed` when the pipeline is built and
/// is the only source of randomness for the run.
pub struct Pipeline {
    config: GenerationConfig,
    batch_sizes: BatchSizes,
    rng: StdRng,
}

impl Pipeline {
    pub fn new(config: GenerationConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let batch_sizes = BatchSizes::uniform(config.batch_size);
        let rng = StdRng::seed_from_u64(config.random_seed);

        Ok(Self {
            config,
            batch_sizes,
            rng,
        })
    }

    pub fn with_batch_sizes(mut self, batch_sizes: BatchSizes) -> Result<Self, PipelineError> {
        for (table, size) in [
            (DateDimRow::TABLE, batch_sizes.date_dim),
            (CustomerDimRow::TABLE, batch_sizes.customer_dim),
            (MeteringFactRow::TABLE, batch_sizes.metering_fact),
        ] {
            if size == 0 {
                return Err(PipelineError::Configuration(format!(
                    "batch size for {table} must be positive"
                )));
            }
        }
        self.batch_sizes = batch_sizes;
        Ok(self)
    }

    pub async fn run<D, C, F>(
        mut self,
        zip_pool: &ZipPool,
        date_sink: &D,
        customer_sink: &C,
        fact_sink: &F,
    ) -> Result<RunSummary, PipelineError>
    where
        D: Sink<DateDimRow> + ?Sized,
        C: Sink<CustomerDimRow> + ?Sized,
        F: Sink<MeteringFactRow> + ?Sized,
    {
        // Every generator is constructed up front so that bad input fails the
        // run before the first row reaches a sink.
        let dates = DateDimensionGenerator::new(self.config.start_date, self.config.end_date)?;
        let customers = CustomerDimensionGenerator::new(self.config.customer_count, zip_pool)?;
        let facts = MeteringFactGenerator::new(FactModel::from_config(&self.config)?, self.config.fact_strategy);

        tracing::info!(
            start = %self.config.start_date,
            end = %self.config.end_date,
            "loading date_dim"
        );
        let mut loader = BatchLoader::new(date_sink, DateDimRow::TABLE, self.batch_sizes.date_dim)?;
        let date_keys = dates.generate(&mut loader).await?;
        let date_stats = loader.finish().await?;
        check_phase(DateDimRow::TABLE, date_stats, date_keys.len())?;
        check_ascending_keys(DateDimRow::TABLE, &date_keys)?;
        tracing::info!(rows = date_stats.rows, flushes = date_stats.flushes, "date_dim loaded");

        tracing::info!(
            customers = self.config.customer_count,
            zipcodes = zip_pool.len(),
            "loading customer_dim"
        );
        let mut loader = BatchLoader::new(customer_sink, CustomerDimRow::TABLE, self.batch_sizes.customer_dim)?;
        let customer_keys = customers.generate(&mut self.rng, &mut loader).await?;
        let customer_stats = loader.finish().await?;
        check_phase(CustomerDimRow::TABLE, customer_stats, customer_keys.len())?;
        check_contiguous_keys(CustomerDimRow::TABLE, &customer_keys)?;
        tracing::info!(
            rows = customer_stats.rows,
            flushes = customer_stats.flushes,
            "customer_dim loaded"
        );

        let expected_facts = date_keys.len() as u64 * customer_keys.len() as u64;
        tracing::info!(
            rows = expected_facts,
            strategy = ?self.config.fact_strategy,
            "loading metering_fact"
        );
        let mut loader = BatchLoader::new(fact_sink, MeteringFactRow::TABLE, self.batch_sizes.metering_fact)?;
        facts.generate(&date_keys, &customer_keys, &mut self.rng, &mut loader).await?;
        let fact_stats = loader.finish().await?;
        check_fact_count(fact_stats, customer_keys.len(), date_keys.len())?;
        tracing::info!(
            rows = fact_stats.rows,
            flushes = fact_stats.flushes,
            "metering_fact loaded"
        );

        Ok(RunSummary {
            date_dim: date_stats,
            customer_dim: customer_stats,
            metering_fact: fact_stats,
        })
    }
}

fn check_phase(table: &str, stats: LoadStats, keys: usize) -> Result<(), PipelineError> {
    if stats.rows != keys as u64 {
        return Err(PipelineError::Integrity(format!(
            "{table} loaded {} rows but generated {keys} keys",
            stats.rows
        )));
    }
    Ok(())
}

fn check_fact_count(stats: LoadStats, customers: usize, dates: usize) -> Result<(), PipelineError> {
    let expected = customers as u64 * dates as u64;
    if stats.rows != expected {
        return Err(PipelineError::Integrity(format!(
            "metering_fact loaded {} rows, expected {customers} customers x {dates} dates = {expected}",
            stats.rows
        )));
    }
    Ok(())
}

/// Strictly ascending implies no duplicates.
fn check_ascending_keys(table: &str, keys: &[i32]) -> Result<(), PipelineError> {
    if let Some(w) = keys.windows(2).find(|w| w[0] >= w[1]) {
        return Err(PipelineError::Integrity(format!(
            "{table} surrogate key {} follows {}",
            w[1], w[0]
        )));
    }
    Ok(())
}

fn check_contiguous_keys(table: &str, keys: &[i32]) -> Result<(), PipelineError> {
    for (expected, &key) in keys.iter().enumerate() {
        if key as i64 != expected as i64 {
            return Err(PipelineError::Integrity(format!(
                "{table} surrogate key {key} found at position {expected}"
            )));
        }
    }
    Ok(())
}
