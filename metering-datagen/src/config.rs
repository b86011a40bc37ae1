use serde::Deserialize;
use std::{fs, path::PathBuf};
use time::Date;

use crate::pipeline::{BatchSizes, PipelineError};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    1
}

/// How fact measures are drawn. Both produce rows with the same contracts;
/// they consume the RNG differently, so switching strategy changes the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStrategy {
    /// Independent per-row draws with rejection sampling for voltages.
    #[default]
    Scalar,
    /// Per-chunk array draws with half-normal voltage offsets.
    Vectorized,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(with = "iso_date")]
    pub start_date: Date,
    #[serde(with = "iso_date")]
    pub end_date: Date,
    pub customer_count: usize,
    pub batch_size: usize,
    pub random_seed: u64,
    pub nominal_voltage: f64,
    /// Voltage standard deviation as a fraction of `nominal_voltage`.
    pub voltage_sd_fraction: f64,
    pub outage_probability: f64,
    /// Multipliers on `base_daily_consumption`, January first.
    pub monthly_consumption_adjustment: [f64; 12],
    pub region_state_codes: Vec<String>,
    #[serde(default = "default_base_daily_consumption")]
    pub base_daily_consumption: f64,
    #[serde(default)]
    pub fact_strategy: FactStrategy,
    #[serde(default = "default_max_voltage_redraws")]
    pub max_voltage_redraws: u32,
}

fn default_base_daily_consumption() -> f64 {
    30.0
}

fn default_max_voltage_redraws() -> u32 {
    1000
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::Configuration(msg));

        if self.end_date < self.start_date {
            return invalid(format!(
                "end_date {} is before start_date {}",
                self.end_date, self.start_date
            ));
        }
        if self.customer_count == 0 {
            return invalid("customer_count must be positive".to_string());
        }
        if self.customer_count > i32::MAX as usize {
            return invalid(format!(
                "customer_count {} exceeds the surrogate key range",
                self.customer_count
            ));
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".to_string());
        }
        if !(self.nominal_voltage.is_finite() && self.nominal_voltage > 0.0) {
            return invalid(format!("nominal_voltage {} must be positive", self.nominal_voltage));
        }
        if !(self.voltage_sd_fraction.is_finite() && self.voltage_sd_fraction > 0.0) {
            return invalid(format!(
                "voltage_sd_fraction {} must be positive",
                self.voltage_sd_fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.outage_probability) {
            return invalid(format!(
                "outage_probability {} must be within [0, 1]",
                self.outage_probability
            ));
        }
        if !(self.base_daily_consumption.is_finite() && self.base_daily_consumption >= 0.0) {
            return invalid(format!(
                "base_daily_consumption {} must be non-negative",
                self.base_daily_consumption
            ));
        }
        if let Some((i, adj)) = self
            .monthly_consumption_adjustment
            .iter()
            .enumerate()
            .find(|(_, a)| !(a.is_finite() && **a >= 0.0))
        {
            return invalid(format!(
                "monthly_consumption_adjustment[{i}] = {adj} must be non-negative"
            ));
        }
        if self.max_voltage_redraws == 0 {
            return invalid("max_voltage_redraws must be positive".to_string());
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceConfig {
    pub zipcodes_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Multi-row parameterized INSERT, one transaction per batch.
    RowInsert,
    /// Staging file handed to an external bulk-ingest command.
    BulkFile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableSinkConfig {
    pub kind: SinkKind,
    /// Overrides `generation.batch_size` for this table.
    pub batch_size: Option<usize>,
}

impl Default for TableSinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::RowInsert,
            batch_size: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SinksConfig {
    #[serde(default)]
    pub date_dim: TableSinkConfig,
    #[serde(default)]
    pub customer_dim: TableSinkConfig,
    #[serde(default)]
    pub metering_fact: TableSinkConfig,
}

impl SinksConfig {
    pub fn uses(&self, kind: SinkKind) -> bool {
        [&self.date_dim, &self.customer_dim, &self.metering_fact]
            .iter()
            .any(|t| t.kind == kind)
    }

    pub fn batch_sizes(&self, default_batch_size: usize) -> BatchSizes {
        BatchSizes {
            date_dim: self.date_dim.batch_size.unwrap_or(default_batch_size),
            customer_dim: self.customer_dim.batch_size.unwrap_or(default_batch_size),
            metering_fact: self.metering_fact.batch_size.unwrap_or(default_batch_size),
        }
    }
}

/// External bulk-ingest command.
///
/// `{file}`, `{table}` and `{columns}` are substituted in `args` and in
/// `stdin_template` before each invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkCommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub stdin_template: Option<String>,
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl BulkCommandConfig {
    /// The staging delimiter as the single byte the CSV writer takes.
    pub fn delimiter_byte(&self) -> Result<u8, PipelineError> {
        if !self.delimiter.is_ascii() {
            return Err(PipelineError::Configuration(format!(
                "bulk delimiter {:?} must be a single ASCII character",
                self.delimiter
            )));
        }
        Ok(self.delimiter as u8)
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: Option<DatabaseConfig>,
    pub generation: GenerationConfig,
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    pub bulk: Option<BulkCommandConfig>,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub verify_destination: bool,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("DATAGEN_CONFIG").unwrap_or_else(|_| "datagen-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        if let Some(bulk) = &cfg.bulk {
            bulk.delimiter_byte()?;
        }
        Ok(cfg)
    }
}
