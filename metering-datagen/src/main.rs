use anyhow::{anyhow, Result};
use metering_datagen::{
    config::{AppConfig, SinkKind},
    metrics_server,
    observability,
    pipeline::Pipeline,
    sinks::ConfiguredSink,
    sources::ZipPool,
    verify,
};
use rust_client::domain::{CustomerDimRow, DateDimRow, MeteringFactRow};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let gen_cfg = &cfg.generation;
    let zip_pool = ZipPool::from_csv_path(&cfg.reference.zipcodes_path, &gen_cfg.region_state_codes)?;

    // One connection is enough: phases never overlap.
    let needs_db = cfg.sinks.uses(SinkKind::RowInsert) || cfg.verify_destination;
    let pool = match (&cfg.database, needs_db) {
        (Some(db), true) => Some(
            PgPoolOptions::new()
                .max_connections(db.max_connections)
                .connect(&db.uri)
                .await?,
        ),
        (None, true) => return Err(anyhow!("a [database] section is required for row_insert sinks or verification")),
        (_, false) => None,
    };

    let date_sink: ConfiguredSink<DateDimRow> =
        ConfiguredSink::from_config(&cfg.sinks.date_dim, pool.as_ref(), cfg.bulk.as_ref())?;
    let customer_sink: ConfiguredSink<CustomerDimRow> =
        ConfiguredSink::from_config(&cfg.sinks.customer_dim, pool.as_ref(), cfg.bulk.as_ref())?;
    let fact_sink: ConfiguredSink<MeteringFactRow> =
        ConfiguredSink::from_config(&cfg.sinks.metering_fact, pool.as_ref(), cfg.bulk.as_ref())?;

    let pipeline = Pipeline::new(gen_cfg.clone())?.with_batch_sizes(cfg.sinks.batch_sizes(gen_cfg.batch_size))?;
    let summary = pipeline
        .run(&zip_pool, &date_sink, &customer_sink, &fact_sink)
        .await?;

    tracing::info!(
        date_dim = summary.date_dim.rows,
        customer_dim = summary.customer_dim.rows,
        metering_fact = summary.metering_fact.rows,
        flushes = summary.date_dim.flushes + summary.customer_dim.flushes + summary.metering_fact.flushes,
        "load complete"
    );

    if cfg.verify_destination {
        if let Some(pool) = &pool {
            verify::verify_destination(pool, gen_cfg, &summary).await?;
        }
    }

    Ok(())
}
