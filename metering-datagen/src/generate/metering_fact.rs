use rand::{distributions::Bernoulli, Rng};
use rand_distr::{Distribution, Normal};
use rust_client::domain::MeteringFactRow;

use crate::{
    config::{FactStrategy, GenerationConfig},
    pipeline::{BatchLoader, PipelineError, Sink},
};

/// Consumption standard deviation as a fraction of the month's mean.
const CONSUMPTION_SD_RATIO: f64 = 0.4;

/// Statistical model behind one fact row.
///
/// Daily consumption is normal around `base_daily_consumption` scaled by the
/// month's adjustment, clipped at zero. Voltages are normal around the nominal
/// voltage, truncated to the upper half for `max_voltage` and the lower half
/// for `min_voltage`. Outage is a Bernoulli flag.
#[derive(Debug, Clone)]
pub struct FactModel {
    base_daily_consumption: f64,
    monthly_adjustment: [f64; 12],
    nominal_voltage: f64,
    max_voltage_redraws: u32,
    voltage: Normal<f64>,
    voltage_offset: Normal<f64>,
    outage_probability: f64,
    outage: Bernoulli,
}

impl FactModel {
    pub fn from_config(cfg: &GenerationConfig) -> Result<Self, PipelineError> {
        let voltage_sd = cfg.nominal_voltage * cfg.voltage_sd_fraction;
        let voltage = Normal::new(cfg.nominal_voltage, voltage_sd)
            .map_err(|e| PipelineError::Configuration(format!("invalid voltage distribution: {e}")))?;
        let voltage_offset = Normal::new(0.0, voltage_sd)
            .map_err(|e| PipelineError::Configuration(format!("invalid voltage distribution: {e}")))?;
        let outage = Bernoulli::new(cfg.outage_probability)
            .map_err(|e| PipelineError::Configuration(format!("invalid outage probability: {e}")))?;

        Ok(Self {
            base_daily_consumption: cfg.base_daily_consumption,
            monthly_adjustment: cfg.monthly_consumption_adjustment,
            nominal_voltage: cfg.nominal_voltage,
            max_voltage_redraws: cfg.max_voltage_redraws,
            voltage,
            voltage_offset,
            outage_probability: cfg.outage_probability,
            outage,
        })
    }

    /// Consumption distribution for the month encoded in a `YYYYMMDD` key.
    pub fn consumption_for(&self, date_skey: i32) -> Result<Normal<f64>, PipelineError> {
        let month = (date_skey / 100) % 100;
        let adjustment = usize::try_from(month - 1)
            .ok()
            .and_then(|idx| self.monthly_adjustment.get(idx))
            .ok_or_else(|| PipelineError::Integrity(format!("date key {date_skey} has no valid month")))?;

        let mean = self.base_daily_consumption * adjustment;
        Normal::new(mean, mean * CONSUMPTION_SD_RATIO)
            .map_err(|e| PipelineError::Configuration(format!("invalid consumption distribution: {e}")))
    }

    /// Draws voltages until one satisfies `accept`.
    fn redraw_voltage<R, P>(&self, rng: &mut R, accept: P) -> Result<f64, PipelineError>
    where
        R: Rng,
        P: Fn(f64) -> bool,
    {
        for _ in 0..self.max_voltage_redraws {
            let v = self.voltage.sample(rng);
            if accept(v) {
                return Ok(v);
            }
        }
        Err(PipelineError::Configuration(format!(
            "no acceptable voltage after {} redraws",
            self.max_voltage_redraws
        )))
    }

    fn scalar_row<R: Rng>(
        &self,
        customer_skey: i32,
        date_skey: i32,
        consumption: &Normal<f64>,
        rng: &mut R,
    ) -> Result<MeteringFactRow, PipelineError> {
        let nominal = self.nominal_voltage;
        let consumption = consumption.sample(rng).max(0.0);
        let max_voltage = self.redraw_voltage(rng, |v| v >= nominal)?;
        let min_voltage = self.redraw_voltage(rng, |v| v <= nominal)?;
        let outage = i16::from(self.outage.sample(rng));

        Ok(MeteringFactRow {
            customer_skey,
            date_skey,
            consumption,
            min_voltage,
            max_voltage,
            outage,
        })
    }
}

/// Reusable column buffers for the vectorized strategy.
#[derive(Default)]
struct FactColumns {
    consumption: Vec<f64>,
    max_voltage: Vec<f64>,
    min_voltage: Vec<f64>,
    outage: Vec<i16>,
}

impl FactColumns {
    fn fill<R: Rng>(&mut self, model: &FactModel, consumption: &Normal<f64>, n: usize, rng: &mut R) {
        let nominal = model.nominal_voltage;

        self.consumption.clear();
        self.consumption
            .extend((0..n).map(|_| consumption.sample(rng).max(0.0)));

        self.max_voltage.clear();
        self.max_voltage
            .extend((0..n).map(|_| nominal + model.voltage_offset.sample(rng).abs()));

        self.min_voltage.clear();
        self.min_voltage
            .extend((0..n).map(|_| nominal - model.voltage_offset.sample(rng).abs()));

        self.outage.clear();
        self.outage
            .extend((0..n).map(|_| i16::from(rng.gen::<f64>() < model.outage_probability)));
    }
}

/// Cross joins date and customer keys into one fact row per pair, dates in
/// the outer loop.
pub struct MeteringFactGenerator {
    model: FactModel,
    strategy: FactStrategy,
}

impl MeteringFactGenerator {
    pub fn new(model: FactModel, strategy: FactStrategy) -> Self {
        Self { model, strategy }
    }

    /// Streams `date_keys.len() * customer_keys.len()` rows into `loader` and
    /// returns how many were produced.
    pub async fn generate<R, K>(
        &self,
        date_keys: &[i32],
        customer_keys: &[i32],
        rng: &mut R,
        loader: &mut BatchLoader<'_, MeteringFactRow, K>,
    ) -> Result<u64, PipelineError>
    where
        R: Rng,
        K: Sink<MeteringFactRow> + ?Sized,
    {
        match self.strategy {
            FactStrategy::Scalar => self.generate_scalar(date_keys, customer_keys, rng, loader).await,
            FactStrategy::Vectorized => self.generate_vectorized(date_keys, customer_keys, rng, loader).await,
        }
    }

    async fn generate_scalar<R, K>(
        &self,
        date_keys: &[i32],
        customer_keys: &[i32],
        rng: &mut R,
        loader: &mut BatchLoader<'_, MeteringFactRow, K>,
    ) -> Result<u64, PipelineError>
    where
        R: Rng,
        K: Sink<MeteringFactRow> + ?Sized,
    {
        let mut produced = 0u64;
        for &date_skey in date_keys {
            let consumption = self.model.consumption_for(date_skey)?;
            for &customer_skey in customer_keys {
                let row = self.model.scalar_row(customer_skey, date_skey, &consumption, rng)?;
                loader.append(row).await?;
                produced += 1;
            }
        }
        Ok(produced)
    }

    async fn generate_vectorized<R, K>(
        &self,
        date_keys: &[i32],
        customer_keys: &[i32],
        rng: &mut R,
        loader: &mut BatchLoader<'_, MeteringFactRow, K>,
    ) -> Result<u64, PipelineError>
    where
        R: Rng,
        K: Sink<MeteringFactRow> + ?Sized,
    {
        let chunk_len = loader.batch_size();
        let mut cols = FactColumns::default();
        let mut produced = 0u64;

        for &date_skey in date_keys {
            let consumption = self.model.consumption_for(date_skey)?;
            for chunk in customer_keys.chunks(chunk_len) {
                cols.fill(&self.model, &consumption, chunk.len(), rng);
                for (i, &customer_skey) in chunk.iter().enumerate() {
                    loader
                        .append(MeteringFactRow {
                            customer_skey,
                            date_skey,
                            consumption: cols.consumption[i],
                            min_voltage: cols.min_voltage[i],
                            max_voltage: cols.max_voltage[i],
                            outage: cols.outage[i],
                        })
                        .await?;
                    produced += 1;
                }
            }
        }
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::Mutex;
    use time::macros::date;

    const NOMINAL: f64 = 120.0;

    fn config(strategy: FactStrategy, outage_probability: f64) -> GenerationConfig {
        GenerationConfig {
            start_date: date!(2015 - 01 - 01),
            end_date: date!(2015 - 12 - 31),
            customer_count: 1,
            batch_size: 1000,
            random_seed: 42,
            nominal_voltage: NOMINAL,
            voltage_sd_fraction: 0.05,
            outage_probability,
            monthly_consumption_adjustment: [1.62, 1.49, 0.90, 0.12, 0.66, 1.25, 1.58, 1.38, 0.92, 0.21, 0.51, 1.36],
            region_state_codes: vec!["MA".to_string()],
            base_daily_consumption: 30.0,
            fact_strategy: strategy,
            max_voltage_redraws: 1000,
        }
    }

    #[derive(Default)]
    struct CollectSink(Mutex<Vec<MeteringFactRow>>);

    #[async_trait::async_trait]
    impl Sink<MeteringFactRow> for CollectSink {
        async fn write(&self, batch: &[MeteringFactRow]) -> Result<(), PipelineError> {
            self.0.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    async fn run(cfg: &GenerationConfig, date_keys: &[i32], customers: i32) -> Result<Vec<MeteringFactRow>, PipelineError> {
        let gen = MeteringFactGenerator::new(FactModel::from_config(cfg)?, cfg.fact_strategy);
        let customer_keys: Vec<i32> = (0..customers).collect();
        let sink = CollectSink::default();
        let mut rng = StdRng::seed_from_u64(cfg.random_seed);
        let mut loader = BatchLoader::new(&sink, MeteringFactRow::TABLE, cfg.batch_size)?;

        let produced = gen.generate(date_keys, &customer_keys, &mut rng, &mut loader).await?;
        loader.finish().await?;

        let rows = sink.0.into_inner().unwrap();
        assert_eq!(produced as usize, rows.len());
        Ok(rows)
    }

    fn mean(xs: impl Iterator<Item = f64>) -> f64 {
        let (sum, n) = xs.fold((0.0, 0usize), |(s, n), x| (s + x, n + 1));
        sum / n as f64
    }

    fn variance(xs: &[f64]) -> f64 {
        let m = mean(xs.iter().copied());
        mean(xs.iter().map(|x| (x - m) * (x - m)))
    }

    #[tokio::test]
    async fn rows_honor_value_contracts_for_both_strategies() {
        for strategy in [FactStrategy::Scalar, FactStrategy::Vectorized] {
            let rows = run(&config(strategy, 0.3), &[20150101, 20150415], 500).await.unwrap();

            assert_eq!(rows.len(), 1000);
            for r in &rows {
                assert!(r.consumption >= 0.0);
                assert!(r.min_voltage <= NOMINAL && NOMINAL <= r.max_voltage);
                assert!(r.outage == 0 || r.outage == 1);
            }
        }
    }

    #[tokio::test]
    async fn dates_are_the_outer_loop() {
        let rows = run(&config(FactStrategy::Scalar, 0.0), &[20150101, 20150102], 3).await.unwrap();
        let pairs: Vec<(i32, i32)> = rows.iter().map(|r| (r.date_skey, r.customer_skey)).collect();
        assert_eq!(
            pairs,
            vec![
                (20150101, 0),
                (20150101, 1),
                (20150101, 2),
                (20150102, 0),
                (20150102, 1),
                (20150102, 2),
            ]
        );
    }

    #[tokio::test]
    async fn zero_outage_probability_never_flags_outage() {
        for strategy in [FactStrategy::Scalar, FactStrategy::Vectorized] {
            let rows = run(&config(strategy, 0.0), &[20150101, 20150701], 2000).await.unwrap();
            assert!(rows.iter().all(|r| r.outage == 0));
        }
    }

    #[tokio::test]
    async fn consumption_mean_tracks_the_month() {
        let rows = run(&config(FactStrategy::Scalar, 0.0), &[20150115, 20150415], 5000).await.unwrap();

        let january = mean(rows.iter().filter(|r| r.date_skey == 20150115).map(|r| r.consumption));
        let april = mean(rows.iter().filter(|r| r.date_skey == 20150415).map(|r| r.consumption));

        assert!((january - 30.0 * 1.62).abs() < 30.0 * 1.62 * 0.05, "january mean {january}");
        assert!((april - 30.0 * 0.12).abs() < 30.0 * 0.12 * 0.05, "april mean {april}");
    }

    /// The vectorized construction must match the rejection-sampling one in
    /// distribution before it can stand in for it.
    #[tokio::test]
    async fn vectorized_matches_scalar_in_distribution() {
        let dates = [20150115, 20150715];
        let scalar = run(&config(FactStrategy::Scalar, 0.05), &dates, 10_000).await.unwrap();
        let vectorized = run(&config(FactStrategy::Vectorized, 0.05), &dates, 10_000).await.unwrap();

        let sd = NOMINAL * 0.05;
        let half_normal_mean = sd * (2.0 / std::f64::consts::PI).sqrt();
        let half_normal_variance = sd * sd * (1.0 - 2.0 / std::f64::consts::PI);

        for rows in [&scalar, &vectorized] {
            let above: Vec<f64> = rows.iter().map(|r| r.max_voltage - NOMINAL).collect();
            let below: Vec<f64> = rows.iter().map(|r| NOMINAL - r.min_voltage).collect();
            let (above_mean, below_mean) = (mean(above.iter().copied()), mean(below.iter().copied()));
            assert!((above_mean - half_normal_mean).abs() < 0.15, "max offset mean {above_mean}");
            assert!((below_mean - half_normal_mean).abs() < 0.15, "min offset mean {below_mean}");

            let (above_var, below_var) = (variance(&above), variance(&below));
            assert!(
                (above_var - half_normal_variance).abs() < half_normal_variance * 0.05,
                "max offset variance {above_var}, expected {half_normal_variance}"
            );
            assert!(
                (below_var - half_normal_variance).abs() < half_normal_variance * 0.05,
                "min offset variance {below_var}, expected {half_normal_variance}"
            );

            let outage_rate = mean(rows.iter().map(|r| f64::from(r.outage)));
            assert!((outage_rate - 0.05).abs() < 0.01, "outage rate {outage_rate}");
        }

        let scalar_consumption = mean(scalar.iter().map(|r| r.consumption));
        let vectorized_consumption = mean(vectorized.iter().map(|r| r.consumption));
        assert!(
            (scalar_consumption - vectorized_consumption).abs() / scalar_consumption < 0.02,
            "consumption means {scalar_consumption} vs {vectorized_consumption}"
        );

        // Months differ in mean, so spread is compared per date.
        for date_skey in dates {
            let spread = |rows: &[MeteringFactRow]| {
                let xs: Vec<f64> = rows
                    .iter()
                    .filter(|r| r.date_skey == date_skey)
                    .map(|r| r.consumption)
                    .collect();
                variance(&xs)
            };
            let (s, v) = (spread(&scalar), spread(&vectorized));
            assert!((s - v).abs() / s < 0.08, "{date_skey} consumption variance {s} vs {v}");
        }
    }

    #[tokio::test]
    async fn exhausted_voltage_redraws_fail_instead_of_looping() {
        let mut cfg = config(FactStrategy::Scalar, 0.0);
        cfg.max_voltage_redraws = 1;

        let res = run(&cfg, &[20150101], 200).await;
        assert!(matches!(res, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn invalid_month_in_date_key_is_rejected() {
        let model = FactModel::from_config(&config(FactStrategy::Scalar, 0.0)).unwrap();
        assert!(model.consumption_for(20151301).is_err());
        assert!(model.consumption_for(20150001).is_err());
        assert!(model.consumption_for(20151201).is_ok());
    }
}
