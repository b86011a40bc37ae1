use rand::Rng;
use rust_client::domain::CustomerDimRow;

use crate::{
    pipeline::{BatchLoader, PipelineError, Sink},
    sources::ZipPool,
};

/// Customers `0..count` placed at zipcodes drawn uniformly, with replacement,
/// from the region pool.
pub struct CustomerDimensionGenerator<'a> {
    count: i32,
    zip_pool: &'a ZipPool,
}

impl<'a> CustomerDimensionGenerator<'a> {
    pub fn new(count: usize, zip_pool: &'a ZipPool) -> Result<Self, PipelineError> {
        if zip_pool.is_empty() {
            return Err(PipelineError::DataSource(
                "zipcode pool is empty after region filtering".to_string(),
            ));
        }
        let count = i32::try_from(count)
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| PipelineError::Configuration(format!("invalid customer count {count}")))?;

        Ok(Self { count, zip_pool })
    }

    fn row<R: Rng>(&self, skey: i32, rng: &mut R) -> CustomerDimRow {
        let idx = rng.gen_range(0..self.zip_pool.len());
        let entry = &self.zip_pool.entries()[idx];
        CustomerDimRow {
            skey,
            zipcode: entry.zipcode.clone(),
            county: entry.county.clone(),
            state: entry.state.clone(),
        }
    }

    /// Streams every customer into `loader` and returns the keys in order.
    pub async fn generate<R, K>(
        &self,
        rng: &mut R,
        loader: &mut BatchLoader<'_, CustomerDimRow, K>,
    ) -> Result<Vec<i32>, PipelineError>
    where
        R: Rng,
        K: Sink<CustomerDimRow> + ?Sized,
    {
        let mut keys = Vec::with_capacity(self.count as usize);
        for skey in 0..self.count {
            let row = self.row(skey, rng);
            keys.push(skey);
            loader.append(row).await?;
        }
        Ok(keys)
    }
}
