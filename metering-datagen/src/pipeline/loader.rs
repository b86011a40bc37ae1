use std::time::Instant;

use crate::pipeline::{PipelineError, Sink};

/// Rows and flushes pushed through one [`BatchLoader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub rows: u64,
    pub flushes: u64,
}

/// Buffers rows for a single table and hands them to a [`Sink`] in batches.
///
/// `append` flushes automatically once the buffer holds `batch_size` rows.
/// The last partial batch is only written by an explicit `flush` or `finish`.
/// A sink error is returned as-is and leaves the buffer untouched; callers are
/// expected to abort the run rather than retry.
pub struct BatchLoader<'a, T, K: ?Sized> {
    sink: &'a K,
    table: &'static str,
    batch_size: usize,
    buffer: Vec<T>,
    stats: LoadStats,
}

impl<'a, T, K> BatchLoader<'a, T, K>
where
    T: Send + Sync,
    K: Sink<T> + ?Sized,
{
    pub fn new(sink: &'a K, table: &'static str, batch_size: usize) -> Result<Self, PipelineError> {
        if batch_size == 0 {
            return Err(PipelineError::Configuration(format!(
                "batch size for {table} must be positive"
            )));
        }

        Ok(Self {
            sink,
            table,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: LoadStats::default(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    pub async fn append(&mut self, row: T) -> Result<(), PipelineError> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), PipelineError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        if let Err(e) = self.sink.write(&self.buffer).await {
            tracing::error!(error = %e, table = self.table, rows = self.buffer.len(), "flush failed, aborting load");
            metrics::counter!("datagen_sink_errors_total", "table" => self.table).increment(1);
            return Err(e);
        }

        let rows = self.buffer.len() as u64;
        self.buffer.clear();
        self.stats.rows += rows;
        self.stats.flushes += 1;

        metrics::counter!("datagen_rows_flushed_total", "table" => self.table).increment(rows);
        metrics::counter!("datagen_flushes_total", "table" => self.table).increment(1);
        metrics::histogram!("datagen_flush_duration_seconds", "table" => self.table)
            .record(started.elapsed().as_secs_f64());

        tracing::debug!(
            table = self.table,
            rows,
            total_rows = self.stats.rows,
            flushes = self.stats.flushes,
            "batch flushed"
        );

        Ok(())
    }

    /// Flushes whatever is left in the buffer and returns the final counters.
    pub async fn finish(mut self) -> Result<LoadStats, PipelineError> {
        self.flush().await?;
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingSink {
        batches: Mutex<Vec<Vec<u32>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Sink<u32> for CountingSink {
        async fn write(&self, batch: &[u32]) -> Result<(), PipelineError> {
            if self.fail {
                return Err(PipelineError::Sink("boom".to_string()));
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn append_flushes_when_batch_is_full() {
        let sink = CountingSink::default();
        let mut loader = BatchLoader::new(&sink, "t", 3).unwrap();

        for i in 0..7 {
            loader.append(i).await.unwrap();
        }
        assert_eq!(loader.stats(), LoadStats { rows: 6, flushes: 2 });

        let stats = loader.finish().await.unwrap();
        assert_eq!(stats, LoadStats { rows: 7, flushes: 3 });

        let batches = sink.batches.lock().unwrap();
        assert_eq!(*batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[tokio::test]
    async fn empty_flush_does_not_reach_the_sink() {
        let sink = CountingSink::default();
        let mut loader = BatchLoader::new(&sink, "t", 2).unwrap();
        loader.append(1).await.unwrap();
        loader.append(2).await.unwrap();

        let stats = loader.finish().await.unwrap();
        assert_eq!(stats.flushes, 1);
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sink_failure_is_propagated() {
        let sink = CountingSink {
            fail: true,
            ..Default::default()
        };
        let mut loader = BatchLoader::new(&sink, "t", 1).unwrap();

        let res = loader.append(1).await;
        assert!(matches!(res, Err(PipelineError::Sink(_))));
        assert_eq!(loader.stats(), LoadStats::default());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let sink = CountingSink::default();
        let res = BatchLoader::<u32, _>::new(&sink, "t", 0);
        assert!(matches!(res, Err(PipelineError::Configuration(_))));
    }
}
