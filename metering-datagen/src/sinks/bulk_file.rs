use std::{io, marker::PhantomData, path::PathBuf, process::Stdio};

use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    config::BulkCommandConfig,
    pipeline::{PipelineError, Sink},
    sinks::{StagingFileWriter, TableRow},
};

/// Stages each batch as a delimited file and hands it to an external
/// bulk-ingest command.
///
/// The staging file lives at `{staging_dir}/{table}_staging.csv` and is
/// rewritten on every flush.
pub struct BulkFileSink<T> {
    program: String,
    args: Vec<String>,
    stdin_template: Option<String>,
    staging: StagingFileWriter,
    staging_path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: TableRow> BulkFileSink<T> {
    pub fn new(cfg: &BulkCommandConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            program: cfg.program.clone(),
            args: cfg.args.clone(),
            stdin_template: cfg.stdin_template.clone(),
            staging: StagingFileWriter::new(cfg.delimiter_byte()?),
            staging_path: cfg.staging_dir.join(format!("{}_staging.csv", T::TABLE)),
            _marker: PhantomData,
        })
    }

    pub fn staging_path(&self) -> &PathBuf {
        &self.staging_path
    }

    /// Substitutes `{file}`, `{table}` and `{columns}`.
    fn render(&self, template: &str) -> String {
        template
            .replace("{file}", &self.staging_path.to_string_lossy())
            .replace("{table}", T::TABLE)
            .replace("{columns}", &T::COLUMNS.join(", "))
    }

    /// A non-zero exit is reported ahead of a failed stdin write: a command
    /// that dies early breaks the pipe, and its stderr names the real cause.
    async fn ingest(&self) -> Result<(), PipelineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| self.render(a)))
            .stdin(if self.stdin_template.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| PipelineError::Sink(format!("failed to start bulk ingest '{}': {e}", self.program)))?;

        let mut stdin_err = None;
        if let Some(template) = &self.stdin_template {
            match child.stdin.take() {
                Some(mut stdin) => {
                    if let Err(e) = stdin.write_all(self.render(template).as_bytes()).await {
                        stdin_err = Some(e);
                    }
                    // Closing stdin lets the command see end of input.
                    drop(stdin);
                }
                None => stdin_err = Some(io::Error::new(io::ErrorKind::BrokenPipe, "stdin unavailable")),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PipelineError::Sink(format!("bulk ingest '{}' did not finish: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Sink(format!(
                "bulk ingest into {} exited {}: {}",
                T::TABLE,
                output.status,
                stderr.trim()
            )));
        }
        if let Some(e) = stdin_err {
            return Err(PipelineError::Sink(format!("failed to write bulk ingest script: {e}")));
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl<T> Sink<T> for BulkFileSink<T>
where
    T: TableRow,
{
    async fn write(&self, batch: &[T]) -> Result<(), PipelineError> {
        if batch.is_empty() {
            return Ok(());
        }

        let bytes = self.staging.write(batch, &self.staging_path)?;
        metrics::counter!("datagen_bulk_staged_bytes_total", "table" => T::TABLE).increment(bytes);

        if let Err(e) = self.ingest().await {
            tracing::error!(error = %e, table = T::TABLE, path = %self.staging_path.display(), "bulk ingest failed");
            return Err(e);
        }

        tracing::debug!(table = T::TABLE, rows = batch.len(), bytes, "batch bulk ingested");
        Ok(())
    }
}
