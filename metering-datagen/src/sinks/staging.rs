use std::{
    fs::OpenOptions,
    io::{self, ErrorKind},
    path::Path,
};

use csv::{Terminator, WriterBuilder};
use memmap2::MmapMut;

use crate::{pipeline::PipelineError, sinks::TableRow};

/// Upper bound on the serialized width of a single field, line terminator
/// included in the per-row budget.
const FIELD_BYTES_BOUND: usize = 64;

/// Writes a batch as a delimited text file for a bulk-ingest command.
///
/// The file is first extended to an upper bound of `columns * 64` bytes per
/// row, rows are encoded by a `csv::Writer` directly into a writable mapping,
/// and the file is then truncated to the bytes actually written so no padding
/// is left behind.
#[derive(Debug, Clone, Copy)]
pub struct StagingFileWriter {
    delimiter: u8,
}

impl Default for StagingFileWriter {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl StagingFileWriter {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Returns the number of bytes in the finished file.
    pub fn write<T: TableRow>(&self, batch: &[T], path: &Path) -> Result<u64, PipelineError> {
        let io_err = |e: io::Error| staging_error::<T>(path, e);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(io_err)?;

        let bound = batch.len() * T::COLUMNS.len() * FIELD_BYTES_BOUND;
        if bound == 0 {
            return Ok(0);
        }
        file.set_len(bound as u64).map_err(io_err)?;

        // SAFETY: the file was just created and truncated by this process and
        // is not shared with any other writer while the mapping is alive.
        let mut map = unsafe { MmapMut::map_mut(&file) }.map_err(io_err)?;

        let written = {
            let mut wtr = WriterBuilder::new()
                .delimiter(self.delimiter)
                .has_headers(false)
                .terminator(Terminator::Any(b'\n'))
                .from_writer(&mut map[..]);

            for row in batch {
                wtr.write_record(row.record()).map_err(|e| match e.into_kind() {
                    csv::ErrorKind::Io(e) => io_err(e),
                    other => PipelineError::Sink(format!(
                        "staging file {}: cannot encode {} row: {other:?}",
                        path.display(),
                        T::TABLE
                    )),
                })?;
            }

            // The slice writer advances past every byte it accepts.
            let remaining = wtr.into_inner().map_err(|e| io_err(e.into_error()))?;
            bound - remaining.len()
        };

        map.flush().map_err(io_err)?;
        drop(map);
        file.set_len(written as u64).map_err(io_err)?;

        Ok(written as u64)
    }
}

/// A full region surfaces as `WriteZero` from the slice writer.
fn staging_error<T: TableRow>(path: &Path, e: io::Error) -> PipelineError {
    if e.kind() == ErrorKind::WriteZero {
        return PipelineError::Sink(format!(
            "staging file {}: {} rows exceed the mapped region",
            path.display(),
            T::TABLE
        ));
    }
    PipelineError::Sink(format!("staging file {}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_client::domain::{CustomerDimRow, MeteringFactRow};
    use tempfile::TempDir;

    fn fact(customer_skey: i32) -> MeteringFactRow {
        MeteringFactRow {
            customer_skey,
            date_skey: 20150101,
            consumption: 41.5,
            min_voltage: 117.0,
            max_voltage: 123.25,
            outage: 0,
        }
    }

    #[test]
    fn file_is_truncated_to_written_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metering_fact.csv");
        let batch = vec![fact(0), fact(1), fact(2)];

        let written = StagingFileWriter::default().write(&batch, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "0,20150101,41.5,117,123.25,0\n1,20150101,41.5,117,123.25,0\n2,20150101,41.5,117,123.25,0\n"
        );
        assert_eq!(written, contents.len() as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), written);
    }

    #[test]
    fn rewriting_a_smaller_batch_leaves_no_stale_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metering_fact.csv");
        let writer = StagingFileWriter::new(b'|');

        writer.write(&[fact(0), fact(1), fact(2)], &path).unwrap();
        writer.write(&[fact(9)], &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "9|20150101|41.5|117|123.25|0\n");
    }

    #[test]
    fn text_fields_with_delimiter_or_quotes_are_quoted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("customer_dim.csv");
        let row = CustomerDimRow {
            skey: 3,
            zipcode: "02139".to_string(),
            county: "Middlesex, \"North\"".to_string(),
            state: "MA".to_string(),
        };

        StagingFileWriter::default().write(&[row], &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "3,02139,\"Middlesex, \"\"North\"\"\",MA\n");
    }

    #[test]
    fn empty_batch_writes_an_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.csv");

        let written = StagingFileWriter::default()
            .write::<MeteringFactRow>(&[], &path)
            .unwrap();

        assert_eq!(written, 0);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn oversized_row_is_a_sink_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("customer_dim.csv");
        let row = CustomerDimRow {
            skey: 0,
            zipcode: "02139".to_string(),
            county: "x".repeat(400),
            state: "MA".to_string(),
        };

        match StagingFileWriter::default().write(&[row], &path) {
            Err(PipelineError::Sink(msg)) => assert!(msg.contains("exceed the mapped region"), "{msg}"),
            other => panic!("expected sink error, got {other:?}"),
        }
    }

    #[test]
    fn unwritable_path_is_a_sink_error() {
        let res = StagingFileWriter::default().write(&[fact(0)], Path::new("/nonexistent/dir/fact.csv"));
        assert!(matches!(res, Err(PipelineError::Sink(_))));
    }
}
