use std::{collections::BTreeMap, fs::File, io, path::Path};

use csv::StringRecord;

use crate::pipeline::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub zipcode: String,
    pub county: String,
    pub state: String,
}

/// Zipcode → (county, state) reference pool, restricted to a set of states.
///
/// Entries are held in zipcode order so sampling by index does not depend on
/// the order of the input file. The pool may come out empty; the customer
/// generator refuses to run on one.
#[derive(Debug, Clone)]
pub struct ZipPool {
    entries: Vec<ZipEntry>,
}

impl ZipPool {
    /// Builds the pool from raw entries, keeping those whose state is in
    /// `states`. The first entry wins when a zipcode repeats.
    pub fn from_entries<I>(entries: I, states: &[String]) -> Self
    where
        I: IntoIterator<Item = ZipEntry>,
    {
        let mut by_zip: BTreeMap<String, ZipEntry> = BTreeMap::new();
        for entry in entries {
            if states.iter().any(|s| s == &entry.state) {
                by_zip.entry(entry.zipcode.clone()).or_insert(entry);
            }
        }

        if by_zip.is_empty() {
            tracing::warn!(?states, "no zipcodes found for the configured states");
        }

        Self {
            entries: by_zip.into_values().collect(),
        }
    }

    /// Reads a headed CSV with `zipcode` (or `zip`), `county` and `state`
    /// columns.
    pub fn from_csv_reader<R: io::Read>(reader: R, states: &[String]) -> Result<Self, PipelineError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| PipelineError::DataSource(format!("failed to read zipcode CSV headers: {e}")))?
            .clone();

        let zip_idx = column_index(&headers, &["zipcode", "zip"])?;
        let county_idx = column_index(&headers, &["county"])?;
        let state_idx = column_index(&headers, &["state"])?;

        let mut entries = Vec::new();
        for result in rdr.records() {
            let record = result
                .map_err(|e| PipelineError::DataSource(format!("failed to read zipcode CSV record: {e}")))?;
            entries.push(record_to_entry(&record, zip_idx, county_idx, state_idx)?);
        }

        Ok(Self::from_entries(entries, states))
    }

    pub fn from_csv_path<P: AsRef<Path>>(path: P, states: &[String]) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            PipelineError::DataSource(format!("failed to open zipcode file {}: {e}", path.display()))
        })?;
        let pool = Self::from_csv_reader(file, states)?;
        tracing::info!(path = %path.display(), zipcodes = pool.len(), "zipcode pool loaded");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&ZipEntry> {
        self.entries.get(idx)
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }
}

fn column_index(headers: &StringRecord, names: &[&str]) -> Result<usize, PipelineError> {
    headers
        .iter()
        .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
        .ok_or_else(|| PipelineError::DataSource(format!("missing column '{}' in zipcode CSV", names[0])))
}

fn record_to_entry(
    record: &StringRecord,
    zip_idx: usize,
    county_idx: usize,
    state_idx: usize,
) -> Result<ZipEntry, PipelineError> {
    let get = |idx: usize| -> Result<String, PipelineError> {
        record
            .get(idx)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| PipelineError::DataSource(format!("short zipcode CSV record: {record:?}")))
    };

    let zipcode = get(zip_idx)?;
    if zipcode.is_empty() {
        return Err(PipelineError::DataSource(format!("empty zipcode in record: {record:?}")));
    }

    Ok(ZipEntry {
        zipcode,
        county: get(county_idx)?,
        state: get(state_idx)?,
    })
}
