use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::domain::models::{TelemetrySample, is_valid_station_key};

pub trait TelemetryJournal: Send + Sync {
    fn append_with(
        &self,
        format: PartitionFormat,
        uuid: &str,
        sample: &TelemetrySample,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, JournalError>;

    fn append(
        &self,
        uuid: &str,
        sample: &TelemetrySample,
        now: DateTime<Utc>,
    ) -> Result<(), JournalError> {
        self.append_with(PartitionFormat::Lines, uuid, sample, now)
            .map(|_| ())
    }

    fn read_range(
        &self,
        uuid: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, JournalError>;

    fn station_exists(&self, uuid: &str) -> Result<bool, JournalError>;
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("invalid station key: {0:?}")]
    InvalidStationKey(String),
    #[error("journal I/O failed at {}: {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize sample: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("partition {} is not a JSON array; refusing to overwrite", .path.display())]
    CorruptPartition { path: PathBuf },
    #[error("journal writer lock poisoned")]
    LockPoisoned,
}

impl JournalError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionFormat {
    Lines,
    JsonArray,
}

impl PartitionFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Lines => "jsonl",
            Self::JsonArray => "json",
        }
    }
}

/// Day-partitioned sample store: `<root>/<uuid>/data_<YYYY-MM-DD>.<jsonl|json>`.
pub struct FileJournal {
    root: PathBuf,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileJournal {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| JournalError::io(&root, error))?;

        Ok(Self {
            root,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn partition_path(
        &self,
        uuid: &str,
        date: NaiveDate,
        format: PartitionFormat,
    ) -> Result<PathBuf, JournalError> {
        Ok(self.station_dir(uuid)?.join(format!(
            "data_{}.{}",
            date.format("%Y-%m-%d"),
            format.extension()
        )))
    }

    fn station_dir(&self, uuid: &str) -> Result<PathBuf, JournalError> {
        if !is_valid_station_key(uuid) {
            return Err(JournalError::InvalidStationKey(uuid.to_string()));
        }
        Ok(self.root.join(uuid))
    }

    fn writer_lock(&self, uuid: &str) -> Result<Arc<Mutex<()>>, JournalError> {
        let mut writers = self.writers.lock().map_err(|_| JournalError::LockPoisoned)?;
        Ok(Arc::clone(writers.entry(uuid.to_string()).or_default()))
    }
}

impl TelemetryJournal for FileJournal {
    fn append_with(
        &self,
        format: PartitionFormat,
        uuid: &str,
        sample: &TelemetrySample,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, JournalError> {
        let station_dir = self.station_dir(uuid)?;
        let path = self.partition_path(uuid, now.date_naive(), format)?;

        let writer = self.writer_lock(uuid)?;
        let _guard = writer.lock().map_err(|_| JournalError::LockPoisoned)?;

        fs::create_dir_all(&station_dir).map_err(|error| JournalError::io(&station_dir, error))?;
        match format {
            PartitionFormat::Lines => append_line(&path, sample)?,
            PartitionFormat::JsonArray => rewrite_array(&path, sample)?,
        }

        Ok(path)
    }

    /// Output follows file order, not timestamp order.
    fn read_range(
        &self,
        uuid: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TelemetrySample>, JournalError> {
        let mut samples = Vec::new();
        if from > to {
            return Ok(samples);
        }

        let last_day = to.date_naive();
        for day in from.date_naive().iter_days().take_while(|day| *day <= last_day) {
            let lines = read_lines_partition(&self.partition_path(uuid, day, PartitionFormat::Lines)?)?;
            let array =
                read_array_partition(&self.partition_path(uuid, day, PartitionFormat::JsonArray)?)?;

            samples.extend(lines.into_iter().chain(array).filter(|sample| {
                sample
                    .recorded_at()
                    .is_some_and(|at| from <= at && at <= to)
            }));
        }

        Ok(samples)
    }

    fn station_exists(&self, uuid: &str) -> Result<bool, JournalError> {
        let station_dir = self.station_dir(uuid)?;
        match fs::metadata(&station_dir) {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(JournalError::io(&station_dir, error)),
        }
    }
}

fn append_line(path: &Path, sample: &TelemetrySample) -> Result<(), JournalError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|error| JournalError::io(path, error))?;

    let mut record = Vec::new();
    if ends_with_torn_record(&mut file).map_err(|error| JournalError::io(path, error))? {
        record.push(b'\n');
    }
    serde_json::to_writer(&mut record, sample)?;
    record.push(b'\n');

    file.write_all(&record)
        .map_err(|error| JournalError::io(path, error))
}

/// A crash mid-append leaves a last line without its newline. Terminating it
/// keeps the next record on a line of its own.
fn ends_with_torn_record(file: &mut fs::File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }

    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn rewrite_array(path: &Path, sample: &TelemetrySample) -> Result<(), JournalError> {
    let mut entries: Vec<Value> = match fs::read(path) {
        Ok(content) => serde_json::from_slice(&content).map_err(|_| {
            JournalError::CorruptPartition {
                path: path.to_path_buf(),
            }
        })?,
        Err(error) if error.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(error) => return Err(JournalError::io(path, error)),
    };
    entries.push(serde_json::to_value(sample)?);

    let tmp_path = path.with_extension("json.tmp");
    let content = serde_json::to_vec_pretty(&entries)?;
    fs::write(&tmp_path, content).map_err(|error| JournalError::io(&tmp_path, error))?;
    fs::rename(&tmp_path, path).map_err(|error| JournalError::io(path, error))
}

fn read_lines_partition(path: &Path) -> Result<Vec<TelemetrySample>, JournalError> {
    let Some(content) = read_optional(path)? else {
        return Ok(Vec::new());
    };

    let mut skipped = 0_usize;
    let samples: Vec<TelemetrySample> = content
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .filter_map(|line| match serde_json::from_slice(line) {
            Ok(sample) => Some(sample),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        tracing::debug!(path = %path.display(), skipped, "skipped malformed journal records");
    }

    Ok(samples)
}

fn read_array_partition(path: &Path) -> Result<Vec<TelemetrySample>, JournalError> {
    let Some(content) = read_optional(path)? else {
        return Ok(Vec::new());
    };

    let entries: Vec<Value> = match serde_json::from_slice(&content) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "ignoring unreadable array partition");
            return Ok(Vec::new());
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, JournalError> {
    match fs::read(path) {
        Ok(content) => Ok(Some(content)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(JournalError::io(path, error)),
    }
}
