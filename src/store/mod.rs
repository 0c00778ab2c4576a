//! Date-partitioned durable store.
//!
//! Readings are appended to one CSV file per UTC calendar day,
//! `sensor_data_YYYY-MM-DD.csv`, inside the storage directory. The partition
//! is chosen from the wall-clock time of the append, not from the reading's
//! own timestamp. A partition gets its header when first created and is only
//! ever appended to afterwards.
//!
//! Every operation has two faces: `try_*` returns the error, the plain
//! variant logs it and degrades to an empty or `false` result so the
//! acquisition loop never stops on a storage fault.

pub mod csv;

use crate::clock::{Clock, SystemClock};
use crate::error::{MonitorError, Result};
use crate::reading::Reading;
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PARTITION_PREFIX: &str = "sensor_data_";
const EXPORT_PREFIX: &str = "sensor_export_";
const EXTENSION: &str = ".csv";

/// The partition currently receiving appends.
struct ActivePartition {
    date: NaiveDate,
    path: PathBuf,
}

pub struct DurableStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    /// Held across partition selection and the write, serializing appenders.
    active: Mutex<Option<ActivePartition>>,
}

impl DurableStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    /// Open a store whose partition rotation follows `clock`.
    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            MonitorError::StorageUnavailable(format!("{}: {}", root.display(), e))
        })?;
        info!("[Store] Using storage directory {:?}", root);
        Ok(Self {
            root,
            clock,
            active: Mutex::new(None),
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.root
    }

    /// Path of the partition file for `date`, whether or not it exists.
    pub fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(format!("{}{}{}", PARTITION_PREFIX, date, EXTENSION))
    }

    /// Append a reading to today's partition. `false` on failure (logged).
    pub fn append(&self, reading: &Reading) -> bool {
        match self.try_append(reading) {
            Ok(_) => true,
            Err(e) => {
                error!("[Store] Failed to save sensor reading: {}", e);
                false
            }
        }
    }

    /// Append a reading to today's partition, returning the partition path.
    pub fn try_append(&self, reading: &Reading) -> Result<PathBuf> {
        let mut active = self.active.lock();

        let today = self.clock.now().date_naive();
        let partition = match active.take() {
            Some(current) if current.date == today => current,
            previous => {
                let path = self.partition_path(today);
                if let Some(previous) = previous {
                    info!(
                        "[Store] Day changed ({} -> {}), rotating to {:?}",
                        previous.date, today, path
                    );
                }
                ActivePartition { date: today, path }
            }
        };
        let partition = active.insert(partition);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&partition.path)?;

        let mut chunk = String::new();
        if file.metadata()?.len() == 0 {
            debug!("[Store] Initializing partition {:?}", partition.path);
            chunk.push_str(&csv::header());
            chunk.push('\n');
        } else if !ends_with_newline(&mut file)? {
            // An earlier write was cut short; keep the torn line to itself.
            warn!(
                "[Store] Partition {:?} ends in a partial record, terminating it",
                partition.path
            );
            chunk.push('\n');
        }
        chunk.push_str(&csv::encode_record(reading));
        chunk.push('\n');

        file.write_all(chunk.as_bytes())?;
        file.sync_data()?;
        Ok(partition.path.clone())
    }

    /// Readings of one partition. Empty if it does not exist or cannot be read.
    pub fn load_partition(&self, date: NaiveDate) -> Vec<Reading> {
        self.try_load_partition(date).unwrap_or_else(|e| {
            error!("[Store] Error loading partition {}: {}", date, e);
            Vec::new()
        })
    }

    /// Readings of one partition in append order. A missing partition is empty.
    pub fn try_load_partition(&self, date: NaiveDate) -> Result<Vec<Reading>> {
        read_partition(&self.partition_path(date))
    }

    /// Every partition concatenated in ascending date order.
    ///
    /// Unreadable partitions are skipped with a warning.
    pub fn load_all(&self) -> Vec<Reading> {
        self.try_load_all().unwrap_or_else(|e| {
            error!("[Store] Error loading all readings: {}", e);
            Vec::new()
        })
    }

    /// Like [`load_all`](Self::load_all), but fails if the directory itself
    /// cannot be listed. Individual corrupt partitions are still skipped.
    pub fn try_load_all(&self) -> Result<Vec<Reading>> {
        let mut all = Vec::new();
        for date in self.try_list_partitions()? {
            match self.try_load_partition(date) {
                Ok(readings) => all.extend(readings),
                Err(e) => warn!("[Store] Skipping partition {}: {}", date, e),
            }
        }
        Ok(all)
    }

    /// Dates with a partition file, ascending.
    pub fn list_partitions(&self) -> Vec<NaiveDate> {
        self.try_list_partitions().unwrap_or_else(|e| {
            error!("[Store] Error listing partitions: {}", e);
            Vec::new()
        })
    }

    pub fn try_list_partitions(&self) -> Result<Vec<NaiveDate>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut dates = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(date) = entry.file_name().to_str().and_then(partition_date) {
                dates.push(date);
            }
        }
        dates.sort_unstable();
        Ok(dates)
    }

    /// Write `readings` to a fresh file in the storage directory.
    ///
    /// Without a name the file is called `sensor_export_YYYYMMDD_HHMMSS.csv`
    /// (a numeric suffix is added if that name is taken). An explicit name
    /// must be a plain file name, must not exist yet, and may not look like a
    /// partition.
    pub fn export_to(&self, readings: &[Reading], name: Option<&str>) -> Result<PathBuf> {
        let (mut file, path) = match name {
            Some(name) => {
                validate_export_name(name)?;
                let path = self.root.join(name);
                (create_new(&path)?, path)
            }
            None => self.create_auto_named_export()?,
        };

        let written = file
            .write_all(csv::encode_document(readings).as_bytes())
            .and_then(|()| file.sync_all());
        discard_on_error(&path, written)?;
        info!("[Store] Exported {} readings to {:?}", readings.len(), path);
        Ok(path)
    }

    fn create_auto_named_export(&self) -> Result<(fs::File, PathBuf)> {
        let stem = format!(
            "{}{}",
            EXPORT_PREFIX,
            self.clock.now().format("%Y%m%d_%H%M%S")
        );
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("{}{}", stem, EXTENSION),
                n => format!("{}_{}{}", stem, n, EXTENSION),
            };
            let path = self.root.join(name);
            match create_new(&path) {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < 1000 => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn read_partition(path: &Path) -> Result<Vec<Reading>> {
    match fs::read_to_string(path) {
        Ok(text) => csv::parse_document(&text),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Remove a half-written file when `result` is an error.
fn discard_on_error<T>(path: &Path, result: std::io::Result<T>) -> Result<T> {
    result.map_err(|e| {
        if let Err(remove_err) = fs::remove_file(path) {
            warn!("[Store] Could not remove partial file {:?}: {}", path, remove_err);
        }
        e.into()
    })
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn create_new(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Parse the date out of a partition file name.
fn partition_date(file_name: &str) -> Option<NaiveDate> {
    let text = file_name
        .strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(EXTENSION)?;
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    // chrono accepts unpadded fields; only the canonical spelling is a partition.
    (date.format("%Y-%m-%d").to_string() == text).then_some(date)
}

fn validate_export_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| -> Result<()> {
        Err(MonitorError::InvalidExportName(format!("{:?} {}", name, reason)))
    };

    if name.is_empty() || name == "." || name == ".." {
        return invalid("is not a file name");
    }
    if name.contains(['/', '\\']) {
        return invalid("must not contain path separators");
    }
    if partition_date(name).is_some() {
        return invalid("would shadow a daily partition");
    }
    Ok(())
}
