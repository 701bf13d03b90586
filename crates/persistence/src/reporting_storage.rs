//! Per-pin telemetry history store.
//!
//! Each `(dashboard, device, pin type, pin, granularity)` stream lives in its
//! own append-only file under the user's directory. A file is a sequence of
//! fixed 16-byte records: big-endian `i64` epoch millis followed by a
//! big-endian `f64` value.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use domain::models::{GraphGranularity, PinType, UserKey};
use thiserror::Error;

use crate::metrics::{record_files_deleted, StorageTimer};

/// Size of one stored sample in bytes.
pub const RECORD_SIZE: usize = 16;

const FILE_PREFIX: &str = "history_";
const FILE_SUFFIX: &str = ".bin";

/// Errors raised by the history store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coordinates of one stored stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamCoordinate {
    pub dashboard_id: i32,
    pub device_id: i32,
    pub pin_type: PinType,
    pub pin: u8,
    pub granularity: GraphGranularity,
}

impl StreamCoordinate {
    /// File name of the stream, unique per coordinate.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}_{}_{}{}_{}{}",
            FILE_PREFIX,
            self.dashboard_id,
            self.device_id,
            self.pin_type.code(),
            self.pin,
            self.granularity.label(),
            FILE_SUFFIX
        )
    }

    /// Inverse of [`StreamCoordinate::file_name`]. Returns `None` for any
    /// other file.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let body = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        let mut parts = body.split('_');
        let dashboard_id = parse_id(parts.next()?)?;
        let device_id = parse_id(parts.next()?)?;
        let (pin_type, pin) = PinType::parse_pin(parts.next()?)?;
        let granularity = GraphGranularity::from_label(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            dashboard_id,
            device_id,
            pin_type,
            pin,
            granularity,
        })
    }
}

/// Parses an id only in the spelling [`StreamCoordinate::file_name`] writes.
fn parse_id(part: &str) -> Option<i32> {
    let id: i32 = part.parse().ok()?;
    (id.to_string() == part).then_some(id)
}

/// Which devices a bulk delete touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    All,
    Device(i32),
}

impl DeviceSelector {
    fn matches(&self, device_id: i32) -> bool {
        match self {
            DeviceSelector::All => true,
            DeviceSelector::Device(id) => *id == device_id,
        }
    }
}

/// Which pins a bulk delete touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinSelector {
    All,
    Pins(Vec<(PinType, u8)>),
}

impl PinSelector {
    fn matches(&self, pin_type: PinType, pin: u8) -> bool {
        match self {
            PinSelector::All => true,
            PinSelector::Pins(pins) => pins.contains(&(pin_type, pin)),
        }
    }
}

/// Decodes a buffer of records into `(timestamp, value)` pairs.
///
/// A trailing partial record is ignored.
pub fn decode_samples(buf: &[u8]) -> impl Iterator<Item = (i64, f64)> + '_ {
    buf.chunks_exact(RECORD_SIZE).map(|record| {
        let mut ts = [0u8; 8];
        let mut value = [0u8; 8];
        ts.copy_from_slice(&record[..8]);
        value.copy_from_slice(&record[8..]);
        (i64::from_be_bytes(ts), f64::from_be_bytes(value))
    })
}

/// File-backed telemetry history store.
#[derive(Debug, Clone)]
pub struct ReportingStorage {
    data_dir: PathBuf,
}

impl ReportingStorage {
    /// Creates a store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding every stream of `user`.
    pub fn user_dir(&self, user: &UserKey) -> PathBuf {
        self.data_dir.join(user.file_prefix())
    }

    pub fn stream_path(&self, user: &UserKey, coordinate: &StreamCoordinate) -> PathBuf {
        self.user_dir(user).join(coordinate.file_name())
    }

    /// Reads the newest `max_points` records that precede the newest `skip`
    /// records, in append order.
    ///
    /// Returns `Ok(None)` when the stream has never been written.
    pub fn read(
        &self,
        user: &UserKey,
        coordinate: &StreamCoordinate,
        max_points: usize,
        skip: usize,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let timer = StorageTimer::new("read");
        let result = self.read_records(&self.stream_path(user, coordinate), max_points, skip);
        timer.record();
        result
    }

    fn read_records(
        &self,
        path: &Path,
        max_points: usize,
        skip: usize,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let total = file.metadata()?.len() as usize / RECORD_SIZE;
        let end = total.saturating_sub(skip);
        let start = end.saturating_sub(max_points);

        let mut buf = vec![0u8; (end - start) * RECORD_SIZE];
        if !buf.is_empty() {
            file.seek(SeekFrom::Start((start * RECORD_SIZE) as u64))?;
            file.read_exact(&mut buf)?;
        }
        Ok(Some(buf))
    }

    /// Appends one sample to a stream, creating the file if needed.
    pub fn append(
        &self,
        user: &UserKey,
        coordinate: &StreamCoordinate,
        ts: i64,
        value: f64,
    ) -> Result<(), StorageError> {
        let timer = StorageTimer::new("append");
        let dir = self.user_dir(user);
        fs::create_dir_all(&dir)?;

        let mut record = [0u8; RECORD_SIZE];
        record[..8].copy_from_slice(&ts.to_be_bytes());
        record[8..].copy_from_slice(&value.to_be_bytes());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(coordinate.file_name()))?;
        file.write_all(&record)?;
        timer.record();
        Ok(())
    }

    /// Removes every stream of `dashboard_id` matching both selectors.
    ///
    /// Returns the number of files removed. A user without any stored data
    /// yields zero.
    pub fn delete(
        &self,
        user: &UserKey,
        dashboard_id: i32,
        devices: &DeviceSelector,
        pins: &PinSelector,
    ) -> Result<usize, StorageError> {
        let timer = StorageTimer::new("delete");
        let dir = self.user_dir(user);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(coordinate) = name.to_str().and_then(StreamCoordinate::parse_file_name)
            else {
                continue;
            };

            if coordinate.dashboard_id != dashboard_id
                || !devices.matches(coordinate.device_id)
                || !pins.matches(coordinate.pin_type, coordinate.pin)
            {
                continue;
            }

            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            user = %user,
            dashboard_id = dashboard_id,
            removed = removed,
            "Removed telemetry history files"
        );
        record_files_deleted(removed);
        timer.record();
        Ok(removed)
    }
}
