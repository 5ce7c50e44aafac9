//! Records every decoded vehicle status to disk on a background thread.
//!
//! Each file is a sequence of records, each a `u64` little-endian length
//! followed by that many bytes of postcard-encoded [`TimestampedStatus`].

use chrono::Local;
use common::comm::MiniquadStatus;
use jeflog::{fail, warn};
use serde::{Deserialize, Serialize};
use std::{
  fmt,
  fs::{self, File},
  io::{self, BufWriter, Write},
  path::{Path, PathBuf},
  sync::mpsc::{self, RecvTimeoutError, TrySendError},
  thread,
  time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// A status snapshot with the time it was recorded.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TimestampedStatus {
  /// Unix timestamp in seconds with nanosecond precision.
  pub timestamp: f64,

  /// The status at that time.
  pub status: MiniquadStatus,
}

/// Tunes how the recorder batches and rotates its files.
#[derive(Clone, Debug)]
pub struct RecorderConfig {
  /// Directory the recordings are written to. Created if missing.
  pub directory: PathBuf,

  /// Snapshots the channel holds before new ones are dropped.
  pub channel_capacity: usize,

  /// Snapshots written together.
  pub batch_size: usize,

  /// A partial batch is written after this long.
  pub batch_timeout: Duration,

  /// Size in bytes after which a new file is started.
  pub file_size_limit: usize,
}

impl RecorderConfig {
  /// Defaults for recording into `directory`.
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    RecorderConfig {
      directory: directory.into(),
      channel_capacity: 100,
      batch_size: 50,
      batch_timeout: Duration::from_millis(500),
      file_size_limit: 16 * 1024 * 1024,
    }
  }
}

/// Reasons a snapshot could not be recorded.
#[derive(Debug)]
pub enum RecorderError {
  /// Creating or writing a recording failed.
  Io(io::Error),

  /// A snapshot could not be encoded or decoded.
  Serialization(postcard::Error),

  /// The writer is behind and the snapshot was dropped.
  Full,

  /// The writer thread has exited.
  Closed,
}

impl From<io::Error> for RecorderError {
  fn from(error: io::Error) -> Self {
    RecorderError::Io(error)
  }
}

impl From<postcard::Error> for RecorderError {
  fn from(error: postcard::Error) -> Self {
    RecorderError::Serialization(error)
  }
}

impl fmt::Display for RecorderError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Io(error) => write!(f, "I/O error: {error}"),
      Self::Serialization(error) => write!(f, "Serialization error: {error}"),
      Self::Full => write!(f, "Recorder is full, snapshot dropped."),
      Self::Closed => write!(f, "Recorder thread has exited."),
    }
  }
}

impl std::error::Error for RecorderError {}

/// Handle to the background writer. Dropping the handle without calling
/// [`Recorder::shutdown`] lets the writer finish on its own.
pub struct Recorder {
  sender: mpsc::SyncSender<TimestampedStatus>,
  handle: Option<thread::JoinHandle<()>>,
}

impl Recorder {
  /// Creates the directory and starts the writer thread.
  pub fn new(config: RecorderConfig) -> Result<Self, RecorderError> {
    fs::create_dir_all(&config.directory)?;

    let (sender, receiver) = mpsc::sync_channel(config.channel_capacity);
    let handle = thread::spawn(move || Writer::new(config).run(receiver));

    Ok(Recorder {
      sender,
      handle: Some(handle),
    })
  }

  /// Queues a snapshot without blocking.
  pub fn record(&self, status: MiniquadStatus) -> Result<(), RecorderError> {
    let snapshot = TimestampedStatus {
      timestamp: current_timestamp(),
      status,
    };

    self.sender.try_send(snapshot).map_err(|error| match error {
      TrySendError::Full(_) => RecorderError::Full,
      TrySendError::Disconnected(_) => RecorderError::Closed,
    })
  }

  /// Writes everything still queued and waits for the writer to exit.
  pub fn shutdown(mut self) -> Result<(), RecorderError> {
    let handle = self.handle.take();
    drop(self);

    if let Some(handle) = handle {
      handle.join().map_err(|_| RecorderError::Closed)?;
    }

    Ok(())
  }
}

struct Writer {
  config: RecorderConfig,
  file: Option<BufWriter<File>>,
  file_size: usize,
  batch: Vec<TimestampedStatus>,
}

impl Writer {
  fn new(config: RecorderConfig) -> Self {
    Writer {
      batch: Vec::with_capacity(config.batch_size),
      config,
      file: None,
      file_size: 0,
    }
  }

  fn run(mut self, receiver: mpsc::Receiver<TimestampedStatus>) {
    let mut last_flush = Instant::now();

    loop {
      let timeout = self
        .config
        .batch_timeout
        .saturating_sub(last_flush.elapsed());

      match receiver.recv_timeout(timeout) {
        Ok(snapshot) => self.batch.push(snapshot),
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => break,
      }

      if self.batch.len() >= self.config.batch_size
        || last_flush.elapsed() >= self.config.batch_timeout
      {
        self.flush_batch();
        last_flush = Instant::now();
      }
    }

    self.flush_batch();
  }

  fn flush_batch(&mut self) {
    if self.batch.is_empty() {
      return;
    }

    if let Err(error) = self.write_batch() {
      fail!("Failed to write recording: {error}");
      // the file may be left mid-record, so start over in a new one
      self.file = None;
    }

    self.batch.clear();
  }

  fn write_batch(&mut self) -> Result<(), RecorderError> {
    if self.file.is_none() || self.file_size >= self.config.file_size_limit {
      let path = recording_path(&self.config.directory);
      self.file = Some(BufWriter::new(File::create(path)?));
      self.file_size = 0;
    }

    let Some(file) = self.file.as_mut() else {
      return Ok(());
    };

    for snapshot in &self.batch {
      let serialized = match postcard::to_allocvec(snapshot) {
        Ok(serialized) => serialized,
        Err(error) => {
          warn!("Dropping snapshot that failed to serialize: {error}");
          continue;
        }
      };

      file.write_all(&(serialized.len() as u64).to_le_bytes())?;
      file.write_all(&serialized)?;
      self.file_size += 8 + serialized.len();
    }

    file.flush()?;
    Ok(())
  }
}

/// Reads every record of a recording file back.
pub fn read_recording(
  path: &Path,
) -> Result<Vec<TimestampedStatus>, RecorderError> {
  let bytes = fs::read(path)?;
  let mut records = Vec::new();
  let mut rest = bytes.as_slice();

  while rest.len() >= 8 {
    let (prefix, tail) = rest.split_at(8);
    let mut length = [0; 8];
    length.copy_from_slice(prefix);
    let length = u64::from_le_bytes(length) as usize;

    if tail.len() < length {
      warn!("Recording {} ends in a truncated record.", path.display());
      break;
    }

    records.push(postcard::from_bytes(&tail[..length])?);
    rest = &tail[length..];
  }

  Ok(records)
}

/// Names a new file after the current local time. Nanoseconds keep rotated
/// files from colliding.
fn recording_path(directory: &Path) -> PathBuf {
  let now = Local::now();
  directory.join(format!(
    "miniquad_{}.postcard",
    now.format("%Y%m%d_%H%M%S_%9f")
  ))
}

fn current_timestamp() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs_f64())
    .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch_directory(name: &str) -> PathBuf {
    let directory = std::env::temp_dir()
      .join(format!("miniquad-recorder-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&directory);
    directory
  }

  #[test]
  fn snapshots_are_written_in_order() -> anyhow::Result<()> {
    let directory = scratch_directory("order");
    let recorder = Recorder::new(RecorderConfig {
      batch_size: 2,
      ..RecorderConfig::new(&directory)
    })?;

    let mut expected = Vec::new();
    for i in 0..5u16 {
      let mut status = MiniquadStatus::default();
      status.set_throttles([i, i + 1, i + 2, i + 3])?;
      recorder.record(status)?;
      expected.push(status);
    }
    recorder.shutdown()?;

    let files: Vec<_> = fs::read_dir(&directory)?.collect::<Result<_, _>>()?;
    assert_eq!(files.len(), 1);

    let records = read_recording(&files[0].path())?;
    let statuses: Vec<_> = records.iter().map(|r| r.status).collect();
    assert_eq!(statuses, expected);
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    fs::remove_dir_all(&directory)?;
    Ok(())
  }

  #[test]
  fn files_rotate_past_size_limit() -> anyhow::Result<()> {
    let directory = scratch_directory("rotate");
    let recorder = Recorder::new(RecorderConfig {
      batch_size: 1,
      file_size_limit: 1,
      ..RecorderConfig::new(&directory)
    })?;

    // one batch per snapshot, each forcing a new file
    for _ in 0..3 {
      recorder.record(MiniquadStatus::default())?;
      thread::sleep(Duration::from_millis(20));
    }
    recorder.shutdown()?;

    let mut total = 0;
    let mut files = 0;
    for entry in fs::read_dir(&directory)? {
      total += read_recording(&entry?.path())?.len();
      files += 1;
    }
    assert_eq!(total, 3);
    assert_eq!(files, 3);

    fs::remove_dir_all(&directory)?;
    Ok(())
  }
}
