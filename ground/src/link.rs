use common::comm::telemetry::{FrameError, Telemetry, TELEMETRY_FRAME_LENGTH};
use std::{
  collections::VecDeque,
  io::{self, Write},
  sync::{Arc, Mutex},
};

/// Capacity of the receive buffer unless configured otherwise, in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Smallest capacity that can still hold a complete telemetry frame.
pub const MIN_BUFFER_SIZE: usize = TELEMETRY_FRAME_LENGTH;

/// Bytes received from the vehicle that have not been consumed yet.
///
/// Appending beyond the capacity evicts the oldest bytes, which keeps the
/// backward frame scan bounded no matter how long decoding keeps failing.
#[derive(Clone, Debug)]
pub struct ReceiveBuffer {
  bytes: VecDeque<u8>,
  capacity: usize,
}

impl Default for ReceiveBuffer {
  fn default() -> Self {
    ReceiveBuffer::new(DEFAULT_BUFFER_SIZE)
  }
}

impl ReceiveBuffer {
  /// Constructs an empty buffer holding at most `capacity` bytes. A capacity
  /// of zero is raised to one. Below [`MIN_BUFFER_SIZE`] no frame can ever be
  /// decoded from it.
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);

    ReceiveBuffer {
      bytes: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Appends a chunk, evicting the oldest bytes if needed.
  pub fn extend(&mut self, chunk: &[u8]) {
    // only the newest `capacity` bytes of the chunk could survive anyway
    let chunk = &chunk[chunk.len().saturating_sub(self.capacity)..];

    let overflow =
      (self.bytes.len() + chunk.len()).saturating_sub(self.capacity);
    self.bytes.drain(..overflow);
    self.bytes.extend(chunk);
  }

  /// The buffered bytes, oldest first.
  pub fn contiguous(&mut self) -> &[u8] {
    self.bytes.make_contiguous()
  }

  /// Decodes the newest complete telemetry frame without consuming anything.
  pub fn latest_telemetry(&mut self) -> Result<Telemetry, FrameError> {
    Telemetry::find_latest(self.contiguous())
  }

  /// Drops every buffered byte.
  pub fn clear(&mut self) {
    self.bytes.clear();
  }

  /// Number of buffered bytes.
  pub fn len(&self) -> usize {
    self.bytes.len()
  }

  /// Whether nothing is buffered.
  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }

  /// Maximum number of buffered bytes.
  pub fn capacity(&self) -> usize {
    self.capacity
  }
}

/// The receive buffer as shared between the receiver thread and the worker.
pub type SharedBuffer = Arc<Mutex<ReceiveBuffer>>;

/// Sends raw bytes to the vehicle. Opening and configuring the port is the
/// caller's concern.
pub trait Transmit {
  /// Sends every byte of `bytes`.
  fn transmit(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<W: Write> Transmit for W {
  fn transmit(&mut self, bytes: &[u8]) -> io::Result<()> {
    self.write_all(bytes)?;
    self.flush()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use common::comm::telemetry::TELEMETRY_FRAME_LENGTH;

  #[test]
  fn oldest_bytes_are_evicted() {
    let mut buffer = ReceiveBuffer::new(4);

    buffer.extend(&[1, 2, 3]);
    buffer.extend(&[4, 5]);
    assert_eq!(buffer.len(), 4);
    assert_eq!(buffer.bytes, [2, 3, 4, 5]);

    buffer.extend(&[6, 7, 8, 9, 10, 11]);
    assert_eq!(buffer.bytes, [8, 9, 10, 11]);
  }

  #[test]
  fn frame_survives_wrapped_storage() -> anyhow::Result<()> {
    let telemetry = Telemetry {
      throttles: [60, 61, 62, 63],
      ..Default::default()
    };
    let frame = telemetry.to_frame();

    let mut buffer = ReceiveBuffer::new(2 * TELEMETRY_FRAME_LENGTH);
    buffer.extend(&[0xAA; 90]);
    buffer.extend(&frame[..20]);
    buffer.extend(&frame[20..]);

    assert_eq!(buffer.len(), 2 * TELEMETRY_FRAME_LENGTH);
    assert_eq!(buffer.latest_telemetry()?, telemetry);

    buffer.clear();
    assert!(buffer.is_empty());
    assert_eq!(
      buffer.latest_telemetry(),
      Err(FrameError::TooShort { length: 0 })
    );
    Ok(())
  }

  #[test]
  fn writers_transmit_everything() -> anyhow::Result<()> {
    let mut sink = Vec::new();
    sink.transmit(b"@\x04")?;
    sink.transmit(b"\r\n")?;

    assert_eq!(sink, b"@\x04\r\n");
    Ok(())
  }
}
