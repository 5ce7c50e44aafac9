//! Telemetry frames are the only data the vehicle sends to the ground. Each is
//! a fixed 52-byte record with every multi-byte field little-endian:
//!
//! ```text
//! '$' 0x02 | quaternion 4×f32 (w,x,y,z) | rotation 3×f32 (x,y,z)
//!          | acceleration 3×f32 (x,y,z) | throttle 4×u16 | '\r' '\n'
//! ```
//!
//! There is no checksum, so synchronization relies solely on the header and
//! terminator pairs sitting exactly one frame apart.

use super::{
  check_throttle,
  Acceleration,
  Ingestible,
  MiniquadStatus,
  Rotation,
  Throttle,
  MAX_THROTTLE,
};
use crate::attitude::Quaternion;
use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Total length of a telemetry frame, in bytes.
pub const TELEMETRY_FRAME_LENGTH: usize = 52;

/// The two bytes opening every telemetry frame.
pub const TELEMETRY_HEADER: [u8; 2] = [b'$', 0x02];

/// The two bytes closing every frame, in both directions.
pub const TERMINATOR: [u8; 2] = [b'\r', b'\n'];

/// Length of the field section between the header and the terminator.
const PAYLOAD_LENGTH: usize = 48;

// offsets within the payload
const QUATERNION_OFFSET: usize = 0;
const ROTATION_OFFSET: usize = 16;
const ACCELERATION_OFFSET: usize = 28;
const THROTTLE_OFFSET: usize = 40;

/// Reasons a buffer yielded no telemetry this cycle. None of them are fatal;
/// the previous status simply stays in place.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameError {
  /// The buffer cannot hold a single frame.
  TooShort {
    /// Length of the buffer that was scanned.
    length: usize,
  },

  /// No position in the buffer matched the frame pattern.
  NoFrame,

  /// The newest frame reported a throttle the vehicle could never have
  /// applied, so its contents are not trusted.
  ThrottleOutOfRange {
    /// One-based propeller channel.
    channel: usize,

    /// The reported throttle.
    value: Throttle,
  },
}

impl fmt::Display for FrameError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::TooShort { length } => write!(
        f,
        "Buffer of {length} bytes is shorter than a {TELEMETRY_FRAME_LENGTH} \
         byte telemetry frame."
      ),
      Self::NoFrame => write!(f, "No complete telemetry frame in buffer."),
      Self::ThrottleOutOfRange { channel, value } => write!(
        f,
        "Telemetry reported throttle {value} on channel {channel}, above \
         {MAX_THROTTLE}."
      ),
    }
  }
}

impl std::error::Error for FrameError {}

/// The fields of a single decoded telemetry frame.
#[derive(
  Clone, Copy, Debug, Default, Deserialize, MaxSize, PartialEq, Serialize,
)]
pub struct Telemetry {
  /// Orientation computed onboard.
  pub quaternion: Quaternion,

  /// Angular rate, in degrees per second.
  pub rotation: Rotation,

  /// Linear acceleration, in multiples of g.
  pub acceleration: Acceleration,

  /// Throttles currently applied by the vehicle, propellers one through four.
  pub throttles: [Throttle; 4],
}

impl Telemetry {
  /// Finds the most recent complete frame in `buffer` and decodes it.
  ///
  /// The buffer is scanned backwards from its newest byte and the first
  /// position where both terminator bytes and both header bytes line up wins.
  /// Older frames are never considered and nothing is retained between calls.
  pub fn find_latest(buffer: &[u8]) -> Result<Telemetry, FrameError> {
    if buffer.len() < TELEMETRY_FRAME_LENGTH {
      return Err(FrameError::TooShort {
        length: buffer.len(),
      });
    }

    for end in (TELEMETRY_FRAME_LENGTH - 1..buffer.len()).rev() {
      let start = end + 1 - TELEMETRY_FRAME_LENGTH;

      if buffer[end - 1..=end] == TERMINATOR
        && buffer[start..start + 2] == TELEMETRY_HEADER
      {
        return Telemetry::from_payload(&buffer[start + 2..end - 1]);
      }
    }

    Err(FrameError::NoFrame)
  }

  /// Decodes the 48 bytes between a frame's header and terminator.
  fn from_payload(payload: &[u8]) -> Result<Telemetry, FrameError> {
    debug_assert_eq!(payload.len(), PAYLOAD_LENGTH);

    let throttles = read_throttles(&payload[THROTTLE_OFFSET..]);

    for (i, throttle) in throttles.into_iter().enumerate() {
      if check_throttle(throttle).is_err() {
        return Err(FrameError::ThrottleOutOfRange {
          channel: i + 1,
          value: throttle,
        });
      }
    }

    Ok(Telemetry {
      quaternion: Quaternion::new(
        read_f32(payload, QUATERNION_OFFSET),
        read_f32(payload, QUATERNION_OFFSET + 4),
        read_f32(payload, QUATERNION_OFFSET + 8),
        read_f32(payload, QUATERNION_OFFSET + 12),
      ),
      rotation: Rotation::new(
        read_f32(payload, ROTATION_OFFSET),
        read_f32(payload, ROTATION_OFFSET + 4),
        read_f32(payload, ROTATION_OFFSET + 8),
      ),
      acceleration: Acceleration::new(
        read_f32(payload, ACCELERATION_OFFSET),
        read_f32(payload, ACCELERATION_OFFSET + 4),
        read_f32(payload, ACCELERATION_OFFSET + 8),
      ),
      throttles,
    })
  }

  /// Builds the frame the vehicle would send for these fields. Floats are
  /// narrowed to single precision as on the wire.
  pub fn to_frame(&self) -> [u8; TELEMETRY_FRAME_LENGTH] {
    let mut frame = [0; TELEMETRY_FRAME_LENGTH];
    frame[..2].copy_from_slice(&TELEMETRY_HEADER);

    let payload = &mut frame[2..2 + PAYLOAD_LENGTH];
    let q = &self.quaternion;
    let fields = [
      q.w,
      q.x,
      q.y,
      q.z,
      self.rotation.x,
      self.rotation.y,
      self.rotation.z,
      self.acceleration.x,
      self.acceleration.y,
      self.acceleration.z,
    ];

    let chunks = payload[..THROTTLE_OFFSET].chunks_exact_mut(4);
    for (chunk, value) in chunks.zip(fields) {
      chunk.copy_from_slice(&(value as f32).to_le_bytes());
    }

    write_throttles(&self.throttles, &mut payload[THROTTLE_OFFSET..]);

    frame[TELEMETRY_FRAME_LENGTH - 2..].copy_from_slice(&TERMINATOR);
    frame
  }
}

impl Ingestible for Telemetry {
  fn ingest(&self, status: &mut MiniquadStatus) {
    status.quaternion = self.quaternion;
    status.rotation = self.rotation;
    status.acceleration = self.acceleration;

    // decoded frames are already range-checked; hand-built ones are saturated
    let propellers = status.propellers.iter_mut();
    for (propeller, throttle) in propellers.zip(self.throttles) {
      propeller.throttle = throttle.min(MAX_THROTTLE);
    }
  }
}

fn read_f32(bytes: &[u8], offset: usize) -> f64 {
  f32::from_le_bytes([
    bytes[offset],
    bytes[offset + 1],
    bytes[offset + 2],
    bytes[offset + 3],
  ]) as f64
}

/// Reads four consecutive little-endian throttles from the start of `bytes`.
///
/// Telemetry and command frames share this field layout, so both directions
/// use it.
pub fn read_throttles(bytes: &[u8]) -> [Throttle; 4] {
  let mut throttles = [0; 4];

  for (throttle, chunk) in throttles.iter_mut().zip(bytes.chunks_exact(2)) {
    *throttle = u16::from_le_bytes([chunk[0], chunk[1]]);
  }

  throttles
}

/// Writes four consecutive little-endian throttles to the start of `bytes`.
pub(crate) fn write_throttles(throttles: &[Throttle; 4], bytes: &mut [u8]) {
  for (chunk, throttle) in bytes.chunks_exact_mut(2).zip(throttles) {
    chunk.copy_from_slice(&throttle.to_le_bytes());
  }
}
