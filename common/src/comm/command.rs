use super::{
  check_throttle,
  telemetry::{read_throttles, write_throttles, TERMINATOR},
  ComputingMode,
  Throttle,
};
use crate::{Error, Result};
use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a principal-computer command frame, in bytes.
pub const COMMAND_FRAME_LENGTH: usize = 12;

/// Length of a slave-computer command frame, in bytes. Its layout is not
/// defined by the vehicle firmware.
pub const SLAVE_COMMAND_FRAME_LENGTH: usize = 6;

/// The two bytes opening every principal-computer command frame.
pub const COMMAND_HEADER: [u8; 2] = [b'@', 0x04];

const THROTTLE_OFFSET: usize = 2;

/// Desired throttle of each of the four propellers.
#[derive(
  Clone, Copy, Debug, Default, Deserialize, Eq, MaxSize, PartialEq, Serialize,
)]
pub struct ThrottleCommand {
  throttles: [Throttle; 4],
}

impl ThrottleCommand {
  /// Every propeller stopped.
  pub const ZERO: ThrottleCommand = ThrottleCommand { throttles: [0; 4] };

  /// Constructs a command, rejecting any throttle above `MAX_THROTTLE`.
  pub fn new(throttles: [Throttle; 4]) -> Result<Self> {
    for throttle in throttles {
      check_throttle(throttle)?;
    }

    Ok(ThrottleCommand { throttles })
  }

  /// The commanded throttles, propellers one through four.
  pub fn throttles(&self) -> [Throttle; 4] {
    self.throttles
  }

  /// Encodes the command for the given computing mode.
  ///
  /// ```text
  /// '@' 0x04 | throttle 4×u16 (little-endian) | '\r' '\n'
  /// ```
  pub fn encode(
    &self,
    mode: ComputingMode,
  ) -> Result<[u8; COMMAND_FRAME_LENGTH]> {
    match mode {
      ComputingMode::PrincipalComputer => Ok(self.to_frame()),
      ComputingMode::SlaveComputer => Err(Error::Unimplemented(mode)),
    }
  }

  fn to_frame(&self) -> [u8; COMMAND_FRAME_LENGTH] {
    let mut frame = [0; COMMAND_FRAME_LENGTH];

    frame[..2].copy_from_slice(&COMMAND_HEADER);
    write_throttles(&self.throttles, &mut frame[THROTTLE_OFFSET..]);
    frame[COMMAND_FRAME_LENGTH - 2..].copy_from_slice(&TERMINATOR);

    frame
  }

  /// Decodes a principal-computer command frame, as the vehicle would.
  /// Returns `None` if the framing bytes are wrong or a throttle is out of
  /// range.
  pub fn from_frame(frame: &[u8]) -> Option<Self> {
    if frame.len() != COMMAND_FRAME_LENGTH
      || frame[..2] != COMMAND_HEADER
      || frame[COMMAND_FRAME_LENGTH - 2..] != TERMINATOR
    {
      return None;
    }

    ThrottleCommand::new(read_throttles(&frame[THROTTLE_OFFSET..])).ok()
  }
}

impl fmt::Display for ThrottleCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [a, b, c, d] = self.throttles;
    write!(f, "Set throttles to {a}, {b}, {c}, {d}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frame_layout_is_byte_exact() -> anyhow::Result<()> {
    let frame = ThrottleCommand::new([10, 20, 30, 255])?
      .encode(ComputingMode::PrincipalComputer)?;

    assert_eq!(
      frame,
      [b'@', 0x04, 10, 0, 20, 0, 30, 0, 255, 0, b'\r', b'\n']
    );
    Ok(())
  }

  #[test]
  fn throttles_survive_shared_field_extraction() -> anyhow::Result<()> {
    let frame = ThrottleCommand::new([10, 20, 30, 40])?
      .encode(ComputingMode::PrincipalComputer)?;

    assert_eq!(read_throttles(&frame[THROTTLE_OFFSET..]), [10, 20, 30, 40]);
    assert_eq!(
      ThrottleCommand::from_frame(&frame).map(|c| c.throttles()),
      Some([10, 20, 30, 40])
    );
    Ok(())
  }

  #[test]
  fn out_of_range_throttle_is_rejected_not_clamped() {
    assert!(matches!(
      ThrottleCommand::new([0, 256, 0, 0]),
      Err(Error::OutOfRange { value, .. }) if value == 256.0
    ));
  }

  #[test]
  fn slave_mode_is_unimplemented() {
    assert_eq!(
      ThrottleCommand::ZERO.encode(ComputingMode::SlaveComputer),
      Err(Error::Unimplemented(ComputingMode::SlaveComputer))
    );
  }

  #[test]
  fn malformed_command_frames_are_ignored() {
    let mut frame = ThrottleCommand::ZERO.to_frame();
    assert_eq!(
      ThrottleCommand::from_frame(&frame),
      Some(ThrottleCommand::ZERO)
    );

    frame[1] = 0x02;
    assert_eq!(ThrottleCommand::from_frame(&frame), None);
    assert_eq!(ThrottleCommand::from_frame(&frame[..11]), None);
  }
}
