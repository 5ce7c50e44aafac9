#![warn(missing_docs)]

//! Common consists of the types shared between the ground station and the
//! miniquad's onboard board. More specifically, the attitude representations
//! reconstructed from the onboard quaternion, the vehicle status snapshot and
//! the fixed binary frames exchanged over the serial link are all stored here.

use std::fmt;

/// Quaternion math and the orientation representations derived from it.
pub mod attitude;

/// All structs and definitions related to communication between the ground
/// station and the vehicle.
pub mod comm;

use comm::ComputingMode;

/// Trait providing a method to create a pretty, terminal-friendly
/// representation of the underlying.
pub trait ToPrettyString {
  /// Provides a representation of the underlying which is preferable when
  /// displaying to the console but not as a raw string.
  ///
  /// ANSI codes such as color codes, for example, can be used in a "pretty
  /// string" but would be atypical in a `fmt::Display` implementation.
  fn to_pretty_string(&self) -> String;
}

/// Errors raised when a value handed to this crate violates its contract.
///
/// These are caller mistakes rather than conditions produced by sensor noise,
/// so they are never silently clamped.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
  /// A value fell outside of the range accepted for some quantity.
  OutOfRange {
    /// Human-readable name of the offending quantity.
    quantity: &'static str,

    /// The rejected value.
    value: f64,

    /// Inclusive lower bound.
    min: f64,

    /// Inclusive upper bound.
    max: f64,
  },

  /// Two propellers were assigned the same output pin.
  DuplicatePin(u32),

  /// The requested operation has no defined layout in the given computing
  /// mode.
  Unimplemented(ComputingMode),
}

impl Error {
  /// Checks that `value` lies within `[min, max]`, naming it `quantity` in the
  /// error otherwise.
  pub(crate) fn check_range(
    quantity: &'static str,
    value: f64,
    min: f64,
    max: f64,
  ) -> Result<f64> {
    // NaN fails both comparisons and is rejected with the rest
    if !(min <= value && value <= max) {
      return Err(Error::OutOfRange {
        quantity,
        value,
        min,
        max,
      });
    }

    Ok(value)
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::OutOfRange {
        quantity,
        value,
        min,
        max,
      } => write!(f, "{quantity} of {value} is outside of [{min}, {max}]."),
      Self::DuplicatePin(pin) => {
        write!(f, "Pin {pin} is assigned to more than one propeller.")
      }
      Self::Unimplemented(mode) => {
        write!(f, "Command frames are not implemented in {mode} mode.")
      }
    }
  }
}

impl std::error::Error for Error {}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
