use crate::{
  attitude::{EulerAngle, Gravity, Quaternion, Vector, YawPitchRoll},
  Error,
  Result,
  ToPrettyString,
};
use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deals with the telemetry frames sent from the vehicle to the ground.
pub mod telemetry;

/// Deals with the command frames sent from the ground to the vehicle.
pub mod command;

/// in units of degrees/second
pub type Rotation = Vector;

/// in units of Gs
pub type Acceleration = Vector;

/// Throttle level of a single rotor. Valid values lie within
/// `[0, MAX_THROTTLE]`.
pub type Throttle = u16;

/// Largest throttle accepted by the vehicle.
pub const MAX_THROTTLE: Throttle = 255;

/// Output pins of the four propellers on the stock airframe.
pub const DEFAULT_PINS: [u32; 4] = [3, 5, 6, 9];

/// Where the flight control algorithm is computed.
#[derive(
  Clone, Copy, Debug, Default, Deserialize, Eq, MaxSize, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComputingMode {
  /// The ground station computes throttles and sends them to the vehicle.
  #[default]
  PrincipalComputer,

  /// The vehicle computes its own throttles. The ground-side frame for this
  /// mode has no defined layout.
  SlaveComputer,
}

impl fmt::Display for ComputingMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::PrincipalComputer => "principal computer",
        Self::SlaveComputer => "slave computer",
      }
    )
  }
}

/// A single rotor, identified by the output pin driving it.
#[derive(
  Clone, Copy, Debug, Default, Deserialize, Eq, MaxSize, PartialEq, Serialize,
)]
pub struct Propeller {
  pin: u32,
  throttle: Throttle,
}

impl Propeller {
  /// Constructs an idle propeller on the given pin.
  pub fn new(pin: u32) -> Self {
    Propeller { pin, throttle: 0 }
  }

  /// The output pin driving this propeller.
  pub fn pin(&self) -> u32 {
    self.pin
  }

  /// The last known throttle of this propeller.
  pub fn throttle(&self) -> Throttle {
    self.throttle
  }

  /// Sets the throttle, rejecting values above `MAX_THROTTLE`.
  pub fn set_throttle(&mut self, throttle: Throttle) -> Result<()> {
    check_throttle(throttle)?;
    self.throttle = throttle;
    Ok(())
  }
}

pub(crate) fn check_throttle(throttle: Throttle) -> Result<Throttle> {
  Error::check_range("throttle", throttle as f64, 0.0, MAX_THROTTLE as f64)
    .map(|_| throttle)
}

/// Snapshot of everything known about the vehicle.
///
/// The orientation, rotation and acceleration are replaced wholesale on every
/// decoded telemetry frame. Propeller throttles follow either the vehicle's
/// own report or the last command issued from the ground.
#[derive(
  Clone, Copy, Debug, Deserialize, MaxSize, PartialEq, Serialize,
)]
pub struct MiniquadStatus {
  /// Orientation as reported by the vehicle.
  pub quaternion: Quaternion,

  /// Angular rate as reported by the vehicle.
  pub rotation: Rotation,

  /// Linear acceleration as reported by the vehicle.
  pub acceleration: Acceleration,

  propellers: [Propeller; 4],
}

impl Default for MiniquadStatus {
  fn default() -> Self {
    MiniquadStatus {
      quaternion: Quaternion::IDENTITY,
      rotation: Rotation::default(),
      acceleration: Acceleration::default(),
      propellers: DEFAULT_PINS.map(Propeller::new),
    }
  }
}

impl MiniquadStatus {
  /// Constructs a status for propellers wired to the given pins, in order of
  /// propellers one through four. Each pin may only be used once.
  pub fn new(pins: [u32; 4]) -> Result<Self> {
    for (i, pin) in pins.iter().enumerate() {
      if pins[..i].contains(pin) {
        return Err(Error::DuplicatePin(*pin));
      }
    }

    Ok(MiniquadStatus {
      propellers: pins.map(Propeller::new),
      ..Default::default()
    })
  }

  /// The four propellers, in order.
  pub fn propellers(&self) -> &[Propeller; 4] {
    &self.propellers
  }

  /// The current throttle of every propeller.
  pub fn throttles(&self) -> [Throttle; 4] {
    self.propellers.map(|propeller| propeller.throttle)
  }

  /// Sets every propeller's throttle at once. Nothing changes if any throttle
  /// is out of range.
  pub fn set_throttles(&mut self, throttles: [Throttle; 4]) -> Result<()> {
    for throttle in throttles {
      check_throttle(throttle)?;
    }

    for (propeller, throttle) in self.propellers.iter_mut().zip(throttles) {
      propeller.throttle = throttle;
    }

    Ok(())
  }

  /// Orientation as psi, theta and phi.
  pub fn euler_angle(&self) -> EulerAngle {
    self.quaternion.euler_angle()
  }

  /// Direction of gravity in the body frame.
  pub fn gravity(&self) -> Gravity {
    self.quaternion.gravity()
  }

  /// Orientation as yaw, pitch and roll.
  pub fn yaw_pitch_roll(&self) -> YawPitchRoll {
    self.quaternion.yaw_pitch_roll()
  }
}

impl ToPrettyString for MiniquadStatus {
  fn to_pretty_string(&self) -> String {
    let throttles = self
      .propellers
      .iter()
      .map(|propeller| {
        format!("\x1b[1m{}\x1b[0m@{}", propeller.throttle, propeller.pin)
      })
      .collect::<Vec<_>>()
      .join(", ");

    format!(
      "\x1b[1mquaternion\x1b[0m     {}\n\
       \x1b[1meuler angle\x1b[0m    {}\n\
       \x1b[1mrotation\x1b[0m       {}\n\
       \x1b[1macceleration\x1b[0m   {}\n\
       \x1b[1mgravity\x1b[0m        {}\n\
       \x1b[1myaw pitch roll\x1b[0m {}\n\
       \x1b[1mthrottles\x1b[0m      {}",
      self.quaternion,
      self.euler_angle(),
      self.rotation,
      self.acceleration,
      self.gravity(),
      self.yaw_pitch_roll(),
      throttles,
    )
  }
}

/// Defines how some data coming from the vehicle should be applied to the
/// status snapshot.
pub trait Ingestible {
  /// Using the data from self, update the status.
  fn ingest(&self, status: &mut MiniquadStatus);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn duplicate_pins_are_rejected() {
    assert_eq!(
      MiniquadStatus::new([3, 5, 3, 9]),
      Err(Error::DuplicatePin(3))
    );

    let status = MiniquadStatus::new([6, 5, 3, 9]).unwrap();
    let pins: Vec<u32> = status.propellers().iter().map(|p| p.pin()).collect();
    assert_eq!(pins, vec![6, 5, 3, 9]);
    assert_eq!(status.throttles(), [0; 4]);
  }

  #[test]
  fn throttles_above_range_are_rejected_atomically() {
    let mut status = MiniquadStatus::default();
    status.set_throttles([10, 20, 30, 40]).unwrap();

    assert!(matches!(
      status.set_throttles([1, 2, 256, 4]),
      Err(Error::OutOfRange { quantity: "throttle", .. })
    ));
    assert_eq!(status.throttles(), [10, 20, 30, 40]);

    let mut propeller = Propeller::new(3);
    assert!(propeller.set_throttle(255).is_ok());
    assert!(propeller.set_throttle(300).is_err());
    assert_eq!(propeller.throttle(), 255);
  }

  #[test]
  fn status_survives_postcard() -> anyhow::Result<()> {
    let mut status = MiniquadStatus::new([1, 2, 3, 4])?;
    status.quaternion = Quaternion::new(0.5, 0.5, 0.5, 0.5);
    status.set_throttles([60, 70, 80, 90])?;

    let bytes = postcard::to_allocvec(&status)?;
    let decoded: MiniquadStatus = postcard::from_bytes(&bytes)?;
    assert_eq!(decoded, status);
    Ok(())
  }
}
