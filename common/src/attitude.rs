use crate::{Error, Result};
use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use std::{fmt, ops::Mul};

/// Represents a three-component vector.
#[derive(
  Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq, Default,
)]
pub struct Vector {
  /// Component along the body X axis.
  pub x: f64,

  /// Component along the body Y axis.
  pub y: f64,

  /// Component along the body Z axis.
  pub z: f64,
}

impl Vector {
  /// Constructs a vector from its components.
  pub const fn new(x: f64, y: f64, z: f64) -> Self {
    Vector { x, y, z }
  }
}

impl fmt::Display for Vector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}, {:.2}, {:.2}", self.x, self.y, self.z)
  }
}

/// Projection of gravity onto the body axes, in multiples of g.
pub type Gravity = Vector;

/// Four-component rotation representation, the vehicle's authoritative
/// orientation.
///
/// Only a normalized quaternion represents a rotation, but this is not
/// enforced: values are taken verbatim from telemetry.
#[derive(Clone, Copy, Debug, Deserialize, MaxSize, PartialEq, Serialize)]
pub struct Quaternion {
  /// Scalar component.
  pub w: f64,

  /// First vector component.
  pub x: f64,

  /// Second vector component.
  pub y: f64,

  /// Third vector component.
  pub z: f64,
}

impl Default for Quaternion {
  fn default() -> Self {
    Self::IDENTITY
  }
}

impl Quaternion {
  /// The rotation which leaves every vector unchanged.
  pub const IDENTITY: Quaternion = Quaternion::new(1.0, 0.0, 0.0, 0.0);

  /// Constructs a quaternion from its components.
  pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
    Quaternion { w, x, y, z }
  }

  /// The Euclidean norm of all four components.
  pub fn magnitude(&self) -> f64 {
    (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z)
      .sqrt()
  }

  /// Scales the quaternion to unit magnitude in place.
  ///
  /// A zero quaternion has no direction and normalizes to NaN components, so
  /// callers must not normalize one.
  pub fn normalize(&mut self) {
    let magnitude = self.magnitude();

    self.w /= magnitude;
    self.x /= magnitude;
    self.y /= magnitude;
    self.z /= magnitude;
  }

  /// Returns a normalized copy, leaving `self` untouched.
  pub fn normalized(&self) -> Self {
    let mut copy = *self;
    copy.normalize();
    copy
  }

  /// The conjugate, which is also the inverse of a unit quaternion.
  pub fn conjugate(&self) -> Self {
    Quaternion::new(self.w, -self.x, -self.y, -self.z)
  }

  /// Hamilton product `self * other`. Not commutative.
  pub fn product(&self, other: &Quaternion) -> Self {
    Quaternion {
      w: self.w * other.w - self.x * other.x - self.y * other.y
        - self.z * other.z,
      x: self.w * other.x + self.x * other.w + self.y * other.z
        - self.z * other.y,
      y: self.w * other.y - self.x * other.z
        + self.y * other.w
        + self.z * other.x,
      z: self.w * other.z + self.x * other.y - self.y * other.x
        + self.z * other.w,
    }
  }

  /// Decomposes the rotation into psi, theta and phi, in degrees.
  ///
  /// Under sensor noise the argument of the theta arcsine can leave
  /// `[-1, 1]`. It is clamped so theta saturates at ±90° instead of turning
  /// into NaN.
  pub fn euler_angle(&self) -> EulerAngle {
    let Quaternion { w, x, y, z } = *self;

    let psi =
      (2.0 * x * y - 2.0 * z * z).atan2(2.0 * w * w + 2.0 * x * x - 1.0);
    let theta = -(2.0 * x * z + 2.0 * w * y).clamp(-1.0, 1.0).asin();
    let phi =
      (2.0 * y * z - 2.0 * w * x).atan2(2.0 * w * w + 2.0 * z * z - 1.0);

    EulerAngle {
      psi: psi.to_degrees(),
      theta: theta.to_degrees(),
      phi: phi.to_degrees(),
    }
  }

  /// The direction of gravity expressed in the body frame.
  pub fn gravity(&self) -> Gravity {
    let Quaternion { w, x, y, z } = *self;

    Gravity {
      x: 2.0 * (x * z - w * y),
      y: 2.0 * (w * x + y * z),
      z: w * w - x * x - y * y + z * z,
    }
  }

  /// Decomposes the rotation into yaw, pitch and roll, in degrees, using the
  /// gravity vector for pitch and roll.
  pub fn yaw_pitch_roll(&self) -> YawPitchRoll {
    let Quaternion { w, x, y, z } = *self;
    let gravity = self.gravity();

    let yaw =
      (2.0 * x * y - 2.0 * w * z).atan2(2.0 * w * w + 2.0 * x * x - 1.0);

    // atan2 with a non-negative denominator is atan(num / den), except that a
    // zero denominator saturates to ±90° rather than dividing by zero.
    let pitch = gravity
      .x
      .atan2((gravity.y * gravity.y + gravity.z * gravity.z).sqrt());
    let roll = gravity
      .y
      .atan2((gravity.x * gravity.x + gravity.z * gravity.z).sqrt());

    YawPitchRoll {
      yaw: yaw.to_degrees(),
      pitch: pitch.to_degrees(),
      roll: roll.to_degrees(),
    }
  }
}

impl Mul for Quaternion {
  type Output = Quaternion;

  fn mul(self, rhs: Quaternion) -> Self::Output {
    self.product(&rhs)
  }
}

impl fmt::Display for Quaternion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}, {:.2}, {:.2}, {:.2}", self.w, self.x, self.y, self.z)
  }
}

/// Psi, theta and phi decomposition of an orientation, each in degrees within
/// `[-180, 180]`.
#[derive(
  Clone, Copy, Debug, Default, Deserialize, MaxSize, PartialEq, Serialize,
)]
pub struct EulerAngle {
  psi: f64,
  theta: f64,
  phi: f64,
}

impl EulerAngle {
  /// Constructs an Euler angle, rejecting any component outside of
  /// `[-180, 180]` degrees.
  pub fn new(psi: f64, theta: f64, phi: f64) -> Result<Self> {
    Ok(EulerAngle {
      psi: Error::check_range("psi", psi, -180.0, 180.0)?,
      theta: Error::check_range("theta", theta, -180.0, 180.0)?,
      phi: Error::check_range("phi", phi, -180.0, 180.0)?,
    })
  }

  /// Psi, in degrees.
  pub fn psi(&self) -> f64 {
    self.psi
  }

  /// Theta, in degrees.
  pub fn theta(&self) -> f64 {
    self.theta
  }

  /// Phi, in degrees.
  pub fn phi(&self) -> f64 {
    self.phi
  }

  /// Sets psi, rejecting values outside of `[-180, 180]`.
  pub fn set_psi(&mut self, psi: f64) -> Result<()> {
    self.psi = Error::check_range("psi", psi, -180.0, 180.0)?;
    Ok(())
  }

  /// Sets theta, rejecting values outside of `[-180, 180]`.
  pub fn set_theta(&mut self, theta: f64) -> Result<()> {
    self.theta = Error::check_range("theta", theta, -180.0, 180.0)?;
    Ok(())
  }

  /// Sets phi, rejecting values outside of `[-180, 180]`.
  pub fn set_phi(&mut self, phi: f64) -> Result<()> {
    self.phi = Error::check_range("phi", phi, -180.0, 180.0)?;
    Ok(())
  }
}

impl fmt::Display for EulerAngle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}, {:.2}, {:.2}", self.psi, self.theta, self.phi)
  }
}

/// Yaw, pitch and roll in degrees. Yaw lies within `[-180, 180]`, pitch and
/// roll within `[-90, 90]`.
#[derive(
  Clone, Copy, Debug, Default, Deserialize, MaxSize, PartialEq, Serialize,
)]
pub struct YawPitchRoll {
  yaw: f64,
  pitch: f64,
  roll: f64,
}

impl YawPitchRoll {
  /// Constructs the angles, rejecting any outside of their ranges.
  pub fn new(yaw: f64, pitch: f64, roll: f64) -> Result<Self> {
    Ok(YawPitchRoll {
      yaw: Error::check_range("yaw", yaw, -180.0, 180.0)?,
      pitch: Error::check_range("pitch", pitch, -90.0, 90.0)?,
      roll: Error::check_range("roll", roll, -90.0, 90.0)?,
    })
  }

  /// Yaw, in degrees.
  pub fn yaw(&self) -> f64 {
    self.yaw
  }

  /// Pitch, in degrees.
  pub fn pitch(&self) -> f64 {
    self.pitch
  }

  /// Roll, in degrees.
  pub fn roll(&self) -> f64 {
    self.roll
  }

  /// Sets yaw, rejecting values outside of `[-180, 180]`.
  pub fn set_yaw(&mut self, yaw: f64) -> Result<()> {
    self.yaw = Error::check_range("yaw", yaw, -180.0, 180.0)?;
    Ok(())
  }

  /// Sets pitch, rejecting values outside of `[-90, 90]`.
  pub fn set_pitch(&mut self, pitch: f64) -> Result<()> {
    self.pitch = Error::check_range("pitch", pitch, -90.0, 90.0)?;
    Ok(())
  }

  /// Sets roll, rejecting values outside of `[-90, 90]`.
  pub fn set_roll(&mut self, roll: f64) -> Result<()> {
    self.roll = Error::check_range("roll", roll, -90.0, 90.0)?;
    Ok(())
  }
}

impl fmt::Display for YawPitchRoll {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}, {:.2}, {:.2}", self.yaw, self.pitch, self.roll)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::f64::consts::FRAC_1_SQRT_2;

  const TOLERANCE: f64 = 1e-9;

  fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < TOLERANCE
  }

  fn samples() -> Vec<Quaternion> {
    let raw = [
      (1.0, 0.0, 0.0, 0.0),
      (0.0, 1.0, 0.0, 0.0),
      (0.0, 0.0, 1.0, 0.0),
      (0.0, 0.0, 0.0, 1.0),
      (FRAC_1_SQRT_2, FRAC_1_SQRT_2, 0.0, 0.0),
      (FRAC_1_SQRT_2, 0.0, FRAC_1_SQRT_2, 0.0),
      (0.5, 0.5, 0.5, 0.5),
      (0.3, -0.7, 0.2, 0.9),
      (-0.1, 0.4, -0.8, 0.25),
    ];

    raw
      .iter()
      .map(|&(w, x, y, z)| Quaternion::new(w, x, y, z).normalized())
      .collect()
  }

  #[test]
  fn normalize_yields_unit_magnitude() {
    let mut q = Quaternion::new(3.0, -4.0, 12.0, 0.5);
    q.normalize();
    assert!(close(q.magnitude(), 1.0));

    let q = Quaternion::new(1e-3, 2e-3, 0.0, -5e-4).normalized();
    assert!(close(q.magnitude(), 1.0));
  }

  #[test]
  fn zero_quaternion_normalizes_to_nan() {
    let q = Quaternion::new(0.0, 0.0, 0.0, 0.0).normalized();
    assert!(q.w.is_nan() && q.x.is_nan());
  }

  #[test]
  fn identity_is_neutral_for_product() {
    for q in samples() {
      assert_eq!(Quaternion::IDENTITY.product(&q), q);
      assert_eq!(q * Quaternion::IDENTITY, q);
    }
  }

  #[test]
  fn product_is_not_commutative() {
    let i = Quaternion::new(0.0, 1.0, 0.0, 0.0);
    let j = Quaternion::new(0.0, 0.0, 1.0, 0.0);

    // i * j = k, j * i = -k
    assert_eq!(i * j, Quaternion::new(0.0, 0.0, 0.0, 1.0));
    assert_eq!(j * i, Quaternion::new(0.0, 0.0, 0.0, -1.0));
    assert_ne!(i * j, j * i);
  }

  #[test]
  fn conjugate_inverts_unit_quaternion() {
    for q in samples() {
      let product = q * q.conjugate();
      assert!(close(product.w, 1.0));
      assert!(close(product.x, 0.0));
      assert!(close(product.y, 0.0));
      assert!(close(product.z, 0.0));
    }
  }

  #[test]
  fn derived_angles_stay_in_range() {
    for q in samples() {
      let euler = q.euler_angle();
      for angle in [euler.psi(), euler.theta(), euler.phi()] {
        assert!((-180.0..=180.0).contains(&angle), "{angle} from {q:?}");
      }

      let ypr = q.yaw_pitch_roll();
      assert!((-180.0..=180.0).contains(&ypr.yaw()));
      assert!((-90.0..=90.0).contains(&ypr.pitch()));
      assert!((-90.0..=90.0).contains(&ypr.roll()));

      assert_eq!(q.euler_angle(), euler);
      assert_eq!(q.yaw_pitch_roll(), ypr);
    }
  }

  #[test]
  fn identity_is_level() {
    let q = Quaternion::IDENTITY;

    assert_eq!(q.gravity(), Vector::new(0.0, 0.0, 1.0));

    let ypr = q.yaw_pitch_roll();
    assert!(close(ypr.yaw(), 0.0));
    assert!(close(ypr.pitch(), 0.0));
    assert!(close(ypr.roll(), 0.0));
  }

  #[test]
  fn roll_about_x_shows_in_gravity_and_roll() {
    // 30 degrees about the body X axis
    let half = 15f64.to_radians();
    let q = Quaternion::new(half.cos(), half.sin(), 0.0, 0.0);

    let gravity = q.gravity();
    assert!(close(gravity.x, 0.0));
    assert!(close(gravity.y, 30f64.to_radians().sin()));
    assert!(close(gravity.z, 30f64.to_radians().cos()));

    let ypr = q.yaw_pitch_roll();
    assert!(close(ypr.roll(), 30.0));
    assert!(close(ypr.pitch(), 0.0));
  }

  #[test]
  fn noisy_quaternion_saturates_theta() {
    // 2xz + 2wy = 1.46, outside of the arcsine domain
    let q = Quaternion::new(0.8, 0.5, 0.6, 0.5);
    let euler = q.euler_angle();
    assert!(close(euler.theta(), -90.0));

    let q = Quaternion::new(-0.8, 0.5, 0.6, -0.5);
    assert!(close(q.euler_angle().theta(), 90.0));
  }

  #[test]
  fn vertical_gravity_saturates_pitch() {
    // gravity along X only: gy = gz = 0
    let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, -FRAC_1_SQRT_2, 0.0);
    let gravity = q.gravity();
    assert!(close(gravity.y, 0.0) && close(gravity.z, 0.0));

    let ypr = q.yaw_pitch_roll();
    assert!(close(ypr.pitch(), 90.0));
    assert!(!ypr.roll().is_nan());
  }

  #[test]
  fn range_checked_constructors_reject_misuse() {
    assert!(EulerAngle::new(180.0, -180.0, 0.0).is_ok());
    assert!(matches!(
      EulerAngle::new(0.0, 180.5, 0.0),
      Err(Error::OutOfRange { quantity: "theta", .. })
    ));

    assert!(YawPitchRoll::new(-180.0, 90.0, -90.0).is_ok());
    assert!(YawPitchRoll::new(0.0, 91.0, 0.0).is_err());
    assert!(YawPitchRoll::new(0.0, 0.0, -90.1).is_err());
    assert!(YawPitchRoll::new(181.0, 0.0, 0.0).is_err());

    let mut ypr = YawPitchRoll::default();
    assert!(ypr.set_roll(120.0).is_err());
    assert_eq!(ypr.roll(), 0.0);
    ypr.set_roll(45.0).unwrap();
    assert_eq!(ypr.roll(), 45.0);

    let mut euler = EulerAngle::default();
    assert!(euler.set_psi(-200.0).is_err());
    euler.set_phi(-179.0).unwrap();
    assert_eq!(euler.phi(), -179.0);

    assert!(matches!(
      EulerAngle::new(f64::NAN, 0.0, 0.0),
      Err(Error::OutOfRange { quantity: "psi", .. })
    ));
    assert!(YawPitchRoll::new(0.0, 0.0, f64::NAN).is_err());
    assert!(ypr.set_pitch(f64::NAN).is_err());
    assert_eq!(ypr.pitch(), 0.0);
    assert!(euler.set_theta(f64::NAN).is_err());
    assert_eq!(euler.theta(), 0.0);
  }
}
