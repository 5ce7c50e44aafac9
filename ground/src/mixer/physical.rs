//! Physics-model controller. Instead of nudging throttles, it computes the
//! torques and thrust the rigid body needs and inverts the rotor thrust model
//! to find each propeller's throttle directly.

use super::{
  Adjustment,
  Bias,
  Channel,
  ControlInput,
  Mixer,
  PropellerDirection,
  Signal,
  TuningError,
};
use common::comm::{Throttle, MAX_THROTTLE};

/// cos(45°), the lever arm factor of an "X" airframe.
const ARM_FACTOR: f64 = 0.70710678;

/// Physical constants of the vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Airframe {
  /// Rotor thrust coefficient.
  pub k1: f64,

  /// Rotor drag torque coefficient.
  pub k2: f64,

  /// Throttle to rotor speed coefficient.
  pub kt: f64,

  /// Rotor time constant.
  pub tau: f64,

  /// Mass, in kilograms.
  pub mass: f64,

  /// Distance between opposite rotors, in meters.
  pub span: f64,

  /// Moment of inertia about the body X axis.
  pub jx: f64,

  /// Moment of inertia about the body Y axis.
  pub jy: f64,

  /// Moment of inertia about the body Z axis.
  pub jz: f64,

  /// Local gravitational acceleration, in m/s².
  pub gravity: f64,

  /// Control period, in seconds.
  pub period: f64,
}

impl Default for Airframe {
  fn default() -> Self {
    Airframe {
      k1: 2.24e-10,
      k2: 1.32e-12,
      kt: 2925923.0,
      tau: 2.0,
      mass: 0.0338,
      span: 0.44,
      jx: 0.0000158 / 2.0,
      jy: 0.0000158 / 2.0,
      jz: 0.0000158,
      gravity: 9.7833,
      period: 0.053,
    }
  }
}

/// Pole placement of the closed loop. Both poles apply to every axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlStrength {
  /// First closed-loop pole.
  pub a: f64,

  /// Second closed-loop pole.
  pub b: f64,
}

impl Default for ControlStrength {
  fn default() -> Self {
    ControlStrength { a: -0.1, b: -0.25 }
  }
}

/// Gains derived from an airframe and a control strength.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gains {
  /// Proportional gains for roll, pitch and yaw.
  pub kp: [f64; 3],

  /// Derivative gains for roll, pitch and yaw.
  pub kd: [f64; 3],

  /// Proportional gain of vertical acceleration.
  pub kp_a: f64,

  /// Integral gain of vertical acceleration.
  pub ki_a: f64,
}

impl Gains {
  /// Derives the gains. Always computed from the current period so that the
  /// gains and the control law never disagree about it.
  pub fn derive(airframe: &Airframe, strength: &ControlStrength) -> Self {
    let ControlStrength { a, b } = *strength;
    let t = airframe.period;
    let kp = |j: f64| -(a - 1.0) * (b - 1.0) * j / t;
    let kd = (1.0 - a * b) / t / t;

    Gains {
      kp: [kp(airframe.jx), kp(airframe.jy), kp(airframe.jz)],
      kd: [kd; 3],
      kp_a: a * b * airframe.mass,
      ki_a: -(a - 1.0) * (b - 1.0) * airframe.mass,
    }
  }
}

/// Required torques about each axis and the required collective thrust,
/// already divided by the rotor coefficients.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Forces {
  /// Torque about the body X axis.
  pub roll: f64,

  /// Torque about the body Y axis.
  pub pitch: f64,

  /// Torque about the body Z axis.
  pub yaw: f64,

  /// Collective thrust.
  pub thrust: f64,
}

/// The physics-model mixer. Angles are tracked in radians and acceleration
/// in m/s².
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalModel {
  airframe: Airframe,
  gains: Gains,

  /// Spin direction of propeller one; flips the sign of yaw torque.
  pub direction: PropellerDirection,

  /// Roll bias, in degrees.
  pub roll: Bias,

  /// Pitch bias, in degrees.
  pub pitch: Bias,

  /// Yaw bias, in degrees.
  pub yaw: Bias,

  /// Vertical acceleration bias, in m/s².
  pub acceleration: Bias,

  /// Vertical velocity bias, in m/s.
  pub velocity: Bias,

  last_angles: Option<[f64; 3]>,
  accel_sum: f64,
}

impl Default for PhysicalModel {
  fn default() -> Self {
    PhysicalModel::new(Airframe::default(), ControlStrength::default())
  }
}

impl PhysicalModel {
  /// Constructs a model with zero biases and no history.
  pub fn new(airframe: Airframe, strength: ControlStrength) -> Self {
    PhysicalModel {
      gains: Gains::derive(&airframe, &strength),
      airframe,
      direction: PropellerDirection::default(),
      roll: Bias::default(),
      pitch: Bias::default(),
      yaw: Bias::default(),
      acceleration: Bias::default(),
      velocity: Bias::default(),
      last_angles: None,
      accel_sum: 0.0,
    }
  }

  /// The vehicle's constants.
  pub fn airframe(&self) -> &Airframe {
    &self.airframe
  }

  /// The gains in use.
  pub fn gains(&self) -> &Gains {
    &self.gains
  }

  /// Computes the forces for `input` and advances the derivative and integral
  /// history by one sample.
  pub fn forces(&mut self, input: &ControlInput) -> Forces {
    let frame = &self.airframe;
    let gains = &self.gains;

    let angles = [input.roll, input.pitch, input.yaw].map(f64::to_radians);
    // the first sample of a session has no meaningful predecessor
    let last = self.last_angles.unwrap_or(angles);
    self.last_angles = Some(angles);

    let accel_z = input.accel_z * frame.gravity;
    self.accel_sum += accel_z;

    let biases = [self.roll, self.pitch, self.yaw];
    let axis = |i: usize| {
      let error = angles[i]
        - biases[i].setpoint.to_radians()
        - biases[i].trim.to_radians();
      gains.kp[i] * error + gains.kd[i] / frame.period * (angles[i] - last[i])
    };

    let lever = ARM_FACTOR * frame.span * frame.k1;
    let tilt = (angles[0].cos() * angles[1].cos()).max(f64::EPSILON);

    let integral = self.accel_sum
      - self.velocity.setpoint / frame.period
      - self.velocity.trim / frame.period;

    Forces {
      roll: axis(0) / lever,
      pitch: axis(1) / lever,
      yaw: axis(2) / (frame.k2 * self.direction.sign()),
      thrust: (gains.kp_a * self.acceleration.error(accel_z)
        + gains.ki_a * integral
        + frame.mass * frame.gravity / tilt)
        / frame.k1,
    }
  }

  fn throttle(&self, net: f64) -> Throttle {
    let throttle = net.powf(self.airframe.tau / 2.0) / 4.0 / self.airframe.kt;

    // negative or NaN net force means the rotor should not spin at all
    if !(throttle > 0.0) {
      return 0;
    }

    throttle.min(MAX_THROTTLE as f64) as Throttle
  }
}

impl Mixer for PhysicalModel {
  fn step(&mut self, input: &ControlInput) -> [Throttle; 4] {
    let Forces {
      roll: x,
      pitch: y,
      yaw: z,
      thrust: a,
    } = self.forces(input);

    [a - x + y + z, a - x - y - z, a + x - y + z, a + x + y - z]
      .map(|net| self.throttle(net))
  }

  fn reset(&mut self) {
    self.last_angles = None;
    self.accel_sum = 0.0;
  }

  /// Gains are derived from the airframe, so only biases and the propeller
  /// direction can be adjusted.
  fn adjust(&mut self, adjustment: Adjustment) -> Result<(), TuningError> {
    let (bias, term, value) = match adjustment {
      Adjustment::Direction(direction) => {
        self.direction = direction;
        return Ok(());
      }
      Adjustment::Bias {
        channel,
        signal,
        term,
        value,
      } => {
        let bias = match (channel, signal) {
          (Channel::Roll, Signal::Angle) => &mut self.roll,
          (Channel::Pitch, Signal::Angle) => &mut self.pitch,
          (Channel::Yaw, Signal::Angle) => &mut self.yaw,
          (Channel::Vertical, Signal::Acceleration) => &mut self.acceleration,
          (Channel::Vertical, Signal::Velocity) => &mut self.velocity,
          _ => return Err(TuningError::Unsupported(adjustment)),
        };

        (bias, term, value)
      }
      Adjustment::Gain { .. } => {
        return Err(TuningError::Unsupported(adjustment));
      }
    };

    bias.set(term, value);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mixer::{BiasTerm, GainKind};
  use common::comm::Rotation;

  fn level(accel_z: f64) -> ControlInput {
    ControlInput {
      accel_z,
      ..Default::default()
    }
  }

  #[test]
  fn stock_airframe_gains() {
    let gains = PhysicalModel::default().gains;

    assert!((gains.kp[0] - -1.375 * 7.9e-6 / 0.053).abs() < 1e-12);
    assert_eq!(gains.kp[0], gains.kp[1]);
    assert!((gains.kp[2] - 2.0 * gains.kp[0]).abs() < 1e-12);
    assert!((gains.kd[0] - 0.975 / 0.053 / 0.053).abs() < 1e-9);
    assert!((gains.kp_a - 0.025 * 0.0338).abs() < 1e-12);
    assert!((gains.ki_a - -1.375 * 0.0338).abs() < 1e-12);
  }

  #[test]
  fn level_hover_balances_rotors() {
    let mut model = PhysicalModel::default();

    // m·g / K1 / 4 / Kt ≈ 126.13
    assert_eq!(model.step(&level(0.0)), [126; 4]);
  }

  #[test]
  fn roll_torque_is_opposed() {
    let mut model = PhysicalModel::default();
    let rolled = ControlInput {
      roll: 10.0,
      ..Default::default()
    };

    let forces = model.forces(&rolled);
    assert!(forces.roll < 0.0);
    assert_eq!(forces.pitch, 0.0);
    assert_eq!(forces.yaw, 0.0);
  }

  #[test]
  fn derivative_uses_previous_sample() {
    let mut model = PhysicalModel::default();
    let still = model.forces(&level(0.0));
    assert_eq!(still.roll, 0.0);

    let moving = ControlInput {
      roll: 1.0,
      rotation: Rotation::new(100.0, 0.0, 0.0),
      ..Default::default()
    };
    let forces = model.forces(&moving);

    let gains = model.gains;
    let expected = (gains.kp[0] * 1f64.to_radians()
      + gains.kd[0] / 0.053 * 1f64.to_radians())
      / (ARM_FACTOR * 0.44 * 2.24e-10);
    assert!((forces.roll - expected).abs() < expected.abs() * 1e-9);
  }

  #[test]
  fn direction_flips_yaw() {
    let yawed = ControlInput {
      yaw: 20.0,
      ..Default::default()
    };

    let mut clockwise = PhysicalModel::default();
    let mut counter = PhysicalModel::default();
    counter.direction = PropellerDirection::CounterClockwise;

    assert_eq!(clockwise.forces(&yawed).yaw, -counter.forces(&yawed).yaw);
  }

  #[test]
  fn throttles_saturate_at_protocol_range() {
    // free fall drives the (negative) integral gain to demand full thrust
    let mut model = PhysicalModel::default();
    assert_eq!(model.step(&level(-100.0)), [MAX_THROTTLE; 4]);

    // hard upward acceleration demands negative thrust
    let mut model = PhysicalModel::default();
    assert_eq!(model.step(&level(100.0)), [0; 4]);
  }

  #[test]
  fn reset_forgets_history() {
    let mut model = PhysicalModel::default();
    model.step(&level(-100.0));
    model.step(&level(-100.0));

    model.reset();
    assert_eq!(model.step(&level(0.0)), [126; 4]);
  }

  #[test]
  fn only_biases_and_direction_are_adjustable() {
    let mut model = PhysicalModel::default();
    let gains = *model.gains();

    model
      .adjust(Adjustment::Bias {
        channel: Channel::Pitch,
        signal: Signal::Angle,
        term: BiasTerm::Trim,
        value: 2.0,
      })
      .unwrap();
    model
      .adjust(Adjustment::Direction(PropellerDirection::CounterClockwise))
      .unwrap();

    assert_eq!(model.pitch.trim, 2.0);
    assert_eq!(model.direction, PropellerDirection::CounterClockwise);

    let gain = Adjustment::Gain {
      channel: Channel::Roll,
      gain: GainKind::Proportional,
      value: 1.0,
    };
    assert_eq!(model.adjust(gain), Err(TuningError::Unsupported(gain)));
    assert_eq!(*model.gains(), gains);
  }
}
