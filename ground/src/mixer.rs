/// The physics-model alternative to the incremental controller.
pub mod physical;

use common::comm::{MiniquadStatus, Rotation, Throttle, MAX_THROTTLE};
use std::fmt;

/// Rows are propellers one through four; columns are the roll, pitch, yaw and
/// vertical corrections. Fixed by the geometry of the "X" airframe.
const MIXING: [[f64; 4]; 4] = [
  [-1.0, 1.0, -1.0, 1.0],
  [-1.0, -1.0, 1.0, 1.0],
  [1.0, -1.0, -1.0, 1.0],
  [1.0, 1.0, 1.0, 1.0],
];

/// Converts the vehicle's measured state into four throttles.
pub trait Mixer {
  /// Computes the throttles for one control step.
  fn step(&mut self, input: &ControlInput) -> [Throttle; 4];

  /// Clears all time-integrated state. Must be called before a new control
  /// session starts.
  fn reset(&mut self);

  /// Applies one runtime tuning change. Parameters the mixer does not have
  /// are rejected with [`TuningError::Unsupported`].
  fn adjust(&mut self, adjustment: Adjustment) -> Result<()>;
}

impl<M: Mixer + ?Sized> Mixer for Box<M> {
  fn step(&mut self, input: &ControlInput) -> [Throttle; 4] {
    (**self).step(input)
  }

  fn reset(&mut self) {
    (**self).reset()
  }

  fn adjust(&mut self, adjustment: Adjustment) -> Result<()> {
    (**self).adjust(adjustment)
  }
}

/// Which control strategy drives the throttles.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MixerKind {
  /// [`IncrementalPid`].
  #[default]
  Incremental,

  /// [`physical::PhysicalModel`].
  Physical,
}

impl MixerKind {
  /// Builds the selected mixer with its default parameters, clamped to
  /// `band` where the strategy has one.
  pub fn build(&self, band: ThrottleBand) -> Box<dyn Mixer + Send> {
    match self {
      Self::Incremental => {
        Box::new(IncrementalPid::new(Tuning::default(), band))
      }
      Self::Physical => Box::new(physical::PhysicalModel::default()),
    }
  }
}

/// Measurements fed to a mixer on every control step.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlInput {
  /// Roll angle, in degrees.
  pub roll: f64,

  /// Pitch angle, in degrees.
  pub pitch: f64,

  /// Yaw angle, in degrees.
  pub yaw: f64,

  /// Angular rate, in degrees per second.
  pub rotation: Rotation,

  /// Vertical acceleration, in multiples of g.
  pub accel_z: f64,
}

impl From<&MiniquadStatus> for ControlInput {
  fn from(status: &MiniquadStatus) -> Self {
    let ypr = status.yaw_pitch_roll();

    ControlInput {
      roll: ypr.roll(),
      pitch: ypr.pitch(),
      yaw: ypr.yaw(),
      rotation: status.rotation,
      accel_z: status.acceleration.z,
    }
  }
}

/// Rejected tuning parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum TuningError {
  /// Gains must not be negative.
  Negative {
    /// Which gain was rejected.
    parameter: &'static str,

    /// The rejected value.
    value: f64,
  },

  /// The propeller direction must be either -1 or +1.
  InvalidDirection(i32),

  /// The throttle band must satisfy `0 <= min <= max <= MAX_THROTTLE`.
  InvalidBand {
    /// Requested lower bound.
    min: f64,

    /// Requested upper bound.
    max: f64,
  },

  /// The mixer has no such parameter.
  Unsupported(Adjustment),
}

impl fmt::Display for TuningError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Negative { parameter, value } => {
        write!(f, "The {parameter} cannot be negative (got {value}).")
      }
      Self::InvalidDirection(value) => {
        write!(f, "Propeller direction must be -1 or 1 (got {value}).")
      }
      Self::InvalidBand { min, max } => write!(
        f,
        "Throttle band [{min}, {max}] does not lie within \
         [0, {MAX_THROTTLE}]."
      ),
      Self::Unsupported(adjustment) => {
        write!(f, "The mixer has no '{adjustment}' parameter.")
      }
    }
  }
}

impl std::error::Error for TuningError {}

type Result<T> = std::result::Result<T, TuningError>;

fn non_negative(parameter: &'static str, value: f64) -> Result<f64> {
  // written so that NaN is rejected as well
  if !(value >= 0.0) {
    return Err(TuningError::Negative { parameter, value });
  }

  Ok(value)
}

/// A pair of offsets subtracted from a measurement before it is weighed by a
/// gain. Both are unconstrained.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bias {
  /// The desired value of the measurement.
  pub setpoint: f64,

  /// Corrects for a constant sensor or airframe offset.
  pub trim: f64,
}

impl Bias {
  /// The error of `measured` relative to this bias.
  pub fn error(&self, measured: f64) -> f64 {
    measured - self.setpoint - self.trim
  }

  /// Overwrites one of the two offsets.
  pub fn set(&mut self, term: BiasTerm, value: f64) {
    match term {
      BiasTerm::Setpoint => self.setpoint = value,
      BiasTerm::Trim => self.trim = value,
    }
  }
}

/// Proportional-derivative tuning of one rotational axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AxisTuning {
  kp: f64,
  kd: f64,

  /// Bias applied to the angle, in degrees.
  pub angle: Bias,

  /// Bias applied to the angular rate, in degrees per second.
  pub rate: Bias,
}

impl AxisTuning {
  /// Constructs the tuning with zero biases, rejecting negative gains.
  pub fn new(kp: f64, kd: f64) -> Result<Self> {
    Ok(AxisTuning {
      kp: non_negative("proportional gain", kp)?,
      kd: non_negative("derivative gain", kd)?,
      angle: Bias::default(),
      rate: Bias::default(),
    })
  }

  /// Proportional gain.
  pub fn kp(&self) -> f64 {
    self.kp
  }

  /// Derivative gain.
  pub fn kd(&self) -> f64 {
    self.kd
  }

  /// Sets the proportional gain.
  pub fn set_kp(&mut self, kp: f64) -> Result<()> {
    self.kp = non_negative("proportional gain", kp)?;
    Ok(())
  }

  /// Sets the derivative gain.
  pub fn set_kd(&mut self, kd: f64) -> Result<()> {
    self.kd = non_negative("derivative gain", kd)?;
    Ok(())
  }

  /// The derivative term uses the sensor-reported rate rather than a
  /// difference of angles.
  fn correction(&self, angle: f64, rate: f64) -> f64 {
    self.kp * self.angle.error(angle) - self.kd * self.rate.error(rate)
  }
}

/// Tuning of the vertical acceleration channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VerticalTuning {
  kp: f64,
  ki: f64,

  /// Bias applied to the vertical acceleration, in multiples of g.
  pub acceleration: Bias,

  /// Bias applied to the vertical velocity. Only read by the integral term.
  pub velocity: Bias,
}

impl VerticalTuning {
  /// Constructs the tuning with zero biases, rejecting negative gains.
  pub fn new(kp: f64, ki: f64) -> Result<Self> {
    Ok(VerticalTuning {
      kp: non_negative("proportional gain", kp)?,
      ki: non_negative("integral gain", ki)?,
      acceleration: Bias::default(),
      velocity: Bias::default(),
    })
  }

  /// Proportional gain.
  pub fn kp(&self) -> f64 {
    self.kp
  }

  /// Integral gain. Accepted and stored, but the incremental controller does
  /// not apply an integral term to its output.
  pub fn ki(&self) -> f64 {
    self.ki
  }

  /// Sets the proportional gain.
  pub fn set_kp(&mut self, kp: f64) -> Result<()> {
    self.kp = non_negative("proportional gain", kp)?;
    Ok(())
  }

  /// Sets the integral gain.
  pub fn set_ki(&mut self, ki: f64) -> Result<()> {
    self.ki = non_negative("integral gain", ki)?;
    Ok(())
  }

  fn correction(&self, accel_z: f64) -> f64 {
    self.kp * self.acceleration.error(accel_z)
  }
}

/// Spin direction of propeller one. Propellers alternate from there.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PropellerDirection {
  /// Propeller one spins clockwise.
  #[default]
  Clockwise,

  /// Propeller one spins counterclockwise.
  CounterClockwise,
}

impl PropellerDirection {
  /// The sign applied to yaw torque.
  pub fn sign(&self) -> f64 {
    match self {
      Self::Clockwise => 1.0,
      Self::CounterClockwise => -1.0,
    }
  }
}

impl TryFrom<i32> for PropellerDirection {
  type Error = TuningError;

  fn try_from(value: i32) -> Result<Self> {
    match value {
      1 => Ok(Self::Clockwise),
      -1 => Ok(Self::CounterClockwise),
      _ => Err(TuningError::InvalidDirection(value)),
    }
  }
}

/// A controlled quantity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Channel {
  /// Rotation about the body X axis.
  Roll,

  /// Rotation about the body Y axis.
  Pitch,

  /// Rotation about the body Z axis.
  Yaw,

  /// Vertical acceleration.
  Vertical,
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Roll => "roll",
        Self::Pitch => "pitch",
        Self::Yaw => "yaw",
        Self::Vertical => "vertical",
      }
    )
  }
}

/// Which gain of a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GainKind {
  /// `kp`.
  Proportional,

  /// `ki`. Only the vertical channel has one.
  Integral,

  /// `kd`. Only the rotational channels have one.
  Derivative,
}

impl fmt::Display for GainKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Proportional => "kp",
        Self::Integral => "ki",
        Self::Derivative => "kd",
      }
    )
  }
}

/// The measurement a bias applies to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Signal {
  /// Angle of a rotational channel.
  Angle,

  /// Angular rate of a rotational channel.
  Rate,

  /// Acceleration of the vertical channel.
  Acceleration,

  /// Velocity of the vertical channel.
  Velocity,
}

impl fmt::Display for Signal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Angle => "angle",
        Self::Rate => "rate",
        Self::Acceleration => "accel",
        Self::Velocity => "velocity",
      }
    )
  }
}

/// One of the two offsets of a [`Bias`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BiasTerm {
  /// [`Bias::setpoint`].
  Setpoint,

  /// [`Bias::trim`].
  Trim,
}

impl fmt::Display for BiasTerm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Setpoint => "setpoint",
        Self::Trim => "trim",
      }
    )
  }
}

/// A single runtime change to a mixer's tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Adjustment {
  /// Sets a gain. Gains are validated as non-negative.
  Gain {
    /// Channel the gain belongs to.
    channel: Channel,

    /// Which of its gains.
    gain: GainKind,

    /// The new gain.
    value: f64,
  },

  /// Sets one offset of a bias. Unconstrained.
  Bias {
    /// Channel the bias belongs to.
    channel: Channel,

    /// Measurement the bias applies to.
    signal: Signal,

    /// Which of its offsets.
    term: BiasTerm,

    /// The new offset.
    value: f64,
  },

  /// Sets the spin direction of propeller one.
  Direction(PropellerDirection),
}

impl fmt::Display for Adjustment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Gain { channel, gain, .. } => write!(f, "{channel} {gain}"),
      Self::Bias {
        channel,
        signal,
        term,
        ..
      } => write!(f, "{channel} {signal} {term}"),
      Self::Direction(_) => write!(f, "propeller direction"),
    }
  }
}

/// Inclusive range computed throttles are clamped to. Independent of the
/// protocol's range but always inside it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThrottleBand {
  min: f64,
  max: f64,
}

impl Default for ThrottleBand {
  fn default() -> Self {
    ThrottleBand {
      min: 60.0,
      max: 160.0,
    }
  }
}

impl ThrottleBand {
  /// Constructs a band, requiring `0 <= min <= max <= MAX_THROTTLE`.
  pub fn new(min: f64, max: f64) -> Result<Self> {
    if !(0.0 <= min && min <= max && max <= MAX_THROTTLE as f64) {
      return Err(TuningError::InvalidBand { min, max });
    }

    Ok(ThrottleBand { min, max })
  }

  /// Lower bound.
  pub fn min(&self) -> f64 {
    self.min
  }

  /// Upper bound.
  pub fn max(&self) -> f64 {
    self.max
  }

  /// Saturates `value` into the band.
  pub fn clamp(&self, value: f64) -> f64 {
    value.clamp(self.min, self.max)
  }
}

/// Every tunable parameter of the incremental controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tuning {
  /// Rotation about the body X axis.
  pub roll: AxisTuning,

  /// Rotation about the body Y axis.
  pub pitch: AxisTuning,

  /// Rotation about the body Z axis.
  pub yaw: AxisTuning,

  /// Vertical acceleration.
  pub vertical: VerticalTuning,

  /// Exposed for the operator but not read by the incremental mixing matrix.
  pub direction: PropellerDirection,
}

impl Default for Tuning {
  fn default() -> Self {
    Tuning {
      roll: AxisTuning {
        kp: 0.00005,
        kd: 0.0025,
        angle: Bias::default(),
        rate: Bias::default(),
      },
      pitch: AxisTuning {
        kp: 0.00005,
        kd: 0.0025,
        angle: Bias::default(),
        rate: Bias::default(),
      },
      yaw: AxisTuning {
        kp: 0.0005,
        kd: 0.005,
        angle: Bias::default(),
        rate: Bias::default(),
      },
      vertical: VerticalTuning {
        kp: 0.01,
        ki: 2.0,
        acceleration: Bias::default(),
        velocity: Bias::default(),
      },
      direction: PropellerDirection::Clockwise,
    }
  }
}

impl Tuning {
  fn axis_mut(&mut self, channel: Channel) -> Option<&mut AxisTuning> {
    match channel {
      Channel::Roll => Some(&mut self.roll),
      Channel::Pitch => Some(&mut self.pitch),
      Channel::Yaw => Some(&mut self.yaw),
      Channel::Vertical => None,
    }
  }

  fn bias_mut(
    &mut self,
    channel: Channel,
    signal: Signal,
  ) -> Option<&mut Bias> {
    match (channel, signal) {
      (Channel::Vertical, Signal::Acceleration) => {
        Some(&mut self.vertical.acceleration)
      }
      (Channel::Vertical, Signal::Velocity) => {
        Some(&mut self.vertical.velocity)
      }
      (_, Signal::Angle) => self.axis_mut(channel).map(|axis| &mut axis.angle),
      (_, Signal::Rate) => self.axis_mut(channel).map(|axis| &mut axis.rate),
      _ => None,
    }
  }

  /// Applies `adjustment` through the validated setters. A rejected value
  /// leaves the tuning unchanged.
  pub fn apply(&mut self, adjustment: Adjustment) -> Result<()> {
    let unsupported = TuningError::Unsupported(adjustment);

    match adjustment {
      Adjustment::Gain {
        channel: Channel::Vertical,
        gain,
        value,
      } => match gain {
        GainKind::Proportional => self.vertical.set_kp(value),
        GainKind::Integral => self.vertical.set_ki(value),
        GainKind::Derivative => Err(unsupported),
      },
      Adjustment::Gain {
        channel,
        gain,
        value,
      } => {
        let axis = self.axis_mut(channel).ok_or(unsupported.clone())?;

        match gain {
          GainKind::Proportional => axis.set_kp(value),
          GainKind::Derivative => axis.set_kd(value),
          GainKind::Integral => Err(unsupported),
        }
      }
      Adjustment::Bias {
        channel,
        signal,
        term,
        value,
      } => {
        self
          .bias_mut(channel, signal)
          .ok_or(unsupported)?
          .set(term, value);
        Ok(())
      }
      Adjustment::Direction(direction) => {
        self.direction = direction;
        Ok(())
      }
    }
  }
}

/// Per-axis corrections computed in one step, before mixing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Corrections {
  /// Roll correction.
  pub roll: f64,

  /// Pitch correction.
  pub pitch: f64,

  /// Yaw correction.
  pub yaw: f64,

  /// Vertical correction.
  pub vertical: f64,
}

/// Velocity-form PID controller for the four-rotor "X" airframe.
///
/// Each step adds the mixed corrections onto four persistent accumulators,
/// which are then clamped to the throttle band. The clamp is the only
/// protection against windup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IncrementalPid {
  /// Runtime-mutable tuning.
  pub tuning: Tuning,
  band: ThrottleBand,
  throttles: [f64; 4],
  accel_sum: f64,
}

impl IncrementalPid {
  /// Constructs a controller with zeroed accumulators.
  pub fn new(tuning: Tuning, band: ThrottleBand) -> Self {
    IncrementalPid {
      tuning,
      band,
      throttles: [0.0; 4],
      accel_sum: 0.0,
    }
  }

  /// The band throttles are clamped to.
  pub fn band(&self) -> ThrottleBand {
    self.band
  }

  /// Replaces the clamp band. Accumulators are re-clamped on the next step.
  pub fn set_band(&mut self, band: ThrottleBand) {
    self.band = band;
  }

  /// Current accumulator values, before truncation.
  pub fn accumulators(&self) -> [f64; 4] {
    self.throttles
  }

  /// Running sum of vertical acceleration since the last reset.
  pub fn accel_sum(&self) -> f64 {
    self.accel_sum
  }

  /// The corrections `input` would produce under the current tuning.
  pub fn corrections(&self, input: &ControlInput) -> Corrections {
    let tuning = &self.tuning;

    Corrections {
      roll: tuning.roll.correction(input.roll, input.rotation.x),
      pitch: tuning.pitch.correction(input.pitch, input.rotation.y),
      yaw: tuning.yaw.correction(input.yaw, input.rotation.z),
      vertical: tuning.vertical.correction(input.accel_z),
    }
  }
}

impl Mixer for IncrementalPid {
  fn step(&mut self, input: &ControlInput) -> [Throttle; 4] {
    self.accel_sum += input.accel_z;

    let c = self.corrections(input);
    let corrections = [c.roll, c.pitch, c.yaw, c.vertical];

    for (throttle, row) in self.throttles.iter_mut().zip(MIXING) {
      let delta: f64 = row.iter().zip(corrections).map(|(w, c)| w * c).sum();

      // a NaN measurement must not poison the accumulator for the session
      if !delta.is_nan() {
        *throttle += delta;
      }

      *throttle = self.band.clamp(*throttle);
    }

    self.throttles.map(|throttle| throttle as Throttle)
  }

  fn reset(&mut self) {
    self.throttles = [0.0; 4];
    self.accel_sum = 0.0;
  }

  fn adjust(&mut self, adjustment: Adjustment) -> Result<()> {
    self.tuning.apply(adjustment)
  }
}
