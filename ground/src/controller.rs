use crate::{
  link::Transmit,
  mixer::{Adjustment, ControlInput, IncrementalPid, Mixer, TuningError},
};
use common::comm::{
  command::ThrottleCommand,
  telemetry::{FrameError, Telemetry},
  ComputingMode,
  Ingestible,
  MiniquadStatus,
  Throttle,
};
use jeflog::{pass, warn};
use serde::{Deserialize, Serialize};
use std::{fmt, io, str::FromStr};

/// Throttles sent when automatic control is switched off mid-flight.
pub const HOVER: [Throttle; 4] = [30; 4];

/// How engaged the ground station is in flying the vehicle.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Phase {
  /// Propellers stopped; nothing is sent to the vehicle.
  #[default]
  Idle,

  /// Ready to fly. Only manual maneuvers are sent.
  Armed,

  /// Closed-loop control is running on every decoded frame.
  Active,
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}",
      match self {
        Self::Idle => "idle",
        Self::Armed => "armed",
        Self::Active => "active",
      }
    )
  }
}

/// Fixed throttle presets an operator can send by hand.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Maneuver {
  /// All four rotors at hover throttle.
  Ascend,

  /// All rotors stopped.
  Descend,

  /// Only propeller two spins.
  Forward,

  /// Only propeller four spins.
  Back,

  /// Only propeller three spins.
  Left,

  /// Only propeller one spins.
  Right,
}

impl Maneuver {
  /// The throttles this maneuver commands.
  pub fn throttles(&self) -> [Throttle; 4] {
    match self {
      Self::Ascend => HOVER,
      Self::Descend => [0, 0, 0, 0],
      Self::Forward => [0, 30, 0, 0],
      Self::Back => [0, 0, 0, 30],
      Self::Left => [0, 0, 30, 0],
      Self::Right => [30, 0, 0, 0],
    }
  }
}

impl FromStr for Maneuver {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s {
      "up" | "ascend" => Ok(Self::Ascend),
      "down" | "descend" => Ok(Self::Descend),
      "forward" | "front" => Ok(Self::Forward),
      "back" => Ok(Self::Back),
      "left" => Ok(Self::Left),
      "right" => Ok(Self::Right),
      _ => Err(format!("unknown maneuver '{s}'")),
    }
  }
}

/// Everything that can go wrong while flying.
#[derive(Debug)]
pub enum Error {
  /// A value was rejected by the vehicle model.
  Common(common::Error),

  /// The buffer held no usable telemetry. Not fatal; the previous status is
  /// kept.
  Frame(FrameError),

  /// The transmit seam failed.
  Io(io::Error),

  /// A tuning change was rejected by the mixer.
  Tuning(TuningError),

  /// The requested phase cannot be reached from the current one.
  InvalidTransition {
    /// Phase the controller is in.
    from: Phase,

    /// Phase that was requested.
    to: Phase,
  },

  /// Commands may only be sent while armed or active.
  Disarmed,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Common(error) => write!(f, "{error}"),
      Self::Frame(error) => write!(f, "{error}"),
      Self::Io(error) => write!(f, "Failed to transmit to vehicle: {error}"),
      Self::Tuning(error) => write!(f, "{error}"),
      Self::InvalidTransition { from, to } => {
        write!(f, "Cannot go from {from} to {to}.")
      }
      Self::Disarmed => write!(f, "Vehicle must be armed to accept commands."),
    }
  }
}

impl std::error::Error for Error {}

impl From<common::Error> for Error {
  fn from(error: common::Error) -> Self {
    Error::Common(error)
  }
}

impl From<FrameError> for Error {
  fn from(error: FrameError) -> Self {
    Error::Frame(error)
  }
}

impl From<io::Error> for Error {
  fn from(error: io::Error) -> Self {
    Error::Io(error)
  }
}

impl From<TuningError> for Error {
  fn from(error: TuningError) -> Self {
    Error::Tuning(error)
  }
}

/// A `Result` type containing a controller `Error` as its `Err` variant.
pub type Result<T> = std::result::Result<T, Error>;

/// Owns the vehicle status, the mixer and the outbound link, and moves
/// between the flight phases.
///
/// Leaving `Active` or entering `Idle` always commands zero throttle, and the
/// mixer starts every control session from a clean slate.
#[derive(Debug)]
pub struct FlightController<L: Transmit, M: Mixer = IncrementalPid> {
  link: L,
  mixer: M,
  status: MiniquadStatus,
  mode: ComputingMode,
  phase: Phase,
  autopilot: bool,
}

impl<L: Transmit, M: Mixer> FlightController<L, M> {
  /// Constructs an idle controller with automatic control disabled.
  pub fn new(
    link: L,
    mixer: M,
    status: MiniquadStatus,
    mode: ComputingMode,
  ) -> Self {
    FlightController {
      link,
      mixer,
      status,
      mode,
      phase: Phase::Idle,
      autopilot: false,
    }
  }

  /// The current flight phase.
  pub fn phase(&self) -> Phase {
    self.phase
  }

  /// The most recently decoded vehicle status.
  pub fn status(&self) -> &MiniquadStatus {
    &self.status
  }

  /// The frame format commands are encoded in.
  pub fn mode(&self) -> ComputingMode {
    self.mode
  }

  /// Whether computed throttles are transmitted.
  pub fn autopilot(&self) -> bool {
    self.autopilot
  }

  /// The control law in use.
  pub fn mixer(&self) -> &M {
    &self.mixer
  }

  /// Gives access to the mixer's tuning. Safe at any time, including between
  /// control steps.
  pub fn mixer_mut(&mut self) -> &mut M {
    &mut self.mixer
  }

  /// Applies a tuning change to the mixer. Allowed in every phase; the next
  /// control step uses it.
  pub fn adjust(&mut self, adjustment: Adjustment) -> Result<()> {
    self.mixer.adjust(adjustment)?;
    pass!("Adjusted {adjustment}.");
    Ok(())
  }

  /// The outbound link.
  pub fn link(&self) -> &L {
    &self.link
  }

  /// `Idle` to `Armed`.
  pub fn arm(&mut self) -> Result<()> {
    self.transition(Phase::Armed, &[Phase::Idle])?;
    pass!("Vehicle armed.");
    Ok(())
  }

  /// `Armed` to `Active`. The mixer is reset before the first control step.
  pub fn engage(&mut self) -> Result<()> {
    self.transition(Phase::Active, &[Phase::Armed])?;
    self.mixer.reset();
    pass!("Closed-loop control engaged.");
    Ok(())
  }

  /// `Active` to `Armed`. Commands zero throttle.
  ///
  /// The phase changes even if the zero command cannot be sent; the error is
  /// still returned.
  pub fn disengage(&mut self) -> Result<()> {
    self.transition(Phase::Armed, &[Phase::Active])?;
    self.mixer.reset();
    pass!("Closed-loop control disengaged.");
    self.send(ThrottleCommand::ZERO)
  }

  /// `Armed` or `Active` to `Idle`. Commands zero throttle.
  ///
  /// The phase changes even if the zero command cannot be sent; the error is
  /// still returned.
  pub fn disarm(&mut self) -> Result<()> {
    let from = self.phase;
    self.transition(Phase::Idle, &[Phase::Armed, Phase::Active])?;

    if from == Phase::Active {
      self.mixer.reset();
    }

    pass!("Vehicle disarmed.");
    self.send(ThrottleCommand::ZERO)
  }

  fn transition(&mut self, to: Phase, allowed: &[Phase]) -> Result<()> {
    if !allowed.contains(&self.phase) {
      return Err(Error::InvalidTransition {
        from: self.phase,
        to,
      });
    }

    self.phase = to;
    Ok(())
  }

  /// Attempts to decode the newest frame in `buffer` and apply it to the
  /// status. On failure the status is untouched and the caller must not
  /// assume an update happened.
  pub fn refresh_status(
    &mut self,
    buffer: &[u8],
  ) -> std::result::Result<Telemetry, FrameError> {
    let telemetry = Telemetry::find_latest(buffer)?;
    telemetry.ingest(&mut self.status);
    Ok(telemetry)
  }

  /// Runs the mixer once on the current status.
  pub fn control_step(&mut self) -> [Throttle; 4] {
    self.mixer.step(&ControlInput::from(&self.status))
  }

  /// One pass of the control loop over a freshly received buffer.
  ///
  /// Returns the computed throttles if closed-loop control is active. They
  /// are only transmitted while automatic control is enabled.
  pub fn tick(&mut self, buffer: &[u8]) -> Result<Option<[Throttle; 4]>> {
    self.refresh_status(buffer)?;

    if self.phase != Phase::Active {
      return Ok(None);
    }

    let throttles = self.control_step();

    if self.autopilot {
      self.send(ThrottleCommand::new(throttles)?)?;
    }

    Ok(Some(throttles))
  }

  /// Sends `command` to the vehicle. Requires `Armed` or `Active`.
  pub fn command(&mut self, command: ThrottleCommand) -> Result<()> {
    if self.phase == Phase::Idle {
      return Err(Error::Disarmed);
    }

    self.send(command)
  }

  /// Sends a manual maneuver preset. Requires `Armed` or `Active`.
  pub fn maneuver(&mut self, maneuver: Maneuver) -> Result<()> {
    self.command(ThrottleCommand::new(maneuver.throttles())?)
  }

  /// Enables or disables transmission of computed throttles. Disabling it
  /// while active commands a hover.
  pub fn set_autopilot(&mut self, enabled: bool) -> Result<()> {
    let was_enabled = self.autopilot;
    self.autopilot = enabled;

    if enabled {
      pass!("Automatic control enabled.");
    } else if was_enabled && self.phase == Phase::Active {
      warn!("Automatic control disabled mid-flight, commanding hover.");
      self.send(ThrottleCommand::new(HOVER)?)?;
    }

    Ok(())
  }

  fn send(&mut self, command: ThrottleCommand) -> Result<()> {
    let frame = command.encode(self.mode)?;
    self.link.transmit(&frame)?;
    self.status.set_throttles(command.throttles())?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mixer::{Channel, GainKind, ThrottleBand, Tuning};
  use common::comm::{command::COMMAND_FRAME_LENGTH, Acceleration};

  type TestController = FlightController<Vec<u8>>;

  /// Only vertical acceleration moves the throttles, one-for-one.
  fn controller() -> TestController {
    let mut tuning = Tuning::default();
    for axis in [&mut tuning.roll, &mut tuning.pitch, &mut tuning.yaw] {
      axis.set_kp(0.0).unwrap();
      axis.set_kd(0.0).unwrap();
    }
    tuning.vertical.set_kp(1.0).unwrap();

    FlightController::new(
      Vec::new(),
      IncrementalPid::new(tuning, ThrottleBand::default()),
      MiniquadStatus::default(),
      ComputingMode::PrincipalComputer,
    )
  }

  fn frame(accel_z: f64) -> Vec<u8> {
    Telemetry {
      acceleration: Acceleration::new(0.0, 0.0, accel_z),
      ..Default::default()
    }
    .to_frame()
    .to_vec()
  }

  fn sent_frames(controller: &TestController) -> Vec<ThrottleCommand> {
    controller
      .link()
      .chunks(COMMAND_FRAME_LENGTH)
      .filter_map(ThrottleCommand::from_frame)
      .collect()
  }

  #[test]
  fn phases_follow_the_state_machine() -> anyhow::Result<()> {
    let mut controller = controller();

    assert!(matches!(
      controller.engage(),
      Err(Error::InvalidTransition {
        from: Phase::Idle,
        to: Phase::Active
      })
    ));
    assert!(controller.disarm().is_err());

    controller.arm()?;
    assert!(controller.arm().is_err());
    controller.engage()?;
    assert_eq!(controller.phase(), Phase::Active);
    controller.disengage()?;
    assert_eq!(controller.phase(), Phase::Armed);
    controller.disarm()?;
    assert_eq!(controller.phase(), Phase::Idle);
    Ok(())
  }

  #[test]
  fn failed_refresh_keeps_status() -> anyhow::Result<()> {
    let mut controller = controller();

    controller.refresh_status(&frame(0.5))?;
    let before = *controller.status();

    assert!(controller.refresh_status(&[0xAA; 100]).is_err());
    assert!(matches!(
      controller.tick(b"$\x02"),
      Err(Error::Frame(FrameError::TooShort { length: 2 }))
    ));
    assert_eq!(*controller.status(), before);
    Ok(())
  }

  #[test]
  fn control_only_runs_while_active() -> anyhow::Result<()> {
    let mut controller = controller();

    assert_eq!(controller.tick(&frame(100.0))?, None);
    controller.arm()?;
    assert_eq!(controller.tick(&frame(100.0))?, None);
    controller.engage()?;
    assert_eq!(controller.tick(&frame(100.0))?, Some([100; 4]));

    // computed but not transmitted without automatic control
    assert!(controller.link().is_empty());
    Ok(())
  }

  #[test]
  fn autopilot_transmits_and_hovers_on_release() -> anyhow::Result<()> {
    let mut controller = controller();
    controller.arm()?;
    controller.engage()?;
    controller.set_autopilot(true)?;

    controller.tick(&frame(100.0))?;
    controller.tick(&frame(-10.0))?;
    assert_eq!(controller.status().throttles(), [90; 4]);

    controller.set_autopilot(false)?;

    let sent: Vec<_> = sent_frames(&controller)
      .iter()
      .map(ThrottleCommand::throttles)
      .collect();
    assert_eq!(sent, vec![[100; 4], [90; 4], HOVER]);
    Ok(())
  }

  #[test]
  fn leaving_active_zeroes_and_next_session_starts_fresh(
  ) -> anyhow::Result<()> {
    let mut controller = controller();
    controller.set_autopilot(true)?;
    controller.arm()?;
    controller.engage()?;

    controller.tick(&frame(150.0))?;
    assert_eq!(controller.mixer().accumulators(), [150.0; 4]);
    controller.disarm()?;

    assert_eq!(controller.mixer().accumulators(), [0.0; 4]);
    assert_eq!(controller.mixer().accel_sum(), 0.0);
    assert_eq!(sent_frames(&controller).last(), Some(&ThrottleCommand::ZERO));
    assert_eq!(controller.status().throttles(), [0; 4]);

    controller.arm()?;
    controller.engage()?;
    // a stale accumulator would have started from 150
    assert_eq!(controller.tick(&frame(70.0))?, Some([70; 4]));
    Ok(())
  }

  #[test]
  fn disengaging_resets_the_mixer() -> anyhow::Result<()> {
    let mut controller = controller();
    controller.arm()?;
    controller.engage()?;

    controller.tick(&frame(120.0))?;
    assert_eq!(controller.mixer().accumulators(), [120.0; 4]);
    assert!((controller.mixer().accel_sum() - 120.0).abs() < 1e-9);

    controller.disengage()?;
    assert_eq!(controller.phase(), Phase::Armed);
    assert_eq!(controller.mixer().accumulators(), [0.0; 4]);
    assert_eq!(controller.mixer().accel_sum(), 0.0);
    assert_eq!(sent_frames(&controller).last(), Some(&ThrottleCommand::ZERO));
    Ok(())
  }

  #[test]
  fn adjustments_reach_the_mixer_in_any_phase() -> anyhow::Result<()> {
    let mut controller = controller();

    controller.adjust(Adjustment::Gain {
      channel: Channel::Vertical,
      gain: GainKind::Proportional,
      value: 2.0,
    })?;
    assert_eq!(controller.mixer().tuning.vertical.kp(), 2.0);

    controller.arm()?;
    controller.engage()?;
    assert_eq!(controller.tick(&frame(40.0))?, Some([80; 4]));

    assert!(matches!(
      controller.adjust(Adjustment::Gain {
        channel: Channel::Vertical,
        gain: GainKind::Proportional,
        value: -2.0,
      }),
      Err(Error::Tuning(TuningError::Negative { .. }))
    ));
    assert_eq!(controller.mixer().tuning.vertical.kp(), 2.0);
    Ok(())
  }

  #[test]
  fn maneuvers_need_arming() -> anyhow::Result<()> {
    let mut controller = controller();

    assert!(matches!(
      controller.maneuver(Maneuver::Ascend),
      Err(Error::Disarmed)
    ));

    controller.arm()?;
    let front = "front".parse::<Maneuver>().map_err(anyhow::Error::msg)?;
    controller.maneuver(front)?;
    controller.maneuver(Maneuver::Right)?;

    let sent: Vec<_> = sent_frames(&controller)
      .iter()
      .map(ThrottleCommand::throttles)
      .collect();
    assert_eq!(sent, vec![[0, 30, 0, 0], [30, 0, 0, 0]]);
    Ok(())
  }

  #[test]
  fn slave_mode_cannot_transmit() -> anyhow::Result<()> {
    let mut controller = FlightController::new(
      Vec::new(),
      IncrementalPid::default(),
      MiniquadStatus::default(),
      ComputingMode::SlaveComputer,
    );

    controller.arm()?;
    assert!(matches!(
      controller.maneuver(Maneuver::Ascend),
      Err(Error::Common(common::Error::Unimplemented(_)))
    ));

    // the safety transition still happens
    assert!(controller.disarm().is_err());
    assert_eq!(controller.phase(), Phase::Idle);
    assert!(controller.link().is_empty());
    Ok(())
  }
}
