use crate::{
  controller::{self, FlightController, Maneuver},
  link::Transmit,
  mixer::{
    Adjustment,
    BiasTerm,
    Channel,
    GainKind,
    Mixer,
    PropellerDirection,
    Signal,
  },
};
use common::ToPrettyString;
use std::{fmt, io::Write, str::FromStr};

/// A single line typed by the operator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OperatorCommand {
  /// `arm`
  Arm,

  /// `engage`
  Engage,

  /// `disengage`
  Disengage,

  /// `disarm`
  Disarm,

  /// `auto on` or `auto off`
  Autopilot(bool),

  /// A maneuver name such as `up` or `left`.
  Maneuver(Maneuver),

  /// `set <channel> <gain> <value>`, `set <channel> <signal> <term> <value>`
  /// or `direction <-1|1>`.
  Adjust(Adjustment),

  /// `status`
  Status,

  /// `quit` or `exit`
  Quit,
}

/// What the console should do after a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
  /// Keep reading commands.
  Continue,

  /// Stop the console and shut down.
  Quit,
}

/// A line that is not a valid operator command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} (expected arm, engage, disengage, disarm, auto on|off, up, down, \
       forward, back, left, right, set, direction, status or quit)",
      self.0
    )
  }
}

impl std::error::Error for ParseError {}

impl FromStr for OperatorCommand {
  type Err = ParseError;

  fn from_str(line: &str) -> Result<Self, Self::Err> {
    let words: Vec<&str> = line.split_whitespace().collect();

    let command = match words.as_slice() {
      ["arm"] => Self::Arm,
      ["engage"] => Self::Engage,
      ["disengage"] => Self::Disengage,
      ["disarm"] => Self::Disarm,
      ["auto", "on"] => Self::Autopilot(true),
      ["auto", "off"] => Self::Autopilot(false),
      ["status"] => Self::Status,
      ["quit" | "exit"] => Self::Quit,
      ["direction", sign] => {
        let sign = sign
          .parse::<i32>()
          .map_err(|_| ParseError(format!("invalid direction '{sign}'")))?;
        let direction = PropellerDirection::try_from(sign)
          .map_err(|error| ParseError(error.to_string()))?;
        Self::Adjust(Adjustment::Direction(direction))
      }
      ["set", channel, gain, value] => Self::Adjust(Adjustment::Gain {
        channel: channel_from(channel)?,
        gain: gain_from(gain)?,
        value: value_from(value)?,
      }),
      ["set", channel, signal, term, value] => Self::Adjust(Adjustment::Bias {
        channel: channel_from(channel)?,
        signal: signal_from(signal)?,
        term: term_from(term)?,
        value: value_from(value)?,
      }),
      [word] => Self::Maneuver(word.parse().map_err(ParseError)?),
      _ => {
        return Err(ParseError(format!("unknown command '{}'", line.trim())))
      }
    };

    Ok(command)
  }
}

fn channel_from(word: &str) -> Result<Channel, ParseError> {
  match word {
    "roll" => Ok(Channel::Roll),
    "pitch" => Ok(Channel::Pitch),
    "yaw" => Ok(Channel::Yaw),
    "vertical" => Ok(Channel::Vertical),
    _ => Err(ParseError(format!("unknown channel '{word}'"))),
  }
}

fn gain_from(word: &str) -> Result<GainKind, ParseError> {
  match word {
    "kp" => Ok(GainKind::Proportional),
    "ki" => Ok(GainKind::Integral),
    "kd" => Ok(GainKind::Derivative),
    _ => Err(ParseError(format!("unknown gain '{word}'"))),
  }
}

fn signal_from(word: &str) -> Result<Signal, ParseError> {
  match word {
    "angle" => Ok(Signal::Angle),
    "rate" => Ok(Signal::Rate),
    "accel" => Ok(Signal::Acceleration),
    "velocity" => Ok(Signal::Velocity),
    _ => Err(ParseError(format!("unknown signal '{word}'"))),
  }
}

fn term_from(word: &str) -> Result<BiasTerm, ParseError> {
  match word {
    "setpoint" => Ok(BiasTerm::Setpoint),
    "trim" => Ok(BiasTerm::Trim),
    _ => Err(ParseError(format!("unknown bias term '{word}'"))),
  }
}

fn value_from(word: &str) -> Result<f64, ParseError> {
  word
    .parse()
    .map_err(|_| ParseError(format!("invalid number '{word}'")))
}

impl OperatorCommand {
  /// Applies the command. `status` is rendered to `out`.
  pub fn apply<L: Transmit, M: Mixer>(
    self,
    controller: &mut FlightController<L, M>,
    out: &mut impl Write,
  ) -> controller::Result<Flow> {
    match self {
      Self::Arm => controller.arm()?,
      Self::Engage => controller.engage()?,
      Self::Disengage => controller.disengage()?,
      Self::Disarm => controller.disarm()?,
      Self::Autopilot(enabled) => controller.set_autopilot(enabled)?,
      Self::Maneuver(maneuver) => controller.maneuver(maneuver)?,
      Self::Adjust(adjustment) => controller.adjust(adjustment)?,
      Self::Status => {
        writeln!(
          out,
          "\x1b[1mphase\x1b[0m          {} ({}, autopilot {})\n{}",
          controller.phase(),
          controller.mode(),
          if controller.autopilot() { "on" } else { "off" },
          controller.status().to_pretty_string(),
        )?;
      }
      Self::Quit => return Ok(Flow::Quit),
    }

    Ok(Flow::Continue)
  }
}
