#![warn(missing_docs)]
#![warn(clippy::correctness)]

//! Ground is the library/binary hybrid that flies the miniquad from the ground
//! station: it decodes telemetry arriving over the serial link, runs the
//! control law and sends throttle commands back.

/// Operator commands typed into the `run` console.
pub mod console;

/// The flight phase state machine tying status, mixer and link together.
pub mod controller;

/// The bounded receive buffer and the transmit seam.
pub mod link;

/// Control laws turning the vehicle's state into four throttles.
pub mod mixer;

/// Background recording of decoded telemetry.
pub mod recorder;

/// The `run` tool's program state machine.
pub mod state;

/// Receiver and worker threads connecting the device to the controller.
pub mod switchboard;

/// Everything related to the Ground command line tool.
pub mod tool;

use clap::{builder::PossibleValuesParser, Arg, ArgAction, Command};
use std::path::PathBuf;

/// The command line interface of the `ground` binary.
pub fn command() -> Command {
  Command::new("ground")
    .about("Miniquad ground station command line tool")
    .subcommand_required(true)
    .subcommand(
      Command::new("run")
        .about(
          "Flies the vehicle over a serial device from an operator console.",
        )
        .arg(
          Arg::new("device")
            .long("device")
            .short('d')
            .required(true)
            .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
          Arg::new("pins")
            .long("pins")
            .short('p')
            .value_delimiter(',')
            .value_parser(clap::value_parser!(u32)),
        )
        .arg(
          Arg::new("mode")
            .long("mode")
            .short('m')
            .default_value("principal")
            .value_parser(PossibleValuesParser::new(["principal", "slave"])),
        )
        .arg(
          Arg::new("mixer")
            .long("mixer")
            .default_value("incremental")
            .value_parser(PossibleValuesParser::new([
              "incremental",
              "physical",
            ])),
        )
        .arg(
          Arg::new("min_throttle")
            .long("min-throttle")
            .value_parser(clap::value_parser!(f64)),
        )
        .arg(
          Arg::new("max_throttle")
            .long("max-throttle")
            .value_parser(clap::value_parser!(f64)),
        )
        .arg(
          Arg::new("buffer_size")
            .long("buffer-size")
            .value_parser(clap::value_parser!(usize)),
        )
        .arg(
          Arg::new("record")
            .long("record")
            .short('r')
            .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
          Arg::new("autopilot")
            .long("autopilot")
            .action(ArgAction::SetTrue),
        ),
    )
    .subcommand(
      Command::new("decode")
        .about("Decodes the newest telemetry frame of a captured byte stream.")
        .arg(
          Arg::new("capture")
            .required(true)
            .value_parser(clap::value_parser!(PathBuf)),
        ),
    )
    .subcommand(
      Command::new("emulate")
        .about(
          "Writes synthetic telemetry frames, as the vehicle would send them.",
        )
        .arg(
          Arg::new("output")
            .long("output")
            .short('o')
            .required(true)
            .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
          Arg::new("frequency")
            .long("frequency")
            .short('f')
            .default_value("100.0")
            .value_parser(clap::value_parser!(f64)),
        )
        .arg(
          Arg::new("duration")
            .long("duration")
            .short('t')
            .value_parser(clap::value_parser!(f64)),
        ),
    )
}
