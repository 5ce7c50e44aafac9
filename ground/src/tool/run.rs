use crate::{
  link::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE},
  mixer::{MixerKind, ThrottleBand},
  state::{ProgramState, RunConfig},
};
use anyhow::{anyhow, bail};
use clap::ArgMatches;
use common::comm::{ComputingMode, DEFAULT_PINS};
use jeflog::pass;
use std::path::PathBuf;

/// Tool function that flies the vehicle from the operator console until the
/// operator quits or the link is lost.
pub fn run(args: &ArgMatches) -> anyhow::Result<()> {
  let mut state = ProgramState::Init {
    config: config_from(args)?,
  };

  while !state.is_exit() {
    pass!("Transitioned to state: {state}");
    state = state.next()?;
  }

  Ok(())
}

fn config_from(args: &ArgMatches) -> anyhow::Result<RunConfig> {
  let device = args
    .get_one::<PathBuf>("device")
    .cloned()
    .ok_or_else(|| anyhow!("a device is required"))?;

  let pins = match args.get_many::<u32>("pins") {
    Some(pins) => {
      let pins: Vec<u32> = pins.copied().collect();
      <[u32; 4]>::try_from(pins.as_slice()).map_err(|_| {
        anyhow!("exactly four pins are required, got {}", pins.len())
      })?
    }
    None => DEFAULT_PINS,
  };

  let mode = match args.get_one::<String>("mode").map(String::as_str) {
    Some("slave") => ComputingMode::SlaveComputer,
    Some("principal") | None => ComputingMode::PrincipalComputer,
    Some(other) => bail!("unknown computing mode '{other}'"),
  };

  let mixer = match args.get_one::<String>("mixer").map(String::as_str) {
    Some("physical") => MixerKind::Physical,
    Some("incremental") | None => MixerKind::Incremental,
    Some(other) => bail!("unknown mixer '{other}'"),
  };

  let default_band = ThrottleBand::default();
  let band = ThrottleBand::new(
    args
      .get_one::<f64>("min_throttle")
      .copied()
      .unwrap_or(default_band.min()),
    args
      .get_one::<f64>("max_throttle")
      .copied()
      .unwrap_or(default_band.max()),
  )?;

  let buffer_size = args
    .get_one::<usize>("buffer_size")
    .copied()
    .unwrap_or(DEFAULT_BUFFER_SIZE);

  if buffer_size < MIN_BUFFER_SIZE {
    bail!(
      "a buffer of {buffer_size} bytes cannot hold a {MIN_BUFFER_SIZE}-byte \
       telemetry frame"
    );
  }

  Ok(RunConfig {
    device,
    pins,
    mode,
    mixer,
    band,
    buffer_size,
    record: args.get_one::<PathBuf>("record").cloned(),
    autopilot: args.get_flag("autopilot"),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::command;

  fn parse(line: &[&str]) -> anyhow::Result<RunConfig> {
    let matches = command().try_get_matches_from(line)?;
    let (_, args) = matches
      .subcommand()
      .ok_or_else(|| anyhow!("no subcommand"))?;
    config_from(args)
  }

  #[test]
  fn defaults_match_stock_airframe() -> anyhow::Result<()> {
    let config = parse(&["ground", "run", "--device", "/dev/ttyUSB0"])?;

    assert_eq!(config.device, PathBuf::from("/dev/ttyUSB0"));
    assert_eq!(config.pins, [3, 5, 6, 9]);
    assert_eq!(config.mode, ComputingMode::PrincipalComputer);
    assert_eq!(config.mixer, MixerKind::Incremental);
    assert_eq!(config.band, ThrottleBand::default());
    assert_eq!(config.buffer_size, 1024);
    assert_eq!(config.record, None);
    assert!(!config.autopilot);
    Ok(())
  }

  #[test]
  fn options_override_defaults() -> anyhow::Result<()> {
    let config = parse(&[
      "ground",
      "run",
      "--device",
      "capture.bin",
      "--pins",
      "9,6,5,3",
      "--mode",
      "slave",
      "--mixer",
      "physical",
      "--min-throttle",
      "10",
      "--max-throttle",
      "200",
      "--buffer-size",
      "256",
      "--record",
      "recordings",
      "--autopilot",
    ])?;

    assert_eq!(config.pins, [9, 6, 5, 3]);
    assert_eq!(config.mode, ComputingMode::SlaveComputer);
    assert_eq!(config.mixer, MixerKind::Physical);
    assert_eq!(config.band, ThrottleBand::new(10.0, 200.0)?);
    assert_eq!(config.buffer_size, 256);
    assert_eq!(config.record, Some(PathBuf::from("recordings")));
    assert!(config.autopilot);
    Ok(())
  }

  #[test]
  fn bad_options_are_rejected() {
    assert!(parse(&["ground", "run", "--device", "d", "--pins", "1,2,3"])
      .is_err());
    assert!(parse(&[
      "ground",
      "run",
      "--device",
      "d",
      "--min-throttle",
      "100",
      "--max-throttle",
      "50"
    ])
    .is_err());
    assert!(parse(&["ground", "run", "--device", "d", "--mode", "both"])
      .is_err());
  }

  #[test]
  fn buffer_must_fit_a_frame() -> anyhow::Result<()> {
    let error = parse(&["ground", "run", "-d", "d", "--buffer-size", "10"])
      .expect_err("a 10-byte buffer was accepted");
    assert!(error.to_string().contains("52-byte"));

    let config = parse(&["ground", "run", "-d", "d", "--buffer-size", "52"])?;
    assert_eq!(config.buffer_size, 52);
    Ok(())
  }
}
