use common::comm::{telemetry::Telemetry, Ingestible, MiniquadStatus};
use jeflog::{fail, pass};
use serde_json::{json, Value};
use std::{fs, path::Path};

/// Tool function that decodes the most recent telemetry frame of a captured
/// byte stream and prints it with its derived orientations as JSON.
pub fn decode(capture: &Path) -> anyhow::Result<()> {
  let bytes = fs::read(capture)?;

  let telemetry = match Telemetry::find_latest(&bytes) {
    Ok(telemetry) => telemetry,
    Err(error) => {
      fail!("No telemetry in \x1b[1m{}\x1b[0m: {error}", capture.display());
      return Err(error.into());
    }
  };

  pass!(
    "Decoded the newest of {} bytes in \x1b[1m{}\x1b[0m.",
    bytes.len(),
    capture.display()
  );

  println!("{}", serde_json::to_string_pretty(&describe(&telemetry))?);
  Ok(())
}

fn describe(telemetry: &Telemetry) -> Value {
  let mut status = MiniquadStatus::default();
  telemetry.ingest(&mut status);

  json!({
    "telemetry": telemetry,
    "euler_angle": status.euler_angle(),
    "gravity": status.gravity(),
    "yaw_pitch_roll": status.yaw_pitch_roll(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use common::attitude::Quaternion;

  #[test]
  fn description_carries_derived_orientations() {
    let half = 15f64.to_radians();
    let telemetry = Telemetry {
      quaternion: Quaternion::new(half.cos(), half.sin(), 0.0, 0.0),
      throttles: [60, 70, 80, 90],
      ..Default::default()
    };

    let value = describe(&telemetry);

    assert_eq!(value["telemetry"]["throttles"], json!([60, 70, 80, 90]));
    let roll = value["yaw_pitch_roll"]["roll"].as_f64().unwrap();
    assert!((roll - 30.0).abs() < 1e-9);
    assert!(value["gravity"]["z"].as_f64().unwrap() > 0.0);
  }
}
