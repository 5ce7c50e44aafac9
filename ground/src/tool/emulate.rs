use common::{
  attitude::Quaternion,
  comm::{telemetry::Telemetry, Acceleration, Rotation},
};
use jeflog::{pass, task};
use std::{
  f64::consts::TAU,
  fs::File,
  io::Write,
  path::Path,
  thread,
  time::{Duration, Instant},
};

/// Amplitude of the emulated roll oscillation, in degrees.
const ROLL_AMPLITUDE: f64 = 10.0;

/// Period of the emulated roll oscillation, in seconds.
const ROLL_PERIOD: f64 = 4.0;

/// Tool function that writes synthetic telemetry frames to `output`, as a
/// vehicle gently rocking about its roll axis would send them.
///
/// Runs until `duration` seconds have passed, or forever without one.
pub fn emulate(
  output: &Path,
  frequency: f64,
  duration: Option<f64>,
) -> anyhow::Result<()> {
  anyhow::ensure!(
    frequency.is_finite() && frequency > 0.0,
    "frequency must be positive, got {frequency}"
  );

  let mut sink = File::create(output)?;
  let period = Duration::from_secs_f64(1.0 / frequency);
  let start = Instant::now();
  let mut frames = 0u64;

  task!(
    "Emulating vehicle telemetry into \x1b[1m{}\x1b[0m at {frequency} Hz.",
    output.display()
  );

  loop {
    let elapsed = start.elapsed().as_secs_f64();

    if duration.is_some_and(|duration| elapsed >= duration) {
      break;
    }

    let noise = rand::random::<f64>() - 0.5;
    sink.write_all(&sample(elapsed, noise).to_frame())?;
    sink.flush()?;
    frames += 1;

    thread::sleep(period);
  }

  pass!("Wrote {frames} telemetry frames.");
  Ok(())
}

/// The vehicle's telemetry `time` seconds into the emulation. `noise` lies
/// within `[-0.5, 0.5]` and perturbs the rates and acceleration.
fn sample(time: f64, noise: f64) -> Telemetry {
  let phase = TAU * time / ROLL_PERIOD;
  let roll = ROLL_AMPLITUDE.to_radians() * phase.sin();
  let roll_rate = ROLL_AMPLITUDE * TAU / ROLL_PERIOD * phase.cos();

  Telemetry {
    quaternion: Quaternion::new(
      (roll / 2.0).cos(),
      (roll / 2.0).sin(),
      0.0,
      0.0,
    ),
    rotation: Rotation::new(roll_rate + noise, noise, -noise),
    acceleration: Acceleration::new(0.0, 0.0, 1.0 + 0.02 * noise),
    throttles: [0; 4],
  }
}
