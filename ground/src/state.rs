use crate::{
  console::{Flow, OperatorCommand},
  controller::FlightController,
  link::ReceiveBuffer,
  mixer::{Mixer, MixerKind, ThrottleBand},
  recorder::{Recorder, RecorderConfig},
  switchboard::{self, Gig, SharedController},
};
use common::comm::{ComputingMode, MiniquadStatus};
use jeflog::{fail, pass, task, warn};
use std::{
  fmt,
  fs::{File, OpenOptions},
  io::{self, BufRead},
  path::PathBuf,
  sync::{mpsc::Sender, Arc, Mutex},
  thread::JoinHandle,
};

/// The controller flown by the `run` tool.
pub type GroundController = FlightController<File, Box<dyn Mixer + Send>>;

/// Everything the `run` tool was configured with on the command line.
#[derive(Clone, Debug)]
pub struct RunConfig {
  /// Byte-stream device connected to the vehicle, configured externally.
  pub device: PathBuf,

  /// Output pins of propellers one through four.
  pub pins: [u32; 4],

  /// Where the control algorithm is computed.
  pub mode: ComputingMode,

  /// Control strategy.
  pub mixer: MixerKind,

  /// Band computed throttles are clamped to.
  pub band: ThrottleBand,

  /// Capacity of the receive buffer, in bytes.
  pub buffer_size: usize,

  /// Directory to record telemetry into, if any.
  pub record: Option<PathBuf>,

  /// Whether computed throttles are transmitted from the start.
  pub autopilot: bool,
}

/// Holds everything the operator loop shares with the switchboard.
pub struct SharedState {
  /// The controller, also driven by the worker thread.
  pub controller: SharedController<File, Box<dyn Mixer + Send>>,

  /// Hands work to the worker thread.
  pub gig: Sender<Gig>,

  /// The worker thread itself.
  pub worker: JoinHandle<()>,
}

/// The states the `run` tool moves through.
pub enum ProgramState {
  /// Opens the device, builds the controller and starts the switchboard.
  Init {
    /// Options the tool was started with.
    config: RunConfig,
  },

  /// Waits for a single line from the operator and applies it.
  WaitForOperator {
    /// Controller and worker shared with the switchboard.
    shared: SharedState,
  },

  /// Stops the worker, which disarms the vehicle and flushes the recorder.
  Shutdown {
    /// Controller and worker shared with the switchboard.
    shared: SharedState,
  },

  /// Nothing left to do.
  Exit,
}

impl ProgramState {
  /// Perform transition to the next state, returning the next state.
  pub fn next(self) -> anyhow::Result<Self> {
    match self {
      ProgramState::Init { config } => init(config),
      ProgramState::WaitForOperator { shared } => Ok(wait_for_operator(shared)),
      ProgramState::Shutdown { shared } => Ok(shutdown(shared)),
      ProgramState::Exit => Ok(ProgramState::Exit),
    }
  }

  /// Whether the program is done.
  pub fn is_exit(&self) -> bool {
    matches!(self, ProgramState::Exit)
  }
}

impl fmt::Display for ProgramState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Init { config } => {
        write!(f, "Init(device = {})", config.device.display())
      }
      Self::WaitForOperator { shared } => {
        let controller = shared.controller.lock().unwrap();
        write!(
          f,
          "WaitForOperator(phase = {}, autopilot = {})",
          controller.phase(),
          controller.autopilot()
        )
      }
      Self::Shutdown { .. } => write!(f, "Shutdown"),
      Self::Exit => write!(f, "Exit"),
    }
  }
}

fn init(config: RunConfig) -> anyhow::Result<ProgramState> {
  task!("Opening device \x1b[1m{}\x1b[0m.", config.device.display());

  let device = OpenOptions::new()
    .read(true)
    .write(true)
    .open(&config.device)?;
  let reader = device.try_clone()?;

  pass!("Opened device \x1b[1m{}\x1b[0m.", config.device.display());

  let mut controller: GroundController = FlightController::new(
    device,
    config.mixer.build(config.band),
    MiniquadStatus::new(config.pins)?,
    config.mode,
  );

  if config.mode == ComputingMode::SlaveComputer {
    warn!("Commands cannot be encoded in {} mode.", config.mode);
  }

  if config.autopilot {
    controller.set_autopilot(true)?;
  }

  let recorder = match config.record {
    Some(directory) => {
      let recorder = Recorder::new(RecorderConfig::new(&directory))?;
      pass!("Recording telemetry into \x1b[1m{}\x1b[0m.", directory.display());
      Some(recorder)
    }
    None => None,
  };

  let controller = Arc::new(Mutex::new(controller));
  let (gig, worker) = switchboard::start(
    reader,
    Arc::new(Mutex::new(ReceiveBuffer::new(config.buffer_size))),
    controller.clone(),
    recorder,
  );

  Ok(ProgramState::WaitForOperator {
    shared: SharedState {
      controller,
      gig,
      worker,
    },
  })
}

fn wait_for_operator(shared: SharedState) -> ProgramState {
  let mut line = String::new();

  match io::stdin().lock().read_line(&mut line) {
    Ok(0) => {
      warn!("Operator input closed.");
      return ProgramState::Shutdown { shared };
    }
    Ok(_) => {}
    Err(error) => {
      fail!("Failed to read operator input: {error}");
      return ProgramState::Shutdown { shared };
    }
  }

  if shared.worker.is_finished() {
    fail!("Switchboard has stopped; no further commands are possible.");
    return ProgramState::Shutdown { shared };
  }

  if line.trim().is_empty() {
    return ProgramState::WaitForOperator { shared };
  }

  let command = match line.parse::<OperatorCommand>() {
    Ok(command) => command,
    Err(error) => {
      warn!("{error}");
      return ProgramState::WaitForOperator { shared };
    }
  };

  let flow = {
    let mut controller = shared.controller.lock().unwrap();
    command.apply(&mut *controller, &mut io::stdout())
  };

  match flow {
    Ok(Flow::Continue) => ProgramState::WaitForOperator { shared },
    Ok(Flow::Quit) => ProgramState::Shutdown { shared },
    Err(error) => {
      fail!("{error}");
      ProgramState::WaitForOperator { shared }
    }
  }
}

fn shutdown(shared: SharedState) -> ProgramState {
  // the worker may already be gone after a lost link
  let _ = shared.gig.send(Gig::Shutdown);

  if shared.worker.join().is_err() {
    fail!("Worker thread panicked.");
  }

  ProgramState::Exit
}
