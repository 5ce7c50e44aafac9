use super::SharedController;
use crate::{
  controller::{Error, Phase},
  link::{SharedBuffer, Transmit},
  mixer::Mixer,
  recorder::{Recorder, RecorderError},
};
use common::comm::telemetry::FrameError;
use jeflog::{fail, pass, warn};
use std::sync::mpsc::Receiver;

/// Work handed to the worker thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Gig {
  /// This many new bytes were appended to the shared buffer.
  Chunk(usize),

  /// The device stopped producing bytes.
  LinkLost,

  /// The operator is quitting.
  Shutdown,
}

/// Runs one controller tick per received chunk. Only wakes when there's data
/// to be processed.
///
/// The buffer is cleared after every decoded frame. Once the link is lost or
/// a shutdown is requested, the vehicle is disarmed and the recorder is
/// flushed.
pub fn worker<L: Transmit, M: Mixer>(
  controller: SharedController<L, M>,
  buffer: SharedBuffer,
  gig: Receiver<Gig>,
  recorder: Option<Recorder>,
) -> impl FnOnce() {
  move || {
    loop {
      match gig.recv() {
        Ok(Gig::Chunk(_)) => {}
        Ok(Gig::Shutdown) => {
          pass!("Worker shutting down.");
          break;
        }
        Ok(Gig::LinkLost) | Err(_) => {
          fail!("Link to vehicle lost. Disarming.");
          break;
        }
      }

      let mut buffer = buffer.lock().unwrap();
      let mut controller = controller.lock().unwrap();

      match controller.tick(buffer.contiguous()) {
        // no complete frame yet
        Err(Error::Frame(
          FrameError::TooShort { .. } | FrameError::NoFrame,
        )) => continue,
        Err(Error::Frame(error)) => {
          warn!("Ignoring telemetry: {error}");
          continue;
        }
        Err(error) => warn!("Control tick failed: {error}"),
        Ok(_) => {}
      }

      buffer.clear();

      let Some(recorder) = &recorder else {
        continue;
      };

      match recorder.record(*controller.status()) {
        Ok(()) => {}
        Err(error @ RecorderError::Full) => warn!("{error}"),
        Err(error) => fail!("Failed to record status: {error}"),
      }
    }

    let mut controller = controller.lock().unwrap();
    if controller.phase() != Phase::Idle {
      match controller.disarm() {
        Ok(()) => pass!("Zero throttle commanded."),
        Err(error) => fail!("Failed to command zero throttle: {error}"),
      }
    }
    drop(controller);

    if let Some(recorder) = recorder {
      if let Err(error) = recorder.shutdown() {
        fail!("Failed to flush recorder: {error}");
      }
    }
  }
}
