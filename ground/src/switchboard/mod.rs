mod receiver;
mod worker;

use crate::{
  controller::FlightController,
  link::{SharedBuffer, Transmit},
  mixer::Mixer,
  recorder::Recorder,
};
use receiver::receiver;
use std::{
  io::Read,
  sync::{
    mpsc::{self, Sender},
    Arc,
    Mutex,
  },
  thread::{self, JoinHandle},
};
use worker::worker;

pub use worker::Gig;

/// The flight controller as shared between the worker and the operator.
pub type SharedController<L, M> = Arc<Mutex<FlightController<L, M>>>;

/// Largest chunk read from the device at once.
const CHUNK_SIZE: usize = 64;

/// One-shot function that starts the receiver and worker threads.
///
/// The returned handle belongs to the worker, which exits once the device
/// stops producing bytes or `Gig::Shutdown` is sent on the returned channel.
/// By then the vehicle has been disarmed and the recorder flushed.
pub fn start<R, L, M>(
  device: R,
  buffer: SharedBuffer,
  controller: SharedController<L, M>,
  recorder: Option<Recorder>,
) -> (Sender<Gig>, JoinHandle<()>)
where
  R: Read + Send + 'static,
  L: Transmit + Send + 'static,
  M: Mixer + Send + 'static,
{
  let (gig_tx, gig_rx) = mpsc::channel();

  thread::spawn(receiver(device, buffer.clone(), gig_tx.clone()));
  let handle = thread::spawn(worker(controller, buffer, gig_rx, recorder));

  (gig_tx, handle)
}
