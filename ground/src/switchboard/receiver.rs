use super::{Gig, CHUNK_SIZE};
use crate::link::SharedBuffer;
use jeflog::{fail, warn};
use std::{
  io::{ErrorKind, Read},
  sync::mpsc::Sender,
};

/// Moves bytes from the device into the shared buffer and wakes the worker
/// with the length of every chunk. Stops at end of stream, on a read error or
/// once the worker has gone away, telling the worker the link is lost.
pub fn receiver<R: Read>(
  mut device: R,
  buffer: SharedBuffer,
  gig: Sender<Gig>,
) -> impl FnOnce() {
  move || {
    let mut chunk = [0; CHUNK_SIZE];

    loop {
      let length = match device.read(&mut chunk) {
        Ok(0) => {
          warn!("Device reached the end of its stream.");
          break;
        }
        Ok(length) => length,
        Err(error)
          if matches!(
            error.kind(),
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
          ) =>
        {
          continue
        }
        Err(error) => {
          fail!("Failed to read from device: {error}");
          break;
        }
      };

      buffer.lock().unwrap().extend(&chunk[..length]);

      if gig.send(Gig::Chunk(length)).is_err() {
        fail!("Worker has closed the gig channel.");
        return;
      }
    }

    let _ = gig.send(Gig::LinkLost);
  }
}
