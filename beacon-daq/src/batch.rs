//! Bounded transfer list: accumulates frames for one board and flushes them
//! as a single multi-transfer call.

use beacon_daq_proto::{Frame, MAX_TRANSFERS_PER_IOCTL};

use crate::error::DaqError;
use crate::transport::Transport;

/// A bounded queue of outgoing frames for one board.
#[derive(Default)]
pub struct TransferBatch {
    queue: Vec<Frame>,
}

impl TransferBatch {
    pub fn new() -> Self {
        Self { queue: Vec::with_capacity(MAX_TRANSFERS_PER_IOCTL) }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Queue `frame`, auto-flushing first if the batch is already full.
    /// Returns the responses from an auto-flush, if one happened.
    pub fn append(&mut self, frame: Frame, transport: &mut dyn Transport) -> Result<Option<Vec<Frame>>, DaqError> {
        let flushed = if self.queue.len() >= MAX_TRANSFERS_PER_IOCTL {
            Some(self.flush(transport)?)
        } else {
            None
        };
        self.queue.push(frame);
        Ok(flushed)
    }

    /// Issue one multi-transfer ioctl for everything queued so far and reset
    /// the list, win or lose.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> Result<Vec<Frame>, DaqError> {
        let tx = std::mem::take(&mut self.queue);
        if tx.is_empty() {
            return Ok(Vec::new());
        }
        transport.submit(&tx)
    }
}
