//! Wait/cancel (C6): block the caller until a buffer is ready or a timeout
//! elapses, cancellable from another thread, single-waiter per handle.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::device::Device;
use crate::error::{DaqError, WaitOutcome};
use crate::transport::Transport;

impl<T: Transport> Device<T> {
    /// Block until at least one buffer is ready, `timeout` elapses, or the
    /// wait is cancelled. A non-positive timeout means "forever". Only one
    /// waiter may be in progress per handle; a second concurrent call
    /// returns [`WaitOutcome::Busy`] immediately without disturbing the
    /// first.
    pub fn wait(&mut self, timeout: std::time::Duration) -> Result<WaitOutcome, DaqError> {
        self.wait_with_deadline(if timeout.is_zero() { None } else { Some(timeout) })
    }

    /// As [`Device::wait`], but `None` means forever rather than relying on
    /// a sentinel duration.
    pub fn wait_with_deadline(&mut self, timeout: Option<std::time::Duration>) -> Result<WaitOutcome, DaqError> {
        if !self.try_acquire_waiter() {
            return Ok(WaitOutcome::Busy);
        }

        // A cancellation issued before we entered the loop is consumed here
        // and returns immediately without polling.
        if self.cancel_flag().swap(false, Ordering::SeqCst) {
            self.release_waiter();
            return Ok(WaitOutcome::Cancelled);
        }

        let started = Instant::now();
        let outcome = loop {
            let status = self.buffer_status()?;
            if status.ready_mask != 0 {
                break WaitOutcome::Ready(status.ready_mask);
            }
            if self.cancel_flag().swap(false, Ordering::SeqCst) {
                break WaitOutcome::Cancelled;
            }
            if let Some(timeout) = timeout {
                if started.elapsed() >= timeout {
                    break WaitOutcome::TimedOut;
                }
            }
            if self.poll_interval.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(self.poll_interval);
            }
        };

        self.release_waiter();
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::mock_device;

    #[test]
    fn cancel_before_wait_is_consumed_immediately() {
        let mut dev = mock_device();
        dev.cancel_wait();
        let outcome = dev.wait(Duration::from_secs(10)).unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[test]
    fn times_out_when_nothing_becomes_ready() {
        let mut dev = mock_device();
        dev.poll_interval = Duration::from_millis(1);
        let outcome = dev.wait(Duration::from_millis(5)).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn cancellation_from_another_thread_preempts_wait() {
        let mut dev = mock_device();
        dev.poll_interval = Duration::from_millis(1);
        let cancel = dev.cancel_handle();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            cancel.store(true, Ordering::SeqCst);
        });

        let outcome = dev.wait(Duration::from_secs(10)).unwrap();
        handle.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[test]
    fn busy_when_waiter_flag_already_held() {
        let mut dev = mock_device();
        assert!(dev.try_acquire_waiter());
        let outcome = dev.wait(Duration::from_millis(5)).unwrap();
        assert_eq!(outcome, WaitOutcome::Busy);
        dev.release_waiter();
    }
}
