//! Device lifecycle (C10): open/close, exclusive locking, board-id
//! assignment, and the handle that every other component operates on.

use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use beacon_daq_proto::addr;

use crate::board::BoardState;
use crate::diagnostics::{Diagnostics, TraceEntry};
use crate::error::DaqError;
use crate::transport::Transport;

/// Process-wide board-id counter, initialized at 1. `set_board_id` may bump
/// it upward but never backward.
static NEXT_BOARD_ID: AtomicU32 = AtomicU32::new(1);

/// Advance the process-wide board-id counter to at least `min`.
pub fn set_board_id(min: u32) {
    NEXT_BOARD_ID.fetch_max(min, Ordering::SeqCst);
}

fn take_board_id() -> u32 {
    NEXT_BOARD_ID.fetch_add(1, Ordering::SeqCst)
}

/// Default poll interval for [`Device::wait`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Builder for [`Device::open`]-style construction against the real
/// `spidev`/`gpio-cdev` backend.
pub struct OpenOptions {
    master_path: String,
    slave_path: Option<String>,
    gpio_chip: Option<String>,
    gpio_line: Option<u32>,
    enable_locking: bool,
    spi_clock_hz: u32,
    poll_interval: Duration,
}

impl OpenOptions {
    pub fn new(master_path: impl Into<String>) -> Self {
        Self {
            master_path: master_path.into(),
            slave_path: None,
            gpio_chip: None,
            gpio_line: None,
            enable_locking: true,
            spi_clock_hz: beacon_daq_proto::DEFAULT_SPI_CLOCK_HZ,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn slave_path(mut self, path: impl Into<String>) -> Self {
        self.slave_path = Some(path.into());
        self
    }

    pub fn gpio(mut self, chip: impl Into<String>, line: u32) -> Self {
        self.gpio_chip = Some(chip.into());
        self.gpio_line = Some(line);
        self
    }

    pub fn locking(mut self, enabled: bool) -> Self {
        self.enable_locking = enabled;
        self
    }

    pub fn spi_clock_hz(mut self, hz: u32) -> Self {
        self.spi_clock_hz = hz;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn open(self) -> Result<Device<crate::transport::spi::SpidevTransport>, DaqError> {
        use crate::transport::spi::SpidevTransport;

        let master_lock = lock_exclusive(&self.master_path)?;
        let slave_lock = match &self.slave_path {
            Some(path) => Some(lock_exclusive(path)?),
            None => None,
        };

        let gpio_line = match (&self.gpio_chip, self.gpio_line) {
            (Some(chip), Some(line)) => Some(open_gpio_power_enable(chip, line)?),
            _ => None,
        };

        let master_transport = SpidevTransport::open(&self.master_path, self.spi_clock_hz)?;
        let slave_transport = self
            .slave_path
            .as_deref()
            .map(|p| SpidevTransport::open(p, self.spi_clock_hz))
            .transpose()?;

        Device::new(master_transport, slave_transport, self.poll_interval, self.enable_locking, Some(master_lock), slave_lock, gpio_line)
    }
}

fn lock_exclusive(path: &str) -> Result<File, DaqError> {
    use std::os::unix::io::AsRawFd;
    let file = File::options().read(true).write(true).open(path)?;
    #[allow(deprecated)]
    nix::fcntl::flock(file.as_raw_fd(), nix::fcntl::FlockArg::LockExclusiveNonblock).map_err(|_| DaqError::DeviceBusy)?;
    Ok(file)
}

fn open_gpio_power_enable(chip: &str, line: u32) -> Result<gpio_cdev::LineHandle, DaqError> {
    let mut chip = gpio_cdev::Chip::new(chip).map_err(|e| DaqError::Gpio(e.to_string()))?;
    let handle = chip
        .get_line(line)
        .and_then(|l| l.request(gpio_cdev::LineRequestFlags::OUTPUT, 0, "beacon-daq"))
        .map_err(|e| DaqError::Gpio(e.to_string()))?;
    Ok(handle)
}

/// A pair of boards (master + optional slave) and the bookkeeping shared
/// across every operation on them.
pub struct Device<T: Transport> {
    pub(crate) master: BoardState<T>,
    pub(crate) slave: Option<BoardState<T>>,
    gpio_line: Option<gpio_cdev::LineHandle>,
    _master_lock: Option<File>,
    _slave_lock: Option<File>,
    pub(crate) bus_lock: Option<Mutex<()>>,
    waiting: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    pub(crate) next_read_buffer: u8,
    pub(crate) last_hw_next: u8,
    pub(crate) event_number_offset: u64,
    pub(crate) software_event_counter: AtomicU64,
    pub(crate) start_time: SystemTime,
    pub(crate) poll_interval: Duration,
    pub(crate) pretrigger_samples: u32,
    pub(crate) buffer_length: u32,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) clears_failed: AtomicU64,
}

impl<T: Transport> Device<T> {
    /// Build a handle from already-opened transports. Used by
    /// [`OpenOptions::open`] for the real backend and directly by tests for
    /// a mock one.
    pub fn new(
        master_transport: T,
        slave_transport: Option<T>,
        poll_interval: Duration,
        enable_locking: bool,
        master_lock: Option<File>,
        slave_lock: Option<File>,
        gpio_line: Option<gpio_cdev::LineHandle>,
    ) -> Result<Self, DaqError> {
        let master_id = take_board_id();
        let slave_id = slave_transport.as_ref().map(|_| take_board_id());

        let master = BoardState::new(master_transport, master_id);
        let slave = slave_transport.map(|t| BoardState::new(t, slave_id.unwrap()));

        let mut device = Device {
            master,
            slave,
            gpio_line,
            _master_lock: master_lock,
            _slave_lock: slave_lock,
            bus_lock: enable_locking.then(|| Mutex::new(())),
            waiting: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            next_read_buffer: 0,
            last_hw_next: 0,
            event_number_offset: (SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs()) << 32,
            software_event_counter: AtomicU64::new(0),
            start_time: SystemTime::now(),
            poll_interval,
            pretrigger_samples: 0,
            buffer_length: 512,
            diagnostics: Diagnostics::default(),
            clears_failed: AtomicU64::new(0),
        };

        if let Some(line) = &device.gpio_line {
            let _ = line.set_value(0);
        }

        device.master.write_register(addr::SYNC, 0)?;
        device.verify_board_identity()?;
        device.reset(crate::reset::ResetKind::CountersOnly)?;

        Ok(device)
    }

    /// Build a handle directly from already-connected transports, skipping
    /// file locks and GPIO setup. Used to drive a [`crate::transport::mock::MockTransport`]
    /// in tests without a real device node.
    #[cfg(any(test, feature = "mock"))]
    pub fn for_testing(master_transport: T, slave_transport: Option<T>) -> Result<Self, DaqError> {
        Self::new(master_transport, slave_transport, DEFAULT_POLL_INTERVAL, true, None, None, None)
    }

    fn verify_board_identity(&mut self) -> Result<(), DaqError> {
        let master_ver = self.master.read_register(addr::FIRMWARE_VER)?;
        if (master_ver >> 16) & 1 == 0 {
            return Err(DaqError::IdentityMismatch { expected_master: true, board: "master" });
        }
        if let Some(slave) = &mut self.slave {
            let slave_ver = slave.read_register(addr::FIRMWARE_VER)?;
            if (slave_ver >> 16) & 1 != 0 {
                return Err(DaqError::IdentityMismatch { expected_master: false, board: "slave" });
            }
        }
        Ok(())
    }

    pub fn has_slave(&self) -> bool {
        self.slave.is_some()
    }

    pub fn diagnostics(&self) -> Vec<TraceEntry> {
        self.diagnostics.snapshot()
    }

    pub fn clears_failed(&self) -> u64 {
        self.clears_failed.load(Ordering::Relaxed)
    }

    /// A clonable handle to this device's cancellation flag, suitable for
    /// handing to another thread or a Unix signal handler.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel_wait(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub(crate) fn try_acquire_waiter(&self) -> bool {
        self.waiting.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub(crate) fn release_waiter(&self) {
        self.waiting.store(false, Ordering::SeqCst);
    }

    pub(crate) fn cancel_flag(&self) -> &AtomicBool {
        &self.cancel
    }

    /// Direct access to the master board's transport, for scripting a mock
    /// in integration tests once the device is already constructed.
    #[cfg(any(test, feature = "mock"))]
    pub fn master_transport_mut(&mut self) -> &mut T {
        &mut self.master.transport
    }

    /// Direct access to the slave board's transport, if present.
    #[cfg(any(test, feature = "mock"))]
    pub fn slave_transport_mut(&mut self) -> Option<&mut T> {
        self.slave.as_mut().map(|s| &mut s.transport)
    }
}

impl<T: Transport> Drop for Device<T> {
    fn drop(&mut self) {
        self.cancel_wait();
        if let Some(line) = &self.gpio_line {
            let _ = line.set_value(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::transport::mock::MockTransport;

    use super::*;

    const MASTER: u32 = 1 << 16;
    const SLAVE: u32 = 0;

    fn transport_with_firmware_ver(master_flag: u32) -> MockTransport {
        let mut t = MockTransport::new();
        t.set_register(addr::FIRMWARE_VER, master_flag);
        t
    }

    #[test]
    fn rejects_a_master_whose_firmware_reports_slave() {
        let result = Device::for_testing(transport_with_firmware_ver(SLAVE), None);
        assert!(matches!(result, Err(DaqError::IdentityMismatch { expected_master: true, board: "master" })));
    }

    #[test]
    fn rejects_a_slave_whose_firmware_reports_master() {
        let result = Device::for_testing(transport_with_firmware_ver(MASTER), Some(transport_with_firmware_ver(MASTER)));
        assert!(matches!(result, Err(DaqError::IdentityMismatch { expected_master: false, board: "slave" })));
    }

    #[test]
    fn set_board_id_only_bumps_the_counter_upward() {
        set_board_id(1000);
        let dev = Device::for_testing(transport_with_firmware_ver(MASTER), None).unwrap();
        assert!(dev.master.board_id >= 1000);
        set_board_id(1);
        let dev2 = Device::for_testing(transport_with_firmware_ver(MASTER), None).unwrap();
        assert!(dev2.master.board_id > dev.master.board_id);
    }
}
