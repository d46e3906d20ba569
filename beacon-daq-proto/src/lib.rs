//! Wire codec and register map shared between the board driver and anything
//! else that needs to speak the raw SPI protocol (test fixtures, bench
//! tools).
//!
//! The protocol is four bytes per transfer: `[address_or_opcode, b2, b1,
//! b0]`. A write frame carries its payload directly; a read is two
//! transfers — [`addr::SET_READ_REG`] naming the register, then a dummy
//! transfer whose response echoes `[addr, b2, b1, b0]` for the selected
//! register.

pub mod addr;
pub mod bitrev;
pub mod frame;

pub use frame::Frame;

/// Per-board channel count.
pub const NUM_CHANNELS: usize = 8;
/// Per-board ring-buffer count.
pub const NUM_BUFFERS: usize = 4;
/// Waveform chunks per buffer per channel.
pub const NUM_CHUNKS: usize = 4;
/// Phased-array beams with independently configurable thresholds.
pub const NUM_BEAMS: usize = 24;
/// Longest buffer length the firmware will accept, in samples.
pub const MAX_BUFFER_LENGTH: u32 = 2048;
/// Deepest pretrigger window, in units of 8*16 samples.
pub const MAX_PRETRIGGER: u32 = 8;
/// One less than the kernel spidev multi-transfer ioctl's hard limit, so a
/// full batch always fits one `transfer_multiple` call.
pub const MAX_TRANSFERS_PER_IOCTL: usize = 511;
/// SPI bus clock used unless overridden.
pub const DEFAULT_SPI_CLOCK_HZ: u32 = 20_000_000;
/// Board sample clock: 500MHz system clock divided by 16.
pub const BOARD_CLOCK_HZ: f64 = 500_000_000.0 / 16.0;
/// ADC-alignment calibration gives up after this many failed attempts.
pub const MAX_CALIBRATION_MISERY: u32 = 100;
/// Calibration pulse peak must reach at least this value to be usable.
pub const MIN_CALIBRATION_PEAK: i32 = 20;
/// Calibration peak-to-peak spread above this is rejected as noise.
pub const MAX_CALIBRATION_SPREAD: i32 = 16;
