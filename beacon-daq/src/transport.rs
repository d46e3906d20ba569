//! Abstraction over "submit a batch of four-byte SPI transfers" and "write
//! four bytes synchronously", so the rest of the driver never touches
//! `spidev` directly. Mirrors the teacher's `Ecp5Driver` trait abstracting
//! the physical programming interface away from the board logic.

use beacon_daq_proto::Frame;

use crate::error::DaqError;

/// One board's half-duplex SPI channel.
pub trait Transport {
    /// Submit `tx` as a batch of 4-byte transfers and return the received
    /// frame for each, in order. Implementations must issue exactly one
    /// underlying multi-transfer call per invocation (the batching/chunking
    /// policy lives above this trait).
    fn submit(&mut self, tx: &[Frame]) -> Result<Vec<Frame>, DaqError>;

    /// Write four bytes with no expectation of a meaningful response
    /// (register writes do not round-trip).
    fn write(&mut self, frame: Frame) -> Result<(), DaqError>;
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use std::collections::{HashMap, VecDeque};

    use super::*;

    /// A scriptable in-memory stand-in for a board's SPI channel.
    ///
    /// Holds a 256-entry register file (indexed by address) that writes
    /// update in place. A per-address queue of scripted values takes
    /// priority over the register file for that address and is drained one
    /// entry per read — used to script a distinct response for each
    /// waveform-chunk select register across a readout, since each chunk
    /// address is read repeatedly (once per RAM address) but must return
    /// different sample bytes each time.
    pub struct MockTransport {
        pub registers: [u32; 256],
        pub queues: HashMap<u8, VecDeque<u32>>,
        pub written: Vec<Frame>,
        pub select_read_addr: Option<u8>,
        /// Whether the next response is a raw 4-byte shift-register readout
        /// (no address echo, all four bytes are payload) rather than the
        /// `SET_READ_REG` gateway's echoed-address-plus-24-bit-payload shape.
        /// Set by whatever write frame last selected `select_read_addr`.
        raw_read: bool,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self { registers: [0; 256], queues: HashMap::new(), written: Vec::new(), select_read_addr: None, raw_read: false }
        }

        pub fn set_register(&mut self, addr: u8, payload: u32) {
            self.registers[addr as usize] = payload;
        }

        /// Queue `payload` to be returned the next time `addr` is read,
        /// taking priority over (but not overwriting) the register file.
        pub fn queue_read(&mut self, addr: u8, payload: u32) {
            self.queues.entry(addr).or_default().push_back(payload);
        }
    }

    impl Transport for MockTransport {
        fn submit(&mut self, tx: &[Frame]) -> Result<Vec<Frame>, DaqError> {
            let mut out = Vec::with_capacity(tx.len());
            for frame in tx {
                self.written.push(*frame);
                if frame.addr == beacon_daq_proto::addr::SET_READ_REG {
                    self.select_read_addr = Some(frame.b0);
                    self.raw_read = false;
                    out.push(Frame::zero());
                    continue;
                }
                // Every non-select-read frame also performs a plain register
                // write, same as a real transfer latching its payload into
                // the addressed register while shifting out the read
                // pointer's latched data.
                self.registers[frame.addr as usize] = frame.payload24();

                let addr = self.select_read_addr.unwrap_or(frame.addr);
                let payload = match self.queues.get_mut(&addr).and_then(VecDeque::pop_front) {
                    Some(queued) => queued,
                    None => self.registers[addr as usize],
                };
                out.push(if self.raw_read {
                    let b = payload.to_be_bytes();
                    Frame { addr: b[0], b2: b[1], b1: b[2], b0: b[3] }
                } else {
                    Frame::write(addr, payload)
                });

                // Any other addressed write (e.g. a waveform chunk select)
                // becomes the address the following dummy transfer reads
                // back from, same as `SET_READ_REG` does, but without an
                // echo: the next response is raw shift-register data.
                self.select_read_addr = Some(frame.addr);
                self.raw_read = true;
            }
            Ok(out)
        }

        fn write(&mut self, frame: Frame) -> Result<(), DaqError> {
            self.written.push(frame);
            self.registers[frame.addr as usize] = frame.payload24();
            Ok(())
        }
    }
}

/// The real backend: a `/dev/spidev*` character device plus the shared GPIO
/// power-enable line lives one level up, in [`crate::device::Device`].
pub mod spi {
    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

    use super::*;

    pub struct SpidevTransport {
        dev: Spidev,
    }

    impl SpidevTransport {
        pub fn open(path: &str, clock_hz: u32) -> Result<Self, DaqError> {
            let mut dev = Spidev::open(path)?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(clock_hz)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            dev.configure(&options)?;
            Ok(Self { dev })
        }
    }

    impl Transport for SpidevTransport {
        fn submit(&mut self, tx: &[Frame]) -> Result<Vec<Frame>, DaqError> {
            let tx_bufs: Vec<[u8; 4]> = tx.iter().map(|f| [f.addr, f.b2, f.b1, f.b0]).collect();
            let mut rx_bufs: Vec<[u8; 4]> = vec![[0u8; 4]; tx.len()];
            let mut transfers: Vec<SpidevTransfer<'_, '_>> = tx_bufs
                .iter()
                .zip(rx_bufs.iter_mut())
                .map(|(txb, rx)| SpidevTransfer::read_write(txb, rx))
                .collect();
            self.dev.transfer_multiple(&mut transfers)?;
            Ok(rx_bufs
                .into_iter()
                .map(|b| Frame { addr: b[0], b2: b[1], b1: b[2], b0: b[3] })
                .collect())
        }

        fn write(&mut self, frame: Frame) -> Result<(), DaqError> {
            use std::io::Write;
            self.dev.write_all(&[frame.addr, frame.b2, frame.b1, frame.b0])?;
            Ok(())
        }
    }
}
