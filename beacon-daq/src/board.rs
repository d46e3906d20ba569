//! Per-board state: one SPI transport, its pending transfer batch, and the
//! cached mode/buffer-select the rest of the driver uses to skip redundant
//! register writes.

use beacon_daq_proto::Frame;

use crate::batch::TransferBatch;
use crate::error::DaqError;
use crate::transport::Transport;

/// Which board a half-duplex register operation, command, or readout
/// targets.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Which {
    Master,
    Slave,
}

impl Which {
    pub fn label(self) -> &'static str {
        match self {
            Which::Master => "master",
            Which::Slave => "slave",
        }
    }
}

/// FPGA readout mode (`0x42`).
#[derive(Copy, Clone, Eq, PartialEq, Debug, num_derive::FromPrimitive, num_derive::ToPrimitive)]
#[repr(u8)]
pub enum Mode {
    Registers = 0,
    Waveforms = 1,
    Beams = 2,
    PowerSum = 3,
}

pub struct BoardState<T> {
    pub transport: T,
    pub batch: TransferBatch,
    pub mode: Option<Mode>,
    pub selected_buffer: Option<u8>,
    pub selected_channel: Option<u8>,
    pub board_id: u32,
    pub channel_read_mask: u8,
}

impl<T: Transport> BoardState<T> {
    pub fn new(transport: T, board_id: u32) -> Self {
        Self {
            transport,
            batch: TransferBatch::new(),
            mode: None,
            selected_buffer: None,
            selected_channel: None,
            board_id,
            channel_read_mask: 0xff,
        }
    }

    /// Queue `frame`, auto-flushing through the transport if the batch is
    /// full.
    pub fn queue(&mut self, frame: Frame) -> Result<(), DaqError> {
        self.batch.append(frame, &mut self.transport)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<Vec<Frame>, DaqError> {
        self.batch.flush(&mut self.transport)
    }

    /// Write a single register directly, bypassing the batcher, since a
    /// plain write requires no round trip.
    pub fn write_register(&mut self, addr: u8, payload: u32) -> Result<(), DaqError> {
        self.transport.write(Frame::write(addr, payload))
    }

    /// `SET_READ_REG(addr)` then a dummy read, returning the echoed
    /// register's payload. Verifies the address echoed in byte 0 of the
    /// response matches what was requested.
    pub fn read_register(&mut self, addr: u8) -> Result<u32, DaqError> {
        self.queue(Frame::select_read(addr))?;
        self.queue(Frame::zero())?;
        let responses = self.flush()?;
        let response = responses.last().copied().unwrap_or_default();
        if response.addr != addr {
            log::warn!("register echo mismatch: requested {addr:#04x}, got {:#04x}", response.addr);
        }
        Ok(response.payload24())
    }

    /// Select waveform `chunk` and read its raw 4-byte response. Unlike
    /// `read_register`, this never goes through `SET_READ_REG` and performs
    /// no address-echo check: selecting a chunk shifts that chunk's sample
    /// data into the response of the very next transfer, and all four
    /// response bytes are sample data rather than payload-plus-echo.
    pub fn read_waveform_chunk(&mut self, chunk: u8) -> Result<[u8; 4], DaqError> {
        self.queue(Frame::write(beacon_daq_proto::addr::chunk_select(chunk), 0))?;
        self.queue(Frame::zero())?;
        let responses = self.flush()?;
        let response = responses.last().copied().unwrap_or_default();
        Ok([response.addr, response.b2, response.b1, response.b0])
    }

    /// Ensure the board is in `mode`, skipping the write if already cached.
    pub fn ensure_mode(&mut self, mode: Mode) -> Result<(), DaqError> {
        if self.mode == Some(mode) {
            return Ok(());
        }
        self.write_register(beacon_daq_proto::addr::MODE, mode as u8 as u32)?;
        self.mode = Some(mode);
        Ok(())
    }

    /// Ensure `buffer` is the selected buffer, skipping the write if
    /// already cached.
    pub fn ensure_buffer_selected(&mut self, buffer: u8) -> Result<(), DaqError> {
        if self.selected_buffer == Some(buffer) {
            return Ok(());
        }
        self.write_register(beacon_daq_proto::addr::BUFFER_SELECT, buffer as u32)?;
        self.selected_buffer = Some(buffer);
        Ok(())
    }

    /// Select `channel` for waveform readout. The channel-select register
    /// payload is a one-hot bitmask (`1 << channel`), not the plain index.
    pub fn select_channel(&mut self, channel: u8) -> Result<(), DaqError> {
        if self.selected_channel == Some(channel) {
            return Ok(());
        }
        self.write_register(beacon_daq_proto::addr::CHANNEL_SELECT, 1u32 << channel)?;
        self.selected_channel = Some(channel);
        Ok(())
    }

    /// Invalidate the cached mode/buffer/channel — used after a reset or
    /// anything else that could have changed board state behind our back.
    pub fn invalidate_cache(&mut self) {
        self.mode = None;
        self.selected_buffer = None;
        self.selected_channel = None;
    }
}
