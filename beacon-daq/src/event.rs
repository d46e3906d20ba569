//! Event readout (C7): orchestrates per-buffer metadata harvest and
//! per-channel waveform streaming from one or two boards, assembling typed
//! header + event records while detecting cross-board desync.

use std::sync::atomic::Ordering;
use std::time::{Duration, SystemTime};

use beacon_daq_proto::{addr, frame::join48, NUM_BUFFERS, NUM_CHANNELS, NUM_CHUNKS};

use crate::board::Mode;
use crate::device::Device;
use crate::diagnostics::TraceEntry;
use crate::error::DaqError;
use crate::transport::Transport;

/// Bit 0: a board's own reported hardware buffer index disagreed with the
/// buffer we asked it to read.
pub const SYNC_PROBLEM_HWBUF_SELF: u8 = 1 << 0;
/// Bit 1: slave's trigger number disagreed with master's.
pub const SYNC_PROBLEM_TRIG_NUMBER: u8 = 1 << 1;
/// Bit 2: |slave.trig_time - master.trig_time| exceeded 2 board-clock ticks.
pub const SYNC_PROBLEM_TRIG_TIME: u8 = 1 << 2;
/// Bit 3: master and slave reported different hardware buffer indices.
pub const SYNC_PROBLEM_HWBUF_CROSS: u8 = 1 << 3;

#[derive(Copy, Clone, Eq, PartialEq, Debug, num_derive::FromPrimitive)]
#[repr(u8)]
pub enum TrigType {
    Software = 0,
    RfBeam = 1,
    Pps = 2,
    ExtInput = 3,
}

/// Per-board register harvest for one triggered event, before cross-board
/// consistency checks are applied.
#[derive(Clone, Debug, Default)]
struct RawBoardMeta {
    event_counter: u64,
    trig_counter: u32,
    trig_time_ticks: u64,
    deadtime: u32,
    hw_buffer: u8,
    trig_type: u8,
    calpulser: bool,
    pretrig_window: u8,
    trig_polarization: u8,
}

/// Everything known about one triggered event, independent of waveform
/// payload.
#[derive(Clone, Debug)]
pub struct EventHeader {
    pub event_number: u64,
    pub trig_number: u32,
    pub board_id: Vec<u32>,
    pub trig_time_ticks: Vec<u64>,
    pub readout_wall_time: Vec<SystemTime>,
    pub deadtime: Vec<u32>,
    pub buffer_length: u32,
    pub pretrigger_samples: u32,
    pub approx_trigger_time: SystemTime,
    pub last_beam: u32,
    pub beam_mask: u32,
    pub beam_power: u32,
    pub pps_counter: u32,
    pub dynamic_beam_mask: u32,
    pub veto_deadtime_counter: u32,
    pub buffer_number: u8,
    pub buffer_mask_at_read: u8,
    pub trig_type: u8,
    pub calpulser: bool,
    pub channel_mask: u8,
    pub trig_polarization: u8,
    pub sync_problem: u8,
}

/// One board's per-channel sample arrays for one buffer.
#[derive(Clone, Debug)]
pub struct BoardWaveforms {
    pub channels: [Vec<u8>; NUM_CHANNELS],
}

impl Default for BoardWaveforms {
    fn default() -> Self {
        Self { channels: std::array::from_fn(|_| Vec::new()) }
    }
}

#[derive(Clone, Debug)]
pub struct Event {
    pub header: EventHeader,
    /// Master's waveforms at index 0, slave's (if present) at index 1.
    pub data: Vec<BoardWaveforms>,
}

impl<T: Transport> Device<T> {
    /// Drain every ready buffer, in software-cursor order, returning one
    /// [`Event`] per buffer successfully read.
    pub fn read_events(&mut self) -> Result<Vec<Event>, DaqError> {
        let status = self.buffer_status()?;
        self.last_hw_next = status.hw_next;
        let mut events = Vec::new();

        for _ in 0..NUM_BUFFERS as u8 {
            let buffer = self.next_read_buffer;
            let bit = 1u8 << buffer;
            if status.ready_mask & bit == 0 {
                break;
            }
            let event = self.read_one_buffer(buffer)?;
            events.push(event);
            self.next_read_buffer = (self.next_read_buffer + 1) % NUM_BUFFERS as u8;
        }
        Ok(events)
    }

    fn read_one_buffer(&mut self, buffer: u8) -> Result<Event, DaqError> {
        self.master.ensure_buffer_selected(buffer)?;
        self.diagnostics.record(TraceEntry::BufferSelect { board: "master", buffer });
        if let Some(slave) = &mut self.slave {
            slave.ensure_buffer_selected(buffer)?;
            self.diagnostics.record(TraceEntry::BufferSelect { board: "slave", buffer });
        }

        let master_meta = harvest_board_meta(&mut self.master, true)?;
        let slave_meta = match &mut self.slave {
            Some(slave) => Some(harvest_board_meta(slave, false)?),
            None => None,
        };

        let mut sync_problem = 0u8;
        if master_meta.hw_buffer != buffer {
            sync_problem |= SYNC_PROBLEM_HWBUF_SELF;
            log::warn!("master hw buffer {} != requested {buffer}", master_meta.hw_buffer);
            self.diagnostics.record(TraceEntry::Desync { check: "hwbuf_self" });
        }
        if let Some(slave_meta) = &slave_meta {
            if slave_meta.hw_buffer != buffer {
                sync_problem |= SYNC_PROBLEM_HWBUF_SELF;
            }
            if slave_meta.trig_counter != master_meta.trig_counter {
                sync_problem |= SYNC_PROBLEM_TRIG_NUMBER;
                log::warn!("trig number mismatch: master {} slave {}", master_meta.trig_counter, slave_meta.trig_counter);
                self.diagnostics.record(TraceEntry::Desync { check: "trig_number" });
            }
            let delta = master_meta.trig_time_ticks.abs_diff(slave_meta.trig_time_ticks);
            if delta > 2 {
                sync_problem |= SYNC_PROBLEM_TRIG_TIME;
                log::warn!("trig time delta {delta} exceeds tolerance");
                self.diagnostics.record(TraceEntry::Desync { check: "trig_time" });
            }
            if slave_meta.hw_buffer != master_meta.hw_buffer {
                sync_problem |= SYNC_PROBLEM_HWBUF_CROSS;
                self.diagnostics.record(TraceEntry::Desync { check: "hwbuf_cross" });
            }
        }

        let hw_event_counter = master_meta.event_counter;
        let prev = self.software_event_counter.load(Ordering::Relaxed);
        if prev != 0 && hw_event_counter != prev + 1 {
            log::warn!("software event counter {prev} out of step with hardware {hw_event_counter}");
        }
        self.software_event_counter.store(hw_event_counter, Ordering::Relaxed);
        let event_number = self.event_number_offset + hw_event_counter;

        let channel_mask_reg = self.master.read_register(addr::CH_MASKS)?;
        let last_beam = self.master.read_register(addr::LAST_BEAM)?;
        let user_mask = self.master.read_register(addr::USER_MASK)?;
        let beam_power = self.master.read_register(addr::TRIG_BEAM_POWER)?;
        let pps_counter = self.master.read_register(addr::PPS_COUNTER)?;
        let dynamic_beam_mask = self.master.read_register(addr::HD_DYN_MASK)?;
        let veto_deadtime_counter = self.master.read_register(addr::VETO_DEADTIME_CTR)?;

        let pretrigger_samples = master_meta.pretrig_window as u32 * 8 * 16;
        let elapsed_secs = master_meta.trig_time_ticks as f64 / beacon_daq_proto::BOARD_CLOCK_HZ;
        let approx_trigger_time = self.start_time + Duration::from_secs_f64(elapsed_secs.max(0.0));

        let mut board_id = vec![self.master.board_id];
        let mut trig_time_ticks = vec![master_meta.trig_time_ticks];
        let mut deadtime = vec![master_meta.deadtime];
        let mut readout_wall_time = vec![SystemTime::now()];
        if let Some(slave_meta) = &slave_meta {
            board_id.push(self.slave.as_ref().unwrap().board_id);
            trig_time_ticks.push(slave_meta.trig_time_ticks);
            deadtime.push(slave_meta.deadtime);
            readout_wall_time.push(SystemTime::now());
        }

        let header = EventHeader {
            event_number,
            trig_number: master_meta.trig_counter,
            board_id,
            trig_time_ticks,
            readout_wall_time,
            deadtime,
            buffer_length: self.buffer_length,
            pretrigger_samples,
            approx_trigger_time,
            last_beam,
            beam_mask: user_mask,
            beam_power,
            pps_counter,
            dynamic_beam_mask,
            veto_deadtime_counter,
            buffer_number: master_meta.hw_buffer,
            buffer_mask_at_read: 1u8 << buffer,
            trig_type: master_meta.trig_type,
            calpulser: master_meta.calpulser,
            channel_mask: channel_mask_reg as u8,
            trig_polarization: master_meta.trig_polarization,
            sync_problem,
        };

        let mut data = vec![read_board_waveforms(&mut self.master, &self.diagnostics, "master", self.buffer_length)?];
        if let Some(slave) = &mut self.slave {
            data.push(read_board_waveforms(slave, &self.diagnostics, "slave", self.buffer_length)?);
        }

        self.clear_buffer(buffer)?;

        Ok(Event { header, data })
    }

    fn clear_buffer(&mut self, buffer: u8) -> Result<(), DaqError> {
        let mask = 1u32 << buffer;
        self.synchronized_command(beacon_daq_proto::Frame::write(addr::CLEAR_BUFFERS, mask))?;
        let status_after = self.master.read_register(addr::STATUS)?;
        if status_after & mask != 0 {
            self.clears_failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("clear of buffer {buffer} did not take effect (may have been re-filled)");
        }
        Ok(())
    }
}

fn harvest_board_meta<T: Transport>(board: &mut crate::board::BoardState<T>, _is_master: bool) -> Result<RawBoardMeta, DaqError> {
    let event_low = board.read_register(addr::EVENT_COUNTER_LOW)?;
    let event_high = board.read_register(addr::EVENT_COUNTER_HIGH)?;
    let trig_low = board.read_register(addr::TRIG_COUNTER_LOW)?;
    let trig_high = board.read_register(addr::TRIG_COUNTER_HIGH)?;
    let time_low = board.read_register(addr::TRIG_TIME_LOW)?;
    let time_high = board.read_register(addr::TRIG_TIME_HIGH)?;
    let deadtime = board.read_register(addr::DEADTIME)?;
    let trig_info = board.read_register(addr::TRIG_INFO)?;

    Ok(RawBoardMeta {
        event_counter: join48(event_low, event_high),
        trig_counter: join48(trig_low, trig_high) as u32,
        trig_time_ticks: join48(time_low, time_high),
        deadtime,
        hw_buffer: ((trig_info >> 22) & 0x3) as u8,
        trig_type: ((trig_info >> 15) & 0x3) as u8,
        calpulser: (trig_info >> 21) & 0x1 != 0,
        pretrig_window: ((trig_info >> 17) & 0x7) as u8,
        trig_polarization: (trig_info & 0xf) as u8,
    })
}

fn read_board_waveforms<T: Transport>(
    board: &mut crate::board::BoardState<T>,
    diagnostics: &crate::diagnostics::Diagnostics,
    label: &'static str,
    buffer_length: u32,
) -> Result<BoardWaveforms, DaqError> {
    let mut waveforms = BoardWaveforms::default();
    let bytes_per_address = NUM_CHUNKS as u32 * 4;
    let addrs_per_channel = buffer_length.div_ceil(bytes_per_address).max(1);

    for channel in 0..NUM_CHANNELS as u8 {
        if board.channel_read_mask & (1 << channel) == 0 {
            waveforms.channels[channel as usize] = vec![0; buffer_length as usize];
            continue;
        }
        board.ensure_mode(Mode::Waveforms)?;
        diagnostics.record(TraceEntry::ModeSwitch { board: label, mode: Mode::Waveforms as u8 });
        board.select_channel(channel)?;

        let mut samples = Vec::with_capacity(buffer_length as usize);
        for ram_addr in 0..addrs_per_channel {
            board.write_register(addr::RAM_ADDRESS, ram_addr)?;
            for chunk in 0..NUM_CHUNKS as u8 {
                samples.extend_from_slice(&board.read_waveform_chunk(chunk)?);
            }
        }
        samples.truncate(buffer_length as usize);
        waveforms.channels[channel as usize] = samples;
    }
    Ok(waveforms)
}

#[cfg(test)]
mod tests {
    use beacon_daq_proto::addr;

    use super::*;
    use crate::test_support::{mock_device, mock_device_with_slave};

    /// Script `sample`'s 4 bytes as the response to every waveform-chunk
    /// readout this board will perform for `enabled_channels` channels of
    /// `buffer_length` samples.
    fn fill_waveform_queue(transport: &mut crate::transport::mock::MockTransport, enabled_channels: usize, buffer_length: u32, sample: u32) {
        let bytes_per_address = NUM_CHUNKS as u32 * 4;
        let addrs = buffer_length.div_ceil(bytes_per_address);
        let reads_per_chunk = enabled_channels as u32 * addrs;
        for chunk in 0..NUM_CHUNKS as u8 {
            for _ in 0..reads_per_chunk {
                transport.queue_read(addr::chunk_select(chunk), sample);
            }
        }
    }

    fn set_single_event_registers(dev: &mut crate::device::Device<crate::transport::mock::MockTransport>, ready_mask: u8, hw_next: u8) {
        let t = &mut dev.master.transport;
        t.set_register(addr::STATUS, ready_mask as u32 | ((hw_next as u32) << 12));
        t.set_register(addr::EVENT_COUNTER_LOW, 1);
        t.set_register(addr::EVENT_COUNTER_HIGH, 0);
        t.set_register(addr::TRIG_COUNTER_LOW, 7);
        t.set_register(addr::TRIG_COUNTER_HIGH, 0);
        t.set_register(addr::TRIG_TIME_LOW, 468_750);
        t.set_register(addr::TRIG_TIME_HIGH, 0);
        t.set_register(addr::DEADTIME, 0);
        t.set_register(addr::TRIG_INFO, 0);
    }

    #[test]
    fn s1_single_board_single_event() {
        let mut dev = mock_device();
        dev.set_channel_mask(0x0f).unwrap();
        dev.buffer_length = 64;
        set_single_event_registers(&mut dev, 0b0001, 1);
        fill_waveform_queue(&mut dev.master.transport, 4, 64, 0x0102_0304);

        let events = dev.read_events().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.header.buffer_number, 0);
        assert_eq!(event.header.event_number, dev.event_number_offset + 1);

        let approx_nanos = event.header.approx_trigger_time.duration_since(dev.start_time).unwrap().as_nanos() as i128;
        assert!((approx_nanos - 15_000_000).abs() < 1_000_000, "approx trigger time off: {approx_nanos}ns");

        for ch in 0..4 {
            assert_eq!(event.data[0].channels[ch].len(), 64);
            assert_eq!(event.data[0].channels[ch][0], 0x01);
        }
        for ch in 4..8 {
            assert!(event.data[0].channels[ch].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn s2_two_board_synchronized_read() {
        let mut dev = mock_device_with_slave();
        dev.set_channel_mask(0x0f).unwrap();
        dev.buffer_length = 32;
        dev.master.transport.set_register(addr::STATUS, 0b0011);
        dev.master.transport.set_register(addr::EVENT_COUNTER_LOW, 1);
        dev.master.transport.set_register(addr::TRIG_COUNTER_LOW, 5);
        dev.master.transport.set_register(addr::TRIG_TIME_LOW, 100);
        let slave = dev.slave.as_mut().unwrap();
        slave.transport.set_register(addr::EVENT_COUNTER_LOW, 1);
        slave.transport.set_register(addr::TRIG_COUNTER_LOW, 5);
        slave.transport.set_register(addr::TRIG_TIME_LOW, 101);
        fill_waveform_queue(&mut dev.master.transport, 4, 32, 0x0102_0304);
        fill_waveform_queue(&mut dev.slave.as_mut().unwrap().transport, 4, 32, 0x0405_0607);

        // Second buffer: same scripted values suffice since only one event
        // is exercised by `read_events` draining the ready mask.
        let events = dev.read_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].header.sync_problem, 0);
        assert_eq!(events[0].header.buffer_number, 0);
        assert_eq!(events[1].header.buffer_number, 0);
        assert_eq!(events[0].data.len(), 2);
        assert_eq!(events[0].data[1].channels[0][0], 0x04);
    }

    #[test]
    fn s3_desync_hwbuf_self_mismatch_is_nonfatal() {
        let mut dev = mock_device();
        dev.set_channel_mask(0x0f).unwrap();
        dev.buffer_length = 16;
        set_single_event_registers(&mut dev, 0b0001, 0);
        // trig_info hw buffer field (bits 22-23) = 1, while we're reading buffer 0.
        dev.master.transport.set_register(addr::TRIG_INFO, 1 << 22);
        fill_waveform_queue(&mut dev.master.transport, 4, 16, 0x0102_0304);

        let events = dev.read_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_ne!(events[0].header.sync_problem & SYNC_PROBLEM_HWBUF_SELF, 0);
    }

    #[test]
    fn s3_master_and_slave_hwbuf_indices_disagree() {
        let mut dev = mock_device_with_slave();
        dev.set_channel_mask(0x0f).unwrap();
        dev.buffer_length = 16;
        set_single_event_registers(&mut dev, 0b0001, 0);
        // Master reports hw buffer 1, slave reports 0, while reading buffer 0.
        dev.master.transport.set_register(addr::TRIG_INFO, 1 << 22);
        let slave = dev.slave.as_mut().unwrap();
        slave.transport.set_register(addr::EVENT_COUNTER_LOW, 1);
        slave.transport.set_register(addr::TRIG_COUNTER_LOW, 7);
        slave.transport.set_register(addr::TRIG_TIME_LOW, 468_750);
        slave.transport.set_register(addr::TRIG_INFO, 0);
        fill_waveform_queue(&mut dev.master.transport, 4, 16, 0x0102_0304);
        fill_waveform_queue(&mut dev.slave.as_mut().unwrap().transport, 4, 16, 0x0);

        let events = dev.read_events().unwrap();
        assert_eq!(events.len(), 1);
        let problem = events[0].header.sync_problem;
        assert_ne!(problem & SYNC_PROBLEM_HWBUF_SELF, 0, "master's own hw buffer disagreed with the requested one");
        assert_ne!(problem & SYNC_PROBLEM_HWBUF_CROSS, 0, "master and slave reported different hw buffers");
    }

    #[test]
    fn buffer_cursor_advances_by_popcount_of_ready_mask() {
        let mut dev = mock_device();
        dev.set_channel_mask(0x0f).unwrap();
        dev.buffer_length = 8;
        set_single_event_registers(&mut dev, 0b0111, 0);
        fill_waveform_queue(&mut dev.master.transport, 4, 8 * 3, 0x0102_0304); // enough reads for all 3 buffers

        let events = dev.read_events().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(dev.next_read_buffer, 3 % NUM_BUFFERS as u8);
    }

    #[test]
    fn event_numbers_are_strictly_increasing() {
        let mut dev = mock_device();
        dev.set_channel_mask(0x0f).unwrap();
        dev.buffer_length = 8;
        let offset = dev.event_number_offset;
        for k in 1..=3u32 {
            dev.next_read_buffer = 0;
            dev.master.transport.set_register(addr::STATUS, 0b0001);
            dev.master.transport.set_register(addr::EVENT_COUNTER_LOW, k);
            fill_waveform_queue(&mut dev.master.transport, 4, 8, 0x0102_0304);
            let events = dev.read_events().unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].header.event_number, offset + k as u64);
        }
    }
}
