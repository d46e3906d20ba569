//! Configuration surface (C9): thresholds, masks, attenuators, trigger
//! settings, veto options, and the ambient housekeeping/scaler/firmware
//! readback helpers.

use beacon_daq_proto::{addr, frame::join48, Frame, NUM_BEAMS};

use crate::device::Device;
use crate::error::DaqError;
use crate::transport::Transport;

/// Firmware identity, as read back from `0x01`/`0x02`.
#[derive(Copy, Clone, Debug)]
pub struct FirmwareInfo {
    pub is_master: bool,
    pub major: u8,
    pub minor: u8,
    pub date: u32,
}

/// Read-only snapshot of scaler/firmware/veto/attenuation state, analogous
/// to the original's shared-housekeeping dump.
#[derive(Clone, Debug)]
pub struct Housekeeping {
    pub firmware: FirmwareInfo,
    pub chip_id: u64,
    pub scalers: Vec<u32>,
    pub veto_status: u32,
    pub veto_deadtime_counter: u32,
    pub attenuations: [u8; 8],
}

impl<T: Transport> Device<T> {
    /// Write all 24 beam thresholds in one batched burst. Returns the
    /// number of registers successfully written.
    pub fn set_thresholds(&mut self, thresholds: &[u32; NUM_BEAMS]) -> Result<usize, DaqError> {
        let mut count = 0;
        for (beam, &value) in thresholds.iter().enumerate() {
            self.master.queue(Frame::write(addr::threshold(beam as u8), value))?;
            count += 1;
        }
        self.master.flush()?;
        Ok(count)
    }

    pub fn set_channel_mask(&mut self, mask: u8) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::CHANNEL_MASK, mask as u32))?;
        for board in [Some(&mut self.master), self.slave.as_mut()].into_iter().flatten() {
            board.channel_read_mask = mask;
        }
        Ok(())
    }

    pub fn set_user_beam_mask(&mut self, mask: u32) -> Result<(), DaqError> {
        self.master.write_register(addr::USER_MASK, mask)
    }

    /// Write the three attenuator payload bytes (bit-reversed per the
    /// hardware's MSB-first quirk) and apply them, synchronized across
    /// boards.
    pub fn set_attenuations(&mut self, values: &[u8; 8]) -> Result<(), DaqError> {
        let pack = |a: u8, b: u8, c: u8| -> u32 {
            let mut frame = Frame::write(0, ((a as u32) << 16) | ((b as u32) << 8) | c as u32);
            frame.reverse_payload_bits();
            frame.payload24()
        };
        let g0 = pack(values[2], values[1], values[0]);
        let g1 = pack(values[5], values[4], values[3]);
        let g2 = pack(0, values[7], values[6]);

        self.synchronized_command(Frame::write(addr::ATTEN_012, g0))?;
        self.synchronized_command(Frame::write(addr::ATTEN_345, g1))?;
        self.synchronized_command(Frame::write(addr::ATTEN_67, g2))?;
        self.synchronized_command(Frame::command(addr::ATTEN_APPLY, 1))?;
        Ok(())
    }

    pub fn set_trigger_enable(&mut self, mask: u32) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::TRIG_ENABLE, mask))
    }

    pub fn set_trigger_mask(&mut self, mask: u32) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::TRIG_MASK, mask))
    }

    pub fn set_trigger_polarization(&mut self, pol: u32) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::TRIG_POLARIZATION, pol))
    }

    pub fn set_trigger_holdoff(&mut self, ticks: u32) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::TRIG_HOLDOFF, ticks))
    }

    pub fn set_trigger_output_config(&mut self, cfg: u32) -> Result<(), DaqError> {
        self.master.write_register(addr::TRIG_OUTPUT_CONFIG, cfg)
    }

    pub fn set_external_input_config(&mut self, cfg: u32) -> Result<(), DaqError> {
        self.master.write_register(addr::EXT_INPUT_CONFIG, cfg)
    }

    pub fn set_dynamic_mask(&mut self, mask: u32, holdoff: u32) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::DYNAMIC_MASK, mask))?;
        self.synchronized_command(Frame::write(addr::DYNAMIC_HOLDOFF, holdoff))
    }

    pub fn set_pretrigger(&mut self, samples: u32) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::PRETRIGGER, samples))?;
        self.pretrigger_samples = samples * 8 * 16;
        Ok(())
    }

    pub fn set_buffer_length(&mut self, length: u32) -> Result<(), DaqError> {
        let length = length.min(beacon_daq_proto::MAX_BUFFER_LENGTH);
        self.buffer_length = length;
        Ok(())
    }

    pub fn set_trigger_vetos(&mut self, vetos: u32) -> Result<(), DaqError> {
        self.synchronized_command(Frame::write(addr::TRIG_VETOS, vetos))
    }

    pub fn set_veto_cuts(&mut self, low: u32, high: u32) -> Result<(), DaqError> {
        self.master.write_register(addr::VETO_CUT_LOW, low)?;
        self.master.write_register(addr::VETO_CUT_HIGH, high)
    }

    pub fn veto_status(&mut self) -> Result<u32, DaqError> {
        self.master.read_register(addr::VETO_STATUS)
    }

    pub fn veto_cuts(&mut self) -> Result<(u32, u32), DaqError> {
        let low = self.master.read_register(addr::VETO_CUT_LOW)?;
        let high = self.master.read_register(addr::VETO_CUT_HIGH)?;
        Ok((low, high))
    }

    /// Poll-update the on-board scaler accumulators, then read one back.
    pub fn update_scalers(&mut self) -> Result<(), DaqError> {
        self.master.write_register(addr::UPDATE_SCALERS, 1)
    }

    pub fn pick_scaler(&mut self, index: u32) -> Result<(), DaqError> {
        self.master.write_register(addr::PICK_SCALER, index)
    }

    pub fn scaler_read(&mut self) -> Result<u32, DaqError> {
        self.master.read_register(addr::SCALER_READ)
    }

    pub fn firmware_info(&mut self) -> Result<FirmwareInfo, DaqError> {
        let version = self.master.read_register(addr::FIRMWARE_VER)?;
        let date = self.master.read_register(addr::FIRMWARE_DATE)?;
        Ok(FirmwareInfo {
            is_master: (version >> 16) & 1 != 0,
            major: ((version >> 4) & 0xf) as u8,
            minor: (version & 0xf) as u8,
            date,
        })
    }

    pub fn chip_id(&mut self) -> Result<u64, DaqError> {
        let low = self.master.read_register(addr::CHIPID_LOW)?;
        let mid = self.master.read_register(addr::CHIPID_MID)?;
        let hi = self.master.read_register(addr::CHIPID_HI)?;
        Ok(join48(low, mid) | ((hi as u64) << 48))
    }

    /// Aggregate firmware/scaler/veto/attenuation state into one snapshot,
    /// the way the original's `dump_shared_hk` example did (minus the
    /// file/shared-memory persistence, which stays out of scope).
    pub fn read_housekeeping(&mut self) -> Result<Housekeeping, DaqError> {
        let firmware = self.firmware_info()?;
        let chip_id = self.chip_id()?;
        self.update_scalers()?;
        let mut scalers = Vec::with_capacity(beacon_daq_proto::NUM_CHANNELS);
        for i in 0..beacon_daq_proto::NUM_CHANNELS as u32 {
            self.pick_scaler(i)?;
            scalers.push(self.scaler_read()?);
        }
        let veto_status = self.veto_status()?;
        let veto_deadtime_counter = self.master.read_register(addr::VETO_DEADTIME_CTR)?;
        let atten_raw = [
            self.master.read_register(addr::ATTEN_012)?,
            self.master.read_register(addr::ATTEN_345)?,
            self.master.read_register(addr::ATTEN_67)?,
        ];
        let mut attenuations = [0u8; 8];
        for (i, slot) in attenuations.iter_mut().enumerate() {
            let word = atten_raw[i / 3];
            let shift = 8 * (i % 3);
            let mut byte = ((word >> shift) & 0xff) as u8;
            byte = beacon_daq_proto::bitrev::reverse_byte(byte);
            *slot = byte;
        }

        Ok(Housekeeping { firmware, chip_id, scalers, veto_status, veto_deadtime_counter, attenuations })
    }
}

#[cfg(test)]
mod tests {
    use beacon_daq_proto::NUM_BEAMS;

    use super::*;
    use crate::test_support::mock_device;

    #[test]
    fn attenuations_round_trip_through_bit_reversal() {
        let mut dev = mock_device();
        let values = [0u8, 1, 17, 63, 128, 200, 254, 255];
        dev.set_attenuations(&values).unwrap();

        let hk = dev.read_housekeeping().unwrap();
        assert_eq!(hk.attenuations, values);
    }

    #[test]
    fn thresholds_write_all_beams_in_one_burst() {
        let mut dev = mock_device();
        let thresholds = [42u32; NUM_BEAMS];
        let count = dev.set_thresholds(&thresholds).unwrap();
        assert_eq!(count, NUM_BEAMS);
        for beam in 0..NUM_BEAMS as u8 {
            assert_eq!(dev.master.transport.registers[addr::threshold(beam) as usize], 42);
        }
    }

    #[test]
    fn set_channel_mask_updates_both_boards_read_mask() {
        let mut dev = crate::test_support::mock_device_with_slave();
        dev.set_channel_mask(0x3c).unwrap();
        assert_eq!(dev.master.channel_read_mask, 0x3c);
        assert_eq!(dev.slave.as_ref().unwrap().channel_read_mask, 0x3c);
    }

    #[test]
    fn firmware_info_decodes_master_flag_and_version_nibbles() {
        let mut dev = mock_device();
        dev.master.transport.set_register(addr::FIRMWARE_VER, (1 << 16) | 0x37); // major 3, minor 7, master bit set
        let info = dev.firmware_info().unwrap();
        assert!(info.is_master);
        assert_eq!(info.major, 3);
        assert_eq!(info.minor, 7);
    }

    #[test]
    fn set_pretrigger_converts_samples_to_sample_count() {
        let mut dev = mock_device();
        dev.set_pretrigger(2).unwrap();
        assert_eq!(dev.pretrigger_samples, 2 * 8 * 16);
    }

    #[test]
    fn set_buffer_length_clamps_to_maximum() {
        let mut dev = mock_device();
        dev.set_buffer_length(beacon_daq_proto::MAX_BUFFER_LENGTH + 1000).unwrap();
        assert_eq!(dev.buffer_length, beacon_daq_proto::MAX_BUFFER_LENGTH);
    }
}
