//! Reset & calibration (C8): soft/hard reset sequences and ADC lane-delay
//! alignment using the internal calibration pulser.

use std::time::{Duration, SystemTime};

use beacon_daq_proto::{addr, Frame, MAX_CALIBRATION_MISERY, MAX_CALIBRATION_SPREAD, MIN_CALIBRATION_PEAK, NUM_CHANNELS};

use crate::device::Device;
use crate::diagnostics::TraceEntry;
use crate::error::{DaqError, WaitOutcome};
use crate::transport::Transport;

/// Reset severity, increasing.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum ResetKind {
    CountersOnly,
    Calibrate,
    AlmostGlobal,
    Global,
}

impl<T: Transport> Device<T> {
    /// Run a reset of the given severity. Always clears buffers and the
    /// read cursor and re-establishes `start_time`; runs ADC alignment when
    /// `kind >= Calibrate`; issues a full/almost-full hardware reset and a
    /// 20s settle sleep when `kind >= AlmostGlobal`.
    pub fn reset(&mut self, kind: ResetKind) -> Result<(), DaqError> {
        self.diagnostics.record(TraceEntry::Reset { kind: reset_kind_label(kind) });

        if kind >= ResetKind::AlmostGlobal {
            let payload = if kind == ResetKind::Global {
                beacon_daq_proto::addr::reset_payload::FULL
            } else {
                beacon_daq_proto::addr::reset_payload::ALMOST
            };
            self.synchronized_command(Frame::write(addr::RESET_ALL, payload))?;
            std::thread::sleep(Duration::from_secs(20));
            self.master.invalidate_cache();
            if let Some(slave) = &mut self.slave {
                slave.invalidate_cache();
            }
        }

        self.master.write_register(addr::PHASED_TRIGGER_READOUT, 0)?;
        self.synchronized_command(Frame::write(addr::CLEAR_BUFFERS, 0b1111))?;
        self.next_read_buffer = 0;

        let mut calibration_failed = false;
        if kind >= ResetKind::Calibrate {
            calibration_failed = self.calibrate_adc_lane_delays().is_err();
        }

        self.master.write_register(addr::TIMESTAMP_SELECT, 0)?;
        let before = SystemTime::now();
        self.synchronized_command(Frame::command(addr::RESET_COUNTER, 0))?;
        let after = SystemTime::now();
        self.start_time = before + after.duration_since(before).unwrap_or_default() / 2;

        if calibration_failed {
            return Err(DaqError::CalibrationFailed);
        }
        Ok(())
    }

    /// ADC lane-delay alignment: drive the internal calibration pulser,
    /// find each channel's peak sample index, and write the per-ADC-pair
    /// delay that lines the lanes up. Gives up after
    /// [`MAX_CALIBRATION_MISERY`] failed attempts without aborting the
    /// surrounding reset.
    fn calibrate_adc_lane_delays(&mut self) -> Result<(), DaqError> {
        let saved_buffer_length = self.buffer_length;
        let saved_pretrigger = self.pretrigger_samples;
        let saved_trig_enable = self.master.read_register(addr::TRIG_ENABLE)?;

        self.buffer_length = 1024;
        self.master.write_register(addr::TRIG_ENABLE, saved_trig_enable & !0x1)?; // disable beam trigger bit
        self.master.write_register(addr::CALPULSE, 1)?;

        let mut misery = 0u32;
        let mut accepted = false;
        while misery < MAX_CALIBRATION_MISERY {
            self.master.write_register(addr::FORCE_TRIGGER, 1)?;
            match self.wait(Duration::from_secs(1))? {
                WaitOutcome::Ready(_) => {}
                _ => {
                    misery += 1;
                    continue;
                }
            }

            let events = self.read_events()?;
            let Some(event) = events.into_iter().next() else {
                misery += 1;
                continue;
            };

            let peaks: Vec<i32> = (0..NUM_CHANNELS)
                .map(|ch| peak_index(&event.data[0].channels[ch]))
                .collect();
            let min_peak_value = min_peak_value(&event.data[0]);
            let min_idx = *peaks.iter().min().unwrap_or(&0);
            let max_idx = *peaks.iter().max().unwrap_or(&0);

            let ok = min_peak_value >= MIN_CALIBRATION_PEAK && (max_idx - min_idx) <= MAX_CALIBRATION_SPREAD;
            self.diagnostics.record(TraceEntry::Calibration { attempt: misery, accepted: ok });

            if ok {
                for adc in 0..(NUM_CHANNELS / 2) as u8 {
                    let a = peaks[2 * adc as usize];
                    let b = peaks[2 * adc as usize + 1];
                    let delay = ((a + b) / 2 - min_idx).clamp(0, 0xf) as u32;
                    // The delay+apply-bit byte is duplicated across b1 and
                    // b0, with b2 left zero.
                    let byte = (delay & 0xf) | (1 << 4);
                    let payload = (byte << 8) | byte;
                    self.master.write_register(addr::adc_delay(adc), payload)?;
                }
                accepted = true;
                break;
            }

            misery += 1;
            if misery >= 2 {
                self.synchronized_command(Frame::command(addr::ADC_CLOCK_RESET, 0))?;
            }
        }

        self.master.write_register(addr::CALPULSE, 0)?;
        self.buffer_length = saved_buffer_length;
        self.pretrigger_samples = saved_pretrigger;
        self.master.write_register(addr::TRIG_ENABLE, saved_trig_enable)?;
        self.synchronized_command(Frame::write(addr::CLEAR_BUFFERS, 0b1111))?;

        if accepted {
            Ok(())
        } else {
            log::error!("ADC lane-delay calibration exhausted {MAX_CALIBRATION_MISERY} attempts");
            Err(DaqError::CalibrationFailed)
        }
    }
}

fn peak_index(samples: &[u8]) -> i32 {
    samples.iter().enumerate().max_by_key(|(_, &v)| v).map(|(i, _)| i as i32).unwrap_or(0)
}

fn min_peak_value(waveforms: &crate::event::BoardWaveforms) -> i32 {
    waveforms
        .channels
        .iter()
        .filter_map(|channel| channel.iter().max())
        .map(|&v| v as i32)
        .min()
        .unwrap_or(0)
}

fn reset_kind_label(kind: ResetKind) -> &'static str {
    match kind {
        ResetKind::CountersOnly => "counters_only",
        ResetKind::Calibrate => "calibrate",
        ResetKind::AlmostGlobal => "almost_global",
        ResetKind::Global => "global",
    }
}
