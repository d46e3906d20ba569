//! Register address map for the digitizer board.
//!
//! Addresses are a single byte. A handful of register families are indexed
//! (per-ADC delay, per-beam threshold, chunk select) and are exposed as
//! small `const fn`s rather than enum variants.

/// Firmware version. Byte 1 bit 0 = master flag; byte 3 upper nibble = major,
/// lower nibble = minor.
pub const FIRMWARE_VER: u8 = 0x01;
pub const FIRMWARE_DATE: u8 = 0x02;
pub const SCALER_READ: u8 = 0x03;
pub const CHIPID_LOW: u8 = 0x04;
pub const CHIPID_MID: u8 = 0x05;
pub const CHIPID_HI: u8 = 0x06;
/// Byte 3 low nibble = buffer ready mask, byte 2 bits 4-5 = hw-next.
pub const STATUS: u8 = 0x07;
pub const CLEAR_STATUS: u8 = 0x09;
pub const EVENT_COUNTER_LOW: u8 = 0x0a;
pub const EVENT_COUNTER_HIGH: u8 = 0x0b;
pub const TRIG_COUNTER_LOW: u8 = 0x0c;
pub const TRIG_COUNTER_HIGH: u8 = 0x0d;
pub const TRIG_TIME_LOW: u8 = 0x0e;
pub const TRIG_TIME_HIGH: u8 = 0x0f;
pub const DEADTIME: u8 = 0x10;
/// Bits 22-23 = hw buffer index, bit 21 = calpulser flag, bits 17-19 =
/// pretrig window, bits 15-16 = trig type, bits 0-3 = trig polarization.
pub const TRIG_INFO: u8 = 0x11;
pub const CH_MASKS: u8 = 0x12;
pub const LAST_BEAM: u8 = 0x14;
pub const TRIG_BEAM_POWER: u8 = 0x15;
pub const PPS_COUNTER: u8 = 0x16;
pub const HD_DYN_MASK: u8 = 0x17;
pub const USER_MASK: u8 = 0x18;
pub const VETO_DEADTIME_CTR: u8 = 0x19;
pub const VETO_STATUS: u8 = 0x21;
pub const STATUS_DYN_MASK: u8 = 0x22;
const CHUNK_SELECT_BASE: u8 = 0x23;
pub const SYNC: u8 = 0x27;
pub const UPDATE_SCALERS: u8 = 0x28;
pub const PICK_SCALER: u8 = 0x29;
pub const CALPULSE: u8 = 0x2a;
pub const LATCHED_PPS_LOW: u8 = 0x2c;
pub const LATCHED_PPS_HIGH: u8 = 0x2d;
pub const CHANNEL_MASK: u8 = 0x30;
pub const ATTEN_012: u8 = 0x32;
pub const ATTEN_345: u8 = 0x33;
pub const ATTEN_67: u8 = 0x34;
pub const ATTEN_APPLY: u8 = 0x35;
pub const ADC_CLOCK_RESET: u8 = 0x37;
const ADC_DELAY_BASE: u8 = 0x38;
const TRIG_DELAY_BASE: u8 = 0x3d;
pub const FORCE_TRIGGER: u8 = 0x40;
pub const CHANNEL_SELECT: u8 = 0x41;
pub const MODE: u8 = 0x42;
pub const RAM_ADDRESS: u8 = 0x45;
pub const READ: u8 = 0x47;
pub const EXT_INPUT_CONFIG: u8 = 0x4b;
pub const PRETRIGGER: u8 = 0x4c;
pub const CLEAR_BUFFERS: u8 = 0x4d;
pub const BUFFER_SELECT: u8 = 0x4e;
pub const TRIG_POLARIZATION: u8 = 0x4f;
pub const TRIG_MASK: u8 = 0x50;
pub const TRIG_HOLDOFF: u8 = 0x51;
pub const TRIG_ENABLE: u8 = 0x52;
pub const TRIG_OUTPUT_CONFIG: u8 = 0x53;
pub const PHASED_TRIGGER_READOUT: u8 = 0x54;
pub const VERIFICATION_MODE: u8 = 0x55;
pub const TIMESTAMP_SELECT: u8 = 0x58;
pub const TRIG_LOW_PASS: u8 = 0x5a;
pub const DYNAMIC_MASK: u8 = 0x5d;
pub const DYNAMIC_HOLDOFF: u8 = 0x5e;
pub const TRIG_VETOS: u8 = 0x5f;
pub const VETO_CUT_LOW: u8 = 0x60;
pub const VETO_CUT_HIGH: u8 = 0x61;
pub const SET_READ_REG: u8 = 0x6d;
pub const RESET_COUNTER: u8 = 0x7e;
pub const RESET_ALL: u8 = 0x7f;
const THRESHOLDS_BASE: u8 = 0x81;

/// `0x23+i`: select chunk `i` (`i < NUM_CHUNKS`) for waveform readout.
pub const fn chunk_select(chunk: u8) -> u8 {
    CHUNK_SELECT_BASE + chunk
}

/// `0x38+i`: per-ADC-pair lane delay register, `i < NUM_CHANNELS / 2`.
pub const fn adc_delay(adc: u8) -> u8 {
    ADC_DELAY_BASE + adc
}

/// `0x3d..0x3f`: per-channel-group trigger delay.
pub const fn trig_delay(group: u8) -> u8 {
    TRIG_DELAY_BASE + group
}

/// `0x81+beam`: per-beam threshold register, `beam < NUM_BEAMS`.
pub const fn threshold(beam: u8) -> u8 {
    THRESHOLDS_BASE + beam
}

/// Payload for `0x7f` reset-all: 1 = full reset, 2 = almost-full reset.
pub mod reset_payload {
    pub const FULL: u32 = 1;
    pub const ALMOST: u32 = 2;
}
