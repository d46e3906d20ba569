//! Buffer-ready tracker (C5): reads `STATUS` and extracts the ready mask and
//! hardware next-free hint. Never trusts a cache — every call re-reads the
//! device.

use beacon_daq_proto::addr;

use crate::device::Device;
use crate::error::DaqError;
use crate::transport::Transport;

/// The four-bit ready mask plus the two-bit hardware next-free hint, as
/// reported by `STATUS` right now.
#[derive(Copy, Clone, Debug)]
pub struct BufferStatus {
    pub ready_mask: u8,
    pub hw_next: u8,
}

impl<T: Transport> Device<T> {
    /// Read `STATUS` fresh from the master board.
    pub fn buffer_status(&mut self) -> Result<BufferStatus, DaqError> {
        let payload = self.master.read_register(addr::STATUS)?;
        // Ready mask is the low nibble of b0; hw-next is bits 4-5 of b1.
        Ok(BufferStatus { ready_mask: (payload & 0x0f) as u8, hw_next: ((payload >> 12) & 0x3) as u8 })
    }
}

#[cfg(test)]
mod tests {
    use beacon_daq_proto::addr;

    use crate::test_support::mock_device;

    #[test]
    fn extracts_ready_mask_and_hw_next_from_separate_bit_fields() {
        let mut dev = mock_device();
        dev.master.transport.set_register(addr::STATUS, 0b1010 | (0b10 << 12));
        let status = dev.buffer_status().unwrap();
        assert_eq!(status.ready_mask, 0b1010);
        assert_eq!(status.hw_next, 0b10);
    }

    #[test]
    fn always_re_reads_rather_than_caching() {
        let mut dev = mock_device();
        dev.master.transport.set_register(addr::STATUS, 0b0001);
        assert_eq!(dev.buffer_status().unwrap().ready_mask, 0b0001);
        dev.master.transport.set_register(addr::STATUS, 0b1000);
        assert_eq!(dev.buffer_status().unwrap().ready_mask, 0b1000);
    }
}
