//! Synchronized command (C4): issue an identical command to master and
//! slave bracketed by master's `SYNC` line so both boards act on the same
//! clock edge.

use beacon_daq_proto::{addr, Frame};

use crate::device::Device;
use crate::diagnostics::TraceEntry;
use crate::error::DaqError;
use crate::transport::Transport;

impl<T: Transport> Device<T> {
    /// Issue `frame` to both boards on the same clock edge (when a slave is
    /// present) by wrapping the slave's copy in master's `SYNC_ON`/`SYNC_OFF`.
    /// Degenerates to a single master write when there is no slave. Holds
    /// the bus mutex for the whole sequence.
    pub fn synchronized_command(&mut self, frame: Frame) -> Result<(), DaqError> {
        // Held for the whole sequence: a synchronized command must not
        // interleave with another transaction on this handle.
        let _guard = self.bus_lock.as_ref().map(|l| l.lock().unwrap_or_else(|e| e.into_inner()));

        self.diagnostics.record(TraceEntry::SyncCommand { opcode: frame.addr });
        if let Some(slave) = &mut self.slave {
            self.master.write_register(addr::SYNC, 1)?;
            slave.write_register(frame.addr, frame.payload24())?;
            self.master.write_register(frame.addr, frame.payload24())?;
            self.master.write_register(addr::SYNC, 0)?;
        } else {
            self.master.write_register(frame.addr, frame.payload24())?;
        }
        Ok(())
    }

    /// Like [`Device::synchronized_command`], but additionally reads
    /// `verify_addr` back from each present board afterward and returns the
    /// pair of values (master, slave) for the caller to compare against
    /// what it wrote.
    pub fn synchronized_command_verify(&mut self, frame: Frame, verify_addr: u8) -> Result<(u32, Option<u32>), DaqError> {
        self.synchronized_command(frame)?;
        let master_value = self.master.read_register(verify_addr)?;
        let slave_value = match &mut self.slave {
            Some(slave) => Some(slave.read_register(verify_addr)?),
            None => None,
        };
        Ok((master_value, slave_value))
    }
}

#[cfg(test)]
mod tests {
    use beacon_daq_proto::addr;

    use super::*;
    use crate::test_support::mock_device_with_slave;

    #[test]
    fn ordering_is_sync_on_slave_master_sync_off() {
        let mut dev = mock_device_with_slave();
        dev.master.transport.written.clear();
        dev.slave.as_mut().unwrap().transport.written.clear();

        dev.synchronized_command(Frame::command(addr::FORCE_TRIGGER, 1)).unwrap();

        let master_writes: Vec<u8> = dev.master.transport.written.iter().map(|f| f.addr).collect();
        assert_eq!(master_writes, vec![addr::SYNC, addr::FORCE_TRIGGER, addr::SYNC]);
        // Two SYNC writes: the first with payload 1 (on), the second with 0 (off).
        let sync_payloads: Vec<u32> = dev
            .master
            .transport
            .written
            .iter()
            .filter(|f| f.addr == addr::SYNC)
            .map(|f| f.payload24())
            .collect();
        assert_eq!(sync_payloads, vec![1, 0]);

        let slave_writes: Vec<u8> = dev.slave.as_mut().unwrap().transport.written.iter().map(|f| f.addr).collect();
        assert_eq!(slave_writes, vec![addr::FORCE_TRIGGER]);
    }
}
