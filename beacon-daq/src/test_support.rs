//! Shared mock-device helpers for unit tests across this crate.

use beacon_daq_proto::addr;

use crate::device::Device;
use crate::transport::mock::MockTransport;

fn master_transport() -> MockTransport {
    let mut t = MockTransport::new();
    t.set_register(addr::FIRMWARE_VER, 1 << 16);
    t
}

fn slave_transport() -> MockTransport {
    let mut t = MockTransport::new();
    t.set_register(addr::FIRMWARE_VER, 0);
    t
}

pub fn mock_device() -> Device<MockTransport> {
    Device::for_testing(master_transport(), None).unwrap()
}

pub fn mock_device_with_slave() -> Device<MockTransport> {
    Device::for_testing(master_transport(), Some(slave_transport())).unwrap()
}
