//! End-to-end exercises against the public `Device` API and the mock
//! transport, covering scenarios that span lifecycle, wait/cancel, and
//! readout together rather than one module in isolation.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use beacon_daq::transport::mock::MockTransport;
use beacon_daq::{Device, WaitOutcome};
use beacon_daq_proto::{addr, NUM_CHUNKS};

fn open_master() -> Device<MockTransport> {
    let mut master = MockTransport::new();
    master.set_register(addr::FIRMWARE_VER, 1 << 16);
    Device::for_testing(master, None).unwrap()
}

/// Script `sample`'s 4 bytes as the response to every waveform-chunk
/// readout the master board will perform for `enabled_channels` channels of
/// `buffer_length` samples.
fn queue_waveform(dev: &mut Device<MockTransport>, enabled_channels: u32, buffer_length: u32, sample: u32) {
    let bytes_per_address = NUM_CHUNKS as u32 * 4;
    let addrs = buffer_length.div_ceil(bytes_per_address);
    let reads_per_chunk = enabled_channels * addrs;
    for chunk in 0..NUM_CHUNKS as u8 {
        for _ in 0..reads_per_chunk {
            dev.master_transport_mut().queue_read(addr::chunk_select(chunk), sample);
        }
    }
}

/// S4: a wait blocked forever is preempted by another thread calling
/// `cancel_wait`, and a subsequent wait still succeeds normally.
#[test]
fn s4_cancelled_wait_unblocks_promptly_and_does_not_poison_future_waits() {
    let mut dev = open_master();
    let cancel = dev.cancel_handle();

    let started = std::time::Instant::now();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::SeqCst);
    });

    let outcome = dev.wait(Duration::from_secs(0)).unwrap();
    assert_eq!(outcome, WaitOutcome::Cancelled);
    assert!(started.elapsed() < Duration::from_millis(200), "cancellation took too long to be observed");

    // The waiter flag must have been released; a fresh wait against an
    // already-ready buffer succeeds immediately rather than reporting Busy.
    dev.master_transport_mut().set_register(addr::STATUS, 0b0001);
    let second = dev.wait(Duration::from_millis(50)).unwrap();
    assert_eq!(second, WaitOutcome::Ready(0b0001));
}

/// A full open -> configure -> wait -> read-out -> housekeeping cycle against
/// the mock transport, exercising the public API end to end.
#[test]
fn full_lifecycle_configure_wait_and_read_one_event() {
    let mut dev = open_master();
    dev.set_channel_mask(0x0f).unwrap();
    dev.set_buffer_length(64).unwrap();
    dev.set_pretrigger(2).unwrap();

    dev.master_transport_mut().set_register(addr::STATUS, 0b0001 | (1 << 12));
    dev.master_transport_mut().set_register(addr::EVENT_COUNTER_LOW, 1);
    dev.master_transport_mut().set_register(addr::TRIG_COUNTER_LOW, 3);
    dev.master_transport_mut().set_register(addr::TRIG_TIME_LOW, 0);
    dev.master_transport_mut().set_register(addr::TRIG_INFO, 2 << 17); // pretrig_window = 2
    queue_waveform(&mut dev, 4, 64, 0x0a0b_0c0d);

    let outcome = dev.wait(Duration::from_millis(50)).unwrap();
    assert_eq!(outcome, WaitOutcome::Ready(0b0001));

    let events = dev.read_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].header.pretrigger_samples, 2 * 8 * 16);
    assert_eq!(events[0].data[0].channels[0][0], 0x0a);

    let hk = dev.read_housekeeping().unwrap();
    assert!(hk.firmware.is_master);
}
