//! Opens a board pair, prints a housekeeping snapshot, then optionally
//! waits for triggered events until interrupted.

use std::time::Duration;

use anyhow::Context;
use beacon_daq::{OpenOptions, WaitOutcome};
use clap::Parser;

#[derive(Parser)]
#[command(about = "Dump housekeeping state for a digitizer board pair")]
struct Args {
    /// SPI device node for the master board.
    #[arg(long)]
    master: String,

    /// SPI device node for the slave board, if present.
    #[arg(long)]
    slave: Option<String>,

    /// GPIO chip for the power-enable line.
    #[arg(long)]
    gpio_chip: Option<String>,

    /// GPIO line offset on `gpio_chip` for the power-enable line.
    #[arg(long)]
    gpio_line: Option<u32>,

    /// After printing housekeeping, wait this many seconds for a triggered
    /// event before exiting (0 = don't wait).
    #[arg(long, default_value_t = 0)]
    wait_secs: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut builder = OpenOptions::new(&args.master);
    if let Some(slave) = &args.slave {
        builder = builder.slave_path(slave);
    }
    if let (Some(chip), Some(line)) = (&args.gpio_chip, args.gpio_line) {
        builder = builder.gpio(chip, line);
    }

    let mut device = builder.open().context("opening board pair")?;

    let hk = device.read_housekeeping().context("reading housekeeping")?;
    println!("firmware: master={} v{}.{} ({:#x})", hk.firmware.is_master, hk.firmware.major, hk.firmware.minor, hk.firmware.date);
    println!("chip id: {:#018x}", hk.chip_id);
    println!("scalers: {:?}", hk.scalers);
    println!("veto status: {:#x} (deadtime {})", hk.veto_status, hk.veto_deadtime_counter);
    println!("attenuations: {:?}", hk.attenuations);

    if args.wait_secs > 0 {
        let cancel = device.cancel_handle();
        ctrlc::set_handler(move || cancel.store(true, std::sync::atomic::Ordering::SeqCst))
            .context("installing Ctrl-C handler")?;

        match device.wait(Duration::from_secs(args.wait_secs))? {
            WaitOutcome::Ready(mask) => {
                println!("ready mask {mask:#06b}, reading out");
                let events = device.read_events()?;
                for event in events {
                    println!(
                        "event {} buffer {} sync_problem {:#06b}",
                        event.header.event_number, event.header.buffer_number, event.header.sync_problem
                    );
                }
            }
            other => println!("wait ended: {other:?}"),
        }
    }

    Ok(())
}
