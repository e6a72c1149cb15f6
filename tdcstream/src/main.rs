use anyhow::Result;
use gpx2::sim::{SimChip, SimParams};
use gpx2::{BusRegistry, Gpx2};
use std::io::{self, Read};
use std::thread;
use tdcstream::readout::{chip_config, Readout};
use tdcstream::save::SaveHandle;
use tdcstream::{run_config, CliArgs};
use tdctools::cfg::RunConfig;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();

    if args.version {
        println!(concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION);
        return Ok(());
    }

    // stdout carries the events only
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let run = run_config(&args)?;
    info!("{} {} starting{}", env!("CARGO_BIN_NAME"), GIT_VERSION, if run.name.is_empty() {
        String::new()
    } else {
        format!(" run {}", run.name)
    });

    let save = SaveHandle::new(run.output.clone(), run.dump.clone(), run.print_timestamps)?;
    let registry = BusRegistry::new();

    let readout = if args.simulate {
        let (mut bus, line) = SimChip::new(SimParams {
            refclk_freq: chip_config(&run).refclk_freq,
            ..Default::default()
        });
        bus.register(&registry);
        Readout::start(Gpx2::new(bus), line, &run, save)
    } else {
        start_hardware(&run, &registry, save)
    };
    let readout = match readout {
        Ok(r) => r,
        Err(e) => {
            error!("{:#}", e);
            return Err(e);
        }
    };

    wait_for_end(&run);

    if readout.stalled() {
        warn!("acquisition ended early");
    }
    let summary = readout.stop()?;
    let (written, read) = registry.totals();
    info!("{}", summary);
    debug!("bus traffic: {} bytes out, {} bytes in", written, read);
    Ok(())
}

/// Block until the run limit elapses, or stdin closes if there is none
fn wait_for_end(run: &RunConfig) {
    let (tx, rx) = flume::bounded::<()>(1);
    thread::spawn(move || {
        let mut sink = Vec::new();
        let _ = io::stdin().lock().read_to_end(&mut sink);
        let _ = tx.send(());
    });
    match run.limit {
        Some(limit) => {
            info!("running for {}", humantime::format_duration(limit));
            let _ = rx.recv_timeout(limit);
        }
        None => {
            info!("running until stdin closes");
            let _ = rx.recv();
        }
    }
}

#[cfg(feature = "hardware")]
fn start_hardware(run: &RunConfig, registry: &BusRegistry, save: SaveHandle) -> Result<Readout> {
    use anyhow::Context;
    use gpx2::linux::{GpioLine, SpidevBus};
    let bus = SpidevBus::open(&run.spi_device, run.spi_speed_hz, Some(registry))
        .context("opening chip")?;
    let line = GpioLine::open(&run.gpio_chip, run.interrupt_pin).context("opening interrupt line")?;
    Readout::start(Gpx2::new(bus), line, run, save)
}

#[cfg(not(feature = "hardware"))]
fn start_hardware(_run: &RunConfig, _registry: &BusRegistry, _save: SaveHandle) -> Result<Readout> {
    anyhow::bail!("built without the `hardware` feature, use --simulate")
}
