pub mod controller;
pub mod processor;
pub mod queue;
pub mod readout;
pub mod save;
pub mod stats;

use anyhow::{Context, Result};
use argh::FromArgs;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tdctools::cfg::RunConfig;

#[derive(Debug, FromArgs, Clone)]
/// Reads a GPX2 time-to-digital converter and streams the time differences
/// of coincident stops on its two stop streams
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// run file (JSON)
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,
    /// coincidence window in seconds
    #[argh(option)]
    pub max_interval: Option<f64>,
    /// queue depth that triggers correlation
    #[argh(option)]
    pub max_queue_size: Option<usize>,
    /// use a simulated chip instead of the hardware
    #[argh(switch, short = 's')]
    pub simulate: bool,
    /// prefix each event with its capture timestamp in ns
    #[argh(switch, short = 't')]
    pub timestamps: bool,
    /// stop after this long, e.g. "30s" (default: run until stdin closes)
    #[argh(option, short = 'd')]
    pub duration: Option<humantime::Duration>,
    /// write events to this file instead of stdout
    #[argh(option, short = 'o')]
    pub output: Option<PathBuf>,
    /// also record every measurement to this file
    #[argh(option)]
    pub dump: Option<PathBuf>,
}

/// Load the run file, if any, and apply command line overrides
pub fn run_config(args: &CliArgs) -> Result<RunConfig> {
    let mut run: RunConfig = match &args.config {
        Some(path) => {
            let f = File::open(path)
                .with_context(|| format!("opening run file {}", path.display()))?;
            serde_json::from_reader(BufReader::new(f))
                .with_context(|| format!("parsing run file {}", path.display()))?
        }
        None => RunConfig::default(),
    };
    if let Some(x) = args.max_interval {
        run.max_interval = x;
    }
    if let Some(x) = args.max_queue_size {
        run.max_queue_size = x;
    }
    if let Some(d) = args.duration {
        run.limit = Some(d.into());
    }
    if args.timestamps {
        run.print_timestamps = true;
    }
    if args.output.is_some() {
        run.output = args.output.clone();
    }
    if args.dump.is_some() {
        run.dump = args.dump.clone();
    }
    run.validate()?;
    Ok(run)
}
