//! `correlate [INPUT] [--max-interval SECONDS] [--timestamps]`
//!
//! Run the coincidence matching of the readout daemon offline, over a
//! measurement dump in tab-separated values. Stops 0 and 2 form one
//! stream, stops 1 and 3 the other; the whole file is matched in a
//! single pass. Time differences are written to stdout, one per line.

use tdctools::{de, pat, ser, Meas, Stream};

use anyhow::Result;
use std::io::{stdin, stdout};

const GIT_VERSION: &str = git_version::git_version!(fallback = "unknown");

#[derive(Debug, argh::FromArgs, Clone)]
/// match the two stop streams of a measurement dump
pub struct CliArgs {
    /// print version information
    #[argh(switch, short = 'v')]
    pub version: bool,
    /// measurement dump path (default: stdin)
    #[argh(positional)]
    pub input: Option<String>,
    /// coincidence window in seconds
    #[argh(option, default = "1e-7")]
    pub max_interval: f64,
    /// prefix each line with the capture timestamp in ns
    #[argh(switch, short = 't')]
    pub timestamps: bool,
}

fn main() -> Result<()> {
    let args: CliArgs = argh::from_env();

    if args.version {
        println!(concat!(env!("CARGO_BIN_NAME"), " ", "{}"), GIT_VERSION);
        return Ok(());
    }

    let meas = match &args.input {
        Some(path) => {
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_path(path)?;
            de::measurements_tsv(&mut rdr)?
        }
        None => {
            let input = stdin();
            let input = input.lock();
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_reader(input);
            de::measurements_tsv(&mut rdr)?
        }
    };

    let (mut a, mut b): (Vec<Meas>, Vec<Meas>) =
        meas.into_iter().partition(|m| m.stop_channel.stream() == Stream::A);
    pat::prepare(&mut a);
    pat::prepare(&mut b);
    let c = pat::coincidences(&a, &b, args.max_interval);

    let stdout = stdout();
    let stdout = stdout.lock();
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .from_writer(stdout);
    ser::events_tsv(&mut wtr, &c.events, args.timestamps)?;
    wtr.flush()?;

    eprintln!(
        "{} events, {} unpaired stops dropped, {} pairs outside window",
        c.events.len(),
        c.dropped,
        c.rejected,
    );
    Ok(())
}
