use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use tdctools::pat::CorrelatedEvent;
use tdctools::{ser, Meas};

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

pub type Sink = Box<dyn Write + Send>;

pub enum SaveMessage {
    /// Correlated events of one drain, in emission order
    Events(Vec<CorrelatedEvent>),
    /// Measurements of one drain, before matching
    Measurements(Vec<Meas>),
}

/// Writer thread for the output stream and the optional measurement dump.
///
/// Messages are written in the order they are sent. The thread exits
/// once every sender is dropped, returning the number of events written.
pub struct SaveHandle {
    pub sender: flume::Sender<SaveMessage>,
    pub join_handle: thread::JoinHandle<Result<u64>>,
}

impl SaveHandle {
    /// Write events to `output` (stdout if `None`) and measurements to `dump`
    pub fn new(output: Option<PathBuf>, dump: Option<PathBuf>, with_timestamp: bool) -> Result<Self> {
        let out: Sink = match output {
            Some(p) => Box::new(BufWriter::new(create_file(p)?)),
            None => Box::new(io::stdout()),
        };
        let dump = match dump {
            Some(p) => Some(Box::new(BufWriter::new(create_file(p)?)) as Sink),
            None => None,
        };
        Ok(Self::with_writers(out, dump, with_timestamp))
    }

    pub fn with_writers(mut out: Sink, dump: Option<Sink>, with_timestamp: bool) -> Self {
        let (sender, receiver) = flume::unbounded();
        let mut dump = dump.map(|w| {
            csv::WriterBuilder::new()
                .has_headers(false)
                .delimiter(b'\t')
                .from_writer(w)
        });

        let join_handle = thread::spawn(move || -> Result<u64> {
            let mut written = 0u64;
            while let Ok(msg) = receiver.recv() {
                match msg {
                    SaveMessage::Events(events) => {
                        for event in events.iter() {
                            writeln!(out, "{}", ser::event_line(event, with_timestamp))
                                .context("writing events")?;
                        }
                        out.flush().context("writing events")?;
                        written += events.len() as u64;
                    }
                    SaveMessage::Measurements(meas) => {
                        if let Some(w) = dump.as_mut() {
                            ser::measurements_tsv(w, &meas).context("writing measurement dump")?;
                            w.flush().context("writing measurement dump")?;
                        }
                    }
                }
            }
            debug!("writer done after {} events", written);
            Ok(written)
        });

        SaveHandle { sender, join_handle }
    }
}

fn create_file(path: PathBuf) -> Result<fs::File> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    fs::File::create(&path).with_context(|| format!("creating {}", path.display()))
}
