//! Bring-up and orderly shutdown of the readout threads

use anyhow::{anyhow, Context, Result};
use gpx2::{BusTransport, Config, Gpx2, InterruptLine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tdctools::cfg::RunConfig;

use crate::processor::CorrelationEngine;
use crate::queue::Queues;
use crate::save::SaveHandle;
use crate::stats::{Stats, Summary};
use crate::controller;

#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

/// Chip configuration for a run: the operating configuration with the
/// run file's overrides applied
pub fn chip_config(run: &RunConfig) -> Config {
    let mut config = Config::recommended();
    if let Some(s) = &run.chip {
        config.apply(s);
    }
    config
}

/// A running readout: acquisition thread, correlation thread and writer
pub struct Readout {
    stop: Arc<AtomicBool>,
    finish: Arc<AtomicBool>,
    queues: Arc<Queues>,
    stats: Arc<Stats>,
    acquisition: JoinHandle<Result<()>>,
    correlation: JoinHandle<Result<()>>,
    writer: JoinHandle<Result<u64>>,
}

impl Readout {
    /// Reset and configure the chip, verify the configuration, start
    /// measuring, and start the threads.
    ///
    /// Any failure before measurement starts is returned and no thread
    /// is left running except the writer, which exits once `save` is
    /// dropped.
    pub fn start<B, L>(mut chip: Gpx2<B>, line: L, run: &RunConfig, save: SaveHandle) -> Result<Self>
    where
        B: BusTransport + Send + 'static,
        L: InterruptLine + Send + 'static,
    {
        run.validate()?;
        let config = chip_config(run);
        chip.power_on_reset().context("power-on reset")?;
        chip.write_and_verify(config).context("configuring chip")?;
        chip.init_reset().context("starting measurement")?;
        info!(
            "chip configured: {:?} enabled, {} ps LSB",
            config.enabled_stops(),
            config.lsb_ps(),
        );

        let SaveHandle { sender, join_handle: writer } = save;
        let queues = Queues::new();
        let stats = Arc::new(Stats::new());
        let stop = Arc::new(AtomicBool::new(false));
        let finish = Arc::new(AtomicBool::new(false));

        let engine = CorrelationEngine::new(
            queues.clone(),
            stats.clone(),
            sender,
            run.max_interval,
            run.max_queue_size,
        )
        .with_dump(run.dump.is_some());
        let tick = run.tick;
        let correlation = {
            let finish = finish.clone();
            thread::Builder::new()
                .name(String::from("correlation"))
                .spawn(move || engine.run(tick, finish))?
        };

        let edge_timeout = run.edge_timeout;
        let spawned = {
            let (queues, stats, stop) = (queues.clone(), stats.clone(), stop.clone());
            thread::Builder::new()
                .name(String::from("acquisition"))
                .spawn(move || controller::main(chip, line, queues, stats, stop, edge_timeout))
        };
        let acquisition = match spawned {
            Ok(h) => h,
            Err(e) => {
                finish.store(true, Ordering::Release);
                queues.notifier.notify();
                return Err(e).context("starting acquisition thread");
            }
        };

        Ok(Readout { stop, finish, queues, stats, acquisition, correlation, writer })
    }

    pub fn stats(&self) -> Summary {
        self.stats.summary()
    }

    pub fn queues(&self) -> &Arc<Queues> {
        &self.queues
    }

    /// Whether the acquisition thread has exited on its own
    pub fn stalled(&self) -> bool {
        self.acquisition.is_finished()
    }

    /// Stop acquisition, run the final drain, flush the output, and
    /// return the counters of the whole run.
    pub fn stop(self) -> Result<Summary> {
        self.stop.store(true, Ordering::Release);
        let acquired = join("acquisition", self.acquisition);

        self.finish.store(true, Ordering::Release);
        self.queues.notifier.notify();
        let correlated = join("correlation", self.correlation);

        // The engine held the last sender, so the writer sees the end of
        // the stream once the correlation thread is gone
        let written = join("writer", self.writer);

        acquired?;
        correlated?;
        let written = written?;
        let summary = self.stats.summary();
        debug!("{} events written", written);
        Ok(summary)
    }
}

fn join<T>(name: &str, handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{} thread panicked", name))?
        .with_context(|| format!("{} thread", name))
}
