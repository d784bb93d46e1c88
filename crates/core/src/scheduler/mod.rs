use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, warn};

use crate::Result;

/// Fixed-rate worker that runs a tick callback on its own thread.
///
/// The first tick fires immediately. Ticks never overlap since a single
/// thread runs them. A late tick pushes the schedule back instead of
/// bursting to catch up. [`TickLoop::stop`] sends a stop request and joins
/// the thread, so an in-flight tick has finished when it returns.
pub struct TickLoop {
    name: String,
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
    ticks: Arc<AtomicU64>,
}

impl TickLoop {
    pub fn spawn<F>(name: impl Into<String>, period: Duration, tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ticks);

        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_ticks(period, stop_rx, counter, tick))?;

        debug!(name = %name, period_ms = period.as_millis() as u64, "tick loop started");
        Ok(Self {
            name,
            stop_tx,
            join: Some(join),
            ticks,
        })
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels the loop and waits for the worker thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let _ = self.stop_tx.try_send(());
        if join.join().is_err() {
            warn!(name = %self.name, "tick loop thread panicked");
        }
        debug!(name = %self.name, ticks = self.ticks(), "tick loop stopped");
    }
}

impl Drop for TickLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TickLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickLoop")
            .field("name", &self.name)
            .field("ticks", &self.ticks())
            .finish()
    }
}

fn run_ticks<F>(period: Duration, stop_rx: Receiver<()>, ticks: Arc<AtomicU64>, mut tick: F)
where
    F: FnMut(),
{
    let mut deadline = Instant::now();
    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => break,
            recv(crossbeam_channel::at(deadline)) -> _ => {
                // Both arms can be ready at once; stop wins.
                if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                tick();
                ticks.fetch_add(1, Ordering::AcqRel);

                deadline += period;
                let now = Instant::now();
                if deadline < now {
                    deadline = now;
                }
            }
        }
    }
}
