//! Settings-driven lifecycle of the enhancement chain.
//!
//! The orchestrator runs a small state machine on its own worker thread:
//!
//! ```text
//! Idle --change--> SettlingDown --delay--> Reconfiguring --> Active | Idle
//! Active --change--> SettlingDown
//! any --shutdown--> Idle (worker exits)
//! ```
//!
//! Configuration-change notifications only enqueue a signal, so the thread
//! delivering them is never blocked by the settle delay. Changes arriving
//! while a settle delay is pending fold into that same pass.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::EngineConfig,
    controller::EffectsController,
    effects::{EffectSinkFactory, SessionId},
    host::{ConfigurationSource, EffectiveSettings, PlaybackControl, VolumeSource},
    EnhancementMode, Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    SettlingDown,
    Reconfiguring,
    Active,
}

/// Flags describing the live enhancement chain.
///
/// `tick_running` implies `equalizer_initialized`, which implies `enabled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EnhancementState {
    pub enabled: bool,
    pub mode: EnhancementMode,
    pub equalizer_initialized: bool,
    pub tick_running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OrchestratorStatus {
    pub phase: Phase,
    pub state: EnhancementState,
    /// Completed reconfiguration passes.
    pub reconfigurations: u64,
}

/// Host services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub volume: Arc<dyn VolumeSource>,
    pub configuration: Arc<dyn ConfigurationSource>,
    pub playback: Arc<dyn PlaybackControl>,
    pub sinks: Arc<dyn EffectSinkFactory>,
}

enum Signal {
    ConfigurationChanged,
    Shutdown,
}

enum Wake {
    Signal(Option<Signal>),
    Settled,
}

pub struct EnhancementOrchestrator {
    signal_tx: Sender<Signal>,
    status: Arc<Mutex<OrchestratorStatus>>,
    configuration: Arc<dyn ConfigurationSource>,
    started: AtomicBool,
    worker: Option<JoinHandle<()>>,
}

impl EnhancementOrchestrator {
    /// Spawns the orchestrator worker in the idle phase.
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let (signal_tx, signal_rx) = crossbeam_channel::unbounded();
        let status = Arc::new(Mutex::new(OrchestratorStatus::default()));
        let configuration = Arc::clone(&collaborators.configuration);

        let worker = Worker {
            session_id: config.session_id,
            settle_delay: config.settle_delay(),
            controller: EffectsController::new(
                collaborators.sinks,
                collaborators.volume,
                config.tick_interval(),
            ),
            configuration: collaborators.configuration,
            playback: collaborators.playback,
            status: Arc::clone(&status),
        };
        let join = std::thread::Builder::new()
            .name("adaptive-sound-orchestrator".to_string())
            .spawn(move || worker.run(signal_rx))?;

        info!(session = %config.session_id, "enhancement orchestrator started");
        Ok(Self {
            signal_tx,
            status,
            configuration,
            started: AtomicBool::new(false),
            worker: Some(join),
        })
    }

    /// Subscribes to settings changes and evaluates the current settings
    /// once, so enhancement enabled before startup gets applied.
    ///
    /// Only the first call subscribes. The subscription stays registered
    /// with the settings source after [`Self::shutdown`]; notifications it
    /// delivers from then on are dropped.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("orchestrator already started");
            return Ok(());
        }
        let signal_tx = self.signal_tx.clone();
        let subscribed = self.configuration.subscribe(Box::new(move || {
            let _ = signal_tx.send(Signal::ConfigurationChanged);
        }));
        if let Err(err) = subscribed {
            self.started.store(false, Ordering::Release);
            return Err(err);
        }
        self.on_configuration_changed();
        Ok(())
    }

    /// Queues a configuration-change signal. Never blocks.
    pub fn on_configuration_changed(&self) {
        if self.signal_tx.send(Signal::ConfigurationChanged).is_err() {
            debug!("configuration change after shutdown ignored");
        }
    }

    /// Stops the loop, releases every sink and joins the worker. Later
    /// calls do nothing.
    pub fn shutdown(&mut self) {
        let Some(join) = self.worker.take() else {
            return;
        };
        let _ = self.signal_tx.send(Signal::Shutdown);
        if join.join().is_err() {
            warn!("orchestrator worker panicked");
        }
    }

    pub fn status(&self) -> OrchestratorStatus {
        *lock_status(&self.status)
    }

    pub fn state(&self) -> EnhancementState {
        self.status().state
    }

    pub fn phase(&self) -> Phase {
        self.status().phase
    }
}

impl Drop for EnhancementOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EnhancementOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhancementOrchestrator")
            .field("status", &self.status())
            .finish()
    }
}

fn lock_status(status: &Mutex<OrchestratorStatus>) -> MutexGuard<'_, OrchestratorStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker {
    session_id: SessionId,
    settle_delay: Duration,
    controller: EffectsController,
    configuration: Arc<dyn ConfigurationSource>,
    playback: Arc<dyn PlaybackControl>,
    status: Arc<Mutex<OrchestratorStatus>>,
}

impl Worker {
    fn run(mut self, signals: Receiver<Signal>) {
        let mut settle_until: Option<Instant> = None;

        loop {
            let wake = match settle_until {
                Some(deadline) => crossbeam_channel::select! {
                    recv(signals) -> msg => Wake::Signal(msg.ok()),
                    recv(crossbeam_channel::at(deadline)) -> _ => Wake::Settled,
                },
                None => Wake::Signal(signals.recv().ok()),
            };

            match wake {
                Wake::Settled => {
                    settle_until = None;
                    self.reconfigure();
                }
                Wake::Signal(Some(Signal::ConfigurationChanged)) => {
                    if settle_until.is_some() {
                        debug!("configuration change folded into pending settle");
                        continue;
                    }
                    self.pause_playback();
                    settle_until = Some(Instant::now() + self.settle_delay);
                    self.update(|status| status.phase = Phase::SettlingDown);
                    debug!(delay_ms = self.settle_delay.as_millis() as u64, "settling down");
                }
                Wake::Signal(Some(Signal::Shutdown)) | Wake::Signal(None) => {
                    self.teardown();
                    break;
                }
            }
        }
    }

    fn pause_playback(&self) {
        if let Err(err) = self.playback.pause() {
            debug!(error = %err, "playback pause failed, continuing");
        }
    }

    fn reconfigure(&mut self) {
        self.update(|status| status.phase = Phase::Reconfiguring);

        self.controller.stop_dynamic_mode();
        let was_initialized = self.state().equalizer_initialized;
        self.update(|status| {
            status.state.tick_running = false;
            status.state.equalizer_initialized = false;
        });
        if was_initialized {
            if let Err(err) = self.controller.set_equalizer_enabled(false) {
                warn!(error = %err, "failed to disable equalizer");
            }
        }

        let settings = EffectiveSettings::read(self.configuration.as_ref());
        if !settings.is_active() {
            self.controller.release();
            self.finish(Phase::Idle, EnhancementState::default());
            info!("enhancement inactive");
            return;
        }

        match self.activate(settings.mode) {
            Ok(()) => {
                self.finish(
                    Phase::Active,
                    EnhancementState {
                        enabled: true,
                        mode: settings.mode,
                        equalizer_initialized: true,
                        tick_running: true,
                    },
                );
                info!(mode = %settings.mode, "enhancement active");
            }
            Err(err) => {
                self.controller.release();
                self.finish(Phase::Idle, EnhancementState::default());
                warn!(
                    mode = %settings.mode,
                    error = %err,
                    "enhancement unavailable, staying idle until the next change"
                );
            }
        }
    }

    fn activate(&mut self, mode: EnhancementMode) -> Result<()> {
        self.controller.initialize(self.session_id)?;
        if let Err(err) = self.controller.set_equalizer_enabled(true) {
            warn!(error = %err, "failed to enable equalizer");
        }
        self.controller.start_dynamic_mode(mode)
    }

    fn teardown(&mut self) {
        self.controller.release();
        self.update(|status| {
            status.phase = Phase::Idle;
            status.state = EnhancementState::default();
        });
        info!("enhancement orchestrator shut down");
    }

    fn state(&self) -> EnhancementState {
        lock_status(&self.status).state
    }

    fn finish(&self, phase: Phase, state: EnhancementState) {
        self.update(|status| {
            status.phase = phase;
            status.state = state;
            status.reconfigurations += 1;
        });
    }

    fn update(&self, apply: impl FnOnce(&mut OrchestratorStatus)) {
        let mut status = lock_status(&self.status);
        apply(&mut *status);
    }
}
