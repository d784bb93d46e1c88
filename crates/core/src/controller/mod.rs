use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, info, trace, warn};

use crate::{
    effects::{EffectKind, EffectSinkFactory, EffectsSession, SessionId},
    host::VolumeSource,
    scheduler::TickLoop,
    tuning::{self, EqualizerShape, TickPlan},
    EnhancementMode, Result, SoundEngineError,
};

/// Outcome of one pass over the effect sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub volume: u8,
    pub writes: usize,
    /// Bands already at their target level.
    pub unchanged_bands: usize,
    pub failures: usize,
}

impl TickReport {
    fn record(&mut self, effect: EffectKind, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.writes += 1,
            Err(err) => {
                self.failures += 1;
                warn!(%effect, error = %err, "effect parameter write failed");
            }
        }
    }
}

struct DynamicMode {
    mode: EnhancementMode,
    tick_loop: TickLoop,
}

/// Owns the effect chain of one audio session and the loop that keeps it in
/// line with the output volume.
pub struct EffectsController {
    sinks: Arc<dyn EffectSinkFactory>,
    volume: Arc<dyn VolumeSource>,
    tick_interval: Duration,
    session: Arc<Mutex<Option<EffectsSession>>>,
    dynamic: Option<DynamicMode>,
}

impl EffectsController {
    pub fn new(
        sinks: Arc<dyn EffectSinkFactory>,
        volume: Arc<dyn VolumeSource>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            sinks,
            volume,
            tick_interval,
            session: Arc::new(Mutex::new(None)),
            dynamic: None,
        }
    }

    /// Binds all four sinks for `session_id`.
    ///
    /// Re-initializing with the bound session id is a no-op; a different id
    /// replaces the current chain. Replacing goes through [`Self::release`],
    /// so a running dynamic loop is stopped as well and has to be started
    /// again for the new session.
    pub fn initialize(&mut self, session_id: SessionId) -> Result<()> {
        if let Some(current) = self.session_id()? {
            if current == session_id {
                debug!(session = %session_id, "effects already initialized");
                return Ok(());
            }
            self.release();
        }

        let session = EffectsSession::bind(self.sinks.as_ref(), session_id)?;
        *self.lock_session()? = Some(session);
        Ok(())
    }

    /// Stops the loop and drops every sink. Safe to call at any time.
    pub fn release(&mut self) {
        self.stop_dynamic_mode();
        let released = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = released {
            info!(session = %session.id(), "effects released");
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.session_id(), Ok(Some(_)))
    }

    pub fn session_id(&self) -> Result<Option<SessionId>> {
        Ok(self.lock_session()?.as_ref().map(EffectsSession::id))
    }

    /// Toggles the equalizer. Does nothing while no session is bound.
    pub fn set_equalizer_enabled(&mut self, enabled: bool) -> Result<()> {
        let mut slot = self.lock_session()?;
        match slot.as_mut() {
            Some(session) => {
                session.set_equalizer_enabled(enabled)?;
                debug!(session = %session.id(), enabled, "equalizer toggled");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Starts or stops the dynamic loop in one call.
    pub fn apply_dynamic_mode(&mut self, enabled: bool, mode: EnhancementMode) -> Result<()> {
        if enabled && mode.is_active() {
            self.start_dynamic_mode(mode)
        } else {
            self.stop_dynamic_mode();
            Ok(())
        }
    }

    /// Starts the periodic loop for `mode`. A running loop is left alone;
    /// stop it first to switch modes.
    pub fn start_dynamic_mode(&mut self, mode: EnhancementMode) -> Result<()> {
        if let Some(running) = &self.dynamic {
            debug!(running = %running.mode, requested = %mode, "dynamic mode already running");
            return Ok(());
        }
        if !mode.is_active() {
            debug!("dynamic mode not started for off");
            return Ok(());
        }

        let session = Arc::clone(&self.session);
        let volume = Arc::clone(&self.volume);
        let tick_loop = TickLoop::spawn(
            format!("adaptive-sound-{mode}"),
            self.tick_interval,
            move || tick_once(&session, volume.as_ref(), mode),
        )?;

        info!(%mode, interval_ms = self.tick_interval.as_millis() as u64, "dynamic mode started");
        self.dynamic = Some(DynamicMode { mode, tick_loop });
        Ok(())
    }

    /// Cancels the loop and waits for any in-flight tick to finish.
    pub fn stop_dynamic_mode(&mut self) {
        if let Some(dynamic) = self.dynamic.take() {
            let ticks = dynamic.tick_loop.ticks();
            dynamic.tick_loop.stop();
            info!(mode = %dynamic.mode, ticks, "dynamic mode stopped");
        }
    }

    pub fn dynamic_mode(&self) -> Option<EnhancementMode> {
        self.dynamic.as_ref().map(|dynamic| dynamic.mode)
    }

    pub fn is_ticking(&self) -> bool {
        self.dynamic.is_some()
    }

    /// Completed ticks of the running loop, zero when stopped.
    pub fn ticks(&self) -> u64 {
        self.dynamic
            .as_ref()
            .map(|dynamic| dynamic.tick_loop.ticks())
            .unwrap_or(0)
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<EffectsSession>>> {
        self.session
            .lock()
            .map_err(|_| SoundEngineError::msg("effects session has been poisoned"))
    }
}

impl Drop for EffectsController {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for EffectsController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectsController")
            .field("tick_interval", &self.tick_interval)
            .field("dynamic_mode", &self.dynamic_mode())
            .finish()
    }
}

fn tick_once(session: &Mutex<Option<EffectsSession>>, volume: &dyn VolumeSource, mode: EnhancementMode) {
    let Ok(mut slot) = session.lock() else {
        warn!("effects session poisoned, skipping tick");
        return;
    };
    let Some(active) = slot.as_mut() else {
        trace!("no effects session bound, skipping tick");
        return;
    };

    match run_tick(active, volume, mode) {
        Ok(report) => debug!(
            volume = report.volume,
            writes = report.writes,
            unchanged = report.unchanged_bands,
            failures = report.failures,
            "tick applied"
        ),
        Err(err) => warn!(error = %err, "skipping tick corrections"),
    }
}

/// Reads the volume and pushes one round of parameters into `session`.
///
/// Only a failed volume read is returned as an error. Failures of
/// individual sinks are counted in the report and do not stop the other
/// writes.
pub fn run_tick(
    session: &mut EffectsSession,
    volume: &dyn VolumeSource,
    mode: EnhancementMode,
) -> Result<TickReport> {
    let level = tuning::volume_fraction(volume.current_volume()?, volume.max_volume()?)?;
    let mut report = TickReport {
        volume: level,
        ..TickReport::default()
    };

    let shape = match equalizer_shape(session) {
        Ok(shape) => Some(shape),
        Err(err) => {
            report.failures += 1;
            warn!(error = %err, "equalizer layout unavailable");
            None
        }
    };
    let plan = TickPlan::compute(mode, level, shape);
    trace!(?plan, "tick plan");

    for (band, &target) in (0u16..).zip(plan.band_levels.iter()) {
        // An unreadable level counts as stale.
        if matches!(session.equalizer.band_level(band), Ok(current) if current == target) {
            report.unchanged_bands += 1;
            continue;
        }
        let outcome = session.equalizer.set_band_level(band, target);
        report.record(EffectKind::Equalizer, outcome);
    }

    if let Some(strength) = plan.bass_boost {
        let outcome = session.bass_boost.set_strength(strength);
        report.record(EffectKind::BassBoost, outcome);
    }

    let outcome = session.virtualizer.set_strength(plan.virtualizer);
    report.record(EffectKind::Virtualizer, outcome);

    if let Some(preset) = plan.reverb {
        let outcome = session.reverb.set_preset(preset);
        report.record(EffectKind::Reverb, outcome);
    }

    Ok(report)
}

fn equalizer_shape(session: &EffectsSession) -> Result<EqualizerShape> {
    Ok(EqualizerShape {
        bands: session.equalizer.number_of_bands()?,
        range: session.equalizer.band_level_range()?,
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    use proptest::prelude::*;

    use super::*;
    use crate::{
        effects::{LevelRange, ReverbPreset},
        memory::{MemorySinkFactory, MemoryVolume, ParameterWrite},
    };

    fn rig(volume: i32) -> (MemorySinkFactory, Arc<MemoryVolume>, EffectsController) {
        let factory = MemorySinkFactory::new(5, LevelRange::new(-1500, 1500));
        let source = Arc::new(MemoryVolume::new(volume, 100));
        let controller = EffectsController::new(
            Arc::new(factory.clone()),
            source.clone(),
            Duration::from_millis(10),
        );
        (factory, source, controller)
    }

    fn bound_session(factory: &MemorySinkFactory) -> EffectsSession {
        EffectsSession::bind(factory, SessionId(1)).unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let give_up = Instant::now() + Duration::from_secs(2);
        while Instant::now() < give_up {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn initialize_then_release_twice() {
        let (factory, _, mut controller) = rig(50);
        controller.initialize(SessionId(4)).unwrap();
        assert!(controller.is_initialized());
        assert_eq!(controller.session_id().unwrap(), Some(SessionId(4)));
        assert_eq!(factory.live_sinks(), 4);

        controller.release();
        assert!(!controller.is_initialized());
        assert_eq!(factory.live_sinks(), 0);

        controller.release();
        assert!(!controller.is_initialized());
        assert_eq!(factory.live_sinks(), 0);
    }

    #[test]
    fn release_without_initialize_is_safe() {
        let (factory, _, mut controller) = rig(50);
        controller.release();
        assert_eq!(factory.live_sinks(), 0);
    }

    #[test]
    fn initialize_is_idempotent_for_same_session() {
        let (factory, _, mut controller) = rig(50);
        controller.initialize(SessionId(2)).unwrap();
        controller.initialize(SessionId(2)).unwrap();
        assert_eq!(factory.binds(), 4);

        controller.initialize(SessionId(3)).unwrap();
        assert_eq!(factory.binds(), 8);
        assert_eq!(factory.live_sinks(), 4);
    }

    #[test]
    fn switching_session_stops_the_loop() {
        let (factory, _, mut controller) = rig(50);
        controller.initialize(SessionId(2)).unwrap();
        controller.start_dynamic_mode(EnhancementMode::Smart).unwrap();
        assert!(controller.is_ticking());

        controller.initialize(SessionId(3)).unwrap();
        assert!(!controller.is_ticking());
        assert_eq!(controller.dynamic_mode(), None);
        assert_eq!(controller.session_id().unwrap(), Some(SessionId(3)));
        assert_eq!(factory.live_sinks(), 4);
    }

    #[test]
    fn failed_initialize_leaves_nothing_bound() {
        let (factory, _, mut controller) = rig(50);
        factory.fail_bind(EffectKind::Virtualizer);

        let err = controller.initialize(SessionId(1)).unwrap_err();
        assert!(matches!(err, SoundEngineError::ResourceBind { .. }));
        assert!(!controller.is_initialized());
        assert_eq!(factory.live_sinks(), 0);
    }

    #[test]
    fn equalizer_toggle_needs_a_session() {
        let (factory, _, mut controller) = rig(50);
        controller.set_equalizer_enabled(true).unwrap();
        assert!(factory.writes().is_empty());

        controller.initialize(SessionId(1)).unwrap();
        controller.set_equalizer_enabled(true).unwrap();
        assert!(factory.equalizer_enabled());
        controller.set_equalizer_enabled(false).unwrap();
        assert!(!factory.equalizer_enabled());
    }

    #[test]
    fn tick_writes_every_effect_for_smart() {
        let (factory, source, _) = rig(40);
        let mut session = bound_session(&factory);

        let report = run_tick(&mut session, source.as_ref(), EnhancementMode::Smart).unwrap();
        assert_eq!(report.volume, 40);
        assert_eq!(report.failures, 0);
        assert_eq!(report.writes, 5 + 3);
        assert_eq!(factory.band_levels(), vec![1500; 5]);
        assert_eq!(factory.bass_boost(), Some(800));
        assert_eq!(factory.virtualizer(), Some(880));
        assert_eq!(factory.reverb(), ReverbPreset::MediumRoom);
    }

    proptest! {
        #[test]
        fn music_tick_never_writes_reverb(volume in 0i32..=100) {
            let (factory, source, _) = rig(volume);
            let mut session = bound_session(&factory);
            run_tick(&mut session, source.as_ref(), EnhancementMode::Music).unwrap();

            prop_assert!(factory.writes_for(EffectKind::Reverb).is_empty());
            prop_assert_eq!(factory.writes_for(EffectKind::BassBoost).len(), 1);
        }

        #[test]
        fn theater_tick_never_writes_bass_boost(volume in 0i32..=100) {
            let (factory, source, _) = rig(volume);
            let mut session = bound_session(&factory);
            run_tick(&mut session, source.as_ref(), EnhancementMode::Theater).unwrap();

            prop_assert!(factory.writes_for(EffectKind::BassBoost).is_empty());
            prop_assert_eq!(factory.writes_for(EffectKind::Reverb).len(), 1);
        }
    }

    #[test]
    fn theater_reverb_follows_the_volume_tier() {
        let (factory, source, _) = rig(10);
        let mut session = bound_session(&factory);
        run_tick(&mut session, source.as_ref(), EnhancementMode::Theater).unwrap();

        assert_eq!(
            factory.writes_for(EffectKind::Reverb),
            vec![ParameterWrite::Reverb {
                session: SessionId(1),
                preset: ReverbPreset::SmallRoom,
            }]
        );
    }

    #[test]
    fn unchanged_bands_are_not_rewritten() {
        let (factory, source, _) = rig(60);
        let mut session = bound_session(&factory);
        run_tick(&mut session, source.as_ref(), EnhancementMode::Game).unwrap();
        factory.clear_writes();

        let report = run_tick(&mut session, source.as_ref(), EnhancementMode::Game).unwrap();
        assert_eq!(report.unchanged_bands, 5);
        assert!(factory
            .writes_for(EffectKind::Equalizer)
            .is_empty());
    }

    #[test]
    fn failing_sink_does_not_block_the_others() {
        let (factory, source, _) = rig(70);
        let mut session = bound_session(&factory);
        factory.fail_writes(EffectKind::Equalizer);

        let report = run_tick(&mut session, source.as_ref(), EnhancementMode::Game).unwrap();
        assert_eq!(report.failures, 5);
        assert_eq!(factory.bass_boost(), Some(650));
        assert_eq!(factory.virtualizer(), Some(940));
        assert_eq!(factory.reverb(), ReverbPreset::LargeRoom);
    }

    #[test]
    fn volume_failure_skips_the_tick() {
        let (factory, source, _) = rig(70);
        let mut session = bound_session(&factory);
        source.fail_reads(true);

        let err = run_tick(&mut session, source.as_ref(), EnhancementMode::Smart).unwrap_err();
        assert!(matches!(err, SoundEngineError::ConfigurationRead(_)));
        assert!(factory.writes().is_empty());
    }

    #[test]
    fn zero_max_volume_skips_the_tick() {
        let (factory, source, _) = rig(30);
        let mut session = bound_session(&factory);
        source.set_max(0);

        let err = run_tick(&mut session, source.as_ref(), EnhancementMode::Game).unwrap_err();
        assert!(matches!(err, SoundEngineError::ConfigurationRead(_)));
        assert!(factory.writes().is_empty());

        source.set_max(100);
        assert_eq!(
            run_tick(&mut session, source.as_ref(), EnhancementMode::Game)
                .unwrap()
                .volume,
            30
        );
    }

    #[test]
    fn loop_tracks_volume_changes() {
        let (factory, source, mut controller) = rig(10);
        controller.initialize(SessionId(1)).unwrap();
        controller.start_dynamic_mode(EnhancementMode::Game).unwrap();
        assert!(wait_for(|| factory.reverb() == ReverbPreset::SmallRoom));

        source.set_current(80);
        assert!(wait_for(|| factory.reverb() == ReverbPreset::LargeRoom));
        assert_eq!(controller.dynamic_mode(), Some(EnhancementMode::Game));

        controller.stop_dynamic_mode();
        assert!(!controller.is_ticking());
        let writes = factory.writes().len();
        source.set_current(20);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(factory.writes().len(), writes);
    }

    #[test]
    fn start_is_noop_while_running_or_off() {
        let (_, _, mut controller) = rig(10);
        controller.start_dynamic_mode(EnhancementMode::Off).unwrap();
        assert!(!controller.is_ticking());

        controller.start_dynamic_mode(EnhancementMode::Music).unwrap();
        controller.start_dynamic_mode(EnhancementMode::Smart).unwrap();
        assert_eq!(controller.dynamic_mode(), Some(EnhancementMode::Music));

        controller.apply_dynamic_mode(false, EnhancementMode::Music).unwrap();
        assert!(!controller.is_ticking());
    }

    /// Volume source that tracks how many ticks are reading it at once.
    struct SlowVolume {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        reads: AtomicUsize,
    }

    impl VolumeSource for SlowVolume {
        fn current_volume(&self) -> Result<i32> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.reads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(15));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(50)
        }

        fn max_volume(&self) -> Result<i32> {
            Ok(100)
        }
    }

    #[test]
    fn restarting_in_a_new_mode_never_overlaps_ticks() {
        let factory = MemorySinkFactory::new(5, LevelRange::new(-1500, 1500));
        let volume = Arc::new(SlowVolume {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        });
        let mut controller = EffectsController::new(
            Arc::new(factory.clone()),
            volume.clone(),
            Duration::from_millis(1),
        );
        controller.initialize(SessionId(1)).unwrap();

        controller.start_dynamic_mode(EnhancementMode::Music).unwrap();
        assert!(wait_for(|| volume.reads.load(Ordering::SeqCst) >= 2));
        controller.stop_dynamic_mode();
        assert_eq!(volume.in_flight.load(Ordering::SeqCst), 0);

        controller.start_dynamic_mode(EnhancementMode::Theater).unwrap();
        let reads = volume.reads.load(Ordering::SeqCst);
        assert!(wait_for(|| volume.reads.load(Ordering::SeqCst) >= reads + 2));
        controller.release();

        assert_eq!(volume.peak.load(Ordering::SeqCst), 1);
        assert_eq!(factory.live_sinks(), 0);
    }
}
