//! In-memory stand-ins for the host collaborators.
//!
//! These back the command line simulation and the tests. The sink factory
//! records every parameter write so callers can inspect what a tick did.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use serde::Serialize;

use crate::{
    effects::{
        BassBoostSink, EffectKind, EffectSinkFactory, EqualizerSink, LevelRange, ReverbPreset,
        ReverbSink, SessionId, VirtualizerSink,
    },
    host::{
        ChangeCallback, ConfigurationSource, PlaybackControl, VolumeSource, AUDIO_EFFECT_MODE,
        AUDIO_EFFECT_MODE_ENABLED,
    },
    tuning::EqualizerShape,
    EnhancementMode, Result, SoundEngineError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A parameter accepted by one of the in-memory sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterWrite {
    BandLevel {
        session: SessionId,
        band: u16,
        level: i16,
    },
    EqualizerEnabled {
        session: SessionId,
        enabled: bool,
    },
    BassBoost {
        session: SessionId,
        strength: u16,
    },
    Reverb {
        session: SessionId,
        preset: ReverbPreset,
    },
    Virtualizer {
        session: SessionId,
        strength: u16,
    },
}

impl ParameterWrite {
    pub fn effect(&self) -> EffectKind {
        match self {
            Self::BandLevel { .. } | Self::EqualizerEnabled { .. } => EffectKind::Equalizer,
            Self::BassBoost { .. } => EffectKind::BassBoost,
            Self::Reverb { .. } => EffectKind::Reverb,
            Self::Virtualizer { .. } => EffectKind::Virtualizer,
        }
    }
}

#[derive(Debug, Default)]
struct BoardState {
    writes: VecDeque<ParameterWrite>,
    write_limit: Option<usize>,
    total_writes: usize,
    band_levels: Vec<i16>,
    equalizer_enabled: bool,
    bass_boost: Option<u16>,
    reverb: ReverbPreset,
    virtualizer: Option<u16>,
    failing_binds: HashSet<EffectKind>,
    failing_writes: HashSet<EffectKind>,
    binds: usize,
}

impl BoardState {
    fn trim_writes(&mut self) {
        if let Some(limit) = self.write_limit {
            while self.writes.len() > limit {
                self.writes.pop_front();
            }
        }
    }
}

#[derive(Debug)]
struct SinkBoard {
    shape: EqualizerShape,
    state: Mutex<BoardState>,
    live: AtomicUsize,
}

impl SinkBoard {
    fn write(
        &self,
        write: ParameterWrite,
        apply: impl FnOnce(&mut BoardState),
    ) -> Result<()> {
        let effect = write.effect();
        let mut state = lock(&self.state);
        if state.failing_writes.contains(&effect) {
            return Err(SoundEngineError::sink_write(effect, "sink rejected parameter"));
        }
        apply(&mut *state);
        state.total_writes += 1;
        state.writes.push_back(write);
        state.trim_writes();
        Ok(())
    }
}

/// Releases its sink slot on drop.
#[derive(Debug)]
struct LiveToken {
    board: Arc<SinkBoard>,
    session: SessionId,
}

impl LiveToken {
    fn acquire(board: &Arc<SinkBoard>, session: SessionId, effect: EffectKind) -> Result<Self> {
        {
            let mut state = lock(&board.state);
            if state.failing_binds.contains(&effect) {
                return Err(SoundEngineError::ResourceBind {
                    effect,
                    session,
                    reason: "audio subsystem refused allocation".to_string(),
                });
            }
            state.binds += 1;
        }
        board.live.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            board: Arc::clone(board),
            session,
        })
    }
}

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.board.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Sink factory whose sinks only record what they are told.
#[derive(Debug, Clone)]
pub struct MemorySinkFactory {
    board: Arc<SinkBoard>,
}

impl MemorySinkFactory {
    pub fn new(bands: u16, range: LevelRange) -> Self {
        Self {
            board: Arc::new(SinkBoard {
                shape: EqualizerShape { bands, range },
                state: Mutex::new(BoardState::default()),
                live: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of sinks currently bound and not yet released.
    pub fn live_sinks(&self) -> usize {
        self.board.live.load(Ordering::SeqCst)
    }

    /// Total successful binds since creation.
    pub fn binds(&self) -> usize {
        lock(&self.board.state).binds
    }

    /// Recorded writes, oldest first.
    pub fn writes(&self) -> Vec<ParameterWrite> {
        lock(&self.board.state).writes.iter().cloned().collect()
    }

    /// Every accepted write since creation, including ones no longer kept
    /// in the log.
    pub fn total_writes(&self) -> usize {
        lock(&self.board.state).total_writes
    }

    /// Keeps only the `limit` most recent writes in the log.
    pub fn limit_writes(&self, limit: usize) {
        let mut state = lock(&self.board.state);
        state.write_limit = Some(limit);
        state.trim_writes();
    }

    pub fn writes_for(&self, effect: EffectKind) -> Vec<ParameterWrite> {
        lock(&self.board.state)
            .writes
            .iter()
            .filter(|write| write.effect() == effect)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.board.state).writes.clear();
    }

    pub fn band_levels(&self) -> Vec<i16> {
        lock(&self.board.state).band_levels.clone()
    }

    pub fn equalizer_enabled(&self) -> bool {
        lock(&self.board.state).equalizer_enabled
    }

    pub fn bass_boost(&self) -> Option<u16> {
        lock(&self.board.state).bass_boost
    }

    pub fn reverb(&self) -> ReverbPreset {
        lock(&self.board.state).reverb
    }

    pub fn virtualizer(&self) -> Option<u16> {
        lock(&self.board.state).virtualizer
    }

    /// Makes future binds of `effect` fail.
    pub fn fail_bind(&self, effect: EffectKind) {
        lock(&self.board.state).failing_binds.insert(effect);
    }

    /// Makes future parameter writes to `effect` fail.
    pub fn fail_writes(&self, effect: EffectKind) {
        lock(&self.board.state).failing_writes.insert(effect);
    }

    /// Clears every injected failure.
    pub fn heal(&self) {
        let mut state = lock(&self.board.state);
        state.failing_binds.clear();
        state.failing_writes.clear();
    }
}

impl EffectSinkFactory for MemorySinkFactory {
    fn bind_equalizer(&self, session: SessionId) -> Result<Box<dyn EqualizerSink>> {
        let token = LiveToken::acquire(&self.board, session, EffectKind::Equalizer)?;
        {
            let mut state = lock(&self.board.state);
            state.band_levels = vec![0; usize::from(self.board.shape.bands)];
            state.equalizer_enabled = false;
        }
        Ok(Box::new(MemoryEqualizer { token }))
    }

    fn bind_bass_boost(&self, session: SessionId) -> Result<Box<dyn BassBoostSink>> {
        let token = LiveToken::acquire(&self.board, session, EffectKind::BassBoost)?;
        Ok(Box::new(MemoryBassBoost { token }))
    }

    fn bind_reverb(&self, session: SessionId) -> Result<Box<dyn ReverbSink>> {
        let token = LiveToken::acquire(&self.board, session, EffectKind::Reverb)?;
        Ok(Box::new(MemoryReverb { token }))
    }

    fn bind_virtualizer(&self, session: SessionId) -> Result<Box<dyn VirtualizerSink>> {
        let token = LiveToken::acquire(&self.board, session, EffectKind::Virtualizer)?;
        Ok(Box::new(MemoryVirtualizer { token }))
    }
}

struct MemoryEqualizer {
    token: LiveToken,
}

impl EqualizerSink for MemoryEqualizer {
    fn number_of_bands(&self) -> Result<u16> {
        Ok(self.token.board.shape.bands)
    }

    fn band_level_range(&self) -> Result<LevelRange> {
        Ok(self.token.board.shape.range)
    }

    fn band_level(&self, band: u16) -> Result<i16> {
        lock(&self.token.board.state)
            .band_levels
            .get(usize::from(band))
            .copied()
            .ok_or_else(|| SoundEngineError::msg(format!("band {band} does not exist")))
    }

    fn set_band_level(&mut self, band: u16, level: i16) -> Result<()> {
        if band >= self.token.board.shape.bands {
            return Err(SoundEngineError::sink_write(
                EffectKind::Equalizer,
                format!("band {band} does not exist"),
            ));
        }
        let session = self.token.session;
        self.token.board.write(
            ParameterWrite::BandLevel {
                session,
                band,
                level,
            },
            |state| state.band_levels[usize::from(band)] = level,
        )
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        let session = self.token.session;
        self.token.board.write(
            ParameterWrite::EqualizerEnabled { session, enabled },
            |state| state.equalizer_enabled = enabled,
        )
    }
}

struct MemoryBassBoost {
    token: LiveToken,
}

impl BassBoostSink for MemoryBassBoost {
    fn set_strength(&mut self, strength: u16) -> Result<()> {
        let session = self.token.session;
        self.token.board.write(
            ParameterWrite::BassBoost { session, strength },
            |state| state.bass_boost = Some(strength),
        )
    }
}

struct MemoryReverb {
    token: LiveToken,
}

impl ReverbSink for MemoryReverb {
    fn set_preset(&mut self, preset: ReverbPreset) -> Result<()> {
        let session = self.token.session;
        self.token.board.write(
            ParameterWrite::Reverb { session, preset },
            |state| state.reverb = preset,
        )
    }
}

struct MemoryVirtualizer {
    token: LiveToken,
}

impl VirtualizerSink for MemoryVirtualizer {
    fn set_strength(&mut self, strength: u16) -> Result<()> {
        let session = self.token.session;
        self.token.board.write(
            ParameterWrite::Virtualizer { session, strength },
            |state| state.virtualizer = Some(strength),
        )
    }
}

/// Integer settings table with change notification for the observed keys.
#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, i32>>,
    subscribers: Mutex<Vec<Arc<dyn Fn() + Send + Sync>>>,
    fail_reads: AtomicBool,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: EnhancementMode) {
        self.set_raw(AUDIO_EFFECT_MODE, mode.raw());
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.set_raw(AUDIO_EFFECT_MODE_ENABLED, i32::from(enabled));
    }

    /// Stores `value` under `key`, notifying subscribers when an observed
    /// key actually changes.
    pub fn set_raw(&self, key: &str, value: i32) {
        let previous = lock(&self.values).insert(key.to_string(), value);
        let observed = key == AUDIO_EFFECT_MODE || key == AUDIO_EFFECT_MODE_ENABLED;
        if observed && previous != Some(value) {
            self.notify();
        }
    }

    pub fn get(&self, key: &str) -> Option<i32> {
        lock(&self.values).get(key).copied()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn subscribers(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn notify(&self) {
        let callbacks = lock(&self.subscribers).clone();
        for callback in callbacks {
            callback();
        }
    }

    fn read(&self, key: &str) -> Result<i32> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SoundEngineError::configuration_read(format!(
                "settings provider unavailable for `{key}`"
            )));
        }
        Ok(self.get(key).unwrap_or(0))
    }
}

impl ConfigurationSource for MemorySettings {
    fn effect_mode_raw(&self) -> Result<i32> {
        self.read(AUDIO_EFFECT_MODE)
    }

    fn effects_enabled(&self) -> Result<bool> {
        Ok(self.read(AUDIO_EFFECT_MODE_ENABLED)? != 0)
    }

    fn subscribe(&self, callback: ChangeCallback) -> Result<()> {
        lock(&self.subscribers).push(Arc::from(callback));
        Ok(())
    }
}

impl std::fmt::Debug for MemorySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySettings")
            .field("values", &*lock(&self.values))
            .field("subscribers", &self.subscribers())
            .finish()
    }
}

/// Stream volume that can be changed from another thread.
#[derive(Debug)]
pub struct MemoryVolume {
    current: AtomicI32,
    max: AtomicI32,
    fail_reads: AtomicBool,
}

impl MemoryVolume {
    pub fn new(current: i32, max: i32) -> Self {
        Self {
            current: AtomicI32::new(current),
            max: AtomicI32::new(max),
            fail_reads: AtomicBool::new(false),
        }
    }

    pub fn set_current(&self, current: i32) {
        self.current.store(current, Ordering::SeqCst);
    }

    pub fn set_max(&self, max: i32) {
        self.max.store(max, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SoundEngineError::configuration_read("volume service unavailable"));
        }
        Ok(())
    }
}

impl VolumeSource for MemoryVolume {
    fn current_volume(&self) -> Result<i32> {
        self.check()?;
        Ok(self.current.load(Ordering::SeqCst))
    }

    fn max_volume(&self) -> Result<i32> {
        self.check()?;
        Ok(self.max.load(Ordering::SeqCst))
    }
}

/// Playback control that counts pause requests.
#[derive(Debug, Default)]
pub struct MemoryPlayback {
    pauses: AtomicUsize,
    fail: AtomicBool,
}

impl MemoryPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn fail_pauses(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl PlaybackControl for MemoryPlayback {
    fn pause(&self) -> Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SoundEngineError::msg("no active media session"));
        }
        Ok(())
    }
}
