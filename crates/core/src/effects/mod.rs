//! Effect sink abstractions.
//!
//! The platform owns the actual equalizer, bass boost, reverb and
//! virtualizer engines. The core only sees them as parameter sinks bound to
//! an audio session; dropping a sink handle releases it.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Result, SoundEngineError};

/// Opaque audio session identifier handed out by the audio subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i32);

impl SessionId {
    pub const OUTPUT_MIX: SessionId = SessionId(0);
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Equalizer,
    BassBoost,
    Reverb,
    Virtualizer,
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equalizer => "equalizer",
            Self::BassBoost => "bass boost",
            Self::Reverb => "reverb",
            Self::Virtualizer => "virtualizer",
        };
        f.write_str(name)
    }
}

/// Presets understood by the platform reverb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReverbPreset {
    #[default]
    None,
    SmallRoom,
    MediumRoom,
    LargeRoom,
    MediumHall,
    LargeHall,
    Plate,
}

impl ReverbPreset {
    pub fn code(self) -> u16 {
        match self {
            Self::None => 0,
            Self::SmallRoom => 1,
            Self::MediumRoom => 2,
            Self::LargeRoom => 3,
            Self::MediumHall => 4,
            Self::LargeHall => 5,
            Self::Plate => 6,
        }
    }
}

/// Inclusive band level range reported by an equalizer, in millibels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelRange {
    pub min: i16,
    pub max: i16,
}

impl LevelRange {
    pub fn new(min: i16, max: i16) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        f64::from(self.max) - f64::from(self.min)
    }

    pub fn clamp(&self, level: f64) -> f64 {
        level.clamp(f64::from(self.min), f64::from(self.max.max(self.min)))
    }
}

pub trait EqualizerSink: Send {
    fn number_of_bands(&self) -> Result<u16>;
    fn band_level_range(&self) -> Result<LevelRange>;
    fn band_level(&self, band: u16) -> Result<i16>;
    fn set_band_level(&mut self, band: u16, level: i16) -> Result<()>;
    fn set_enabled(&mut self, enabled: bool) -> Result<()>;
}

pub trait BassBoostSink: Send {
    /// Strength in the platform range `0..=1000`.
    fn set_strength(&mut self, strength: u16) -> Result<()>;
}

pub trait ReverbSink: Send {
    fn set_preset(&mut self, preset: ReverbPreset) -> Result<()>;
}

pub trait VirtualizerSink: Send {
    fn set_strength(&mut self, strength: u16) -> Result<()>;
}

/// Allocates effect sinks on the platform audio stack.
pub trait EffectSinkFactory: Send + Sync {
    fn bind_equalizer(&self, session: SessionId) -> Result<Box<dyn EqualizerSink>>;
    fn bind_bass_boost(&self, session: SessionId) -> Result<Box<dyn BassBoostSink>>;
    fn bind_reverb(&self, session: SessionId) -> Result<Box<dyn ReverbSink>>;
    fn bind_virtualizer(&self, session: SessionId) -> Result<Box<dyn VirtualizerSink>>;
}

/// A fully bound chain of effect sinks for one audio session.
///
/// Either every sink is present or the session does not exist: a failed
/// bind drops the sinks bound so far before the error is returned.
pub struct EffectsSession {
    id: SessionId,
    pub(crate) equalizer: Box<dyn EqualizerSink>,
    pub(crate) bass_boost: Box<dyn BassBoostSink>,
    pub(crate) reverb: Box<dyn ReverbSink>,
    pub(crate) virtualizer: Box<dyn VirtualizerSink>,
}

impl EffectsSession {
    pub fn bind(factory: &dyn EffectSinkFactory, id: SessionId) -> Result<Self> {
        let equalizer = factory
            .bind_equalizer(id)
            .map_err(|err| bind_error(EffectKind::Equalizer, id, err))?;
        let bass_boost = factory
            .bind_bass_boost(id)
            .map_err(|err| bind_error(EffectKind::BassBoost, id, err))?;
        let reverb = factory
            .bind_reverb(id)
            .map_err(|err| bind_error(EffectKind::Reverb, id, err))?;
        let virtualizer = factory
            .bind_virtualizer(id)
            .map_err(|err| bind_error(EffectKind::Virtualizer, id, err))?;

        info!(session = %id, "effects session bound");
        Ok(Self {
            id,
            equalizer,
            bass_boost,
            reverb,
            virtualizer,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn set_equalizer_enabled(&mut self, enabled: bool) -> Result<()> {
        self.equalizer.set_enabled(enabled)
    }
}

impl Drop for EffectsSession {
    fn drop(&mut self) {
        debug!(session = %self.id, "releasing effects session");
    }
}

impl fmt::Debug for EffectsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectsSession").field("id", &self.id).finish()
    }
}

fn bind_error(effect: EffectKind, session: SessionId, err: SoundEngineError) -> SoundEngineError {
    match err {
        err @ SoundEngineError::ResourceBind { .. } => err,
        other => SoundEngineError::ResourceBind {
            effect,
            session,
            reason: other.to_string(),
        },
    }
}
