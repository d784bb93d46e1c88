//! Interfaces to the parts of the device the engine does not own.

use tracing::warn;

use crate::{EnhancementMode, Result};

/// Settings key holding the raw [`EnhancementMode`] code.
pub const AUDIO_EFFECT_MODE: &str = "audio_effect_mode";
/// Settings key holding the master enable switch (non-zero is on).
pub const AUDIO_EFFECT_MODE_ENABLED: &str = "audio_effect_mode_enabled";
/// Settings key for a user bass boost override. Stored but not consumed by
/// the dynamic loop, which derives bass boost from volume.
pub const BASS_BOOST_STRENGTH: &str = "bass_boost_strength";

/// Callback invoked whenever an observed setting changes.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Output volume of the media stream.
pub trait VolumeSource: Send + Sync {
    fn current_volume(&self) -> Result<i32>;
    fn max_volume(&self) -> Result<i32>;
}

/// Persisted enhancement settings.
pub trait ConfigurationSource: Send + Sync {
    fn effect_mode_raw(&self) -> Result<i32>;
    fn effects_enabled(&self) -> Result<bool>;
    /// Registers `callback` to fire when either the mode or the enable flag
    /// changes.
    fn subscribe(&self, callback: ChangeCallback) -> Result<()>;
}

pub trait PlaybackControl: Send + Sync {
    /// Best-effort media pause.
    fn pause(&self) -> Result<()>;
}

/// Effective enhancement settings after fallbacks are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub enabled: bool,
    pub mode: EnhancementMode,
}

impl EffectiveSettings {
    pub const DISABLED: EffectiveSettings = EffectiveSettings {
        enabled: false,
        mode: EnhancementMode::Off,
    };

    /// Reads both settings. A failed read counts as zero for that key, an
    /// unknown mode code resolves to [`EnhancementMode::Off`], and the result
    /// is only enabled when the mode is active and the switch is on.
    pub fn read(source: &dyn ConfigurationSource) -> Self {
        let raw = source.effect_mode_raw().unwrap_or_else(|err| {
            warn!(key = AUDIO_EFFECT_MODE, error = %err, "failed to read setting");
            0
        });
        let mode = EnhancementMode::from_raw(raw).unwrap_or_else(|| {
            warn!(raw, "unknown enhancement mode code, treating as off");
            EnhancementMode::Off
        });
        let switch = source.effects_enabled().unwrap_or_else(|err| {
            warn!(key = AUDIO_EFFECT_MODE_ENABLED, error = %err, "failed to read setting");
            false
        });

        if mode.is_active() && switch {
            Self {
                enabled: true,
                mode,
            }
        } else {
            Self::DISABLED
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.mode.is_active()
    }
}
