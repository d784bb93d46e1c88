//! Volume-driven parameter rules.
//!
//! Everything here is pure so the numbers can be checked without a running
//! loop. Levels are computed in `f64` and truncated toward zero when they
//! are narrowed back to sink units.

use serde::{Deserialize, Serialize};

use crate::{
    effects::{LevelRange, ReverbPreset},
    EnhancementMode, Result, SoundEngineError,
};

const LOW_BAND_FACTOR: f64 = 1.1;
const MID_HIGH_BAND_FACTOR: f64 = 1.2;
const QUIET_VOLUME_ADJUSTMENT: f64 = 0.85;
const VOLUME_ADJUSTMENT_SPAN: f64 = 0.6;

pub const MAX_BASS_BOOST_STRENGTH: u16 = 1000;
pub const MAX_VIRTUALIZER_STRENGTH: u16 = 1500;
const BASE_VIRTUALIZER_STRENGTH: i32 = 800;

const MEDIUM_ROOM_FROM: u8 = 33;
const LARGE_ROOM_FROM: u8 = 66;

/// Converts a raw stream volume into a percentage in `0..=100`.
pub fn volume_fraction(current: i32, max: i32) -> Result<u8> {
    if max <= 0 {
        return Err(SoundEngineError::configuration_read(format!(
            "max volume must be positive, got {max}"
        )));
    }
    let fraction = (f64::from(current) * 100.0 / f64::from(max)).round();
    Ok(fraction.clamp(0.0, 100.0) as u8)
}

/// Loudness curve: 0.85 at silence rising linearly to 1.45 at full volume.
pub fn volume_adjustment(volume: u8) -> f64 {
    QUIET_VOLUME_ADJUSTMENT + f64::from(volume) / 100.0 * VOLUME_ADJUSTMENT_SPAN
}

/// Lower half of the bands gets the gentler factor.
pub fn band_factor(band: u16, bands: u16) -> f64 {
    if band < bands / 2 {
        LOW_BAND_FACTOR
    } else {
        MID_HIGH_BAND_FACTOR
    }
}

/// Loudness-compensated level before the mode multiplier.
pub fn base_band_level(band: u16, bands: u16, range: LevelRange, volume: u8) -> f64 {
    if band >= bands {
        return f64::from(range.min);
    }
    let raw = f64::from(range.min) + band_factor(band, bands) * volume_adjustment(volume) * range.span();
    range.clamp(raw).trunc()
}

/// Final level written to `band` for `mode`.
pub fn band_level(
    mode: EnhancementMode,
    band: u16,
    bands: u16,
    range: LevelRange,
    volume: u8,
) -> i16 {
    let base = base_band_level(band, bands, range, volume);
    range.clamp(base * mode.band_multiplier(band)).trunc() as i16
}

/// More boost when quiet, none at full volume.
pub fn bass_boost_strength(volume: u8) -> u16 {
    let strength = i32::from(MAX_BASS_BOOST_STRENGTH) - i32::from(volume) * 5;
    strength.clamp(0, i32::from(MAX_BASS_BOOST_STRENGTH)) as u16
}

pub fn virtualizer_strength(volume: u8) -> u16 {
    let strength = BASE_VIRTUALIZER_STRENGTH + i32::from(volume) * 2;
    strength.clamp(0, i32::from(MAX_VIRTUALIZER_STRENGTH)) as u16
}

pub fn reverb_preset(volume: u8) -> ReverbPreset {
    if volume < MEDIUM_ROOM_FROM {
        ReverbPreset::SmallRoom
    } else if volume < LARGE_ROOM_FROM {
        ReverbPreset::MediumRoom
    } else {
        ReverbPreset::LargeRoom
    }
}

/// Band layout reported by an equalizer sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqualizerShape {
    pub bands: u16,
    pub range: LevelRange,
}

/// Parameters one tick wants the sinks to hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickPlan {
    pub mode: EnhancementMode,
    pub volume: u8,
    /// Empty when the equalizer layout could not be read.
    pub band_levels: Vec<i16>,
    pub bass_boost: Option<u16>,
    pub virtualizer: u16,
    pub reverb: Option<ReverbPreset>,
}

impl TickPlan {
    pub fn compute(mode: EnhancementMode, volume: u8, shape: Option<EqualizerShape>) -> Self {
        let band_levels = shape
            .map(|shape| {
                (0..shape.bands)
                    .map(|band| band_level(mode, band, shape.bands, shape.range, volume))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            mode,
            volume,
            band_levels,
            bass_boost: mode.drives_bass_boost().then(|| bass_boost_strength(volume)),
            virtualizer: virtualizer_strength(volume),
            reverb: mode.drives_reverb().then(|| reverb_preset(volume)),
        }
    }
}
