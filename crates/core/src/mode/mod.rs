use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::SoundEngineError;

/// Enhancement profile selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementMode {
    #[default]
    Off,
    Music,
    Game,
    Theater,
    Smart,
}

impl EnhancementMode {
    pub const ALL: [EnhancementMode; 5] = [
        EnhancementMode::Off,
        EnhancementMode::Music,
        EnhancementMode::Game,
        EnhancementMode::Theater,
        EnhancementMode::Smart,
    ];

    /// Decodes the integer stored by the settings provider.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Off),
            1 => Some(Self::Music),
            2 => Some(Self::Game),
            3 => Some(Self::Theater),
            4 => Some(Self::Smart),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            Self::Off => 0,
            Self::Music => 1,
            Self::Game => 2,
            Self::Theater => 3,
            Self::Smart => 4,
        }
    }

    pub fn is_active(self) -> bool {
        self != Self::Off
    }

    /// Gain multiplier applied on top of the loudness-compensated level of
    /// `band`.
    pub fn band_multiplier(self, band: u16) -> f64 {
        match self {
            Self::Off => 1.0,
            Self::Music if (2..=4).contains(&band) => 1.05,
            Self::Music => 1.0,
            Self::Game if band > 4 => 1.1,
            Self::Game => 1.0,
            Self::Theater if band == 3 || band == 4 => 1.2,
            Self::Theater => 1.0,
            Self::Smart => 1.1,
        }
    }

    /// Theater leaves bass boost untouched.
    pub fn drives_bass_boost(self) -> bool {
        matches!(self, Self::Music | Self::Game | Self::Smart)
    }

    /// Music leaves reverb untouched.
    pub fn drives_reverb(self) -> bool {
        self != Self::Music
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Music => "music",
            Self::Game => "game",
            Self::Theater => "theater",
            Self::Smart => "smart",
        }
    }
}

impl fmt::Display for EnhancementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnhancementMode {
    type Err = SoundEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == lowered)
            .ok_or_else(|| SoundEngineError::msg(format!("unknown enhancement mode `{s}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codes_round_trip() {
        for mode in EnhancementMode::ALL {
            assert_eq!(EnhancementMode::from_raw(mode.raw()), Some(mode));
        }
        assert_eq!(EnhancementMode::from_raw(5), None);
        assert_eq!(EnhancementMode::from_raw(-1), None);
    }

    #[test]
    fn music_boosts_only_bands_two_to_four() {
        let mode = EnhancementMode::Music;
        assert_eq!(mode.band_multiplier(1), 1.0);
        assert_eq!(mode.band_multiplier(2), 1.05);
        assert_eq!(mode.band_multiplier(4), 1.05);
        assert_eq!(mode.band_multiplier(5), 1.0);
    }

    #[test]
    fn game_boosts_only_upper_bands() {
        let mode = EnhancementMode::Game;
        assert_eq!(mode.band_multiplier(4), 1.0);
        assert_eq!(mode.band_multiplier(5), 1.1);
    }

    #[test]
    fn theater_boosts_bands_three_and_four() {
        let mode = EnhancementMode::Theater;
        assert_eq!(mode.band_multiplier(2), 1.0);
        assert_eq!(mode.band_multiplier(3), 1.2);
        assert_eq!(mode.band_multiplier(4), 1.2);
        assert_eq!(mode.band_multiplier(5), 1.0);
    }

    #[test]
    fn smart_and_off_are_uniform() {
        for band in 0..10 {
            assert_eq!(EnhancementMode::Smart.band_multiplier(band), 1.1);
            assert_eq!(EnhancementMode::Off.band_multiplier(band), 1.0);
        }
    }

    #[test]
    fn reverb_and_bass_boost_asymmetry() {
        assert!(!EnhancementMode::Music.drives_reverb());
        assert!(EnhancementMode::Music.drives_bass_boost());
        assert!(EnhancementMode::Theater.drives_reverb());
        assert!(!EnhancementMode::Theater.drives_bass_boost());
    }

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Theater".parse::<EnhancementMode>().unwrap(), EnhancementMode::Theater);
        assert!("loud".parse::<EnhancementMode>().is_err());
    }
}
