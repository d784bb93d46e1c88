//! Core library for the adaptive sound engine.
//!
//! The engine keeps a chain of platform audio effects (equalizer, bass
//! boost, virtualizer and reverb) in line with the device output volume so
//! the perceived tonal balance stays steady as the user turns the volume up
//! or down. Each module owns one concern: numeric rules live in [`tuning`],
//! the per-session effect chain and its tick loop in [`controller`], and the
//! settings-driven lifecycle in [`orchestrator`]. Host services are reached
//! through the traits in [`host`] and [`effects`].

pub mod config;
pub mod controller;
pub mod effects;
pub mod error;
pub mod host;
pub mod memory;
pub mod mode;
pub mod orchestrator;
pub mod scheduler;
pub mod tuning;

pub use config::{AppConfig, EngineConfig};
pub use controller::{run_tick, EffectsController, TickReport};
pub use effects::{
    BassBoostSink, EffectKind, EffectSinkFactory, EffectsSession, EqualizerSink, LevelRange,
    ReverbPreset, ReverbSink, SessionId, VirtualizerSink,
};
pub use error::{Result, SoundEngineError};
pub use host::{ConfigurationSource, EffectiveSettings, PlaybackControl, VolumeSource};
pub use memory::{MemoryPlayback, MemorySettings, MemorySinkFactory, MemoryVolume, ParameterWrite};
pub use mode::EnhancementMode;
pub use orchestrator::{
    Collaborators, EnhancementOrchestrator, EnhancementState, OrchestratorStatus, Phase,
};
pub use scheduler::TickLoop;
pub use tuning::{EqualizerShape, TickPlan};
