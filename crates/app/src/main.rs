use std::{path::PathBuf, sync::Arc, time::Duration};

use adaptive_sound_core::{
    AppConfig, Collaborators, EnhancementMode, EnhancementOrchestrator, EqualizerShape,
    LevelRange, MemoryPlayback, MemorySettings, MemorySinkFactory, MemoryVolume, TickPlan,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> adaptive_sound_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            mode,
            volume,
            equalizer,
        } => run_plan(mode, volume, equalizer),
        Commands::Simulate {
            config,
            mode,
            volume,
            max_volume,
            seconds,
            sweep,
            dump_writes,
            equalizer,
        } => run_simulate(SimulateArgs {
            config,
            mode,
            volume,
            max_volume,
            seconds,
            sweep,
            dump_writes,
            equalizer,
        }),
    }
}

fn run_plan(
    mode: EnhancementMode,
    volume: u8,
    equalizer: EqualizerArgs,
) -> adaptive_sound_core::Result<()> {
    tracing::debug!(%mode, volume, "computing tick plan");
    let plan = TickPlan::compute(mode, volume, Some(equalizer.shape()));
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

struct SimulateArgs {
    config: Option<PathBuf>,
    mode: EnhancementMode,
    volume: i32,
    max_volume: i32,
    seconds: u64,
    sweep: bool,
    dump_writes: bool,
    equalizer: EqualizerArgs,
}

fn run_simulate(args: SimulateArgs) -> adaptive_sound_core::Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    tracing::info!(mode = %args.mode, seconds = args.seconds, "starting simulation");

    let settings = Arc::new(MemorySettings::new());
    settings.set_mode(args.mode);
    settings.set_enabled(args.mode.is_active());
    let volume = Arc::new(MemoryVolume::new(args.volume, args.max_volume));
    let playback = Arc::new(MemoryPlayback::new());
    let shape = args.equalizer.shape();
    let sinks = MemorySinkFactory::new(shape.bands, shape.range);
    if !args.dump_writes {
        sinks.limit_writes(0);
    }

    let mut orchestrator = EnhancementOrchestrator::new(
        &config.engine,
        Collaborators {
            volume: volume.clone(),
            configuration: settings.clone(),
            playback: playback.clone(),
            sinks: Arc::new(sinks.clone()),
        },
    )?;
    orchestrator.start()?;

    let steps = args.seconds.max(1);
    for step in 0..steps {
        if args.sweep {
            let level = (i64::from(args.max_volume) * (step as i64 + 1) / steps as i64) as i32;
            volume.set_current(level);
            tracing::info!(volume = level, "volume changed");
        }
        std::thread::sleep(Duration::from_secs(1));
    }

    let status = orchestrator.status();
    orchestrator.shutdown();

    if args.dump_writes {
        for write in sinks.writes() {
            println!("{}", serde_json::to_string(&write)?);
        }
    }

    let summary = serde_json::json!({
        "status": status,
        "pauses": playback.pauses(),
        "writes": sinks.total_writes(),
        "band_levels": sinks.band_levels(),
        "bass_boost": sinks.bass_boost(),
        "virtualizer": sinks.virtualizer(),
        "reverb": sinks.reverb(),
        "reverb_code": sinks.reverb().code(),
        "live_sinks": sinks.live_sinks(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Volume-adaptive audio enhancement", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the parameters one tick would apply.
    Plan {
        /// Enhancement mode (off, music, game, theater, smart).
        #[arg(short, long)]
        mode: EnhancementMode,
        /// Output volume in percent.
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=100))]
        volume: u8,
        #[command(flatten)]
        equalizer: EqualizerArgs,
    },
    /// Run the orchestrator against in-memory audio services.
    Simulate {
        /// Optional JSON engine configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, default_value = "smart")]
        mode: EnhancementMode,
        /// Starting stream volume.
        #[arg(short, long, default_value_t = 7)]
        volume: i32,
        #[arg(long, default_value_t = 15)]
        max_volume: i32,
        /// How long to keep the loop running.
        #[arg(short, long, default_value_t = 3)]
        seconds: u64,
        /// Raise the volume step by step up to the maximum.
        #[arg(long)]
        sweep: bool,
        /// Print every recorded sink write as a JSON line.
        #[arg(long)]
        dump_writes: bool,
        #[command(flatten)]
        equalizer: EqualizerArgs,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct EqualizerArgs {
    /// Number of equalizer bands.
    #[arg(long, default_value_t = 5)]
    bands: u16,
    /// Lowest band level in millibels.
    #[arg(long, default_value_t = -1500, allow_negative_numbers = true)]
    min_level: i16,
    /// Highest band level in millibels.
    #[arg(long, default_value_t = 1500, allow_negative_numbers = true)]
    max_level: i16,
}

impl EqualizerArgs {
    fn shape(&self) -> EqualizerShape {
        EqualizerShape {
            bands: self.bands,
            range: LevelRange::new(self.min_level, self.max_level.max(self.min_level)),
        }
    }
}
