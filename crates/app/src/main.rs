use std::path::{Path, PathBuf};

use beat_sync_core::{
    analyze_file, audio, click_track, mixer, AnimationClock, AppConfig, BeatGrid, EncoderSettings,
    EncoderSink, EventMixer, Recorder, SoundBank, ThemeKind,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> beat_sync_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let result = match cli.command {
        Commands::Analyze { audio, output, bpm } => run_analyze(&audio, output, bpm, &config),
        Commands::Render {
            audio,
            grid,
            output,
            fps,
            theme,
            width,
            height,
            dump_frames,
        } => {
            let mut config = config;
            let render = &mut config.render;
            if let Some(fps) = fps {
                render.fps = fps;
            }
            if let Some(theme) = theme {
                render.theme = theme;
            }
            if let Some(width) = width {
                render.width = width;
            }
            if let Some(height) = height {
                render.height = height;
            }
            if dump_frames.is_some() {
                render.frame_dump_dir = dump_frames;
            }
            run_render(&audio, &grid, &output, &config)
        }
        Commands::Mix {
            events,
            output,
            background,
            duration,
            sfx_dir,
        } => run_mix(
            &events,
            &output,
            background.as_deref(),
            duration,
            sfx_dir.as_deref(),
            &config,
        ),
        Commands::Clicks {
            audio,
            grid,
            output,
        } => run_clicks(&audio, &grid, &output),
        Commands::Inspect { grid, at } => run_inspect(&grid, at, &config),
    };

    if let Err(err) = &result {
        tracing::error!(%err, "command failed");
    }
    result
}

fn run_analyze(
    input: &Path,
    output: Option<PathBuf>,
    bpm: Option<f32>,
    config: &AppConfig,
) -> beat_sync_core::Result<()> {
    let output = output.unwrap_or_else(|| input.with_extension("json"));
    tracing::info!(input = %input.display(), output = %output.display(), ?bpm, "analysing");
    let grid = analyze_file(input, &output, bpm, &config.analysis)?;
    let meta = grid.metadata();
    println!(
        "{}: {:.1} BPM, {} {:?}, {} beats",
        meta.filename, meta.bpm, meta.key, meta.mode, meta.total_beats
    );
    Ok(())
}

fn run_render(
    audio: &Path,
    grid: &Path,
    output: &Path,
    config: &AppConfig,
) -> beat_sync_core::Result<()> {
    let grid = BeatGrid::load(grid)?;
    tracing::info!(
        output = %output.display(),
        fps = config.render.fps,
        theme = %config.render.theme,
        "rendering"
    );
    let recorder = Recorder::new(&config.render, config.animation.clone())?;
    let settings =
        EncoderSettings::from_render(&config.render, Some(audio.to_path_buf()), output.to_path_buf());
    let mut sink = EncoderSink::spawn(&settings)?;
    let report = recorder.render(&grid, &mut sink)?;
    println!("wrote {} frames to {}", report.frames, output.display());
    Ok(())
}

fn run_mix(
    events: &Path,
    output: &Path,
    background: Option<&Path>,
    duration: Option<f64>,
    sfx_dir: Option<&Path>,
    config: &AppConfig,
) -> beat_sync_core::Result<()> {
    let events = mixer::load_events(events)?;
    let sample_rate = config.mixer.sample_rate;
    let bank = match sfx_dir {
        Some(dir) => SoundBank::load_dir(dir, sample_rate)?,
        None => SoundBank::builtin(sample_rate),
    };
    let background = background.map(audio::decode_clip).transpose()?;
    let duration = duration
        .or_else(|| background.as_ref().map(|bg| bg.duration()))
        .unwrap_or(0.0);

    let mut mixer = EventMixer::new(config.mixer.clone(), bank);
    let mix = mixer.render(&events, background.as_ref(), duration);
    audio::write_wav(output, &mix)?;
    tracing::info!(output = %output.display(), seconds = mix.duration(), "mix written");
    Ok(())
}

fn run_clicks(audio_path: &Path, grid: &Path, output: &Path) -> beat_sync_core::Result<()> {
    let grid = BeatGrid::load(grid)?;
    let source = audio::decode_file(audio_path)?;
    let times: Vec<f64> = grid.beats().iter().map(|b| b.timestamp).collect();
    let mixed = click_track(&source, &times);
    let clip = beat_sync_core::AudioClip::new(1, mixed.sample_rate, mixed.samples);
    audio::write_wav(output, &clip)?;
    tracing::info!(output = %output.display(), clicks = times.len(), "click track written");
    Ok(())
}

fn run_inspect(grid: &Path, at: f64, config: &AppConfig) -> beat_sync_core::Result<()> {
    let grid = BeatGrid::load(grid)?;
    let clock = AnimationClock::new(config.animation.clone());
    let state = clock.evaluate(&grid, at);
    println!("{}", serde_json::to_string_pretty(&state)?);
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
#[command(author, version, about = "Beat-synchronised animation renderer", long_about = None)]
struct Cli {
    /// JSON configuration file; missing fields use defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse an audio file and write its beat grid.
    Analyze {
        /// Audio file to analyse (wav, flac, mp3, ogg).
        audio: PathBuf,
        /// Output path for the beat grid; defaults to the audio path with a
        /// `.json` extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Expected tempo, used to steer away from half/double tempo.
        #[arg(long)]
        bpm: Option<f32>,
    },
    /// Render a video for an audio file from its beat grid.
    Render {
        audio: PathBuf,
        grid: PathBuf,
        output: PathBuf,
        #[arg(long)]
        fps: Option<u32>,
        /// neon, zen or glitch.
        #[arg(long)]
        theme: Option<ThemeKind>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Also write every frame as a PNG into this directory.
        #[arg(long)]
        dump_frames: Option<PathBuf>,
    },
    /// Mix sound events over an optional background track into a WAV file.
    Mix {
        /// JSON array of `{timestamp, kind, volume, pan}` events.
        events: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        background: Option<PathBuf>,
        /// Minimum length of the mix in seconds.
        #[arg(long)]
        duration: Option<f64>,
        /// Directory of `<kind>.wav` files replacing the built-in sounds.
        #[arg(long)]
        sfx_dir: Option<PathBuf>,
    },
    /// Overlay a click on every beat of the grid, for checking sync by ear.
    Clicks {
        audio: PathBuf,
        grid: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the animation state at one instant.
    Inspect {
        grid: PathBuf,
        #[arg(long)]
        at: f64,
    },
}
