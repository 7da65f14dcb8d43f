use std::{collections::HashMap, fmt, path::Path, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{BeatSyncError, Result};

/// Top-level configuration structure for the application.
///
/// Every component receives the section it needs from the caller; nothing is
/// picked at import time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub animation: AnimationConfig,
    pub render: RenderSettings,
    pub mixer: MixerConfig,
}

impl AppConfig {
    /// Loads a JSON config file. Missing sections and fields fall back to
    /// their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

/// Settings for the offline analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    /// Upper edge of the mel spectrogram handed to the band slicer.
    pub mel_fmax: f32,
    pub chroma_fmin: f32,
    pub chroma_fmax: f32,
    /// Tempo prior used when the caller gives no hint.
    pub default_start_bpm: f32,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Length in onset frames of each autocorrelation window.
    pub tempo_window: usize,
    /// How strongly the beat tracker penalises deviations from the period.
    pub tightness: f32,
    /// Boundaries between the sub/low/mid/high bands.
    pub band_edges_hz: [f32; 3],
    pub retention: RetentionBoost,
    /// Duration reported for empty input.
    pub fallback_duration: f64,
    /// Emit `pitch_index`, `color_hex` and `energy_bands` on every beat.
    pub extended_beats: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            mel_fmax: 8_000.0,
            chroma_fmin: 32.7,
            chroma_fmax: 5_000.0,
            default_start_bpm: 80.0,
            min_bpm: 40.0,
            max_bpm: 220.0,
            tempo_window: 384,
            tightness: 100.0,
            band_edges_hz: [250.0, 500.0, 2_000.0],
            retention: RetentionBoost::default(),
            fallback_duration: 10.0,
            extended_beats: true,
        }
    }
}

/// Opening-hit policy: beats inside the first `window_seconds` get their
/// energy replaced by `max(energy * multiplier, floor)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionBoost {
    pub window_seconds: f64,
    pub multiplier: f64,
    pub floor: f64,
}

impl Default for RetentionBoost {
    fn default() -> Self {
        Self {
            window_seconds: 5.0,
            multiplier: 2.5,
            floor: 4.0,
        }
    }
}

impl RetentionBoost {
    pub fn apply(&self, timestamp: f64, energy: f64) -> f64 {
        if timestamp < self.window_seconds {
            (energy * self.multiplier).max(self.floor)
        } else {
            energy
        }
    }
}

/// Tunables for the bouncing-ball animation clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    pub base_jump_height: f64,
    /// Extra arc height per unit of relative beat energy.
    pub energy_gain: f64,
    /// Upper clamp on the beat energy, relative to the grid's mean beat
    /// energy, that drives arc height and stretch.
    pub max_drive: f64,
    pub stretch_gain: f64,
    pub squash_gain: f64,
    /// Fraction of the beat interval at each edge where squash takes over.
    pub impact_zone: f64,
    pub ball_radius: f64,
    /// Ground line position as a fraction of the frame height.
    pub ground_ratio: f64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            base_jump_height: 300.0,
            energy_gain: 250.0,
            max_drive: 2.0,
            stretch_gain: 0.3,
            squash_gain: 0.4,
            impact_zone: 0.1,
            ball_radius: 40.0,
            ground_ratio: 0.75,
        }
    }
}

/// Visual theme selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeKind {
    #[default]
    Neon,
    Zen,
    Glitch,
}

impl FromStr for ThemeKind {
    type Err = BeatSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "neon" => Ok(Self::Neon),
            "zen" => Ok(Self::Zen),
            "glitch" => Ok(Self::Glitch),
            other => Err(BeatSyncError::msg(format!(
                "unknown theme `{other}` (expected neon, zen or glitch)"
            ))),
        }
    }
}

impl fmt::Display for ThemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Neon => "neon",
            Self::Zen => "zen",
            Self::Glitch => "glitch",
        };
        f.write_str(name)
    }
}

/// Configuration options for the recording subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub theme: ThemeKind,
    /// Seed for presentation-only randomness (particles, shake, glitches).
    pub seed: u64,
    pub sprite_cache_capacity: usize,
    pub trail_length: usize,
    /// When set, every frame is also written as a PNG into this directory.
    pub frame_dump_dir: Option<PathBuf>,
    pub frame_queue_depth: usize,
    pub encoder: String,
    pub crf: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 60,
            theme: ThemeKind::Neon,
            seed: 7,
            sprite_cache_capacity: 64,
            trail_length: 25,
            frame_dump_dir: None,
            frame_queue_depth: 8,
            encoder: "ffmpeg".to_string(),
            crf: 18,
        }
    }
}

/// Settings for the event mixer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub background_gain: f32,
    /// Maximum relative pitch deviation applied to each event.
    pub pitch_jitter: f32,
    /// Hard clip level applied before peak normalisation.
    pub clip_ceiling: f32,
    /// Final peak level as a fraction of full scale.
    pub headroom: f32,
    pub seed: u64,
    /// Maximum number of events mixed per sound kind.
    pub kind_limits: HashMap<String, usize>,
    /// Longest mix in seconds; events starting later are dropped and the
    /// duration hint is capped to it.
    pub max_duration: f64,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            background_gain: 0.4,
            pitch_jitter: 0.1,
            clip_ceiling: 1.5,
            headroom: 0.9,
            seed: 11,
            kind_limits: HashMap::new(),
            max_duration: 600.0,
        }
    }
}
