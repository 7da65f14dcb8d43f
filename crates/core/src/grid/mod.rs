//! The beat grid: the one artifact analysis persists for every render pass.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    analysis::{bands::EnergyBands, features::Features, tempo::TempoEstimate},
    BeatSyncError, KeyEstimate, Mode, PitchClass, Result, RetentionBoost,
};

/// Pitch-class colours, low notes blue/violet through to yellow-green.
pub const PITCH_COLORS: [&str; 12] = [
    "#0000FF", "#4B0082", "#8B00FF", "#9400D3", "#FF00FF", "#FF1493", "#FF4500", "#FF8C00",
    "#FFA500", "#FFD700", "#FFFF00", "#ADFF2F",
];

pub fn pitch_color_hex(pitch_index: usize) -> &'static str {
    PITCH_COLORS[pitch_index % 12]
}

/// Parses `#RRGGBB` (leading `#` optional).
pub fn parse_hex_color(hex: &str) -> Option<[u8; 3]> {
    let digits = hex.trim_start_matches('#');
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMetadata {
    pub filename: String,
    pub bpm: f64,
    pub key: PitchClass,
    pub mode: Mode,
    /// Mean inter-beat interval in seconds.
    #[serde(rename = "deltatime")]
    pub delta_time: f64,
    pub duration: f64,
    pub total_beats: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatEvent {
    pub timestamp: f64,
    pub energy: f64,
    #[serde(rename = "ms")]
    pub ms_timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_index: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_bands: Option<[f32; 4]>,
}

impl BeatEvent {
    pub fn new(timestamp: f64, energy: f64) -> Self {
        Self {
            timestamp,
            energy,
            ms_timestamp: (timestamp.max(0.0) * 1000.0) as u64,
            pitch_index: None,
            color_hex: None,
            energy_bands: None,
        }
    }

    pub fn sub_band(&self) -> Option<f32> {
        self.energy_bands.map(|bands| bands[0])
    }

    pub fn color(&self) -> Option<[u8; 3]> {
        self.color_hex.as_deref().and_then(parse_hex_color)
    }
}

/// Tempo, key and the ordered beats of one audio file.
///
/// Construction validates that timestamps are finite and strictly
/// increasing, and that `total_beats` matches; the fields are read-only
/// afterwards. Loading from JSON goes through the same validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBeatGrid")]
pub struct BeatGrid {
    metadata: GridMetadata,
    beats: Vec<BeatEvent>,
    #[serde(skip)]
    mean_energy: f64,
}

#[derive(Deserialize)]
struct RawBeatGrid {
    metadata: GridMetadata,
    beats: Vec<BeatEvent>,
}

impl TryFrom<RawBeatGrid> for BeatGrid {
    type Error = BeatSyncError;

    fn try_from(raw: RawBeatGrid) -> Result<Self> {
        BeatGrid::new(raw.metadata, raw.beats)
    }
}

impl BeatGrid {
    pub fn new(metadata: GridMetadata, beats: Vec<BeatEvent>) -> Result<Self> {
        if beats.iter().any(|b| !b.timestamp.is_finite() || !b.energy.is_finite()) {
            return Err(BeatSyncError::InvalidInput("beat values must be finite"));
        }
        if beats.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
            return Err(BeatSyncError::InvalidInput(
                "beat timestamps must be strictly increasing",
            ));
        }
        if beats.iter().any(|b| b.energy < 0.0) {
            return Err(BeatSyncError::InvalidInput("beat energy must not be negative"));
        }
        if metadata.total_beats != beats.len() {
            return Err(BeatSyncError::InvalidInput(
                "total_beats does not match the beat list",
            ));
        }
        let mean_energy = mean_energy(&beats);
        Ok(Self {
            metadata,
            beats,
            mean_energy,
        })
    }

    /// Grid with no beats, used when nothing rhythmic was found.
    pub fn empty(filename: impl Into<String>, duration: f64) -> Self {
        Self {
            metadata: GridMetadata {
                filename: filename.into(),
                bpm: 0.0,
                key: PitchClass::C,
                mode: Mode::Major,
                delta_time: 0.0,
                duration,
                total_beats: 0,
            },
            beats: Vec::new(),
            mean_energy: 0.0,
        }
    }

    pub fn metadata(&self) -> &GridMetadata {
        &self.metadata
    }

    pub fn beats(&self) -> &[BeatEvent] {
        &self.beats
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.metadata.duration
    }

    /// Mean beat energy; the reference that beat energies are judged
    /// against when they drive animation. Zero for an empty grid.
    pub fn mean_energy(&self) -> f64 {
        self.mean_energy
    }

    /// Index of the first beat strictly after `seconds`; `len()` when there
    /// is none.
    pub fn next_beat_index(&self, seconds: f64) -> usize {
        self.beats.partition_point(|beat| beat.timestamp <= seconds)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Writes the grid through a sibling temp file so readers never observe
    /// a half-written grid.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let tmp = path.with_extension("json.partial");
        fs::write(&tmp, json)?;
        if let Err(err) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        info!(path = %path.display(), beats = self.len(), "beat grid written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BeatSyncError::GridNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

fn mean_energy(beats: &[BeatEvent]) -> f64 {
    if beats.is_empty() {
        return 0.0;
    }
    beats.iter().map(|b| b.energy).sum::<f64>() / beats.len() as f64
}

/// Everything the builder reads from the analysis stages.
#[derive(Debug, Clone, Copy)]
pub struct GridInputs<'a> {
    pub filename: &'a str,
    pub duration: f64,
    pub tempo: &'a TempoEstimate,
    pub key: KeyEstimate,
    pub features: &'a Features,
    pub bands: Option<&'a EnergyBands>,
}

/// Converts tracked beat frames into the persisted [`BeatGrid`].
#[derive(Debug, Clone)]
pub struct BeatGridBuilder {
    retention: RetentionBoost,
    extended: bool,
}

impl BeatGridBuilder {
    pub fn new(retention: RetentionBoost, extended: bool) -> Self {
        Self {
            retention,
            extended,
        }
    }

    pub fn build(&self, inputs: GridInputs<'_>) -> Result<BeatGrid> {
        let features = inputs.features;
        let mut beats: Vec<BeatEvent> = Vec::with_capacity(inputs.tempo.beat_frames.len());

        for &frame in &inputs.tempo.beat_frames {
            let seconds = features.frame_to_time(frame);
            let raw_energy = features
                .time_to_frame(seconds, features.onset_envelope.len())
                .map(|i| features.onset_envelope[i] as f64)
                .unwrap_or(0.0);
            let energy = self.retention.apply(seconds, raw_energy);

            let timestamp = round_to(seconds, 4);
            if beats.last().is_some_and(|prev| prev.timestamp >= timestamp) {
                continue;
            }

            let mut beat = BeatEvent::new(timestamp, round_to(energy, 4));
            beat.ms_timestamp = (seconds * 1000.0) as u64;
            if self.extended {
                self.decorate(&mut beat, seconds, features, inputs.bands);
            }
            beats.push(beat);
        }

        if beats.is_empty() {
            warn!(file = inputs.filename, "no beats detected, writing an empty grid");
        }

        let delta_time = if beats.len() > 1 {
            let span = beats[beats.len() - 1].timestamp - beats[0].timestamp;
            span / (beats.len() - 1) as f64
        } else {
            0.0
        };

        let metadata = GridMetadata {
            filename: inputs.filename.to_string(),
            bpm: inputs.tempo.bpm as f64,
            key: inputs.key.key,
            mode: inputs.key.mode,
            delta_time,
            duration: inputs.duration,
            total_beats: beats.len(),
        };
        BeatGrid::new(metadata, beats)
    }

    fn decorate(
        &self,
        beat: &mut BeatEvent,
        seconds: f64,
        features: &Features,
        bands: Option<&EnergyBands>,
    ) {
        if let Some(frame) = features.time_to_frame(seconds, features.chroma.len()) {
            let column = &features.chroma[frame];
            let pitch = column
                .iter()
                .enumerate()
                .fold(0, |best, (i, v)| if *v > column[best] { i } else { best });
            beat.pitch_index = Some(pitch as u8);
            beat.color_hex = Some(pitch_color_hex(pitch).to_string());
        }
        if let Some(values) = bands.and_then(|b| b.nearest(seconds)) {
            beat.energy_bands = Some(values.map(|v| round_to(v as f64, 3) as f32));
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
