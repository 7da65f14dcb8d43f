//! Offline analysis: audio samples in, [`BeatGrid`] out.

pub mod bands;
pub mod features;
pub mod key;
pub mod spectrum;
pub mod tempo;

use std::path::Path;

use tracing::info;

use self::{
    bands::{EnergyBands, MultiBandEnergySlicer},
    features::{Features, SpectralFeatureExtractor},
    key::{detect_key, KeyEstimate},
    tempo::{TempoEstimate, TempoEstimator},
};
use crate::{
    audio::{self, AudioBuffer},
    grid::{BeatGrid, BeatGridBuilder, GridInputs},
    AnalysisConfig, BeatSyncError, Result,
};

/// Everything one analysis pass produced. Only `grid` is persisted.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub grid: BeatGrid,
    pub features: Features,
    pub bands: EnergyBands,
    pub tempo: TempoEstimate,
    pub key: KeyEstimate,
}

/// Runs extractor, tempo/key estimation, band slicing and grid assembly in
/// sequence. Holds no state between calls, so one engine can serve many
/// files.
#[derive(Debug)]
pub struct AnalysisEngine {
    config: AnalysisConfig,
    extractor: SpectralFeatureExtractor,
    tempo: TempoEstimator,
    slicer: MultiBandEnergySlicer,
    builder: BeatGridBuilder,
}

impl AnalysisEngine {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        if config.min_bpm <= 0.0 || config.min_bpm >= config.max_bpm {
            return Err(BeatSyncError::InvalidInput(
                "tempo range must satisfy 0 < min_bpm < max_bpm",
            ));
        }
        Ok(Self {
            extractor: SpectralFeatureExtractor::new(&config)?,
            tempo: TempoEstimator::new(&config),
            slicer: MultiBandEnergySlicer::new(config.band_edges_hz),
            builder: BeatGridBuilder::new(config.retention, config.extended_beats),
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze(
        &self,
        audio: &AudioBuffer,
        filename: &str,
        bpm_hint: Option<f32>,
    ) -> Result<Analysis> {
        if audio.sample_rate == 0 {
            return Err(BeatSyncError::InvalidInput("sample rate must be non-zero"));
        }
        let duration = if audio.is_empty() {
            self.config.fallback_duration
        } else {
            audio.duration()
        };

        let features = self.extractor.extract(audio)?;
        let tempo = self
            .tempo
            .estimate(&features.onset_envelope, features.frame_rate(), bpm_hint);
        let key = detect_key(&features.chroma);
        info!(
            file = filename,
            bpm = tempo.bpm,
            key = %key.key,
            mode = ?key.mode,
            beats = tempo.beat_frames.len(),
            "tempo and key detected"
        );

        let frame_period = self.config.hop_length as f64 / audio.sample_rate as f64;
        let bands = self.slicer.slice(&features.mel, frame_period);

        let grid = self.builder.build(GridInputs {
            filename,
            duration,
            tempo: &tempo,
            key,
            features: &features,
            bands: Some(&bands),
        })?;

        Ok(Analysis {
            grid,
            features,
            bands,
            tempo,
            key,
        })
    }

    /// Decodes and analyses one file. The grid's `filename` is the file name
    /// without its directory.
    pub fn analyze_path(&self, audio_path: &Path, bpm_hint: Option<f32>) -> Result<Analysis> {
        let buffer = audio::decode_file(audio_path)?;
        let filename = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.analyze(&buffer, &filename, bpm_hint)
    }
}

/// Decodes `audio_path`, analyses it and writes the grid JSON to
/// `output_path`. Nothing is written when decoding or analysis fails.
pub fn analyze_file(
    audio_path: &Path,
    output_path: &Path,
    bpm_hint: Option<f32>,
    config: &AnalysisConfig,
) -> Result<BeatGrid> {
    let engine = AnalysisEngine::new(config.clone())?;
    let analysis = engine.analyze_path(audio_path, bpm_hint)?;
    analysis.grid.save(output_path)?;
    Ok(analysis.grid)
}
