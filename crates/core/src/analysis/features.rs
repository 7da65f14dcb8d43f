use tracing::debug;

use super::spectrum::{mel_frequencies, MelFilterBank, PowerSpectrogram, Stft};
use crate::{AnalysisConfig, AudioBuffer, Result};

const LOG_AMIN: f32 = 1e-10;
const TOP_DB: f32 = 80.0;

/// Mel-scaled power spectrogram together with the centre frequency assigned
/// to each mel bin.
#[derive(Debug, Clone, Default)]
pub struct MelSpectrogram {
    /// One row of mel powers per frame.
    pub frames: Vec<Vec<f32>>,
    pub bin_frequencies: Vec<f32>,
}

/// Frame-level features on a shared hop grid.
#[derive(Debug, Clone)]
pub struct Features {
    pub sample_rate: u32,
    pub hop_length: usize,
    /// Positive spectral flux per frame.
    pub onset_envelope: Vec<f32>,
    /// Pitch-class energies per frame, each frame scaled so its loudest
    /// class is 1.0.
    pub chroma: Vec<[f32; 12]>,
    pub mel: MelSpectrogram,
}

impl Features {
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_length as f32
    }

    pub fn frame_to_time(&self, frame: usize) -> f64 {
        frame as f64 * self.hop_length as f64 / self.sample_rate as f64
    }

    /// Nearest frame index to `seconds`, clamped to `len` frames.
    pub fn time_to_frame(&self, seconds: f64, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let frame = (seconds * self.sample_rate as f64 / self.hop_length as f64).round();
        Some((frame.max(0.0) as usize).min(len - 1))
    }

    pub fn frame_count(&self) -> usize {
        self.onset_envelope.len()
    }
}

/// Turns raw samples into onset strength, chroma and a mel spectrogram.
#[derive(Debug)]
pub struct SpectralFeatureExtractor {
    config: AnalysisConfig,
    stft: Stft,
}

impl SpectralFeatureExtractor {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        Ok(Self {
            stft: Stft::new(config.n_fft, config.hop_length)?,
            config: config.clone(),
        })
    }

    pub fn extract(&self, audio: &AudioBuffer) -> Result<Features> {
        let sample_rate = audio.sample_rate.max(1);
        let power = self.stft.power(&audio.samples, sample_rate)?;

        let onset_bank = MelFilterBank::new(
            sample_rate,
            self.config.n_fft,
            self.config.n_mels,
            0.0,
            sample_rate as f32 / 2.0,
        );
        let onset_mel: Vec<Vec<f32>> = power.frames.iter().map(|f| onset_bank.apply(f)).collect();
        let onset_envelope = onset_strength(&onset_mel, self.config.n_fft, self.config.hop_length);

        let mel_fmax = self.config.mel_fmax.min(sample_rate as f32 / 2.0);
        let band_bank = MelFilterBank::new(
            sample_rate,
            self.config.n_fft,
            self.config.n_mels,
            0.0,
            mel_fmax,
        );
        let mel = MelSpectrogram {
            frames: power.frames.iter().map(|f| band_bank.apply(f)).collect(),
            bin_frequencies: mel_frequencies(self.config.n_mels, 0.0, mel_fmax),
        };

        let chroma = chromagram(&power, self.config.chroma_fmin, self.config.chroma_fmax);

        debug!(
            frames = power.frames.len(),
            sample_rate,
            hop = self.config.hop_length,
            "extracted spectral features"
        );

        Ok(Features {
            sample_rate,
            hop_length: self.config.hop_length,
            onset_envelope,
            chroma,
            mel,
        })
    }
}

/// Mean positive first difference of the log-mel spectrogram. The result is
/// delayed by the half-window so peaks line up with the attack itself rather
/// than the first frame whose window reaches it.
pub fn onset_strength(mel: &[Vec<f32>], n_fft: usize, hop_length: usize) -> Vec<f32> {
    let frame_count = mel.len();
    if frame_count == 0 {
        return Vec::new();
    }

    let reference = mel
        .iter()
        .flat_map(|frame| frame.iter().copied())
        .fold(LOG_AMIN, f32::max);
    let ref_db = 10.0 * reference.log10();
    let floor = -TOP_DB;
    let db: Vec<Vec<f32>> = mel
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|p| (10.0 * p.max(LOG_AMIN).log10() - ref_db).max(floor))
                .collect()
        })
        .collect();

    let mut flux = vec![0.0_f32; frame_count];
    for t in 1..frame_count {
        let bins = db[t].len().max(1);
        let rise: f32 = db[t]
            .iter()
            .zip(db[t - 1].iter())
            .map(|(now, before)| (now - before).max(0.0))
            .sum();
        flux[t] = rise / bins as f32;
    }

    let delay = n_fft / (2 * hop_length);
    let mut envelope = vec![0.0_f32; frame_count];
    for t in 0..frame_count.saturating_sub(delay) {
        envelope[t + delay] = flux[t];
    }
    envelope
}

/// Folds power-spectrum bins onto the nearest equal-tempered pitch class.
pub fn chromagram(power: &PowerSpectrogram, fmin: f32, fmax: f32) -> Vec<[f32; 12]> {
    let classes: Vec<Option<usize>> = (0..power.n_bins())
        .map(|bin| {
            let freq = power.bin_frequency(bin);
            if bin == 0 || freq < fmin || freq > fmax {
                return None;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(12) as usize)
        })
        .collect();

    power
        .frames
        .iter()
        .map(|frame| {
            let mut chroma = [0.0_f32; 12];
            for (value, class) in frame.iter().zip(classes.iter()) {
                if let Some(class) = class {
                    chroma[*class] += value;
                }
            }
            let peak = chroma.iter().copied().fold(0.0_f32, f32::max);
            if peak > 0.0 {
                chroma.iter_mut().for_each(|c| *c /= peak);
            }
            chroma
        })
        .collect()
}
