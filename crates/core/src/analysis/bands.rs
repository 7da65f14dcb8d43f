use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::MelSpectrogram;

pub const BAND_COUNT: usize = 4;

/// Per-frame `[sub, low, mid, high]` energies. Each band is scaled by its
/// own maximum over time, so values compare across time within a band but
/// not across bands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyBands {
    pub frames: Vec<[f32; BAND_COUNT]>,
    /// Seconds between consecutive frames.
    pub frame_period: f64,
}

impl EnergyBands {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame closest to `seconds`.
    pub fn nearest(&self, seconds: f64) -> Option<[f32; BAND_COUNT]> {
        if self.frames.is_empty() || self.frame_period <= 0.0 {
            return None;
        }
        let index = (seconds / self.frame_period).round().max(0.0) as usize;
        Some(self.frames[index.min(self.frames.len() - 1)])
    }
}

/// Splits mel bins into four contiguous bands at fixed centre-frequency
/// boundaries.
#[derive(Debug, Clone)]
pub struct MultiBandEnergySlicer {
    edges_hz: [f32; 3],
}

impl MultiBandEnergySlicer {
    pub fn new(edges_hz: [f32; 3]) -> Self {
        Self { edges_hz }
    }

    /// Band index for a mel bin centred at `hz`.
    pub fn band_of(&self, hz: f32) -> usize {
        self.edges_hz
            .iter()
            .position(|edge| hz < *edge)
            .unwrap_or(BAND_COUNT - 1)
    }

    pub fn slice(&self, mel: &MelSpectrogram, frame_period: f64) -> EnergyBands {
        let membership: Vec<usize> = mel.bin_frequencies.iter().map(|hz| self.band_of(*hz)).collect();
        let mut counts = [0usize; BAND_COUNT];
        for band in &membership {
            counts[*band] += 1;
        }

        let mut frames: Vec<[f32; BAND_COUNT]> = mel
            .frames
            .iter()
            .map(|frame| {
                let mut sums = [0.0_f32; BAND_COUNT];
                for (value, band) in frame.iter().zip(membership.iter()) {
                    sums[*band] += value;
                }
                let mut means = [0.0_f32; BAND_COUNT];
                for band in 0..BAND_COUNT {
                    if counts[band] > 0 {
                        means[band] = sums[band] / counts[band] as f32;
                    }
                }
                means
            })
            .collect();

        for band in 0..BAND_COUNT {
            let peak = frames.iter().map(|f| f[band]).fold(0.0_f32, f32::max);
            if peak > 0.0 {
                for frame in frames.iter_mut() {
                    frame[band] /= peak;
                }
            }
        }

        debug!(?counts, frames = frames.len(), "sliced energy bands");
        EnergyBands {
            frames,
            frame_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrogram() -> MelSpectrogram {
        MelSpectrogram {
            bin_frequencies: vec![100.0, 200.0, 300.0, 1_000.0, 3_000.0, 6_000.0],
            frames: vec![
                vec![1.0, 3.0, 0.5, 10.0, 0.0, 0.0],
                vec![2.0, 2.0, 2.0, 5.0, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 20.0, 0.0, 0.0],
            ],
        }
    }

    #[test]
    fn bins_split_at_band_edges() {
        let slicer = MultiBandEnergySlicer::new([250.0, 500.0, 2_000.0]);
        assert_eq!(slicer.band_of(249.9), 0);
        assert_eq!(slicer.band_of(250.0), 1);
        assert_eq!(slicer.band_of(1_999.0), 2);
        assert_eq!(slicer.band_of(2_000.0), 3);
    }

    #[test]
    fn each_band_peaks_at_exactly_one() {
        let bands = MultiBandEnergySlicer::new([250.0, 500.0, 2_000.0]).slice(&spectrogram(), 0.5);
        assert_eq!(bands.frames[0][0], 1.0);
        assert_eq!(bands.frames[1][1], 1.0);
        assert_eq!(bands.frames[2][2], 1.0);
        assert_eq!(bands.frames[1][0], 1.0);
        assert!(bands
            .frames
            .iter()
            .all(|f| f.iter().all(|v| (0.0..=1.0).contains(v))));
    }

    #[test]
    fn silent_band_stays_zero() {
        let bands = MultiBandEnergySlicer::new([250.0, 500.0, 2_000.0]).slice(&spectrogram(), 0.5);
        assert!(bands.frames.iter().all(|f| f[3] == 0.0));
    }

    #[test]
    fn nearest_frame_lookup_clamps() {
        let bands = MultiBandEnergySlicer::new([250.0, 500.0, 2_000.0]).slice(&spectrogram(), 0.5);
        assert_eq!(bands.nearest(0.6), Some(bands.frames[1]));
        assert_eq!(bands.nearest(99.0), Some(bands.frames[2]));
    }
}
