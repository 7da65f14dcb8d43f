use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{BeatSyncError, Result};

/// Power spectrogram computed on centred, zero-padded frames.
#[derive(Debug, Clone)]
pub struct PowerSpectrogram {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    /// One row of `n_fft / 2 + 1` power values per frame.
    pub frames: Vec<Vec<f32>>,
}

impl PowerSpectrogram {
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn bin_frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.sample_rate as f32 / self.n_fft as f32
    }
}

/// Short-time Fourier transform with a periodic Hann window. Frame `i` is
/// centred on sample `i * hop_length`.
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    plan: Arc<dyn RealToComplex<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Result<Self> {
        if n_fft < 2 || n_fft % 2 != 0 {
            return Err(BeatSyncError::InvalidInput("n_fft must be an even number >= 2"));
        }
        if hop_length == 0 {
            return Err(BeatSyncError::InvalidInput("hop length must be positive"));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        Ok(Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            plan: planner.plan_fft_forward(n_fft),
        })
    }

    pub fn power(&self, samples: &[f32], sample_rate: u32) -> Result<PowerSpectrogram> {
        let frame_count = if samples.is_empty() {
            0
        } else {
            1 + samples.len() / self.hop_length
        };
        let pad = self.n_fft / 2;

        let mut input = self.plan.make_input_vec();
        let mut spectrum: Vec<Complex32> = self.plan.make_output_vec();
        let mut scratch = self.plan.make_scratch_vec();
        let mut frames = Vec::with_capacity(frame_count);

        for frame in 0..frame_count {
            let origin = (frame * self.hop_length) as isize - pad as isize;
            for (offset, slot) in input.iter_mut().enumerate() {
                let index = origin + offset as isize;
                let sample = if index >= 0 && (index as usize) < samples.len() {
                    samples[index as usize]
                } else {
                    0.0
                };
                *slot = sample * self.window[offset];
            }
            self.plan
                .process_with_scratch(&mut input, &mut spectrum, &mut scratch)?;
            frames.push(spectrum.iter().map(|bin| bin.norm_sqr()).collect());
        }

        Ok(PowerSpectrogram {
            sample_rate,
            n_fft: self.n_fft,
            hop_length: self.hop_length,
            frames,
        })
    }
}

impl fmt::Debug for Stft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

/// Periodic Hann window, the shape used for spectral analysis frames.
pub fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| 0.5 - 0.5 * ((2.0 * PI * n as f32) / len as f32).cos())
        .collect()
}

const MEL_F_SP: f32 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f32 = 1_000.0;
const MEL_MIN_LOG_MEL: f32 = MEL_MIN_LOG_HZ / MEL_F_SP;

fn mel_log_step() -> f32 {
    6.4_f32.ln() / 27.0
}

/// Slaney mel scale: linear below 1 kHz, logarithmic above.
pub fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_MEL + (hz / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    } else {
        hz / MEL_F_SP
    }
}

pub fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MEL_MIN_LOG_MEL {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - MEL_MIN_LOG_MEL)).exp()
    } else {
        mel * MEL_F_SP
    }
}

/// `count` frequencies evenly spaced on the mel scale between `fmin` and
/// `fmax`, both inclusive.
pub fn mel_frequencies(count: usize, fmin: f32, fmax: f32) -> Vec<f32> {
    if count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![fmin];
    }
    let low = hz_to_mel(fmin);
    let high = hz_to_mel(fmax);
    (0..count)
        .map(|i| mel_to_hz(low + (high - low) * i as f32 / (count - 1) as f32))
        .collect()
}

/// Triangular, area-normalised mel filters over the bins of a power
/// spectrum.
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    filters: Vec<MelFilter>,
}

#[derive(Debug, Clone)]
struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

impl MelFilterBank {
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let fmax = fmax.min(nyquist);
        let n_bins = n_fft / 2 + 1;
        let bin_hz = sample_rate as f32 / n_fft as f32;
        let edges = mel_frequencies(n_mels + 2, fmin, fmax);

        let filters = (0..n_mels)
            .map(|m| {
                let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
                let norm = if upper > lower { 2.0 / (upper - lower) } else { 0.0 };
                let mut first_bin = None;
                let mut weights = Vec::new();
                for bin in 0..n_bins {
                    let freq = bin as f32 * bin_hz;
                    let rising = if center > lower {
                        (freq - lower) / (center - lower)
                    } else {
                        0.0
                    };
                    let falling = if upper > center {
                        (upper - freq) / (upper - center)
                    } else {
                        0.0
                    };
                    let weight = rising.min(falling).max(0.0) * norm;
                    if weight > 0.0 {
                        let start = *first_bin.get_or_insert(bin);
                        weights.resize(bin - start, 0.0);
                        weights.push(weight);
                    }
                }
                MelFilter {
                    first_bin: first_bin.unwrap_or(0),
                    weights,
                }
            })
            .collect();

        Self { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Projects one power spectrum frame onto the mel filters.
    pub fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| {
                filter
                    .weights
                    .iter()
                    .zip(power.iter().skip(filter.first_bin))
                    .map(|(w, p)| w * p)
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_scale_round_trips() {
        for hz in [0.0, 440.0, 1_000.0, 4_321.0, 8_000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((back - hz).abs() < 0.05, "{hz} -> {back}");
        }
    }

    #[test]
    fn mel_frequencies_span_the_requested_range() {
        let freqs = mel_frequencies(128, 0.0, 8_000.0);
        assert_eq!(freqs.len(), 128);
        assert_eq!(freqs[0], 0.0);
        assert!((freqs[127] - 8_000.0).abs() < 0.5);
        assert!(freqs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn stft_frames_are_centred_on_hops() {
        let stft = Stft::new(256, 64).unwrap();
        let samples = vec![0.0_f32; 1_000];
        let spec = stft.power(&samples, 8_000).unwrap();
        assert_eq!(spec.frames.len(), 1 + 1_000 / 64);
        assert_eq!(spec.frames[0].len(), 129);
    }

    #[test]
    fn sine_energy_lands_in_the_expected_bin() {
        let sample_rate = 8_000;
        let stft = Stft::new(512, 128).unwrap();
        let samples: Vec<f32> = (0..4_000)
            .map(|n| (2.0 * PI * 1_000.0 * n as f32 / sample_rate as f32).sin())
            .collect();
        let spec = stft.power(&samples, sample_rate).unwrap();
        let frame = &spec.frames[10];
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 64);
    }

    #[test]
    fn rejects_odd_fft_sizes() {
        assert!(Stft::new(1023, 256).is_err());
    }
}
