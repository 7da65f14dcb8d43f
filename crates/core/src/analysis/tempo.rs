use tracing::debug;

use super::spectrum::hann_window;
use crate::AnalysisConfig;

/// Spread of the log-normal tempo prior, in octaves.
const PRIOR_STD_OCTAVES: f32 = 1.0;

/// Output of the tempo tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TempoEstimate {
    /// Zero when the envelope carries no onsets.
    pub bpm: f32,
    /// Onset-frame indices of the tracked beats, strictly increasing.
    pub beat_frames: Vec<usize>,
}

/// Autocorrelation tempo estimation followed by dynamic-programming beat
/// tracking.
///
/// The autocorrelation is weighted by a log-normal prior centred on the
/// start tempo, which is what keeps the estimate from jumping an octave when
/// accents make half or double the real tempo look periodic too.
#[derive(Debug, Clone)]
pub struct TempoEstimator {
    default_start_bpm: f32,
    min_bpm: f32,
    max_bpm: f32,
    window: usize,
    tightness: f32,
}

impl TempoEstimator {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            default_start_bpm: config.default_start_bpm,
            min_bpm: config.min_bpm,
            max_bpm: config.max_bpm,
            window: config.tempo_window.max(4),
            tightness: config.tightness,
        }
    }

    pub fn estimate(&self, onset: &[f32], frame_rate: f32, start_bpm: Option<f32>) -> TempoEstimate {
        let start_bpm = start_bpm
            .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
            .unwrap_or(self.default_start_bpm);

        let Some(bpm) = self.estimate_bpm(onset, frame_rate, start_bpm) else {
            return TempoEstimate::default();
        };
        let beat_frames = self.track_beats(onset, frame_rate, bpm);
        TempoEstimate { bpm, beat_frames }
    }

    /// Picks the lag with the highest prior-weighted autocorrelation,
    /// averaged over Hann-windowed stretches of the envelope.
    pub fn estimate_bpm(&self, onset: &[f32], frame_rate: f32, start_bpm: f32) -> Option<f32> {
        if onset.len() < 4 || onset.iter().all(|v| *v <= f32::EPSILON) || frame_rate <= 0.0 {
            return None;
        }

        let window = self.window.min(onset.len());
        let min_lag = ((60.0 * frame_rate / self.max_bpm).floor() as usize).max(1);
        let max_lag = ((60.0 * frame_rate / self.min_bpm).ceil() as usize).min(window - 1);
        if min_lag >= max_lag {
            return None;
        }

        let acf = self.mean_autocorrelation(onset, window, max_lag + 1)?;

        let log_start = start_bpm.log2();
        let weighted: Vec<f32> = (0..=max_lag + 1)
            .map(|lag| {
                if lag == 0 || lag >= acf.len() {
                    return 0.0;
                }
                let bpm = 60.0 * frame_rate / lag as f32;
                let z = (bpm.log2() - log_start) / PRIOR_STD_OCTAVES;
                acf[lag] * (-0.5 * z * z).exp()
            })
            .collect();

        let best = (min_lag..=max_lag).fold(min_lag, |best, lag| {
            if weighted[lag] > weighted[best] {
                lag
            } else {
                best
            }
        });
        if weighted[best] <= 0.0 {
            return None;
        }

        let refined = refine_peak(&weighted, best);
        let bpm = 60.0 * frame_rate / refined;
        debug!(min_lag, max_lag, best, refined, bpm, start_bpm, "tempo estimate");
        Some(bpm.clamp(self.min_bpm, self.max_bpm))
    }

    fn mean_autocorrelation(&self, onset: &[f32], window: usize, lags: usize) -> Option<Vec<f32>> {
        let taper = hann_window(window);
        let step = (window / 8).max(1);
        let mut starts: Vec<usize> = (0..=onset.len() - window).step_by(step).collect();
        if starts.last() != Some(&(onset.len() - window)) {
            starts.push(onset.len() - window);
        }

        let mut total = vec![0.0_f32; lags];
        let mut used = 0usize;
        let mut segment = vec![0.0_f32; window];
        for start in starts {
            for (i, slot) in segment.iter_mut().enumerate() {
                *slot = onset[start + i] * taper[i];
            }
            let energy: f32 = segment.iter().map(|v| v * v).sum();
            if energy <= f32::EPSILON {
                continue;
            }
            for (lag, acc) in total.iter_mut().enumerate() {
                let sum: f32 = segment[..window - lag]
                    .iter()
                    .zip(&segment[lag..])
                    .map(|(a, b)| a * b)
                    .sum();
                *acc += sum / energy;
            }
            used += 1;
        }

        if used == 0 {
            return None;
        }
        total.iter_mut().for_each(|v| *v /= used as f32);
        Some(total)
    }

    /// Dynamic-programming beat tracker: every frame's cumulative score is
    /// its local onset score plus the best predecessor between half and two
    /// periods back, penalised by the log-deviation from the period.
    pub fn track_beats(&self, onset: &[f32], frame_rate: f32, bpm: f32) -> Vec<usize> {
        if onset.is_empty() || bpm <= 0.0 {
            return Vec::new();
        }
        let period = (60.0 * frame_rate / bpm).round().max(2.0) as usize;

        let local = local_score(onset, period);
        let Some(peak) = local.iter().copied().reduce(f32::max) else {
            return Vec::new();
        };
        if peak <= 0.0 {
            return Vec::new();
        }

        let n = local.len();
        let threshold = 0.01 * peak;
        let half = ((period as f32) / 2.0).round() as usize;
        let log_period = (period as f32).ln();

        let mut cumulative = vec![0.0_f32; n];
        let mut backlink: Vec<Option<usize>> = vec![None; n];
        let mut first_beat = true;

        for i in 0..n {
            let mut best: Option<(usize, f32)> = None;
            if i >= half {
                let earliest = i.saturating_sub(2 * period);
                for candidate in (earliest..=i - half).rev() {
                    let deviation = ((i - candidate) as f32).ln() - log_period;
                    let score = cumulative[candidate] - self.tightness * deviation * deviation;
                    if best.map_or(true, |(_, s)| score > s) {
                        best = Some((candidate, score));
                    }
                }
            }

            cumulative[i] = local[i] + best.map_or(0.0, |(_, s)| s);
            if first_beat && local[i] < threshold {
                backlink[i] = None;
            } else {
                backlink[i] = best.map(|(c, _)| c);
                first_beat = false;
            }
        }

        let Some(last) = last_beat(&cumulative) else {
            return Vec::new();
        };
        let mut beats = vec![last];
        let mut cursor = last;
        while let Some(previous) = backlink[cursor] {
            beats.push(previous);
            cursor = previous;
        }
        beats.reverse();

        trim_weak_edges(&local, beats)
    }
}

fn local_score(onset: &[f32], period: usize) -> Vec<f32> {
    let n = onset.len();
    let mean = onset.iter().sum::<f32>() / n as f32;
    let std = (onset.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n as f32).sqrt();
    if std <= f32::EPSILON {
        return vec![0.0; n];
    }

    let kernel: Vec<f32> = (-(period as isize)..=period as isize)
        .map(|k| {
            let x = k as f32 * 32.0 / period as f32;
            (-0.5 * x * x).exp()
        })
        .collect();
    let half = period as isize;

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = i + k as isize - half;
                    (j >= 0 && (j as usize) < n).then(|| w * onset[j as usize] / std)
                })
                .sum()
        })
        .collect()
}

/// Latest local maximum of the cumulative score that reaches half the median
/// of all local maxima.
fn last_beat(cumulative: &[f32]) -> Option<usize> {
    let maxima: Vec<usize> = (0..cumulative.len())
        .filter(|&i| is_local_max(cumulative, i))
        .collect();
    if maxima.is_empty() {
        return None;
    }
    let mut scores: Vec<f32> = maxima.iter().map(|&i| cumulative[i]).collect();
    scores.sort_by(|a, b| a.total_cmp(b));
    let mid = scores.len() / 2;
    let median = if scores.len() % 2 == 0 {
        0.5 * (scores[mid - 1] + scores[mid])
    } else {
        scores[mid]
    };
    maxima
        .into_iter()
        .rev()
        .find(|&i| cumulative[i] >= 0.5 * median)
}

fn is_local_max(values: &[f32], i: usize) -> bool {
    i > 0 && values[i] > values[i - 1] && (i + 1 == values.len() || values[i] >= values[i + 1])
}

/// Drops leading and trailing beats whose onset support is weaker than half
/// the RMS of the smoothed beat strengths. The smoothing window has unit
/// sum, so a run of equal strengths keeps its level.
fn trim_weak_edges(local: &[f32], beats: Vec<usize>) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }
    let strengths: Vec<f32> = beats.iter().map(|&b| local[b]).collect();
    let mut taper = hann_window(5);
    let total: f32 = taper.iter().sum();
    taper.iter_mut().for_each(|w| *w /= total);
    let smoothed: Vec<f32> = (0..strengths.len() as isize)
        .map(|i| {
            taper
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let j = i + k as isize - 2;
                    (j >= 0 && (j as usize) < strengths.len()).then(|| w * strengths[j as usize])
                })
                .sum()
        })
        .collect();
    let rms = (smoothed.iter().map(|v| v * v).sum::<f32>() / smoothed.len() as f32).sqrt();
    let threshold = 0.5 * rms;

    let Some(first) = strengths.iter().position(|s| *s > threshold) else {
        return Vec::new();
    };
    let last = strengths.iter().rposition(|s| *s > threshold).unwrap_or(first);
    beats[first..=last].to_vec()
}

/// Parabolic interpolation around an interior peak.
fn refine_peak(values: &[f32], peak: usize) -> f32 {
    if peak == 0 || peak + 1 >= values.len() {
        return peak as f32;
    }
    let (left, centre, right) = (values[peak - 1], values[peak], values[peak + 1]);
    let curvature = left - 2.0 * centre + right;
    if curvature.abs() <= f32::EPSILON {
        return peak as f32;
    }
    let offset = (0.5 * (left - right) / curvature).clamp(-0.5, 0.5);
    peak as f32 + offset
}
