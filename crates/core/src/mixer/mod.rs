//! Offline sound-effect mixing over a looped background track.

use std::{
    collections::{HashMap, HashSet},
    f32::consts::TAU,
    fs,
    path::Path,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    audio::{self, AudioBuffer, AudioClip},
    MixerConfig, Result,
};

fn full_volume() -> f32 {
    1.0
}

/// One sound to place on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEvent {
    pub timestamp: f64,
    pub kind: String,
    #[serde(default = "full_volume")]
    pub volume: f32,
    /// 0.0 is hard left, 1.0 hard right; `None` leaves both channels as is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<f32>,
}

impl AudioEvent {
    pub fn new(timestamp: f64, kind: impl Into<String>, volume: f32) -> Self {
        Self {
            timestamp,
            kind: kind.into(),
            volume,
            pan: None,
        }
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = Some(pan);
        self
    }
}

/// Reads a JSON array of events.
pub fn load_events(path: &Path) -> Result<Vec<AudioEvent>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Waveform kernels by sound kind, all at one sample rate.
#[derive(Debug, Clone)]
pub struct SoundBank {
    sample_rate: u32,
    kernels: HashMap<String, AudioClip>,
}

impl SoundBank {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            kernels: HashMap::new(),
        }
    }

    /// Synthesised `shot`, `rocket`, `coin`, `death` and `explosion` kernels.
    pub fn builtin(sample_rate: u32) -> Self {
        let mut bank = Self::new(sample_rate);
        for (kind, seconds, from_hz, to_hz, volume) in [
            ("shot", 0.1, 600.0, 100.0, 0.3),
            ("rocket", 0.3, 300.0, 50.0, 0.4),
            ("coin", 0.1, 1_500.0, 1_500.0, 0.2),
            ("death", 0.15, 150.0, 50.0, 0.4),
            ("explosion", 0.4, 100.0, 20.0, 0.5),
        ] {
            bank.insert(kind, sweep(sample_rate, seconds, from_hz, to_hz, volume));
        }
        bank
    }

    /// Loads every `<kind>.wav` in `dir`, resampled to `sample_rate`.
    pub fn load_dir(dir: &Path, sample_rate: u32) -> Result<Self> {
        let mut bank = Self::new(sample_rate);
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_wav = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            let Some(kind) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_wav {
                continue;
            }
            let clip = audio::decode_clip(&path)?;
            bank.insert(kind, clip);
        }
        info!(dir = %dir.display(), kinds = bank.len(), "sound bank loaded");
        Ok(bank)
    }

    pub fn insert(&mut self, kind: impl Into<String>, clip: AudioClip) {
        let clip = resample(&clip, self.sample_rate);
        self.kernels.insert(kind.into(), clip);
    }

    pub fn get(&self, kind: &str) -> Option<&AudioClip> {
        self.kernels.get(kind)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Exponential frequency sweep with an exponential fade, identical on both
/// channels.
fn sweep(sample_rate: u32, seconds: f32, from_hz: f32, to_hz: f32, volume: f32) -> AudioClip {
    let len = (sample_rate as f32 * seconds) as usize;
    let mut samples = Vec::with_capacity(len * 2);
    let mut phase = 0.0_f32;
    for n in 0..len {
        let t = n as f32 / sample_rate as f32;
        let progress = t / seconds;
        let freq = from_hz * (to_hz / from_hz).powf(progress);
        phase += TAU * freq / sample_rate as f32;
        let value = phase.sin() * (-5.0 * progress).exp() * volume;
        samples.push(value);
        samples.push(value);
    }
    AudioClip::new(2, sample_rate, samples)
}

/// Linear-interpolation resampling; returns a copy when the rate matches.
pub fn resample(clip: &AudioClip, sample_rate: u32) -> AudioClip {
    if clip.sample_rate == sample_rate || clip.sample_rate == 0 || clip.is_empty() {
        return AudioClip::new(clip.channels, sample_rate, clip.samples.clone());
    }
    let ratio = clip.sample_rate as f64 / sample_rate as f64;
    let frames = (clip.frames() as f64 / ratio).round() as usize;
    let channels = clip.channels.max(1) as usize;
    let last = clip.frames() - 1;
    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let pos = i as f64 * ratio;
        let base = (pos.floor() as usize).min(last);
        let next = (base + 1).min(last);
        let frac = (pos - base as f64) as f32;
        for ch in 0..channels {
            let a = clip.sample(base, ch);
            let b = clip.sample(next, ch);
            samples.push(a + (b - a) * frac);
        }
    }
    AudioClip::new(clip.channels, sample_rate, samples)
}

/// Keeps a kernel frame every `factor` input frames, shifting pitch up for
/// factors above 1 and down below 1.
pub fn decimate(clip: &AudioClip, factor: f32) -> AudioClip {
    if (factor - 1.0).abs() < f32::EPSILON || factor <= 0.0 {
        return clip.clone();
    }
    let channels = clip.channels.max(1) as usize;
    let mut samples = Vec::new();
    let mut k = 0usize;
    loop {
        let index = (k as f64 * factor as f64).round() as usize;
        if index >= clip.frames() {
            break;
        }
        for ch in 0..channels {
            samples.push(clip.sample(index, ch));
        }
        k += 1;
    }
    AudioClip::new(clip.channels, clip.sample_rate, samples)
}

struct Placement<'a> {
    offset: usize,
    /// Leading kernel frames cut off by a negative timestamp.
    skip: usize,
    kernel: std::borrow::Cow<'a, AudioClip>,
    volume: f32,
    pan: Option<f32>,
}

/// Sums events into a stereo buffer over a looped, attenuated background,
/// then limits the result.
#[derive(Debug)]
pub struct EventMixer {
    config: MixerConfig,
    bank: SoundBank,
    rng: StdRng,
}

impl EventMixer {
    pub fn new(config: MixerConfig, bank: SoundBank) -> Self {
        let bank = if bank.sample_rate() == config.sample_rate {
            bank
        } else {
            let mut resampled = SoundBank::new(config.sample_rate);
            for (kind, clip) in bank.kernels {
                resampled.insert(kind, clip);
            }
            resampled
        };
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            bank,
        }
    }

    pub fn bank(&self) -> &SoundBank {
        &self.bank
    }

    /// Drops events past their kind's configured cap, keeping input order.
    pub fn apply_limits<'e>(&self, events: &'e [AudioEvent]) -> Vec<&'e AudioEvent> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut dropped = 0usize;
        let kept: Vec<&AudioEvent> = events
            .iter()
            .filter(|event| {
                let count = counts.entry(event.kind.as_str()).or_insert(0);
                match self.config.kind_limits.get(&event.kind) {
                    Some(limit) if *count >= *limit => {
                        dropped += 1;
                        false
                    }
                    _ => {
                        *count += 1;
                        true
                    }
                }
            })
            .collect();
        if dropped > 0 {
            warn!(dropped, "events over their kind limit were dropped");
        }
        kept
    }

    /// Renders `events` over `background` for at least `duration_hint`
    /// seconds. Returns silence when there is nothing to mix.
    pub fn render(
        &mut self,
        events: &[AudioEvent],
        background: Option<&AudioClip>,
        duration_hint: f64,
    ) -> AudioClip {
        let sample_rate = self.config.sample_rate;
        let max_duration = self.config.max_duration.max(0.0);
        let mut unknown: HashSet<&str> = HashSet::new();
        let mut out_of_range = 0usize;
        let mut placements = Vec::new();

        for event in self.apply_limits(events) {
            if !event.timestamp.is_finite() || event.timestamp >= max_duration {
                out_of_range += 1;
                continue;
            }
            let Some(kernel) = self.bank.get(&event.kind) else {
                if unknown.insert(event.kind.as_str()) {
                    warn!(kind = %event.kind, "no sound registered for event kind");
                }
                continue;
            };
            let jitter = self.config.pitch_jitter.abs();
            let kernel = if jitter > 0.0 {
                let factor = self.rng.random_range(1.0 - jitter..=1.0 + jitter);
                std::borrow::Cow::Owned(decimate(kernel, factor))
            } else {
                std::borrow::Cow::Borrowed(kernel)
            };
            let start = (event.timestamp * sample_rate as f64).round() as i64;
            let skip = start.min(0).unsigned_abs() as usize;
            if skip >= kernel.frames() {
                out_of_range += 1;
                continue;
            }
            placements.push(Placement {
                offset: start.max(0) as usize,
                skip,
                kernel,
                volume: event.volume.clamp(0.0, 1.0),
                pan: event.pan.map(|p| p.clamp(0.0, 1.0)),
            });
        }

        if out_of_range > 0 {
            warn!(out_of_range, max_duration, "events outside the mix range were dropped");
        }

        let events_end = placements
            .iter()
            .map(|p| p.offset + p.kernel.frames() - p.skip)
            .max()
            .unwrap_or(0);
        let hint = if duration_hint.is_finite() {
            duration_hint.clamp(0.0, max_duration)
        } else {
            0.0
        };
        let hinted = (hint * sample_rate as f64).round() as usize;
        let frames = hinted.max(events_end);
        let mut out = vec![0.0_f32; frames * 2];

        if let Some(background) = background.filter(|bg| !bg.is_empty()) {
            let bg = resample(background, sample_rate);
            let gain = self.config.background_gain;
            let bg_frames = bg.frames();
            for (i, frame) in out.chunks_exact_mut(2).enumerate() {
                let src = i % bg_frames;
                frame[0] = bg.sample(src, 0) * gain;
                frame[1] = bg.sample(src, 1) * gain;
            }
        }

        for placement in &placements {
            if placement.offset >= frames {
                warn!(offset = placement.offset, "event starts past the end of the mix");
                continue;
            }
            let (left_gain, right_gain) = match placement.pan {
                Some(pan) => (1.0 - pan, pan),
                None => (1.0, 1.0),
            };
            let remaining = placement.kernel.frames() - placement.skip;
            let available = (frames - placement.offset).min(remaining);
            for j in 0..available {
                let at = (placement.offset + j) * 2;
                let src = placement.skip + j;
                out[at] += placement.kernel.sample(src, 0) * placement.volume * left_gain;
                out[at + 1] += placement.kernel.sample(src, 1) * placement.volume * right_gain;
            }
        }

        self.limit(&mut out);
        debug!(events = placements.len(), frames, "mix rendered");
        AudioClip::new(2, sample_rate, out)
    }

    /// Hard clip at the ceiling, then scale so the peak sits at the headroom.
    fn limit(&self, samples: &mut [f32]) {
        let ceiling = self.config.clip_ceiling.abs();
        for s in samples.iter_mut() {
            *s = s.clamp(-ceiling, ceiling);
        }
        let peak = samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        if peak > 0.0 {
            let scale = self.config.headroom / peak;
            samples.iter_mut().for_each(|s| *s *= scale);
        }
    }
}

const CLICK_HZ: f32 = 1_000.0;
const CLICK_SECONDS: f32 = 0.1;

/// Mixes a decaying 1 kHz click at each beat time over `audio`, half and
/// half, and normalises the peak to full scale.
pub fn click_track(audio: &AudioBuffer, beat_times: &[f64]) -> AudioBuffer {
    let sample_rate = audio.sample_rate.max(1);
    let click_len = (sample_rate as f32 * CLICK_SECONDS) as usize;
    let click: Vec<f32> = (0..click_len)
        .map(|n| {
            let t = n as f32 / sample_rate as f32;
            let decay = 2f32.powf(-10.0 * n as f32 / click_len.max(1) as f32);
            (TAU * CLICK_HZ * t).sin() * decay
        })
        .collect();

    let mut clicks = vec![0.0_f32; audio.len()];
    for time in beat_times {
        let start = (time.max(0.0) * sample_rate as f64).round() as usize;
        if start >= clicks.len() {
            continue;
        }
        for (slot, value) in clicks[start..].iter_mut().zip(click.iter()) {
            *slot += value;
        }
    }

    let mut mixed: Vec<f32> = audio
        .samples
        .iter()
        .zip(clicks.iter())
        .map(|(s, c)| s * 0.5 + c * 0.5)
        .collect();
    let peak = mixed.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        mixed.iter_mut().for_each(|s| *s /= peak);
    }
    AudioBuffer::new(mixed, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MixerConfig {
        MixerConfig {
            sample_rate: 1_000,
            pitch_jitter: 0.0,
            ..MixerConfig::default()
        }
    }

    fn square_bank() -> SoundBank {
        let mut bank = SoundBank::new(1_000);
        bank.insert("tick", AudioClip::new(1, 1_000, vec![0.5; 100]));
        bank
    }

    #[test]
    fn nothing_to_mix_is_silence() {
        let mut mixer = EventMixer::new(config(), square_bank());
        let out = mixer.render(&[], None, 2.0);
        assert_eq!(out.frames(), 2_000);
        assert!(out.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn buffer_extends_to_the_last_event() {
        let mut mixer = EventMixer::new(config(), square_bank());
        let out = mixer.render(&[AudioEvent::new(3.0, "tick", 1.0)], None, 1.0);
        assert_eq!(out.frames(), 3_100);
    }

    #[test]
    fn events_past_the_maximum_duration_are_dropped() {
        let cfg = MixerConfig {
            max_duration: 5.0,
            ..config()
        };
        let mut mixer = EventMixer::new(cfg, square_bank());
        let events = [
            AudioEvent::new(1.0, "tick", 1.0),
            AudioEvent::new(1e7, "tick", 1.0),
            AudioEvent::new(f64::NAN, "tick", 1.0),
        ];
        let out = mixer.render(&events, None, 1e9);
        assert_eq!(out.frames(), 5_000);
        assert!(out.sample(1_050, 0) > 0.0);
    }

    #[test]
    fn negative_timestamps_cut_the_head_of_the_kernel() {
        let mut bank = SoundBank::new(1_000);
        let mut samples = vec![0.1_f32; 50];
        samples.extend(std::iter::repeat(0.8).take(50));
        bank.insert("step", AudioClip::new(1, 1_000, samples));
        let mut mixer = EventMixer::new(config(), bank);

        let out = mixer.render(&[AudioEvent::new(-0.05, "step", 1.0)], None, 0.0);
        assert_eq!(out.frames(), 50);
        assert!((out.sample(0, 0) - 0.9).abs() < 1e-6);
        assert!((out.sample(49, 0) - 0.9).abs() < 1e-6);

        let gone = mixer.render(&[AudioEvent::new(-1.0, "step", 1.0)], None, 0.2);
        assert!(gone.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn pan_splits_channels() {
        let mut mixer = EventMixer::new(config(), square_bank());
        let out = mixer.render(&[AudioEvent::new(0.0, "tick", 1.0).with_pan(0.0)], None, 0.5);
        assert!(out.sample(10, 0) > 0.0);
        assert_eq!(out.sample(10, 1), 0.0);
    }

    #[test]
    fn kind_limits_drop_the_excess() {
        let mut cfg = config();
        cfg.kind_limits.insert("tick".into(), 2);
        let mixer = EventMixer::new(cfg, square_bank());
        let events: Vec<AudioEvent> = (0..5).map(|i| AudioEvent::new(i as f64, "tick", 1.0)).collect();
        let kept = mixer.apply_limits(&events);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].timestamp, 1.0);
    }

    #[test]
    fn unknown_kinds_are_skipped() {
        let mut mixer = EventMixer::new(config(), square_bank());
        let out = mixer.render(&[AudioEvent::new(0.0, "laser", 1.0)], None, 0.1);
        assert!(out.samples.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn background_loops_under_the_events() {
        let mut mixer = EventMixer::new(config(), square_bank());
        let bg = AudioClip::new(1, 1_000, vec![0.1, 0.2, 0.4]);
        let out = mixer.render(&[], Some(&bg), 0.01);
        let left: Vec<f32> = (0..6).map(|i| out.sample(i, 0)).collect();
        assert!((left[2] - 0.9).abs() < 1e-6);
        assert_eq!(left[0], left[3]);
        assert_eq!(left[1], left[4]);
        assert!((left[0] / left[2] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn limiter_clips_then_normalises() {
        let mut bank = SoundBank::new(1_000);
        bank.insert("loud", AudioClip::new(1, 1_000, vec![1.0; 10]));
        let mut mixer = EventMixer::new(config(), bank);
        let events = [
            AudioEvent::new(0.0, "loud", 1.0),
            AudioEvent::new(0.005, "loud", 1.0),
        ];
        let out = mixer.render(&events, None, 0.02);
        assert!((out.sample(6, 0) - 0.9).abs() < 1e-6);
        assert!((out.sample(0, 0) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn decimation_shortens_for_higher_pitch() {
        let clip = AudioClip::new(1, 1_000, (0..100).map(|i| i as f32).collect());
        assert_eq!(decimate(&clip, 1.1).frames(), 91);
        assert_eq!(decimate(&clip, 0.9).frames(), 111);
        assert_eq!(decimate(&clip, 2.0).samples[..3], [0.0, 2.0, 4.0]);
    }

    #[test]
    fn builtin_bank_has_every_kind() {
        let bank = SoundBank::builtin(44_100);
        for kind in ["shot", "rocket", "coin", "death", "explosion"] {
            let clip = bank.get(kind).unwrap();
            assert_eq!(clip.channels, 2);
            assert!(clip.peak() <= 0.5 + 1e-6);
        }
        assert_eq!(bank.get("rocket").unwrap().frames(), 13_230);
    }

    #[test]
    fn clicks_land_on_beats() {
        let audio = AudioBuffer::new(vec![0.0; 8_000], 8_000);
        let out = click_track(&audio, &[0.5]);
        assert!(out.samples[..4_000].iter().all(|s| *s == 0.0));
        assert!(out.samples[4_000..4_800].iter().any(|s| s.abs() > 0.5));
        let peak = out.samples.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn resample_halves_the_frame_count() {
        let clip = AudioClip::new(1, 2_000, vec![0.0; 200]);
        assert_eq!(resample(&clip, 1_000).frames(), 100);
    }
}
