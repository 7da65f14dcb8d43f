//! Audio file IO: decoding with symphonia and 16-bit WAV export with hound.

use std::{fs::File, path::Path};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, warn};

use crate::{BeatSyncError, Result};

/// Mono samples ready for analysis.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Samples normalised to [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds. Zero when the sample rate is unknown.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f64 / self.sample_rate as f64
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Interleaved multi-channel audio, used for background tracks, sound
/// kernels and the mixer output.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub channels: u16,
    pub sample_rate: u32,
    /// Interleaved samples `[L, R, L, R, ...]` for stereo.
    pub samples: Vec<f32>,
}

impl AudioClip {
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate,
            samples,
        }
    }

    pub fn silence(channels: u16, sample_rate: u32, frames: usize) -> Self {
        let channels = channels.max(1);
        Self::new(channels, sample_rate, vec![0.0; frames * channels as usize])
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample of `channel` at `frame`; mono clips answer for every channel.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels as usize;
        let channel = if channels == 1 { 0 } else { channel.min(channels - 1) };
        self.samples[frame * channels + channel]
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// Averages all channels into a mono analysis buffer.
    pub fn to_mono(&self) -> AudioBuffer {
        let channels = self.channels as usize;
        let samples = if channels == 1 {
            self.samples.clone()
        } else {
            self.samples
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };
        AudioBuffer::new(samples, self.sample_rate)
    }
}

/// Decodes an audio file and down-mixes it to mono at its native rate.
pub fn decode_file(path: &Path) -> Result<AudioBuffer> {
    decode_clip(path).map(|clip| clip.to_mono())
}

/// Decodes an audio file keeping its channel layout.
pub fn decode_clip(path: &Path) -> Result<AudioClip> {
    let file = File::open(path)
        .map_err(|e| BeatSyncError::decode(path, format!("failed to open file: {e}")))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| BeatSyncError::decode(path, format!("failed to probe format: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| BeatSyncError::decode(path, "no audio tracks found"))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let mut sample_rate = params.sample_rate.unwrap_or(0);
    let mut channels = params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| BeatSyncError::decode(path, format!("failed to create decoder: {e}")))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(BeatSyncError::decode(
                    path,
                    format!("failed to read packet: {e}"),
                ))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(reason)) => {
                warn!(path = %path.display(), reason, "skipping undecodable packet");
            }
            Err(e) => {
                return Err(BeatSyncError::decode(path, format!("decode failed: {e}")));
            }
        }
    }

    if sample_rate == 0 || channels == 0 {
        return Err(BeatSyncError::decode(
            path,
            "stream does not declare a sample rate or channel layout",
        ));
    }

    let clip = AudioClip::new(channels as u16, sample_rate, samples);
    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        frames = clip.frames(),
        "decoded audio"
    );
    Ok(clip)
}

/// Writes a clip as 16-bit PCM, clamping samples to full scale.
pub fn write_wav(path: &Path, clip: &AudioClip) -> Result<()> {
    let spec = hound::WavSpec {
        channels: clip.channels,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in &clip.samples {
        writer.write_sample(quantize(*sample))?;
    }
    writer.finalize()?;
    Ok(())
}

fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}
