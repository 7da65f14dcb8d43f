//! Core library for the beat-sync engine.
//!
//! Analysis turns an audio file into a [`BeatGrid`] once; everything after
//! that (animation, rendering, mixing) reads the grid and never touches the
//! audio analysis again. Each module owns one stage of that pipeline.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod grid;
pub mod mixer;
pub mod record;
pub mod render;
pub mod scene;
pub mod timeline;

pub use analysis::{
    analyze_file,
    bands::{EnergyBands, MultiBandEnergySlicer},
    features::{Features, SpectralFeatureExtractor},
    key::{detect_key, KeyEstimate, Mode, PitchClass},
    tempo::{TempoEstimate, TempoEstimator},
    Analysis, AnalysisEngine,
};
pub use audio::{decode_clip, decode_file, write_wav, AudioBuffer, AudioClip};
pub use config::{
    AnalysisConfig, AnimationConfig, AppConfig, MixerConfig, RenderSettings, RetentionBoost,
    ThemeKind,
};
pub use error::{BeatSyncError, Result};
pub use grid::{BeatEvent, BeatGrid, BeatGridBuilder, GridMetadata};
pub use mixer::{click_track, AudioEvent, EventMixer, SoundBank};
pub use record::{EncoderSettings, EncoderSink, FrameDumper, FrameSink, Recorder, RenderReport};
pub use render::{FrameRenderer, Theme};
pub use scene::Effects;
pub use timeline::{AnimationClock, AnimationState, BeatEdgeDetector, PlaybackClock};
