//! Maps query times onto the beat grid.
//!
//! [`AnimationClock::evaluate`] is a pure function of `(grid, t)`: the same
//! query returns the same geometry whether it comes from an offline render
//! at any frame rate or from an interactive preview. Anything stateful
//! (edge detection, effects) lives outside it.

use std::time::Instant;

use serde::Serialize;

use crate::{grid::BeatGrid, AnimationConfig};

/// Interpolated pose of the bouncing ball at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnimationState {
    pub time: f64,
    /// Index of the beat the current interval starts at; `None` before the
    /// first beat or for an empty grid.
    pub beat_index: Option<usize>,
    /// Position inside the current beat interval, in [0, 1].
    pub progress: f64,
    /// Height above the ground line, in pixels.
    pub height: f64,
    /// Normalised vertical velocity `1 - 2 * progress`; positive while rising.
    pub velocity: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    /// Energy driving the current arc, clamped to the configured maximum.
    pub energy: f64,
    pub color: Option<[u8; 3]>,
    /// True outside the beat range, where the ball sits still.
    pub resting: bool,
}

impl AnimationState {
    fn resting(time: f64, beat_index: Option<usize>, progress: f64) -> Self {
        Self {
            time,
            beat_index,
            progress,
            height: 0.0,
            velocity: 0.0,
            scale_x: 1.0,
            scale_y: 1.0,
            energy: 0.0,
            color: None,
            resting: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnimationClock {
    config: AnimationConfig,
}

impl AnimationClock {
    pub fn new(config: AnimationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnimationConfig {
        &self.config
    }

    pub fn evaluate(&self, grid: &BeatGrid, t: f64) -> AnimationState {
        let beats = grid.beats();
        let next = grid.next_beat_index(t);
        if next == 0 {
            return AnimationState::resting(t, None, 0.0);
        }
        let prev = &beats[next - 1];
        if next == beats.len() {
            let mut state = AnimationState::resting(t, Some(next - 1), 1.0);
            state.color = prev.color();
            return state;
        }
        let upcoming = &beats[next];

        let interval = upcoming.timestamp - prev.timestamp;
        let progress = if interval > 0.0 {
            ((t - prev.timestamp) / interval).clamp(0.0, 1.0)
        } else {
            1.0
        };

        let cfg = &self.config;
        let reference = grid.mean_energy();
        let relative_energy = if reference > 0.0 {
            prev.energy / reference
        } else {
            0.0
        };
        let drive = relative_energy.clamp(0.0, cfg.max_drive.max(0.0));
        let peak = cfg.base_jump_height + cfg.energy_gain * drive;
        let height = 4.0 * peak * progress * (1.0 - progress);
        let velocity = 1.0 - 2.0 * progress;

        let relative = if cfg.max_drive > 0.0 {
            drive / cfg.max_drive
        } else {
            0.0
        };
        let edge_distance = progress.min(1.0 - progress);
        let (scale_x, scale_y) = if cfg.impact_zone > 0.0 && edge_distance < cfg.impact_zone {
            let depth = 1.0 - edge_distance / cfg.impact_zone;
            let squash = cfg.squash_gain * depth * (0.5 + 0.5 * relative);
            (1.0 + squash, 1.0 - squash)
        } else {
            let stretch = 1.0 + cfg.stretch_gain * velocity.abs() * relative;
            (1.0 / stretch, stretch)
        };

        AnimationState {
            time: t,
            beat_index: Some(next - 1),
            progress,
            height,
            velocity,
            scale_x,
            scale_y,
            energy: drive,
            color: prev.color(),
            resting: false,
        }
    }
}

/// Reports the first query that lands in a new beat interval. Effects hang
/// their one-shot triggers off this.
#[derive(Debug, Clone, Default)]
pub struct BeatEdgeDetector {
    last: Option<usize>,
}

impl BeatEdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the beat index when `state` entered a different beat than
    /// the previous call did.
    pub fn observe(&mut self, state: &AnimationState) -> Option<usize> {
        let changed = state.beat_index.is_some() && state.beat_index != self.last;
        self.last = state.beat_index;
        if changed {
            state.beat_index
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Number of frames needed to cover `duration` seconds at `fps`.
pub fn frame_count(duration: f64, fps: u32) -> u64 {
    if fps == 0 || duration <= 0.0 {
        return 0;
    }
    (duration * fps as f64).ceil() as u64
}

pub fn frame_time(index: u64, fps: u32) -> f64 {
    index as f64 / fps.max(1) as f64
}

/// Where the playback time comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// `t = frame / fps`; used for archival renders.
    Frames { fps: u32 },
    /// Wall time since the clock was started; used for live preview, where
    /// drift against the grid is acceptable.
    Wall,
}

#[derive(Debug, Clone)]
pub struct PlaybackClock {
    source: ClockSource,
    frame: u64,
    started: Instant,
}

impl PlaybackClock {
    pub fn frames(fps: u32) -> Self {
        Self::with_source(ClockSource::Frames { fps })
    }

    pub fn wall() -> Self {
        Self::with_source(ClockSource::Wall)
    }

    fn with_source(source: ClockSource) -> Self {
        Self {
            source,
            frame: 0,
            started: Instant::now(),
        }
    }

    pub fn source(&self) -> ClockSource {
        self.source
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn reset(&mut self) {
        self.frame = 0;
        self.started = Instant::now();
    }

    /// Current playback time in seconds.
    pub fn now(&self) -> f64 {
        match self.source {
            ClockSource::Frames { fps } => frame_time(self.frame, fps),
            ClockSource::Wall => self.started.elapsed().as_secs_f64(),
        }
    }

    /// Returns the time of the current frame and moves to the next one.
    pub fn advance(&mut self) -> f64 {
        let t = self.now();
        self.frame += 1;
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BeatEvent, GridMetadata};
    use crate::{Mode, PitchClass};

    fn grid(beats: &[(f64, f64)]) -> BeatGrid {
        let events: Vec<BeatEvent> = beats.iter().map(|(t, e)| BeatEvent::new(*t, *e)).collect();
        BeatGrid::new(
            GridMetadata {
                filename: "test".into(),
                bpm: 60.0,
                key: PitchClass::C,
                mode: Mode::Major,
                delta_time: 1.0,
                duration: 10.0,
                total_beats: events.len(),
            },
            events,
        )
        .unwrap()
    }

    #[test]
    fn arc_peaks_mid_interval() {
        let clock = AnimationClock::default();
        let grid = grid(&[(5.0, 1.0), (6.0, 1.0)]);
        let mid = clock.evaluate(&grid, 5.5);
        let early = clock.evaluate(&grid, 5.01);

        assert_eq!(mid.progress, 0.5);
        assert_eq!(mid.height, 300.0 + 250.0);
        assert!(early.height < 0.05 * mid.height);
        assert!(!mid.resting);
    }

    #[test]
    fn outside_the_beat_range_is_resting() {
        let clock = AnimationClock::default();
        let grid = grid(&[(1.0, 1.0), (2.0, 1.0)]);
        let before = clock.evaluate(&grid, 0.5);
        let after = clock.evaluate(&grid, 3.0);
        assert!(before.resting && after.resting);
        assert_eq!(before.height, 0.0);
        assert_eq!(after.beat_index, Some(1));
        assert_eq!((after.scale_x, after.scale_y), (1.0, 1.0));
    }

    #[test]
    fn empty_grid_is_always_resting() {
        let clock = AnimationClock::default();
        let empty = BeatGrid::empty("silence", 10.0);
        for t in [-1.0, 0.0, 4.2, 100.0] {
            let state = clock.evaluate(&empty, t);
            assert!(state.resting);
            assert_eq!(state.height, 0.0);
        }
    }

    #[test]
    fn squash_near_contact_stretch_in_flight() {
        let clock = AnimationClock::default();
        let grid = grid(&[(0.0, 2.0), (1.0, 2.0)]);
        let contact = clock.evaluate(&grid, 0.01);
        let flight = clock.evaluate(&grid, 0.2);
        assert!(contact.scale_y < 1.0 && contact.scale_x > 1.0);
        assert!(flight.scale_y > 1.0 && flight.scale_x < 1.0);
    }

    #[test]
    fn energy_is_clamped() {
        let clock = AnimationClock::default();
        let grid = grid(&[(0.0, 40.0), (1.0, 1.0), (2.0, 1.0), (3.0, 1.0)]);
        assert_eq!(clock.evaluate(&grid, 0.5).energy, 2.0);
    }

    #[test]
    fn loud_beats_jump_higher_whatever_the_energy_scale() {
        let clock = AnimationClock::default();
        for scale in [1.0, 100.0] {
            let grid = grid(&[(0.0, 1.5 * scale), (1.0, 0.5 * scale), (2.0, scale)]);
            let loud = clock.evaluate(&grid, 0.5);
            let soft = clock.evaluate(&grid, 1.5);
            assert!((loud.energy - 1.5).abs() < 1e-12, "scale {scale}");
            assert!((soft.energy - 0.5).abs() < 1e-12, "scale {scale}");
            assert!(loud.height > soft.height);
        }
    }

    #[test]
    fn edge_detector_fires_once_per_beat() {
        let clock = AnimationClock::default();
        let grid = grid(&[(1.0, 1.0), (2.0, 1.0), (3.0, 1.0)]);
        let mut edges = BeatEdgeDetector::new();
        let fired: Vec<Option<usize>> = [0.5, 1.1, 1.5, 2.0, 2.9, 3.5]
            .iter()
            .map(|t| edges.observe(&clock.evaluate(&grid, *t)))
            .collect();
        assert_eq!(fired, vec![None, Some(0), None, Some(1), None, Some(2)]);
    }

    #[test]
    fn frame_clock_steps_by_frame_period() {
        let mut clock = PlaybackClock::frames(30);
        assert_eq!(clock.advance(), 0.0);
        assert_eq!(clock.advance(), 1.0 / 30.0);
        assert_eq!(clock.frame(), 2);
        assert_eq!(frame_count(2.01, 30), 61);
        assert_eq!(frame_count(0.0, 30), 0);
    }
}
