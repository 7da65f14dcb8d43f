//! Presentation-only effects layered on top of the animation clock.
//!
//! Unlike [`AnimationClock`](crate::timeline::AnimationClock) these carry
//! state from frame to frame (trail, particles, decaying shake), so they
//! must be stepped once per rendered frame in order. The ball geometry never
//! depends on them.

use std::collections::VecDeque;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    grid::{BeatEvent, BeatGrid},
    timeline::{AnimationState, BeatEdgeDetector},
};

const PULSE_DECAY: f64 = 0.92;
const SHAKE_DECAY: f64 = 0.85;
const SHAKE_PER_SUB: f64 = 15.0;
const SHAKE_THRESHOLD: f32 = 0.3;
const BURST_BASE: usize = 15;
const BURST_PER_SUB: f64 = 40.0;
const GRAVITY: f64 = 0.5;
const PARTICLE_LIFETIME: f64 = 40.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Remaining life in (0, 1].
    pub life: f64,
    pub color: [u8; 3],
}

/// Frame-to-frame effect state for one render run.
#[derive(Debug, Clone)]
pub struct Effects {
    rng: StdRng,
    edges: BeatEdgeDetector,
    trail: VecDeque<(f64, f64)>,
    trail_length: usize,
    particles: Vec<Particle>,
    shake: f64,
    pulse: f64,
    color: [u8; 3],
}

impl Effects {
    pub fn new(seed: u64, trail_length: usize, base_color: [u8; 3]) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            edges: BeatEdgeDetector::new(),
            trail: VecDeque::with_capacity(trail_length),
            trail_length,
            particles: Vec::new(),
            shake: 0.0,
            pulse: 0.0,
            color: base_color,
        }
    }

    /// Steps every effect by one frame. `ball` is the ball centre in pixels.
    pub fn update(&mut self, grid: &BeatGrid, state: &AnimationState, ball: (f64, f64)) {
        if let Some(beat) = self.edges.observe(state).and_then(|i| grid.beats().get(i)) {
            self.on_beat(beat, ball);
        }

        self.pulse *= PULSE_DECAY;
        self.shake *= SHAKE_DECAY;
        for particle in &mut self.particles {
            particle.x += particle.vx;
            particle.y += particle.vy;
            particle.vy += GRAVITY;
            particle.life -= 1.0 / PARTICLE_LIFETIME;
        }
        self.particles.retain(|p| p.life > 0.0);

        if self.trail_length > 0 {
            if self.trail.len() == self.trail_length {
                self.trail.pop_front();
            }
            self.trail.push_back(ball);
        }
    }

    fn on_beat(&mut self, beat: &BeatEvent, ball: (f64, f64)) {
        if let Some(color) = beat.color() {
            self.color = color;
        }
        let sub = beat.sub_band().unwrap_or(0.0);
        if sub > SHAKE_THRESHOLD {
            self.shake = SHAKE_PER_SUB * sub as f64;
        }
        self.pulse = 1.0;

        let count = BURST_BASE + (BURST_PER_SUB * sub as f64) as usize;
        for _ in 0..count {
            let angle = self.rng.random_range(0.0..std::f64::consts::TAU);
            let speed = self.rng.random_range(2.0..9.0);
            self.particles.push(Particle {
                x: ball.0,
                y: ball.1,
                vx: angle.cos() * speed,
                vy: angle.sin() * speed - 3.0,
                life: 1.0,
                color: self.color,
            });
        }
    }

    /// Random offset within the current shake amplitude.
    pub fn shake_offset(&mut self) -> (f64, f64) {
        if self.shake < 0.5 {
            return (0.0, 0.0);
        }
        let amp = self.shake;
        (
            self.rng.random_range(-amp..=amp),
            self.rng.random_range(-amp..=amp),
        )
    }

    /// Uniform draw in [0, 1) from the effect RNG, for theme-specific noise.
    pub fn noise(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn pulse(&self) -> f64 {
        self.pulse
    }

    pub fn shake(&self) -> f64 {
        self.shake
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn trail(&self) -> impl ExactSizeIterator<Item = &(f64, f64)> + '_ {
        self.trail.iter()
    }
}
