//! Software rasteriser turning animation state into raw RGB frames.

use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    grid::BeatGrid,
    scene::Effects,
    timeline::{AnimationClock, AnimationState},
    AnimationConfig, RenderSettings, ThemeKind,
};

pub type Rgb = [u8; 3];

fn mix(a: Rgb, b: Rgb, t: f32) -> Rgb {
    let t = t.clamp(0.0, 1.0);
    [0, 1, 2].map(|i| (a[i] as f32 + (b[i] as f32 - a[i] as f32) * t).round() as u8)
}

/// 8-bit RGB frame, row-major with no padding.
#[derive(Debug, Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]])
    }

    pub fn fill(&mut self, color: Rgb) {
        for px in self.pixels.chunks_exact_mut(3) {
            px.copy_from_slice(&color);
        }
    }

    /// Alpha-blends `color` over the pixel; out-of-bounds writes are ignored.
    pub fn blend(&mut self, x: i64, y: i64, color: Rgb, alpha: f32) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 || alpha <= 0.0 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        let current = [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]];
        let out = mix(current, color, alpha);
        self.pixels[i..i + 3].copy_from_slice(&out);
    }

    pub fn fill_rect(&mut self, x: i64, y: i64, w: i64, h: i64, color: Rgb, alpha: f32) {
        for py in y.max(0)..(y + h).min(self.height as i64) {
            for px in x.max(0)..(x + w).min(self.width as i64) {
                self.blend(px, py, color, alpha);
            }
        }
    }

    /// Draws `mask` centred on `(cx, cy)`.
    pub fn stamp(&mut self, mask: &SpriteMask, cx: f64, cy: f64, color: Rgb, alpha: f32) {
        let left = cx.round() as i64 - mask.radius_x as i64;
        let top = cy.round() as i64 - mask.radius_y as i64;
        for my in 0..mask.height {
            for mx in 0..mask.width {
                let coverage = mask.coverage[(my * mask.width + mx) as usize];
                if coverage > 0.0 {
                    self.blend(left + mx as i64, top + my as i64, color, coverage * alpha);
                }
            }
        }
    }

    /// Moves row `y` sideways by `shift` pixels, wrapping around.
    pub fn shift_row(&mut self, y: u32, shift: i64) {
        if y >= self.height || self.width == 0 {
            return;
        }
        let row_len = self.width as usize * 3;
        let start = y as usize * row_len;
        let row = &mut self.pixels[start..start + row_len];
        let by = (shift.rem_euclid(self.width as i64) as usize) * 3;
        row.rotate_right(by);
    }
}

/// Anti-aliased ellipse coverage, `(2 * rx + 1) x (2 * ry + 1)` pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct SpriteMask {
    pub radius_x: u32,
    pub radius_y: u32,
    width: u32,
    height: u32,
    coverage: Vec<f32>,
}

impl SpriteMask {
    pub fn ellipse(radius_x: u32, radius_y: u32) -> Self {
        let rx = radius_x.max(1);
        let ry = radius_y.max(1);
        let width = 2 * rx + 1;
        let height = 2 * ry + 1;
        let edge = rx.min(ry) as f32;
        let mut coverage = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let dx = (x as f32 - rx as f32) / rx as f32;
                let dy = (y as f32 - ry as f32) / ry as f32;
                let d = (dx * dx + dy * dy).sqrt();
                coverage.push(((1.0 - d) * edge + 0.5).clamp(0.0, 1.0));
            }
        }
        Self {
            radius_x: rx,
            radius_y: ry,
            width,
            height,
            coverage,
        }
    }
}

/// Ellipse masks keyed by their radii, evicting the least recently used
/// entry once `capacity` is reached.
#[derive(Debug)]
pub struct SpriteCache {
    capacity: usize,
    entries: HashMap<(u32, u32), (Arc<SpriteMask>, u64)>,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl SpriteCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn ellipse(&mut self, radius_x: f64, radius_y: f64) -> Arc<SpriteMask> {
        let key = (radius_x.round().max(1.0) as u32, radius_y.round().max(1.0) as u32);
        self.clock += 1;
        if let Some((mask, used)) = self.entries.get_mut(&key) {
            *used = self.clock;
            self.hits += 1;
            return Arc::clone(mask);
        }

        self.misses += 1;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(key, _)| *key)
            {
                self.entries.remove(&oldest);
            }
        }
        let mask = Arc::new(SpriteMask::ellipse(key.0, key.1));
        self.entries.insert(key, (Arc::clone(&mask), self.clock));
        mask
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, radius_x: u32, radius_y: u32) -> bool {
        self.entries.contains_key(&(radius_x, radius_y))
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// Per-frame values a theme draws from.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub state: &'a AnimationState,
    /// Ball centre after shake.
    pub ball: (f64, f64),
    pub ground_y: f64,
    /// Fraction of the track already played, in [0, 1].
    pub elapsed: f64,
}

/// Visual style applied around the shared ball geometry.
pub trait Theme: Send {
    fn name(&self) -> &'static str;

    /// Multiplier on the arc height computed by the clock.
    fn height_scale(&self) -> f64 {
        1.0
    }

    fn background(&self, canvas: &mut Canvas, ctx: &FrameContext<'_>, fx: &mut Effects);

    fn ground(&self) -> Rgb;

    fn ball_color(&self, fx: &Effects) -> Rgb {
        fx.color()
    }

    /// Runs after everything else is drawn.
    fn post_process(&self, _canvas: &mut Canvas, _ctx: &FrameContext<'_>, _fx: &mut Effects) {}
}

#[derive(Debug, Default)]
pub struct NeonTheme;

impl Theme for NeonTheme {
    fn name(&self) -> &'static str {
        "neon"
    }

    fn background(&self, canvas: &mut Canvas, _ctx: &FrameContext<'_>, fx: &mut Effects) {
        let glow = (fx.pulse() * 30.0) as u8;
        canvas.fill([10, 10, 25u8.saturating_add(glow)]);
    }

    fn ground(&self) -> Rgb {
        [0, 255, 220]
    }
}

#[derive(Debug, Default)]
pub struct ZenTheme;

impl Theme for ZenTheme {
    fn name(&self) -> &'static str {
        "zen"
    }

    fn height_scale(&self) -> f64 {
        0.8
    }

    fn background(&self, canvas: &mut Canvas, _ctx: &FrameContext<'_>, _fx: &mut Effects) {
        canvas.fill([236, 230, 218]);
    }

    fn ground(&self) -> Rgb {
        [150, 140, 128]
    }

    fn ball_color(&self, fx: &Effects) -> Rgb {
        mix(fx.color(), [236, 230, 218], 0.35)
    }
}

#[derive(Debug, Default)]
pub struct GlitchTheme;

impl Theme for GlitchTheme {
    fn name(&self) -> &'static str {
        "glitch"
    }

    fn background(&self, canvas: &mut Canvas, _ctx: &FrameContext<'_>, _fx: &mut Effects) {
        canvas.fill([0, 0, 0]);
    }

    fn ground(&self) -> Rgb {
        [255, 0, 80]
    }

    fn post_process(&self, canvas: &mut Canvas, _ctx: &FrameContext<'_>, fx: &mut Effects) {
        if fx.pulse() < 0.5 {
            return;
        }
        let bands = 1 + (fx.noise() * 6.0) as u32;
        for _ in 0..bands {
            let y0 = (fx.noise() * canvas.height() as f64) as u32;
            let rows = 2 + (fx.noise() * 24.0) as u32;
            let shift = ((fx.noise() - 0.5) * 80.0 * fx.pulse()) as i64;
            for y in y0..(y0 + rows).min(canvas.height()) {
                canvas.shift_row(y, shift);
            }
        }
    }
}

pub fn theme_for(kind: ThemeKind) -> Box<dyn Theme> {
    match kind {
        ThemeKind::Neon => Box::new(NeonTheme),
        ThemeKind::Zen => Box::new(ZenTheme),
        ThemeKind::Glitch => Box::new(GlitchTheme),
    }
}

/// Draws one frame per query time. Frames must be requested in increasing
/// time order because the effects are stepped on every call.
pub struct FrameRenderer {
    clock: AnimationClock,
    theme: Box<dyn Theme>,
    cache: SpriteCache,
    effects: Effects,
    canvas: Canvas,
}

impl FrameRenderer {
    pub fn new(settings: &RenderSettings, animation: AnimationConfig) -> Self {
        let theme = theme_for(settings.theme);
        debug!(
            theme = theme.name(),
            width = settings.width,
            height = settings.height,
            "frame renderer ready"
        );
        Self {
            clock: AnimationClock::new(animation),
            theme,
            cache: SpriteCache::new(settings.sprite_cache_capacity),
            effects: Effects::new(settings.seed, settings.trail_length, [255, 255, 255]),
            canvas: Canvas::new(settings.width, settings.height),
        }
    }

    pub fn clock(&self) -> &AnimationClock {
        &self.clock
    }

    pub fn cache(&self) -> &SpriteCache {
        &self.cache
    }

    pub fn frame_len(&self) -> usize {
        self.canvas.as_bytes().len()
    }

    pub fn render(&mut self, grid: &BeatGrid, t: f64) -> &[u8] {
        let state = self.clock.evaluate(grid, t);
        let cfg = self.clock.config();
        let width = self.canvas.width() as f64;
        let ground_y = self.canvas.height() as f64 * cfg.ground_ratio;
        let radius = cfg.ball_radius;
        let lift = state.height * self.theme.height_scale();
        let ball = (width / 2.0, ground_y - lift - radius * state.scale_y);

        self.effects.update(grid, &state, ball);
        let (sx, sy) = self.effects.shake_offset();
        let ctx = FrameContext {
            state: &state,
            ball: (ball.0 + sx, ball.1 + sy),
            ground_y: ground_y + sy,
            elapsed: if grid.duration() > 0.0 {
                (t / grid.duration()).clamp(0.0, 1.0)
            } else {
                0.0
            },
        };

        self.theme.background(&mut self.canvas, &ctx, &mut self.effects);
        self.canvas.fill_rect(
            0,
            ctx.ground_y.round() as i64,
            self.canvas.width() as i64,
            3,
            self.theme.ground(),
            1.0,
        );

        let ball_color = self.theme.ball_color(&self.effects);
        let trail: Vec<(f64, f64)> = self.effects.trail().copied().collect();
        let trail_len = trail.len().max(1) as f32;
        for (i, (x, y)) in trail.iter().enumerate() {
            let fade = (i + 1) as f32 / trail_len;
            let mask = self.cache.ellipse(radius * 0.5 * fade as f64, radius * 0.5 * fade as f64);
            self.canvas.stamp(&mask, *x + sx, *y + sy, ball_color, 0.35 * fade);
        }

        let dot = self.cache.ellipse(3.0, 3.0);
        for particle in self.effects.particles() {
            let alpha = particle.life as f32;
            self.canvas
                .stamp(&dot, particle.x + sx, particle.y + sy, particle.color, alpha);
        }

        if self.effects.pulse() > 0.05 {
            let halo = radius * (1.0 + 0.5 * self.effects.pulse());
            let mask = self.cache.ellipse(halo * state.scale_x, halo * state.scale_y);
            let alpha = 0.25 * self.effects.pulse() as f32;
            self.canvas.stamp(&mask, ctx.ball.0, ctx.ball.1, ball_color, alpha);
        }
        let body = self.cache.ellipse(radius * state.scale_x, radius * state.scale_y);
        self.canvas.stamp(&body, ctx.ball.0, ctx.ball.1, ball_color, 1.0);

        let bar = (ctx.elapsed * width).round() as i64;
        let bar_y = self.canvas.height() as i64 - 12;
        self.canvas.fill_rect(0, bar_y, bar, 6, self.theme.ground(), 0.8);

        self.theme.post_process(&mut self.canvas, &ctx, &mut self.effects);
        self.canvas.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(theme: ThemeKind) -> RenderSettings {
        RenderSettings {
            width: 64,
            height: 96,
            theme,
            ..RenderSettings::default()
        }
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let mut cache = SpriteCache::new(2);
        cache.ellipse(4.0, 4.0);
        cache.ellipse(5.0, 5.0);
        cache.ellipse(4.0, 4.0);
        cache.ellipse(6.0, 6.0);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(4, 4));
        assert!(!cache.contains(5, 5));
        assert_eq!(cache.stats(), (1, 3));
    }

    #[test]
    fn ellipse_is_solid_at_centre_and_empty_at_corner() {
        let mask = SpriteMask::ellipse(5, 5);
        assert_eq!(mask.coverage[(5 * mask.width + 5) as usize], 1.0);
        assert_eq!(mask.coverage[0], 0.0);
    }

    #[test]
    fn frames_have_rgb24_size() {
        for theme in [ThemeKind::Neon, ThemeKind::Zen, ThemeKind::Glitch] {
            let mut renderer = FrameRenderer::new(&settings(theme), AnimationConfig::default());
            let grid = BeatGrid::empty("x", 1.0);
            assert_eq!(renderer.render(&grid, 0.0).len(), 64 * 96 * 3);
        }
    }

    #[test]
    fn resting_ball_sits_on_the_ground() {
        let config = AnimationConfig {
            ball_radius: 8.0,
            ..AnimationConfig::default()
        };
        let mut renderer = FrameRenderer::new(&settings(ThemeKind::Zen), config);
        let grid = BeatGrid::empty("x", 1.0);
        let frame = renderer.render(&grid, 0.5).to_vec();
        let ground_y = (96.0 * 0.75) as usize;
        let just_above = ((ground_y - 8) * 64 + 32) * 3;
        assert_ne!(&frame[just_above..just_above + 3], &[236, 230, 218]);
        let far_above = ((ground_y - 30) * 64 + 32) * 3;
        assert_eq!(&frame[far_above..far_above + 3], &[236, 230, 218]);
    }

    #[test]
    fn shifting_a_row_wraps() {
        let mut canvas = Canvas::new(3, 1);
        canvas.blend(0, 0, [255, 0, 0], 1.0);
        canvas.shift_row(0, 1);
        assert_eq!(canvas.pixel(1, 0), Some([255, 0, 0]));
        canvas.shift_row(0, -2);
        assert_eq!(canvas.pixel(2, 0), Some([255, 0, 0]));
    }
}
