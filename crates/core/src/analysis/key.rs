//! Key and mode detection by template correlation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlations closer than this count as a tie; summing the same terms in
/// a rotated order can move the last bits.
const TIE_TOLERANCE: f64 = 1e-12;

/// Krumhansl-Schmuckler major profile, tonic first.
pub const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Schmuckler minor profile, tonic first.
pub const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// The 12 pitch classes in Western music.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    #[serde(rename = "C#")]
    Cs,
    D,
    #[serde(rename = "D#")]
    Ds,
    E,
    F,
    #[serde(rename = "F#")]
    Fs,
    G,
    #[serde(rename = "G#")]
    Gs,
    A,
    #[serde(rename = "A#")]
    As,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// 0 = C, 1 = C#, ..., 11 = B; wraps modulo 12.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Major or Minor scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Major,
    Minor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyEstimate {
    pub key: PitchClass,
    pub mode: Mode,
    /// Pearson correlation of the winning candidate; 0 for flat input.
    pub correlation: f64,
}

impl Default for KeyEstimate {
    fn default() -> Self {
        Self {
            key: PitchClass::C,
            mode: Mode::Major,
            correlation: 0.0,
        }
    }
}

/// Sums chroma over time and correlates it with all 24 rotated profiles.
///
/// Candidates are visited tonic by tonic from C to B, major before minor, and
/// a later candidate only wins with a strictly greater correlation: exact ties
/// go to the one visited first.
pub fn detect_key(chroma: &[[f32; 12]]) -> KeyEstimate {
    let mut profile = [0.0_f64; 12];
    for frame in chroma {
        for (sum, value) in profile.iter_mut().zip(frame.iter()) {
            *sum += *value as f64;
        }
    }
    detect_key_from_profile(&profile)
}

pub fn detect_key_from_profile(profile: &[f64; 12]) -> KeyEstimate {
    let mut best = KeyEstimate {
        correlation: f64::NEG_INFINITY,
        ..KeyEstimate::default()
    };

    for tonic in 0..12 {
        for (mode, template) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
            let Some(correlation) = pearson(profile, &rotate(template, tonic)) else {
                continue;
            };
            if correlation > best.correlation + TIE_TOLERANCE {
                best = KeyEstimate {
                    key: PitchClass::from_index(tonic),
                    mode,
                    correlation,
                };
            }
        }
    }

    if best.correlation.is_finite() {
        best
    } else {
        KeyEstimate::default()
    }
}

/// Shifts a tonic-first profile so its tonic sits on pitch class `tonic`.
fn rotate(template: &[f64; 12], tonic: usize) -> [f64; 12] {
    let mut rotated = [0.0; 12];
    for (i, value) in template.iter().enumerate() {
        rotated[(i + tonic) % 12] = *value;
    }
    rotated
}

/// `None` when either side has zero variance.
fn pearson(a: &[f64; 12], b: &[f64; 12]) -> Option<f64> {
    let mean_a = a.iter().sum::<f64>() / 12.0;
    let mean_b = b.iter().sum::<f64>() / 12.0;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= f64::EPSILON || var_b <= f64::EPSILON {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}
