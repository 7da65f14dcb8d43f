use std::f32::consts::TAU;

use beat_sync_core::{
    analyze_file, write_wav, AnalysisConfig, AnalysisEngine, AudioBuffer, AudioClip, BeatGrid,
    Mode, PitchClass,
};

const SAMPLE_RATE: u32 = 22_050;

fn chord(freqs: &[f32], seconds: f32) -> Vec<f32> {
    let len = (SAMPLE_RATE as f32 * seconds) as usize;
    (0..len)
        .map(|n| {
            let t = n as f32 / SAMPLE_RATE as f32;
            freqs.iter().map(|f| (TAU * f * t).sin()).sum::<f32>() * 0.25
        })
        .collect()
}

/// Clicks every `interval` seconds, alternating loud and soft.
fn accented_clicks(interval: f32, seconds: f32) -> Vec<f32> {
    let mut samples = vec![0.0_f32; (SAMPLE_RATE as f32 * seconds) as usize];
    let click_len = (SAMPLE_RATE as f32 * 0.02) as usize;
    let mut index = 0usize;
    loop {
        let start = (index as f32 * interval * SAMPLE_RATE as f32) as usize;
        if start >= samples.len() {
            break;
        }
        let gain = if index % 2 == 0 { 1.0 } else { 0.4 };
        for (n, slot) in samples[start..].iter_mut().take(click_len).enumerate() {
            let t = n as f32 / SAMPLE_RATE as f32;
            *slot = (TAU * 1_000.0 * t).sin() * (-t * 200.0).exp() * gain;
        }
        index += 1;
    }
    samples
}

#[test]
fn sustained_c_major_triad_is_detected_as_c_major() {
    let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
    let audio = AudioBuffer::new(chord(&[261.63, 329.63, 392.0], 4.0), SAMPLE_RATE);
    let analysis = engine.analyze(&audio, "triad.wav", None).unwrap();
    assert_eq!(analysis.key.key, PitchClass::C);
    assert_eq!(analysis.key.mode, Mode::Major);
    assert_eq!(analysis.grid.metadata().key, PitchClass::C);
}

#[test]
fn accented_half_tempo_clicks_follow_the_hint() {
    let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
    let audio = AudioBuffer::new(accented_clicks(60.0 / 180.0, 12.0), SAMPLE_RATE);
    let analysis = engine.analyze(&audio, "clicks.wav", Some(90.0)).unwrap();
    let bpm = analysis.grid.metadata().bpm;
    assert!((bpm - 90.0).abs() <= 5.0, "detected {bpm} BPM");

    let beats = analysis.grid.beats();
    let expected = 12.0 * 90.0 / 60.0;
    assert!(
        (beats.len() as f64 - expected).abs() <= 3.0,
        "{} beats, expected about {expected}",
        beats.len()
    );
    let mut gaps: Vec<f64> = beats
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .collect();
    gaps.sort_by(|a, b| a.total_cmp(b));
    let median = gaps[gaps.len() / 2];
    assert!((median - 60.0 / 90.0).abs() < 0.05, "median gap {median}s");
}

#[test]
fn grid_beats_are_strictly_increasing_and_boosted_early() {
    let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
    let audio = AudioBuffer::new(accented_clicks(0.5, 10.0), SAMPLE_RATE);
    let grid = engine.analyze(&audio, "pulse.wav", None).unwrap().grid;

    assert!(!grid.is_empty());
    assert!(grid.beats().windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(grid.metadata().total_beats, grid.len());
    for beat in grid.beats().iter().filter(|b| b.timestamp < 5.0) {
        assert!(beat.energy >= 4.0, "beat at {} has energy {}", beat.timestamp, beat.energy);
    }
    for beat in grid.beats() {
        let bands = beat.energy_bands.unwrap();
        assert!(bands.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(beat.pitch_index.unwrap() < 12);
    }
}

#[test]
fn energy_bands_peak_at_exactly_one() {
    let engine = AnalysisEngine::new(AnalysisConfig::default()).unwrap();
    let mut samples = chord(&[60.0, 300.0, 1_000.0, 4_000.0], 3.0);
    for s in samples.iter_mut().take(SAMPLE_RATE as usize) {
        *s *= 0.2;
    }
    let analysis = engine
        .analyze(&AudioBuffer::new(samples, SAMPLE_RATE), "bands.wav", None)
        .unwrap();
    for band in 0..4 {
        let peak = analysis
            .bands
            .frames
            .iter()
            .map(|f| f[band])
            .fold(f32::MIN, f32::max);
        assert_eq!(peak, 1.0, "band {band}");
    }
}

#[test]
fn analyze_file_writes_a_loadable_grid() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("pulse.wav");
    let json = dir.path().join("pulse.json");
    let samples = accented_clicks(0.5, 6.0);
    write_wav(&wav, &AudioClip::new(1, SAMPLE_RATE, samples)).unwrap();

    let grid = analyze_file(&wav, &json, None, &AnalysisConfig::default()).unwrap();
    let loaded = BeatGrid::load(&json).unwrap();
    assert_eq!(loaded, grid);
    assert_eq!(loaded.metadata().filename, "pulse.wav");
    assert!((loaded.duration() - 6.0).abs() < 0.01);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
    assert!(raw["metadata"]["deltatime"].is_number());
    assert!(raw["beats"][0]["ms"].is_u64());
}
