use beat_sync_core::{
    timeline::frame_time, AnimationConfig, BeatEvent, BeatGrid, FrameRenderer, GridMetadata, Mode,
    PitchClass, Recorder, RenderSettings, ThemeKind,
};

fn settings() -> RenderSettings {
    RenderSettings {
        width: 32,
        height: 48,
        fps: 12,
        theme: ThemeKind::Neon,
        ..RenderSettings::default()
    }
}

fn grid() -> BeatGrid {
    let mut beats = Vec::new();
    for i in 0..4 {
        let mut beat = BeatEvent::new(0.25 + i as f64 * 0.5, 1.0);
        beat.color_hex = Some("#FFD700".into());
        beat.energy_bands = Some([0.6, 0.2, 0.1, 0.0]);
        beats.push(beat);
    }
    BeatGrid::new(
        GridMetadata {
            filename: "rec.wav".into(),
            bpm: 120.0,
            key: PitchClass::G,
            mode: Mode::Major,
            delta_time: 0.5,
            duration: 2.0,
            total_beats: beats.len(),
        },
        beats,
    )
    .unwrap()
}

#[test]
fn sink_receives_frames_in_generation_order() {
    let grid = grid();
    let mut frames: Vec<Vec<u8>> = Vec::new();
    let report = Recorder::new(&settings(), AnimationConfig::default())
        .unwrap()
        .render(&grid, &mut frames)
        .unwrap();
    assert_eq!(report.frames, 24);
    assert_eq!(frames.len(), 24);

    let mut reference = FrameRenderer::new(&settings(), AnimationConfig::default());
    for (i, frame) in frames.iter().enumerate() {
        let expected = reference.render(&grid, frame_time(i as u64, 12));
        assert_eq!(frame.as_slice(), expected, "frame {i}");
    }
}

#[test]
fn dumped_frames_cover_the_whole_run() {
    let dir = tempfile::tempdir().unwrap();
    let settings = RenderSettings {
        frame_dump_dir: Some(dir.path().join("frames")),
        frame_queue_depth: 2,
        ..settings()
    };
    let mut frames: Vec<Vec<u8>> = Vec::new();
    let report = Recorder::new(&settings, AnimationConfig::default())
        .unwrap()
        .render(&grid(), &mut frames)
        .unwrap();
    assert_eq!(report.dumped, report.frames);
    let written = std::fs::read_dir(dir.path().join("frames")).unwrap().count();
    assert_eq!(written as u64, report.frames);
}
