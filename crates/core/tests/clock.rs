use beat_sync_core::{
    timeline::{frame_count, frame_time},
    AnimationClock, AnimationConfig, BeatEvent, BeatGrid, GridMetadata, Mode, PitchClass,
};

fn grid(beats: &[(f64, f64)], duration: f64) -> BeatGrid {
    let events: Vec<BeatEvent> = beats.iter().map(|(t, e)| BeatEvent::new(*t, *e)).collect();
    BeatGrid::new(
        GridMetadata {
            filename: "clock.wav".into(),
            bpm: 100.0,
            key: PitchClass::A,
            mode: Mode::Minor,
            delta_time: 0.6,
            duration,
            total_beats: events.len(),
        },
        events,
    )
    .unwrap()
}

fn steady_grid() -> BeatGrid {
    let beats: Vec<(f64, f64)> = (0..20).map(|i| (0.3 + i as f64 * 0.6, 1.0 + (i % 3) as f64)).collect();
    grid(&beats, 12.5)
}

#[test]
fn arc_peaks_halfway_between_beats() {
    let clock = AnimationClock::new(AnimationConfig {
        base_jump_height: 300.0,
        ..AnimationConfig::default()
    });
    let grid = grid(&[(5.0, 1.0), (6.0, 1.0)], 8.0);

    let peak = clock.evaluate(&grid, 5.5);
    assert_eq!(peak.progress, 0.5);
    for t in [5.2, 5.4, 5.6, 5.8] {
        assert!(clock.evaluate(&grid, t).height < peak.height);
    }
    let just_after = clock.evaluate(&grid, 5.01);
    assert!(just_after.height < 25.0, "height {}", just_after.height);
}

#[test]
fn repeated_queries_are_bit_identical() {
    let clock = AnimationClock::default();
    let grid = steady_grid();
    for t in [0.0, 0.31, 1.7, 6.05, 11.9, 20.0] {
        assert_eq!(clock.evaluate(&grid, t), clock.evaluate(&grid, t));
    }
}

#[test]
fn frame_rate_and_order_do_not_change_geometry() {
    let clock = AnimationClock::default();
    let grid = steady_grid();

    let at_60: Vec<_> = (0..frame_count(grid.duration(), 60))
        .map(|i| clock.evaluate(&grid, frame_time(i, 60)))
        .collect();
    let mut at_30_reversed: Vec<_> = (0..frame_count(grid.duration(), 30))
        .rev()
        .map(|i| clock.evaluate(&grid, frame_time(i, 30)))
        .collect();
    at_30_reversed.reverse();

    for (i, state) in at_30_reversed.iter().enumerate() {
        assert_eq!(*state, at_60[i * 2], "frame {i} at 30 fps");
    }
}

#[test]
fn empty_grid_never_moves() {
    let clock = AnimationClock::default();
    let grid = BeatGrid::empty("silence.wav", 10.0);
    for i in 0..frame_count(10.0, 30) {
        let state = clock.evaluate(&grid, frame_time(i, 30));
        assert!(state.resting);
        assert_eq!(state.height, 0.0);
        assert_eq!((state.scale_x, state.scale_y), (1.0, 1.0));
    }
}

#[test]
fn progress_stays_in_unit_range() {
    let clock = AnimationClock::default();
    let grid = steady_grid();
    for i in 0..1_000 {
        let state = clock.evaluate(&grid, i as f64 * 0.0131 - 0.5);
        assert!((0.0..=1.0).contains(&state.progress));
        assert!(state.height >= 0.0);
    }
}
