use beat_sync_core::{AudioClip, AudioEvent, EventMixer, MixerConfig, SoundBank};

const RATE: u32 = 1_000;

fn mixer() -> EventMixer {
    let mut bank = SoundBank::new(RATE);
    bank.insert("blip", AudioClip::new(1, RATE, vec![0.8; 50]));
    let config = MixerConfig {
        sample_rate: RATE,
        pitch_jitter: 0.0,
        ..MixerConfig::default()
    };
    EventMixer::new(config, bank)
}

fn left(clip: &AudioClip) -> Vec<f32> {
    (0..clip.frames()).map(|i| clip.sample(i, 0)).collect()
}

#[test]
fn separate_events_match_a_single_event_render() {
    let single = left(&mixer().render(&[AudioEvent::new(0.1, "blip", 0.5)], None, 1.0));
    let pair = left(&mixer().render(
        &[
            AudioEvent::new(0.1, "blip", 0.5),
            AudioEvent::new(0.5, "blip", 0.5),
        ],
        None,
        1.0,
    ));

    assert_eq!(&pair[100..150], &single[100..150]);
    assert_eq!(&pair[500..550], &single[100..150]);
    assert!(pair[200..500].iter().all(|s| *s == 0.0));
}

#[test]
fn overlapping_events_sum_before_limiting() {
    let out = left(&mixer().render(
        &[
            AudioEvent::new(0.1, "blip", 0.5),
            AudioEvent::new(0.12, "blip", 0.5),
        ],
        None,
        1.0,
    ));
    let alone = out[105];
    let overlapped = out[130];
    assert!((overlapped - 2.0 * alone).abs() < 1e-6);
    assert!((overlapped - 0.9).abs() < 1e-6);
}

#[test]
fn buffer_grows_to_fit_the_last_event() {
    let out = mixer().render(&[AudioEvent::new(0.98, "blip", 1.0)], None, 0.0);
    assert_eq!(out.frames(), 1_030);
    let late = mixer().render(&[AudioEvent::new(2.0, "blip", 1.0)], None, 0.5);
    assert_eq!(late.frames(), 2_050);
}

#[test]
fn events_json_uses_center_pan_by_default() {
    let events: Vec<AudioEvent> =
        serde_json::from_str(r#"[{"timestamp": 1.5, "kind": "coin", "volume": 0.7}]"#).unwrap();
    assert_eq!(events[0].pan, None);
    assert_eq!(events[0].kind, "coin");
}
