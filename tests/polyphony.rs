use tonverk::object::connect_cyclic;
use tonverk::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn node_manager() -> NodeManager {
    init_tracing();
    NodeManager::new(NodeManagerSettings {
        sample_rate: 1000.0,
        internal_buffer_size: 4,
        output_channel_count: 2,
        ..Default::default()
    })
}

// A constant per channel, shaped by an envelope that holds at 1 for the
// duration it is played with
fn voice_object(channel_count: usize) -> VoiceObject {
    VoiceObject::new(
        GraphObject::new("voice")
            .with_object(ControlObject::new("source", channel_count, 0.0))
            .with_object(EnvelopeObject::new(
                "envelope",
                vec![
                    Segment::new(1.0, 0.0),
                    Segment::relative(1.0, 1.0),
                    Segment::new(0.0, 0.0),
                ],
            ))
            .with_object(GainObject::new("gain", channel_count, 1.0))
            .link("source", "gain")
            .link("envelope", "gain.modulation")
            .with_output("gain"),
        "envelope",
    )
}

fn pool(nm: &NodeManager, voice_count: usize, voice_stealing: bool) -> PolyphonicInstance {
    PolyphonicObject::new("pool", voice_object(2), voice_count, 2)
        .with_voice_stealing(voice_stealing)
        .instantiate_polyphonic(nm, &mut ErrorState::new())
        .unwrap()
}

fn render(nm: &NodeManager) -> Vec<Vec<Sample>> {
    let mut outputs = vec![vec![0.0; 4]; 2];
    nm.render(&mut outputs);
    outputs
}

#[test]
fn three_voices_into_a_stereo_mix() {
    let nm = node_manager();
    let pool = pool(&nm, 3, false);
    let output = instantiate(&OutputObject::stereo("out"), &nm).unwrap();
    connect_cyclic(&mut nm.lock(), &pool, &*output, None).unwrap();

    for voice in 0..3 {
        let source = pool
            .voice(voice)
            .graph()
            .get_object::<ControlInstance>("source")
            .unwrap();
        for channel in 0..2 {
            source
                .channel(channel)
                .set_value((voice + 1) as f32 * (channel + 1) as f32 * 0.125);
        }
    }
    assert_eq!(render(&nm), vec![vec![0.0; 4], vec![0.0; 4]]);

    let voices: Vec<usize> = (0..3).map(|_| pool.find_free_voice().unwrap()).collect();
    for voice in &voices {
        pool.play(*voice, 1000.0).unwrap();
    }
    assert_eq!(render(&nm), vec![vec![0.75; 4], vec![1.5; 4]]);
    assert_eq!(pool.busy_voice_count(), 3);

    pool.stop(voices[1], 0.0);
    // The voice is silent in the period it finishes in
    assert_eq!(render(&nm), vec![vec![0.5; 4], vec![1.0; 4]]);
    assert!(!pool.is_busy(voices[1]));
    assert_eq!(render(&nm), vec![vec![0.5; 4], vec![1.0; 4]]);
    assert_eq!(pool.busy_voice_count(), 2);
    assert_eq!(pool.find_free_voice(), Some(voices[1]));
}

#[test]
fn finished_voice_is_disconnected() {
    let nm = node_manager();
    let pool = pool(&nm, 2, false);
    let mixer = pool.output_for_channel(0);
    let voice = pool.find_free_voice().unwrap();
    pool.play(voice, 8.0).unwrap();
    let mix_input = InputPin::new(mixer.node(), 0);
    assert_eq!(
        nm.lock().input_connections(mix_input).unwrap(),
        &[pool.voice(voice).output_for_channel(0)]
    );
    // 8 samples of hold, finishing in the second period
    let output = instantiate(&OutputObject::stereo("out"), &nm).unwrap();
    connect_cyclic(&mut nm.lock(), &pool, &*output, None).unwrap();
    render(&nm);
    assert!(pool.is_busy(voice));
    render(&nm);
    assert!(!pool.is_busy(voice));
    assert!(nm.lock().input_connections(mix_input).unwrap().is_empty());
    let mut finished = 0;
    nm.poll_events(|event| {
        if event.kind == NodeEventKind::Finished {
            finished += 1;
        }
    });
    assert_eq!(finished, 1);
}

#[test]
fn find_free_voice_without_stealing() {
    let nm = node_manager();
    let pool = pool(&nm, 4, false);
    let mut voices: Vec<usize> = (0..4).map(|_| pool.find_free_voice().unwrap()).collect();
    voices.sort_unstable();
    assert_eq!(voices, vec![0, 1, 2, 3]);
    assert_eq!(pool.find_free_voice(), None);
    assert_eq!(pool.busy_voice_count(), 4);
}

#[test]
fn stealing_takes_the_oldest_voice() {
    let nm = node_manager();
    let pool = pool(&nm, 3, true);
    for expected in 0..3 {
        let voice = pool.find_free_voice().unwrap();
        assert_eq!(voice, expected);
        pool.play(voice, 1000.0).unwrap();
        render(&nm);
    }
    assert_eq!(pool.find_free_voice(), Some(0));
    // Stealing leaves the voice busy
    assert!(pool.is_busy(0));
    pool.play(0, 1000.0).unwrap();
    render(&nm);
    assert_eq!(pool.find_free_voice(), Some(1));
}

#[test]
fn voice_channel_mismatch_fails_at_instantiation() {
    let nm = node_manager();
    let mut errors = ErrorState::new();
    let pool = PolyphonicObject::new("pool", voice_object(2), 2, 1)
        .instantiate_polyphonic(&nm, &mut errors);
    assert!(pool.is_none());
    assert_eq!(
        errors.errors(),
        &[ObjectError::ChannelCountMismatch {
            object: "pool".into(),
            id: "voice".into(),
            expected: 1,
            found: 2,
        }]
    );
    nm.process_period();
    assert_eq!(nm.lock().node_count(), 0);
}

#[test]
fn stopped_voice_can_be_stolen_and_replayed() {
    let nm = node_manager();
    let pool = pool(&nm, 1, true);
    let output = instantiate(&OutputObject::stereo("out"), &nm).unwrap();
    connect_cyclic(&mut nm.lock(), &pool, &*output, None).unwrap();
    let source = pool
        .voice(0)
        .graph()
        .get_object::<ControlInstance>("source")
        .unwrap();
    for channel in 0..2 {
        source.channel(channel).set_value(0.5);
    }
    pool.play(0, 1000.0).unwrap();
    assert_eq!(render(&nm), vec![vec![0.5; 4]; 2]);

    // Release the note and start a new one on the same voice before the next period
    pool.stop(0, 0.0);
    let voice = pool.find_free_voice().unwrap();
    assert_eq!(voice, 0);
    pool.play(voice, 1000.0).unwrap();
    assert_eq!(render(&nm), vec![vec![0.5; 4]; 2]);
    assert!(pool.is_busy(0));
    let mut finished = 0;
    nm.poll_events(|event| {
        if event.kind == NodeEventKind::Finished {
            finished += 1;
        }
    });
    assert_eq!(finished, 0);
}
