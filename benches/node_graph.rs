use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tonverk::object::connect_cyclic;
use tonverk::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// Compare the cost of the two ramp curves per sample
pub fn ramp_modes(c: &mut Criterion) {
    for (name, mode) in [
        ("linear ramp", RampMode::Linear),
        ("exponential ramp", RampMode::Exponential),
    ] {
        c.bench_function(name, |b| {
            let mut value = RampedValue::new(0.1_f32);
            b.iter(|| {
                value.ramp(1.0, 44100, mode);
                for _ in 0..44100 {
                    black_box(value.next_value());
                }
            })
        });
    }
}

// One second of a wide graph: a shared source fanned out to filters and mixed
pub fn fan_out_graph(c: &mut Criterion) {
    init_tracing();
    let nm = NodeManager::new(NodeManagerSettings {
        internal_buffer_size: 64,
        ..Default::default()
    });
    let source = instantiate(&ControlObject::new("source", 1, 0.5), &nm).unwrap();
    let filters = instantiate(
        &FilterObject::new("filters", 64, FilterMode::Low, 800.0),
        &nm,
    )
    .unwrap();
    let mix = nm.make_safe(MixNode::new());
    let output = instantiate(&OutputObject::stereo("out"), &nm).unwrap();
    {
        let mut graph = nm.lock();
        connect_cyclic(&mut graph, &*source, &*filters, None).unwrap();
        for channel in 0..64 {
            graph
                .connect(filters.output_for_channel(channel), mix.input(0))
                .unwrap();
        }
        for channel in 0..2 {
            graph
                .connect(mix.output(0), output.input_for_channel(channel).unwrap())
                .unwrap();
        }
    }
    let mut left = vec![0.0; 44100];
    let mut right = vec![0.0; 44100];
    c.bench_function("64 filters, 1 second", |b| {
        b.iter(|| {
            nm.process(&[], &mut [&mut left[..], &mut right[..]]);
            black_box(left[0]);
        })
    });
}

// A pool of playing voices, each a small graph of its own
pub fn polyphony(c: &mut Criterion) {
    init_tracing();
    let nm = NodeManager::new(NodeManagerSettings {
        internal_buffer_size: 64,
        ..Default::default()
    });
    let voice = VoiceObject::new(
        GraphObject::new("voice")
            .with_object(ControlObject::new("source", 2, 0.1))
            .with_object(FilterObject::new("filter", 2, FilterMode::Band, 1200.0))
            .with_object(EnvelopeObject::new(
                "envelope",
                vec![Segment::new(1.0, 5.0), Segment::new(0.5, 1_000_000.0)],
            ))
            .with_object(GainObject::new("gain", 2, 1.0))
            .link("source", "filter")
            .link("filter", "gain")
            .link("envelope", "gain.modulation")
            .with_output("gain"),
        "envelope",
    );
    let pool = PolyphonicObject::new("pool", voice, 16, 2)
        .instantiate_polyphonic(&nm, &mut ErrorState::new())
        .unwrap();
    let output = instantiate(&OutputObject::stereo("out"), &nm).unwrap();
    connect_cyclic(&mut nm.lock(), &pool, &*output, None).unwrap();
    while let Some(voice) = pool.find_free_voice() {
        pool.play(voice, 0.0).unwrap();
    }
    let mut left = vec![0.0; 44100];
    let mut right = vec![0.0; 44100];
    c.bench_function("16 voices, 1 second", |b| {
        b.iter(|| {
            nm.process(&[], &mut [&mut left[..], &mut right[..]]);
            black_box(left[0]);
        })
    });
}

criterion_group!(benches, ramp_modes, fan_out_graph, polyphony);
criterion_main!(benches);
