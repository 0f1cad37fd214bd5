use tonverk::object::{connect_cyclic, InstantiationError};
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
        input_channel_count: 2,
        output_channel_count: 2,
        ..Default::default()
    })
}

fn render(nm: &NodeManager) -> Vec<Vec<Sample>> {
    let mut outputs = vec![vec![0.0; 4]; 2];
    nm.render(&mut outputs);
    outputs
}

#[test]
fn every_validation_error_is_reported() {
    let nm = node_manager();
    let patch = GraphObject::new("patch")
        .with_object(ControlObject::new("a", 1, 0.0))
        .with_object(GainObject::new("a", 1, 1.0))
        .link("a", "ghost.audio");
    let Err(error) = instantiate(&patch, &nm) else {
        panic!("the patch should not instantiate");
    };
    assert_eq!(
        error,
        InstantiationError {
            errors: vec![
                ObjectError::InvalidSetting {
                    object: "patch".into(),
                    message: "the id \"a\" is used more than once".into(),
                },
                ObjectError::InvalidSetting {
                    object: "patch".into(),
                    message: "no output object".into(),
                },
                ObjectError::MissingResource {
                    object: "patch".into(),
                    id: "ghost".into(),
                },
            ],
        }
    );
    assert_eq!(
        TonverkError::from(error).to_string(),
        "Instantiation failed: patch: the id \"a\" is used more than once\n\
         patch: no output object\n\
         patch: missing resource \"ghost\""
    );
    assert_eq!(nm.lock().node_count(), 0);
}

#[test]
fn failures_are_traced_through_parents() {
    let nm = node_manager();
    let patch = GraphObject::new("outer")
        .with_object(ControlObject::new("source", 2, 1.0))
        .with_object(Chain::new("fx"))
        .link("source", "fx")
        .with_output("fx");
    let error = instantiate(&patch, &nm).err().unwrap();
    assert_eq!(
        error.errors,
        vec![
            ObjectError::EmptyChain {
                object: "fx".into()
            },
            ObjectError::Failed {
                object: "outer".into(),
                id: "fx".into(),
            },
        ]
    );
    // The control that was created before the failure is released
    nm.process_period();
    assert_eq!(nm.lock().node_count(), 0);
}

#[test]
fn mono_is_spread_over_stereo() {
    let nm = node_manager();
    let source = instantiate(&ControlObject::new("source", 1, 0.25), &nm).unwrap();
    let output = instantiate(&OutputObject::stereo("out"), &nm).unwrap();
    connect_cyclic(&mut nm.lock(), &*source, &*output, None).unwrap();
    assert_eq!(render(&nm), vec![vec![0.25; 4]; 2]);
}

#[test]
fn device_input_through_a_graph() -> anyhow::Result<()> {
    let nm = node_manager();
    let input = instantiate(&InputObject::new("in", vec![1, 0]), &nm)?;
    let fx = GraphObject::new("fx")
        .with_object(
            Chain::new("chain")
                .with_object(GainObject::new("first", 2, 0.5))
                .with_object(GainObject::new("second", 2, 0.5)),
        )
        .with_input("chain")
        .with_output("chain")
        .instantiate_graph(&nm, &mut ErrorState::new())
        .ok_or_else(|| anyhow::anyhow!("fx failed"))?;
    let output = instantiate(&OutputObject::stereo("out"), &nm)?;
    {
        let mut graph = nm.lock();
        connect_cyclic(&mut graph, &*input, &fx, None)?;
        connect_cyclic(&mut graph, &fx, &*output, Some("audio"))?;
    }

    let left = [1.0; 8];
    let right = [2.0; 8];
    let mut out_left = [0.0; 8];
    let mut out_right = [0.0; 8];
    nm.process(
        &[&left[..], &right[..]],
        &mut [&mut out_left[..], &mut out_right[..]],
    );
    // The input object swaps the channels
    assert_eq!(out_left, [0.5; 8]);
    assert_eq!(out_right, [0.25; 8]);
    assert_eq!(nm.sample_time(), 8);

    let chain = fx.get_object::<ChainInstance>("chain").unwrap();
    assert_eq!(chain.len(), 2);
    let second = chain.get_object::<GainInstance>(1).unwrap();
    assert!(chain.get_object::<FilterInstance>(1).is_none());
    second.set_gain(1.0, 0.0, RampMode::Linear);
    nm.process(
        &[&left[..], &right[..]],
        &mut [&mut out_left[..], &mut out_right[..]],
    );
    assert_eq!(out_left, [1.0; 8]);
    assert_eq!(out_right, [0.5; 8]);
    Ok(())
}

#[test]
fn dropping_an_instance_releases_its_nodes() {
    let nm = node_manager();
    let patch = GraphObject::new("patch")
        .with_object(ControlObject::new("source", 2, 0.5))
        .with_object(FilterObject::new("filter", 2, FilterMode::Low, 400.0))
        .with_object(OutputObject::stereo("out"))
        .link("source", "filter")
        .link("filter", "out")
        .with_output("filter")
        .instantiate_graph(&nm, &mut ErrorState::new())
        .unwrap();
    assert_eq!(nm.lock().node_count(), 6);
    assert_eq!(patch.ids().collect::<Vec<_>>(), vec!["source", "filter", "out"]);
    render(&nm);
    drop(patch);
    nm.process_period();
    assert_eq!(nm.lock().node_count(), 0);
    assert_eq!(render(&nm), vec![vec![0.0; 4]; 2]);
}

#[test]
fn sinks_have_no_outputs() {
    let nm = node_manager();
    let meter = LevelMeterObject::new("meter", 2, MeterType::Peak, 4.0);
    let meter = meter
        .to_parallel()
        .instantiate_parallel(&nm, &mut ErrorState::new())
        .unwrap();
    assert_eq!(meter.channel_count(), 0);
    let mut errors = ErrorState::new();
    let chain = Chain::new("metered")
        .with_object(ControlObject::new("source", 2, 0.0))
        .with_object(LevelMeterObject::new("meter", 2, MeterType::Peak, 4.0))
        .with_object(GainObject::new("gain", 2, 1.0));
    assert!(chain.instantiate(&nm, &mut errors).is_none());
    assert!(matches!(
        errors.errors(),
        [ObjectError::InvalidSetting { object, .. }] if object == "metered"
    ));
}
