use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use super::*;
use crate::node::{NodeEventKind, ProcessContext};
use crate::nodes::{ControlNode, MixNode};

// Outputs its input + 1 and counts how often it was processed
struct OneNode {
    count: Arc<AtomicUsize>,
}
impl OneNode {
    fn new() -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }
}
impl Node for OneNode {
    type Controls = Arc<AtomicUsize>;

    fn controls(&self) -> Self::Controls {
        self.count.clone()
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let input = ctx.input(0);
        let output = ctx.output(0);
        match input {
            Some(input) => {
                for (out, sample) in output.iter_mut().zip(input) {
                    *out = *sample + 1.0;
                }
            }
            None => output.fill(1.0),
        }
    }
    fn num_inputs(&self) -> usize {
        1
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn name(&self) -> &'static str {
        "OneNode"
    }
}

// Emits an event every period and remembers the sample rate it was given
struct EventNode {
    kind: NodeEventKind,
    sample_rate: Arc<AtomicU32>,
}
impl EventNode {
    fn new(kind: NodeEventKind) -> Self {
        Self {
            kind,
            sample_rate: Arc::new(AtomicU32::new(0)),
        }
    }
}
impl Node for EventNode {
    type Controls = Arc<AtomicU32>;

    fn controls(&self) -> Self::Controls {
        self.sample_rate.clone()
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        ctx.emit(self.kind);
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        0
    }
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        self.sample_rate
            .store(sample_rate.to_bits(), Ordering::Relaxed);
    }
}

fn test_node_manager(buffer_size: usize) -> NodeManager {
    NodeManager::new(NodeManagerSettings {
        sample_rate: 1000.0,
        internal_buffer_size: buffer_size,
        output_channel_count: 1,
        ..Default::default()
    })
}

#[test]
fn fan_out_is_processed_once() {
    let nm = test_node_manager(4);
    let source = nm.make_safe(OneNode::new());
    let a = nm.make_safe(OneNode::new());
    let b = nm.make_safe(OneNode::new());
    let mix = nm.make_safe(MixNode::new());
    nm.connect(source.output(0), a.input(0)).unwrap();
    nm.connect(source.output(0), b.input(0)).unwrap();
    nm.connect(a.output(0), mix.input(0)).unwrap();
    nm.connect(b.output(0), mix.input(0)).unwrap();
    nm.connect(source.output(0), mix.input(0)).unwrap();
    nm.register_root_process(mix.key()).unwrap();
    // Also a root, but already pulled through the mix
    nm.register_root_process(source.key()).unwrap();
    for _ in 0..3 {
        nm.process_period();
    }
    assert_eq!(source.load(Ordering::Relaxed), 3);
    assert_eq!(a.load(Ordering::Relaxed), 3);
    assert_eq!(b.load(Ordering::Relaxed), 3);
    let graph = nm.lock();
    // 2 + 2 + 1
    assert_eq!(graph.output_buffer(mix.output(0)), Some(&[5.0; 4][..]));
}

#[test]
fn unconnected_nodes_are_not_processed() {
    let nm = test_node_manager(4);
    let node = nm.make_safe(OneNode::new());
    nm.process_period();
    assert_eq!(node.load(Ordering::Relaxed), 0);
    nm.register_root_process(node.key()).unwrap();
    nm.process_period();
    nm.unregister_root_process(node.key());
    nm.process_period();
    assert_eq!(node.load(Ordering::Relaxed), 1);
}

#[test]
fn release_is_deferred_to_the_next_period() {
    let nm = test_node_manager(4);
    let node = nm.make_safe(OneNode::new());
    let ptr = node.get();
    let key = node.key();
    nm.register_root_process(key).unwrap();
    drop(node);
    assert_eq!(nm.pending_release_count(), 1);
    assert!(ptr.is_alive());
    assert!(nm.lock().is_root(key));
    nm.process_period();
    assert_eq!(nm.pending_release_count(), 0);
    assert!(!ptr.is_alive());
    assert_eq!(nm.lock().node_count(), 0);
    // The controls outlive the node
    assert_eq!(ptr.load(Ordering::Relaxed), 1);
}

#[test]
fn release_from_another_thread() {
    let nm = test_node_manager(4);
    let nodes: Vec<_> = (0..8).map(|_| nm.make_safe(OneNode::new())).collect();
    let keys: Vec<NodeKey> = nodes.iter().map(|node| node.key()).collect();
    thread::spawn(move || drop(nodes)).join().unwrap();
    assert_eq!(nm.lock().node_count(), 8);
    nm.process_period();
    let graph = nm.lock();
    assert_eq!(graph.node_count(), 0);
    assert!(keys.iter().all(|key| !graph.contains(*key)));
}

#[test]
fn released_node_is_disconnected() {
    let nm = test_node_manager(4);
    let source = nm.make_safe(OneNode::new());
    let sink = nm.make_safe(OneNode::new());
    nm.connect(source.output(0), sink.input(0)).unwrap();
    nm.register_root_process(sink.key()).unwrap();
    nm.process_period();
    assert_eq!(
        nm.lock().output_buffer(sink.output(0)),
        Some(&[2.0; 4][..])
    );
    drop(source);
    nm.process_period();
    assert_eq!(nm.lock().input_connections(sink.input(0)), Ok(&[][..]));
    nm.process_period();
    assert_eq!(
        nm.lock().output_buffer(sink.output(0)),
        Some(&[1.0; 4][..])
    );
}

#[test]
fn feedback_reads_the_previous_period() {
    let nm = test_node_manager(4);
    let a = nm.make_safe(OneNode::new());
    let b = nm.make_safe(OneNode::new());
    nm.connect(a.output(0), b.input(0)).unwrap();
    nm.connect(b.output(0), a.input(0)).unwrap();
    nm.register_root_process(b.key()).unwrap();
    nm.process_period();
    assert_eq!(nm.lock().output_buffer(b.output(0)), Some(&[2.0; 4][..]));
    nm.process_period();
    assert_eq!(nm.lock().output_buffer(b.output(0)), Some(&[4.0; 4][..]));
    assert_eq!(a.load(Ordering::Relaxed), 2);
}

#[test]
fn self_loop_reads_silence() {
    let nm = test_node_manager(4);
    let node = nm.make_safe(OneNode::new());
    let constant = nm.make_safe(ControlNode::new(&nm, 0.5));
    nm.connect(node.output(0), node.input(0)).unwrap();
    nm.register_root_process(node.key()).unwrap();
    nm.process_period();
    nm.process_period();
    assert_eq!(nm.lock().output_buffer(node.output(0)), Some(&[1.0; 4][..]));
    // With another connection only the other one is heard
    nm.connect(constant.output(0), node.input(0)).unwrap();
    nm.process_period();
    assert_eq!(nm.lock().output_buffer(node.output(0)), Some(&[1.5; 4][..]));
}

#[test]
fn connection_errors() {
    let nm = test_node_manager(4);
    let a = nm.make_safe(OneNode::new());
    let b = nm.make_safe(OneNode::new());
    assert_eq!(
        nm.connect(a.output(1), b.input(0)),
        Err(ConnectionError::OutputOutOfRange {
            name: "OneNode",
            index: 1,
            num_outputs: 1
        })
    );
    assert_eq!(
        nm.connect(a.output(0), b.input(3)),
        Err(ConnectionError::InputOutOfRange {
            name: "OneNode",
            index: 3,
            num_inputs: 1
        })
    );
    let key = b.key();
    drop(b);
    nm.process_period();
    assert_eq!(
        nm.connect(a.output(0), InputPin::new(key, 0)),
        Err(ConnectionError::NodeNotFound(key))
    );
    assert_eq!(
        nm.register_root_process(key),
        Err(ConnectionError::NodeNotFound(key))
    );
    // Disconnecting something that isn't connected is fine
    let c = nm.make_safe(OneNode::new());
    assert_eq!(nm.disconnect(a.output(0), c.input(0)), Ok(()));
}

#[test]
fn event_handlers_run_after_the_period() {
    let nm = test_node_manager(4);
    let emitter = nm.make_safe(EventNode::new(NodeEventKind::Finished));
    let source = nm.make_safe(OneNode::new());
    let sink = nm.make_safe(OneNode::new());
    nm.connect(source.output(0), sink.input(0)).unwrap();
    nm.register_root_process(emitter.key()).unwrap();
    nm.register_root_process(sink.key()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = calls.clone();
        let (output, input) = (source.output(0), sink.input(0));
        nm.lock()
            .set_event_handler(emitter.key(), move |graph, event| {
                assert_eq!(event.kind, NodeEventKind::Finished);
                calls.fetch_add(1, Ordering::Relaxed);
                graph.disconnect(output, input).unwrap();
            })
            .unwrap();
    }
    nm.process_period();
    assert_eq!(calls.load(Ordering::Relaxed), 1);
    // The connection was still there during the period
    assert_eq!(nm.lock().output_buffer(sink.output(0)), Some(&[2.0; 4][..]));
    nm.process_period();
    assert_eq!(nm.lock().output_buffer(sink.output(0)), Some(&[1.0; 4][..]));

    let mut events = vec![];
    assert_eq!(nm.poll_events(|e| events.push(e)), 2);
    assert!(events.iter().all(|e| e.node == emitter.key()));
    assert_eq!(events[0].sample_time, 0);
    assert_eq!(events[1].sample_time, 4);

    nm.lock().remove_event_handler(emitter.key());
    nm.process_period();
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

#[test]
fn events_over_capacity_are_dropped() {
    let nm = NodeManager::new(NodeManagerSettings {
        internal_buffer_size: 4,
        event_capacity: 2,
        ..Default::default()
    });
    let nodes: Vec<_> = (0..3)
        .map(|_| nm.make_safe(EventNode::new(NodeEventKind::RampFinished)))
        .collect();
    for node in &nodes {
        nm.register_root_process(node.key()).unwrap();
    }
    nm.process_period();
    assert_eq!(nm.poll_events(|_| ()), 2);
    nm.process_period();
    assert_eq!(nm.poll_events(|_| ()), 2);
}

#[test]
fn handler_is_dropped_with_its_node() {
    let nm = test_node_manager(4);
    let emitter = nm.make_safe(EventNode::new(NodeEventKind::Finished));
    let token = Arc::new(());
    {
        let token = token.clone();
        nm.lock()
            .set_event_handler(emitter.key(), move |_, _| {
                assert!(Arc::strong_count(&token) > 1);
            })
            .unwrap();
    }
    assert_eq!(Arc::strong_count(&token), 2);
    drop(emitter);
    nm.process_period();
    assert_eq!(Arc::strong_count(&token), 1);
}

#[test]
fn sample_rate_reaches_every_node() {
    let nm = test_node_manager(4);
    let a = nm.make_safe(EventNode::new(NodeEventKind::Finished));
    let b = nm.make_safe(EventNode::new(NodeEventKind::Finished));
    assert_eq!(Sample::from_bits(a.load(Ordering::Relaxed)), 1000.0);
    nm.set_sample_rate(48000.0);
    for node in [&a, &b] {
        assert_eq!(Sample::from_bits(node.load(Ordering::Relaxed)), 48000.0);
    }
    assert_eq!(nm.sample_rate(), 48000.0);
    assert_eq!(nm.samples_per_millisecond(), 48.0);
    assert_eq!(nm.clock().ms_to_samples(10.0), 480);
}

#[test]
fn buffer_size_change_resizes_buffers() {
    let nm = test_node_manager(4);
    let node = nm.make_safe(OneNode::new());
    nm.register_root_process(node.key()).unwrap();
    nm.process_period();
    assert_eq!(nm.sample_time(), 4);
    nm.set_internal_buffer_size(8);
    nm.process_period();
    assert_eq!(nm.sample_time(), 12);
    assert_eq!(nm.lock().output_buffer(node.output(0)), Some(&[1.0; 8][..]));
    // Made safe after the change
    let late = nm.make_safe(OneNode::new());
    nm.connect(node.output(0), late.input(0)).unwrap();
    nm.register_root_process(late.key()).unwrap();
    nm.process_period();
    assert_eq!(nm.lock().output_buffer(late.output(0)), Some(&[2.0; 8][..]));
}

#[test]
fn channel_counts() {
    let nm = test_node_manager(4);
    assert_eq!(nm.input_channel_count(), 0);
    assert_eq!(nm.output_channel_count(), 1);
    nm.set_channel_counts(2, 4);
    assert_eq!(nm.input_channel_count(), 2);
    assert_eq!(nm.output_channel_count(), 4);
    let mut outputs = vec![vec![1.0; 4]; 4];
    nm.render(&mut outputs);
    assert!(outputs.iter().flatten().all(|s| *s == 0.0));
}

#[test]
fn free_nodes_while_the_audio_thread_runs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let nm = test_node_manager(16);
    let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let audio_thread = {
        let nm = nm.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut outputs = vec![vec![0.0; 16]];
            while !done.load(Ordering::SeqCst) {
                nm.render(&mut outputs);
                thread::sleep(std::time::Duration::from_micros(100));
            }
        })
    };
    let mut nodes: Vec<SafeOwner<OneNode>> = vec![];
    for _ in 0..10 {
        let node = nm.make_safe(OneNode::new());
        match nodes.last() {
            Some(last) => nm.connect(node.output(0), last.input(0)).unwrap(),
            None => nm.register_root_process(node.key()).unwrap(),
        }
        nodes.push(node);
        thread::sleep(std::time::Duration::from_millis(1));
    }
    use rand::seq::SliceRandom;
    let mut rng = rand::thread_rng();
    nodes.shuffle(&mut rng);
    for node in nodes {
        drop(node);
        thread::sleep(std::time::Duration::from_millis(1));
    }
    done.store(true, Ordering::SeqCst);
    audio_thread.join().unwrap();
    nm.process_period();
    assert_eq!(nm.lock().node_count(), 0);
    assert_eq!(nm.pending_release_count(), 0);
}

#[test]
fn release_in_an_event_handler_overflows_quietly() {
    let nm = NodeManager::new(NodeManagerSettings {
        sample_rate: 1000.0,
        internal_buffer_size: 4,
        output_channel_count: 1,
        trash_capacity: 1,
        ..Default::default()
    });
    let emitter = nm.make_safe(EventNode::new(NodeEventKind::Finished));
    nm.register_root_process(emitter.key()).unwrap();
    let mut owned = Some([nm.make_safe(OneNode::new()), nm.make_safe(OneNode::new())]);
    nm.lock()
        .set_event_handler(emitter.key(), move |_, _| {
            owned.take();
        })
        .unwrap();
    assert_eq!(nm.lock().node_count(), 3);
    nm.process_period();
    // Released on the audio thread and reclaimed in the same period
    assert_eq!(nm.lock().node_count(), 1);
    assert_eq!(nm.pending_release_count(), 0);
    // Counted for the next poll to report
    assert_eq!(nm.shared.trash.take_overflow_count(), 1);
    assert_eq!(nm.poll_events(|_| ()), 1);
}
