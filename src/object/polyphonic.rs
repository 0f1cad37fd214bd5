//! A pool of voices mixed into one multichannel output.
//!
//! A voice is free until it is handed out by
//! [`PolyphonicInstance::find_free_voice`], and busy until its envelope
//! finishes. Playing a voice connects it to the mixer, the envelope
//! finishing disconnects it again. The disconnection happens on the audio
//! thread, in the period the envelope finished, so a finished voice never
//! contributes to the following period.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::node::NodeEventKind;
use crate::node_manager::{ConnectionError, InputPin, NodeManager, OutputPin};
use crate::Sample;

use super::{
    AudioObject, AudioObjectInstance, ErrorState, MixerInstance, MixerObject, ObjectError,
    VoiceInstance, VoiceObject,
};

/// Describes a [`PolyphonicInstance`].
pub struct PolyphonicObject {
    id: String,
    voice: VoiceObject,
    voice_count: usize,
    voice_stealing: bool,
    channel_count: usize,
}

impl PolyphonicObject {
    /// Voice stealing is off.
    pub fn new(
        id: impl Into<String>,
        voice: VoiceObject,
        voice_count: usize,
        channel_count: usize,
    ) -> Self {
        Self {
            id: id.into(),
            voice,
            voice_count,
            voice_stealing: false,
            channel_count,
        }
    }
    /// When every voice is busy, hand out the one that was started first.
    pub fn with_voice_stealing(mut self, voice_stealing: bool) -> Self {
        self.voice_stealing = voice_stealing;
        self
    }

    /// Like [`AudioObject::instantiate`], keeping the concrete instance type.
    pub fn instantiate_polyphonic(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<PolyphonicInstance> {
        if !errors.check(self.voice_count > 0, || ObjectError::InvalidSetting {
            object: self.id.clone(),
            message: "a polyphonic object needs at least one voice".to_string(),
        }) {
            return None;
        }
        let mixers = MixerObject::new(format!("{}.mix", self.id), self.channel_count)
            .to_parallel()
            .instantiate_parallel(node_manager, errors)?;
        let mut voices = Vec::with_capacity(self.voice_count);
        for _ in 0..self.voice_count {
            let Some(instance) = self.voice.instantiate_voice(node_manager, errors) else {
                errors.push(ObjectError::Failed {
                    object: self.id.clone(),
                    id: self.voice.id().to_string(),
                });
                return None;
            };
            let found = instance.channel_count();
            if found != self.channel_count {
                errors.push(ObjectError::ChannelCountMismatch {
                    object: self.id.clone(),
                    id: self.voice.id().to_string(),
                    expected: self.channel_count,
                    found,
                });
                return None;
            }
            let connections = (0..self.channel_count)
                .map(|channel| {
                    (
                        instance.output_for_channel(channel),
                        mixers.channel(channel).input(0),
                    )
                })
                .collect();
            voices.push(Voice {
                instance,
                connections,
                state: Arc::new(VoiceState::default()),
            });
        }
        {
            let mut graph = node_manager.lock();
            for voice in &voices {
                let connections = voice.connections.clone();
                let state = voice.state.clone();
                let envelope = voice.instance.envelope().controls().clone();
                let result = graph.set_event_handler(voice.instance.envelope().key(), move |graph, event| {
                    if event.kind != NodeEventKind::Finished {
                        return;
                    }
                    debug_assert_eq!(
                        envelope.value(),
                        0.0,
                        "a voice must only finish once its envelope is silent"
                    );
                    for (output, input) in &connections {
                        // Fails only if the mixer is already gone
                        let _ = graph.disconnect(*output, *input);
                    }
                    state.busy.store(false, Ordering::Release);
                });
                if let Err(source) = result {
                    errors.push(ObjectError::Connection {
                        object: self.id.clone(),
                        source,
                    });
                    return None;
                }
            }
        }
        tracing::debug!(
            object = %self.id,
            voices = self.voice_count,
            channels = self.channel_count,
            voice_stealing = self.voice_stealing,
            "Instantiated polyphonic object"
        );
        Some(PolyphonicInstance {
            node_manager: node_manager.clone(),
            voices,
            mixers,
            voice_stealing: self.voice_stealing,
        })
    }
}

impl AudioObject for PolyphonicObject {
    fn id(&self) -> &str {
        &self.id
    }
    fn instantiate(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<Box<dyn AudioObjectInstance>> {
        self.instantiate_polyphonic(node_manager, errors)
            .map(|instance| Box::new(instance) as Box<dyn AudioObjectInstance>)
    }
}

#[derive(Debug, Default)]
struct VoiceState {
    busy: AtomicBool,
    start_time: AtomicU64,
}

struct Voice {
    instance: VoiceInstance,
    connections: Vec<(OutputPin, InputPin)>,
    state: Arc<VoiceState>,
}

/// A live [`PolyphonicObject`]. Its outputs are the per channel mixers every
/// playing voice is connected to.
///
/// ```
/// use tonverk::prelude::*;
///
/// let node_manager = NodeManager::new(NodeManagerSettings::default());
/// let voice = VoiceObject::new(
///     GraphObject::new("voice")
///         .with_object(ControlObject::new("source", 2, 0.5))
///         .with_object(EnvelopeObject::new("envelope", vec![
///             Segment::new(1.0, 10.0),
///             Segment::new(0.0, 100.0),
///         ]))
///         .with_object(GainObject::new("gain", 2, 1.0))
///         .link("source", "gain")
///         .link("envelope", "gain.modulation")
///         .with_output("gain"),
///     "envelope",
/// );
/// let pool = PolyphonicObject::new("pool", voice, 8, 2)
///     .instantiate_polyphonic(&node_manager, &mut ErrorState::new())
///     .unwrap();
/// if let Some(voice) = pool.find_free_voice() {
///     pool.play(voice, 0.0)?;
/// }
/// assert_eq!(pool.busy_voice_count(), 1);
/// # Ok::<(), tonverk::TonverkError>(())
/// ```
pub struct PolyphonicInstance {
    node_manager: NodeManager,
    voices: Vec<Voice>,
    mixers: MixerInstance,
    voice_stealing: bool,
}

impl PolyphonicInstance {
    /// Hand out a free voice and mark it busy. When every voice is busy, this
    /// is `None`, or with voice stealing the voice with the earliest start
    /// time, whose busy flag is left as it is.
    pub fn find_free_voice(&self) -> Option<usize> {
        let _graph = self.node_manager.lock();
        if let Some(index) = self
            .voices
            .iter()
            .position(|voice| !voice.state.busy.load(Ordering::Acquire))
        {
            self.voices[index].state.busy.store(true, Ordering::Release);
            return Some(index);
        }
        if !self.voice_stealing {
            return None;
        }
        // Oldest start time, busy or not
        self.voices
            .iter()
            .enumerate()
            .min_by_key(|(_, voice)| voice.state.start_time.load(Ordering::Acquire))
            .map(|(index, _)| index)
    }

    /// Connect a voice to the mixers and trigger its envelope. Relative
    /// envelope segments are fractions of `duration_ms`.
    ///
    /// # Panics
    /// If `voice` is out of range.
    pub fn play(&self, voice: usize, duration_ms: Sample) -> Result<(), ConnectionError> {
        let voice = self.voice_at(voice);
        let mut graph = self.node_manager.lock();
        voice
            .state
            .start_time
            .store(graph.sample_time(), Ordering::Release);
        voice.state.busy.store(true, Ordering::Release);
        for (output, input) in &voice.connections {
            graph.connect(*output, *input)?;
        }
        voice.instance.envelope().trigger(duration_ms);
        Ok(())
    }

    /// Ramp the voice's envelope to zero. The voice is freed when it gets there.
    ///
    /// # Panics
    /// If `voice` is out of range.
    pub fn stop(&self, voice: usize, release_ms: Sample) {
        self.voice_at(voice).instance.envelope().stop(release_ms);
    }

    /// The instance of a voice, e.g. to change its parameters before playing it.
    ///
    /// # Panics
    /// If `voice` is out of range.
    pub fn voice(&self, voice: usize) -> &VoiceInstance {
        &self.voice_at(voice).instance
    }

    #[allow(missing_docs)]
    pub fn is_busy(&self, voice: usize) -> bool {
        self.voice_at(voice).state.busy.load(Ordering::Acquire)
    }

    #[allow(missing_docs)]
    pub fn busy_voice_count(&self) -> usize {
        self.voices
            .iter()
            .filter(|voice| voice.state.busy.load(Ordering::Acquire))
            .count()
    }

    #[allow(missing_docs)]
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    #[allow(missing_docs)]
    pub fn voice_stealing(&self) -> bool {
        self.voice_stealing
    }

    fn voice_at(&self, voice: usize) -> &Voice {
        assert!(
            voice < self.voices.len(),
            "Voice {voice} out of range, the pool has {} voices",
            self.voices.len()
        );
        &self.voices[voice]
    }
}

impl AudioObjectInstance for PolyphonicInstance {
    fn channel_count(&self) -> usize {
        self.mixers.channel_count()
    }
    fn output_for_channel(&self, channel: usize) -> OutputPin {
        self.mixers.output_for_channel(channel)
    }
}
