use std::fmt;
use std::str::FromStr;

use crate::node_manager::{InputPin, NodeManager, OutputPin, SafePtr};
use crate::nodes::EnvelopeNode;

use super::{
    connect_cyclic, AudioObject, AudioObjectInstance, EnvelopeInstance, ErrorState, ObjectError,
};

/// A connection between two objects of a [`GraphObject`], written
/// `source -> target` or `source -> target.input`.
///
/// ```
/// use tonverk::object::Link;
///
/// let link: Link = "osc -> gain.modulation".parse().unwrap();
/// assert_eq!(link.source, "osc");
/// assert_eq!(link.target, "gain");
/// assert_eq!(link.input.as_deref(), Some("modulation"));
/// assert_eq!(link.to_string(), "osc -> gain.modulation");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    /// Id of the object whose outputs are connected
    pub source: String,
    /// Id of the object whose inputs are connected
    pub target: String,
    /// A named input of the target, the default input if `None`
    pub input: Option<String>,
}

impl Link {
    /// `target` is an object id, optionally followed by `.input`.
    pub fn new(source: impl Into<String>, target: &str) -> Self {
        let (target, input) = match target.split_once('.') {
            Some((target, input)) => (target.to_string(), Some(input.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            source: source.into(),
            target,
            input,
        }
    }
}

impl FromStr for Link {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, target) = s.split_once("->").ok_or_else(|| ObjectError::InvalidSetting {
            object: s.to_string(),
            message: "a link has the form \"source -> target[.input]\"".to_string(),
        })?;
        let (source, target) = (source.trim(), target.trim());
        if source.is_empty() || target.is_empty() {
            return Err(ObjectError::InvalidSetting {
                object: s.to_string(),
                message: "a link needs both a source and a target".to_string(),
            });
        }
        Ok(Link::new(source, target))
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)?;
        if let Some(input) = &self.input {
            write!(f, ".{input}")?;
        }
        Ok(())
    }
}

/// A set of named objects wired together by [`Link`]s. The output of the
/// graph is the output of one designated object, and optionally its input
/// is the input of another.
///
/// Every id is validated before anything is instantiated, so a description
/// naming an object it doesn't contain leaves nothing behind in the graph.
pub struct GraphObject {
    id: String,
    objects: Vec<Box<dyn AudioObject>>,
    links: Vec<Link>,
    output: Option<String>,
    input: Option<String>,
}

impl GraphObject {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objects: Vec::new(),
            links: Vec::new(),
            output: None,
            input: None,
        }
    }
    /// Add a child object, identified by its [`AudioObject::id`].
    pub fn with_object(mut self, object: impl AudioObject + 'static) -> Self {
        self.objects.push(Box::new(object));
        self
    }
    #[allow(missing_docs)]
    pub fn push(&mut self, object: Box<dyn AudioObject>) {
        self.objects.push(object);
    }
    /// Connect `source` to `target`, which may name an input as `target.input`.
    pub fn link(mut self, source: &str, target: &str) -> Self {
        self.links.push(Link::new(source, target));
        self
    }
    #[allow(missing_docs)]
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }
    /// The object whose outputs are the outputs of the graph.
    pub fn with_output(mut self, id: impl Into<String>) -> Self {
        self.output = Some(id.into());
        self
    }
    /// The object whose inputs are the inputs of the graph.
    pub fn with_input(mut self, id: impl Into<String>) -> Self {
        self.input = Some(id.into());
        self
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.objects.iter().position(|object| object.id() == id)
    }

    fn validate(&self, errors: &mut ErrorState) -> bool {
        let before = errors.errors().len();
        for (i, object) in self.objects.iter().enumerate() {
            if self.objects[..i].iter().any(|o| o.id() == object.id()) {
                errors.push(ObjectError::InvalidSetting {
                    object: self.id.clone(),
                    message: format!("the id \"{}\" is used more than once", object.id()),
                });
            }
        }
        if self.output.is_none() {
            errors.push(ObjectError::InvalidSetting {
                object: self.id.clone(),
                message: "no output object".to_string(),
            });
        }
        let referenced = self
            .output
            .iter()
            .chain(&self.input)
            .map(String::as_str)
            .chain(
                self.links
                    .iter()
                    .flat_map(|link| [link.source.as_str(), link.target.as_str()]),
            );
        let mut missing: Vec<&str> = Vec::new();
        for id in referenced {
            if self.index_of(id).is_none() && !missing.contains(&id) {
                missing.push(id);
            }
        }
        for id in missing {
            errors.push(ObjectError::MissingResource {
                object: self.id.clone(),
                id: id.to_string(),
            });
        }
        errors.errors().len() == before
    }

    /// Like [`AudioObject::instantiate`], keeping the concrete instance type.
    pub fn instantiate_graph(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<GraphInstance> {
        if !self.validate(errors) {
            return None;
        }
        let mut instances = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            match object.instantiate(node_manager, errors) {
                Some(instance) => instances.push(instance),
                None => {
                    errors.push(ObjectError::Failed {
                        object: self.id.clone(),
                        id: object.id().to_string(),
                    });
                    return None;
                }
            }
        }
        let position = |id: &str| self.index_of(id).unwrap_or_default();
        {
            let mut graph = node_manager.lock();
            for link in &self.links {
                let (source, target) = (position(&link.source), position(&link.target));
                let result = connect_cyclic(
                    &mut graph,
                    &*instances[source],
                    &*instances[target],
                    link.input.as_deref(),
                );
                if let Err(e) = result {
                    errors.push(e.into_object_error(
                        &self.id,
                        &link.source,
                        &link.target,
                        link.input.as_deref(),
                    ));
                    return None;
                }
            }
        }
        tracing::debug!(
            object = %self.id,
            objects = instances.len(),
            links = self.links.len(),
            "Instantiated graph"
        );
        Some(GraphInstance {
            ids: self.objects.iter().map(|o| o.id().to_string()).collect(),
            output: self.output.as_deref().map(position).unwrap_or_default(),
            input: self.input.as_deref().map(position),
            instances,
        })
    }
}

impl AudioObject for GraphObject {
    fn id(&self) -> &str {
        &self.id
    }
    fn instantiate(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<Box<dyn AudioObjectInstance>> {
        self.instantiate_graph(node_manager, errors)
            .map(|instance| Box::new(instance) as Box<dyn AudioObjectInstance>)
    }
}

/// A live [`GraphObject`].
pub struct GraphInstance {
    ids: Vec<String>,
    instances: Vec<Box<dyn AudioObjectInstance>>,
    output: usize,
    input: Option<usize>,
}

impl GraphInstance {
    /// The instance of the child object with `id`.
    pub fn object(&self, id: &str) -> Option<&dyn AudioObjectInstance> {
        let index = self.ids.iter().position(|i| i == id)?;
        Some(&*self.instances[index])
    }
    /// The instance of the child object with `id`, if it is a `T`.
    ///
    /// ```
    /// use tonverk::prelude::*;
    ///
    /// let node_manager = NodeManager::new(NodeManagerSettings::default());
    /// let graph = GraphObject::new("graph")
    ///     .with_object(GainObject::new("gain", 2, 1.0))
    ///     .with_output("gain")
    ///     .instantiate_graph(&node_manager, &mut ErrorState::new())
    ///     .unwrap();
    /// let gain = graph.get_object::<GainInstance>("gain").unwrap();
    /// gain.set_gain(0.5, 10.0, RampMode::Linear);
    /// assert!(graph.get_object::<FilterInstance>("gain").is_none());
    /// ```
    pub fn get_object<T: AudioObjectInstance>(&self, id: &str) -> Option<&T> {
        self.object(id)?.downcast_ref::<T>()
    }
    /// The ids of the child objects.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    fn output_instance(&self) -> &dyn AudioObjectInstance {
        &*self.instances[self.output]
    }
    fn input_instance(&self) -> Option<&dyn AudioObjectInstance> {
        self.input.map(|index| &*self.instances[index])
    }
}

impl AudioObjectInstance for GraphInstance {
    fn channel_count(&self) -> usize {
        self.output_instance().channel_count()
    }
    fn output_for_channel(&self, channel: usize) -> OutputPin {
        self.output_instance().output_for_channel(channel)
    }
    fn input_channel_count(&self) -> usize {
        self.input_instance()
            .map_or(0, |input| input.input_channel_count())
    }
    fn input_for_channel(&self, channel: usize) -> Option<InputPin> {
        self.input_instance()?.input_for_channel(channel)
    }
    fn named_input(&self, name: &str, channel: usize) -> Option<InputPin> {
        self.input_instance()?.named_input(name, channel)
    }
}

/// A graph that can be played as a voice of a
/// [`PolyphonicObject`](super::PolyphonicObject). The envelope object
/// shapes the voice and tells the pool when the voice has finished.
pub struct VoiceObject {
    graph: GraphObject,
    envelope: String,
}

impl VoiceObject {
    /// `envelope` is the id of an [`EnvelopeObject`](super::EnvelopeObject) in `graph`.
    pub fn new(graph: GraphObject, envelope: impl Into<String>) -> Self {
        Self {
            graph,
            envelope: envelope.into(),
        }
    }

    /// Like [`AudioObject::instantiate`], keeping the concrete instance type.
    pub fn instantiate_voice(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<VoiceInstance> {
        let graph = self.graph.instantiate_graph(node_manager, errors)?;
        let Some(object) = graph.object(&self.envelope) else {
            errors.push(ObjectError::MissingResource {
                object: self.graph.id.clone(),
                id: self.envelope.clone(),
            });
            return None;
        };
        let Some(envelope) = object.downcast_ref::<EnvelopeInstance>() else {
            errors.push(ObjectError::InvalidSetting {
                object: self.graph.id.clone(),
                message: format!("\"{}\" is not an envelope", self.envelope),
            });
            return None;
        };
        let envelope = envelope.channel(0).get();
        Some(VoiceInstance { graph, envelope })
    }
}

impl AudioObject for VoiceObject {
    fn id(&self) -> &str {
        &self.graph.id
    }
    fn instantiate(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<Box<dyn AudioObjectInstance>> {
        self.instantiate_voice(node_manager, errors)
            .map(|instance| Box::new(instance) as Box<dyn AudioObjectInstance>)
    }
}

/// A live [`VoiceObject`].
pub struct VoiceInstance {
    graph: GraphInstance,
    envelope: SafePtr<EnvelopeNode>,
}

impl VoiceInstance {
    #[allow(missing_docs)]
    pub fn graph(&self) -> &GraphInstance {
        &self.graph
    }
    /// The envelope that shapes the voice.
    pub fn envelope(&self) -> &SafePtr<EnvelopeNode> {
        &self.envelope
    }
}

impl AudioObjectInstance for VoiceInstance {
    fn channel_count(&self) -> usize {
        self.graph.channel_count()
    }
    fn output_for_channel(&self, channel: usize) -> OutputPin {
        self.graph.output_for_channel(channel)
    }
    fn input_channel_count(&self) -> usize {
        self.graph.input_channel_count()
    }
    fn input_for_channel(&self, channel: usize) -> Option<InputPin> {
        self.graph.input_for_channel(channel)
    }
    fn named_input(&self, name: &str, channel: usize) -> Option<InputPin> {
        self.graph.named_input(name, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_manager::NodeManagerSettings;
    use crate::object::{ControlObject, GainObject};

    #[test]
    fn parse_links() {
        assert_eq!(
            "a->b".parse::<Link>().unwrap(),
            Link {
                source: "a".into(),
                target: "b".into(),
                input: None
            }
        );
        assert!("a b".parse::<Link>().is_err());
        assert!(" -> b".parse::<Link>().is_err());
    }

    #[test]
    fn validation_happens_before_instantiation() {
        let nm = NodeManager::new(NodeManagerSettings::default());
        let mut errors = ErrorState::new();
        let graph = GraphObject::new("graph")
            .with_object(ControlObject::new("source", 2, 1.0))
            .with_object(GainObject::new("gain", 2, 1.0))
            .link("source", "gain")
            .link("lfo", "gain.modulation")
            .with_output("gain");
        assert!(graph.instantiate(&nm, &mut errors).is_none());
        assert_eq!(
            errors.errors(),
            &[ObjectError::MissingResource {
                object: "graph".into(),
                id: "lfo".into()
            }]
        );
        assert_eq!(nm.lock().node_count(), 0);
    }

    #[test]
    fn unknown_named_input() {
        let nm = NodeManager::new(NodeManagerSettings::default());
        let mut errors = ErrorState::new();
        let graph = GraphObject::new("graph")
            .with_object(ControlObject::new("source", 2, 1.0))
            .with_object(GainObject::new("gain", 2, 1.0))
            .link("source", "gain.sidechain")
            .with_output("gain");
        assert!(graph.instantiate(&nm, &mut errors).is_none());
        assert_eq!(
            errors.errors(),
            &[ObjectError::NoInputInterface {
                object: "graph".into(),
                id: "gain".into(),
                input: "sidechain".into(),
            }]
        );
    }

    #[test]
    fn voice_needs_an_envelope() {
        let nm = NodeManager::new(NodeManagerSettings::default());
        let mut errors = ErrorState::new();
        let voice = VoiceObject::new(
            GraphObject::new("voice")
                .with_object(ControlObject::new("source", 2, 1.0))
                .with_output("source"),
            "source",
        );
        assert!(voice.instantiate(&nm, &mut errors).is_none());
        assert!(matches!(
            errors.errors(),
            [ObjectError::InvalidSetting { object, .. }] if object == "voice"
        ));
    }
}
