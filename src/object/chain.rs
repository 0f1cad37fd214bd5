use crate::node_manager::{InputPin, NodeManager, OutputPin};

use super::{
    connect_cyclic, AudioObject, AudioObjectInstance, ErrorState, ObjectError,
};

/// Objects wired in series: the output of each object feeds the default
/// input of the next. The input of the chain is the input of the first
/// object, the output of the chain that of the last.
///
/// ```
/// use tonverk::prelude::*;
///
/// let node_manager = NodeManager::new(NodeManagerSettings::default());
/// let chain = Chain::new("strip")
///     .with_object(FilterObject::new("filter", 2, FilterMode::Low, 2000.0))
///     .with_object(GainObject::new("gain", 2, 0.5));
/// let strip = chain.instantiate_chain(&node_manager, &mut ErrorState::new()).unwrap();
/// assert_eq!(strip.len(), 2);
/// assert!(strip.get_object::<FilterInstance>(0).is_some());
/// ```
pub struct Chain {
    id: String,
    objects: Vec<Box<dyn AudioObject>>,
}

impl Chain {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            objects: Vec::new(),
        }
    }
    /// Append an object to the end of the chain.
    pub fn with_object(mut self, object: impl AudioObject + 'static) -> Self {
        self.objects.push(Box::new(object));
        self
    }
    #[allow(missing_docs)]
    pub fn push(&mut self, object: Box<dyn AudioObject>) {
        self.objects.push(object);
    }

    /// Like [`AudioObject::instantiate`], keeping the concrete instance type.
    pub fn instantiate_chain(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<ChainInstance> {
        if !errors.check(!self.objects.is_empty(), || ObjectError::EmptyChain {
            object: self.id.clone(),
        }) {
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
        {
            let mut graph = node_manager.lock();
            for (i, pair) in instances.windows(2).enumerate() {
                if let Err(e) = connect_cyclic(&mut graph, &*pair[0], &*pair[1], None) {
                    errors.push(e.into_object_error(
                        &self.id,
                        self.objects[i].id(),
                        self.objects[i + 1].id(),
                        None,
                    ));
                    return None;
                }
            }
        }
        Some(ChainInstance { instances })
    }
}

impl AudioObject for Chain {
    fn id(&self) -> &str {
        &self.id
    }
    fn instantiate(
        &self,
        node_manager: &NodeManager,
        errors: &mut ErrorState,
    ) -> Option<Box<dyn AudioObjectInstance>> {
        self.instantiate_chain(node_manager, errors)
            .map(|instance| Box::new(instance) as Box<dyn AudioObjectInstance>)
    }
}

/// A live [`Chain`]. Never empty.
pub struct ChainInstance {
    instances: Vec<Box<dyn AudioObjectInstance>>,
}

impl ChainInstance {
    /// The instance at position `index` in the chain.
    pub fn get(&self, index: usize) -> Option<&dyn AudioObjectInstance> {
        self.instances.get(index).map(|instance| &**instance)
    }
    /// The instance at position `index`, if it is a `T`.
    pub fn get_object<T: AudioObjectInstance>(&self, index: usize) -> Option<&T> {
        self.instances.get(index)?.downcast_ref::<T>()
    }
    #[allow(missing_docs)]
    pub fn len(&self) -> usize {
        self.instances.len()
    }
    /// Always false, a chain has at least one object.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn first(&self) -> &dyn AudioObjectInstance {
        &*self.instances[0]
    }
    fn last(&self) -> &dyn AudioObjectInstance {
        &*self.instances[self.instances.len() - 1]
    }
}

impl AudioObjectInstance for ChainInstance {
    fn channel_count(&self) -> usize {
        self.last().channel_count()
    }
    fn output_for_channel(&self, channel: usize) -> OutputPin {
        self.last().output_for_channel(channel)
    }
    fn input_channel_count(&self) -> usize {
        self.first().input_channel_count()
    }
    fn input_for_channel(&self, channel: usize) -> Option<InputPin> {
        self.first().input_for_channel(channel)
    }
    fn named_input(&self, name: &str, channel: usize) -> Option<InputPin> {
        self.first().named_input(name, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_manager::NodeManagerSettings;
    use crate::object::{ControlObject, GainObject, MixerObject};

    #[test]
    fn gains_in_series() {
        let nm = NodeManager::new(NodeManagerSettings {
            internal_buffer_size: 4,
            output_channel_count: 2,
            ..Default::default()
        });
        let chain = Chain::new("chain")
            .with_object(ControlObject::new("source", 1, 1.0))
            .with_object(GainObject::new("a", 2, 0.5))
            .with_object(GainObject::new("b", 2, 0.5));
        let chain = chain.instantiate_chain(&nm, &mut ErrorState::new()).unwrap();
        assert_eq!(chain.channel_count(), 2);
        assert_eq!(chain.input_channel_count(), 0);

        let mut graph = nm.lock();
        let root = chain.output_for_channel(1);
        graph.register_root(root.node()).unwrap();
        graph.process_period();
        assert_eq!(graph.output_buffer(root), Some(&[0.25; 4][..]));
    }

    #[test]
    fn object_without_input_breaks_the_chain() {
        let nm = NodeManager::new(NodeManagerSettings::default());
        let mut errors = ErrorState::new();
        let chain = Chain::new("chain")
            .with_object(MixerObject::new("mix", 2))
            .with_object(ControlObject::new("control", 2, 1.0));
        assert!(chain.instantiate(&nm, &mut errors).is_none());
        assert_eq!(
            errors.errors(),
            &[ObjectError::NoInputInterface {
                object: "chain".into(),
                id: "control".into(),
                input: "default".into(),
            }]
        );
    }
}
