use crate::node::{Node, ProcessContext};

/// Sums everything connected to its input.
#[derive(Debug, Clone, Default)]
pub struct MixNode;

impl MixNode {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        Self
    }
}

impl Node for MixNode {
    type Controls = ();

    fn controls(&self) -> Self::Controls {}
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        // The input pin does the summing
        match ctx.input(0) {
            Some(input) => ctx.output(0).copy_from_slice(input),
            None => ctx.clear_outputs(),
        }
    }
    fn num_inputs(&self) -> usize {
        1
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn name(&self) -> &'static str {
        "MixNode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_utils::{listen, node_manager, render};
    use crate::nodes::ControlNode;

    #[test]
    fn sums_connections() {
        let nm = node_manager(2);
        let mix = nm.make_safe(MixNode::new());
        let _out = listen(&nm, &mix, 1);
        assert_eq!(render(&nm, 1), vec![0.0; 2]);
        let sources: Vec<_> = [0.25, 0.5, 1.0]
            .into_iter()
            .map(|v| nm.make_safe(ControlNode::new(&nm, v)))
            .collect();
        for source in &sources {
            nm.connect(source.output(0), mix.input(0)).unwrap();
        }
        assert_eq!(render(&nm, 1), vec![1.75; 2]);
        nm.disconnect(sources[2].output(0), mix.input(0)).unwrap();
        assert_eq!(render(&nm, 1), vec![0.75; 2]);
    }
}
