//! State variable filter.
//!
//! Implemented based on [a technical paper by Andrew Simper, Cytomic, 2013](https://cytomic.com/files/dsp/SvfLinearTrapOptimised2.pdf)
//! also available at <https://cytomic.com/technical-papers/>

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::dirty_flag::DirtyFlag;
use crate::node::{Node, ProcessContext};
use crate::Sample;

/// Different supported filter responses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterMode {
    #[allow(missing_docs)]
    #[default]
    Low,
    #[allow(missing_docs)]
    High,
    #[allow(missing_docs)]
    Band,
    #[allow(missing_docs)]
    Notch,
    #[allow(missing_docs)]
    Peak,
    #[allow(missing_docs)]
    All,
}

impl FilterMode {
    fn to_u8(self) -> u8 {
        self as u8
    }
    fn from_u8(v: u8) -> Self {
        match v {
            1 => FilterMode::High,
            2 => FilterMode::Band,
            3 => FilterMode::Notch,
            4 => FilterMode::Peak,
            5 => FilterMode::All,
            _ => FilterMode::Low,
        }
    }
}

#[derive(Debug)]
struct FilterShared {
    mode: AtomicU8,
    frequency: AtomicU32,
    resonance: AtomicU32,
    changed: DirtyFlag,
}

/// Filters its input. Frequency, resonance and mode can be changed from any
/// thread and take effect at the start of the next period.
#[derive(Debug)]
pub struct FilterNode {
    shared: Arc<FilterShared>,
    sample_rate: Sample,
    // state
    ic1eq: Sample,
    ic2eq: Sample,
    // coefficients
    a1: Sample,
    a2: Sample,
    a3: Sample,
    m0: Sample,
    m1: Sample,
    m2: Sample,
}

impl FilterNode {
    /// `resonance` is the filter Q.
    pub fn new(mode: FilterMode, frequency: Sample, resonance: Sample) -> Self {
        Self {
            shared: Arc::new(FilterShared {
                mode: AtomicU8::new(mode.to_u8()),
                frequency: AtomicU32::new(frequency.to_bits()),
                resonance: AtomicU32::new(resonance.to_bits()),
                changed: DirtyFlag::new(),
            }),
            sample_rate: 44100.0,
            ic1eq: 0.,
            ic2eq: 0.,
            a1: 0.,
            a2: 0.,
            a3: 0.,
            m0: 0.,
            m1: 0.,
            m2: 0.,
        }
    }

    fn update_coefficients(&mut self) {
        let mode = FilterMode::from_u8(self.shared.mode.load(Ordering::Relaxed));
        let nyquist = self.sample_rate * 0.5;
        let cutoff = Sample::from_bits(self.shared.frequency.load(Ordering::Relaxed))
            .clamp(1.0, nyquist * 0.99);
        let q = Sample::from_bits(self.shared.resonance.load(Ordering::Relaxed)).max(0.01);
        let g = ((std::f64::consts::PI as Sample * cutoff) / self.sample_rate).tan();
        let k = 1.0 / q;
        self.a1 = 1.0 / (1.0 + g * (g + k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
        (self.m0, self.m1, self.m2) = match mode {
            FilterMode::Low => (0., 0., 1.),
            FilterMode::Band => (0., 1., 0.),
            FilterMode::High => (1., -k, -1.),
            FilterMode::Notch => (1., -k, 0.),
            FilterMode::Peak => (1., -k, -2.),
            FilterMode::All => (1., -2. * k, 0.),
        };
    }

    #[inline]
    fn process_sample(&mut self, v0: Sample) -> Sample {
        let v3 = v0 - self.ic2eq;
        let v1 = self.a1 * self.ic1eq + self.a2 * v3;
        let v2 = self.ic2eq + self.a2 * self.ic1eq + self.a3 * v3;
        self.ic1eq = 2. * v1 - self.ic1eq;
        self.ic2eq = 2. * v2 - self.ic2eq;
        self.m0 * v0 + self.m1 * v1 + self.m2 * v2
    }
}

/// Controls of a [`FilterNode`].
#[derive(Debug, Clone)]
pub struct FilterHandle {
    shared: Arc<FilterShared>,
}

impl FilterHandle {
    /// Cutoff or center frequency in Hz
    pub fn set_frequency(&self, frequency: Sample) {
        self.shared
            .frequency
            .store(frequency.to_bits(), Ordering::Relaxed);
        self.shared.changed.set();
    }
    #[allow(missing_docs)]
    pub fn set_resonance(&self, resonance: Sample) {
        self.shared
            .resonance
            .store(resonance.to_bits(), Ordering::Relaxed);
        self.shared.changed.set();
    }
    #[allow(missing_docs)]
    pub fn set_mode(&self, mode: FilterMode) {
        self.shared.mode.store(mode.to_u8(), Ordering::Relaxed);
        self.shared.changed.set();
    }
    #[allow(missing_docs)]
    pub fn frequency(&self) -> Sample {
        Sample::from_bits(self.shared.frequency.load(Ordering::Relaxed))
    }
    #[allow(missing_docs)]
    pub fn resonance(&self) -> Sample {
        Sample::from_bits(self.shared.resonance.load(Ordering::Relaxed))
    }
    #[allow(missing_docs)]
    pub fn mode(&self) -> FilterMode {
        FilterMode::from_u8(self.shared.mode.load(Ordering::Relaxed))
    }
}

impl Node for FilterNode {
    type Controls = FilterHandle;

    fn controls(&self) -> Self::Controls {
        FilterHandle {
            shared: self.shared.clone(),
        }
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        if self.shared.changed.check() {
            self.update_coefficients();
        }
        let input = ctx.input(0);
        let output = ctx.output(0);
        match input {
            Some(input) => {
                for (out, sample) in output.iter_mut().zip(input) {
                    *out = self.process_sample(*sample);
                }
            }
            // Let the filter ring out
            None => {
                for out in output.iter_mut() {
                    *out = self.process_sample(0.0);
                }
            }
        }
    }
    fn num_inputs(&self) -> usize {
        1
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn name(&self) -> &'static str {
        "FilterNode"
    }
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        self.sample_rate = sample_rate;
        self.update_coefficients();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_manager::{NodeManager, NodeManagerSettings};
    use crate::nodes::test_utils::{listen, render};
    use crate::nodes::ControlNode;

    fn settled_output(mode: FilterMode) -> f32 {
        let nm = NodeManager::new(NodeManagerSettings {
            sample_rate: 44100.0,
            internal_buffer_size: 64,
            ..Default::default()
        });
        let dc = nm.make_safe(ControlNode::new(&nm, 1.0));
        let filter = nm.make_safe(FilterNode::new(mode, 1000.0, 0.707));
        nm.connect(dc.output(0), filter.input(0)).unwrap();
        let _out = listen(&nm, &filter, 0);
        let settled = (0..100).map(|_| render(&nm, 0)).last().unwrap();
        settled[63]
    }

    #[test]
    fn dc_response() {
        assert!((settled_output(FilterMode::Low) - 1.0).abs() < 1e-3);
        assert!(settled_output(FilterMode::High).abs() < 1e-3);
        assert!(settled_output(FilterMode::Band).abs() < 1e-3);
        assert!((settled_output(FilterMode::Notch) - 1.0).abs() < 1e-3);
        assert!((settled_output(FilterMode::All) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn settings_from_handle() {
        let filter = FilterNode::new(FilterMode::Low, 1000.0, 1.0);
        let handle = filter.controls();
        handle.set_mode(FilterMode::Notch);
        handle.set_frequency(200.0);
        assert_eq!(handle.mode(), FilterMode::Notch);
        assert_eq!(handle.frequency(), 200.0);
        assert_eq!(handle.resonance(), 1.0);
    }
}
