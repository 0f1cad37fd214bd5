//! Segment envelope generator.
//!
//! An envelope is a list of up to [`MAX_SEGMENTS`] segments, each ramping from
//! wherever the previous one ended to its own destination. The segment list
//! lives in atomics and can be edited from any thread; a segment is read when
//! the envelope arrives at it.
//!
//! Trigger and stop requests share one slot, so the last one made before a
//! period is the one that period acts on.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::node::{Node, NodeEventKind, ProcessContext};
use crate::ramped_value::{RampMode, EXPONENTIAL_FLOOR};
use crate::Sample;

/// The number of segments an envelope can hold.
pub const MAX_SEGMENTS: usize = 16;

/// One stage of an envelope.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// The value at the end of the segment
    pub destination: Sample,
    /// In milliseconds, or as a fraction of the total duration passed to
    /// [`EnvelopeHandle::trigger`] if `duration_relative` is set.
    pub duration: Sample,
    #[allow(missing_docs)]
    pub duration_relative: bool,
    /// Follow a raised cosine curve instead of `mode`.
    pub translate: bool,
    #[allow(missing_docs)]
    pub mode: RampMode,
}

impl Segment {
    /// A linear segment with an absolute duration in milliseconds.
    pub fn new(destination: Sample, duration_ms: Sample) -> Self {
        Self {
            destination,
            duration: duration_ms,
            duration_relative: false,
            translate: false,
            mode: RampMode::Linear,
        }
    }
    /// A linear segment lasting `fraction` of the total duration.
    pub fn relative(destination: Sample, fraction: Sample) -> Self {
        Self {
            duration_relative: true,
            ..Self::new(destination, fraction)
        }
    }
    #[allow(missing_docs)]
    pub fn with_mode(mut self, mode: RampMode) -> Self {
        self.mode = mode;
        self
    }
    #[allow(missing_docs)]
    pub fn translated(mut self) -> Self {
        self.translate = true;
        self
    }
}

const REQUEST_NONE: u8 = 0;
const REQUEST_TRIGGER: u8 = 1;
const REQUEST_STOP: u8 = 2;

const FLAG_RELATIVE: u8 = 1;
const FLAG_TRANSLATE: u8 = 1 << 1;
const FLAG_EXPONENTIAL: u8 = 1 << 2;

#[derive(Debug, Default)]
struct SegmentCell {
    destination: AtomicU32,
    duration: AtomicU32,
    flags: AtomicU8,
}

impl SegmentCell {
    fn store(&self, segment: Segment) {
        let mut flags = 0;
        if segment.duration_relative {
            flags |= FLAG_RELATIVE;
        }
        if segment.translate {
            flags |= FLAG_TRANSLATE;
        }
        if segment.mode == RampMode::Exponential {
            flags |= FLAG_EXPONENTIAL;
        }
        self.destination
            .store(segment.destination.to_bits(), Ordering::Relaxed);
        self.duration
            .store(segment.duration.to_bits(), Ordering::Relaxed);
        self.flags.store(flags, Ordering::Release);
    }
    fn load(&self) -> Segment {
        let flags = self.flags.load(Ordering::Acquire);
        Segment {
            destination: Sample::from_bits(self.destination.load(Ordering::Relaxed)),
            duration: Sample::from_bits(self.duration.load(Ordering::Relaxed)),
            duration_relative: flags & FLAG_RELATIVE != 0,
            translate: flags & FLAG_TRANSLATE != 0,
            mode: if flags & FLAG_EXPONENTIAL != 0 {
                RampMode::Exponential
            } else {
                RampMode::Linear
            },
        }
    }
}

#[derive(Debug)]
struct EnvelopeShared {
    segments: [SegmentCell; MAX_SEGMENTS],
    segment_count: AtomicUsize,
    request: AtomicU8,
    total_ms: AtomicU32,
    release_ms: AtomicU32,
    value: AtomicU32,
    active: AtomicBool,
}

#[derive(Debug, Clone, Copy)]
enum Curve {
    Linear,
    Exponential { factor: f64 },
    Translate,
}

#[derive(Debug, Clone, Copy)]
struct Stage {
    start: f64,
    destination: f64,
    step: u64,
    steps: u64,
    curve: Curve,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Segment(usize),
    Release,
}

/// Outputs an envelope. Emits [`NodeEventKind::Finished`] in the period in
/// which the last segment, or the release after a stop, reaches its
/// destination.
#[derive(Debug)]
pub struct EnvelopeNode {
    shared: Arc<EnvelopeShared>,
    state: State,
    stage: Stage,
    value: f64,
    total_ms: Sample,
    samples_per_ms: Sample,
}

impl EnvelopeNode {
    /// Segments after the first [`MAX_SEGMENTS`] are ignored.
    pub fn new(segments: &[Segment]) -> Self {
        let shared = Arc::new(EnvelopeShared {
            segments: Default::default(),
            segment_count: AtomicUsize::new(0),
            request: AtomicU8::new(REQUEST_NONE),
            total_ms: AtomicU32::new(0.0_f32.to_bits()),
            release_ms: AtomicU32::new(0.0_f32.to_bits()),
            value: AtomicU32::new(0.0_f32.to_bits()),
            active: AtomicBool::new(false),
        });
        let handle = EnvelopeHandle {
            shared: shared.clone(),
        };
        handle.set_segments(segments);
        Self {
            shared,
            state: State::Idle,
            stage: Stage {
                start: 0.0,
                destination: 0.0,
                step: 0,
                steps: 0,
                curve: Curve::Linear,
            },
            value: 0.0,
            total_ms: 0.0,
            samples_per_ms: 44.1,
        }
    }

    fn begin_stage(
        &mut self,
        destination: f64,
        duration_ms: Sample,
        mode: RampMode,
        translate: bool,
    ) {
        let steps = (duration_ms.max(0.0) * self.samples_per_ms).round() as u64;
        let start = self.value;
        let curve = if translate {
            Curve::Translate
        } else if mode == RampMode::Exponential && start * destination >= 0.0 && steps > 0 {
            let sign = if start < 0.0 || destination < 0.0 {
                -1.0
            } else {
                1.0
            };
            let from = floored(start, sign);
            let to = floored(destination, sign);
            self.value = from;
            Curve::Exponential {
                factor: (to / from).powf(1.0 / steps as f64),
            }
        } else {
            Curve::Linear
        };
        self.stage = Stage {
            start,
            destination,
            step: 0,
            steps,
            curve,
        };
    }

    /// Start segment `index`, skipping over segments of zero length.
    fn enter_segment(&mut self, mut index: usize) {
        let count = self
            .shared
            .segment_count
            .load(Ordering::Acquire)
            .min(MAX_SEGMENTS);
        while index < count {
            let segment = self.shared.segments[index].load();
            let duration = if segment.duration_relative {
                segment.duration * self.total_ms
            } else {
                segment.duration
            };
            self.begin_stage(
                segment.destination as f64,
                duration,
                segment.mode,
                segment.translate,
            );
            if self.stage.steps > 0 {
                self.state = State::Segment(index);
                return;
            }
            self.value = self.stage.destination;
            index += 1;
        }
        self.state = State::Idle;
    }

    /// Returns true if the envelope finished on this sample.
    #[inline]
    fn advance(&mut self) -> bool {
        let stage = &mut self.stage;
        if matches!(self.state, State::Idle) {
            return false;
        }
        stage.step += 1;
        if stage.step < stage.steps {
            self.value = match stage.curve {
                Curve::Linear => {
                    stage.start
                        + (stage.destination - stage.start) * (stage.step as f64 / stage.steps as f64)
                }
                Curve::Exponential { factor } => self.value * factor,
                Curve::Translate => {
                    let phase = stage.step as f64 / stage.steps as f64;
                    stage.start
                        + (stage.destination - stage.start) * (0.5 - 0.5 * (PI * phase).cos())
                }
            };
            return false;
        }
        self.value = stage.destination;
        match self.state {
            State::Segment(index) => {
                self.enter_segment(index + 1);
                matches!(self.state, State::Idle)
            }
            State::Release => {
                self.state = State::Idle;
                true
            }
            State::Idle => false,
        }
    }
}

fn floored(v: f64, sign: f64) -> f64 {
    if v.abs() < EXPONENTIAL_FLOOR {
        EXPONENTIAL_FLOOR * sign
    } else {
        v
    }
}

/// Controls of an [`EnvelopeNode`].
#[derive(Debug, Clone)]
pub struct EnvelopeHandle {
    shared: Arc<EnvelopeShared>,
}

impl EnvelopeHandle {
    /// Replace the segment list. Only the first [`MAX_SEGMENTS`] are used.
    pub fn set_segments(&self, segments: &[Segment]) {
        if segments.len() > MAX_SEGMENTS {
            tracing::warn!(
                count = segments.len(),
                max = MAX_SEGMENTS,
                "Too many envelope segments, the last ones are ignored"
            );
        }
        for (cell, segment) in self.shared.segments.iter().zip(segments) {
            cell.store(*segment);
        }
        self.shared
            .segment_count
            .store(segments.len().min(MAX_SEGMENTS), Ordering::Release);
    }
    /// Change one segment. Returns false if `index` is outside the segment list.
    pub fn set_segment(&self, index: usize, segment: Segment) -> bool {
        if index >= self.segment_count() {
            return false;
        }
        self.shared.segments[index].store(segment);
        true
    }
    #[allow(missing_docs)]
    pub fn segment(&self, index: usize) -> Option<Segment> {
        (index < self.segment_count()).then(|| self.shared.segments[index].load())
    }
    #[allow(missing_docs)]
    pub fn segment_count(&self) -> usize {
        self.shared.segment_count.load(Ordering::Acquire)
    }
    /// Start from the first segment at the start of the next period,
    /// continuing from the current value. Relative segment durations are
    /// fractions of `total_ms`. Replaces a stop requested in the same period.
    pub fn trigger(&self, total_ms: Sample) {
        self.shared
            .total_ms
            .store(total_ms.to_bits(), Ordering::Relaxed);
        self.shared.request.store(REQUEST_TRIGGER, Ordering::Release);
    }
    /// Ramp to zero over `release_ms`, interrupting any segment. Replaces a
    /// trigger requested in the same period.
    pub fn stop(&self, release_ms: Sample) {
        self.shared
            .release_ms
            .store(release_ms.to_bits(), Ordering::Relaxed);
        self.shared.request.store(REQUEST_STOP, Ordering::Release);
    }
    /// The most recent output value.
    pub fn value(&self) -> Sample {
        Sample::from_bits(self.shared.value.load(Ordering::Relaxed))
    }
    /// True from the period the envelope was triggered until it finishes.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Relaxed)
    }
}

impl Node for EnvelopeNode {
    type Controls = EnvelopeHandle;

    fn controls(&self) -> Self::Controls {
        EnvelopeHandle {
            shared: self.shared.clone(),
        }
    }
    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let mut finished = false;
        match self.shared.request.swap(REQUEST_NONE, Ordering::Acquire) {
            REQUEST_TRIGGER => {
                self.total_ms = Sample::from_bits(self.shared.total_ms.load(Ordering::Relaxed));
                self.enter_segment(0);
                // Every segment had zero length
                finished = matches!(self.state, State::Idle);
            }
            REQUEST_STOP => {
                let release_ms = Sample::from_bits(self.shared.release_ms.load(Ordering::Relaxed));
                self.begin_stage(0.0, release_ms, RampMode::Linear, false);
                if self.stage.steps == 0 {
                    self.value = 0.0;
                    self.state = State::Idle;
                    finished = true;
                } else {
                    self.state = State::Release;
                }
            }
            _ => (),
        }
        for out in ctx.output(0) {
            finished |= self.advance();
            *out = self.value as Sample;
        }
        self.shared
            .value
            .store((self.value as Sample).to_bits(), Ordering::Relaxed);
        self.shared
            .active
            .store(!matches!(self.state, State::Idle), Ordering::Relaxed);
        if finished {
            ctx.emit(NodeEventKind::Finished);
        }
    }
    fn num_inputs(&self) -> usize {
        0
    }
    fn num_outputs(&self) -> usize {
        1
    }
    fn output_desc(&self, _output: usize) -> &'static str {
        "envelope"
    }
    fn name(&self) -> &'static str {
        "EnvelopeNode"
    }
    fn sample_rate_changed(&mut self, sample_rate: Sample) {
        self.samples_per_ms = sample_rate / 1000.0;
    }
}
