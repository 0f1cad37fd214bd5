//! Click free parameter changes.
//!
//! A [`RampedValue`] is owned by the node that reads it on the audio thread,
//! one value per sample through [`RampedValue::next_value`]. Any number of
//! [`RampHandle`]s can be handed to control threads. A ramp request is a
//! (destination, step count, mode) triple published through a sequence lock
//! and a [`DirtyFlag`]; the audio thread adopts it at the top of the next
//! `next_value` call, starting from whatever value it is currently at. The
//! audio thread never waits: if it observes a request mid-write it keeps the
//! flag dirty and tries again on the next sample.
//!
//! ```
//! use tonverk::ramped_value::{RampMode, RampedValue};
//! let mut gain = RampedValue::new(0.0_f32);
//! let handle = gain.handle();
//! handle.ramp(1.0, 4, RampMode::Linear);
//! let values: Vec<f32> = (0..4).map(|_| gain.next_value()).collect();
//! assert_eq!(values, vec![0.25, 0.5, 0.75, 1.0]);
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use num_traits::{AsPrimitive, Float};

use crate::dirty_flag::DirtyFlag;
use crate::sync::{fence, spin_hint, AtomicU32, AtomicU64, AtomicU8, Ordering};

/// -140 dB. Exponential ramps to or from exactly zero use this instead.
pub const EXPONENTIAL_FLOOR: f64 = 1.0e-7;

const REQUEST_LINEAR: u8 = 0;
const REQUEST_EXPONENTIAL: u8 = 1;
const REQUEST_STOP: u8 = 2;

/// How a ramp moves between its start and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-derive", derive(serde::Serialize, serde::Deserialize))]
pub enum RampMode {
    /// Constant increment per sample
    #[default]
    Linear,
    /// Constant factor per sample. Zero endpoints are replaced by
    /// [`EXPONENTIAL_FLOOR`] while ramping. Falls back to linear when the
    /// endpoints have different signs.
    Exponential,
}

/// A value type that can be ramped. Implemented for `f32` and `f64`.
pub trait RampValue: Float + AsPrimitive<f64> + Send + Sync + 'static {}
impl<T> RampValue for T
where
    T: Float + AsPrimitive<f64> + Send + Sync + 'static,
    f64: AsPrimitive<T>,
{
}

/// State shared between a [`RampedValue`] and its [`RampHandle`]s.
#[derive(Debug)]
struct PendingRamp {
    seq: AtomicU32,
    destination: AtomicU64,
    steps: AtomicU64,
    mode: AtomicU8,
    dirty: DirtyFlag,
    /// The last value produced on the audio thread, as f64 bits
    value: AtomicU64,
    reached: DirtyFlag,
}

impl PendingRamp {
    fn new(initial: f64) -> Self {
        Self {
            seq: AtomicU32::new(0),
            destination: AtomicU64::new(initial.to_bits()),
            steps: AtomicU64::new(0),
            mode: AtomicU8::new(REQUEST_LINEAR),
            dirty: DirtyFlag::new(),
            value: AtomicU64::new(initial.to_bits()),
            reached: DirtyFlag::new(),
        }
    }

    /// Writers exclude each other by moving the sequence number to an odd value.
    fn publish(&self, destination: f64, steps: u64, mode: u8) {
        let mut seq = self.seq.load(Ordering::Relaxed);
        loop {
            if seq & 1 == 1 {
                spin_hint();
                seq = self.seq.load(Ordering::Relaxed);
                continue;
            }
            match self.seq.compare_exchange_weak(
                seq,
                seq.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => seq = current,
            }
        }
        fence(Ordering::Release);
        self.destination
            .store(destination.to_bits(), Ordering::Relaxed);
        self.steps.store(steps, Ordering::Relaxed);
        self.mode.store(mode, Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(2), Ordering::Release);
        self.dirty.set();
    }

    /// Returns None if a writer was active during the read.
    fn read(&self) -> Option<(f64, u64, u8)> {
        let before = self.seq.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }
        let destination = f64::from_bits(self.destination.load(Ordering::Relaxed));
        let steps = self.steps.load(Ordering::Relaxed);
        let mode = self.mode.load(Ordering::Relaxed);
        fence(Ordering::Acquire);
        let after = self.seq.load(Ordering::Relaxed);
        (before == after).then_some((destination, steps, mode))
    }
}

/// Audio thread side of a ramped parameter. See the [module level docs](self).
#[derive(Debug)]
pub struct RampedValue<T: RampValue = f32> {
    value: f64,
    start: f64,
    destination: f64,
    increment: f64,
    factor: f64,
    step: u64,
    step_count: u64,
    mode: RampMode,
    just_reached: bool,
    shared: Arc<PendingRamp>,
    _value_type: PhantomData<T>,
}

impl<T: RampValue> RampedValue<T>
where
    f64: AsPrimitive<T>,
{
    /// A value resting at `initial`.
    pub fn new(initial: T) -> Self {
        let initial: f64 = initial.as_();
        Self {
            value: initial,
            start: initial,
            destination: initial,
            increment: 0.0,
            factor: 1.0,
            step: 0,
            step_count: 0,
            mode: RampMode::Linear,
            just_reached: false,
            shared: Arc::new(PendingRamp::new(initial)),
            _value_type: PhantomData,
        }
    }

    /// A handle that can request ramps from any thread.
    pub fn handle(&self) -> RampHandle<T> {
        RampHandle {
            shared: self.shared.clone(),
            _value_type: PhantomData,
        }
    }

    /// Request a ramp. Same as [`RampHandle::ramp`].
    pub fn ramp(&self, destination: T, steps: u64, mode: RampMode) {
        self.handle().ramp(destination, steps, mode);
    }

    /// Request a hold at whatever value the ramp has when the request is adopted.
    pub fn stop(&self) {
        self.shared.publish(0.0, 0, REQUEST_STOP);
    }

    /// Produce the value for the next sample. Audio thread only.
    #[inline]
    pub fn next_value(&mut self) -> T {
        if self.shared.dirty.check() {
            self.adopt_pending();
        }
        if self.step < self.step_count {
            self.step += 1;
            if self.step == self.step_count {
                self.value = self.destination;
                self.finish();
            } else {
                self.value = match self.mode {
                    RampMode::Linear => self.start + self.increment * self.step as f64,
                    RampMode::Exponential => self.value * self.factor,
                };
            }
            self.shared
                .value
                .store(self.value.to_bits(), Ordering::Relaxed);
        }
        self.value.as_()
    }

    /// The value returned by the last call to `next_value`.
    pub fn value(&self) -> T {
        self.value.as_()
    }

    /// The destination of the ramp currently being played, or the resting value.
    pub fn destination(&self) -> T {
        self.destination.as_()
    }

    /// True while a ramp is in progress or a request is waiting to be adopted.
    pub fn is_ramping(&self) -> bool {
        self.step < self.step_count || self.shared.dirty.is_dirty()
    }

    /// Returns true once after the destination was reached. Audio thread
    /// side of the "destination reached" notification.
    pub fn take_destination_reached(&mut self) -> bool {
        std::mem::take(&mut self.just_reached)
    }

    fn finish(&mut self) {
        self.just_reached = true;
        self.shared.reached.set();
    }

    fn adopt_pending(&mut self) {
        let Some((destination, steps, request)) = self.shared.read() else {
            // Torn read, the writer sets the flag again but we can't rely on having seen that.
            self.shared.dirty.set();
            return;
        };
        let (destination, steps) = if request == REQUEST_STOP {
            (self.value, 0)
        } else {
            (destination, steps)
        };
        self.start = self.value;
        self.destination = destination;
        self.step = 0;
        self.step_count = steps;
        self.mode = RampMode::Linear;
        if steps == 0 {
            self.value = destination;
            self.shared
                .value
                .store(self.value.to_bits(), Ordering::Relaxed);
            self.finish();
            return;
        }
        let exponential_possible = self.start * destination >= 0.0;
        if request == REQUEST_EXPONENTIAL && exponential_possible {
            let sign = if self.start < 0.0 || destination < 0.0 {
                -1.0
            } else {
                1.0
            };
            let from = floored(self.start, sign);
            let to = floored(destination, sign);
            self.value = from;
            self.factor = (to / from).powf(1.0 / steps as f64);
            self.mode = RampMode::Exponential;
        } else {
            self.increment = (destination - self.start) / steps as f64;
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

/// Control side of a [`RampedValue`]. Cheap to clone, safe to use from any thread.
#[derive(Debug)]
pub struct RampHandle<T: RampValue = f32> {
    shared: Arc<PendingRamp>,
    _value_type: PhantomData<T>,
}

impl<T: RampValue> Clone for RampHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _value_type: PhantomData,
        }
    }
}

impl<T: RampValue> RampHandle<T>
where
    f64: AsPrimitive<T>,
{
    /// Ramp to `destination` over `steps` samples. Zero steps jumps on the next sample.
    pub fn ramp(&self, destination: T, steps: u64, mode: RampMode) {
        let request = match mode {
            RampMode::Linear => REQUEST_LINEAR,
            RampMode::Exponential => REQUEST_EXPONENTIAL,
        };
        self.shared.publish(destination.as_(), steps, request);
    }
    /// Jump to `value` on the next sample.
    pub fn set(&self, value: T) {
        self.ramp(value, 0, RampMode::Linear);
    }
    /// Hold at the current value.
    pub fn stop(&self) {
        self.shared.publish(0.0, 0, REQUEST_STOP);
    }
    /// The most recent value produced on the audio thread.
    pub fn value(&self) -> T {
        f64::from_bits(self.shared.value.load(Ordering::Relaxed)).as_()
    }
    /// Returns true once for every time a destination was reached since the last call.
    pub fn destination_reached(&self) -> bool {
        self.shared.reached.check()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn zero_steps_reaches_destination_on_first_sample() {
        for start in [-1.0_f32, 0.0, 0.3, 100.0] {
            for dest in [0.0_f32, 1.0, -2.5] {
                for mode in [RampMode::Linear, RampMode::Exponential] {
                    let mut v = RampedValue::new(start);
                    v.ramp(dest, 0, mode);
                    assert_eq!(v.next_value(), dest);
                    assert!(v.take_destination_reached());
                    assert_eq!(v.next_value(), dest);
                }
            }
        }
    }

    #[test]
    fn linear_ramp_is_arithmetic() {
        let mut v = RampedValue::new(1.0_f64);
        v.ramp(3.0, 8, RampMode::Linear);
        let values: Vec<f64> = (0..8).map(|_| v.next_value()).collect();
        for (i, value) in values.iter().enumerate() {
            let expected = 1.0 + 0.25 * (i + 1) as f64;
            assert!((value - expected).abs() < 1e-12, "{value} != {expected}");
        }
        assert_eq!(values[7], 3.0);
        assert!(!v.is_ramping());
    }

    #[test]
    fn retarget_starts_from_current_value() {
        let mut v = RampedValue::new(0.0_f32);
        v.ramp(1.0, 10, RampMode::Linear);
        for _ in 0..5 {
            v.next_value();
        }
        assert!((v.value() - 0.5).abs() < 1e-6);
        // Halfway there, go back to 0 over 5 samples
        v.ramp(0.0, 5, RampMode::Linear);
        let first = v.next_value();
        assert!((first - 0.4).abs() < 1e-6);
        for _ in 0..4 {
            v.next_value();
        }
        assert_eq!(v.value(), 0.0);
    }

    #[test]
    fn exponential_to_and_from_zero() {
        let mut v = RampedValue::new(0.0_f32);
        v.ramp(1.0, 100, RampMode::Exponential);
        let mut last = 0.0;
        for _ in 0..100 {
            let value = v.next_value();
            assert!(value.is_finite());
            assert!(value >= last);
            last = value;
        }
        assert_eq!(last, 1.0);
        v.ramp(0.0, 100, RampMode::Exponential);
        for _ in 0..100 {
            last = v.next_value();
            assert!(last.is_finite());
        }
        assert_eq!(last, 0.0);
    }

    #[test]
    fn stop_holds() {
        let mut v = RampedValue::new(0.0_f32);
        v.ramp(1.0, 4, RampMode::Linear);
        v.next_value();
        v.next_value();
        v.stop();
        let held = v.next_value();
        assert_eq!(held, 0.5);
        assert_eq!(v.next_value(), 0.5);
        assert_eq!(v.destination(), 0.5);
    }

    #[test]
    fn handle_reports_destination_reached() {
        let mut v = RampedValue::new(0.0_f32);
        let handle = v.handle();
        let control = std::thread::spawn(move || handle.ramp(2.0, 3, RampMode::Linear));
        control.join().unwrap();
        let handle = v.handle();
        assert!(!handle.destination_reached());
        for _ in 0..3 {
            v.next_value();
        }
        assert_eq!(handle.value(), 2.0);
        assert!(handle.destination_reached());
        assert!(!handle.destination_reached());
    }
}
