//! Timeline semaphores and the three-queue pipeline timeline.
//!
//! The executor drives three *logical* GPU queues — graphics, compute, copy —
//! purely in terms of monotonic 64-bit values on three independent timelines
//!. There is no CPU blocking during compile; values are allocated and
//! recorded into a wait/signal matrix, and only the executor ever waits.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// One of the three logical queues the compiler schedules onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueKind {
    Graphics,
    Compute,
    Copy,
}

impl QueueKind {
    pub const ALL: [QueueKind; 3] = [QueueKind::Graphics, QueueKind::Compute, QueueKind::Copy];
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueKind::Graphics => "graphics",
            QueueKind::Compute => "compute",
            QueueKind::Copy => "copy",
        };
        f.write_str(name)
    }
}

/// A single timeline semaphore: a monotonic counter the executor signals and
/// waits on.
pub struct TimelineSemaphore {
    value: AtomicU64,
}

impl TimelineSemaphore {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Current signaled value.
    pub fn current_value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Signal the timeline forward to `value`. No-op if `value` is not past
    /// the current one (signals only ever move forward).
    pub fn signal(&self, value: u64) {
        self.value.fetch_max(value, Ordering::AcqRel);
    }

    /// Whether the timeline has reached at least `target`.
    pub fn is_reached(&self, target: u64) -> bool {
        self.current_value() >= target
    }

    /// Busy-wait until the timeline reaches `target`. The compiler itself
    /// never calls this — only the executor, at its one suspension point.
    pub fn wait(&self, target: u64) {
        if self.is_reached(target) {
            return;
        }
        log::debug!("timeline semaphore spinning for value {target}");
        while !self.is_reached(target) {
            core::hint::spin_loop();
        }
    }
}

impl Default for TimelineSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic fence-value counter for one queue's timeline.
///
/// Kept separate from [`TimelineSemaphore`]'s signaled value so the compiler
/// can *allocate* a fence value during Phase 5/6 before the executor actually
/// signals it.
#[derive(Default)]
struct FenceCounter {
    next: AtomicU64,
}

impl FenceCounter {
    fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

/// The three-queue pipeline timeline: one [`TimelineSemaphore`] and one
/// monotonic fence counter per logical queue.
pub struct PipelineTimeline {
    graphics: TimelineSemaphore,
    compute: TimelineSemaphore,
    copy: TimelineSemaphore,
    graphics_counter: FenceCounter,
    compute_counter: FenceCounter,
    copy_counter: FenceCounter,
}

impl PipelineTimeline {
    pub fn new() -> Self {
        Self {
            graphics: TimelineSemaphore::new(),
            compute: TimelineSemaphore::new(),
            copy: TimelineSemaphore::new(),
            graphics_counter: FenceCounter::default(),
            compute_counter: FenceCounter::default(),
            copy_counter: FenceCounter::default(),
        }
    }

    fn semaphore(&self, queue: QueueKind) -> &TimelineSemaphore {
        match queue {
            QueueKind::Graphics => &self.graphics,
            QueueKind::Compute => &self.compute,
            QueueKind::Copy => &self.copy,
        }
    }

    fn counter(&self, queue: QueueKind) -> &FenceCounter {
        match queue {
            QueueKind::Graphics => &self.graphics_counter,
            QueueKind::Compute => &self.compute_counter,
            QueueKind::Copy => &self.copy_counter,
        }
    }

    /// Allocate the next fence value for `queue` without signaling it yet.
    /// This is what the compiler calls at signal-emission time (Phase 5/6);
    /// the executor later calls [`Self::signal`] with the same value once the
    /// work has actually completed.
    pub fn allocate_fence_value(&self, queue: QueueKind) -> u64 {
        self.counter(queue).allocate()
    }

    /// The next fence value that *would* be allocated, without consuming it.
    pub fn peek_next_fence_value(&self, queue: QueueKind) -> u64 {
        self.counter(queue).peek() + 1
    }

    /// Signal `queue`'s timeline to `value` (executor-side).
    pub fn signal(&self, queue: QueueKind, value: u64) {
        self.semaphore(queue).signal(value);
    }

    /// Block until `queue`'s timeline reaches `value` (executor-side only).
    pub fn wait(&self, queue: QueueKind, value: u64) {
        self.semaphore(queue).wait(value);
    }

    /// Current signaled value for `queue`.
    pub fn current_value(&self, queue: QueueKind) -> u64 {
        self.semaphore(queue).current_value()
    }
}

impl Default for PipelineTimeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_values_are_monotonic_per_queue() {
        let timeline = PipelineTimeline::new();
        let a = timeline.allocate_fence_value(QueueKind::Graphics);
        let b = timeline.allocate_fence_value(QueueKind::Graphics);
        assert!(b > a);
        let c = timeline.allocate_fence_value(QueueKind::Compute);
        assert_eq!(c, 1); // independent counter per queue
    }

    #[test]
    fn signal_then_wait_reaches_target() {
        let timeline = PipelineTimeline::new();
        let v = timeline.allocate_fence_value(QueueKind::Copy);
        timeline.signal(QueueKind::Copy, v);
        timeline.wait(QueueKind::Copy, v);
        assert!(timeline.current_value(QueueKind::Copy) >= v);
    }

    #[test]
    fn signal_never_moves_backward() {
        let sem = TimelineSemaphore::new();
        sem.signal(5);
        sem.signal(2);
        assert_eq!(sem.current_value(), 5);
    }
}
