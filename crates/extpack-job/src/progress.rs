use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Snapshot of a job's completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// Completed fraction in `[0, 1]`.
    pub offset: f64,
    pub percent: u32,
}

impl Progress {
    fn from_offset(offset: f64) -> Self {
        Self {
            offset,
            percent: percent_of(offset),
        }
    }
}

/// Receives every published progress change.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, job: &str, progress: Progress) -> anyhow::Result<()>;
}

/// Read side of a tracker; safe to poll from any thread.
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    bits: Arc<AtomicU64>,
}

impl ProgressHandle {
    pub fn offset(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn percent(&self) -> u32 {
        percent_of(self.offset())
    }

    pub fn snapshot(&self) -> Progress {
        Progress::from_offset(self.offset())
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    total: usize,
    done: usize,
    base: f64,
    weight: f64,
}

impl Frame {
    fn value(&self) -> f64 {
        if self.total == 0 {
            return self.base;
        }
        self.base + (self.done as f64 / self.total as f64) * self.weight
    }
}

/// Turns nested push/step/pop events into one monotonic fraction.
///
/// Each level splits one step of its parent into `n` equal steps. Only the
/// thread driving the job mutates the tracker; readers go through a
/// [`ProgressHandle`].
pub struct ProgressTracker {
    job: String,
    frames: Vec<Frame>,
    handle: ProgressHandle,
    observers: Vec<Arc<dyn ProgressObserver>>,
}

impl ProgressTracker {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            frames: Vec::new(),
            handle: ProgressHandle::default(),
            observers: Vec::new(),
        }
    }

    pub fn with_handle(mut self, handle: ProgressHandle) -> Self {
        self.handle = handle;
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn handle(&self) -> ProgressHandle {
        self.handle.clone()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_level(&mut self, steps: usize) {
        let (base, weight) = match self.frames.last() {
            Some(parent) => {
                let share = if parent.total == 0 {
                    0.0
                } else {
                    parent.weight / parent.total as f64
                };
                (parent.value(), share)
            }
            None => (self.offset(), 1.0 - self.offset()),
        };
        self.frames.push(Frame {
            total: steps,
            done: 0,
            base,
            weight,
        });
    }

    pub fn step(&mut self) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        frame.done = (frame.done + 1).min(frame.total);
        let value = frame.value();
        self.publish(value);
    }

    /// Closes the current level; the parent advances by one step. Closing
    /// the outermost level completes the tracker.
    pub fn pop_level(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if self.frames.is_empty() {
            self.publish(frame.base + frame.weight);
        } else {
            self.step();
        }
    }

    pub fn offset(&self) -> f64 {
        self.handle.offset()
    }

    pub fn percent(&self) -> u32 {
        self.handle.percent()
    }

    fn publish(&mut self, value: f64) {
        let current = self.offset();
        let value = value.min(1.0);
        if value <= current + f64::EPSILON {
            return;
        }
        self.handle.bits.store(value.to_bits(), Ordering::Release);

        let progress = Progress::from_offset(value);
        for observer in &self.observers {
            if let Err(err) = observer.on_progress(&self.job, progress) {
                tracing::warn!(job = %self.job, error = %format!("{err:#}"), "progress observer failed");
            }
        }
    }
}

fn percent_of(offset: f64) -> u32 {
    (offset * 100.0 + 1e-9).floor().clamp(0.0, 100.0) as u32
}
