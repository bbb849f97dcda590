//! Tone queue
//!
//! Bounded FIFO of [`Tone`]s between the enqueue API (producers) and the
//! generator's dequeue-and-render worker (the single consumer).
//!
//! Features:
//! - Fixed-capacity circular buffer with head/tail/len bookkeeping
//! - Producer/consumer synchronization via parking_lot primitives
//! - "Forever" tones: a flagged sole-occupant tone is handed out again
//!   and again without being removed until a newer tone arrives
//! - Low-watermark callback, invoked outside the queue mutex
//! - Backspace support: drop everything back to the most recent
//!   first-of-character tone

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::constants::{FREQUENCY_MAX, TONE_QUEUE_CAPACITY};
use crate::{CwError, Result};

/// Envelope slopes applied when a tone is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlopeMode {
    /// No shaping at either edge.
    NoSlopes,
    /// Shape only the leading edge.
    RisingOnly,
    /// Shape only the trailing edge.
    FallingOnly,
    /// Shape both edges.
    #[default]
    Standard,
}

/// The atomic unit flowing through the queue: one tone or one silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    /// Tone frequency in Hz; 0 renders silence.
    pub frequency: u32,
    /// Duration in microseconds. A zero-duration tone is legal; it is
    /// queued normally and renders no samples.
    pub duration: u32,
    /// Envelope slopes to apply at the tone's edges.
    pub slope_mode: SlopeMode,
    /// A forever tone is re-issued by `dequeue` for as long as it is the
    /// queue's sole occupant.
    pub is_forever: bool,
    /// Marks the first tone of an enqueued character, so a buffered
    /// character can be removed again before it plays.
    pub is_first: bool,
}

impl Tone {
    /// Create a standard-slope tone.
    pub fn new(frequency: u32, duration: u32) -> Self {
        Tone {
            frequency,
            duration,
            slope_mode: SlopeMode::Standard,
            is_forever: false,
            is_first: false,
        }
    }

    /// Create a silence of the given duration.
    pub fn silence(duration: u32) -> Self {
        Tone {
            frequency: 0,
            duration,
            slope_mode: SlopeMode::NoSlopes,
            is_forever: false,
            is_first: false,
        }
    }

    /// True when the tone renders as silence.
    pub fn is_silence(&self) -> bool {
        self.frequency == 0
    }
}

impl Default for Tone {
    fn default() -> Self {
        Tone::silence(0)
    }
}

/// Queue fill state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Empty,
    NonEmpty,
}

struct Inner {
    queue: Vec<Tone>,
    head: usize,
    tail: usize,
    len: usize,
    capacity: usize,
    high_water_mark: usize,
    low_water_mark: Option<usize>,
    state: QueueState,
    /// True from a tone's dequeue until the consumer reports it
    /// completed; lets waiters see the tone still being rendered.
    rendering: bool,
}

impl Inner {
    /// Pop the head tone, honoring forever-tone semantics. Returns the
    /// tone and whether the low watermark was crossed from above.
    fn pop(&mut self) -> (Tone, bool) {
        debug_assert!(self.len > 0);
        self.rendering = true;
        let tone = self.queue[self.head];
        if tone.is_forever && self.len == 1 {
            // Sole forever occupant: hand out a copy, keep the tone.
            return (tone, false);
        }
        self.head = (self.head + 1) % self.capacity;
        self.len -= 1;
        if self.len == 0 {
            self.state = QueueState::Empty;
        }
        let crossed = self.low_water_mark == Some(self.len);
        (tone, crossed)
    }
}

/// Callback fired when the queue level drops to the low watermark.
pub type LowWaterCallback = Box<dyn FnMut() + Send>;

/// Bounded tone FIFO with producer/consumer synchronization.
///
/// One mutex protects the indices; the two condvars carry "level
/// changed" broadcasts (dequeue, flush, tone completion) and the
/// empty-to-nonempty transition the consumer sleeps on. All waits
/// recheck their predicate in a loop, so spurious wakeups are harmless.
pub(crate) struct ToneQueue {
    inner: Mutex<Inner>,
    level_changed: Condvar,
    nonempty: Condvar,
    low_water_callback: Mutex<Option<LowWaterCallback>>,
}

impl ToneQueue {
    /// Create a queue with the given capacity (clamped to the library
    /// maximum).
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, TONE_QUEUE_CAPACITY);
        ToneQueue {
            inner: Mutex::new(Inner {
                queue: vec![Tone::default(); capacity],
                head: 0,
                tail: 0,
                len: 0,
                capacity,
                high_water_mark: 0,
                low_water_mark: None,
                state: QueueState::Empty,
                rendering: false,
            }),
            level_changed: Condvar::new(),
            nonempty: Condvar::new(),
            low_water_callback: Mutex::new(None),
        }
    }

    /// Append a tone at the tail.
    ///
    /// Fails with [`CwError::Invalid`] for an out-of-range frequency and
    /// with [`CwError::Full`] when the queue is at capacity. Wakes the
    /// consumer on the empty-to-nonempty transition.
    pub(crate) fn enqueue(&self, tone: Tone) -> Result<()> {
        if tone.frequency > FREQUENCY_MAX {
            return Err(CwError::Invalid("tone frequency"));
        }
        let mut inner = self.inner.lock();
        if inner.len == inner.capacity {
            return Err(CwError::Full);
        }
        let tail = inner.tail;
        inner.queue[tail] = tone;
        inner.tail = (tail + 1) % inner.capacity;
        inner.len += 1;
        if inner.len > inner.high_water_mark {
            inner.high_water_mark = inner.len;
        }
        if inner.state == QueueState::Empty {
            inner.state = QueueState::NonEmpty;
            self.nonempty.notify_all();
        }
        Ok(())
    }

    /// Remove and return the head tone, or `None` when empty.
    ///
    /// A forever tone that is the sole occupant is returned without
    /// being removed. The low-watermark callback, if one is registered
    /// and the level just dropped to the mark, runs after the queue
    /// mutex is released so it may re-enter the queue.
    pub(crate) fn dequeue(&self) -> Option<Tone> {
        let (tone, crossed) = {
            let mut inner = self.inner.lock();
            if inner.len == 0 {
                return None;
            }
            inner.pop()
        };
        self.level_changed.notify_all();
        if crossed {
            self.run_low_water_callback();
        }
        Some(tone)
    }

    /// Like [`dequeue`](Self::dequeue), but blocks while the queue is
    /// empty and `running` stays true. Returns `None` once `running` is
    /// cleared (use [`wake_consumer`](Self::wake_consumer) after
    /// clearing it).
    pub(crate) fn dequeue_blocking(&self, running: &AtomicBool) -> Option<Tone> {
        let (tone, crossed) = {
            let mut inner = self.inner.lock();
            while inner.len == 0 && running.load(Ordering::SeqCst) {
                self.nonempty.wait(&mut inner);
            }
            if inner.len == 0 {
                return None;
            }
            inner.pop()
        };
        self.level_changed.notify_all();
        if crossed {
            self.run_low_water_callback();
        }
        Some(tone)
    }

    /// Wake a consumer blocked in [`dequeue_blocking`](Self::dequeue_blocking).
    pub(crate) fn wake_consumer(&self) {
        let _inner = self.inner.lock();
        self.nonempty.notify_all();
    }

    /// Report that the last sample of the dequeued tone has been
    /// written. The generator worker calls this after every tone; it
    /// also covers worker exit, so no waiter is left hanging.
    pub(crate) fn tone_completed(&self) {
        let mut inner = self.inner.lock();
        inner.rendering = false;
        self.level_changed.notify_all();
    }

    /// Block until the queue holds at most `level` tones.
    pub(crate) fn wait_for_level(&self, level: usize) {
        let mut inner = self.inner.lock();
        while inner.len > level {
            self.level_changed.wait(&mut inner);
        }
    }

    /// Block until the tone currently being rendered has finished.
    /// Returns immediately when nothing is being rendered.
    pub(crate) fn wait_for_end_of_current_tone(&self) {
        let mut inner = self.inner.lock();
        while inner.rendering {
            self.level_changed.wait(&mut inner);
        }
    }

    /// Atomically drop every queued tone.
    pub(crate) fn flush(&self) {
        let mut inner = self.inner.lock();
        inner.head = inner.tail;
        inner.len = 0;
        inner.state = QueueState::Empty;
        self.level_changed.notify_all();
    }

    /// Truncate the queue to just before the most recent tone flagged
    /// first-of-character, dropping that whole buffered character.
    ///
    /// Fails with [`CwError::NotFound`] when no such tone is queued.
    pub(crate) fn remove_last_character(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut remaining = inner.len;
        let mut idx = inner.tail;
        while remaining > 0 {
            idx = (idx + inner.capacity - 1) % inner.capacity;
            remaining -= 1;
            if inner.queue[idx].is_first {
                inner.tail = idx;
                inner.len = remaining;
                if inner.len == 0 {
                    inner.state = QueueState::Empty;
                }
                self.level_changed.notify_all();
                return Ok(());
            }
        }
        Err(CwError::NotFound)
    }

    /// Register (or clear) the low-watermark callback and its level.
    ///
    /// The callback fires each time a dequeue drops the length from
    /// above the mark to exactly the mark. It never fires while a
    /// forever tone is the queue's sole occupant.
    pub(crate) fn set_low_water_callback(
        &self,
        callback: Option<LowWaterCallback>,
        level: usize,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if level >= inner.capacity {
                return Err(CwError::Invalid("low watermark level"));
            }
            inner.low_water_mark = callback.as_ref().map(|_| level);
        }
        *self.low_water_callback.lock() = callback;
        Ok(())
    }

    fn run_low_water_callback(&self) {
        if let Some(callback) = self.low_water_callback.lock().as_mut() {
            callback();
        }
    }

    /// Current number of queued tones.
    pub(crate) fn length(&self) -> usize {
        self.inner.lock().len
    }

    /// Queue capacity.
    pub(crate) fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Highest fill level seen so far.
    pub(crate) fn high_water_mark(&self) -> usize {
        self.inner.lock().high_water_mark
    }

    /// True when no further tone can be enqueued.
    pub(crate) fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.len == inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let tq = ToneQueue::new(16);
        for freq in [100, 200, 300] {
            tq.enqueue(Tone::new(freq, 1_000)).unwrap();
        }
        assert_eq!(tq.length(), 3);
        assert_eq!(tq.dequeue().unwrap().frequency, 100);
        assert_eq!(tq.dequeue().unwrap().frequency, 200);
        assert_eq!(tq.dequeue().unwrap().frequency, 300);
        assert!(tq.dequeue().is_none());
    }

    #[test]
    fn test_capacity_clamp_and_full() {
        let tq = ToneQueue::new(4);
        for _ in 0..4 {
            tq.enqueue(Tone::new(800, 1_000)).unwrap();
        }
        assert!(tq.is_full());
        assert_eq!(tq.enqueue(Tone::new(800, 1_000)), Err(CwError::Full));
        assert_eq!(tq.length(), 4);
        assert!(ToneQueue::new(100_000).capacity() <= TONE_QUEUE_CAPACITY);
    }

    #[test]
    fn test_invalid_frequency_rejected() {
        let tq = ToneQueue::new(4);
        assert_eq!(
            tq.enqueue(Tone::new(FREQUENCY_MAX + 1, 1_000)),
            Err(CwError::Invalid("tone frequency"))
        );
        assert_eq!(tq.length(), 0);
    }

    #[test]
    fn test_zero_duration_accepted() {
        let tq = ToneQueue::new(4);
        tq.enqueue(Tone::new(800, 0)).unwrap();
        assert_eq!(tq.length(), 1);
        assert_eq!(tq.dequeue().unwrap().duration, 0);
    }

    #[test]
    fn test_forever_tone_is_reissued() {
        let tq = ToneQueue::new(4);
        let mut forever = Tone::new(700, 1_000);
        forever.is_forever = true;
        tq.enqueue(forever).unwrap();

        // The sole forever occupant is returned without being removed.
        for _ in 0..5 {
            let tone = tq.dequeue().unwrap();
            assert_eq!(tone.frequency, 700);
            assert_eq!(tq.length(), 1);
        }

        // A newer tone turns the forever head into a normal tone.
        tq.enqueue(Tone::silence(2_000)).unwrap();
        assert_eq!(tq.dequeue().unwrap().frequency, 700);
        assert_eq!(tq.length(), 1);
        assert!(tq.dequeue().unwrap().is_silence());
        assert!(tq.dequeue().is_none());
    }

    #[test]
    fn test_low_water_callback_fires_exactly_once() {
        let tq = ToneQueue::new(16);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_callback = Arc::clone(&fired);
        tq.set_low_water_callback(
            Some(Box::new(move || {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            })),
            3,
        )
        .unwrap();

        for _ in 0..10 {
            tq.enqueue(Tone::new(800, 1_000)).unwrap();
        }
        for _ in 0..10 {
            tq.dequeue();
        }
        // Fires on the 4 -> 3 transition only.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_low_water_level_must_fit() {
        let tq = ToneQueue::new(8);
        assert!(tq
            .set_low_water_callback(Some(Box::new(|| {})), 8)
            .is_err());
    }

    #[test]
    fn test_flush() {
        let tq = ToneQueue::new(8);
        for _ in 0..5 {
            tq.enqueue(Tone::new(800, 1_000)).unwrap();
        }
        tq.flush();
        assert_eq!(tq.length(), 0);
        assert!(tq.dequeue().is_none());
        // The queue stays usable after a flush.
        tq.enqueue(Tone::new(800, 1_000)).unwrap();
        assert_eq!(tq.length(), 1);
    }

    #[test]
    fn test_remove_last_character() {
        let tq = ToneQueue::new(16);
        let mut first = Tone::new(800, 1_000);
        first.is_first = true;

        // Two buffered characters, three tones each.
        tq.enqueue(first).unwrap();
        tq.enqueue(Tone::new(800, 1_000)).unwrap();
        tq.enqueue(Tone::silence(1_000)).unwrap();
        tq.enqueue(first).unwrap();
        tq.enqueue(Tone::new(800, 1_000)).unwrap();
        tq.enqueue(Tone::silence(1_000)).unwrap();

        tq.remove_last_character().unwrap();
        assert_eq!(tq.length(), 3);
        tq.remove_last_character().unwrap();
        assert_eq!(tq.length(), 0);
        assert_eq!(tq.remove_last_character(), Err(CwError::NotFound));
    }

    #[test]
    fn test_wait_for_end_of_current_tone() {
        let tq = Arc::new(ToneQueue::new(8));
        // Nothing rendering: returns immediately.
        tq.wait_for_end_of_current_tone();

        tq.enqueue(Tone::new(800, 1_000)).unwrap();
        tq.dequeue().unwrap();
        let waiter_queue = Arc::clone(&tq);
        let waiter = std::thread::spawn(move || {
            waiter_queue.wait_for_end_of_current_tone();
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(!waiter.is_finished());
        tq.tone_completed();
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_for_level_returns_immediately_at_level() {
        let tq = ToneQueue::new(8);
        tq.enqueue(Tone::new(800, 1_000)).unwrap();
        // len == 1, waiting for level >= len must not block.
        tq.wait_for_level(1);
        tq.wait_for_level(5);
    }

    #[test]
    fn test_wait_for_level_blocks_until_drained() {
        let tq = Arc::new(ToneQueue::new(8));
        for _ in 0..4 {
            tq.enqueue(Tone::new(800, 1_000)).unwrap();
        }
        let consumer_queue = Arc::clone(&tq);
        let consumer = std::thread::spawn(move || {
            for _ in 0..4 {
                std::thread::sleep(std::time::Duration::from_millis(5));
                consumer_queue.dequeue();
            }
        });
        tq.wait_for_level(0);
        assert_eq!(tq.length(), 0);
        consumer.join().unwrap();
    }

    #[test]
    fn test_dequeue_blocking_wakes_on_stop() {
        let tq = Arc::new(ToneQueue::new(8));
        let running = Arc::new(AtomicBool::new(true));
        let worker_queue = Arc::clone(&tq);
        let worker_running = Arc::clone(&running);
        let worker = std::thread::spawn(move || worker_queue.dequeue_blocking(&worker_running));
        std::thread::sleep(std::time::Duration::from_millis(10));
        running.store(false, Ordering::SeqCst);
        tq.wake_consumer();
        assert!(worker.join().unwrap().is_none());
    }

    #[test]
    fn test_wraparound_indices_stay_bounded() {
        let tq = ToneQueue::new(3);
        for round in 0..10 {
            tq.enqueue(Tone::new(100 + round, 1_000)).unwrap();
            let tone = tq.dequeue().unwrap();
            assert_eq!(tone.frequency, 100 + round);
        }
        assert_eq!(tq.length(), 0);
        assert_eq!(tq.high_water_mark(), 1);
    }
}
