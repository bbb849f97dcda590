//! Straight key and iambic keyer
//!
//! Converts key and paddle events into symbols enqueued into the
//! generator.
//!
//! Features:
//! - Straight key: open/closed contact driving open-ended mark and
//!   space tones
//! - Iambic keyer: nine-state Curtis 8044 graph with dot/dash paddle
//!   memory and mode A/B trailing-element handling
//! - The graph advances exclusively on generator tone completions, so
//!   element timing comes from the audio clock itself
//! - Optional receiver feed: straight-key transitions are reported as
//!   mark-begin/mark-end with a current timestamp

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::generator::{Generator, Symbol};
use crate::receiver::Receiver;
use crate::Result;

/// Value of a key contact or paddle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KeyValue {
    /// Contact open: no current, space.
    #[default]
    Open,
    /// Contact closed: current flows, mark.
    Closed,
}

/// States of the iambic keyer graph. `A` and `B` variants track whether
/// a Curtis mode B trailing element is owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GraphState {
    #[default]
    Idle,
    InDotA,
    InDashA,
    AfterDotA,
    AfterDashA,
    InDotB,
    InDashB,
    AfterDotB,
    AfterDashB,
}

impl GraphState {
    fn is_idle(self) -> bool {
        self == GraphState::Idle
    }
}

struct Inner {
    // Straight key.
    value: KeyValue,
    // Iambic keyer.
    graph_state: GraphState,
    dot_paddle: KeyValue,
    dash_paddle: KeyValue,
    dot_latch: bool,
    dash_latch: bool,
    curtis_mode_b: bool,
    curtis_b_latch: bool,
}

/// A straight key and an iambic keyer sharing one generator.
///
/// Create with [`Key::new`], then wire with
/// [`attach_generator`](Key::attach_generator). The generator reference
/// is required for producing sound; a receiver reference is optional
/// and is fed straight-key transitions.
pub struct Key {
    inner: Mutex<Inner>,
    state_changed: Condvar,
    /// Advisory re-entry guard for the update routine. Both paddle
    /// events and generator completions funnel through the routine; a
    /// caller finding the guard taken returns immediately, the state
    /// being advanced by the in-flight call.
    update_lock: AtomicBool,
    generator: Mutex<Option<Arc<Generator>>>,
    receiver: Mutex<Option<Arc<Mutex<Receiver>>>>,
}

impl Key {
    /// Create a detached key: straight key open, keyer idle, mode A.
    pub fn new() -> Arc<Self> {
        Arc::new(Key {
            inner: Mutex::new(Inner {
                value: KeyValue::Open,
                graph_state: GraphState::Idle,
                dot_paddle: KeyValue::Open,
                dash_paddle: KeyValue::Open,
                dot_latch: false,
                dash_latch: false,
                curtis_mode_b: false,
                curtis_b_latch: false,
            }),
            state_changed: Condvar::new(),
            update_lock: AtomicBool::new(false),
            generator: Mutex::new(None),
            receiver: Mutex::new(None),
        })
    }

    // --- wiring ---------------------------------------------------------

    /// Attach a generator; the generator gets a back-reference so it
    /// can advance the keyer on tone completions.
    pub fn attach_generator(self: &Arc<Self>, generator: &Arc<Generator>) {
        generator.attach_key(Arc::downgrade(self));
        *self.generator.lock() = Some(Arc::clone(generator));
    }

    /// Detach from the generator, dropping the back-reference first.
    pub fn detach_generator(&self) {
        if let Some(generator) = self.generator.lock().take() {
            generator.detach_key();
        }
    }

    /// Attach a receiver fed by straight-key transitions.
    pub fn attach_receiver(&self, receiver: Arc<Mutex<Receiver>>) {
        *self.receiver.lock() = Some(receiver);
    }

    /// Detach the receiver.
    pub fn detach_receiver(&self) {
        *self.receiver.lock() = None;
    }

    // --- straight key ---------------------------------------------------

    /// Set the straight key value. A repeated value is ignored; a
    /// transition begins an open-ended mark or space in the generator
    /// and reports the edge to an attached receiver.
    pub fn sk_set_value(&self, value: KeyValue) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.value == value {
                return Ok(());
            }
            inner.value = value;
        }
        debug!("key: straight key {:?}", value);
        self.state_changed.notify_all();

        if let Some(generator) = self.generator.lock().clone() {
            match value {
                KeyValue::Closed => generator.enqueue_begin_mark()?,
                KeyValue::Open => generator.enqueue_begin_space()?,
            }
        }
        if let Some(receiver) = self.receiver.lock().clone() {
            let now = Instant::now();
            let report = match value {
                KeyValue::Closed => receiver.lock().mark_begin(now),
                KeyValue::Open => receiver.lock().mark_end(now),
            };
            if let Err(e) = report {
                debug!("key: receiver rejected straight key edge: {e}");
            }
        }
        Ok(())
    }

    /// Current straight key value.
    pub fn sk_get_value(&self) -> KeyValue {
        self.inner.lock().value
    }

    /// True while the straight key is held closed.
    pub fn sk_is_busy(&self) -> bool {
        self.sk_get_value() == KeyValue::Closed
    }

    // --- iambic keyer ---------------------------------------------------

    /// Enable Curtis mode B: releasing both paddles during a mark emits
    /// one trailing opposite element.
    pub fn ik_enable_curtis_mode_b(&self) {
        self.inner.lock().curtis_mode_b = true;
    }

    /// Disable Curtis mode B (the default).
    pub fn ik_disable_curtis_mode_b(&self) {
        self.inner.lock().curtis_mode_b = false;
    }

    /// True when Curtis mode B is enabled.
    pub fn ik_get_curtis_mode_b(&self) -> bool {
        self.inner.lock().curtis_mode_b
    }

    /// Report both paddle values.
    ///
    /// Latches are set immediately on close transitions; when the keyer
    /// is idle and a paddle closed, the graph is nudged out of idle and
    /// the update routine runs.
    pub fn ik_notify_paddle_event(&self, dot_paddle: KeyValue, dash_paddle: KeyValue) -> Result<()> {
        let nudge = {
            let mut inner = self.inner.lock();
            inner.dot_paddle = dot_paddle;
            inner.dash_paddle = dash_paddle;
            if dot_paddle == KeyValue::Closed {
                inner.dot_latch = true;
            }
            if dash_paddle == KeyValue::Closed {
                inner.dash_latch = true;
            }
            if dot_paddle == KeyValue::Closed
                && dash_paddle == KeyValue::Closed
                && inner.curtis_mode_b
            {
                inner.curtis_b_latch = true;
            }

            inner.graph_state.is_idle()
                && (dot_paddle == KeyValue::Closed || dash_paddle == KeyValue::Closed)
        };
        if nudge {
            self.ik_nudge();
        }
        Ok(())
    }

    /// Report the dot paddle value only.
    pub fn ik_notify_dot_paddle_event(&self, value: KeyValue) -> Result<()> {
        let dash_paddle = self.inner.lock().dash_paddle;
        self.ik_notify_paddle_event(value, dash_paddle)
    }

    /// Report the dash paddle value only.
    pub fn ik_notify_dash_paddle_event(&self, value: KeyValue) -> Result<()> {
        let dot_paddle = self.inner.lock().dot_paddle;
        self.ik_notify_paddle_event(dot_paddle, value)
    }

    /// Current paddle values as (dot, dash).
    pub fn ik_get_paddles(&self) -> (KeyValue, KeyValue) {
        let inner = self.inner.lock();
        (inner.dot_paddle, inner.dash_paddle)
    }

    /// True while the keyer graph is not idle.
    pub fn ik_is_busy(&self) -> bool {
        !self.inner.lock().graph_state.is_idle()
    }

    /// Block until the keyer graph returns to idle.
    ///
    /// While a paddle stays closed the graph keeps cycling and this
    /// call keeps blocking; release the paddles to let it return.
    pub fn ik_wait_for_keyer(&self) {
        let mut inner = self.inner.lock();
        while !inner.graph_state.is_idle() {
            self.state_changed.wait(&mut inner);
        }
    }

    /// Block until the next keyer state transition, i.e. until the
    /// element currently sounding (or its space) has finished.
    ///
    /// The condvar is shared with every keyer update and straight-key
    /// transition, so the wait loops until the graph actually leaves
    /// the state it was in on entry.
    pub fn ik_wait_for_end_of_current_element(&self) {
        let mut inner = self.inner.lock();
        let entered = inner.graph_state;
        if entered.is_idle() {
            return;
        }
        while inner.graph_state == entered {
            self.state_changed.wait(&mut inner);
        }
    }

    /// Synthesize an entry point out of idle: pretend the space after
    /// an opposite mark just finished, then run the normal update.
    fn ik_nudge(&self) {
        {
            let mut inner = self.inner.lock();
            if !inner.graph_state.is_idle() {
                return;
            }
            inner.graph_state = if inner.dot_paddle == KeyValue::Closed {
                if inner.curtis_mode_b {
                    GraphState::AfterDashB
                } else {
                    GraphState::AfterDashA
                }
            } else {
                if inner.curtis_mode_b {
                    GraphState::AfterDotB
                } else {
                    GraphState::AfterDotA
                }
            };
            debug!("key: keyer nudged to {:?}", inner.graph_state);
        }
        self.ik_update_graph_state();
    }

    /// The keyer's single update routine, advancing the graph by one
    /// transition. Re-entrant calls return immediately; the state is
    /// advanced by the call already in flight.
    fn ik_update_graph_state(&self) {
        if self.update_lock.swap(true, Ordering::Acquire) {
            return;
        }

        let enqueue = {
            let mut inner = self.inner.lock();
            let transition = Self::next_transition(&mut inner);
            if let Some((state, _)) = transition {
                debug!("key: keyer -> {:?}", state);
            }
            transition.map(|(_, symbol)| symbol).flatten()
        };
        if let Some(symbol) = enqueue {
            if let Some(generator) = self.generator.lock().clone() {
                if let Err(e) = generator.enqueue_symbol_no_ims(symbol) {
                    warn!("key: keyer symbol dropped: {e}");
                }
            }
        }
        self.state_changed.notify_all();

        self.update_lock.store(false, Ordering::Release);
    }

    /// Compute and apply one graph transition. Returns the new state
    /// and the symbol to enqueue, or `None` when idle.
    fn next_transition(inner: &mut Inner) -> Option<(GraphState, Option<Symbol>)> {
        use GraphState::*;

        let (state, symbol) = match inner.graph_state {
            Idle => return None,

            // A mark finished: enqueue its trailing inter-mark space.
            InDotA => (AfterDotA, Some(Symbol::Space)),
            InDotB => (AfterDotB, Some(Symbol::Space)),
            InDashA => (AfterDashA, Some(Symbol::Space)),
            InDashB => (AfterDashB, Some(Symbol::Space)),

            state @ (AfterDotA | AfterDotB) => {
                if inner.dot_paddle == KeyValue::Open {
                    inner.dot_latch = false;
                }
                // The Curtis B latch is examined, and consumed, at
                // every AFTER transition.
                let b_latch = std::mem::take(&mut inner.curtis_b_latch);
                if state == AfterDotB {
                    (InDashA, Some(Symbol::Dash))
                } else if inner.dash_latch {
                    let next = if b_latch { InDashB } else { InDashA };
                    (next, Some(Symbol::Dash))
                } else if inner.dot_latch {
                    (InDotA, Some(Symbol::Dot))
                } else {
                    (Idle, None)
                }
            }

            state @ (AfterDashA | AfterDashB) => {
                if inner.dash_paddle == KeyValue::Open {
                    inner.dash_latch = false;
                }
                let b_latch = std::mem::take(&mut inner.curtis_b_latch);
                if state == AfterDashB {
                    (InDotA, Some(Symbol::Dot))
                } else if inner.dot_latch {
                    let next = if b_latch { InDotB } else { InDotA };
                    (next, Some(Symbol::Dot))
                } else if inner.dash_latch {
                    (InDashA, Some(Symbol::Dash))
                } else {
                    (Idle, None)
                }
            }
        };
        inner.graph_state = state;
        Some((state, symbol))
    }

    /// Called by the generator worker after each non-forever tone has
    /// been fully rendered.
    pub(crate) fn generator_finished_tone(&self) {
        if self.inner.lock().graph_state.is_idle() {
            return;
        }
        self.ik_update_graph_state();
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        self.detach_generator();
    }
}
