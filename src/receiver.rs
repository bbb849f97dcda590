//! Adaptive receiver
//!
//! Timestamp-driven classifier turning mark-begin/mark-end events into
//! dots, dashes and spaces, building character representations.
//!
//! Features:
//! - Seven-state machine from idle through mark/space tracking to the
//!   end-of-character and end-of-word gaps
//! - Fixed-speed windows scaled by a tolerance percentage, or adaptive
//!   windows tracking the sender's speed with moving averages
//! - Noise-spike rejection that leaves the receiver exactly as it was
//!   before the rejected mark
//! - Duration statistics ring for monitoring timing quality
//!
//! The receiver is deliberately thread-free: every state change happens
//! inside an explicit API call carrying a timestamp, so the caller owns
//! the clock.

use std::time::Instant;

use log::debug;

use crate::constants::{
    DOT_CALIBRATION, GAP_MAX, NOISE_SPIKE_THRESHOLD_INITIAL, SPEED_INITIAL, SPEED_MAX,
    SPEED_MIN, TOLERANCE_INITIAL, TOLERANCE_MAX,
};
use crate::morse;
use crate::{CwError, Result};

/// Capacity of the representation buffer. An error state is forced one
/// entry before the buffer would fill.
pub const REPRESENTATION_CAPACITY: usize = 256;

/// Capacity of the duration statistics ring.
const STATISTICS_CAPACITY: usize = 256;

/// Length of the moving-average windows tracking dot and dash
/// durations in adaptive mode.
const AVERAGING_LENGTH: usize = 4;

/// Receiver states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Idle,
    Mark,
    InterMarkSpace,
    EocGap,
    EowGap,
    EocGapErr,
    EowGapErr,
}

/// Kind of a mark reported through [`Receiver::add_mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    /// A one-unit mark.
    Dot,
    /// A three-unit mark.
    Dash,
}

/// What a duration statistic was measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// A received dot.
    Dot,
    /// A received dash.
    Dash,
    /// A space between marks of one character.
    InterMarkSpace,
    /// A space closing a character.
    InterCharacterSpace,
}

/// One duration statistic: the deviation of a received duration from
/// its ideal, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationStat {
    /// What was measured.
    pub kind: StatKind,
    /// Received duration minus ideal duration, µs.
    pub delta: i64,
}

/// A polled, possibly still unfinished, character representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolledRepresentation {
    /// The dot/dash representation received so far.
    pub representation: String,
    /// True when the gap after the character marks a word boundary.
    pub is_end_of_word: bool,
    /// True when the character ended in an error state.
    pub is_error: bool,
}

/// A polled character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolledCharacter {
    /// The received character; a space stands for a word boundary.
    pub character: char,
    /// True when the gap after the character marks a word boundary.
    pub is_end_of_word: bool,
    /// True when the character ended in an error state.
    pub is_error: bool,
}

/// A min/ideal/max duration window, µs.
#[derive(Debug, Clone, Copy)]
struct Window {
    min: u64,
    ideal: u64,
    max: u64,
}

impl Window {
    fn contains(&self, duration: u64) -> bool {
        (self.min..=self.max).contains(&duration)
    }
}

#[derive(Debug, Clone, Copy)]
struct Windows {
    dot: Window,
    dash: Window,
    inter_mark_space: Window,
    inter_character_space: Window,
}

/// Fixed-length moving average over received durations.
#[derive(Debug, Clone, Copy)]
struct MovingAverage {
    buffer: [u64; AVERAGING_LENGTH],
    cursor: usize,
    sum: u64,
}

impl MovingAverage {
    fn seeded(value: u64) -> Self {
        MovingAverage {
            buffer: [value; AVERAGING_LENGTH],
            cursor: 0,
            sum: value * AVERAGING_LENGTH as u64,
        }
    }

    fn update(&mut self, value: u64) {
        self.sum = self.sum - self.buffer[self.cursor] + value;
        self.buffer[self.cursor] = value;
        self.cursor = (self.cursor + 1) % AVERAGING_LENGTH;
    }

    fn average(&self) -> u64 {
        self.sum / AVERAGING_LENGTH as u64
    }
}

/// The timestamp-driven Morse receiver.
pub struct Receiver {
    state: State,
    speed: f32,
    tolerance: u32,
    gap: u32,
    adaptive: bool,
    noise_spike_threshold: u32,
    parameters_in_sync: bool,
    windows: Windows,
    adaptive_speed_threshold: u64,
    dot_average: MovingAverage,
    dash_average: MovingAverage,
    mark_start: Option<Instant>,
    mark_end: Option<Instant>,
    representation: String,
    statistics: Vec<DurationStat>,
    statistics_cursor: usize,
    is_pending_inter_word_space: bool,
}

impl Receiver {
    /// Create a receiver with initial parameters: 12 WPM fixed mode,
    /// 50 % tolerance, 10 ms noise threshold.
    pub fn new() -> Self {
        let mut receiver = Receiver {
            state: State::Idle,
            speed: SPEED_INITIAL as f32,
            tolerance: TOLERANCE_INITIAL,
            gap: 0,
            adaptive: false,
            noise_spike_threshold: NOISE_SPIKE_THRESHOLD_INITIAL,
            parameters_in_sync: false,
            windows: Windows {
                dot: Window { min: 0, ideal: 0, max: 0 },
                dash: Window { min: 0, ideal: 0, max: 0 },
                inter_mark_space: Window { min: 0, ideal: 0, max: 0 },
                inter_character_space: Window { min: 0, ideal: 0, max: 0 },
            },
            adaptive_speed_threshold: 0,
            dot_average: MovingAverage::seeded(0),
            dash_average: MovingAverage::seeded(0),
            mark_start: None,
            mark_end: None,
            representation: String::with_capacity(REPRESENTATION_CAPACITY),
            statistics: Vec::with_capacity(STATISTICS_CAPACITY),
            statistics_cursor: 0,
            is_pending_inter_word_space: false,
        };
        receiver.sync_parameters();
        receiver
    }

    // --- parameters -----------------------------------------------------

    /// Set the receive speed in words per minute.
    ///
    /// Fails with [`CwError::Busy`] while adaptive mode tracks the
    /// speed itself.
    pub fn set_speed(&mut self, speed: f32) -> Result<()> {
        if self.adaptive {
            return Err(CwError::Busy);
        }
        if !(SPEED_MIN as f32..=SPEED_MAX as f32).contains(&speed) {
            return Err(CwError::Invalid("speed"));
        }
        if (speed - self.speed).abs() > f32::EPSILON {
            self.speed = speed;
            self.parameters_in_sync = false;
        }
        Ok(())
    }

    /// Current receive speed in words per minute. In adaptive mode this
    /// is the tracked speed.
    pub fn get_speed(&self) -> f32 {
        self.speed
    }

    /// Set the classification tolerance in percent.
    pub fn set_tolerance(&mut self, tolerance: u32) -> Result<()> {
        if tolerance > TOLERANCE_MAX {
            return Err(CwError::Invalid("tolerance"));
        }
        if tolerance != self.tolerance {
            self.tolerance = tolerance;
            self.parameters_in_sync = false;
        }
        Ok(())
    }

    /// Current classification tolerance in percent.
    pub fn get_tolerance(&self) -> u32 {
        self.tolerance
    }

    /// Set the expected extra inter-character gap, in dot units, of the
    /// sender being received.
    pub fn set_gap(&mut self, gap: u32) -> Result<()> {
        if gap > GAP_MAX {
            return Err(CwError::Invalid("gap"));
        }
        if gap != self.gap {
            self.gap = gap;
            self.parameters_in_sync = false;
        }
        Ok(())
    }

    /// Current expected extra inter-character gap in dot units.
    pub fn get_gap(&self) -> u32 {
        self.gap
    }

    /// Set the noise-spike threshold in microseconds; marks no longer
    /// than the threshold are rejected as noise.
    pub fn set_noise_spike_threshold(&mut self, threshold: u32) {
        self.noise_spike_threshold = threshold;
    }

    /// Current noise-spike threshold in microseconds.
    pub fn get_noise_spike_threshold(&self) -> u32 {
        self.noise_spike_threshold
    }

    /// Enable adaptive mode: the receiver tracks the sender's speed
    /// from observed dot and dash durations.
    pub fn enable_adaptive_mode(&mut self) {
        if !self.adaptive {
            self.adaptive = true;
            self.parameters_in_sync = false;
            // Seed the averages from the current speed so tracking
            // starts from a sane point.
            let unit = self.unit_us();
            self.dot_average = MovingAverage::seeded(unit);
            self.dash_average = MovingAverage::seeded(3 * unit);
        }
    }

    /// Disable adaptive mode; the speed stays at its tracked value.
    pub fn disable_adaptive_mode(&mut self) {
        if self.adaptive {
            self.adaptive = false;
            self.parameters_in_sync = false;
        }
    }

    /// True while adaptive mode is enabled.
    pub fn is_adaptive_mode(&self) -> bool {
        self.adaptive
    }

    /// The adaptive mark-classification threshold: the midpoint between
    /// the dot and dash moving averages, µs.
    pub fn get_adaptive_speed_threshold(&self) -> u64 {
        self.adaptive_speed_threshold
    }

    fn unit_us(&self) -> u64 {
        (f64::from(DOT_CALIBRATION) / f64::from(self.speed)) as u64
    }

    /// Recompute the classification windows. Idempotent; called lazily
    /// by every operation that consumes timing.
    fn sync_parameters(&mut self) {
        if self.parameters_in_sync {
            return;
        }
        let unit = self.unit_us();
        let dot_ideal = unit;
        let dash_ideal = 3 * unit;
        let eoc_ideal = (3 + u64::from(self.gap)) * unit;

        self.windows = if self.adaptive {
            Windows {
                dot: Window {
                    min: 0,
                    ideal: dot_ideal,
                    max: 2 * dot_ideal,
                },
                dash: Window {
                    min: 2 * dot_ideal + 1,
                    ideal: dash_ideal,
                    max: u64::MAX,
                },
                inter_mark_space: Window {
                    min: 0,
                    ideal: dot_ideal,
                    max: 2 * dot_ideal,
                },
                inter_character_space: Window {
                    min: 2 * dot_ideal,
                    ideal: eoc_ideal,
                    max: 5 * dot_ideal,
                },
            }
        } else {
            let window = |ideal: u64| {
                let tolerance = ideal * u64::from(self.tolerance) / 100;
                Window {
                    min: ideal - tolerance,
                    ideal,
                    max: ideal + tolerance,
                }
            };
            Windows {
                dot: window(dot_ideal),
                dash: window(dash_ideal),
                inter_mark_space: window(unit),
                inter_character_space: window(eoc_ideal),
            }
        };
        self.adaptive_speed_threshold =
            (self.dot_average.average() + self.dash_average.average()) / 2;
        self.parameters_in_sync = true;
    }

    /// Fold a newly classified mark into the averages and re-derive the
    /// tracked speed, clamped to the supported range.
    fn update_adaptive_tracking(&mut self, duration: u64, kind: MarkKind) {
        if !self.adaptive {
            return;
        }
        match kind {
            MarkKind::Dot => self.dot_average.update(duration),
            MarkKind::Dash => self.dash_average.update(duration),
        }
        let threshold = (self.dot_average.average() + self.dash_average.average()) / 2;
        // threshold spans two units (midpoint of one and three).
        let unit = (threshold / 2).max(1);
        let speed =
            (f64::from(DOT_CALIBRATION) / unit as f64).clamp(SPEED_MIN as f64, SPEED_MAX as f64);
        self.speed = speed as f32;
        self.adaptive_speed_threshold = threshold;
        self.parameters_in_sync = false;
        self.sync_parameters();
        // Keep the reported threshold midpoint-consistent even when
        // the speed clamp kicked in.
        self.adaptive_speed_threshold = threshold;
        debug!("receiver: adaptive speed {:.1} wpm", self.speed);
    }

    fn record_statistic(&mut self, kind: StatKind, duration: u64, ideal: u64) {
        let stat = DurationStat {
            kind,
            delta: duration as i64 - ideal as i64,
        };
        if self.statistics.len() < STATISTICS_CAPACITY {
            self.statistics.push(stat);
        } else {
            self.statistics[self.statistics_cursor] = stat;
        }
        self.statistics_cursor = (self.statistics_cursor + 1) % STATISTICS_CAPACITY;
    }

    /// The collected duration statistics, up to 256 most recent.
    pub fn get_statistics(&self) -> &[DurationStat] {
        &self.statistics
    }

    /// Clear the duration statistics ring.
    pub fn reset_statistics(&mut self) {
        self.statistics.clear();
        self.statistics_cursor = 0;
    }

    // --- state machine --------------------------------------------------

    /// Report that the carrier came on at `ts`.
    ///
    /// Legal in idle, inside a character (inter-mark space) and in the
    /// non-error gaps, where it starts a fresh character. Fails with
    /// [`CwError::Range`] in other states and [`CwError::Invalid`] for
    /// a timestamp before the previous mark's end.
    pub fn mark_begin(&mut self, ts: Instant) -> Result<()> {
        self.sync_parameters();
        match self.state {
            State::Idle => {}
            State::InterMarkSpace => {
                // Record the statistic for the space that just ended.
                let space = self.space_since_mark_end(ts)?;
                let ideal = self.windows.inter_mark_space.ideal;
                self.record_statistic(StatKind::InterMarkSpace, space, ideal);
            }
            State::EocGap | State::EowGap => {
                // A new character begins; the previous one is gone
                // whether or not it was polled.
                self.representation.clear();
                self.is_pending_inter_word_space = false;
            }
            State::Mark | State::EocGapErr | State::EowGapErr => {
                return Err(CwError::Range);
            }
        }
        self.mark_start = Some(ts);
        self.state = State::Mark;
        Ok(())
    }

    /// Report that the carrier went off at `ts`, classifying the mark
    /// that just ended.
    ///
    /// A mark no longer than the noise-spike threshold is rejected with
    /// [`CwError::Noise`] and the receiver is restored to its exact
    /// state from before the matching [`mark_begin`](Self::mark_begin).
    pub fn mark_end(&mut self, ts: Instant) -> Result<()> {
        self.sync_parameters();
        if self.state != State::Mark {
            return Err(CwError::Range);
        }
        let mark_start = self.mark_start.ok_or(CwError::Range)?;
        let duration = ts
            .checked_duration_since(mark_start)
            .ok_or(CwError::Invalid("timestamp"))?
            .as_micros() as u64;

        if duration <= u64::from(self.noise_spike_threshold) {
            // Noise spike: pretend the mark never began. `mark_end`
            // was not touched, so the stream continues seamlessly.
            self.state = if self.representation.is_empty() {
                State::Idle
            } else {
                State::InterMarkSpace
            };
            self.mark_start = None;
            debug!("receiver: rejected {duration} us noise spike");
            return Err(CwError::Noise);
        }

        let symbol = if self.windows.dot.contains(duration) {
            Some((MarkKind::Dot, '.'))
        } else if self.windows.dash.contains(duration) {
            Some((MarkKind::Dash, '-'))
        } else {
            None
        };

        let Some((kind, symbol)) = symbol else {
            self.state = if duration > self.windows.inter_character_space.max {
                State::EowGapErr
            } else {
                State::EocGapErr
            };
            self.mark_end = Some(ts);
            debug!("receiver: unclassifiable {duration} us mark");
            return Err(CwError::BadMark);
        };

        if self.representation.len() >= REPRESENTATION_CAPACITY - 1 {
            self.state = State::EocGapErr;
            self.mark_end = Some(ts);
            return Err(CwError::NoMemory);
        }

        let ideal = match kind {
            MarkKind::Dot => self.windows.dot.ideal,
            MarkKind::Dash => self.windows.dash.ideal,
        };
        let stat_kind = match kind {
            MarkKind::Dot => StatKind::Dot,
            MarkKind::Dash => StatKind::Dash,
        };
        self.record_statistic(stat_kind, duration, ideal);
        self.update_adaptive_tracking(duration, kind);

        self.representation.push(symbol);
        self.mark_end = Some(ts);
        self.state = State::InterMarkSpace;
        Ok(())
    }

    /// Report an already classified mark ending at `ts`, bypassing
    /// duration classification. Useful for clients with external
    /// keying knowledge.
    pub fn add_mark(&mut self, ts: Instant, kind: MarkKind) -> Result<()> {
        self.sync_parameters();
        match self.state {
            State::Idle | State::InterMarkSpace => {}
            State::EocGap | State::EowGap => {
                self.representation.clear();
                self.is_pending_inter_word_space = false;
            }
            State::Mark | State::EocGapErr | State::EowGapErr => {
                return Err(CwError::Range);
            }
        }
        if self.representation.len() >= REPRESENTATION_CAPACITY - 1 {
            self.state = State::EocGapErr;
            self.mark_end = Some(ts);
            return Err(CwError::NoMemory);
        }
        self.representation.push(match kind {
            MarkKind::Dot => '.',
            MarkKind::Dash => '-',
        });
        self.mark_end = Some(ts);
        self.state = State::InterMarkSpace;
        Ok(())
    }

    fn space_since_mark_end(&self, ts: Instant) -> Result<u64> {
        let mark_end = self.mark_end.ok_or(CwError::Range)?;
        Ok(ts
            .checked_duration_since(mark_end)
            .ok_or(CwError::Invalid("timestamp"))?
            .as_micros() as u64)
    }

    /// Poll the representation gathered so far, classifying the space
    /// elapsed up to `ts`.
    ///
    /// Returns [`CwError::Again`] while the character is still too
    /// fresh to be complete and [`CwError::Range`] when nothing has
    /// been received at all.
    pub fn poll_representation(&mut self, ts: Instant) -> Result<PolledRepresentation> {
        self.sync_parameters();
        match self.state {
            State::Idle | State::Mark => Err(CwError::Range),
            State::InterMarkSpace => {
                let space = self.space_since_mark_end(ts)?;
                let eoc = self.windows.inter_character_space;
                if space < eoc.min {
                    return Err(CwError::Again);
                }
                self.state = if space > eoc.max {
                    State::EowGap
                } else {
                    State::EocGap
                };
                self.record_statistic(StatKind::InterCharacterSpace, space, eoc.ideal);
                self.polled(false)
            }
            State::EocGap | State::EocGapErr => {
                // The gap may have grown into a word boundary since the
                // last poll.
                let space = self.space_since_mark_end(ts)?;
                if space > self.windows.inter_character_space.max {
                    self.state = match self.state {
                        State::EocGap => State::EowGap,
                        _ => State::EowGapErr,
                    };
                }
                let is_error = matches!(self.state, State::EocGapErr | State::EowGapErr);
                self.polled(is_error)
            }
            State::EowGap => self.polled(false),
            State::EowGapErr => self.polled(true),
        }
    }

    fn polled(&self, is_error: bool) -> Result<PolledRepresentation> {
        Ok(PolledRepresentation {
            representation: self.representation.clone(),
            is_end_of_word: matches!(self.state, State::EowGap | State::EowGapErr),
            is_error,
        })
    }

    /// Poll a complete character.
    ///
    /// On success the receiver remembers that a word separator may
    /// follow; once the gap outgrows the inter-character window, a
    /// subsequent poll returns a single space and resets to idle.
    /// An unknown representation fails with [`CwError::NotFound`].
    pub fn poll_character(&mut self, ts: Instant) -> Result<PolledCharacter> {
        self.sync_parameters();
        if self.is_pending_inter_word_space
            && !matches!(self.state, State::Idle | State::Mark)
        {
            let space = self.space_since_mark_end(ts)?;
            if space > self.windows.inter_character_space.max {
                self.is_pending_inter_word_space = false;
                self.reset_state();
                return Ok(PolledCharacter {
                    character: ' ',
                    is_end_of_word: true,
                    is_error: false,
                });
            }
        }
        let polled = self.poll_representation(ts)?;
        let character = morse::representation_to_character(&polled.representation)?;
        self.is_pending_inter_word_space = true;
        Ok(PolledCharacter {
            character,
            is_end_of_word: polled.is_end_of_word,
            is_error: polled.is_error,
        })
    }

    /// Abandon the character in progress and return to idle. The
    /// statistics and the tracked speed are kept.
    pub fn reset_state(&mut self) {
        self.state = State::Idle;
        self.representation.clear();
        self.mark_start = None;
        self.mark_end = None;
        self.is_pending_inter_word_space = false;
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn us(n: u64) -> Duration {
        Duration::from_micros(n)
    }

    /// A 20 WPM fixed-mode receiver: 60 ms unit.
    fn receiver_20_wpm() -> (Receiver, Instant) {
        let mut receiver = Receiver::new();
        receiver.set_speed(20.0).unwrap();
        receiver.set_tolerance(50).unwrap();
        (receiver, Instant::now())
    }

    fn receive_mark(receiver: &mut Receiver, start: Instant, duration_us: u64) -> Result<()> {
        receiver.mark_begin(start)?;
        receiver.mark_end(start + us(duration_us))
    }

    #[test]
    fn test_dot_and_dash_classification_at_20_wpm() {
        let (mut receiver, t0) = receiver_20_wpm();

        // 60 ms mark is a dot.
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        // 60 ms space, then a 180 ms mark: a dash.
        let t1 = t0 + us(120_000);
        receive_mark(&mut receiver, t1, 180_000).unwrap();

        let polled = receiver
            .poll_representation(t1 + us(180_000) + us(180_000))
            .unwrap();
        assert_eq!(polled.representation, ".-");
        assert!(!polled.is_error);
    }

    #[test]
    fn test_single_dot_round_trip_at_any_speed() {
        for speed in [SPEED_MIN, 12, 20, 35, SPEED_MAX] {
            let mut receiver = Receiver::new();
            receiver.set_speed(speed as f32).unwrap();
            let unit = (DOT_CALIBRATION / speed) as u64;
            let t0 = Instant::now();
            receiver.mark_begin(t0).unwrap();
            receiver.mark_end(t0 + us(unit)).unwrap();
            let polled = receiver.poll_representation(t0 + us(unit * 5)).unwrap();
            assert_eq!(polled.representation, ".", "speed {speed}");
        }
    }

    #[test]
    fn test_noise_spike_is_rejected_and_invisible() {
        let (mut receiver, t0) = receiver_20_wpm();
        receiver.set_noise_spike_threshold(40_000);

        // A dot...
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        // ...then a 35 ms spike inside the following space...
        let spike_start = t0 + us(90_000);
        receiver.mark_begin(spike_start).unwrap();
        assert_eq!(
            receiver.mark_end(spike_start + us(35_000)),
            Err(CwError::Noise)
        );
        // ...then a regular dot where it would have been anyway.
        let t1 = t0 + us(120_000);
        receive_mark(&mut receiver, t1, 60_000).unwrap();

        let polled = receiver.poll_representation(t1 + us(300_000)).unwrap();
        assert_eq!(polled.representation, "..");
        assert!(!polled.is_error);
    }

    #[test]
    fn test_noise_spike_on_empty_buffer_returns_to_idle() {
        let (mut receiver, t0) = receiver_20_wpm();
        receiver.set_noise_spike_threshold(40_000);
        receiver.mark_begin(t0).unwrap();
        assert_eq!(receiver.mark_end(t0 + us(5_000)), Err(CwError::Noise));
        // Nothing received: polling is a range error, as if untouched.
        assert_eq!(
            receiver.poll_representation(t0 + us(500_000)),
            Err(CwError::Range)
        );
    }

    #[test]
    fn test_unclassifiable_mark_enters_error_gap() {
        let (mut receiver, t0) = receiver_20_wpm();
        // 29 ms: below the dot window at 50 % tolerance.
        assert_eq!(
            receive_mark(&mut receiver, t0, 29_000),
            Err(CwError::BadMark)
        );
        let polled = receiver.poll_representation(t0 + us(400_000)).unwrap();
        assert!(polled.is_error);
        // New marks are rejected until the state is reset.
        assert_eq!(
            receiver.mark_begin(t0 + us(500_000)),
            Err(CwError::Range)
        );
        receiver.reset_state();
        receiver.mark_begin(t0 + us(600_000)).unwrap();
    }

    #[test]
    fn test_overlong_mark_enters_word_error_gap() {
        let (mut receiver, t0) = receiver_20_wpm();
        // Far beyond the inter-character window maximum.
        assert_eq!(
            receive_mark(&mut receiver, t0, 2_000_000),
            Err(CwError::BadMark)
        );
        let polled = receiver.poll_representation(t0 + us(2_100_000)).unwrap();
        assert!(polled.is_error);
        assert!(polled.is_end_of_word);
    }

    #[test]
    fn test_poll_too_early_returns_again() {
        let (mut receiver, t0) = receiver_20_wpm();
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        // 20 ms into the space: character cannot be complete yet.
        assert_eq!(
            receiver.poll_representation(t0 + us(80_000)),
            Err(CwError::Again)
        );
    }

    #[test]
    fn test_end_of_word_detection() {
        let (mut receiver, t0) = receiver_20_wpm();
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        let mark_end = t0 + us(60_000);

        // Inside the inter-character window: end of character.
        let mut eoc_receiver = receiver;
        let polled = eoc_receiver.poll_representation(mark_end + us(180_000)).unwrap();
        assert!(!polled.is_end_of_word);

        // Beyond the window maximum (270 ms at 50 % tolerance): word.
        let (mut receiver, t0) = receiver_20_wpm();
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        let polled = receiver
            .poll_representation(t0 + us(60_000) + us(300_000))
            .unwrap();
        assert!(polled.is_end_of_word);
    }

    #[test]
    fn test_character_gap_grows_into_word_gap() {
        let (mut receiver, t0) = receiver_20_wpm();
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        let mark_end = t0 + us(60_000);
        let first = receiver.poll_representation(mark_end + us(180_000)).unwrap();
        assert!(!first.is_end_of_word);
        let second = receiver.poll_representation(mark_end + us(500_000)).unwrap();
        assert!(second.is_end_of_word);
        assert_eq!(second.representation, ".");
    }

    #[test]
    fn test_poll_character_and_pending_word_space() {
        let (mut receiver, t0) = receiver_20_wpm();
        // 'A' = ".-".
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        let t1 = t0 + us(120_000);
        receive_mark(&mut receiver, t1, 180_000).unwrap();
        let mark_end = t1 + us(180_000);

        let polled = receiver.poll_character(mark_end + us(180_000)).unwrap();
        assert_eq!(polled.character, 'A');
        assert!(!polled.is_end_of_word);

        // The gap grows into a word boundary: one separator is emitted
        // and the receiver returns to idle.
        let polled = receiver.poll_character(mark_end + us(500_000)).unwrap();
        assert_eq!(polled.character, ' ');
        assert!(polled.is_end_of_word);
        assert_eq!(
            receiver.poll_representation(mark_end + us(600_000)),
            Err(CwError::Range)
        );
    }

    #[test]
    fn test_poll_character_unknown_representation() {
        let (mut receiver, t0) = receiver_20_wpm();
        // Seven dots: well-formed, but not a character.
        let mut ts = t0;
        for _ in 0..7 {
            receiver.add_mark(ts, MarkKind::Dot).unwrap();
            ts += us(120_000);
        }
        assert_eq!(
            receiver.poll_character(ts + us(200_000)),
            Err(CwError::NotFound)
        );
    }

    #[test]
    fn test_new_character_after_gap_poll() {
        let (mut receiver, t0) = receiver_20_wpm();
        receive_mark(&mut receiver, t0, 180_000).unwrap();
        let polled = receiver
            .poll_character(t0 + us(180_000) + us(180_000))
            .unwrap();
        assert_eq!(polled.character, 'T');

        // Next character may begin straight from the gap state.
        let t1 = t0 + us(180_000) + us(240_000);
        receive_mark(&mut receiver, t1, 60_000).unwrap();
        let polled = receiver
            .poll_representation(t1 + us(60_000) + us(180_000))
            .unwrap();
        assert_eq!(polled.representation, ".");
    }

    #[test]
    fn test_add_mark() {
        let (mut receiver, t0) = receiver_20_wpm();
        receiver.add_mark(t0, MarkKind::Dot).unwrap();
        receiver.add_mark(t0 + us(120_000), MarkKind::Dash).unwrap();
        let polled = receiver
            .poll_representation(t0 + us(120_000) + us(180_000))
            .unwrap();
        assert_eq!(polled.representation, ".-");
    }

    #[test]
    fn test_representation_buffer_overflow() {
        let (mut receiver, t0) = receiver_20_wpm();
        let mut ts = t0;
        for _ in 0..REPRESENTATION_CAPACITY - 1 {
            receiver.add_mark(ts, MarkKind::Dot).unwrap();
            ts += us(100_000);
        }
        assert_eq!(
            receiver.add_mark(ts, MarkKind::Dot),
            Err(CwError::NoMemory)
        );
        let polled = receiver.poll_representation(ts + us(400_000)).unwrap();
        assert!(polled.is_error);
    }

    #[test]
    fn test_mark_end_without_begin() {
        let (mut receiver, t0) = receiver_20_wpm();
        assert_eq!(receiver.mark_end(t0), Err(CwError::Range));
    }

    #[test]
    fn test_mark_begin_twice() {
        let (mut receiver, t0) = receiver_20_wpm();
        receiver.mark_begin(t0).unwrap();
        assert_eq!(receiver.mark_begin(t0 + us(1_000)), Err(CwError::Range));
    }

    #[test]
    fn test_backward_timestamp_is_invalid() {
        let (mut receiver, t0) = receiver_20_wpm();
        receiver.mark_begin(t0 + us(100_000)).unwrap();
        assert_eq!(
            receiver.mark_end(t0),
            Err(CwError::Invalid("timestamp"))
        );
    }

    #[test]
    fn test_speed_boundaries_and_busy() {
        let mut receiver = Receiver::new();
        receiver.set_speed(SPEED_MIN as f32).unwrap();
        receiver.set_speed(SPEED_MAX as f32).unwrap();
        assert!(receiver.set_speed(SPEED_MIN as f32 - 1.0).is_err());
        assert!(receiver.set_speed(SPEED_MAX as f32 + 1.0).is_err());

        receiver.enable_adaptive_mode();
        assert_eq!(receiver.set_speed(20.0), Err(CwError::Busy));
        receiver.disable_adaptive_mode();
        receiver.set_speed(20.0).unwrap();
    }

    #[test]
    fn test_adaptive_windows_are_disjoint() {
        let mut receiver = Receiver::new();
        receiver.enable_adaptive_mode();
        receiver.sync_parameters();
        assert!(receiver.windows.dot.max + 1 <= receiver.windows.dash.min);
    }

    #[test]
    fn test_adaptive_threshold_is_average_midpoint() {
        let mut receiver = Receiver::new();
        receiver.set_speed(20.0).unwrap();
        receiver.enable_adaptive_mode();
        receiver.sync_parameters();
        let expected =
            (receiver.dot_average.average() + receiver.dash_average.average()) / 2;
        assert_eq!(receiver.get_adaptive_speed_threshold(), expected);
        assert_eq!(expected, 2 * 60_000);
    }

    #[test]
    fn test_adaptive_speed_tracks_a_faster_sender() {
        let mut receiver = Receiver::new();
        receiver.set_speed(20.0).unwrap();
        receiver.enable_adaptive_mode();

        // A 24 WPM sender: 50 ms dots, 150 ms dashes. Once both
        // averaging windows have filled with the sender's durations,
        // the threshold settles at their midpoint.
        let mut ts = Instant::now();
        for _ in 0..AVERAGING_LENGTH {
            receiver.mark_begin(ts).unwrap();
            receiver.mark_end(ts + us(50_000)).unwrap();
            ts += us(100_000);
            receiver.mark_begin(ts).unwrap();
            receiver.mark_end(ts + us(150_000)).unwrap();
            ts += us(200_000);
            receiver.reset_state();
        }

        let speed = receiver.get_speed();
        assert!(
            (23.0..=25.0).contains(&speed),
            "tracked speed {speed} should approach 24 wpm"
        );
        assert_eq!(receiver.get_adaptive_speed_threshold(), 100_000);
    }

    #[test]
    fn test_adaptive_speed_is_clamped() {
        let mut receiver = Receiver::new();
        receiver.set_speed(SPEED_MAX as f32).unwrap();
        receiver.enable_adaptive_mode();
        // An absurdly fast sender cannot push the speed past the cap.
        let mut ts = Instant::now();
        for _ in 0..AVERAGING_LENGTH * 2 {
            receiver.mark_begin(ts).unwrap();
            let _ = receiver.mark_end(ts + us(11_000));
            ts += us(30_000);
            receiver.reset_state();
        }
        assert!(receiver.get_speed() <= SPEED_MAX as f32);
    }

    #[test]
    fn test_statistics_collection_and_reset() {
        let (mut receiver, t0) = receiver_20_wpm();
        receive_mark(&mut receiver, t0, 66_000).unwrap();
        let t1 = t0 + us(130_000);
        receive_mark(&mut receiver, t1, 170_000).unwrap();

        let stats = receiver.get_statistics();
        assert_eq!(stats.len(), 3); // dot, inter-mark space, dash
        assert_eq!(stats[0], DurationStat { kind: StatKind::Dot, delta: 6_000 });
        assert_eq!(
            stats[1],
            DurationStat { kind: StatKind::InterMarkSpace, delta: 4_000 }
        );
        assert_eq!(
            stats[2],
            DurationStat { kind: StatKind::Dash, delta: -10_000 }
        );

        receiver.reset_statistics();
        assert!(receiver.get_statistics().is_empty());
    }

    #[test]
    fn test_reset_state_keeps_parameters() {
        let (mut receiver, t0) = receiver_20_wpm();
        receive_mark(&mut receiver, t0, 60_000).unwrap();
        receiver.reset_state();
        assert_eq!(receiver.get_speed(), 20.0);
        assert_eq!(
            receiver.poll_representation(t0 + us(500_000)),
            Err(CwError::Range)
        );
        // Ready for a fresh character.
        receiver.mark_begin(t0 + us(600_000)).unwrap();
    }
}
