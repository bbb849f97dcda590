//! Tone generator
//!
//! Owns the tone queue and a dedicated dequeue-and-render worker that
//! synthesizes phase-continuous sine PCM (or drives a gate sink) for
//! every queued tone.
//!
//! Features:
//! - Five user parameters: speed, frequency, volume, gap, weighting
//! - Lazy, idempotent timing resynchronization from the PARIS dot unit
//! - Slope-shaped tone edges (linear / raised cosine / sine / rectangular)
//! - Layered enqueue API from raw marks up to whole strings
//! - Queue-level and value-tracking client callbacks
//! - Cooperative worker shutdown with a bounded join

mod slope;

pub use slope::SlopeShape;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{trace, warn};
use parking_lot::Mutex;

use crate::backend::{open_backend, SoundBackend, SoundSystem};
use crate::constants::{
    DOT_CALIBRATION, FREQUENCY_INITIAL, FREQUENCY_MAX, GAP_INITIAL, GAP_MAX,
    SLOPE_DURATION_INITIAL, SPEED_INITIAL, SPEED_MAX, SPEED_MIN, TONE_QUEUE_CAPACITY,
    VOLUME_INITIAL, VOLUME_MAX, WEIGHTING_INITIAL, WEIGHTING_MAX, WEIGHTING_MIN,
};
use crate::key::Key;
use crate::morse;
use crate::tone_queue::{LowWaterCallback, SlopeMode, Tone, ToneQueue};
use crate::{CwError, Result};

/// One keyer tick: a mark, or the inter-mark space between marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Symbol {
    Dot,
    Dash,
    Space,
}

/// User-visible generator parameters, as one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeneratorConfig {
    /// Sending speed in words per minute.
    pub speed: u32,
    /// Tone frequency in Hz.
    pub frequency: u32,
    /// Volume in percent.
    pub volume: u32,
    /// Extra inter-character gap in dot units.
    pub gap: u32,
    /// Dot/dash weighting in percent.
    pub weighting: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            speed: SPEED_INITIAL,
            frequency: FREQUENCY_INITIAL,
            volume: VOLUME_INITIAL,
            gap: GAP_INITIAL,
            weighting: WEIGHTING_INITIAL,
        }
    }
}

/// Derived timing durations, all in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timings {
    /// The elementary unit: `1_200_000 / speed`.
    pub unit: u32,
    /// Dot duration after weighting.
    pub dot: u32,
    /// Dash duration after weighting.
    pub dash: u32,
    /// Inter-mark space following every dot or dash.
    pub inter_mark_space: u32,
    /// Extra space completing an inter-character boundary.
    pub inter_character_space: u32,
    /// Extra space completing an inter-word boundary.
    pub inter_word_space: u32,
}

struct Params {
    config: GeneratorConfig,
    slope_shape: SlopeShape,
    slope_duration: u32,
    in_sync: bool,
    timings: Timings,
    /// Rising-slope amplitudes with the current volume baked in.
    amplitudes: Arc<Vec<f64>>,
    /// Full-amplitude level between the slopes.
    peak: f64,
}

struct Tracking {
    value: bool,
    callback: Option<Box<dyn FnMut(bool) + Send>>,
}

/// The tone generator: parameters, tone queue, sound backend and the
/// worker thread rendering queued tones in real time.
///
/// A generator is shared behind an [`Arc`]; the worker holds one clone
/// and an attached [`Key`] another.
pub struct Generator {
    queue: ToneQueue,
    params: Mutex<Params>,
    backend: Mutex<Box<dyn SoundBackend>>,
    running: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    key: Mutex<Option<Weak<Key>>>,
    tracking: Mutex<Tracking>,
    sample_rate: u32,
    period_frames: usize,
    is_pcm: bool,
}

impl Generator {
    /// Create a generator rendering into the given sound system, with
    /// all parameters at their initial values. The backend is opened
    /// (and the sample rate negotiated) immediately; the worker does
    /// not run until [`start`](Self::start).
    pub fn new(system: SoundSystem, device: Option<&str>) -> Result<Arc<Self>> {
        let backend = open_backend(system, device)?;
        Ok(Self::from_backend(backend))
    }

    pub(crate) fn from_backend(backend: Box<dyn SoundBackend>) -> Arc<Self> {
        let sample_rate = backend.sample_rate();
        let period_frames = backend.period_frames().max(1);
        let is_pcm = backend.is_pcm();
        Arc::new(Generator {
            queue: ToneQueue::new(TONE_QUEUE_CAPACITY),
            params: Mutex::new(Params {
                config: GeneratorConfig::default(),
                slope_shape: SlopeShape::default(),
                slope_duration: SLOPE_DURATION_INITIAL,
                in_sync: false,
                timings: Timings {
                    unit: 0,
                    dot: 0,
                    dash: 0,
                    inter_mark_space: 0,
                    inter_character_space: 0,
                    inter_word_space: 0,
                },
                amplitudes: Arc::new(Vec::new()),
                peak: 0.0,
            }),
            backend: Mutex::new(backend),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
            key: Mutex::new(None),
            tracking: Mutex::new(Tracking {
                value: false,
                callback: None,
            }),
            sample_rate,
            period_frames,
            is_pcm,
        })
    }

    // --- parameters -----------------------------------------------------

    /// Set the sending speed in words per minute.
    pub fn set_speed(&self, speed: u32) -> Result<()> {
        if !(SPEED_MIN..=SPEED_MAX).contains(&speed) {
            return Err(CwError::Invalid("speed"));
        }
        let mut params = self.params.lock();
        if params.config.speed != speed {
            params.config.speed = speed;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Set the tone frequency in Hz. Zero renders silent marks.
    pub fn set_frequency(&self, frequency: u32) -> Result<()> {
        if frequency > FREQUENCY_MAX {
            return Err(CwError::Invalid("frequency"));
        }
        let mut params = self.params.lock();
        if params.config.frequency != frequency {
            params.config.frequency = frequency;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Set the volume in percent.
    pub fn set_volume(&self, volume: u32) -> Result<()> {
        if volume > VOLUME_MAX {
            return Err(CwError::Invalid("volume"));
        }
        let mut params = self.params.lock();
        if params.config.volume != volume {
            params.config.volume = volume;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Set the extra inter-character gap in dot units.
    ///
    /// The gap stays local to this generator; an associated receiver is
    /// never touched.
    pub fn set_gap(&self, gap: u32) -> Result<()> {
        if gap > GAP_MAX {
            return Err(CwError::Invalid("gap"));
        }
        let mut params = self.params.lock();
        if params.config.gap != gap {
            params.config.gap = gap;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Set the dot/dash weighting in percent.
    pub fn set_weighting(&self, weighting: u32) -> Result<()> {
        if !(WEIGHTING_MIN..=WEIGHTING_MAX).contains(&weighting) {
            return Err(CwError::Invalid("weighting"));
        }
        let mut params = self.params.lock();
        if params.config.weighting != weighting {
            params.config.weighting = weighting;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Set the slope shape and duration (µs) applied to tone edges.
    pub fn set_slope(&self, shape: SlopeShape, duration_us: u32) -> Result<()> {
        let mut params = self.params.lock();
        if params.slope_shape != shape || params.slope_duration != duration_us {
            params.slope_shape = shape;
            params.slope_duration = duration_us;
            params.in_sync = false;
        }
        Ok(())
    }

    /// Apply a whole parameter snapshot.
    pub fn configure(&self, config: &GeneratorConfig) -> Result<()> {
        self.set_speed(config.speed)?;
        self.set_frequency(config.frequency)?;
        self.set_volume(config.volume)?;
        self.set_gap(config.gap)?;
        self.set_weighting(config.weighting)
    }

    /// Current sending speed in words per minute.
    pub fn get_speed(&self) -> u32 {
        self.params.lock().config.speed
    }

    /// Current tone frequency in Hz.
    pub fn get_frequency(&self) -> u32 {
        self.params.lock().config.frequency
    }

    /// Current volume in percent.
    pub fn get_volume(&self) -> u32 {
        self.params.lock().config.volume
    }

    /// Current extra inter-character gap in dot units.
    pub fn get_gap(&self) -> u32 {
        self.params.lock().config.gap
    }

    /// Current dot/dash weighting in percent.
    pub fn get_weighting(&self) -> u32 {
        self.params.lock().config.weighting
    }

    /// Current parameter snapshot.
    pub fn config(&self) -> GeneratorConfig {
        self.params.lock().config
    }

    /// Current slope shape.
    pub fn get_slope_shape(&self) -> SlopeShape {
        self.params.lock().slope_shape
    }

    /// Current slope duration in microseconds.
    pub fn get_slope_duration(&self) -> u32 {
        self.params.lock().slope_duration
    }

    /// Negotiated audio sample rate in Hz.
    pub fn get_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Derived timing durations, resynchronized first if needed.
    pub fn timings(&self) -> Timings {
        let mut params = self.params.lock();
        self.sync_locked(&mut params);
        params.timings
    }

    /// Recompute the derived timings and slope table. Idempotent; every
    /// operation that consumes timing calls this lazily.
    fn sync_locked(&self, params: &mut Params) {
        if params.in_sync {
            return;
        }
        let unit = DOT_CALIBRATION / params.config.speed;
        let delta = 2 * (i64::from(params.config.weighting) - 50) * i64::from(unit) / 100;
        let dot = (i64::from(unit) + delta) as u32;
        let dash = 3 * dot;
        let additional = 3 * params.config.gap * unit;
        let adjustment = 7 * additional / 3;
        params.timings = Timings {
            unit,
            dot,
            dash,
            inter_mark_space: unit,
            inter_character_space: 2 * unit + additional,
            inter_word_space: 4 * unit + adjustment,
        };
        params.peak = f64::from(i16::MAX) * f64::from(params.config.volume) / 100.0;
        let n = slope::slope_sample_count(params.slope_duration, self.sample_rate);
        params.amplitudes = Arc::new(slope::amplitude_table(
            params.slope_shape,
            n,
            params.peak,
        ));
        params.in_sync = true;
        trace!(
            "generator: resynchronized at {} wpm, unit {} us",
            params.config.speed,
            unit
        );
    }

    /// Duration of one forever-tone rendering quantum, in µs.
    fn quantum_us(&self) -> u32 {
        (self.period_frames as u64 * 1_000_000 / u64::from(self.sample_rate)) as u32
    }

    // --- enqueue primitives ---------------------------------------------

    /// Begin an open-ended mark: a forever tone at the set frequency,
    /// replaced when the next tone arrives. Used by the straight key on
    /// key-down.
    pub fn enqueue_begin_mark(&self) -> Result<()> {
        let frequency = {
            let mut params = self.params.lock();
            self.sync_locked(&mut params);
            params.config.frequency
        };
        self.queue.enqueue(Tone {
            frequency,
            duration: self.quantum_us(),
            slope_mode: SlopeMode::RisingOnly,
            is_forever: true,
            is_first: false,
        })
    }

    /// Begin an open-ended space: a falling edge at the set frequency
    /// followed by forever silence. Used by the straight key on key-up.
    pub fn enqueue_begin_space(&self) -> Result<()> {
        let (frequency, slope_duration) = {
            let mut params = self.params.lock();
            self.sync_locked(&mut params);
            (params.config.frequency, params.slope_duration)
        };
        self.queue.enqueue(Tone {
            frequency,
            duration: slope_duration,
            slope_mode: SlopeMode::FallingOnly,
            is_forever: false,
            is_first: false,
        })?;
        self.queue.enqueue(Tone {
            frequency: 0,
            duration: self.quantum_us(),
            slope_mode: SlopeMode::NoSlopes,
            is_forever: true,
            is_first: false,
        })
    }

    /// Enqueue one dot or dash plus its trailing inter-mark space.
    pub(crate) fn enqueue_mark(&self, symbol: Symbol, is_first: bool) -> Result<()> {
        let (frequency, timings) = {
            let mut params = self.params.lock();
            self.sync_locked(&mut params);
            (params.config.frequency, params.timings)
        };
        let duration = match symbol {
            Symbol::Dot => timings.dot,
            Symbol::Dash => timings.dash,
            Symbol::Space => return Err(CwError::Invalid("mark symbol")),
        };
        self.queue.enqueue(Tone {
            frequency,
            duration,
            slope_mode: SlopeMode::Standard,
            is_forever: false,
            is_first,
        })?;
        self.queue.enqueue(Tone::silence(timings.inter_mark_space))
    }

    /// Enqueue a single keyer tick: one mark or one inter-mark space,
    /// with no trailing space attached. The tick's own duration is what
    /// advances the iambic state machine.
    pub(crate) fn enqueue_symbol_no_ims(&self, symbol: Symbol) -> Result<()> {
        let (frequency, timings) = {
            let mut params = self.params.lock();
            self.sync_locked(&mut params);
            (params.config.frequency, params.timings)
        };
        let tone = match symbol {
            Symbol::Dot => Tone::new(frequency, timings.dot),
            Symbol::Dash => Tone::new(frequency, timings.dash),
            Symbol::Space => Tone::silence(timings.inter_mark_space),
        };
        self.queue.enqueue(tone)
    }

    /// Pad the already-sent inter-mark space up to a full
    /// inter-character boundary.
    pub fn enqueue_eoc_space(&self) -> Result<()> {
        let timings = self.timings();
        self.queue
            .enqueue(Tone::silence(timings.inter_character_space))
    }

    /// Pad the already-sent inter-character boundary up to a full
    /// inter-word boundary.
    pub fn enqueue_eow_space(&self) -> Result<()> {
        let timings = self.timings();
        self.queue.enqueue(Tone::silence(timings.inter_word_space))
    }

    /// Enqueue a dot/dash representation, closing it with an
    /// inter-character space.
    pub fn enqueue_representation(&self, representation: &str) -> Result<()> {
        self.enqueue_representation_no_ics(representation)?;
        self.enqueue_eoc_space()
    }

    /// Enqueue a dot/dash representation without the closing
    /// inter-character space.
    pub fn enqueue_representation_no_ics(&self, representation: &str) -> Result<()> {
        if !morse::representation_is_valid(representation) {
            return Err(CwError::Invalid("representation"));
        }
        for (index, symbol) in representation.bytes().enumerate() {
            let symbol = if symbol == b'.' { Symbol::Dot } else { Symbol::Dash };
            self.enqueue_mark(symbol, index == 0)?;
        }
        Ok(())
    }

    /// Enqueue a character, closing it with an inter-character space.
    /// A space character enqueues an inter-word space instead.
    pub fn enqueue_character(&self, character: char) -> Result<()> {
        if character == ' ' {
            return self.enqueue_eow_space();
        }
        let representation = morse::character_to_representation(character)?;
        self.enqueue_representation(representation)
    }

    /// Enqueue a character without the closing inter-character space.
    pub fn enqueue_character_no_ics(&self, character: char) -> Result<()> {
        if character == ' ' {
            return self.enqueue_eow_space();
        }
        let representation = morse::character_to_representation(character)?;
        self.enqueue_representation_no_ics(representation)
    }

    /// Enqueue a whole string. The string is validated up front, so an
    /// unknown character fails the call before anything is queued.
    pub fn enqueue_string(&self, string: &str) -> Result<()> {
        if !string.chars().all(morse::character_is_valid) {
            return Err(CwError::NotFound);
        }
        for character in string.chars() {
            self.enqueue_character(character)?;
        }
        Ok(())
    }

    // --- queue facade ---------------------------------------------------

    /// Drop every queued tone and silence the sink.
    pub fn flush_queue(&self) {
        self.queue.flush();
        if let Some(mut backend) = self.backend.try_lock_for(Duration::from_millis(200)) {
            backend.silence();
        }
    }

    /// Block until at most `level` tones remain queued.
    pub fn wait_for_queue_level(&self, level: usize) {
        self.queue.wait_for_level(level);
    }

    /// Block until the tone currently being rendered has finished.
    pub fn wait_for_end_of_current_tone(&self) {
        self.queue.wait_for_end_of_current_tone();
    }

    /// True when the tone queue cannot accept another tone.
    pub fn is_queue_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Number of tones currently queued.
    pub fn get_queue_length(&self) -> usize {
        self.queue.length()
    }

    /// Drop the most recently enqueued, still-buffered character.
    pub fn remove_last_character(&self) -> Result<()> {
        self.queue.remove_last_character()
    }

    /// Register a callback fired when the queue level drops to `level`.
    pub fn register_low_level_callback(
        &self,
        callback: Option<LowWaterCallback>,
        level: usize,
    ) -> Result<()> {
        self.queue.set_low_water_callback(callback, level)
    }

    /// Register a callback fired when the rendered signal transitions
    /// between mark and space.
    pub fn register_value_tracking_callback(
        &self,
        callback: Option<Box<dyn FnMut(bool) + Send>>,
    ) {
        self.tracking.lock().callback = callback;
    }

    // --- key wiring -----------------------------------------------------

    pub(crate) fn attach_key(&self, key: Weak<Key>) {
        *self.key.lock() = Some(key);
    }

    pub(crate) fn detach_key(&self) {
        *self.key.lock() = None;
    }

    // --- worker ---------------------------------------------------------

    /// Start the dequeue-and-render worker.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let generator = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("cw-generator".into())
            .spawn(move || generator.dequeue_and_generate())
            .map_err(|e| CwError::Backend(format!("cannot spawn worker: {e}")))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop the worker: flush the queue, silence the sink, clear the
    /// run flag, wake the worker and join it. A worker stuck in a long
    /// backend write is detached after one second.
    pub fn stop(&self) {
        self.flush_queue();
        self.running.store(false, Ordering::SeqCst);
        self.queue.wake_consumer();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + Duration::from_secs(1);
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("generator worker did not stop within 1 s; detaching");
            }
        }
    }

    /// True while the worker runs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn track_value(&self, tone: &Tone) {
        let on = tone.frequency > 0 && tone.duration > 0;
        let mut tracking = self.tracking.lock();
        if tracking.value != on {
            tracking.value = on;
            if let Some(callback) = tracking.callback.as_mut() {
                callback(on);
            }
        }
    }

    fn notify_key(&self) {
        let weak = self.key.lock().clone();
        if let Some(key) = weak.and_then(|weak| weak.upgrade()) {
            key.generator_finished_tone();
        }
    }

    /// The worker loop: dequeue, render, notify.
    fn dequeue_and_generate(self: Arc<Self>) {
        let mut phase = 0.0f64;
        let mut buffer: Vec<i16> = Vec::with_capacity(self.period_frames);
        let mut forever_engaged = false;

        while self.running.load(Ordering::SeqCst) {
            let Some(tone) = self.queue.dequeue_blocking(&self.running) else {
                break;
            };
            trace!(
                "generator: tone {} Hz for {} us",
                tone.frequency,
                tone.duration
            );
            self.track_value(&tone);

            // A re-issued forever tone keeps its amplitude; only its
            // first rendering gets the rising edge.
            let slope_mode = if tone.is_forever && forever_engaged {
                SlopeMode::NoSlopes
            } else {
                tone.slope_mode
            };
            forever_engaged = tone.is_forever;

            let completed = if self.is_pcm {
                self.render_tone(&tone, slope_mode, &mut phase, &mut buffer)
            } else {
                self.gate_tone(&tone)
            };
            if !completed {
                break;
            }
            if !tone.is_forever {
                self.notify_key();
                self.queue.tone_completed();
            }
        }
        // Release anyone waiting for the tone that was in flight.
        self.queue.tone_completed();
        trace!("generator: worker exits");
    }

    /// Render one tone as PCM, chunk by chunk. Returns false when the
    /// run flag was cleared mid-tone.
    fn render_tone(
        &self,
        tone: &Tone,
        slope_mode: SlopeMode,
        phase: &mut f64,
        buffer: &mut Vec<i16>,
    ) -> bool {
        let (amplitudes, peak) = {
            let mut params = self.params.lock();
            self.sync_locked(&mut params);
            (Arc::clone(&params.amplitudes), params.peak)
        };
        let n_samples =
            (u64::from(tone.duration) * u64::from(self.sample_rate) / 1_000_000) as usize;
        let n_slope = amplitudes.len();
        let (n_rising, n_falling) = match slope_mode {
            SlopeMode::NoSlopes => (0, 0),
            SlopeMode::RisingOnly => (n_slope.min(n_samples), 0),
            SlopeMode::FallingOnly => (0, n_slope.min(n_samples)),
            SlopeMode::Standard => {
                let rising = n_slope.min(n_samples);
                (rising, n_slope.min(n_samples - rising))
            }
        };
        let phase_increment =
            2.0 * std::f64::consts::PI * f64::from(tone.frequency) / f64::from(self.sample_rate);

        let mut rendered = 0usize;
        while rendered < n_samples {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let chunk = self.period_frames.min(n_samples - rendered);
            buffer.clear();
            for index in rendered..rendered + chunk {
                let amplitude = if tone.frequency == 0 {
                    0.0
                } else if index < n_rising {
                    amplitudes[index]
                } else if index >= n_samples - n_falling {
                    amplitudes[n_samples - 1 - index]
                } else {
                    peak
                };
                buffer.push((amplitude * phase.sin()) as i16);
                *phase += phase_increment;
            }
            while *phase > 2.0 * std::f64::consts::PI {
                *phase -= 2.0 * std::f64::consts::PI;
            }
            // Underruns are recovered inside the backend and only
            // warned about; the tone's remaining samples are dropped.
            if self.backend.lock().write_samples(buffer).is_err() {
                return true;
            }
            rendered += chunk;
        }
        true
    }

    /// Drive a gate sink for one tone, in quanta so a stop request is
    /// honored promptly. Returns false when the run flag was cleared.
    fn gate_tone(&self, tone: &Tone) -> bool {
        let quantum = self.quantum_us().max(1_000);
        let mut remaining = tone.duration;
        while remaining > 0 {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let chunk = remaining.min(quantum);
            if self.backend.lock().write_gate(tone.frequency, chunk).is_err() {
                return true;
            }
            remaining -= chunk;
        }
        true
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}
