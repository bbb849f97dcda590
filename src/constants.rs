//! Library-wide constants
//!
//! Parameter ranges and initial values shared by the generator, the key
//! and the receiver, plus the audio constants used during backend
//! negotiation. All durations are in microseconds unless noted.

/// Dot duration calibration: `unit_us = DOT_CALIBRATION / speed_wpm`.
///
/// Calibrated on the standard word "PARIS" (50 units long), so one dot
/// at 1 WPM lasts 1.2 seconds.
pub const DOT_CALIBRATION: u32 = 1_200_000;

/// Lowest supported sending/receiving speed in words per minute.
pub const SPEED_MIN: u32 = 4;
/// Highest supported sending/receiving speed in words per minute.
pub const SPEED_MAX: u32 = 60;
/// Initial speed of a newly created generator or receiver.
pub const SPEED_INITIAL: u32 = 12;

/// Lowest tone frequency in Hz. Zero renders silence.
pub const FREQUENCY_MIN: u32 = 0;
/// Highest tone frequency in Hz.
pub const FREQUENCY_MAX: u32 = 4_000;
/// Initial tone frequency of a newly created generator.
pub const FREQUENCY_INITIAL: u32 = 800;

/// Lowest volume in percent (silent).
pub const VOLUME_MIN: u32 = 0;
/// Highest volume in percent.
pub const VOLUME_MAX: u32 = 100;
/// Initial volume of a newly created generator.
pub const VOLUME_INITIAL: u32 = 70;

/// Lowest extra inter-character gap, in dot units.
pub const GAP_MIN: u32 = 0;
/// Highest extra inter-character gap, in dot units.
pub const GAP_MAX: u32 = 60;
/// Initial gap of a newly created generator.
pub const GAP_INITIAL: u32 = 0;

/// Lowest dot/dash weighting in percent.
pub const WEIGHTING_MIN: u32 = 20;
/// Highest dot/dash weighting in percent.
pub const WEIGHTING_MAX: u32 = 80;
/// Neutral weighting: dots are exactly one unit, dashes three.
pub const WEIGHTING_INITIAL: u32 = 50;

/// Lowest receiver tolerance in percent.
pub const TOLERANCE_MIN: u32 = 0;
/// Highest receiver tolerance in percent.
pub const TOLERANCE_MAX: u32 = 90;
/// Initial receiver tolerance.
pub const TOLERANCE_INITIAL: u32 = 50;

/// Initial receiver noise-spike threshold in microseconds. Marks
/// shorter than the threshold are rejected as noise.
pub const NOISE_SPIKE_THRESHOLD_INITIAL: u32 = 10_000;

/// Initial tone slope (envelope rise/fall) duration in microseconds.
pub const SLOPE_DURATION_INITIAL: u32 = 5_000;

/// Capacity of a generator's tone queue.
pub const TONE_QUEUE_CAPACITY: usize = 3_000;

/// Sample rates offered to a PCM backend during negotiation, probed in
/// this order; the first rate the device accepts wins.
pub const SUPPORTED_SAMPLE_RATES: [u32; 7] =
    [48_000, 44_100, 32_000, 22_050, 16_000, 11_025, 8_000];

/// Maximum accepted length of a sound device name, in bytes.
pub const DEVICE_NAME_MAX: usize = 128;
