//! Morse code (CW) signal engine
//!
//! A library that turns characters into audible continuous-wave tones
//! and, symmetrically, turns observed key-down/key-up timings back into
//! characters.
//!
//! # Features
//! - Real-time sine synthesis with slope-shaped tone edges, driven by a
//!   bounded tone queue and a dedicated render worker
//! - Pluggable sound backends: Null, console beeper, OSS, ALSA and
//!   PulseAudio, each behind its own Cargo feature
//! - Straight key and Curtis 8044 mode A/B iambic keyer state machines
//! - Timestamp-driven receiver with fixed or adaptive (speed-tracking)
//!   mark classification
//! - Compiled-in bidirectional Morse dictionary with procedural signs
//!   and phonetics
//!
//! # Crate feature flags
//! - `console` (default): PC-speaker sink via the KIOCSOUND ioctl
//! - `oss` (default): OSS `/dev/dsp` PCM sink
//! - `alsa` (opt-in): ALSA PCM sink (links libasound)
//! - `pulseaudio` (opt-in): PulseAudio sink (links libpulse)
//! - `serde` (opt-in): serde derives on parameter snapshot types
//!
//! # Quick start
//! ## Send a string
//! ```no_run
//! use cwkit::{Generator, SoundSystem};
//!
//! let generator = Generator::new(SoundSystem::SoundCard, None).unwrap();
//! generator.set_speed(20).unwrap();
//! generator.start().unwrap();
//! generator.enqueue_string("CQ CQ DE N0CALL").unwrap();
//! generator.wait_for_queue_level(0);
//! generator.stop();
//! ```
//!
//! ## Key by hand
//! ```no_run
//! use cwkit::{Generator, Key, KeyValue, SoundSystem};
//!
//! let generator = Generator::new(SoundSystem::Null, None).unwrap();
//! generator.start().unwrap();
//! let key = Key::new();
//! key.attach_generator(&generator);
//! key.ik_notify_paddle_event(KeyValue::Closed, KeyValue::Open).unwrap();
//! // dots stream until the paddle opens again
//! ```
//!
//! ## Receive
//! ```
//! use cwkit::Receiver;
//! use std::time::{Duration, Instant};
//!
//! let mut receiver = Receiver::new();
//! receiver.set_speed(20.0).unwrap();
//! let t0 = Instant::now();
//! receiver.mark_begin(t0).unwrap();
//! receiver.mark_end(t0 + Duration::from_micros(60_000)).unwrap();
//! let polled = receiver
//!     .poll_representation(t0 + Duration::from_micros(400_000))
//!     .unwrap();
//! assert_eq!(polled.representation, ".");
//! ```

#![warn(missing_docs)]

pub mod backend;
pub mod constants;
pub mod generator;
pub mod key;
pub mod morse;
pub mod receiver;
pub mod tone_queue;

/// Error kinds surfaced by the library.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CwError {
    /// Out-of-range parameter, malformed representation or bad
    /// timestamp. Carries the name of the offending value.
    #[error("invalid value: {0}")]
    Invalid(&'static str),

    /// The tone queue cannot accept another tone.
    #[error("tone queue is full")]
    Full,

    /// A character has no representation, or a representation no
    /// character.
    #[error("no dictionary mapping found")]
    NotFound,

    /// The receiver's representation buffer is exhausted.
    #[error("representation buffer exhausted")]
    NoMemory,

    /// A mark was rejected as a noise spike.
    #[error("mark rejected as noise")]
    Noise,

    /// A mark fits neither the dot nor the dash window.
    #[error("mark fits neither dot nor dash")]
    BadMark,

    /// Poll called before the character is complete.
    #[error("character not yet complete")]
    Again,

    /// Operation attempted in a state that does not permit it.
    #[error("operation not permitted in this state")]
    Range,

    /// Fixed speed cannot be set while adaptive mode is enabled.
    #[error("receiver is busy tracking speed adaptively")]
    Busy,

    /// A sound backend failed to open, write or recover.
    #[error("sound backend error: {0}")]
    Backend(String),
}

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, CwError>;

// Public API exports
pub use backend::{probe, SoundSystem};
pub use generator::{Generator, GeneratorConfig, SlopeShape, Timings};
pub use key::{Key, KeyValue};
pub use receiver::{
    DurationStat, MarkKind, PolledCharacter, PolledRepresentation, Receiver, StatKind,
};
pub use tone_queue::{SlopeMode, Tone};
