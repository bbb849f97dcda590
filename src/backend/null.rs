//! Null sink: no I/O, real-time pacing only.

use std::thread;
use std::time::Duration;

use crate::constants::SUPPORTED_SAMPLE_RATES;
use crate::Result;

use super::SoundBackend;

/// Gate sink that sleeps for each tone's duration and discards the
/// sound. Always reachable; useful for tests and for driving the keyer
/// and queue machinery without audio hardware.
pub(crate) struct NullBackend;

impl NullBackend {
    pub(crate) fn new() -> Self {
        NullBackend
    }
}

impl SoundBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn is_pcm(&self) -> bool {
        false
    }

    fn write_gate(&mut self, _frequency: u32, duration_us: u32) -> Result<()> {
        if duration_us > 0 {
            thread::sleep(Duration::from_micros(u64::from(duration_us)));
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        SUPPORTED_SAMPLE_RATES[0]
    }

    fn period_frames(&self) -> usize {
        // Matches a 20 ms period at the nominal rate.
        (self.sample_rate() / 50) as usize
    }
}
