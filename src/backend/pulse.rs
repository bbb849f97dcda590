//! PulseAudio sink via the simple blocking API.

use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use log::debug;

use crate::constants::SUPPORTED_SAMPLE_RATES;
use crate::{CwError, Result};

use super::SoundBackend;

const APPLICATION_NAME: &str = "cwkit";
const STREAM_DESCRIPTION: &str = "CW tones";

/// PCM sink streaming to a PulseAudio server. `Simple::write` blocks
/// until the server has taken the frames, and the server recovers
/// underruns on its own, so no explicit re-prepare is needed.
pub(crate) struct PulseBackend {
    device: Option<String>,
    stream: Option<Simple>,
    sample_rate: u32,
}

// A pa_simple connection is not tied to the thread that opened it, and
// the generator worker is its only user once handed over.
unsafe impl Send for PulseBackend {}

impl PulseBackend {
    pub(crate) fn new(device: Option<&str>) -> Self {
        PulseBackend {
            device: device.map(str::to_string),
            stream: None,
            sample_rate: SUPPORTED_SAMPLE_RATES[0],
        }
    }
}

impl SoundBackend for PulseBackend {
    fn name(&self) -> &'static str {
        "pulseaudio"
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let spec = Spec {
            format: Format::S16NE,
            channels: 1,
            rate: SUPPORTED_SAMPLE_RATES[0],
        };
        if !spec.is_valid() {
            return Err(CwError::Backend("pulseaudio: invalid sample spec".into()));
        }
        let stream = Simple::new(
            None,
            APPLICATION_NAME,
            Direction::Playback,
            self.device.as_deref(),
            STREAM_DESCRIPTION,
            &spec,
            None,
            None,
        )
        .map_err(|e| CwError::Backend(format!("pulseaudio: cannot connect: {e}")))?;
        debug!("pulseaudio: connected at {} Hz", spec.rate);
        self.sample_rate = spec.rate;
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.drain();
        }
    }

    fn is_pcm(&self) -> bool {
        true
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(CwError::Backend("pulseaudio: stream is not open".into()));
        };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                samples.as_ptr() as *const u8,
                samples.len() * std::mem::size_of::<i16>(),
            )
        };
        stream
            .write(bytes)
            .map_err(|e| CwError::Backend(format!("pulseaudio: write failed: {e}")))
    }

    fn silence(&mut self) {
        if let Some(stream) = self.stream.as_ref() {
            let _ = stream.flush();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn period_frames(&self) -> usize {
        // The simple API has no period negotiation; 20 ms chunks keep
        // key-up latency acceptable.
        (self.sample_rate / 50) as usize
    }
}
