//! Sound backends
//!
//! Uniform interface to the sinks a generator can render into. Two
//! families exist:
//!
//! - **PCM sinks** (OSS, ALSA, PulseAudio) receive rendered signed
//!   16-bit native-endian mono frames; a write blocks until the frames
//!   have been handed to the kernel or sound server.
//! - **Gate sinks** (Null, Console) cannot play arbitrary waveforms and
//!   instead receive frequency/duration pairs. The Null sink only
//!   sleeps, emulating real-time pacing; the Console sink programs the
//!   PC-speaker beeper.
//!
//! Each real sink is opt-in via a Cargo feature so default builds carry
//! no system audio library requirements.

use crate::constants::DEVICE_NAME_MAX;
use crate::{CwError, Result};

mod null;
pub(crate) use null::NullBackend;

#[cfg(feature = "console")]
mod console;
#[cfg(feature = "console")]
pub(crate) use console::ConsoleBackend;

#[cfg(feature = "oss")]
mod oss;
#[cfg(feature = "oss")]
pub(crate) use oss::OssBackend;

#[cfg(feature = "alsa")]
mod alsa;
#[cfg(feature = "alsa")]
pub(crate) use self::alsa::AlsaBackend;

#[cfg(feature = "pulseaudio")]
mod pulse;
#[cfg(feature = "pulseaudio")]
pub(crate) use pulse::PulseBackend;

/// Identifier of a sound backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SoundSystem {
    /// No I/O; writes sleep to emulate real-time pacing.
    Null,
    /// PC-speaker beeper via the KIOCSOUND console ioctl.
    Console,
    /// OSS `/dev/dsp` PCM sink.
    Oss,
    /// ALSA PCM sink.
    Alsa,
    /// PulseAudio simple-API sink.
    PulseAudio,
    /// First reachable of PulseAudio, ALSA, OSS.
    SoundCard,
}

impl SoundSystem {
    /// Human-readable backend label.
    pub fn label(&self) -> &'static str {
        match self {
            SoundSystem::Null => "null",
            SoundSystem::Console => "console",
            SoundSystem::Oss => "oss",
            SoundSystem::Alsa => "alsa",
            SoundSystem::PulseAudio => "pulseaudio",
            SoundSystem::SoundCard => "soundcard",
        }
    }
}

/// Capability set every sink provides.
///
/// `open` negotiates sample rate and period size, `close` releases the
/// device, and exactly one of the write methods is meaningful per sink
/// family (`is_pcm` tells which). Writes block until the sink has
/// accepted the audio, which is what paces the generator worker.
pub(crate) trait SoundBackend: Send {
    /// Backend label for diagnostics.
    fn name(&self) -> &'static str;

    /// Open the device and negotiate parameters.
    fn open(&mut self) -> Result<()>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    /// True for sinks consuming rendered PCM frames.
    fn is_pcm(&self) -> bool;

    /// Hand rendered frames to a PCM sink; blocks until accepted.
    fn write_samples(&mut self, _samples: &[i16]) -> Result<()> {
        Ok(())
    }

    /// Drive a gate sink for one tone; blocks for the tone duration.
    fn write_gate(&mut self, _frequency: u32, _duration_us: u32) -> Result<()> {
        Ok(())
    }

    /// Stop any sound immediately (key-up on stop/flush).
    fn silence(&mut self) {}

    /// Negotiated sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Preferred number of frames per write.
    fn period_frames(&self) -> usize;
}

fn validate_device(device: Option<&str>) -> Result<()> {
    match device {
        Some(name) if name.len() > DEVICE_NAME_MAX => Err(CwError::Invalid("device name")),
        _ => Ok(()),
    }
}

#[allow(unused_variables)]
fn new_single(system: SoundSystem, device: Option<&str>) -> Result<Box<dyn SoundBackend>> {
    match system {
        SoundSystem::Null => Ok(Box::new(NullBackend::new())),
        #[cfg(feature = "console")]
        SoundSystem::Console => Ok(Box::new(ConsoleBackend::new(device))),
        #[cfg(feature = "oss")]
        SoundSystem::Oss => Ok(Box::new(OssBackend::new(device))),
        #[cfg(feature = "alsa")]
        SoundSystem::Alsa => Ok(Box::new(AlsaBackend::new(device))),
        #[cfg(feature = "pulseaudio")]
        SoundSystem::PulseAudio => Ok(Box::new(PulseBackend::new(device))),
        SoundSystem::SoundCard => unreachable!("resolved before construction"),
        #[allow(unreachable_patterns)]
        other => Err(CwError::Backend(format!(
            "{} support not compiled in",
            other.label()
        ))),
    }
}

/// Probe order behind [`SoundSystem::SoundCard`].
const SOUND_CARD_ORDER: [SoundSystem; 3] =
    [SoundSystem::PulseAudio, SoundSystem::Alsa, SoundSystem::Oss];

/// Construct an opened backend for the given sound system.
///
/// `SoundCard` resolves to the first reachable real PCM sink.
pub(crate) fn open_backend(
    system: SoundSystem,
    device: Option<&str>,
) -> Result<Box<dyn SoundBackend>> {
    validate_device(device)?;
    if system == SoundSystem::SoundCard {
        for candidate in SOUND_CARD_ORDER {
            if let Ok(mut backend) = new_single(candidate, device) {
                if backend.open().is_ok() {
                    return Ok(backend);
                }
            }
        }
        return Err(CwError::Backend(
            "no sound card backend is reachable".into(),
        ));
    }
    let mut backend = new_single(system, device)?;
    backend.open()?;
    Ok(backend)
}

/// Check whether a backend is reachable by an open/close round-trip.
pub fn probe(system: SoundSystem, device: Option<&str>) -> bool {
    match open_backend(system, device) {
        Ok(mut backend) => {
            backend.close();
            true
        }
        Err(_) => false,
    }
}

/// PCM sink capturing rendered frames, backing the rendering tests.
#[cfg(test)]
pub(crate) struct CaptureBackend {
    sample_rate: u32,
    pub(crate) frames: std::sync::Arc<parking_lot::Mutex<Vec<i16>>>,
}

#[cfg(test)]
impl CaptureBackend {
    pub(crate) fn new(sample_rate: u32) -> Self {
        CaptureBackend {
            sample_rate,
            frames: std::sync::Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn sink(&self) -> std::sync::Arc<parking_lot::Mutex<Vec<i16>>> {
        std::sync::Arc::clone(&self.frames)
    }
}

#[cfg(test)]
impl SoundBackend for CaptureBackend {
    fn name(&self) -> &'static str {
        "capture"
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}

    fn is_pcm(&self) -> bool {
        true
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        self.frames.lock().extend_from_slice(samples);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn period_frames(&self) -> usize {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_is_always_reachable() {
        assert!(probe(SoundSystem::Null, None));
    }

    #[test]
    fn test_device_name_cap() {
        let long = "x".repeat(DEVICE_NAME_MAX + 1);
        match open_backend(SoundSystem::Null, Some(&long)) {
            Err(e) => assert_eq!(e, CwError::Invalid("device name")),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(SoundSystem::Null.label(), "null");
        assert_eq!(SoundSystem::SoundCard.label(), "soundcard");
    }
}
