//! ALSA sink: direct libasound PCM writes.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use log::{debug, warn};

use crate::constants::{
    DOT_CALIBRATION, SPEED_MAX, SUPPORTED_SAMPLE_RATES, WEIGHTING_MIN,
};
use crate::{CwError, Result};

use super::SoundBackend;

const DEFAULT_DEVICE: &str = "default";

/// How many periods the shortest possible dot must span. Keeping the
/// period well below the shortest mark keeps key-up latency low.
const PERIODS_PER_SHORTEST_DOT: u64 = 5;

/// PCM sink writing native-endian signed 16-bit mono frames through
/// libasound. `writei` blocks until the frames are in the kernel ring,
/// which paces the generator; underruns are recovered by re-preparing
/// the device.
pub(crate) struct AlsaBackend {
    device: String,
    pcm: Option<PCM>,
    sample_rate: u32,
    period_frames: usize,
}

/// Duration of the shortest dot the library can produce, in µs: highest
/// speed, weighting at its minimum.
fn shortest_dot_us() -> u64 {
    let unit = u64::from(DOT_CALIBRATION / SPEED_MAX);
    let delta = 2 * (i64::from(WEIGHTING_MIN) - 50) * unit as i64 / 100;
    (unit as i64 + delta) as u64
}

impl AlsaBackend {
    pub(crate) fn new(device: Option<&str>) -> Self {
        AlsaBackend {
            device: device.unwrap_or(DEFAULT_DEVICE).to_string(),
            pcm: None,
            sample_rate: SUPPORTED_SAMPLE_RATES[0],
            period_frames: 0,
        }
    }

    fn configure(pcm: &PCM) -> Result<(u32, usize)> {
        let map_err = |e: alsa::Error| CwError::Backend(format!("alsa: {e}"));

        let hwp = HwParams::any(pcm).map_err(map_err)?;
        hwp.set_channels(1).map_err(map_err)?;
        hwp.set_format(Format::s16()).map_err(map_err)?;
        hwp.set_access(Access::RWInterleaved).map_err(map_err)?;

        let rate = SUPPORTED_SAMPLE_RATES
            .iter()
            .copied()
            .find(|&rate| hwp.test_rate(rate).is_ok())
            .ok_or_else(|| {
                CwError::Backend("alsa: device accepts none of the preferred rates".into())
            })?;
        hwp.set_rate(rate, ValueOr::Nearest).map_err(map_err)?;

        // Size the period so the shortest dot spans enough periods,
        // then put the buffer near three periods.
        let samples_in_shortest_dot = u64::from(rate) * shortest_dot_us() / 1_000_000;
        let wanted = (samples_in_shortest_dot / PERIODS_PER_SHORTEST_DOT).max(1);
        let period = hwp
            .set_period_size_near(wanted as Frames, ValueOr::Nearest)
            .map_err(map_err)?;
        hwp.set_buffer_size_near(period * 3).map_err(map_err)?;

        pcm.hw_params(&hwp).map_err(map_err)?;
        let period = hwp.get_period_size().map_err(map_err)?;
        Ok((rate, period as usize))
    }
}

impl SoundBackend for AlsaBackend {
    fn name(&self) -> &'static str {
        "alsa"
    }

    fn open(&mut self) -> Result<()> {
        if self.pcm.is_some() {
            return Ok(());
        }
        let pcm = PCM::new(&self.device, Direction::Playback, false)
            .map_err(|e| CwError::Backend(format!("alsa: cannot open {}: {e}", self.device)))?;
        let (rate, period) = Self::configure(&pcm)?;
        debug!("alsa: opened {} at {} Hz, period {}", self.device, rate, period);
        self.sample_rate = rate;
        self.period_frames = period;
        self.pcm = Some(pcm);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(pcm) = self.pcm.take() {
            let _ = pcm.drain();
        }
    }

    fn is_pcm(&self) -> bool {
        true
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        let Some(pcm) = self.pcm.as_ref() else {
            return Err(CwError::Backend("alsa: device is not open".into()));
        };
        let io = pcm
            .io_i16()
            .map_err(|e| CwError::Backend(format!("alsa: {e}")))?;
        let mut offset = 0usize;
        while offset < samples.len() {
            match io.writei(&samples[offset..]) {
                Ok(frames) => offset += frames,
                Err(e) => {
                    // Underrun or suspend: re-prepare and report the
                    // failed write; the worker carries on.
                    warn!("alsa: write failed ({e}), recovering");
                    pcm.try_recover(e, true)
                        .map_err(|e| CwError::Backend(format!("alsa: recover failed: {e}")))?;
                    return Err(CwError::Backend("alsa: underrun".into()));
                }
            }
        }
        Ok(())
    }

    fn silence(&mut self) {
        if let Some(pcm) = self.pcm.as_ref() {
            let _ = pcm.drop();
            let _ = pcm.prepare();
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn period_frames(&self) -> usize {
        if self.period_frames > 0 {
            self.period_frames
        } else {
            (self.sample_rate / 50) as usize
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortest_dot() {
        // 60 WPM, weighting 20: 20 ms unit shrunk by 60 percent.
        assert_eq!(shortest_dot_us(), 8_000);
    }
}
