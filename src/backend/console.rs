//! Console sink: PC-speaker beeper via the KIOCSOUND ioctl.
//!
//! The beeper is a square-wave gate; it only knows on/off and a
//! frequency divisor, so volume, waveform and slopes are ignored.

use std::ffi::CString;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::constants::SUPPORTED_SAMPLE_RATES;
use crate::{CwError, Result};

use super::SoundBackend;

/// KIOCSOUND console ioctl: start a beep at `CLOCK_TICK_RATE / arg` Hz,
/// stop on arg 0.
const KIOCSOUND: libc::c_ulong = 0x4B2F;

/// The i8253 timer base clock the beeper divisor is derived from.
const CLOCK_TICK_RATE: u32 = 1_193_180;

const DEFAULT_DEVICE: &str = "/dev/console";

/// Gate sink driving the console beeper.
pub(crate) struct ConsoleBackend {
    device: String,
    fd: Option<libc::c_int>,
}

impl ConsoleBackend {
    pub(crate) fn new(device: Option<&str>) -> Self {
        ConsoleBackend {
            device: device.unwrap_or(DEFAULT_DEVICE).to_string(),
            fd: None,
        }
    }

    fn beep(&self, frequency: u32) -> Result<()> {
        let Some(fd) = self.fd else {
            return Err(CwError::Backend("console device is not open".into()));
        };
        let divisor = if frequency == 0 {
            0
        } else {
            CLOCK_TICK_RATE / frequency
        };
        let rv = unsafe { libc::ioctl(fd, KIOCSOUND, divisor as libc::c_ulong) };
        if rv == -1 {
            return Err(CwError::Backend(format!(
                "KIOCSOUND ioctl failed on {}",
                self.device
            )));
        }
        Ok(())
    }
}

impl SoundBackend for ConsoleBackend {
    fn name(&self) -> &'static str {
        "console"
    }

    fn open(&mut self) -> Result<()> {
        if self.fd.is_some() {
            return Ok(());
        }
        let path = CString::new(self.device.as_str())
            .map_err(|_| CwError::Invalid("device name"))?;
        let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY) };
        if fd < 0 {
            return Err(CwError::Backend(format!(
                "cannot open console device {}",
                self.device
            )));
        }
        self.fd = Some(fd);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            if self.beep_off_fd(fd).is_err() {
                warn!("console beeper may be left sounding");
            }
            unsafe { libc::close(fd) };
        }
    }

    fn is_pcm(&self) -> bool {
        false
    }

    fn write_gate(&mut self, frequency: u32, duration_us: u32) -> Result<()> {
        self.beep(frequency)?;
        if duration_us > 0 {
            thread::sleep(Duration::from_micros(u64::from(duration_us)));
        }
        Ok(())
    }

    fn silence(&mut self) {
        let _ = self.beep(0);
    }

    fn sample_rate(&self) -> u32 {
        SUPPORTED_SAMPLE_RATES[0]
    }

    fn period_frames(&self) -> usize {
        (self.sample_rate() / 50) as usize
    }
}

impl ConsoleBackend {
    fn beep_off_fd(&self, fd: libc::c_int) -> Result<()> {
        let rv = unsafe { libc::ioctl(fd, KIOCSOUND, 0 as libc::c_ulong) };
        if rv == -1 {
            return Err(CwError::Backend("KIOCSOUND ioctl failed".into()));
        }
        Ok(())
    }
}

impl Drop for ConsoleBackend {
    fn drop(&mut self) {
        self.close();
    }
}
