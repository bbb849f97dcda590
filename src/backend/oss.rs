//! OSS sink: `/dev/dsp` PCM writes.

use std::ffi::CString;

use log::{debug, warn};

use crate::constants::SUPPORTED_SAMPLE_RATES;
use crate::{CwError, Result};

use super::SoundBackend;

// OSS ioctl requests, _SIOWR('P', n, int) encodings.
const SNDCTL_DSP_SPEED: libc::c_ulong = 0xC004_5002;
const SNDCTL_DSP_GETBLKSIZE: libc::c_ulong = 0xC004_5004;
const SNDCTL_DSP_SETFMT: libc::c_ulong = 0xC004_5005;
const SNDCTL_DSP_CHANNELS: libc::c_ulong = 0xC004_5006;

#[cfg(target_endian = "little")]
const AFMT_S16_NE: libc::c_int = 0x0000_0010;
#[cfg(target_endian = "big")]
const AFMT_S16_NE: libc::c_int = 0x0000_0020;

const DEFAULT_DEVICE: &str = "/dev/dsp";

/// PCM sink writing native-endian signed 16-bit mono frames to an OSS
/// device. The device's own buffering makes writes block, which paces
/// the generator.
pub(crate) struct OssBackend {
    device: String,
    fd: Option<libc::c_int>,
    sample_rate: u32,
    period_frames: usize,
}

impl OssBackend {
    pub(crate) fn new(device: Option<&str>) -> Self {
        OssBackend {
            device: device.unwrap_or(DEFAULT_DEVICE).to_string(),
            fd: None,
            sample_rate: SUPPORTED_SAMPLE_RATES[0],
            period_frames: 0,
        }
    }

    fn ioctl_int(fd: libc::c_int, request: libc::c_ulong, value: libc::c_int) -> Result<libc::c_int> {
        let mut arg = value;
        let rv = unsafe { libc::ioctl(fd, request, &mut arg as *mut libc::c_int) };
        if rv == -1 {
            return Err(CwError::Backend(format!("OSS ioctl 0x{request:x} failed")));
        }
        Ok(arg)
    }
}

impl SoundBackend for OssBackend {
    fn name(&self) -> &'static str {
        "oss"
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
                "cannot open OSS device {}",
                self.device
            )));
        }

        let setup = (|| -> Result<(u32, usize)> {
            let format = Self::ioctl_int(fd, SNDCTL_DSP_SETFMT, AFMT_S16_NE)?;
            if format != AFMT_S16_NE {
                return Err(CwError::Backend(
                    "OSS device refuses signed 16-bit samples".into(),
                ));
            }
            let channels = Self::ioctl_int(fd, SNDCTL_DSP_CHANNELS, 1)?;
            if channels != 1 {
                return Err(CwError::Backend("OSS device refuses mono".into()));
            }
            let rate = SUPPORTED_SAMPLE_RATES
                .iter()
                .copied()
                .find(|&rate| {
                    Self::ioctl_int(fd, SNDCTL_DSP_SPEED, rate as libc::c_int)
                        .is_ok_and(|accepted| accepted as u32 == rate)
                })
                .ok_or_else(|| {
                    CwError::Backend("OSS device accepts none of the preferred rates".into())
                })?;
            let block_bytes = Self::ioctl_int(fd, SNDCTL_DSP_GETBLKSIZE, 0)?;
            let period = (block_bytes.max(2) as usize) / std::mem::size_of::<i16>();
            Ok((rate, period))
        })();

        match setup {
            Ok((rate, period)) => {
                debug!("oss: opened {} at {} Hz, period {}", self.device, rate, period);
                self.sample_rate = rate;
                self.period_frames = period;
                self.fd = Some(fd);
                Ok(())
            }
            Err(e) => {
                unsafe { libc::close(fd) };
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(fd) = self.fd.take() {
            unsafe { libc::close(fd) };
        }
    }

    fn is_pcm(&self) -> bool {
        true
    }

    fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        let Some(fd) = self.fd else {
            return Err(CwError::Backend("OSS device is not open".into()));
        };
        let bytes = samples.len() * std::mem::size_of::<i16>();
        let mut written = 0usize;
        while written < bytes {
            let rv = unsafe {
                libc::write(
                    fd,
                    (samples.as_ptr() as *const u8).add(written) as *const libc::c_void,
                    bytes - written,
                )
            };
            if rv < 0 {
                warn!("oss: short write on {}, dropping tone remainder", self.device);
                return Err(CwError::Backend("OSS write failed".into()));
            }
            written += rv as usize;
        }
        Ok(())
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

impl Drop for OssBackend {
    fn drop(&mut self) {
        self.close();
    }
}
