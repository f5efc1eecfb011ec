//! Reading sample ranges out of external audio files.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use hound::{SampleFormat as WavFormat, WavReader};
use std::path::Path;

/// Read `len` frames of `channel` starting at frame `start`.
///
/// Returns fewer than `len` samples if the file is shorter than expected.
pub fn read_region(path: &Path, start: u64, len: usize, channel: u16) -> Result<Vec<f32>> {
    let fail = || ErrorKind::Alias(path.to_path_buf());
    let mut reader = WavReader::open(path).or_raise(fail)?;
    let spec = reader.spec();
    if channel >= spec.channels {
        exn::bail!(fail());
    }
    let start = u32::try_from(start).or_raise(fail)?;
    if start >= reader.duration() {
        return Ok(Vec::new());
    }
    reader.seek(start).or_raise(fail)?;

    let channels = usize::from(spec.channels);
    let wanted = len.saturating_mul(channels);
    let channel = usize::from(channel);
    let picked: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        WavFormat::Float => reader
            .samples::<f32>()
            .take(wanted)
            .skip(channel)
            .step_by(channels)
            .collect(),
        WavFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .take(wanted)
                .skip(channel)
                .step_by(channels)
                .map(|s| s.map(|v| v as f32 / scale))
                .collect()
        },
    };
    picked.or_raise(fail)
}
