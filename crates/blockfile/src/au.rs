//! The `.au` container used for block data and alias descriptors.
//!
//! Layout: a 24-byte header of six `u32`s (magic `.snd`, data offset, data
//! size, encoding, sample rate, channels) followed by the samples. Files are
//! written little-endian. Readers accept either byte order and tell them apart
//! by the magic.

use crate::format::SampleFormat;
use aup_storage::Filesystem;
use std::path::Path;

pub const MAGIC: u32 = 0x2e73_6e64;
pub const HEADER_LEN: usize = 24;
pub const SAMPLE_RATE: u32 = 44_100;

const INT16_SCALE: f32 = 32_768.0;
const INT24_SCALE: f32 = 8_388_608.0;

/// Peak and loudness numbers for a run of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub min: f32,
    pub max: f32,
    pub rms: f32,
}

impl Summary {
    pub fn of(samples: &[f32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let (mut min, mut max, mut sum_sq) = (f32::MAX, f32::MIN, 0f64);
        for &s in samples {
            min = min.min(s);
            max = max.max(s);
            sum_sq += f64::from(s) * f64::from(s);
        }
        let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
        Self { min, max, rms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub offset: u32,
    pub size: u32,
    pub format: SampleFormat,
    pub big_endian: bool,
}

impl Header {
    pub fn samples(&self) -> u64 {
        u64::from(self.size) / self.format.bytes_per_sample() as u64
    }
}

/// Parse a header; `None` for anything that isn't a `.au` file we can read.
pub fn parse_header(bytes: &[u8]) -> Option<Header> {
    let head: &[u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
    let word = |i: usize, big: bool| {
        let raw = [head[i * 4], head[i * 4 + 1], head[i * 4 + 2], head[i * 4 + 3]];
        if big { u32::from_be_bytes(raw) } else { u32::from_le_bytes(raw) }
    };
    let big_endian = match (word(0, false), word(0, true)) {
        (MAGIC, _) => false,
        (_, MAGIC) => true,
        _ => return None,
    };
    let offset = word(1, big_endian);
    if (offset as usize) < HEADER_LEN {
        return None;
    }
    Some(Header {
        offset,
        size: word(2, big_endian),
        format: SampleFormat::from_au_encoding(word(3, big_endian))?,
        big_endian,
    })
}

/// The header of a file on disk, if it is one we can read.
pub fn read_header(fs: &dyn Filesystem, path: &Path) -> Option<Header> {
    parse_header(&fs.read(path).ok()?)
}

fn header_bytes(format: SampleFormat, size: u32, channels: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + size as usize);
    for word in [MAGIC, HEADER_LEN as u32, size, format.au_encoding(), SAMPLE_RATE, channels] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out
}

/// Encode samples in `format`. Integer formats clip to `[-1.0, 1.0)`.
pub fn encode(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let size = samples.len() * format.bytes_per_sample();
    let mut out = header_bytes(format, size as u32, 1);
    for &s in samples {
        match format {
            SampleFormat::Int16 => {
                let v = (s * INT16_SCALE).round().clamp(-INT16_SCALE, INT16_SCALE - 1.0) as i16;
                out.extend_from_slice(&v.to_le_bytes());
            },
            SampleFormat::Int24 => {
                let v = (s * INT24_SCALE).round().clamp(-INT24_SCALE, INT24_SCALE - 1.0) as i32;
                out.extend_from_slice(&v.to_le_bytes()[..3]);
            },
            SampleFormat::Float => out.extend_from_slice(&s.to_le_bytes()),
        }
    }
    out
}

/// Decode `count` samples starting at sample `start`. Samples past the end of
/// the data section are not returned; callers pad.
pub fn decode(bytes: &[u8], start: u64, count: usize) -> Option<(SampleFormat, Vec<f32>)> {
    let header = parse_header(bytes)?;
    let width = header.format.bytes_per_sample();
    let data_end = (header.offset as usize).saturating_add(header.size as usize).min(bytes.len());
    let data = bytes.get(header.offset as usize..data_end)?;
    let first = usize::try_from(start).ok()?.saturating_mul(width);
    let samples = data
        .get(first.min(data.len())..)?
        .chunks_exact(width)
        .take(count)
        .map(|chunk| decode_sample(chunk, header.format, header.big_endian))
        .collect();
    Some((header.format, samples))
}

fn decode_sample(chunk: &[u8], format: SampleFormat, big: bool) -> f32 {
    match (format, big) {
        (SampleFormat::Int16, false) => f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / INT16_SCALE,
        (SampleFormat::Int16, true) => f32::from(i16::from_be_bytes([chunk[0], chunk[1]])) / INT16_SCALE,
        // Sign-extend by placing the 3 bytes in the top of an i32 and shifting back.
        (SampleFormat::Int24, false) => (i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8) as f32 / INT24_SCALE,
        (SampleFormat::Int24, true) => (i32::from_be_bytes([chunk[0], chunk[1], chunk[2], 0]) >> 8) as f32 / INT24_SCALE,
        (SampleFormat::Float, false) => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        (SampleFormat::Float, true) => f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
    }
}

/// Alias descriptor: an empty float header followed by the summary numbers.
pub fn encode_descriptor(summary: &Summary) -> Vec<u8> {
    let mut out = header_bytes(SampleFormat::Float, 0, 1);
    for v in [summary.min, summary.max, summary.rms] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn descriptor_len() -> u64 {
    (HEADER_LEN + 3 * 4) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SampleFormat::Int16)]
    #[case(SampleFormat::Int24)]
    #[case(SampleFormat::Float)]
    fn test_exact_values_survive(#[case] format: SampleFormat) {
        let samples = [0.0, 0.5, -0.5, 0.25, -1.0];
        let bytes = encode(&samples, format);
        assert_eq!(bytes.len(), HEADER_LEN + samples.len() * format.bytes_per_sample());
        let (decoded_format, decoded) = decode(&bytes, 0, samples.len()).unwrap();
        assert_eq!(decoded_format, format);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_int16_clips() {
        let bytes = encode(&[2.0, -2.0], SampleFormat::Int16);
        let (_, decoded) = decode(&bytes, 0, 2).unwrap();
        assert_eq!(decoded, vec![32_767.0 / 32_768.0, -1.0]);
    }

    #[test]
    fn test_decode_window() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let bytes = encode(&samples, SampleFormat::Float);
        assert_eq!(decode(&bytes, 7, 10).unwrap().1, vec![7.0, 8.0, 9.0]);
        assert!(decode(&bytes, 20, 2).unwrap().1.is_empty());
    }

    #[test]
    fn test_big_endian_header() {
        let mut bytes = Vec::new();
        for word in [MAGIC, 24, 4, 3, SAMPLE_RATE, 1] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        bytes.extend_from_slice(&0x4000i16.to_be_bytes());
        bytes.extend_from_slice(&(-0x4000i16).to_be_bytes());
        let header = parse_header(&bytes).unwrap();
        assert!(header.big_endian);
        assert_eq!(header.samples(), 2);
        assert_eq!(decode(&bytes, 0, 2).unwrap().1, vec![0.5, -0.5]);
    }

    #[rstest]
    #[case(b"".to_vec())]
    #[case(b"RIFF\0\0\0\0WAVEfmt \0\0\0\0\0\0\0\0".to_vec())]
    fn test_rejects_garbage(#[case] bytes: Vec<u8>) {
        assert!(parse_header(&bytes).is_none());
    }

    #[test]
    fn test_summary() {
        let summary = Summary::of(&[0.5, -0.5, 0.5, -0.5]);
        assert_eq!(summary, Summary { min: -0.5, max: 0.5, rms: 0.5 });
        assert_eq!(Summary::of(&[]), Summary::default());
    }

    #[test]
    fn test_descriptor() {
        let bytes = encode_descriptor(&Summary { min: -1.0, max: 1.0, rms: 0.5 });
        assert_eq!(bytes.len() as u64, descriptor_len());
        assert_eq!(parse_header(&bytes).unwrap().size, 0);
    }
}
