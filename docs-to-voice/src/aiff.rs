//! Uncompressed AIFF / AIFF-C reading and writing
//!
//! Only the chunks needed to merge PCM audio are understood: `COMM` for the
//! sample format and `SSND` for the frames. Everything else in the container
//! is skipped on read and not written back.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, VoiceError};

/// AIFF-C version stamp required in an `FVER` chunk
const AIFC_VERSION_1: u32 = 0xA280_5140;

/// AIFF-C compression types whose sound data is plain PCM or float frames
const UNCOMPRESSED_TYPES: &[&[u8; 4]] = &[
    b"NONE", b"sowt", b"twos", b"raw ", b"in24", b"in32", b"fl32", b"FL32", b"fl64", b"FL64",
];

/// Sample layout from the `COMM` chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiffFormat {
    pub channels: u16,
    pub sample_size: u16,
    /// 80-bit IEEE extended sample rate, compared bit for bit
    pub sample_rate: [u8; 10],
    /// AIFF-C compression type; `None` for plain AIFF
    pub compression: Option<[u8; 4]>,
}

impl AiffFormat {
    pub fn sample_rate_hz(&self) -> f64 {
        decode_extended(&self.sample_rate)
    }

    fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.sample_size as usize).div_ceil(8)
    }

    fn describe(&self) -> String {
        let compression = self
            .compression
            .map(|c| String::from_utf8_lossy(&c).into_owned())
            .unwrap_or_else(|| "pcm".to_string());
        format!(
            "{} ch/{} bit/{} Hz/{}",
            self.channels,
            self.sample_size,
            self.sample_rate_hz(),
            compression.trim()
        )
    }
}

/// A parsed AIFF file
#[derive(Debug, Clone)]
pub struct AiffAudio {
    pub format: AiffFormat,
    pub frames: u32,
    /// Raw sound data, exactly `frames` frames long
    pub sound: Vec<u8>,
    form_type: [u8; 4],
    comm: Vec<u8>,
}

impl AiffAudio {
    pub fn duration_seconds(&self) -> Option<f64> {
        let rate = self.format.sample_rate_hz();
        (rate.is_finite() && rate > 0.0 && self.frames > 0).then(|| self.frames as f64 / rate)
    }
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Value of an 80-bit IEEE 754 extended float (sign ignored)
fn decode_extended(raw: &[u8; 10]) -> f64 {
    let exponent = (be_u16(&raw[0..2]) & 0x7fff) as i32;
    let mantissa = u64::from_be_bytes([
        raw[2], raw[3], raw[4], raw[5], raw[6], raw[7], raw[8], raw[9],
    ]);
    if exponent == 0 && mantissa == 0 {
        return 0.0;
    }
    mantissa as f64 * 2f64.powi(exponent - 16383 - 63)
}

fn malformed(detail: impl Into<String>) -> VoiceError {
    VoiceError::ToolFailed {
        tool: "aiff merge",
        detail: detail.into(),
    }
}

/// Parse an in-memory AIFF or AIFF-C file
pub fn parse_aiff(bytes: &[u8]) -> Result<AiffAudio> {
    if bytes.len() < 12 || &bytes[0..4] != b"FORM" {
        return Err(malformed("not an IFF FORM file"));
    }
    let form_type: [u8; 4] = [bytes[8], bytes[9], bytes[10], bytes[11]];
    let is_aifc = match &form_type {
        b"AIFF" => false,
        b"AIFC" => true,
        _ => return Err(malformed("FORM is not AIFF or AIFC")),
    };

    let mut comm: Option<&[u8]> = None;
    let mut ssnd: Option<&[u8]> = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = be_u32(&bytes[pos + 4..pos + 8]) as usize;
        let start = pos + 8;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| {
                malformed(format!("truncated {} chunk", String::from_utf8_lossy(id)))
            })?;

        match id {
            b"COMM" => comm = Some(&bytes[start..end]),
            b"SSND" => ssnd = Some(&bytes[start..end]),
            _ => {}
        }
        pos = end + (size & 1);
    }

    let comm = comm.ok_or_else(|| malformed("missing COMM chunk"))?;
    let ssnd = ssnd.ok_or_else(|| malformed("missing SSND chunk"))?;

    let min_comm = if is_aifc { 22 } else { 18 };
    if comm.len() < min_comm {
        return Err(malformed("COMM chunk too short"));
    }
    let mut sample_rate = [0u8; 10];
    sample_rate.copy_from_slice(&comm[8..18]);
    let format = AiffFormat {
        channels: be_u16(&comm[0..2]),
        sample_size: be_u16(&comm[6..8]),
        sample_rate,
        compression: is_aifc.then(|| [comm[18], comm[19], comm[20], comm[21]]),
    };
    let frames = be_u32(&comm[2..6]);

    if let Some(compression) = &format.compression {
        if !UNCOMPRESSED_TYPES.contains(&compression) {
            return Err(malformed(format!(
                "compressed AIFF-C ('{}') cannot be merged in-process",
                String::from_utf8_lossy(compression)
            )));
        }
    }

    if ssnd.len() < 8 {
        return Err(malformed("SSND chunk too short"));
    }
    let offset = be_u32(&ssnd[0..4]) as usize;
    let data = ssnd
        .get(8 + offset..)
        .ok_or_else(|| malformed("SSND offset past end of chunk"))?;
    let expected = frames as usize * format.bytes_per_frame();
    if data.len() < expected {
        return Err(malformed("SSND chunk shorter than its frame count"));
    }

    Ok(AiffAudio {
        format,
        frames,
        sound: data[..expected].to_vec(),
        form_type,
        comm: comm.to_vec(),
    })
}

pub fn read_aiff(path: &Path) -> Result<AiffAudio> {
    let bytes = fs::read(path)?;
    parse_aiff(&bytes).map_err(|e| match e {
        VoiceError::ToolFailed { tool, detail } => VoiceError::ToolFailed {
            tool,
            detail: format!("{}: {}", path.display(), detail),
        },
        other => other,
    })
}

/// Duration from the `COMM` frame count and sample rate
pub fn aiff_duration(path: &Path) -> Option<f64> {
    read_aiff(path).ok()?.duration_seconds()
}

fn write_chunk<W: Write>(out: &mut W, id: &[u8; 4], body: &[u8]) -> std::io::Result<()> {
    out.write_all(id)?;
    out.write_all(&(body.len() as u32).to_be_bytes())?;
    out.write_all(body)?;
    if body.len() % 2 == 1 {
        out.write_all(&[0])?;
    }
    Ok(())
}

fn padded_chunk_len(body_len: usize) -> usize {
    8 + body_len + (body_len & 1)
}

/// Write `sound` (whole frames) in the container and format of `template`
pub fn write_aiff<W: Write>(
    out: &mut W,
    template: &AiffAudio,
    frames: u32,
    sound: &[u8],
) -> Result<()> {
    let mut comm = template.comm.clone();
    comm[2..6].copy_from_slice(&frames.to_be_bytes());

    let fver = AIFC_VERSION_1.to_be_bytes();
    let mut ssnd = Vec::with_capacity(8 + sound.len());
    ssnd.extend_from_slice(&[0u8; 8]);
    ssnd.extend_from_slice(sound);

    let is_aifc = &template.form_type == b"AIFC";
    let mut form_len = 4 + padded_chunk_len(comm.len()) + padded_chunk_len(ssnd.len());
    if is_aifc {
        form_len += padded_chunk_len(fver.len());
    }
    let form_len = u32::try_from(form_len)
        .map_err(|_| VoiceError::AudioFormat("Merged AIFF exceeds 4 GiB.".to_string()))?;

    out.write_all(b"FORM")?;
    out.write_all(&form_len.to_be_bytes())?;
    out.write_all(&template.form_type)?;
    if is_aifc {
        write_chunk(out, b"FVER", &fver)?;
    }
    write_chunk(out, b"COMM", &comm)?;
    write_chunk(out, b"SSND", &ssnd)?;
    Ok(())
}

/// Check every part against the first and join their frames.
///
/// A differing sample format is an [`VoiceError::AudioFormat`] error.
pub fn merge_aiff_parts(part_paths: &[PathBuf]) -> Result<(AiffAudio, u32, Vec<u8>)> {
    let Some((first_path, rest)) = part_paths.split_first() else {
        return Err(VoiceError::AudioFormat("No AIFF chunks to concatenate.".to_string()));
    };

    let first = read_aiff(first_path)?;
    let mut frames = first.frames as u64;
    let mut sound = first.sound.clone();

    for path in rest {
        let part = read_aiff(path)?;
        if part.format != first.format {
            return Err(VoiceError::AudioFormat(format!(
                "Chunk AIFF formats do not match; cannot concatenate ({} has {}, expected {}).",
                path.display(),
                part.format.describe(),
                first.format.describe(),
            )));
        }
        frames += part.frames as u64;
        sound.extend_from_slice(&part.sound);
    }

    let frames = u32::try_from(frames)
        .map_err(|_| VoiceError::AudioFormat("Merged AIFF has too many frames.".to_string()))?;
    Ok((first, frames, sound))
}
