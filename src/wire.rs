//! The length-prefixed wire format.
//!
//! There are no delimiters on the wire, only big-endian length prefixes:
//!
//! ```text
//! config:  [len: u32][KEY:VALUE\n ...]
//! frame:   [name_len: u32][name][content_len: u64 (hi u32, lo u32)][content]
//! ```
//!
//! Control frames ("sentinels") are ordinary frames with a reserved name and
//! a zero content length. The content length is on the wire for every frame,
//! so it is always read, sentinel or not.

use std::fmt;
use std::io::Read;

use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    reliable::{read_exact, read_into},
    DEFAULT_INTERVAL_MS, DEFAULT_MODE,
};

pub const CONFIG_LENGTH_BYTES: usize = 4;
pub const NAME_LENGTH_BYTES: usize = 4;
pub const CONTENT_LENGTH_BYTES: usize = 8;

/// Upper bound on the config text
pub const MAX_CONFIG_LEN: u32 = 64 * 1024;
/// Default upper bound on a frame name
pub const MAX_NAME_LEN: u32 = 4096;
/// Default upper bound on a single frame's content (256 MiB)
pub const MAX_CONTENT_LEN: u64 = 256 * 1024 * 1024;

const END_OF_TRANSMISSION: &str = "END_OF_TRANSMISSION";
const NO_FILE_SELECTED: &str = "NO_FILE_SELECTED";
const NO_FILES_IN_FOLDER: &str = "NO_FILES_IN_FOLDER";
const NO_FILE_FOUND_PREFIX: &str = "NO_FILE_FOUND:";

/// Caps applied while decoding, so a garbage length prefix can't make us allocate the world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_name_len: u32,
    pub max_content_len: u64,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_name_len: MAX_NAME_LEN,
            max_content_len: MAX_CONTENT_LEN,
        }
    }
}

pub fn encode_u32(value: u32) -> [u8; 4] {
    [
        (value >> 24) as u8,
        (value >> 16) as u8,
        (value >> 8) as u8,
        value as u8,
    ]
}

pub fn decode_u32(bytes: [u8; 4]) -> u32 {
    (bytes[0] as u32) << 24 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 8 | bytes[3] as u32
}

/// High word first, each word big-endian
pub fn encode_u64(value: u64) -> [u8; 8] {
    let hi = encode_u32((value >> 32) as u32);
    let lo = encode_u32(value as u32);
    [hi[0], hi[1], hi[2], hi[3], lo[0], lo[1], lo[2], lo[3]]
}

pub fn decode_u64(bytes: [u8; 8]) -> u64 {
    let hi = decode_u32([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let lo = decode_u32([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (hi as u64) << 32 | lo as u64
}

fn read_u32<R: Read + ?Sized>(reader: &mut R, context: &'static str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_into(reader, &mut buf, context)?;
    Ok(decode_u32(buf))
}

fn read_u64<R: Read + ?Sized>(reader: &mut R, context: &'static str) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_into(reader, &mut buf, context)?;
    Ok(decode_u64(buf))
}

/// The once-per-session configuration sent by the producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub interval_ms: u64,
    pub mode: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            mode: DEFAULT_MODE.to_owned(),
        }
    }
}

pub fn encode_config(interval_ms: u64, mode: &str) -> Vec<u8> {
    let text = format!("INTERVAL:{interval_ms}\nMODE:{mode}\n");
    let mut out = Vec::with_capacity(CONFIG_LENGTH_BYTES + text.len());
    out.extend_from_slice(&encode_u32(text.len() as u32));
    out.extend_from_slice(text.as_bytes());
    out
}

/// Parse config text. Missing or unparsable keys keep their defaults, unknown keys are ignored.
pub fn decode_config(bytes: &[u8]) -> Result<SessionConfig> {
    let text = std::str::from_utf8(bytes).map_err(|e| Error::protocol("config text", e.to_string()))?;
    let mut config = SessionConfig::default();
    // Some producers put the two characters `\n` on the wire instead of a newline
    for line in text.split('\n').flat_map(|l| l.split("\\n")) {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "INTERVAL" => match value.parse() {
                Ok(ms) => config.interval_ms = ms,
                Err(_) => debug!(value, "Ignoring unparsable INTERVAL"),
            },
            "MODE" if !value.is_empty() => config.mode = value.to_owned(),
            other => trace!(key = other, "Ignoring config key"),
        }
    }
    Ok(config)
}

/// Read the length-prefixed config frame
pub fn read_config<R: Read + ?Sized>(reader: &mut R) -> Result<SessionConfig> {
    let len = read_u32(reader, "receiving config length")?;
    if len > MAX_CONFIG_LEN {
        return Err(Error::protocol(
            "config length",
            format!("{len} bytes exceeds the {MAX_CONFIG_LEN} byte limit"),
        ));
    }
    let text = read_exact(reader, len as usize, "receiving config text")?;
    decode_config(&text)
}

/// Encode a named frame. `None` content is sent as an explicit zero length.
pub fn encode_frame(name: &str, payload: Option<&[u8]>) -> Vec<u8> {
    let payload = payload.unwrap_or_default();
    let mut out =
        Vec::with_capacity(NAME_LENGTH_BYTES + name.len() + CONTENT_LENGTH_BYTES + payload.len());
    out.extend_from_slice(&encode_u32(name.len() as u32));
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(&encode_u64(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

/// Everything before the content bytes of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub name: String,
    pub content_length: u64,
}

impl FrameHeader {
    pub fn sentinel(&self) -> Option<Sentinel> {
        Sentinel::classify(&self.name)
    }
}

/// Read name length, name and content length. The content itself is left on the stream.
pub fn read_frame_header<R: Read + ?Sized>(reader: &mut R, limits: &FrameLimits) -> Result<FrameHeader> {
    let name_len = read_u32(reader, "receiving name length")?;
    if name_len == 0 {
        return Err(Error::protocol("name length", "frame name is empty"));
    }
    if name_len > limits.max_name_len {
        return Err(Error::protocol(
            "name length",
            format!("{name_len} bytes exceeds the {} byte limit", limits.max_name_len),
        ));
    }
    let name = read_exact(reader, name_len as usize, "receiving name")?;
    let name = String::from_utf8(name).map_err(|e| Error::protocol("name", e.to_string()))?;
    // Always on the wire, even for sentinels
    let content_length = read_u64(reader, "receiving content length")?;
    // Sentinel content is never read, so it needs no buffer
    if content_length > limits.max_content_len && Sentinel::classify(&name).is_none() {
        return Err(Error::Allocation {
            field: "content",
            requested: content_length,
        });
    }
    Ok(FrameHeader {
        name,
        content_length,
    })
}

/// Read the content announced by `header`
pub fn read_content<R: Read + ?Sized>(reader: &mut R, header: &FrameHeader) -> Result<Vec<u8>> {
    let alloc_err = || Error::Allocation {
        field: "content",
        requested: header.content_length,
    };
    let len = usize::try_from(header.content_length).map_err(|_| alloc_err())?;
    let mut content = Vec::new();
    content.try_reserve_exact(len).map_err(|_| alloc_err())?;
    content.resize(len, 0);
    read_into(reader, &mut content, "receiving content")?;
    Ok(content)
}

/// Reserved frame names that end (or abort) the frame stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sentinel {
    EndOfTransmission,
    NoFileSelected,
    NoFilesInFolder,
    /// Carries whatever followed the `NO_FILE_FOUND:` prefix
    NoFileFound(String),
}

impl Sentinel {
    pub fn classify(name: &str) -> Option<Self> {
        match name {
            END_OF_TRANSMISSION => Some(Self::EndOfTransmission),
            NO_FILE_SELECTED => Some(Self::NoFileSelected),
            NO_FILES_IN_FOLDER => Some(Self::NoFilesInFolder),
            _ => name
                .strip_prefix(NO_FILE_FOUND_PREFIX)
                .map(|what| Self::NoFileFound(what.to_owned())),
        }
    }

    pub fn wire_name(&self) -> String {
        match self {
            Self::EndOfTransmission => END_OF_TRANSMISSION.to_owned(),
            Self::NoFileSelected => NO_FILE_SELECTED.to_owned(),
            Self::NoFilesInFolder => NO_FILES_IN_FOLDER.to_owned(),
            Self::NoFileFound(what) => format!("{NO_FILE_FOUND_PREFIX}{what}"),
        }
    }

    /// Only a clean end of transmission means the producer had everything it was asked for
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::EndOfTransmission)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&self.wire_name(), None)
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_name())
    }
}

/// Pull raw ADC counts out of a payload. Lines that aren't `ADC:<integer>` are skipped.
pub fn parse_adc_samples(content: &[u8]) -> Vec<i64> {
    // Line count is an upper bound on the sample count
    let lines = content.iter().filter(|&&b| b == b'\n').count() + 1;
    let mut samples = Vec::with_capacity(lines);
    for line in content.split(|&b| b == b'\n') {
        let Ok(line) = std::str::from_utf8(line) else {
            continue;
        };
        if let Some(value) = line.trim().strip_prefix("ADC:") {
            if let Ok(v) = value.trim().parse::<i64>() {
                samples.push(v);
            }
        }
    }
    samples
}
