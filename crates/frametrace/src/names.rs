//! Decoding of media object names and playout buffer dumps.

use regex::Regex;
use std::{fmt, sync::LazyLock};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[/A-Za-z0-9]*/frames/(?P<ftype>\w+)/?(?P<fno>[0-9]+)?/?(?P<dtype>\w+)?/?(?P<segno>[%A-F0-9]+)?",
    )
    .expect("media name pattern is valid")
});

static SEGMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^%(?P<high>[0-9A-F]{2})%(?P<low>[0-9A-F]{2})")
        .expect("segment pattern is valid")
});

/// A playout buffer short dump, e.g.
/// `[10(0.5) +3 20(100|0.25) +2 12(30|1)13(40|0.5)]`.
pub const BUFFER_DUMP_PATTERN: &str = concat!(
    r"\[((?P<fr0>[0-9]+)\((?P<lvl0>[01]\.?[0-9]+)\))?\s?(?P<nfr1>\+[0-9]+)?\s?",
    r"((?P<kfr>[0-9]+)\((?P<kdl>[0-9]+)\|(?P<klvl>[01]\.?[0-9]*)\))?\s?(?P<nfr2>\+[0-9]+)?\s?",
    r"(?P<fr1>[0-9]+)\((?P<dl1>[0-9]+)\|(?P<lvl1>[01]\.?[0-9]*)\)",
    r"(?P<fr2>[0-9]+)\((?P<dl2>[0-9]+)\|(?P<lvl2>[01]\.?[0-9]*)\).*\]",
);

static BUFFER_DUMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{BUFFER_DUMP_PATTERN}")).expect("buffer dump pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Key,
    Delta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Data,
    Parity,
}

/// The frame and segment addressed by a media object name such as
/// `/ndn/.../frames/delta/14/data/%00%01`.
///
/// Components missing from the name are `None` and are rendered as `?`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaName {
    pub frame_type: Option<FrameType>,
    pub frame_no: Option<u64>,
    pub data_type: Option<DataType>,
    pub segment: Option<u16>,
}

impl MediaName {
    /// Decode a name. A name without a `/frames/` component decodes to
    /// an empty [MediaName].
    pub fn parse(name: &str) -> Self {
        let Some(caps) = NAME_PATTERN.captures(name) else {
            return Self::default();
        };

        Self {
            frame_type: caps.name("ftype").map(|m| match m.as_str() {
                "key" => FrameType::Key,
                _ => FrameType::Delta,
            }),
            frame_no: caps.name("fno").and_then(|m| m.as_str().parse().ok()),
            data_type: caps.name("dtype").map(|m| match m.as_str() {
                "data" => DataType::Data,
                _ => DataType::Parity,
            }),
            segment: caps.name("segno").and_then(|m| parse_segment(m.as_str())),
        }
    }
}

/// Decode a two-byte `%XX%XX` name component.
fn parse_segment(text: &str) -> Option<u16> {
    let caps = SEGMENT_PATTERN.captures(text)?;
    let high = u8::from_str_radix(&caps["high"], 16).ok()?;
    let low = u8::from_str_radix(&caps["low"], 16).ok()?;
    Some(u16::from_be_bytes([high, low]))
}

impl fmt::Display for MediaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame_type {
            Some(FrameType::Key) => write!(f, "KEY")?,
            Some(FrameType::Delta) => write!(f, "DELTA")?,
            None => write!(f, "?")?,
        }
        match self.data_type {
            Some(DataType::Data) => write!(f, "-DATA ")?,
            Some(DataType::Parity) => write!(f, "-PARITY ")?,
            None => write!(f, "-? ")?,
        }
        match self.frame_no {
            Some(frame_no) => write!(f, "{frame_no}:")?,
            None => write!(f, "?:")?,
        }
        match self.segment {
            Some(segment) => write!(f, "{segment}"),
            None => write!(f, "?"),
        }
    }
}

/// One frame in a buffer dump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedFrame {
    pub number: u64,
    pub deadline: u64,
    /// Assembled fraction of the frame, `0.0..=1.0`.
    pub level: f64,
}

impl fmt::Display for BufferedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}|{})", self.number, self.deadline, self.level)
    }
}

/// A decoded playout buffer short dump.
///
/// The dump lists the frame being played, the next key frame and the
/// next two frames to play. Frames in between are only counted.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDump {
    text: String,
    pub playing: Option<BufferedFrame>,
    pub key_frame: Option<BufferedFrame>,
    pub next: [BufferedFrame; 2],
    /// The number of frames in the buffer, key frame excluded.
    pub frame_count: u64,
}

impl BufferDump {
    pub fn parse(text: &str) -> Option<Self> {
        let caps = BUFFER_DUMP.captures(text)?;
        let number = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u64>().ok());
        let level = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok());
        let frame = |fr: &str, dl: Option<&str>, lvl: &str| {
            Some(BufferedFrame {
                number: number(fr)?,
                deadline: match dl {
                    Some(dl) => number(dl)?,
                    None => 0,
                },
                level: level(lvl)?,
            })
        };

        let playing = frame("fr0", None, "lvl0");
        let key_frame = frame("kfr", Some("kdl"), "klvl");
        let next = [
            frame("fr1", Some("dl1"), "lvl1")?,
            frame("fr2", Some("dl2"), "lvl2")?,
        ];
        let skipped: u64 = ["nfr1", "nfr2"].into_iter().filter_map(number).sum();
        let frame_count = playing.iter().count() as u64 + next.len() as u64 + skipped;

        Some(Self {
            text: caps[0].to_string(),
            playing,
            key_frame,
            next,
            frame_count,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Renders the dump as it appeared in the log.
impl fmt::Display for BufferDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
