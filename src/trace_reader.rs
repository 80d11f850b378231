use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor};
use std::path::Path;

use crate::can_frame::{
    CanFrame, CAN_EFF_FLAG, CAN_EFF_MASK, CAN_ERR_FLAG, CAN_MAX_DLEN, CAN_RTR_FLAG, CAN_SFF_MASK,
};
use crate::errors::TraceError;

/// One recorded frame of a trace file.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceRecord {
    /// Seconds, as written in the trace
    pub timestamp: f64,
    /// Interface name (candump) or channel number (ASC)
    pub channel: String,
    /// `false` only for ASC `Tx` lines; candump has no direction
    pub is_rx: bool,
    pub frame: CanFrame,
}

impl TraceRecord {
    /// The identifier as a database lookup expects it.
    pub fn arbitration_id(&self) -> u32 {
        self.frame.message_id()
    }

    pub fn data(&self) -> &[u8] {
        self.frame.payload()
    }
}

/// Formats the record as a candump line.
/// `(1436509053.850870) vcan0 1A0#9C20407F96EA167B`
impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = if self.frame.is_extended() {
            format!("{:08X}", self.frame.arbitration_id())
        } else {
            format!("{:03X}", self.frame.arbitration_id())
        };
        write!(f, "({:.6}) {} {}#", self.timestamp, self.channel, id)?;
        if self.frame.is_remote() {
            f.write_str("R")?;
            if self.frame.len > 0 {
                write!(f, "{}", self.frame.len)?;
            }
            return Ok(());
        }
        for byte in self.frame.payload() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Id word for a parsed identifier. Ids too wide for their format would spill
/// into the flag bits and are rejected.
fn checked_id(raw_id: u32, extended: bool, text: &str) -> Result<u32, TraceError> {
    match extended {
        true if raw_id <= CAN_EFF_MASK => Ok(raw_id | CAN_EFF_FLAG),
        false if raw_id <= CAN_SFF_MASK => Ok(raw_id),
        _ => Err(TraceError::InvalidId(text.to_owned())),
    }
}

/// Hex digit pairs of a candump payload as bytes.
pub fn candump_hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, TraceError> {
    if hex_str.len() % 2 != 0 || !hex_str.is_ascii() {
        return Err(TraceError::InvalidData(hex_str.to_owned()));
    }
    (0..hex_str.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex_str[i..i + 2], 16)
                .map_err(|_| TraceError::InvalidData(hex_str.to_owned()))
        })
        .collect()
}

/// One candump line, `(<time>) <iface> <id>#<data>`.
/// ```
/// let record = cantrip::trace_reader::parse_candump_line("(1436509053.850870) vcan0 1A0#9C20407F96EA167B").unwrap();
/// assert_eq!(record.frame.can_id, 0x1A0);
/// ```
pub fn parse_candump_line(line: &str) -> Result<TraceRecord, TraceError> {
    let mut line_splits = line.split_whitespace();

    let timestamp = line_splits.next().ok_or(TraceError::UnexpectedEndOfLine)?;
    let timestamp = timestamp
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(|| TraceError::InvalidTimestamp(timestamp.to_owned()))?;

    let channel = line_splits.next().ok_or(TraceError::UnexpectedEndOfLine)?;

    let id_and_data = line_splits.next().ok_or(TraceError::UnexpectedEndOfLine)?;
    // FD frames use "##"
    if id_and_data.contains("##") {
        return Err(TraceError::FdUnsupported);
    }
    let (id_str, data_str) = id_and_data
        .split_once('#')
        .ok_or(TraceError::UnexpectedEndOfLine)?;

    let raw_id =
        u32::from_str_radix(id_str, 16).map_err(|_| TraceError::InvalidId(id_str.to_owned()))?;
    // candump prints extended ids with all 8 digits
    let can_id = checked_id(raw_id, id_str.len() == 8, id_str)?;

    let frame = if let Some(dlc) = data_str.strip_prefix('R') {
        let len = if dlc.is_empty() {
            0
        } else {
            dlc.parse::<u8>()
                .map_err(|_| TraceError::InvalidData(data_str.to_owned()))?
        };
        let mut frame = CanFrame::new(can_id | CAN_RTR_FLAG, &[]);
        frame.len = len.min(CAN_MAX_DLEN as u8);
        frame
    } else {
        let data = candump_hex_to_bytes(data_str)?;
        if data.len() > CAN_MAX_DLEN {
            return Err(TraceError::InvalidData(data_str.to_owned()));
        }
        CanFrame::new(can_id, &data)
    };

    Ok(TraceRecord {
        timestamp,
        channel: channel.to_owned(),
        is_rx: true, //Candump doesn't specify, default is true.
        frame,
    })
}

/// Number base of ids and data bytes in a Vector ASC file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiBase {
    Hex,
    Dec,
}

impl AsciiBase {
    fn radix(self) -> u32 {
        match self {
            AsciiBase::Hex => 16,
            AsciiBase::Dec => 10,
        }
    }
}

/// One Vector ASC line. Data frames look like
/// `<time> <channel> <id>[x] <Rx|Tx> d <dlc> <bytes...> [flags]`,
/// remote frames stop after `r`.
///
/// Returns `Ok(None)` for events that are not frames (header lines,
/// "Start of measurement", statistics and the like).
/// ```
/// use cantrip::trace_reader::{parse_ascii_line, AsciiBase};
/// let line = "1.5 1  150             Tx   d 8   1   2   3   4   5   6   7   8  Length = 0 BitCount = 64 ID = 150";
/// let record = parse_ascii_line(line, AsciiBase::Dec).unwrap().unwrap();
/// assert_eq!(record.frame.can_id, 150);
/// ```
pub fn parse_ascii_line(line: &str, base: AsciiBase) -> Result<Option<TraceRecord>, TraceError> {
    let mut items = line.split_whitespace();

    let Some(timestamp) = items.next().and_then(|t| t.parse::<f64>().ok()) else {
        return Ok(None);
    };
    // Frame lines carry a numeric channel; "Start of measurement" and friends don't
    let Some(channel) = items.next().filter(|c| c.chars().all(|ch| ch.is_ascii_digit())) else {
        return Ok(None);
    };

    let id_str = items.next().ok_or(TraceError::UnexpectedEndOfLine)?;
    if id_str == "ErrorFrame" {
        return Ok(Some(TraceRecord {
            timestamp,
            channel: channel.to_owned(),
            is_rx: true,
            frame: CanFrame::new(CAN_ERR_FLAG, &[]),
        }));
    }
    // Statistics and other channel events
    if !id_str.chars().next().is_some_and(|c| c.is_ascii_hexdigit()) {
        return Ok(None);
    }
    let (digits, extended) = match id_str.strip_suffix('x') {
        Some(digits) => (digits, true),
        None => (id_str, false),
    };
    let raw_id = u32::from_str_radix(digits, base.radix())
        .map_err(|_| TraceError::InvalidId(id_str.to_owned()))?;
    let can_id = checked_id(raw_id, extended, id_str)?;

    let direction = items.next().ok_or(TraceError::UnexpectedEndOfLine)?;
    let is_rx = direction == "Rx";

    let frame = match items.next().ok_or(TraceError::UnexpectedEndOfLine)? {
        // no payload on remote frames
        "r" => {
            let len = items
                .next()
                .and_then(|dlc| u8::from_str_radix(dlc, 16).ok())
                .unwrap_or(0)
                .min(CAN_MAX_DLEN as u8);
            let mut frame = CanFrame::new(can_id | CAN_RTR_FLAG, &[]);
            frame.len = len;
            frame
        }
        "d" => {
            let dlc_str = items.next().ok_or(TraceError::UnexpectedEndOfLine)?;
            let dlc = u8::from_str_radix(dlc_str, 16)
                .map_err(|_| TraceError::InvalidData(dlc_str.to_owned()))?;
            if dlc as usize > CAN_MAX_DLEN {
                return Err(TraceError::InvalidData(dlc_str.to_owned()));
            }
            let mut data = Vec::with_capacity(dlc as usize);
            for _ in 0..dlc {
                let byte_str = items.next().ok_or(TraceError::UnexpectedEndOfLine)?;
                let byte = u8::from_str_radix(byte_str, base.radix())
                    .map_err(|_| TraceError::InvalidData(byte_str.to_owned()))?;
                data.push(byte);
            }
            CanFrame::new(can_id, &data)
        }
        _ => return Ok(None),
    };

    Ok(Some(TraceRecord {
        timestamp,
        channel: channel.to_owned(),
        is_rx,
        frame,
    }))
}

/// Trace file flavours the reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceFormat {
    Candump,
    /// Vector ASCII, starting in hex until a "base" header says otherwise
    Asc,
}

impl TraceFormat {
    /// `.asc` files are Vector ASCII, anything else is treated as candump.
    pub fn from_path(path: &Path) -> TraceFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("asc") => TraceFormat::Asc,
            _ => TraceFormat::Candump,
        }
    }
}

/// Lazily reads records from a trace, one line at a time.
///
/// Yields `Err` for lines that look like frames but fail to parse; header and
/// event lines are skipped. Reopen the file to restart.
pub struct TraceReader {
    reader: Box<dyn BufRead>,
    format: TraceFormat,
    base: AsciiBase,
    line: String,
}

impl TraceReader {
    /// Open a trace file, picking the format from its extension.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file), TraceFormat::from_path(path)))
    }

    /// Reader over an in-memory trace.
    pub fn from_bytes(bytes: Vec<u8>, format: TraceFormat) -> Self {
        Self::from_reader(Cursor::new(bytes), format)
    }

    /// Reader over any buffered source.
    pub fn from_reader<R: BufRead + 'static>(reader: R, format: TraceFormat) -> Self {
        TraceReader {
            reader: Box::new(reader),
            format,
            base: AsciiBase::Hex,
            line: String::new(),
        }
    }

    pub fn format(&self) -> TraceFormat {
        self.format
    }

    fn parse_line(&mut self) -> Option<Result<TraceRecord, TraceError>> {
        let line = self.line.trim();
        if line.is_empty() {
            return None;
        }
        match self.format {
            TraceFormat::Candump => Some(parse_candump_line(line)),
            TraceFormat::Asc => {
                if let Some(rest) = line.strip_prefix("base ") {
                    self.base = if rest.trim_start().starts_with("dec") {
                        AsciiBase::Dec
                    } else {
                        AsciiBase::Hex
                    };
                    return None;
                }
                parse_ascii_line(line, self.base).transpose()
            }
        }
    }
}

impl Iterator for TraceReader {
    type Item = Result<TraceRecord, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {
                    if let Some(item) = self.parse_line() {
                        return Some(item);
                    }
                }
                Err(e) => return Some(Err(TraceError::Io(e))),
            }
        }
    }
}
