//! Canonical capture text and output formats.
//!
//! A capture is persisted as plain text:
//!
//! ```text
//! Descriptor 0x00007FF61234ABCD | Add
//!
//! 0x7ff612350000 | 55                        | push            rbp
//! 0x7ff612350001 | c3                        | ret
//!
//! Begin 0x00007FF612350000 | Size 2 (0x2) bytes | 2 instructions
//! ```
//!
//! [`Listing`] is the structured form of that text. Captures are rendered from
//! a `Listing` and parsed back into one, so normalization never works on raw
//! strings.

mod json;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::diff::DiffReport;
use crate::{Address, CaptureError, InstructionStream};

/// Column separator of the capture text.
pub const SEP: &str = " | ";

const BYTES_WIDTH: usize = 25;
const MNEMONIC_WIDTH: usize = 15;

/// x86 prefix words Capstone folds into the mnemonic.
const MNEMONIC_PREFIXES: &[&str] = &[
    "rep", "repe", "repz", "repne", "repnz", "lock", "bnd", "notrack", "xacquire", "xrelease",
    "data16",
];

/// Supported output formats for captures and diff reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    Text,
    /// JSON format
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn ReportFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
        }
    }
}

/// Formatter trait for captures and diff reports
pub trait ReportFormatter {
    /// Format a parsed capture
    fn format_listing(&self, listing: &Listing) -> Result<String, CaptureError>;

    /// Format a post-processed diff
    fn format_report(&self, report: &DiffReport) -> Result<String, CaptureError>;
}

/// Format in the canonical capture text
pub struct TextFormatter;

/// Format as JSON
pub struct JsonFormatter;

impl ReportFormatter for TextFormatter {
    fn format_listing(&self, listing: &Listing) -> Result<String, CaptureError> {
        Ok(listing.render().into_string())
    }

    fn format_report(&self, report: &DiffReport) -> Result<String, CaptureError> {
        Ok(report.render())
    }
}

/// One capture in its persisted text form. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisassemblyText(String);

impl DisassemblyText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DisassemblyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One instruction row of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLine {
    pub addr: Address,
    /// Raw bytes as concatenated lowercase hex
    pub bytes: String,
    pub mnemonic: String,
    pub operands: String,
}

impl ListingLine {
    /// The mnemonic without prefix words.
    pub fn base_mnemonic(&self) -> &str {
        self.mnemonic.split_whitespace().last().unwrap_or("")
    }

    /// Number of raw bytes on this row.
    pub fn byte_count(&self) -> usize {
        self.bytes.len() / 2
    }

    fn render(&self) -> String {
        let line = format!(
            "0x{:04x}{SEP}{:<bw$}{SEP}{:<mw$} {}",
            self.addr,
            self.bytes,
            self.mnemonic,
            self.operands,
            bw = BYTES_WIDTH,
            mw = MNEMONIC_WIDTH,
        );
        line.trim_end().to_string()
    }
}

/// Structured form of a capture: header, instruction rows, and the start
/// address recorded in the footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub function: String,
    pub descriptor: Address,
    pub start: Address,
    pub lines: Vec<ListingLine>,
}

/// Why a capture failed to parse, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}")]
pub struct ListingParseError {
    pub line: usize,
    pub reason: String,
}

impl ListingParseError {
    fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }

    /// Attach the identity of the failing snapshot and of the diff it was
    /// part of.
    pub fn into_capture_error(self, function: &str, index: u32, baseline: u32, current: u32) -> CaptureError {
        CaptureError::MalformedSnapshot {
            function: function.to_string(),
            index,
            baseline,
            current,
            line: self.line,
            reason: self.reason,
        }
    }
}

impl Listing {
    /// Build the listing of a trimmed instruction stream.
    pub fn from_stream(function: &str, descriptor: Address, stream: &InstructionStream) -> Self {
        let lines = stream
            .insns()
            .iter()
            .map(|insn| ListingLine {
                addr: insn.addr,
                bytes: insn.bytes().iter().map(|b| format!("{:02x}", b)).collect(),
                mnemonic: insn.mnemonic.clone(),
                operands: insn.operands.clone(),
            })
            .collect();

        Self {
            function: function.to_string(),
            descriptor,
            start: stream.insns().first().map_or(0, |insn| insn.addr),
            lines,
        }
    }

    /// Total raw bytes across all rows.
    pub fn byte_count(&self) -> usize {
        self.lines.iter().map(ListingLine::byte_count).sum()
    }

    /// Render the canonical capture text.
    pub fn render(&self) -> DisassemblyText {
        let mut out = String::new();

        out.push_str(&format!("Descriptor 0x{:016X}{SEP}{}\n", self.descriptor, self.function));
        out.push('\n');
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out.push('\n');

        let size = self.byte_count();
        out.push_str(&format!(
            "Begin 0x{:016X}{SEP}Size {} (0x{:X}) bytes{SEP}{} instructions\n",
            self.start,
            size,
            size,
            self.lines.len()
        ));

        DisassemblyText(out)
    }

    /// Parse a persisted capture.
    ///
    /// The footer's instruction and byte counts must agree with the rows.
    pub fn parse(text: &str) -> Result<Self, ListingParseError> {
        let mut header = None;
        let mut footer = None;
        let mut lines = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let raw = raw.trim_end();

            if raw.is_empty() {
                continue;
            }
            if footer.is_some() {
                return Err(ListingParseError::new(lineno, "content after footer"));
            }
            if let Some(rest) = raw.strip_prefix("Descriptor ") {
                if header.is_some() || !lines.is_empty() {
                    return Err(ListingParseError::new(lineno, "unexpected header"));
                }
                header = Some(parse_header(rest).map_err(|r| ListingParseError::new(lineno, r))?);
            } else if let Some(rest) = raw.strip_prefix("Begin ") {
                footer = Some((lineno, parse_footer(rest).map_err(|r| ListingParseError::new(lineno, r))?));
            } else {
                if header.is_none() {
                    return Err(ListingParseError::new(lineno, "instruction before header"));
                }
                lines.push(parse_line(raw).map_err(|r| ListingParseError::new(lineno, r))?);
            }
        }

        let (descriptor, function) = header.ok_or_else(|| ListingParseError::new(1, "missing header"))?;
        let (footer_line, (start, size, count)) = footer
            .ok_or_else(|| ListingParseError::new(text.lines().count().max(1), "missing footer"))?;

        let listing = Listing {
            function,
            descriptor,
            start,
            lines,
        };

        if count != listing.lines.len() {
            return Err(ListingParseError::new(
                footer_line,
                format!("footer declares {} instructions, found {}", count, listing.lines.len()),
            ));
        }
        if size != listing.byte_count() {
            return Err(ListingParseError::new(
                footer_line,
                format!("footer declares {} bytes, found {}", size, listing.byte_count()),
            ));
        }

        Ok(listing)
    }
}

/// Render a trimmed stream as capture text.
pub fn format_capture(function: &str, descriptor: Address, stream: &InstructionStream) -> DisassemblyText {
    Listing::from_stream(function, descriptor, stream).render()
}

fn parse_hex(token: &str) -> Result<Address, String> {
    let digits = token
        .strip_prefix("0x")
        .ok_or_else(|| format!("expected 0x-prefixed address, got '{}'", token))?;
    Address::from_str_radix(digits, 16).map_err(|e| format!("bad address '{}': {}", token, e))
}

fn parse_header(rest: &str) -> Result<(Address, String), String> {
    let (addr, name) = rest
        .split_once(SEP)
        .ok_or_else(|| "header has no function name".to_string())?;
    Ok((parse_hex(addr.trim())?, name.to_string()))
}

fn parse_footer(rest: &str) -> Result<(Address, usize, usize), String> {
    let fields: Vec<&str> = rest.split(SEP).collect();
    if fields.len() != 3 {
        return Err(format!("footer has {} fields, expected 3", fields.len()));
    }

    let start = parse_hex(fields[0].trim())?;
    let size = fields[1]
        .strip_prefix("Size ")
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("bad size field '{}'", fields[1]))?;
    let count = fields[2]
        .strip_suffix(" instructions")
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| format!("bad instruction count '{}'", fields[2]))?;

    Ok((start, size, count))
}

fn parse_line(raw: &str) -> Result<ListingLine, String> {
    let fields: Vec<&str> = raw.splitn(3, SEP).collect();
    if fields.len() != 3 {
        return Err(format!("expected 3 fields, found {}", fields.len()));
    }

    let addr = parse_hex(fields[0].trim())?;
    let bytes = fields[1].trim().to_string();
    if bytes.is_empty() || bytes.len() % 2 != 0 || !bytes.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("bad raw byte field '{}'", bytes));
    }
    let (mnemonic, operands) = split_mnemonic(fields[2]);
    if mnemonic.is_empty() {
        return Err("missing mnemonic".to_string());
    }

    Ok(ListingLine {
        addr,
        bytes,
        mnemonic,
        operands,
    })
}

/// Split `"rep stosd  dword ptr [rdi], eax"` into the mnemonic (with its
/// prefix words) and the operand text.
fn split_mnemonic(field: &str) -> (String, String) {
    let mut rest = field.trim();
    let mut words = Vec::new();

    while !rest.is_empty() {
        let (word, tail) = match rest.find(char::is_whitespace) {
            Some(i) => (&rest[..i], rest[i..].trim_start()),
            None => (rest, ""),
        };
        words.push(word);
        rest = tail;
        if !MNEMONIC_PREFIXES.contains(&word) {
            break;
        }
    }

    (words.join(" "), rest.to_string())
}
