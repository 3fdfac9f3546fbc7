//! JSON output formatter

use serde::{Deserialize, Serialize};

use super::{Listing, ListingLine, ReportFormatter};
use crate::diff::DiffReport;
use crate::CaptureError;

/// Serializable instruction for JSON output
#[derive(Serialize, Deserialize)]
struct InstructionJson {
    /// Address of the instruction
    address: String,
    /// Bytes of the instruction as hex string
    bytes: String,
    /// Mnemonic (e.g., "mov", "add")
    mnemonic: String,
    /// Operands
    operands: String,
}

/// Serializable capture for JSON output
#[derive(Serialize, Deserialize)]
struct CaptureJson {
    function: String,
    descriptor: String,
    start: String,
    size: usize,
    instructions: Vec<InstructionJson>,
}

impl ReportFormatter for super::JsonFormatter {
    fn format_listing(&self, listing: &Listing) -> Result<String, CaptureError> {
        let capture = CaptureJson {
            function: listing.function.clone(),
            descriptor: format!("0x{:x}", listing.descriptor),
            start: format!("0x{:x}", listing.start),
            size: listing.byte_count(),
            instructions: listing.lines.iter().map(instruction_to_json).collect(),
        };

        serde_json::to_string_pretty(&capture)
            .map_err(|e| CaptureError::Generic(format!("JSON serialization error: {}", e)))
    }

    fn format_report(&self, report: &DiffReport) -> Result<String, CaptureError> {
        serde_json::to_string_pretty(report)
            .map_err(|e| CaptureError::Generic(format!("JSON serialization error: {}", e)))
    }
}

/// Convert an instruction row to JSON format
fn instruction_to_json(line: &ListingLine) -> InstructionJson {
    InstructionJson {
        address: format!("0x{:x}", line.addr),
        bytes: line.bytes.clone(),
        mnemonic: line.mnemonic.clone(),
        operands: line.operands.clone(),
    }
}
