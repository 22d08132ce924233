//! CSV output formatter

use serde::Serialize;

use crate::{Disassembly, DisassemblyError};
use super::{hex_bytes, prefix_flags, DisassemblyFormatter};

/// One CSV row: an instruction, or the stop marker of a section
#[derive(Serialize)]
struct Row<'r> {
    section: &'r str,
    offset: String,
    length: Option<u8>,
    bytes: String,
    opcode_map: String,
    opcode: String,
    prefixes: String,
    branch_hint: String,
    error: String,
}

fn csv_error(e: impl std::fmt::Display) -> DisassemblyError {
    DisassemblyError::Formatting(format!("CSV error: {}", e))
}

impl DisassemblyFormatter for super::CsvFormatter {
    fn format(&self, disassembly: &Disassembly<'_>) -> Result<String, DisassemblyError> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        for section in disassembly.sections() {
            for span in &section.spans {
                writer
                    .serialize(Row {
                        section: &section.name,
                        offset: format!("0x{:x}", span.start_offset),
                        length: Some(span.length),
                        bytes: hex_bytes(section.span_bytes(span)),
                        opcode_map: span.opcode_map.to_string(),
                        opcode: format!("0x{:02x}", span.opcode),
                        prefixes: prefix_flags(span),
                        branch_hint: span.branch_hint.map(|h| h.to_string()).unwrap_or_default(),
                        error: String::new(),
                    })
                    .map_err(csv_error)?;
            }

            if let Some(stop) = &section.stop {
                writer
                    .serialize(Row {
                        section: &section.name,
                        offset: format!("0x{:x}", stop.offset),
                        length: None,
                        bytes: String::new(),
                        opcode_map: String::new(),
                        opcode: String::new(),
                        prefixes: String::new(),
                        branch_hint: String::new(),
                        error: stop.error.to_string(),
                    })
                    .map_err(csv_error)?;
            }
        }

        let bytes = writer.into_inner().map_err(csv_error)?;
        String::from_utf8(bytes).map_err(csv_error)
    }
}
