//! JSON and JSON Lines output formatters

use serde::Serialize;
use serde_json::json;

use crate::{BranchHint, Disassembly, DisassemblyError, InstructionSpan, OpcodeMap, SectionDisassembly};
use super::{hex_bytes, DisassemblyFormatter};

/// Serializable instruction for JSON output
#[derive(Serialize)]
struct InstructionJson {
    /// Section-relative offset
    offset: usize,
    /// Length of the instruction in bytes
    length: u8,
    /// Bytes of the instruction as hex string
    bytes: String,
    opcode_map: OpcodeMap,
    /// Opcode byte as hex string
    opcode: String,
    had_legacy_prefixes: bool,
    had_rex: bool,
    had_vex: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch_hint: Option<BranchHint>,
}

/// Where a section stopped decoding
#[derive(Serialize)]
struct StopJson {
    offset: usize,
    error: String,
}

/// Serializable section for JSON output
#[derive(Serialize)]
struct SectionJson {
    name: String,
    /// Position in the section header table
    index: usize,
    /// File offset of the section content
    file_offset: String,
    size: u64,
    complete: bool,
    instructions: Vec<InstructionJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<StopJson>,
}

/// Serializable disassembly result for JSON output
#[derive(Serialize)]
struct DisassemblyJson {
    instruction_count: usize,
    sections: Vec<SectionJson>,
}

fn json_error(e: serde_json::Error) -> DisassemblyError {
    DisassemblyError::Formatting(format!("JSON serialization error: {}", e))
}

impl DisassemblyFormatter for super::JsonFormatter {
    fn format(&self, disassembly: &Disassembly<'_>) -> Result<String, DisassemblyError> {
        let result = DisassemblyJson {
            instruction_count: disassembly.instruction_count(),
            sections: disassembly.sections().iter().map(section_to_json).collect(),
        };

        serde_json::to_string_pretty(&result).map_err(json_error)
    }
}

impl DisassemblyFormatter for super::JsonLinesFormatter {
    fn format(&self, disassembly: &Disassembly<'_>) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for section in disassembly.sections() {
            let header = json!({
                "type": "section",
                "name": section.name,
                "index": section.index,
                "file_offset": format!("0x{:x}", section.file_offset),
                "size": section.size,
                "complete": section.is_complete(),
            });
            output.push_str(&serde_json::to_string(&header).map_err(json_error)?);
            output.push('\n');

            for span in &section.spans {
                let mut record = serde_json::to_value(instruction_to_json(section, span)).map_err(json_error)?;
                record["type"] = json!("instruction");
                record["section"] = json!(section.name);
                output.push_str(&serde_json::to_string(&record).map_err(json_error)?);
                output.push('\n');
            }

            if let Some(stop) = &section.stop {
                let marker = json!({
                    "type": "stop",
                    "section": section.name,
                    "offset": stop.offset,
                    "error": stop.error.to_string(),
                });
                output.push_str(&serde_json::to_string(&marker).map_err(json_error)?);
                output.push('\n');
            }
        }

        Ok(output)
    }
}

/// Convert an instruction span to JSON format
fn instruction_to_json(section: &SectionDisassembly<'_>, span: &InstructionSpan) -> InstructionJson {
    InstructionJson {
        offset: span.start_offset,
        length: span.length,
        bytes: hex_bytes(section.span_bytes(span)),
        opcode_map: span.opcode_map,
        opcode: format!("0x{:02x}", span.opcode),
        had_legacy_prefixes: span.had_legacy_prefixes,
        had_rex: span.had_rex,
        had_vex: span.had_vex,
        branch_hint: span.branch_hint,
    }
}

/// Convert a section result to JSON format
fn section_to_json(section: &SectionDisassembly<'_>) -> SectionJson {
    SectionJson {
        name: section.name.clone(),
        index: section.index,
        file_offset: format!("0x{:x}", section.file_offset),
        size: section.size,
        complete: section.is_complete(),
        instructions: section.spans.iter().map(|span| instruction_to_json(section, span)).collect(),
        stop: section.stop.as_ref().map(|stop| StopJson {
            offset: stop.offset,
            error: stop.error.to_string(),
        }),
    }
}
