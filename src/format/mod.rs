//! Output format module implementation

mod json;
mod csv;

use crate::parser::SectionIndex;
use crate::{Disassembly, DisassemblyError, InstructionSpan};
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;
use clap::ValueEnum;
use goblin::elf::section_header::sht_to_str;

/// Supported output formats for disassembly results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output (default)
    #[default]
    Text,
    /// JSON format (hierarchical)
    Json,
    /// JSON Lines format (one JSON object per line)
    #[value(name = "jsonl")]
    JsonLines,
    /// CSV format (comma-separated values)
    Csv,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "jsonlines" => Ok(OutputFormat::JsonLines),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[
            OutputFormat::Text,
            OutputFormat::Json,
            OutputFormat::JsonLines,
            OutputFormat::Csv,
        ]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn DisassemblyFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

/// Formatter trait for disassembly output
pub trait DisassemblyFormatter {
    /// Format a disassembly result
    fn format(&self, disassembly: &Disassembly<'_>) -> Result<String, DisassemblyError>;
}

/// Format disassembly in plain text
pub struct TextFormatter;

/// Format disassembly in JSON
pub struct JsonFormatter;

/// Format disassembly in JSON Lines
pub struct JsonLinesFormatter;

/// Format disassembly in CSV
pub struct CsvFormatter;

/// Space-separated lowercase hex of `bytes`.
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Short prefix summary, e.g. `legacy,rex`.
pub(crate) fn prefix_flags(span: &InstructionSpan) -> String {
    let mut flags = Vec::new();
    if span.had_legacy_prefixes {
        flags.push("legacy");
    }
    if span.had_rex {
        flags.push("rex");
    }
    if span.had_vex {
        flags.push("vex");
    }
    flags.join(",")
}

impl DisassemblyFormatter for TextFormatter {
    fn format(&self, disassembly: &Disassembly<'_>) -> Result<String, DisassemblyError> {
        let mut output = String::new();

        for section in disassembly.sections() {
            output.push_str(&format!("Disassembly of section <{}>:\n\n", section.name));

            for span in &section.spans {
                let bytes = hex_bytes(section.span_bytes(span));
                let mut line = format!(
                    "  +0x{:06x}: {:<44} {:>2}  {:<8}",
                    span.start_offset, bytes, span.length, span.opcode_map
                );
                let flags = prefix_flags(span);
                if !flags.is_empty() {
                    line.push_str(&format!(" [{}]", flags));
                }
                if let Some(hint) = span.branch_hint {
                    line.push_str(&format!(" hint={}", hint));
                }
                output.push_str(line.trim_end());
                output.push('\n');
            }

            if let Some(stop) = &section.stop {
                output.push_str(&format!("  stopped at +0x{:x}: {}\n", stop.offset, stop.error));
            }
            output.push('\n');
        }

        Ok(output)
    }
}

/// Table of every section in `index`: position, name, type, file range, and
/// whether it would be disassembled.
pub fn section_listing(index: &SectionIndex<'_>) -> Result<String, DisassemblyError> {
    let mut output = String::new();
    let _ = writeln!(
        output,
        "{:>4}  {:<24} {:<14} {:>10} {:>10}  exec",
        "idx", "name", "type", "offset", "size"
    );

    for section in index.sections() {
        let name = index.name(section)?;
        let _ = writeln!(
            output,
            "{:>4}  {:<24} {:<14} {:>#10x} {:>#10x}  {}",
            section.index,
            name,
            sht_to_str(section.section_type),
            section.file_offset,
            section.size,
            if section.is_executable { "yes" } else { "no" }
        );
    }

    Ok(output)
}
