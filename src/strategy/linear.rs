//! Linear-sweep disassembly strategy, sequential or one rayon task per section

use crate::decoder::DecodeError;
use crate::parser::{Section, SectionIndex};
use crate::source::ByteSource;
use crate::{DecodeStop, Decoder, Disassembly, DisassemblyError, InstructionSpan, SectionDisassembly};
use std::time::Instant;
use rayon::prelude::*;

/// Decode `code` from offset 0 until it is exhausted or an instruction fails.
///
/// # Returns
/// The spans in address order, and where decoding stopped if it did not
/// reach the end. Spans decoded before a failure are kept.
pub fn sweep(code: &ByteSource<'_>, decoder: &dyn Decoder) -> (Vec<InstructionSpan>, Option<DecodeStop>) {
    let mut spans = Vec::new();
    let mut at = 0;

    while at < code.len() {
        match decoder.decode(code, at) {
            Ok(span) if span.length == 0 => {
                return (spans, Some(DecodeStop { offset: at, error: DecodeError::NoProgress }));
            }
            Ok(span) => {
                at += span.length as usize;
                spans.push(span);
            }
            Err(error) => return (spans, Some(DecodeStop { offset: at, error })),
        }
    }

    (spans, None)
}

/// Resolve, slice, and sweep one section.
pub fn sweep_section<'a>(
    index: &SectionIndex<'a>,
    section: &Section,
    decoder: &dyn Decoder,
) -> Result<SectionDisassembly<'a>, DisassemblyError> {
    let name = index.name(section)?.into_owned();
    let code = index.content(section)?;

    let (spans, stop) = sweep(&code, decoder);

    log::debug!("{}: {} bytes, {} instructions", name, section.size, spans.len());
    if let Some(stop) = &stop {
        log::warn!("{}: decoding stopped at +0x{:x}: {}", name, stop.offset, stop.error);
    }

    Ok(SectionDisassembly {
        index: section.index,
        name,
        file_offset: section.file_offset,
        size: section.size,
        code: code.as_bytes(),
        spans,
        stop,
    })
}

/// Linear sweep over `sections`, in the order given.
pub fn run<'a>(
    index: &SectionIndex<'a>,
    sections: &[&Section],
    decoder: &dyn Decoder,
) -> Result<Disassembly<'a>, DisassemblyError> {
    let start_time = Instant::now();

    let results = sections
        .iter()
        .map(|section| sweep_section(index, section, decoder))
        .collect::<Result<Vec<_>, _>>()?;

    let disassembly = Disassembly::new(results);
    log::debug!(
        "Linear sweep of {} sections completed in {:?}: {} instructions",
        sections.len(),
        start_time.elapsed(),
        disassembly.instruction_count()
    );
    Ok(disassembly)
}

/// Linear sweep with the sections decoded in parallel.
///
/// Results come back in the order of `sections`, so the output is identical
/// to [`run`].
pub fn run_parallel<'a>(
    index: &SectionIndex<'a>,
    sections: &[&Section],
    decoder: &dyn Decoder,
) -> Result<Disassembly<'a>, DisassemblyError> {
    let start_time = Instant::now();

    let results = sections
        .par_iter()
        .map(|section| sweep_section(index, section, decoder))
        .collect::<Result<Vec<_>, _>>()?;

    let disassembly = Disassembly::new(results);
    log::debug!(
        "Parallel linear sweep of {} sections completed in {:?}: {} instructions",
        sections.len(),
        start_time.elapsed(),
        disassembly.instruction_count()
    );
    Ok(disassembly)
}
