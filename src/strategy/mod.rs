//! Disassembly strategies

use std::fmt;
use clap::ValueEnum;
use crate::parser::{Section, SectionIndex};
use crate::{Decoder, Disassembly, DisassemblyError};

/// Available disassembly strategies.
#[derive(Copy, Clone, ValueEnum, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Linear sweep, one section after another
    #[default]
    Linear,
    /// Linear sweep with one rayon task per section
    Parallel,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Linear => write!(f, "Linear sweep"),
            Strategy::Parallel => write!(f, "Parallel linear sweep"),
        }
    }
}

impl Strategy {
    /// Walk every executable section of `index` using `decoder`.
    pub fn run<'a>(&self, index: &SectionIndex<'a>, decoder: &dyn Decoder) -> Result<Disassembly<'a>, DisassemblyError> {
        self.run_sections(index, &index.executable_sections(), decoder)
    }

    /// Walk only `sections`, which must belong to `index`.
    pub fn run_sections<'a>(
        &self,
        index: &SectionIndex<'a>,
        sections: &[&Section],
        decoder: &dyn Decoder,
    ) -> Result<Disassembly<'a>, DisassemblyError> {
        match self {
            Strategy::Linear   => linear::run(index, sections, decoder),
            Strategy::Parallel => linear::run_parallel(index, sections, decoder),
        }
    }

    /// Return all available strategies
    pub fn all() -> &'static [Strategy] {
        &[Strategy::Linear, Strategy::Parallel]
    }
}

pub mod linear;
