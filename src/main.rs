use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use insnlen::format::{section_listing, OutputFormat};
use insnlen::parser::SectionIndex;
use insnlen::source::ByteSource;
use insnlen::strategy::Strategy;
use insnlen::X86_64Decoder;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to ELF64 file
    path: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Section walking strategy
    #[arg(short, long, value_enum, default_value_t = Strategy::Linear)]
    strategy: Strategy,

    /// Only disassemble the named section
    #[arg(long, value_name = "NAME")]
    section: Option<String>,

    /// Print the section header table instead of disassembling
    #[arg(long)]
    list_sections: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let binary_data = insnlen::load_file(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let index = SectionIndex::build(ByteSource::new(&binary_data))
        .with_context(|| format!("failed to index sections of {}", args.path.display()))?;

    let output = if args.list_sections {
        section_listing(&index)?
    } else {
        let decoder = X86_64Decoder::new();
        let disassembly = match &args.section {
            Some(name) => {
                let section = index.lookup_by_name(name)?;
                if !section.is_executable {
                    bail!("section {} is not executable", name);
                }
                args.strategy.run_sections(&index, &[section], &decoder)?
            }
            None => args.strategy.run(&index, &decoder)?,
        };
        args.format.get_formatter().format(&disassembly)?
    };

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(output.as_bytes())
        .context("failed to write output")?;
    Ok(())
}
