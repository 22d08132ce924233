//! Python bindings for the insnlen length decoder

use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::exceptions::{PyIOError, PyValueError};
use crate::format::OutputFormat;
use crate::{
    parser::SectionIndex,
    source::ByteSource,
    strategy::Strategy,
    X86_64Decoder,
};

/// Disassemble an ELF64 image with specified strategy and output format
#[pyfunction]
#[pyo3(signature = (binary_data, strategy="linear", output_format="text"))]
fn disassemble(binary_data: Vec<u8>, strategy: &str, output_format: &str) -> PyResult<String> {
    let strategy = match strategy.to_lowercase().as_str() {
        "linear" => Strategy::Linear,
        "parallel" => Strategy::Parallel,
        _ => return Err(PyValueError::new_err(format!("Unknown strategy: {}", strategy))),
    };
    let output_format: OutputFormat = output_format.parse().map_err(PyValueError::new_err)?;

    let index = SectionIndex::build(ByteSource::new(&binary_data))
        .map_err(|e| PyValueError::new_err(format!("Failed to parse binary: {}", e)))?;

    let disassembly = strategy
        .run(&index, &X86_64Decoder::new())
        .map_err(|e| PyValueError::new_err(format!("Disassembly failed: {}", e)))?;

    output_format
        .get_formatter()
        .format(&disassembly)
        .map_err(|e| PyValueError::new_err(format!("Failed to format output: {}", e)))
}

/// Disassemble a file with specified strategy and output format
#[pyfunction]
#[pyo3(signature = (file_path, strategy="linear", output_format="text"))]
fn disassemble_file(file_path: &str, strategy: &str, output_format: &str) -> PyResult<String> {
    let bytes = crate::load_file(file_path)
        .map_err(|e| PyIOError::new_err(format!("Failed to read file {}: {}", file_path, e)))?;

    log::debug!("disassembling {}", file_path);
    disassemble(bytes, strategy, output_format)
}

/// Python module initialization
#[pymodule]
fn insnlen(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(disassemble, m)?)?;
    m.add_function(wrap_pyfunction!(disassemble_file, m)?)?;

    let py = m.py();
    let output_format = PyDict::new(py);
    for format in OutputFormat::available_formats() {
        output_format.set_item(format!("{:?}", format).to_uppercase(), format.to_string())?;
    }
    m.setattr("OutputFormat", output_format)?;

    let strategy = PyDict::new(py);
    strategy.set_item("LINEAR", "linear")?;
    strategy.set_item("PARALLEL", "parallel")?;
    m.setattr("Strategy", strategy)?;

    Ok(())
}
