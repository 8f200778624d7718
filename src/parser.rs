use std::sync::LazyLock;

use regex::Regex;

use crate::campaign::RawData;
use crate::error::KiraError;

static CELL_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,;]+").expect("valid separator regex"));

/// Parses a DAD text export.
///
/// The first non-comment line is a header: a label cell followed by the
/// wavelengths. Every further line is a time followed by one absorbance per
/// wavelength. Lines starting with `#` are skipped.
pub fn parse_chromatogram(name: &str, content: &str) -> Result<RawData, KiraError> {
    let fail = |message: String| KiraError::DataFormat {
        name: name.to_string(),
        message,
    };

    let mut lines = content
        .lines()
        .enumerate()
        .map(|(number, line)| (number + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let (header_line, header) = lines
        .next()
        .ok_or_else(|| fail("file is empty".to_string()))?;
    let wavelength = split_cells(header)
        .skip(1)
        .map(|cell| parse_number(cell, header_line))
        .collect::<Result<Vec<_>, _>>()
        .map_err(fail)?;
    if wavelength.is_empty() {
        return Err(fail("header lists no wavelengths".to_string()));
    }

    let mut time = Vec::new();
    let mut absorbance = Vec::new();
    for (number, line) in lines {
        let mut values = split_cells(line)
            .map(|cell| parse_number(cell, number))
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;
        if values.len() != wavelength.len() + 1 {
            return Err(fail(format!(
                "line {number}: expected {} values, found {}",
                wavelength.len() + 1,
                values.len()
            )));
        }
        let row = values.split_off(1);
        time.push(values[0]);
        absorbance.push(row);
    }

    RawData::new(time, wavelength, absorbance).map_err(fail)
}

pub fn parse_chromatogram_bytes(name: &str, bytes: &[u8]) -> Result<RawData, KiraError> {
    let content = std::str::from_utf8(bytes).map_err(|_| KiraError::DataFormat {
        name: name.to_string(),
        message: "file is not UTF-8 text".to_string(),
    })?;
    parse_chromatogram(name, content)
}

fn split_cells(line: &str) -> impl Iterator<Item = &str> {
    CELL_SEPARATOR.split(line).filter(|cell| !cell.is_empty())
}

fn parse_number(cell: &str, line: usize) -> Result<f64, String> {
    match cell.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(format!("line {line}: `{cell}` is not a finite number")),
    }
}
