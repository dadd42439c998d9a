//! Delimited text reader for server-side files

use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use super::{spawn_blocking_reader, ReaderError, RowStream};
use crate::ingest::types::RawRow;

const BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    /// Lines skipped before the header row
    pub skip_lines: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_lines: 0,
        }
    }
}

pub fn rows(path: String, options: CsvOptions) -> RowStream {
    spawn_blocking_reader(move |emit| {
        let file = File::open(&path)?;
        parse(file, options, emit)
    })
}

/// Parse delimited text, calling `emit` for every non-blank record
///
/// A trailing delimiter at the end of the header (and therefore an unnamed
/// last column) is tolerated: unnamed columns are dropped. A record that is
/// not valid UTF-8 is emitted as [`ReaderError::InvalidRecord`] and reading
/// goes on with the next one.
pub fn parse<R: Read>(
    input: R,
    options: CsvOptions,
    emit: &mut dyn FnMut(Result<RawRow, ReaderError>) -> bool,
) -> Result<(), ReaderError> {
    let mut input = BufReader::new(input);
    let mut skipped = Vec::new();
    for _ in 0..options.skip_lines {
        skipped.clear();
        if input.read_until(b'\n', &mut skipped)? == 0 {
            return Ok(());
        }
    }

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .trim(::csv::Trim::All)
        .from_reader(input);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches(BOM).trim().to_string())
        .collect();

    for record in reader.byte_records() {
        let record = record?;
        let item = decode(&headers, &record, options.delimiter);
        if let Ok(row) = &item {
            if row.is_empty() || row.is_blank() {
                continue;
            }
        }
        if !emit(item) {
            break;
        }
    }
    Ok(())
}

fn decode(
    headers: &[String],
    record: &::csv::ByteRecord,
    delimiter: u8,
) -> Result<RawRow, ReaderError> {
    let mut row = RawRow::new();
    for (header, value) in headers.iter().zip(record.iter()) {
        if header.is_empty() {
            continue;
        }
        match std::str::from_utf8(value) {
            Ok(value) => row.push(header.as_str(), value.trim()),
            Err(e) => {
                let fields: Vec<String> = record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned())
                    .collect();
                return Err(ReaderError::InvalidRecord {
                    line: record.position().map(|p| p.line()).unwrap_or_default(),
                    raw: fields.join(&char::from(delimiter).to_string()),
                    message: format!("column '{header}' is not valid UTF-8: {e}"),
                });
            },
        }
    }
    Ok(row)
}
