//! Header detection for streamed uploads
//!
//! The gateway buffers only the start of an upload: enough to skip the
//! configured leading lines and read the header row. Each of those lines
//! must end within `probe_bytes` of its start, so a binary or single-line
//! upload is refused before anything is staged.

/// Result of scanning the buffered prefix of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProbe {
    /// Header row occupies `start..end`; `end` is just past its newline
    Found { start: usize, end: usize },
    /// Buffer more input and probe again
    NeedMore,
    /// A line ran past the probe window without a newline
    NoNewline,
}

/// Locate the header row after `skip_lines` leading lines
pub fn locate_header(buf: &[u8], skip_lines: usize, probe_bytes: usize) -> HeaderProbe {
    let mut start = 0;
    for line in 0..=skip_lines {
        match buf[start..].iter().position(|b| *b == b'\n') {
            Some(offset) if offset < probe_bytes => {
                let end = start + offset + 1;
                if line == skip_lines {
                    return HeaderProbe::Found { start, end };
                }
                start = end;
            },
            Some(_) => return HeaderProbe::NoNewline,
            None if buf.len() - start >= probe_bytes => return HeaderProbe::NoNewline,
            None => return HeaderProbe::NeedMore,
        }
    }
    HeaderProbe::NeedMore
}

/// Columns of the staging relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingColumns {
    /// Every column in file order; unnamed header cells get a placeholder
    pub all: Vec<String>,
    /// Columns with a header name, read back by the processor
    pub named: Vec<String>,
}

const PLACEHOLDER_PREFIX: &str = "_unnamed_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("header row is empty")]
    Empty,

    #[error("header row is not valid CSV: {0}")]
    Malformed(String),

    #[error("duplicate column '{0}' in header row")]
    Duplicate(String),
}

/// Parse a header line with CSV quoting rules
pub fn parse_header(line: &[u8], delimiter: u8) -> Result<StagingColumns, HeaderError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_reader(line);

    let record = match reader.records().next() {
        Some(record) => record.map_err(|e| HeaderError::Malformed(e.to_string()))?,
        None => return Err(HeaderError::Empty),
    };

    let mut all = Vec::with_capacity(record.len());
    let mut named = Vec::with_capacity(record.len());
    for (index, cell) in record.iter().enumerate() {
        let name = cell.trim_start_matches('\u{feff}').trim();
        if name.is_empty() {
            all.push(format!("{PLACEHOLDER_PREFIX}{}", index + 1));
            continue;
        }
        if named.iter().any(|n: &String| n.eq_ignore_ascii_case(name)) {
            return Err(HeaderError::Duplicate(name.to_string()));
        }
        all.push(name.to_string());
        named.push(name.to_string());
    }

    if named.is_empty() {
        return Err(HeaderError::Empty);
    }
    Ok(StagingColumns { all, named })
}
