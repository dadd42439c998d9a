//! Row readers
//!
//! Every input yields a lazy, forward-only stream of [`RawRow`]s:
//!
//! - staged uploads are read back from the job's staging relation
//! - `.csv` and `.xml` files on the server are parsed on a blocking thread and
//!   handed over through a bounded channel
//!
//! Streams cannot be restarted; a reclaimed job opens a new one.

pub mod csv;
pub mod staging;
pub mod xml;

use futures::stream::BoxStream;
use sqlx::PgPool;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::ingest::types::{DataSource, ImportJob, RawRow};

/// Rows buffered between a blocking file reader and the processor
const ROW_BUFFER: usize = 256;

pub type RowStream = BoxStream<'static, Result<RawRow, ReaderError>>;

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Job has neither an upload nor a file path")]
    MissingInput,

    /// One record could not be decoded; the rest of the input is still readable
    #[error("Invalid record on line {line}: {message}")]
    InvalidRecord {
        line: u64,
        raw: String,
        message: String,
    },
}

impl ReaderError {
    /// Whether the error only affects a single row
    pub fn is_row_level(&self) -> bool {
        matches!(self, ReaderError::InvalidRecord { .. })
    }
}

/// Open the rows of a job
pub fn open(job: &ImportJob, source: &DataSource, pool: &PgPool) -> Result<RowStream, ReaderError> {
    if let Some(table) = &job.upload_table_name {
        let columns = job.upload_columns.clone().unwrap_or_default();
        return Ok(staging::rows(pool.clone(), table.clone(), columns));
    }
    open_file(job, source)
}

/// Open the server-side file a job names, picking the parser by extension
pub fn open_file(job: &ImportJob, source: &DataSource) -> Result<RowStream, ReaderError> {
    let path = job.file_path.as_deref().ok_or(ReaderError::MissingInput)?;
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => {
            let options = csv::CsvOptions {
                delimiter: source.delimiter_byte(),
                skip_lines: if job.skip_lines_count > 0 {
                    job.skip_lines_count as usize
                } else {
                    source.csv_skip_count.max(0) as usize
                },
            };
            Ok(csv::rows(path.to_string(), options))
        },
        "xml" => Ok(xml::rows(path.to_string())),
        _ => Err(ReaderError::UnsupportedFileType(path.to_string())),
    }
}

/// Run a blocking parser and expose its rows as a stream
///
/// `read` receives an `emit` callback that returns false once the consumer
/// has gone away; parsers stop at that point. Row-level failures go through
/// `emit` as well, an error returned by `read` ends the stream.
fn spawn_blocking_reader<F>(read: F) -> RowStream
where
    F: FnOnce(&mut dyn FnMut(Result<RawRow, ReaderError>) -> bool) -> Result<(), ReaderError>
        + Send
        + 'static,
{
    let (tx, rx) = mpsc::channel(ROW_BUFFER);
    tokio::task::spawn_blocking(move || {
        let mut emit = |item: Result<RawRow, ReaderError>| tx.blocking_send(item).is_ok();
        if let Err(e) = read(&mut emit) {
            let _ = tx.blocking_send(Err(e));
        }
    });
    Box::pin(ReceiverStream::new(rx))
}
