//! Reader over a job's staging relation
//!
//! Staging tables are created by the upload gateway as
//! `import_upload_<job id>(_row_id bigserial, <one text column per header>)`.
//! Rows come back in load order through a streaming query, so memory stays
//! flat regardless of the upload size.

use futures::{Stream, TryStreamExt};
use sqlx::{PgPool, Row};

use super::{ReaderError, RowStream};
use crate::db::quote_ident;
use crate::ingest::types::RawRow;

/// Name of the staging relation of a job
pub fn table_name(job_id: i64) -> String {
    format!("import_upload_{job_id}")
}

pub fn rows(pool: PgPool, table: String, columns: Vec<String>) -> RowStream {
    Box::pin(stream_rows(pool, table, columns))
}

fn stream_rows(
    pool: PgPool,
    table: String,
    columns: Vec<String>,
) -> impl Stream<Item = Result<RawRow, ReaderError>> + Send + 'static {
    async_stream::try_stream! {
        if !columns.is_empty() {
            let sql = select_sql(&table, &columns);
            let mut records = sqlx::query(&sql).fetch(&pool);
            while let Some(record) = records.try_next().await? {
                let mut row = RawRow::new();
                for (index, column) in columns.iter().enumerate() {
                    let value: Option<String> = record.try_get(index)?;
                    row.push(column.clone(), value.unwrap_or_default());
                }
                if !row.is_blank() {
                    yield row;
                }
            }
        }
    }
}

fn select_sql(table: &str, columns: &[String]) -> String {
    let list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("SELECT {list} FROM {} ORDER BY _row_id", quote_ident(table))
}

/// Drop a job's staging relation once its rows are processed
pub async fn drop_table(pool: &PgPool, table: &str) -> Result<(), ReaderError> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
        .execute(pool)
        .await?;
    Ok(())
}
