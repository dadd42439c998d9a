//! `regimport upload` command implementation

use crate::api::ApiClient;
use crate::error::Result;
use crate::progress;
use colored::Colorize;
use std::path::Path;

/// Upload `file` into the job `slug`
pub async fn run(client: &ApiClient, slug: &str, file: &Path) -> Result<()> {
    println!("{} Uploading {} to job {}...", "↑".cyan(), file.display(), slug.bold());

    let pb = progress::create_upload_progress(&format!("Uploading {}", file.display()));
    let result = client.upload(slug, file, &pb).await;
    let outcome = match result {
        Ok(outcome) => {
            pb.finish_and_clear();
            outcome
        }
        Err(e) => {
            pb.abandon();
            return Err(e);
        }
    };

    println!(
        "{} Staged {} row(s) for job {} (id {})",
        "✓".green(),
        outcome.rows_staged,
        outcome.slug.as_str().bold(),
        outcome.job_id
    );
    println!("  Columns: {}", outcome.columns.join(", "));
    println!(
        "  Follow progress with: regimport watch --ids {}",
        outcome.job_id
    );

    Ok(())
}
