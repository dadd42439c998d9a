//! API endpoint URL builders

use registry_common::types::SubscriptionScope;

/// Build health check URL
pub fn health_url(base_url: &str) -> String {
    format!("{}/health", base_url.trim_end_matches('/'))
}

/// Build upload URL
pub fn upload_url(base_url: &str) -> String {
    format!("{}/api/v1/import/upload", base_url.trim_end_matches('/'))
}

/// Build status stream URL for `ids` and `scope`
pub fn status_stream_url(base_url: &str, ids: &[i64], scope: SubscriptionScope) -> String {
    let ids = ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}/api/v1/sse/import-jobs?ids={}&scope={}",
        base_url.trim_end_matches('/'),
        ids,
        scope.as_str()
    )
}
