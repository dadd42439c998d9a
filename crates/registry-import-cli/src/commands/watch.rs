//! `regimport watch` command implementation
//!
//! Prints one line per status stream event.

use crate::api::ApiClient;
use crate::error::Result;
use crate::watch::{CompletionTracker, StatusWatcher, WatchEvent};
use colored::Colorize;
use registry_common::types::{parse_id_list, NotificationFrame, SubscriptionScope};
use std::ops::ControlFlow;

pub async fn run(
    client: ApiClient,
    ids: &str,
    scope: SubscriptionScope,
    until_done: bool,
) -> Result<()> {
    let ids = parse_id_list(ids)?;
    let mut tracker = CompletionTracker::new(ids.iter().copied());
    if until_done && tracker.is_done() {
        println!("No job ids given, nothing to wait for.");
        return Ok(());
    }

    let watcher = StatusWatcher::new(client, ids, scope);
    watcher
        .run(|event| {
            println!("{}", render(event));
            match event {
                WatchEvent::Frame(frame) if until_done && tracker.observe(frame) => {
                    ControlFlow::Break(())
                }
                _ => ControlFlow::Continue(()),
            }
        })
        .await?;

    println!("{} All tracked jobs finished", "✓".green());
    Ok(())
}

/// One-line rendering of an event
pub fn render(event: &WatchEvent) -> String {
    match event {
        WatchEvent::Handshake(handshake) => format!(
            "{} connected (connection {}, scope {}, ids {:?})",
            "●".green(),
            handshake.connection_id,
            handshake.scope.as_str(),
            handshake.ids
        ),
        WatchEvent::Heartbeat(timestamp) => {
            format!("{} heartbeat {}", "·".dimmed(), timestamp.to_rfc3339())
        }
        WatchEvent::Frame(frame) => render_frame(frame),
    }
}

fn render_frame(frame: &NotificationFrame) -> String {
    let field = |name: &str| {
        frame
            .entity
            .get(name)
            .map(|value| match value.as_str() {
                Some(text) => text.to_string(),
                None => value.to_string(),
            })
            .unwrap_or_else(|| "-".to_string())
    };
    let id = frame
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} {:?} #{} status={} processed={} failed={} upload={}%",
        frame.channel.as_str().cyan(),
        frame.verb,
        id,
        field("status").as_str().bold(),
        field("rows_processed"),
        field("rows_failed"),
        field("upload_completed_pct"),
    )
}
