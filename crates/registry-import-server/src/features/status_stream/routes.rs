use crate::api::response::ErrorResponse;
use crate::config::NotificationConfig;
use crate::notifications::{Broker, Filter, Outbound};
use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::Stream;
use registry_common::types::{parse_id_list, Handshake, NotificationFrame, SubscriptionScope};
use registry_common::RegistryError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::convert::Infallible;

use super::queries::{JobSnapshotError, JobSnapshotQuery};

#[derive(Clone)]
pub struct StreamState {
    pub db: PgPool,
    pub broker: Broker,
    pub config: NotificationConfig,
}

impl FromRef<StreamState> for PgPool {
    fn from_ref(state: &StreamState) -> Self {
        state.db.clone()
    }
}

pub fn status_stream_routes() -> Router<StreamState> {
    Router::new().route("/import-jobs", get(import_job_stream))
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    pub ids: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl StreamParams {
    fn parse(&self) -> Result<(SubscriptionScope, Vec<i64>), RegistryError> {
        let scope = match self.scope.as_deref() {
            Some(raw) if !raw.is_empty() => raw.parse()?,
            _ => SubscriptionScope::default(),
        };
        let ids = match self.ids.as_deref() {
            Some(raw) => parse_id_list(raw)?,
            None => Vec::new(),
        };
        Ok((scope, ids))
    }
}

/// Server-sent events for import jobs
///
/// The connection is registered with the broker before the snapshot is
/// read, so no change between the two is lost. Frames arrive as
/// `handshake`, then one `import_job` Update per tracked job that exists,
/// then live `import_job`/`worker_status` frames and `heartbeat` events.
#[tracing::instrument(skip(state))]
async fn import_job_stream(
    State(state): State<StreamState>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StreamApiError> {
    let (scope, ids) = params.parse()?;

    let mut subscription = state.broker.subscribe(Filter::new(scope, ids.iter().copied()));
    let snapshot =
        super::queries::snapshot::handle(state.db.clone(), JobSnapshotQuery { ids: ids.clone() })
            .await?;

    let handshake = Handshake {
        server_time: Utc::now(),
        connection_id: subscription.id(),
        scope,
        ids,
    };
    let retry = state.config.retry();

    let stream = async_stream::stream! {
        if let Some(event) = json_event("handshake", &handshake) {
            yield Ok(event.retry(retry));
        }
        for frame in &snapshot {
            if let Some(event) = frame_event(frame) {
                yield Ok(event);
            }
        }
        while let Some(message) = subscription.recv().await {
            let event = match message {
                Outbound::Frame(frame) => frame_event(&frame),
                Outbound::Heartbeat(timestamp) => heartbeat_event(timestamp),
            };
            if let Some(event) = event {
                yield Ok(event);
            }
        }
        tracing::debug!(connection_id = handshake.connection_id, "Outbox closed, ending stream");
    };

    Ok(Sse::new(stream))
}

fn json_event(name: &str, data: &impl Serialize) -> Option<Event> {
    match Event::default().event(name).json_data(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(event = name, error = %e, "Failed to serialize stream event");
            None
        },
    }
}

fn frame_event(frame: &NotificationFrame) -> Option<Event> {
    json_event(frame.channel.as_str(), frame)
}

fn heartbeat_event(timestamp: DateTime<Utc>) -> Option<Event> {
    json_event("heartbeat", &json!({ "timestamp": timestamp }))
}

#[derive(Debug, thiserror::Error)]
enum StreamApiError {
    #[error(transparent)]
    Params(#[from] RegistryError),
    #[error(transparent)]
    Snapshot(#[from] JobSnapshotError),
}

impl IntoResponse for StreamApiError {
    fn into_response(self) -> Response {
        match &self {
            StreamApiError::Params(_) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("VALIDATION_ERROR", self.to_string())),
            )
                .into_response(),
            StreamApiError::Snapshot(_) => {
                tracing::error!(error = %self, "Status stream snapshot failed");
                let error = ErrorResponse::new("INTERNAL_ERROR", "A database error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },
        }
    }
}
