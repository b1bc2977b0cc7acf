//! HTTP surface: producer API, queue inspection, webhook ingress and
//! function calls.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use herald_core::domain::{Event, EventFilter, EventId, NewEvent, QueueError};
use herald_core::ports::{EventStore, QueueCounts};
use herald_core::producers::{
    EventEmitter, FunctionCall, FunctionCallAdapter, FunctionCallError, FunctionCallOutcome,
    WebhookError, WebhookReceiver, WebhookRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Upper bound on `GET /events?limit=`.
pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub emitter: EventEmitter,
    pub store: Arc<dyn EventStore>,
    pub webhooks: Arc<WebhookReceiver>,
    pub functions: Arc<FunctionCallAdapter>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(create_event).get(list_events))
        .route("/events/batch", post(create_events))
        .route("/events/{id}", get(get_event))
        .route("/events/{id}/cancel", post(cancel_event))
        .route("/queue/counts", get(queue_counts))
        .route("/webhooks/{name}", post(receive_webhook))
        .route("/functions/{name}", post(call_function))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Queue(QueueError),
    Webhook(WebhookError),
    Function(FunctionCallError),
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        ApiError::Queue(err)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}

impl From<FunctionCallError> for ApiError {
    fn from(err: FunctionCallError) -> Self {
        ApiError::Function(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn queue_status(err: &QueueError) -> StatusCode {
    match err {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::InvalidTransition { .. }
        | QueueError::StaleClaim(_)
        | QueueError::DuplicateId(_) => StatusCode::CONFLICT,
        QueueError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
        QueueError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Queue(err) => (queue_status(err), err.to_string()),
            ApiError::Webhook(err) => {
                let status = match err {
                    WebhookError::UnknownEndpoint(_) => StatusCode::NOT_FOUND,
                    WebhookError::Inactive(_) => StatusCode::CONFLICT,
                    WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
                    WebhookError::Enqueue(e) => queue_status(e),
                    WebhookError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
            ApiError::Function(err) => {
                let status = match err {
                    FunctionCallError::UnknownFunction(_) => StatusCode::NOT_FOUND,
                    FunctionCallError::Failed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    FunctionCallError::Enqueue(e) => queue_status(e),
                };
                (status, err.to_string())
            }
        };
        if status.is_server_error() {
            error!(error = %message, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

fn parse_id(raw: &str) -> Result<EventId, ApiError> {
    raw.parse()
        .map_err(|e: herald_core::domain::ParseIdError| ApiError::BadRequest(e.to_string()))
}

/// Optional caller identity; when present, reads and cancels are scoped to it.
#[derive(Debug, Default, Deserialize)]
struct OwnerQuery {
    owner: Option<String>,
}

async fn create_event(
    State(state): State<AppState>,
    Json(new): Json<NewEvent>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.emitter.emit(new).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn create_events(
    State(state): State<AppState>,
    Json(batch): Json<Vec<NewEvent>>,
) -> Result<(StatusCode, Json<Vec<Event>>), ApiError> {
    let events = state.emitter.emit_batch(batch).await?;
    Ok((StatusCode::CREATED, Json(events)))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<Event>, ApiError> {
    let id = parse_id(&id)?;
    let event = match owner.owner {
        Some(owner) => state.emitter.get_owned(id, &owner).await?,
        None => state.store.get(id).await?,
    };
    Ok(Json(event))
}

async fn list_events(
    State(state): State<AppState>,
    Query(mut filter): Query<EventFilter>,
) -> Result<Json<Vec<Event>>, ApiError> {
    filter.limit = filter.limit.min(MAX_LIST_LIMIT);
    Ok(Json(state.store.list(&filter).await?))
}

async fn cancel_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(owner): Query<OwnerQuery>,
) -> Result<Json<Event>, ApiError> {
    let id = parse_id(&id)?;
    let event = match owner.owner {
        Some(owner) => state.emitter.cancel_owned(id, &owner).await?,
        None => state.store.cancel(id).await?,
    };
    Ok(Json(event))
}

async fn queue_counts(State(state): State<AppState>) -> Result<Json<QueueCounts>, ApiError> {
    Ok(Json(state.store.counts_by_status().await?))
}

#[derive(Serialize)]
struct WebhookAccepted {
    event_id: EventId,
    event_type: String,
}

async fn receive_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAccepted>), ApiError> {
    let mut request = WebhookRequest::new(body.to_vec());
    for (header, value) in &headers {
        if let Ok(value) = value.to_str() {
            request.insert_header(header.as_str(), value);
        }
    }
    let receipt = state.webhooks.receive(&name, request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAccepted {
            event_id: receipt.event_id,
            event_type: receipt.event_type,
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct FunctionCallBody {
    #[serde(default = "empty_arguments")]
    arguments: serde_json::Value,
    #[serde(default)]
    owner: Option<String>,
}

fn empty_arguments() -> serde_json::Value {
    serde_json::json!({})
}

async fn call_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<FunctionCallBody>,
) -> Result<Json<FunctionCallOutcome>, ApiError> {
    let outcome = state
        .functions
        .call(FunctionCall {
            name,
            arguments: body.arguments,
            owner: body.owner,
        })
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use herald_core::domain::{EventStatus, SignatureAlgorithm, WebhookEndpoint};
    use herald_core::impls::{InMemoryAuditLog, InMemoryWebhookEndpointStore};
    use herald_core::ports::{Clock, SystemClock, UlidGenerator, WebhookEndpointStore};
    use herald_core::producers::EnqueueTarget;
    use herald_core::producers::signing::compute_signature;
    use herald_core::queue::{InMemoryEventStore, RetryPolicy};

    use crate::builtins::EchoFunction;

    async fn state() -> AppState {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::with_clock(
            RetryPolicy::default(),
            Arc::clone(&clock),
        ));
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        let endpoints = Arc::new(InMemoryWebhookEndpointStore::new());
        endpoints
            .upsert(WebhookEndpoint::new("github", "github", "s3cret"))
            .await
            .unwrap();
        let audit = Arc::new(InMemoryAuditLog::new());
        let emitter = EventEmitter::new(Arc::clone(&store));

        let mut functions = FunctionCallAdapter::new(
            emitter.clone(),
            audit.clone(),
            ids.clone(),
            Arc::clone(&clock),
        );
        functions.register_reply("echo", Arc::new(EchoFunction)).unwrap();
        functions
            .register_enqueue("report", EnqueueTarget::new("job:report"))
            .unwrap();

        AppState {
            emitter,
            store: Arc::clone(&store),
            webhooks: Arc::new(WebhookReceiver::new(endpoints, audit, store, ids, clock)),
            functions: Arc::new(functions),
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn create_get_list_and_cancel() {
        let router = router(state().await);

        let (status, created) = send(
            &router,
            json_request(
                "POST",
                "/events",
                serde_json::json!({"event_type": "job:export", "payload": {"a": 1}, "owner": "alice"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "pending");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, fetched) = send(&router, empty_request("GET", &format!("/events/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["event_type"], "job:export");

        let (status, _) = send(
            &router,
            empty_request("GET", &format!("/events/{id}?owner=bob")),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, listed) = send(
            &router,
            empty_request("GET", "/events?status=pending&owner=alice&limit=10"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, cancelled) = send(
            &router,
            empty_request("POST", &format!("/events/{id}/cancel?owner=alice")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cancelled["status"], "cancelled");

        let (status, _) = send(
            &router,
            empty_request("POST", &format!("/events/{id}/cancel")),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, counts) = send(&router, empty_request("GET", "/queue/counts")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(counts["cancelled"], 1);
    }

    #[tokio::test]
    async fn invalid_input_is_a_bad_request() {
        let router = router(state().await);

        let (status, body) = send(
            &router,
            json_request(
                "POST",
                "/events",
                serde_json::json!({"event_type": "", "payload": {}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid event"));

        let (status, _) = send(&router, empty_request("GET", "/events/not-an-id")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let state = state().await;
        let store = Arc::clone(&state.store);
        let router = router(state);

        let (status, _) = send(
            &router,
            json_request(
                "POST",
                "/events/batch",
                serde_json::json!([
                    {"event_type": "job:a", "payload": {}},
                    {"event_type": "job b", "payload": {}}
                ]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(store.counts_by_status().await.unwrap().total(), 0);

        let (status, created) = send(
            &router,
            json_request(
                "POST",
                "/events/batch",
                serde_json::json!([
                    {"event_type": "job:a", "payload": {}},
                    {"event_type": "job:b", "payload": {}, "priority": 2}
                ]),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn webhook_status_codes() {
        let state = state().await;
        let store = Arc::clone(&state.store);
        let router = router(state);
        let body = r#"{"type":"push"}"#;
        let signature = format!(
            "sha256={}",
            compute_signature(SignatureAlgorithm::HmacSha256, b"s3cret", body.as_bytes())
        );

        let accepted = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("X-Signature-256", signature)
            .body(Body::from(body))
            .unwrap();
        let (status, receipt) = send(&router, accepted).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(receipt["event_type"], "webhook:github:push");

        let forged = Request::builder()
            .method("POST")
            .uri("/webhooks/github")
            .header("X-Signature-256", "sha256=00")
            .body(Body::from(body))
            .unwrap();
        let (status, _) = send(&router, forged).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&router, empty_request("POST", "/webhooks/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let pending = store
            .list(&EventFilter {
                status: Some(EventStatus::Pending),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn function_calls() {
        let router = router(state().await);

        let (status, reply) = send(
            &router,
            json_request("POST", "/functions/echo", serde_json::json!({"arguments": {"x": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["result"]["x"], 1);

        let (status, enqueued) = send(
            &router,
            json_request("POST", "/functions/report", serde_json::json!({"owner": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(enqueued["status"], "enqueued");
        let event_id = enqueued["event_id"].as_str().unwrap().to_string();
        let (status, event) = send(
            &router,
            empty_request("GET", &format!("/events/{event_id}?owner=alice")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(event["event_type"], "job:report");

        let (status, _) = send(
            &router,
            json_request("POST", "/functions/missing", serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
