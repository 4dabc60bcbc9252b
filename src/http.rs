//! HTTP surface: create, fetch, cancel, and delete appointments.
//!
//! Every failure is turned into a JSON body of the form
//! `{"error": {"kind": "...", "message": "..."}}`, including unknown routes,
//! unsupported methods, timeouts and handler panics.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::error_handling::HandleErrorLayer;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use serde::Serialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::auth::{AuthConfig, AuthError};
use crate::booking::{BookingError, Scheduler};
use crate::clock::Clock;
use crate::limits::MAX_BODY_BYTES;
use crate::model::{Appointment, AppointmentRequest};
use crate::observability;
use crate::schedule::SchedulePolicy;
use crate::store::{AppointmentStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub auth: AuthConfig,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        policy: SchedulePolicy,
        auth: AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(store, policy)),
            auth,
            clock,
        }
    }

    fn store(&self) -> &Arc<dyn AppointmentStore> {
        self.scheduler.store()
    }
}

// ── Errors ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error("Request body must be a JSON object matching the appointment schema")]
    MalformedBody(String),
    #[error("appointmentId must be a valid ULID")]
    InvalidId,
    #[error("Appointment not found")]
    NotFound(Ulid),
    #[error("Internal server error")]
    Storage(StoreError),
    #[error("No route matches this path")]
    RouteNotFound,
    #[error("Method not allowed on this route")]
    MethodNotAllowed,
    #[error("Request timed out")]
    Timeout,
    #[error("Internal server error")]
    Internal,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(id),
            StoreError::LimitExceeded(what) => ApiError::Booking(BookingError::Capacity(what)),
            other => ApiError::Storage(other),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Auth(AuthError::Missing) => (StatusCode::UNAUTHORIZED, "auth_missing"),
            ApiError::Auth(AuthError::Invalid) => (StatusCode::FORBIDDEN, "auth_invalid"),
            ApiError::Booking(BookingError::Validation(_))
            | ApiError::MalformedBody(_)
            | ApiError::InvalidId => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::Booking(BookingError::Conflict { .. }) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Booking(BookingError::Capacity(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "capacity")
            }
            ApiError::NotFound(_) | ApiError::RouteNotFound => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed"),
            ApiError::Timeout => (StatusCode::REQUEST_TIMEOUT, "timeout"),
            ApiError::Booking(BookingError::Storage(_)) | ApiError::Storage(_) | ApiError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        }
    }

    /// Caller-facing text. Storage causes are logged, never returned.
    fn public_message(&self) -> String {
        match self {
            ApiError::Booking(BookingError::Storage(_)) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        match &self {
            ApiError::Storage(e) | ApiError::Booking(BookingError::Storage(e)) => {
                tracing::error!("request failed on storage: {e}");
            }
            ApiError::MalformedBody(detail) => tracing::debug!("malformed body: {detail}"),
            ApiError::Booking(BookingError::Capacity(what)) => {
                tracing::warn!("booking refused at capacity: {what}");
            }
            _ => {}
        }
        let body = Json(json!({
            "error": ErrorBody {
                kind,
                message: self.public_message(),
            }
        }));
        (status, body).into_response()
    }
}

fn panic_response(_: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("handler panicked");
    ApiError::Internal.into_response()
}

async fn middleware_error(err: BoxError) -> ApiError {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("request timed out");
        ApiError::Timeout
    } else {
        tracing::error!("unhandled middleware error: {err}");
        ApiError::Internal
    }
}

async fn route_not_found() -> ApiError {
    ApiError::RouteNotFound
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

// ── Auth ─────────────────────────────────────────────────────────

async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Non-ASCII header bytes cannot match any configured key.
    let verdict = match request.headers().get(AUTHORIZATION) {
        Some(value) => value
            .to_str()
            .map_err(|_| AuthError::Invalid)
            .and_then(|h| state.auth.verify(Some(h))),
        None => state.auth.verify(None),
    };
    if let Err(e) = verdict {
        metrics::counter!(observability::AUTH_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
        return Err(e.into());
    }
    Ok(next.run(request).await)
}

// ── Handlers ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub message: &'static str,
    pub appointment: Appointment,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub message: &'static str,
    pub appointment_id: Ulid,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub appointments: usize,
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|_| ApiError::InvalidId)
}

fn record_duration(route: &'static str, started: Instant) {
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
}

async fn create_appointment(
    State(state): State<AppState>,
    payload: Result<Json<AppointmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let started = Instant::now();
    let Json(request) = payload.map_err(|e| ApiError::MalformedBody(e.body_text()))?;

    let result = state.scheduler.book(&request, state.clock.now()).await;
    metrics::counter!(
        observability::BOOKINGS_TOTAL,
        "outcome" => observability::booking_outcome(&result)
    )
    .increment(1);
    record_duration("create", started);

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            message: "Appointment created successfully",
            appointment: result?,
        }),
    ))
}

async fn get_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    let id = parse_id(&id)?;
    state
        .store()
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

async fn cancel_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Appointment>, ApiError> {
    let started = Instant::now();
    let id = parse_id(&id)?;
    let appt = state.store().cancel(id, state.clock.now()).await?;
    tracing::info!(%id, location = %appt.location_id, "appointment cancelled");
    record_duration("cancel", started);
    Ok(Json(appt))
}

async fn delete_appointment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let started = Instant::now();
    let id = parse_id(&id)?;
    let appt = state.store().delete(id).await?;
    tracing::info!(%id, location = %appt.location_id, "appointment deleted");
    record_duration("delete", started);
    Ok(Json(DeletedResponse {
        message: "Appointment deleted successfully",
        appointment_id: appt.appointment_id,
    }))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        appointments: state.store().appointment_count(),
    })
}

// ── Router ───────────────────────────────────────────────────────

pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/appointments", post(create_appointment))
        .route(
            "/appointments/{id}",
            get(get_appointment).delete(delete_appointment),
        )
        .route("/appointments/{id}/cancel", post(cancel_appointment))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .fallback(route_not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(middleware_error))
                .timeout(request_timeout),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
