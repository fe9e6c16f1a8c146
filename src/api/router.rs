use std::time::Duration;

use axum::{
    Json, Router,
    http::{HeaderName, Request, Response, StatusCode},
    response::IntoResponse,
    routing::get,
};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{MakeSpan, OnFailure, OnResponse, TraceLayer},
};
use tracing::{Level, Span, error, field, info, span};

use crate::{
    collaborators::{FileStore, Node, ProofBuilder},
    logging::panic_message,
};

use super::{
    Env,
    error::ErrorResponse,
    handlers::{get_settings, get_status, put_settings},
};

#[derive(Clone)]
struct CustomMakeSpan;
impl<B> MakeSpan<B> for CustomMakeSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let id = req
            .extensions()
            .get::<RequestId>()
            .and_then(|id| id.header_value().to_str().ok())
            .unwrap_or("unknown");
        span!(
            Level::INFO,
            "request",
            id = %id,
            method = %req.method(),
            path = %req.uri().path(),
            version = ?req.version(),
            error = field::Empty,
        )
    }
}

#[derive(Clone)]
struct CustomOnResponse;
impl<B> OnResponse<B> for CustomOnResponse {
    fn on_response(self, res: &Response<B>, latency: Duration, _: &Span) {
        if res.status().is_success() {
            info!("{} {}ms", res.status(), latency.as_millis());
        } else {
            error!("{} {}ms", res.status(), latency.as_millis());
        }
    }
}

#[derive(Clone)]
struct NoOpOnFailure;
impl<B> OnFailure<B> for NoOpOnFailure {
    fn on_failure(&mut self, _res: B, _latency: Duration, _span: &Span) {}
}

fn handle_panic(panic: Box<dyn std::any::Any + Send>) -> axum::response::Response {
    let message = panic_message(panic.as_ref()).to_string();
    let error_response = Json(ErrorResponse { error: message });
    (StatusCode::INTERNAL_SERVER_ERROR, error_response).into_response()
}

pub fn new<N: Node, F: FileStore, P: ProofBuilder>(env: Env<N, F, P>) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .nest(
            "/api",
            Router::new().nest(
                "/host",
                Router::new()
                    .route("/status", get(get_status::<N, F, P>))
                    .route(
                        "/settings",
                        get(get_settings::<N, F, P>).put(put_settings::<N, F, P>),
                    ),
            ),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    x_request_id.clone(),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(CustomMakeSpan)
                        .on_response(CustomOnResponse)
                        .on_failure(NoOpOnFailure),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(30),
                )),
        )
        .with_state(env)
}
