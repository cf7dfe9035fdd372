use crate::actions::Actions;
use crate::app_state::{AppState, SharedAppState};
use crate::error::{ResolutionError, ServiceError};
use crate::metrics::{metrics_handler, record_response_metrics, request_counter};
use crate::models;
use crate::resolver::RequestContext;
use crate::validated_json::ValidatedJson;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;
use tracing::{event, Level};

/// Returns a [axum::Router] for the signal resolver API
///
/// The router is populated with all routes as well as the following middleware:
///
/// * a [tower_http::trace::TraceLayer] for tracing requests and responses, which also records
///   request and response metrics
fn router(state: SharedAppState) -> Router {
    fn v1(state: SharedAppState) -> Router {
        Router::new()
            .route("/resolve", post(resolve))
            .route("/apply", post(apply))
            .with_state(state)
    }

    Router::new()
        .route("/.well-known/signal-resolver-schema", get(schema))
        .route("/metrics", get(metrics_handler))
        .nest("/v1", v1(state))
        .layer(
            TraceLayer::new_for_http()
                .on_request(request_counter)
                .on_response(record_response_metrics),
        )
}

/// Signal resolver service type alias
///
/// This type implements [tower::Service].
pub type Service = NormalizePath<Router>;

/// Returns a [crate::app::Service] for the signal resolver API
///
/// The service is populated with all routes as well as the following middleware:
///
/// * a [tower_http::normalize_path::NormalizePathLayer] for trimming trailing slashes from
///   requests
pub fn service(state: SharedAppState) -> Service {
    // Note that any middleware that should affect routing must wrap the router.
    // See
    // https://docs.rs/axum/0.6.0/axum/middleware/index.html#rewriting-request-uri-in-middleware.
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Returns a [crate::app::Service] built from an [AppState].
pub fn service_from(state: AppState) -> Service {
    service(SharedAppState::new(state))
}

/// Describes the API.
async fn schema() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/v1/resolve": {
                "method": "POST",
                "request": ["signal", "source", "client"],
                "response": ["request_id", "metadata", "block"],
            },
            "/v1/apply": {
                "method": "POST",
                "request": ["block", "signal_desc_xml", "actions_xml", "exp_number", "pass", "client"],
                "response": "block",
            },
        },
    }))
}

/// Run a synchronous task on the blocking thread pool, or on Rayon if configured.
///
/// The number of concurrent tasks is bounded by the resource manager.
async fn run_task<F, R>(state: &AppState, task: F) -> Result<R, ServiceError>
where
    F: FnOnce() -> Result<R, ServiceError> + Send + 'static,
    R: Send + 'static,
{
    let _permit = state.resource_manager.task().await?;
    if state.args.use_rayon {
        tokio_rayon::spawn(task).await
    } else {
        tokio::task::spawn_blocking(task).await?
    }
}

/// Handler for the resolve API.
///
/// Resolves a signal and source address to a corrected data block.
async fn resolve(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<models::ResolveRequest>,
) -> Result<Json<models::ResolveResponse>, ServiceError> {
    let resolver = state.resolver.clone();
    let response = run_task(&state, move || {
        let request_data = resolver
            .parse(&request.signal, &request.source)
            .map_err(ResolutionError::from)?;
        let context = RequestContext::new(&request_data);
        let resolved = resolver.resolve_with_context(&request_data, &request.client, &context)?;
        Ok(models::ResolveResponse {
            request_id: context.request_id.to_string(),
            metadata: resolved.metadata,
            block: resolved.block,
        })
    })
    .await?;
    Ok(Json(response))
}

/// Handler for the apply API.
///
/// Applies correction actions to a client supplied data block.
async fn apply(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<models::ApplyRequest>,
) -> Result<Json<crate::types::DataBlock>, ServiceError> {
    let resolver = state.resolver.clone();
    let block = run_task(&state, move || {
        let models::ApplyRequest {
            mut block,
            signal_desc_xml,
            actions_xml,
            exp_number,
            pass,
            client,
        } = request;
        let actions = Actions::parse(&signal_desc_xml, &actions_xml, exp_number, pass)?;
        event!(
            Level::DEBUG,
            actions = actions.count_in_range(),
            "applying actions"
        );
        resolver.apply_actions(&mut block, &client, actions)?;
        Ok(block)
    })
    .await?;
    Ok(Json(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CommandLineArgs;
    use crate::test_utils;

    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        response::Response,
    };
    use clap::Parser;
    use regex::Regex;
    use tower::ServiceExt; // for `oneshot` and `ready`

    fn test_service(args: &[&str]) -> Service {
        let args = CommandLineArgs::parse_from(
            std::iter::once("signal-resolver").chain(args.iter().copied()),
        );
        service_from(AppState::new(&args, test_utils::get_test_registry()))
    }

    async fn post_json(service: Service, uri: &str, body: &str) -> Response {
        service
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri(uri)
                    .header(http::header::CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    fn data_values(body: &str) -> serde_json::Value {
        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        body["block"]["data"]["values"].clone()
    }

    #[tokio::test]
    async fn schema() {
        let response = test_service(&[])
            .oneshot(
                Request::builder()
                    .uri("/.well-known/signal-resolver-schema")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, response.status());
        let body = body_string(response).await;
        assert!(body.contains("/v1/resolve"), "body: {body}");
    }

    #[tokio::test]
    async fn resolve() {
        let response = post_json(
            test_service(&[]),
            "/v1/resolve",
            r#"{"signal": "efm::ipla", "source": "12345"}"#,
        )
        .await;
        assert_eq!(StatusCode::OK, response.status());
        let body = body_string(response).await;
        assert_eq!(
            json!([0.0, 150000.0, 300000.0, 450000.0]),
            data_values(&body)
        );
        let re = Regex::new(r#""request_id":"[0-9a-f-]{36}""#).unwrap();
        assert!(re.is_match(&body), "body: {body}");
    }

    #[tokio::test]
    async fn resolve_trailing_slash_with_rayon() {
        let response = post_json(
            test_service(&["--use-rayon"]),
            "/v1/resolve/",
            r#"{"signal": "efm::ip_ka", "source": "12345"}"#,
        )
        .await;
        assert_eq!(StatusCode::OK, response.status());
        let body = body_string(response).await;
        assert_eq!(json!([0.0, 150.0, 300.0, 450.0]), data_values(&body));
    }

    #[tokio::test]
    async fn resolve_not_found() {
        let response = post_json(
            test_service(&[]),
            "/v1/resolve",
            r#"{"signal": "efm::nothing", "source": "12345"}"#,
        )
        .await;
        assert_eq!(StatusCode::NOT_FOUND, response.status());
        let body = body_string(response).await;
        let re = Regex::new(r"failed to resolve signal").unwrap();
        assert!(re.is_match(&body), "body: {body}");
    }

    #[tokio::test]
    async fn resolve_parse_error() {
        let response = post_json(
            test_service(&[]),
            "/v1/resolve",
            r#"{"signal": "ipla", "source": "a::b::c::1"}"#,
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let body = body_string(response).await;
        assert!(body.contains("too many prefixes"), "body: {body}");
    }

    #[tokio::test]
    async fn resolve_depth_limit() {
        let response = post_json(
            test_service(&["--max-depth", "3"]),
            "/v1/resolve",
            r#"{"signal": "loop", "source": "12345"}"#,
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let body = body_string(response).await;
        assert!(body.contains("Internal Limit (3)"), "body: {body}");
    }

    #[tokio::test]
    async fn resolve_invalid_request() {
        let response = post_json(test_service(&[]), "/v1/resolve", r#"{"signal": ""}"#).await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let body = body_string(response).await;
        let re = Regex::new(r"request data is not valid").unwrap();
        assert!(re.is_match(&body), "body: {body}");
    }

    #[tokio::test]
    async fn apply() {
        let response = post_json(
            test_service(&[]),
            "/v1/apply",
            r#"{
                "block": {"data": {"dtype": "int16", "values": [1, 2, 3]}},
                "actions_xml": "<action><signal><calibration target=\"data\"><factor>2</factor><offset>1</offset><units>V</units></calibration></signal></action>"
            }"#,
        )
        .await;
        assert_eq!(StatusCode::OK, response.status());
        let body: serde_json::Value =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json!([3, 5, 7]), body["data"]["values"]);
        assert_eq!(json!("V"), body["units"]);
    }

    #[tokio::test]
    async fn apply_invalid_xml() {
        let response = post_json(
            test_service(&[]),
            "/v1/apply",
            r#"{"block": {}, "actions_xml": "<action><signal><calibration target=\"sideways\"/></signal></action>"}"#,
        )
        .await;
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let body = body_string(response).await;
        let re = Regex::new(r"failed to parse correction metadata").unwrap();
        assert!(re.is_match(&body), "body: {body}");
    }

    #[tokio::test]
    async fn metrics() {
        let response = test_service(&[])
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(StatusCode::OK, response.status());
    }
}
