use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::problem::ProblemResponse;
use crate::site::{Site, SiteKind};
use crate::telemetry;
use crate::view::SubjectView;

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    family: Arc<Site>,
    map: Arc<Site>,
}

impl AppState {
    pub fn new(metrics: PrometheusHandle, family: Arc<Site>, map: Arc<Site>) -> Self {
        Self {
            metrics,
            family,
            map,
        }
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn site(&self, kind: SiteKind) -> &Site {
        match kind {
            SiteKind::Family => &self.family,
            SiteKind::Map => &self.map,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/:site/view", get(get_view))
        .route("/:site/subject", get(get_subject).put(put_subject).delete(delete_subject))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> Response {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        Body::from(body),
    )
        .into_response()
}

fn parse_site(raw: &str) -> Result<SiteKind, ProblemResponse> {
    raw.parse::<SiteKind>()
        .map_err(|detail| ProblemResponse::bad_request("unknown_site", detail))
}

async fn get_view(
    State(state): State<AppState>,
    Path(site): Path<String>,
) -> Result<Json<SubjectView>, ProblemResponse> {
    let kind = parse_site(&site)?;
    let result = current_view(state.site(kind));
    let label = match &result {
        Ok(_) => "ok",
        Err(problem) => problem.problem_type(),
    };
    counter!("api_view_requests_total", "site" => kind.as_str(), "result" => label).increment(1);
    result
}

fn current_view(site: &Site) -> Result<Json<SubjectView>, ProblemResponse> {
    if !site.is_watching() {
        return Err(ProblemResponse::not_found(
            "not_watching",
            format!("no subject is being watched on the {} site", site.kind()),
        ));
    }
    let view = site.current_view().ok_or_else(|| {
        ProblemResponse::not_found("view_pending", "the first refresh has not completed yet")
    })?;
    Ok(Json(SubjectView::clone(&view)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectRequest {
    subject_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectResponse {
    site: SiteKind,
    subject_id: Option<String>,
    watching: bool,
}

impl SubjectResponse {
    fn of(site: &Site) -> Self {
        Self {
            site: site.kind(),
            subject_id: site.subject_id(),
            watching: site.is_watching(),
        }
    }
}

async fn get_subject(
    State(state): State<AppState>,
    Path(site): Path<String>,
) -> Result<Json<SubjectResponse>, ProblemResponse> {
    let kind = parse_site(&site)?;
    Ok(Json(SubjectResponse::of(state.site(kind))))
}

async fn put_subject(
    State(state): State<AppState>,
    Path(site): Path<String>,
    body: Result<Json<SubjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubjectResponse>), ProblemResponse> {
    let kind = parse_site(&site)?;
    let Json(request) =
        body.map_err(|rejection| ProblemResponse::bad_request("invalid_body", rejection.body_text()))?;
    let subject_id = request.subject_id.trim();
    if subject_id.is_empty() {
        return Err(ProblemResponse::bad_request(
            "invalid_subject",
            "subjectId must not be blank",
        ));
    }

    let site = state.site(kind);
    site.watch(subject_id);
    info!(stage = "api", site = kind.as_str(), subject = subject_id, "subject selected");
    Ok((StatusCode::ACCEPTED, Json(SubjectResponse::of(site))))
}

async fn delete_subject(
    State(state): State<AppState>,
    Path(site): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let kind = parse_site(&site)?;
    state.site(kind).unwatch();
    info!(stage = "api", site = kind.as_str(), "subject cleared");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use httpmock::prelude::*;
    use placement_safety_api::SafetyApiClient;
    use placement_safety_core::Thresholds;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use url::Url;

    use crate::site::Pipeline;

    fn setup_state(upstream: &str) -> AppState {
        let metrics = telemetry::init_metrics().expect("metrics init");
        let client = SafetyApiClient::new(
            Url::parse(upstream).expect("url"),
            reqwest::Client::new(),
            None,
        );
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        let pipeline = Arc::new(
            Pipeline::new(client, Thresholds::default(), 1).with_clock(Arc::new(move || now)),
        );
        AppState::new(
            metrics,
            Arc::new(Site::new(SiteKind::Family, pipeline.clone(), Duration::from_secs(60))),
            Arc::new(Site::new(SiteKind::Map, pipeline, Duration::from_secs(30))),
        )
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        serde_json::from_slice(&collected.to_bytes()).expect("json body")
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_router(setup_state("http://127.0.0.1:9/api/"));

        let response = app
            .oneshot(request("GET", "/healthz", None))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_exports_build_info() {
        let app = app_router(setup_state("http://127.0.0.1:9/api/"));

        let response = app
            .oneshot(request("GET", "/metrics", None))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::OK);
        let collected = response
            .into_body()
            .collect()
            .await
            .expect("body should read");
        let body = String::from_utf8(collected.to_bytes().to_vec()).expect("utf-8");
        assert!(body.contains("app_build_info"));
        assert!(body.contains("app_uptime_seconds"));
    }

    #[tokio::test]
    async fn view_without_subject_is_not_found() {
        let app = app_router(setup_state("http://127.0.0.1:9/api/"));

        let response = app
            .oneshot(request("GET", "/family/view", None))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
        let body = body_json(response).await;
        assert_eq!(body["type"], "not_watching");
    }

    #[tokio::test]
    async fn unknown_site_is_bad_request() {
        let app = app_router(setup_state("http://127.0.0.1:9/api/"));

        let response = app
            .oneshot(request("DELETE", "/radar/subject", None))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "unknown_site");
    }

    #[tokio::test]
    async fn blank_subject_is_rejected() {
        let app = app_router(setup_state("http://127.0.0.1:9/api/"));

        let response = app
            .oneshot(request(
                "PUT",
                "/map/subject",
                Some(json!({ "subjectId": "   " })),
            ))
            .await
            .expect("handler should respond");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["type"], "invalid_subject");
    }

    #[tokio::test]
    async fn selecting_a_subject_publishes_its_view() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/safety/worker/w-9/location")
                    .query_param("days", "1");
                then.status(200).json_body(json!({
                    "currentLocation": { "timestamp": "2024-03-02T11:58:00Z", "latitude": 51.5, "longitude": -0.12 },
                    "locationHistory": [
                        { "timestamp": "2024-03-02T11:58:00Z", "latitude": 51.5, "longitude": -0.12, "accuracy": 6 }
                    ],
                    "geoFenceStatus": {
                        "isInside": false,
                        "activeFenceCount": 1,
                        "nearestFence": { "name": "Warehouse", "distance": 420 }
                    }
                }));
            })
            .await;
        let state = setup_state(&server.url("/api/"));
        let app = app_router(state.clone());

        let response = app
            .clone()
            .oneshot(request("PUT", "/map/subject", Some(json!({ "subjectId": "w-9" }))))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["subjectId"], "w-9");
        assert_eq!(body["watching"], true);

        let mut receiver = state.site(SiteKind::Map).view().subscribe();
        tokio::time::timeout(Duration::from_secs(5), receiver.wait_for(Option::is_some))
            .await
            .expect("view published in time")
            .expect("sender alive");

        let response = app
            .clone()
            .oneshot(request("GET", "/map/view", None))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::OK);
        let view = body_json(response).await;
        assert_eq!(view["subjectId"], "w-9");
        assert_eq!(view["site"], "map");
        assert_eq!(view["status"]["level"], "critical");
        assert_eq!(view["stats"]["period"], "1d");
        assert_eq!(view["geoFence"]["nearestFence"]["name"], "Warehouse");

        let other = app
            .clone()
            .oneshot(request("GET", "/family/view", None))
            .await
            .expect("handler should respond");
        assert_eq!(other.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn clearing_a_subject_is_idempotent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/safety/family/w-3/status");
                then.status(404);
            })
            .await;
        let state = setup_state(&server.url("/api/"));
        let app = app_router(state.clone());

        app.clone()
            .oneshot(request("PUT", "/family/subject", Some(json!({ "subjectId": "w-3" }))))
            .await
            .expect("handler should respond");

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("DELETE", "/family/subject", None))
                .await
                .expect("handler should respond");
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }

        assert!(!state.site(SiteKind::Family).is_watching());
        let response = app
            .oneshot(request("GET", "/family/subject", None))
            .await
            .expect("handler should respond");
        let body = body_json(response).await;
        assert_eq!(body["watching"], false);
        assert!(body["subjectId"].is_null());
    }

    #[tokio::test]
    async fn malformed_subject_body_is_a_problem_document() {
        let app = app_router(setup_state("http://127.0.0.1:9/api/"));

        for body in [None, Some(json!({ "subject": "w-1" }))] {
            let response = app
                .clone()
                .oneshot(request("PUT", "/map/subject", body))
                .await
                .expect("handler should respond");

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                response.headers().get(header::CONTENT_TYPE).unwrap(),
                "application/problem+json"
            );
            assert_eq!(body_json(response).await["type"], "invalid_body");
        }
    }

    #[tokio::test]
    async fn view_before_first_refresh_is_pending() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/safety/family/w-5/status");
                then.status(200)
                    .delay(Duration::from_secs(30))
                    .json_body(json!({ "status": { "current": "safe" } }));
            })
            .await;
        let state = setup_state(&server.url("/api/"));
        let app = app_router(state.clone());

        let response = app
            .clone()
            .oneshot(request("PUT", "/family/subject", Some(json!({ "subjectId": "w-5" }))))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(request("GET", "/family/view", None))
            .await
            .expect("handler should respond");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["type"], "view_pending");

        state.site(SiteKind::Family).unwatch();
    }
}
