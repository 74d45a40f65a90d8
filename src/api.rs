//! REST API for the scoring service

use crate::audit::{AuditEntry, AuditLog};
use crate::config::RemoteConfig;
use crate::engine::DecisionEngine;
use crate::error::ServiceError;
use crate::lifecycle::ModelManager;
use crate::metrics::ServiceMetrics;
use crate::models::backend::Backend;
use crate::types::decision::{DecisionResult, PredictionError};
use crate::types::scoring::ScoringData;
use crate::types::signature::Column;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

/// Largest accepted scoring body
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Everything a handler needs, cheap to clone per request
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub engine: Arc<DecisionEngine>,
    pub remote: Arc<RemoteConfig>,
    pub audit: Option<Arc<AuditLog>>,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(
        manager: Arc<ModelManager>,
        default_threshold: f64,
        remote: RemoteConfig,
        audit: Option<Arc<AuditLog>>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        let engine = Arc::new(DecisionEngine::new(manager.signatures(), default_threshold));
        Self {
            manager,
            engine,
            remote: Arc::new(remote),
            audit,
            metrics,
        }
    }

    /// Version tag recorded with audit entries
    fn model_version(&self, backend: Option<&Backend>) -> String {
        let info = self.manager.signatures().info();
        match (&info.version_id, backend) {
            (Some(version), _) => version.clone(),
            (None, Some(backend)) => backend.kind().to_string(),
            (None, None) => "none".to_string(),
        }
    }

    /// Fire-and-forget audit write
    fn record_audit(&self, version: String, start: Instant, inputs: Value, outputs: Value, status: StatusCode) {
        if let Some(log) = &self.audit {
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            log.record(AuditEntry::new(version, latency_ms, inputs, outputs, status.as_u16()));
        }
    }
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignatureResponse {
    pub columns: Vec<Column>,
    pub nb_features: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_threshold: Option<f64>,
}

// =============================================================================
// API Routes
// =============================================================================

/// Build the complete API route tree
pub fn api_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let api_health = warp::path("api_health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| message("API is running correctly"));

    let router_health = warp::path("router_health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| message("Router is well linked to the app"));

    let model_status = warp::path("model_status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_model_status);

    let model_signature = warp::path("model_signature")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_model_signature);

    let model_info = warp::path("model_info")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_model_info);

    let individual_score = warp::path("individual_score")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(handle_individual_score);

    let multiple_score = warp::path("multiple_score")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_state(state.clone()))
        .and_then(handle_multiple_score);

    let reload_model = warp::path("reload_model")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state))
        .and_then(handle_reload_model);

    api_health
        .or(router_health)
        .or(model_status)
        .or(model_signature)
        .or(model_info)
        .or(individual_score)
        .or(multiple_score)
        .or(reload_model)
        .recover(handle_rejection)
}

// =============================================================================
// Filters
// =============================================================================

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_model_status(state: AppState) -> Result<impl Reply, Infallible> {
    let status = state.manager.status(&state.remote.filename);
    if !status.exists {
        warn!(path = %status.path, "Model status requested but model file is missing");
        return Ok(service_error_response(&ServiceError::ArtifactMissing(
            "Model file".to_string(),
        )));
    }
    Ok(warp::reply::json(&status).into_response())
}

async fn handle_model_signature(state: AppState) -> Result<impl Reply, Infallible> {
    let signature = state.manager.signatures().resolve();
    if !signature.exists {
        warn!("Model signature requested but metadata document is missing");
        return Ok(service_error_response(&ServiceError::ArtifactMissing(
            "Signature file".to_string(),
        )));
    }
    let resp = SignatureResponse {
        nb_features: signature.nb_features(),
        columns: signature.columns.clone(),
        best_threshold: signature.best_threshold,
    };
    Ok(warp::reply::json(&resp).into_response())
}

async fn handle_model_info(state: AppState) -> Result<impl Reply, Infallible> {
    let info = state.manager.signatures().info();
    if !info.exists {
        warn!("Model info requested but metadata document is missing");
        return Ok(service_error_response(&ServiceError::ArtifactMissing(
            "Model information".to_string(),
        )));
    }
    Ok(warp::reply::json(&*info).into_response())
}

async fn handle_individual_score(body: Bytes, state: AppState) -> Result<impl Reply, Infallible> {
    let start = Instant::now();
    let inputs: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let backend = state.manager.current();
    let version = state.model_version(backend.as_deref());

    let data = match ScoringData::from_json(&body) {
        Ok(data) => data,
        Err(e) => {
            state.metrics.record_error("validation_error");
            let resp = ApiError {
                error: e.to_string(),
                code: "validation_error".to_string(),
            };
            return Ok(reply_and_audit(&state, version, start, inputs, &resp, StatusCode::UNPROCESSABLE_ENTITY));
        }
    };

    let Some(backend) = backend else {
        error!("Scoring failed: no model loaded");
        state.metrics.record_error("model_unavailable");
        let resp = ApiError {
            error: "Model is currently not loaded on the server. Please reload it.".to_string(),
            code: "model_unavailable".to_string(),
        };
        return Ok(reply_and_audit(&state, version, start, inputs, &resp, StatusCode::SERVICE_UNAVAILABLE));
    };

    match state.engine.predict(Some(backend.as_ref()), &data.to_features()) {
        Ok(result) => {
            state
                .metrics
                .record_decision(start.elapsed(), result.score, result.decision);
            Ok(reply_and_audit(&state, version, start, inputs, &result, StatusCode::OK))
        }
        Err(e) => {
            warn!(error = %e, "Prediction failed");
            state.metrics.record_error("prediction_error");
            let resp = ApiError {
                error: e.error,
                code: "prediction_error".to_string(),
            };
            Ok(reply_and_audit(&state, version, start, inputs, &resp, StatusCode::BAD_REQUEST))
        }
    }
}

/// Whole batch or nothing: the first failing item rejects the request
async fn handle_multiple_score(body: Bytes, state: AppState) -> Result<impl Reply, Infallible> {
    let start = Instant::now();
    let inputs: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let backend = state.manager.current();
    let version = state.model_version(backend.as_deref());

    let batch = match ScoringData::batch_from_json(&body) {
        Ok(batch) => batch,
        Err(e) => {
            state.metrics.record_error("validation_error");
            let resp = ApiError {
                error: e.to_string(),
                code: "validation_error".to_string(),
            };
            return Ok(reply_and_audit(&state, version, start, inputs, &resp, StatusCode::UNPROCESSABLE_ENTITY));
        }
    };

    let Some(backend) = backend else {
        error!("Bulk scoring failed: no model loaded");
        state.metrics.record_error("model_unavailable");
        let resp = ApiError {
            error: "Model is not loaded".to_string(),
            code: "model_unavailable".to_string(),
        };
        return Ok(reply_and_audit(&state, version, start, inputs, &resp, StatusCode::SERVICE_UNAVAILABLE));
    };

    let engine = Arc::clone(&state.engine);
    let metrics = Arc::clone(&state.metrics);
    let scored = tokio::task::spawn_blocking(move || {
        let mut results: Vec<DecisionResult> = Vec::with_capacity(batch.len());
        for (index, item) in batch.iter().enumerate() {
            let item_start = Instant::now();
            let result = engine
                .predict(Some(backend.as_ref()), &item.to_features())
                .map_err(|e| (index, e))?;
            metrics.record_decision(item_start.elapsed(), result.score, result.decision);
            results.push(result);
        }
        Ok::<_, (usize, PredictionError)>(results)
    })
    .await;

    match scored {
        Ok(Ok(results)) => Ok(reply_and_audit(&state, version, start, inputs, &results, StatusCode::OK)),
        Ok(Err((index, e))) => {
            warn!(index = index, error = %e, "Batch item failed");
            state.metrics.record_error("prediction_error");
            let resp = ApiError {
                error: format!("Error in batch item {}: {}", index, e.error),
                code: "prediction_error".to_string(),
            };
            Ok(reply_and_audit(&state, version, start, inputs, &resp, StatusCode::BAD_REQUEST))
        }
        Err(e) => {
            error!(error = %e, "Batch scoring task failed");
            state.metrics.record_error("internal_error");
            let resp = ApiError {
                error: "Batch scoring was interrupted".to_string(),
                code: "internal_error".to_string(),
            };
            Ok(reply_and_audit(&state, version, start, inputs, &resp, StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

async fn handle_reload_model(state: AppState) -> Result<impl Reply, Infallible> {
    let Some(repo_id) = state.remote.repo_id.clone() else {
        error!("HF_REPO_ID has not been declared in the environment");
        return Ok(service_error_response(&ServiceError::Configuration(
            "HF_REPO_ID".to_string(),
        )));
    };

    let filename = state.remote.filename.clone();
    info!(repo_id = %repo_id, filename = %filename, "Manual reload requested");

    match state
        .manager
        .reload_and_publish(&repo_id, &filename, state.remote.token.as_deref())
        .await
    {
        Ok(_) => {
            state.metrics.record_reload();
            Ok(message("Latest model version retrieved and reloaded in memory").into_response())
        }
        Err(e) => {
            error!(error = %e, code = e.code(), "Reload failed, previous model keeps serving");
            state.metrics.record_error(e.code());
            Ok(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.code(),
                &format!("Failed to reload model: {}", e),
            ))
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn message(text: &str) -> warp::reply::Json {
    warp::reply::json(&MessageResponse {
        message: text.to_string(),
    })
}

fn reply_and_audit<T: Serialize>(
    state: &AppState,
    version: String,
    start: Instant,
    inputs: Value,
    body: &T,
    status: StatusCode,
) -> warp::reply::Response {
    let outputs = serde_json::to_value(body).unwrap_or(Value::Null);
    let response = warp::reply::with_status(warp::reply::json(&outputs), status).into_response();
    state.record_audit(version, start, inputs, outputs, status);
    response
}

fn error_response(status: StatusCode, code: &str, message: &str) -> warp::reply::Response {
    let body = ApiError {
        error: message.to_string(),
        code: code.to_string(),
    };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Turn warp's own rejections into the same JSON error body handlers use
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "Route not found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", "Request body exceeds 1 MiB")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "length_required", "Content-Length header is required")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Method not allowed")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type", "Unsupported media type")
    } else {
        error!(rejection = ?err, "Unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "Internal server error")
    };
    Ok(error_response(status, code, message))
}

fn service_error_response(err: &ServiceError) -> warp::reply::Response {
    let status = match err {
        ServiceError::ArtifactMissing(_) => StatusCode::NOT_FOUND,
        ServiceError::Inference(_) => StatusCode::BAD_REQUEST,
        ServiceError::Configuration(_) | ServiceError::Download(_) | ServiceError::Load(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err.code(), &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditConfig, ModelConfig};
    use crate::models::ensemble::ObliviousForest;
    use crate::remote::{write_artifact, ArtifactStore};
    use crate::test_support::{native_model_json, write_mlmodel};
    use crate::types::decision::Decision;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::{Path, PathBuf};

    struct FakeStore {
        payload: Option<String>,
    }

    #[async_trait]
    impl ArtifactStore for FakeStore {
        async fn fetch(
            &self,
            _repo_id: &str,
            filename: &str,
            _token: Option<&str>,
            dest_dir: &Path,
        ) -> Result<PathBuf, ServiceError> {
            match &self.payload {
                Some(payload) => write_artifact(dest_dir, filename, payload.as_bytes()).await,
                None => Err(ServiceError::Download("hub unreachable".to_string())),
            }
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        state: AppState,
    }

    fn fixture(metadata: bool, store_payload: Option<String>, repo_id: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        if metadata {
            write_mlmodel(dir.path(), Some(0.5));
        }
        let config = ModelConfig {
            model_dir: dir.path().to_path_buf(),
            ..ModelConfig::default()
        };
        let manager = Arc::new(ModelManager::new(
            config,
            Arc::new(FakeStore {
                payload: store_payload,
            }),
        ));
        let remote = RemoteConfig {
            repo_id: repo_id.map(str::to_string),
            ..RemoteConfig::default()
        };
        let state = AppState::new(manager, 0.5, remote, None, Arc::new(ServiceMetrics::new()));
        Fixture { dir, state }
    }

    fn serve(fixture: &Fixture, probability: f64) {
        fixture.state.manager.publish(Arc::new(Backend::NativeEnsemble(
            ObliviousForest::constant(probability),
        )));
    }

    fn payload() -> Value {
        serde_json::to_value(ScoringData::example()).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let fixture = fixture(false, None, None);
        let routes = api_routes(fixture.state.clone());

        for path in ["/api_health", "/router_health"] {
            let resp = warp::test::request().method("GET").path(path).reply(&routes).await;
            assert_eq!(resp.status(), StatusCode::OK);
            let body: MessageResponse = serde_json::from_slice(resp.body()).unwrap();
            assert!(!body.message.is_empty());
        }
    }

    #[tokio::test]
    async fn test_individual_score_granted() {
        let fixture = fixture(true, None, None);
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&payload())
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: DecisionResult = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.score, 0.42);
        assert_eq!(body.prediction, 0);
        assert_eq!(body.threshold, 0.5);
        assert_eq!(body.decision, Decision::Granted);
    }

    #[tokio::test]
    async fn test_individual_score_refused() {
        let fixture = fixture(true, None, None);
        serve(&fixture, 0.58);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&payload())
            .reply(&routes)
            .await;

        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["decision"], "Refused");
        assert_eq!(body["prediction"], 1);
    }

    #[tokio::test]
    async fn test_score_without_model_is_503() {
        let fixture = fixture(true, None, None);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&payload())
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert!(body.error.contains("not loaded"));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_422() {
        let fixture = fixture(true, None, None);
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let mut body = payload();
        body["YEARS_BIRTH"] = json!(15);
        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&body)
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .body("{}")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_missing_signature_is_400() {
        let fixture = fixture(false, None, None);
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&payload())
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.error, "Signature file not found");
    }

    #[tokio::test]
    async fn test_multiple_score_identical_items() {
        let fixture = fixture(true, None, None);
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/multiple_score")
            .json(&json!([payload(), payload()]))
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body: Vec<DecisionResult> = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0], body[1]);
    }

    #[tokio::test]
    async fn test_multiple_score_rejects_whole_batch() {
        let fixture = fixture(true, None, None);
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let mut bad = payload();
        bad["YEARS_EMPLOYED"] = json!(70);
        let resp = warp::test::request()
            .method("POST")
            .path("/multiple_score")
            .json(&json!([payload(), bad]))
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert!(body.error.starts_with("[1].YEARS_EMPLOYED"));
    }

    #[tokio::test]
    async fn test_metadata_endpoints_missing() {
        let fixture = fixture(false, None, None);
        let routes = api_routes(fixture.state.clone());

        for path in ["/model_status", "/model_signature", "/model_info"] {
            let resp = warp::test::request().method("GET").path(path).reply(&routes).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", path);
            let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
            assert_eq!(body.code, "artifact_missing");
        }
    }

    #[tokio::test]
    async fn test_metadata_endpoints_present() {
        let fixture = fixture(true, None, None);
        std::fs::write(fixture.dir.path().join("model.cb"), native_model_json()).unwrap();
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request().method("GET").path("/model_status").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let status: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(status["model_name"], "model.cb");
        assert_eq!(status["exists"], true);
        assert!(status["size_kb"].is_number());

        let resp = warp::test::request().method("GET").path("/model_signature").reply(&routes).await;
        let signature: SignatureResponse = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(signature.nb_features, 15);
        assert_eq!(signature.columns[7].name, "YEARS_BIRTH");
        assert_eq!(signature.best_threshold, Some(0.5));

        let resp = warp::test::request().method("GET").path("/model_info").reply(&routes).await;
        let info: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(info["model_type"], "CatBoostClassifier");
        assert_eq!(info["version_id"], "m-test");
        assert_eq!(info["nb_feature"], 15);
    }

    #[tokio::test]
    async fn test_reload_requires_repo_id() {
        let fixture = fixture(true, Some(native_model_json()), None);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request().method("POST").path("/reload_model").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.error, "HF_REPO_ID is not configured");
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_serving() {
        let fixture = fixture(true, None, Some("acme/credit-model"));
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request().method("POST").path("/reload_model").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.code, "download_error");
        assert!(body.error.starts_with("Failed to reload model"));

        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&payload())
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_publishes_new_model() {
        let fixture = fixture(true, Some(native_model_json()), Some("acme/credit-model"));
        let routes = api_routes(fixture.state.clone());
        assert!(fixture.state.manager.current().is_none());

        let resp = warp::test::request().method("POST").path("/reload_model").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(fixture.state.manager.current().is_some());

        // Age 59 is above the ensemble's border
        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&payload())
            .reply(&routes)
            .await;
        let body: DecisionResult = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.decision, Decision::Refused);
    }

    #[tokio::test]
    async fn test_scoring_is_audited() {
        let mut fixture = fixture(true, None, None);
        let audit = AuditLog::connect(&AuditConfig {
            enabled: true,
            database_url: format!("sqlite://{}", fixture.dir.path().join("audit.db").display()),
            queue_capacity: 16,
            max_connections: 1,
        })
        .await
        .unwrap();
        fixture.state.audit = Some(Arc::clone(&audit));
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/individual_score")
            .json(&payload())
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let mut records = Vec::new();
        for _ in 0..50 {
            records = audit.recent(5).await.unwrap();
            if !records.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry.status_code, 200);
        assert_eq!(records[0].entry.model_version, "m-test");
        assert_eq!(records[0].entry.outputs["decision"], "Granted");
    }

    #[tokio::test]
    async fn test_oversized_body_gets_json_error() {
        let fixture = fixture(true, None, None);
        serve(&fixture, 0.42);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/multiple_score")
            .body(vec![b' '; MAX_BODY_BYTES as usize + 1])
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.code, "payload_too_large");
    }

    #[tokio::test]
    async fn test_wrong_method_and_unknown_route_get_json_errors() {
        let fixture = fixture(true, None, None);
        let routes = api_routes(fixture.state.clone());

        let resp = warp::test::request().method("GET").path("/individual_score").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.code, "method_not_allowed");

        let resp = warp::test::request().method("GET").path("/nowhere").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: ApiError = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body.code, "not_found");
    }
}
