//! # API REST
//!
//! REST API for the HL7 result queue.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - multipart upload of HL7 message files into the inbound queue
//! - OpenAPI/Swagger documentation
//!
//! All queue and processing logic lives in `hl7vg-core`; handlers only translate between HTTP
//! and [`Hl7Service`].

#![warn(rust_2018_idioms)]

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use hl7vg_core::{CoreError, ErrorEntry, Hl7Service, QueueEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Multipart field carrying the uploaded message file.
pub const UPLOAD_FIELD: &str = "hl7";

/// Source used for uploads that do not name one.
pub const DEFAULT_UPLOAD_SOURCE_ID: u32 = 1;

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Hl7Service>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Multipart form accepted by `POST /hl7`.
#[derive(ToSchema)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub hl7: Vec<u8>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadParams {
    /// Id of the sending source; defaults to 1.
    pub source_id: Option<u32>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct UploadRes {
    /// False when the upload was empty and nothing was queued.
    pub queued: bool,
    pub id: Option<String>,
    pub source_key: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct QueueEntryRes {
    pub id: String,
    pub source: String,
    pub source_key: Option<String>,
    pub state: String,
    pub created_at: String,
}

impl From<QueueEntry> for QueueEntryRes {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            source: entry.source.to_string(),
            source_key: entry.source_key,
            state: format!("{:?}", entry.state).to_lowercase(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct QueueRes {
    pub entries: Vec<QueueEntryRes>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorEntryRes {
    pub id: String,
    pub source: String,
    pub source_key: Option<String>,
    pub error: String,
    pub error_details: String,
    pub failed_at: String,
}

impl From<ErrorEntry> for ErrorEntryRes {
    fn from(entry: ErrorEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            source: entry.source.to_string(),
            source_key: entry.source_key,
            error: entry.error,
            error_details: entry.error_details,
            failed_at: entry.failed_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorsRes {
    pub errors: Vec<ErrorEntryRes>,
}

#[derive(OpenApi)]
#[openapi(
    paths(health, upload_hl7, list_queue, list_errors),
    components(schemas(
        HealthRes,
        UploadForm,
        UploadRes,
        QueueEntryRes,
        QueueRes,
        ErrorEntryRes,
        ErrorsRes
    ))
)]
pub struct ApiDoc;

/// Builds the REST application around `service`.
pub fn router(service: Arc<Hl7Service>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/hl7", post(upload_hl7))
        .route("/queue", get(list_queue))
        .route("/errors", get(list_errors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for monitoring and load balancers.
#[axum::debug_handler]
async fn health(State(state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: format!(
            "HL7 REST API is alive (routes: {})",
            state.service.routes().join(", ")
        ),
    })
}

#[utoipa::path(
    post,
    path = "/hl7",
    params(UploadParams),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Message queued", body = UploadRes),
        (status = 200, description = "Empty upload ignored", body = UploadRes),
        (status = 400, description = "Unreadable upload or unknown source"),
        (status = 500, description = "Internal server error")
    )
)]
/// Queue an uploaded HL7 message file.
///
/// The file is read from the `hl7` multipart field. An empty file is ignored. If the upload
/// cannot be read nothing is queued.
///
/// # Errors
/// Returns `400 Bad Request` if:
/// - the multipart body cannot be read or has no `hl7` field,
/// - `source_id` names an unknown source.
///
/// Returns `500 Internal Server Error` if the queue store fails.
#[axum::debug_handler]
async fn upload_hl7(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadRes>), (StatusCode, &'static str)> {
    let unreadable = |e: axum::extract::multipart::MultipartError| {
        tracing::error!("Failed to read HL7 upload: {}", e);
        (StatusCode::BAD_REQUEST, "Failed to read HL7 upload")
    };

    let mut data = None;
    while let Some(field) = multipart.next_field().await.map_err(unreadable)? {
        if field.name() == Some(UPLOAD_FIELD) {
            data = Some(field.text().await.map_err(unreadable)?);
            break;
        }
    }
    let data = data.ok_or((StatusCode::BAD_REQUEST, "Missing 'hl7' upload field"))?;

    if data.trim().is_empty() {
        tracing::debug!("ignoring empty HL7 upload");
        return Ok((
            StatusCode::OK,
            Json(UploadRes {
                queued: false,
                id: None,
                source_key: None,
            }),
        ));
    }

    let source_id = params.source_id.unwrap_or(DEFAULT_UPLOAD_SOURCE_ID);
    match state.service.enqueue(&data, source_id) {
        Ok(entry) => Ok((
            StatusCode::CREATED,
            Json(UploadRes {
                queued: true,
                id: Some(entry.id.to_string()),
                source_key: entry.source_key,
            }),
        )),
        Err(CoreError::UnknownSource(id)) => {
            tracing::warn!("HL7 upload names unknown source {}", id);
            Err((StatusCode::BAD_REQUEST, "Unknown HL7 source"))
        }
        Err(e) => {
            tracing::error!("Failed to queue HL7 upload: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to queue HL7 message"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/queue",
    responses(
        (status = 200, description = "Queue entries, oldest first", body = QueueRes),
        (status = 500, description = "Internal server error")
    )
)]
/// List the entries currently in the inbound queue.
#[axum::debug_handler]
async fn list_queue(
    State(state): State<AppState>,
) -> Result<Json<QueueRes>, (StatusCode, &'static str)> {
    match state.service.pending() {
        Ok(entries) => Ok(Json(QueueRes {
            entries: entries.into_iter().map(QueueEntryRes::from).collect(),
        })),
        Err(e) => {
            tracing::error!("Failed to list queue: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to list queue"))
        }
    }
}

#[utoipa::path(
    get,
    path = "/errors",
    responses(
        (status = 200, description = "Captured processing errors", body = ErrorsRes),
        (status = 500, description = "Internal server error")
    )
)]
/// List messages whose processing failed.
#[axum::debug_handler]
async fn list_errors(
    State(state): State<AppState>,
) -> Result<Json<ErrorsRes>, (StatusCode, &'static str)> {
    match state.service.errors() {
        Ok(errors) => Ok(Json(ErrorsRes {
            errors: errors.into_iter().map(ErrorEntryRes::from).collect(),
        })),
        Err(e) => {
            tracing::error!("Failed to list errors: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to list errors"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use hl7vg_core::store::{PatientIndex, Stores};
    use hl7vg_core::{CoreConfig, Hl7Source};
    use http_body_util::BodyExt;
    use std::path::PathBuf;
    use tower::ServiceExt;

    const ORU: &str = "MSH|^~\\&|LAB|IU|HL7LISTENER|AMRS|20080226102656||ORU^R01|ABC101083591|P|2.5\rPID|||3";
    const BOUNDARY: &str = "hl7vg-test-boundary";

    fn service() -> Arc<Hl7Service> {
        let sources = vec![Hl7Source::new(1, "local").unwrap()];
        let cfg = CoreConfig::new(PathBuf::from("unused"), false, sources).unwrap();
        Arc::new(
            Hl7Service::new(
                Arc::new(cfg),
                Stores::in_memory(),
                Arc::new(PatientIndex::default()),
            )
            .unwrap(),
        )
    }

    fn upload(uri: &str, field: &str, contents: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"message.hl7\"\r\nContent-Type: text/plain\r\n\r\n{contents}\r\n--{b}--\r\n",
            b = BOUNDARY,
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_lists_routes() {
        let response = router(service())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthRes = json(response).await;
        assert!(health.ok);
        assert!(health.message.contains("ORU_R01"));
    }

    #[tokio::test]
    async fn upload_queues_message() {
        let service = service();
        let response = router(service.clone())
            .oneshot(upload("/hl7", "hl7", ORU))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let res: UploadRes = json(response).await;
        assert!(res.queued);
        assert_eq!(res.source_key.as_deref(), Some("ABC101083591"));

        let queued = service.pending().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].data, ORU);
    }

    #[tokio::test]
    async fn empty_upload_is_ignored() {
        let service = service();
        let response = router(service.clone())
            .oneshot(upload("/hl7", "hl7", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let res: UploadRes = json(response).await;
        assert!(!res.queued);
        assert!(service.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_without_hl7_field_is_rejected() {
        let service = service();
        let response = router(service.clone())
            .oneshot(upload("/hl7", "other", ORU))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(service.pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_for_unknown_source_is_rejected() {
        let response = router(service())
            .oneshot(upload("/hl7?source_id=9", "hl7", ORU))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn processing_failures_are_listed() {
        let service = service();
        service.enqueue(ORU, 1).unwrap();
        service.process_pending(10).unwrap();

        let response = router(service)
            .oneshot(Request::builder().uri("/errors").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let res: ErrorsRes = json(response).await;
        assert_eq!(res.errors.len(), 1);
        assert_eq!(
            res.errors[0].error,
            "Trouble parsing HL7 message (ABC101083591)"
        );
    }
}
