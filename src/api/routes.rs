//! HTTP handlers of the download API.

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use axum::{
    Json,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tubedrop_core::jobs::JobSnapshot;
use tubedrop_core::model::{FetchRef, JobId, JobRequest, VideoInfo};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DownloadBody {
    pub url: Option<String>,
    pub format: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VideoInfoBody {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub job_id: JobId,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// `POST /api/download`
pub async fn download(
    State(state): State<AppState>,
    payload: Result<Json<DownloadBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let payload = body(payload)?;
    let (Some(url), Some(format), Some(quality)) = (
        required(payload.url),
        required(payload.format),
        required(payload.quality),
    ) else {
        return Err(ApiError::BadRequest(
            "URL, format, and quality are required".to_string(),
        ));
    };

    let job_id = state
        .service
        .submit(JobRequest::new(url, format, quality))
        .await?;

    Ok((StatusCode::ACCEPTED, Json(Accepted { job_id })))
}

/// `POST /api/video-info`
pub async fn video_info(
    State(state): State<AppState>,
    payload: Result<Json<VideoInfoBody>, JsonRejection>,
) -> ApiResult<Json<VideoInfo>> {
    let Some(url) = required(body(payload)?.url) else {
        return Err(ApiError::BadRequest("URL is required".to_string()));
    };

    Ok(Json(state.service.video_info(&url).await?))
}

/// `GET /api/file/{fetch_ref}`
pub async fn file(
    State(state): State<AppState>,
    Path(fetch_ref): Path<String>,
) -> ApiResult<Response> {
    let fetch_ref: FetchRef = fetch_ref.parse()?;
    let artifact = state.service.fetch(&fetch_ref).await?;

    log::info!("Serving {} ({} bytes)", artifact.filename, artifact.len);

    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.filename.replace(['"', '\\'], "_")
    );
    let len = artifact.len;
    let response = (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        Body::from_stream(artifact.into_stream()),
    );

    Ok(response.into_response())
}

/// `GET /api/jobs/{job_id}`
pub async fn job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let not_found = || ApiError::NotFound(format!("No job with id {}", job_id));

    let id: JobId = job_id.parse().map_err(|_| not_found())?;
    state.service.job(id).await.map(Json).ok_or_else(not_found)
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body: Value = json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "activeDownloads": state.service.jobs.active_jobs().await,
    });
    Json(body)
}
