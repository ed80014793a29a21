use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::{
    error::{AppError, Result},
    services::images as images_service,
    state::AppState,
    storage::ObjectStore,
};

/// Query string of an upload-url request.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// Query string of a download-url request.
#[derive(Deserialize, Debug)]
pub struct DownloadQuery {
    pub key: Option<String>,
}

fn objects(state: &AppState) -> Result<&Arc<dyn ObjectStore>> {
    state
        .objects
        .as_ref()
        .ok_or_else(|| AppError::Configuration("S3".to_string()))
}

/// Issues a presigned PUT under the temp prefix.
pub async fn upload_url(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
) -> Result<impl IntoResponse> {
    let store = objects(&state)?;
    let ticket = images_service::issue_upload_url(
        store.as_ref(),
        state.temp_prefix(),
        query.filename.as_deref(),
        query.content_type.as_deref(),
        state.config.upload_url_ttl,
    )
    .await?;

    Ok(Json(ticket))
}

/// Issues a presigned GET for a key under the temp prefix.
pub async fn download_url(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse> {
    let store = objects(&state)?;
    let ticket = images_service::issue_download_url(
        store.as_ref(),
        state.temp_prefix(),
        query.key.as_deref(),
        state.config.download_url_ttl,
    )
    .await?;

    Ok(Json(ticket))
}
