//! HTTP handlers for uploading and fetching log files and bundles.
//! Upload bodies are streamed part by part straight into staging; stored
//! files are streamed back out without buffering.

use crate::{
    errors::AppError,
    models::ids::{BundleId, FileId},
    services::log_service::{LogService, UploadError},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};

/// `POST /logs` — accept a multipart body of up to `max_file_count` log
/// files and answer with the id of the new bundle.
pub async fn upload_logs(
    State(service): State<LogService>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if content_length == 0 {
        return Err(AppError::new(
            StatusCode::LENGTH_REQUIRED,
            "Content-Length must be set to a positive non-zero value!",
        ));
    }

    let limit = service.limits.content_length_limit();
    if content_length > limit {
        return Err(AppError::too_large(format!(
            "Content-Length of {} is over the limit of {} bytes",
            content_length, limit
        )));
    }

    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "failed to parse multipart form");
            let mut response =
                AppError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "invalid multipart form")
                    .into_response();
            response.headers_mut().insert(
                HeaderName::from_static("accept-post"),
                HeaderValue::from_static("multipart/form-data"),
            );
            return Ok(response);
        }
    };

    let mut session = service.begin_upload();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::Multipart(err.to_string()))?
    {
        let reader = StreamReader::new(Box::pin(field.map_err(io::Error::other)));
        session.stage_part(reader).await?;
    }
    let bundle_id = session.commit().await?;

    let mut response = Response::new(Body::from(bundle_id.to_string()));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok(response)
}

/// `GET /logs/file/{id}` — stream a stored log file.
pub async fn get_file(
    State(service): State<LogService>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id: FileId = id.parse().map_err(|err| {
        tracing::debug!(error = %err, "failed to parse id");
        AppError::not_found("log file not found")
    })?;

    let file = service.storage.open_stored_file(id).await?;
    let length = file.metadata().await.map_err(AppError::internal)?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    Ok(response)
}

/// `GET /logs/bundle/{id}` — list the file ids of a bundle, in upload order.
pub async fn get_bundle(
    State(service): State<LogService>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FileId>>, AppError> {
    let id: BundleId = id.parse().map_err(|err| {
        tracing::debug!(error = %err, "failed to parse id");
        AppError::not_found("log bundle not found")
    })?;

    Ok(Json(service.index.get_bundle(id).await?))
}
