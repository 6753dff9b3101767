//! HTTP handlers for files and folders.
//!
//! Each handler resolves the caller's tenant, canonicalizes the raw path
//! parameters and hands off to [`DriveService`]. Uploads and downloads are
//! streamed in both directions; nothing here buffers a whole object.

use super::tenant::Tenant;
use crate::{
    errors::AppError,
    models::resource::ResourceInfo,
    services::{drive_service::DriveService, path_canonicalizer::ResourcePath},
    store::BodyError,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

/// `GET /api/resource?path=`: file or folder info, chosen by path shape.
pub async fn get_resource(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<PathQuery>,
) -> Result<Json<ResourceInfo>, AppError> {
    let path = ResourcePath::parse(q.path.as_deref(), &root)?;
    let info = service.resource_info(&root, &path).await?;
    Ok(Json(info))
}

/// `DELETE /api/resource?path=`: a single file, or a folder recursively.
pub async fn delete_resource(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<PathQuery>,
) -> Result<StatusCode, AppError> {
    let path = ResourcePath::parse(q.path.as_deref(), &root)?;
    service.delete_resource(&root, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/resource/move?from=&to=`
pub async fn move_resource(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<MoveQuery>,
) -> Result<Json<ResourceInfo>, AppError> {
    let from = ResourcePath::parse(q.from.as_deref(), &root)?;
    let to = ResourcePath::parse(q.to.as_deref(), &root)?;
    let info = service.move_resource(&root, &from, &to).await?;
    Ok(Json(info))
}

/// `GET /api/resource/search?query=`
pub async fn search_resources(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<ResourceInfo>>, AppError> {
    let query = q.query.unwrap_or_default();
    let found = service.search(&root, &query).await?;
    Ok(Json(found))
}

/// `POST /api/resource?path=`: multipart upload of one or more files into
/// the folder at `path`. A part's file name may include sub-folders.
pub async fn upload_resources(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<PathQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<ResourceInfo>>), AppError> {
    let folder = ResourcePath::parse(q.path.as_deref(), &root)?;

    let mut uploaded = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        // plain form fields carry no file
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let body = field.map(|chunk| chunk.map_err(body_error)).boxed();

        let info = service
            .upload(&root, &folder, &file_name, body, content_type.as_deref())
            .await?;
        uploaded.push(info);
    }

    if uploaded.is_empty() {
        return Err(AppError::bad_request("no files in upload"));
    }
    info!(
        "uploaded {} file(s) to {}{}",
        uploaded.len(),
        root.prefix(),
        folder.as_str()
    );
    Ok((StatusCode::CREATED, Json(uploaded)))
}

/// Keep a failing upload body tagged as the client's fault so it is not
/// reported as a storage outage.
fn body_error(err: MultipartError) -> io::Error {
    let tag = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        BodyError::TooLarge
    } else {
        BodyError::Interrupted(err.body_text())
    };
    tag.into_io()
}

/// `GET /api/resource/download?path=`: raw bytes for a file, a zip archive
/// for a folder. The body is streamed; an error after the first byte ends
/// the transfer abruptly.
pub async fn download_resource(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<PathQuery>,
) -> Result<Response, AppError> {
    let path = ResourcePath::parse(q.path.as_deref(), &root)?;
    let download = service.download(&root, &path).await?;

    let disposition =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", download.file_name))
            .map_err(|_| AppError::bad_request("file name cannot be used in a header"))?;

    let mut response = Response::new(Body::from_stream(download.body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(download.content_type),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Some(len) = download.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}

/// `GET /api/directory?path=`: one-level listing.
pub async fn list_directory(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<PathQuery>,
) -> Result<Json<Vec<ResourceInfo>>, AppError> {
    let path = ResourcePath::parse(q.path.as_deref(), &root)?;
    let content = service.folder_content(&root, &path).await?;
    Ok(Json(content))
}

/// `POST /api/directory?path=`: create an empty folder.
pub async fn create_directory(
    State(service): State<DriveService>,
    Tenant(root): Tenant,
    Query(q): Query<PathQuery>,
) -> Result<(StatusCode, Json<ResourceInfo>), AppError> {
    let path = ResourcePath::parse(q.path.as_deref(), &root)?;
    let info = service.create_folder(&root, &path).await?;
    Ok((StatusCode::CREATED, Json(info)))
}
