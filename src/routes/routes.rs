//! Route table for the drive API.
//!
//! ## Structure
//! - **Resources** (file or folder, chosen by a trailing `/` on `path`)
//!   - `GET    /api/resource?path=`          -> info
//!   - `DELETE /api/resource?path=`          -> delete (folders recursively)
//!   - `POST   /api/resource?path=`          -> multipart upload into a folder
//!   - `GET    /api/resource/move?from=&to=` -> move or rename
//!   - `GET    /api/resource/search?query=`  -> name search across the tenant
//!   - `GET    /api/resource/download?path=` -> file bytes or folder zip
//!
//! - **Directories**
//!   - `GET    /api/directory?path=` -> one-level listing
//!   - `POST   /api/directory?path=` -> create an empty folder
//!
//! Every `/api` route requires the `x-user-id` header.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        resource_handlers::{
            create_directory, delete_resource, download_resource, get_resource, list_directory,
            move_resource, search_resources, upload_resources,
        },
    },
    services::drive_service::DriveService,
};
use axum::{Router, extract::DefaultBodyLimit, routing::get};

/// Build the router. `max_upload_bytes` caps request bodies (uploads).
pub fn routes(max_upload_bytes: usize) -> Router<DriveService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/api/resource",
            get(get_resource)
                .delete(delete_resource)
                .post(upload_resources),
        )
        .route("/api/resource/move", get(move_resource))
        .route("/api/resource/search", get(search_resources))
        .route("/api/resource/download", get(download_resource))
        .route(
            "/api/directory",
            get(list_directory).post(create_directory),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}
