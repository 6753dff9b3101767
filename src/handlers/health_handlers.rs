//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that asks the object store to probe itself

use crate::services::drive_service::DriveService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

/// `GET /healthz`
///
/// Always 200; never touches the store.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when the backing store answers its health probe, 503 otherwise.
pub async fn readyz(State(service): State<DriveService>) -> impl IntoResponse {
    let store_check = match service.store().health_check().await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(e) => {
            warn!("readiness probe failed: {}", e);
            CheckStatus {
                ok: false,
                error: Some(e.to_string()),
            }
        }
    };

    let overall_ok = store_check.ok;
    let mut checks = HashMap::new();
    checks.insert("store", store_check);

    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryObjectStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn ready_when_store_answers() {
        let service = DriveService::new(Arc::new(MemoryObjectStore::new()));
        let response = readyz(State(service)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
