use serde::Serialize;
use utoipa::ToSchema;

/// Health payload returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: &'static str,
    /// Whether a storage backend is currently installed and answering.
    pub storage_ready: bool,
}

impl HealthResponse {
    /// Service is operational.
    pub fn ok() -> Self {
        Self {
            status: "ok",
            storage_ready: true,
        }
    }

    /// Service runs without a usable storage backend; every round operation answers 503.
    pub fn degraded() -> Self {
        Self {
            status: "degraded",
            storage_ready: false,
        }
    }
}
