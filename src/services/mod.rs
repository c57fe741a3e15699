/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Round lifecycle and tap protocol.
pub mod round_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Periodic status and winner reconciliation.
pub mod sweeper;
