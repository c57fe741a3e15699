use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI document for Tap Rounds Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rounds::list_rounds,
        crate::routes::rounds::create_round,
        crate::routes::rounds::get_round,
        crate::routes::rounds::tap,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::round::RoundView,
            crate::dto::round::TapRequest,
            crate::dto::round::TapResponse,
            crate::dto::round::CreateRoundResponse,
            crate::state::round::RoundStatus,
            crate::state::scoring::UserRole,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rounds", description = "Round lifecycle and taps"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_round_route() {
        let doc = ApiDoc::openapi();
        for path in ["/healthcheck", "/rounds", "/rounds/{id}", "/tap"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
