use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use crate::{
    dto::{
        identity::Participant,
        round::{CreateRoundResponse, RoundView, TapRequest, TapResponse},
    },
    error::AppError,
    services::round_service,
    state::SharedState,
};

/// Round endpoints. Every route requires the forwarded identity headers.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rounds", get(list_rounds).post(create_round))
        .route("/rounds/{id}", get(get_round))
        .route("/tap", post(tap))
        .route_layer(middleware::from_fn(require_identity))
}

/// List every round, newest first, with the caller's own totals.
#[utoipa::path(
    get,
    path = "/rounds",
    tag = "rounds",
    params(
        ("X-User-Id" = String, Header, description = "Caller identifier forwarded by the gateway"),
        ("X-User-Name" = String, Header, description = "Caller display name"),
        ("X-User-Role" = String, Header, description = "ADMIN, SURVIVOR or NIKITA"),
    ),
    responses(
        (status = 200, description = "Rounds, newest first", body = [RoundView]),
        (status = 401, description = "Missing or invalid identity"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn list_rounds(
    State(state): State<SharedState>,
    Extension(participant): Extension<Participant>,
) -> Result<Json<Vec<RoundView>>, AppError> {
    let rounds = round_service::list_rounds(&state, Some(&participant.id)).await?;
    Ok(Json(rounds))
}

/// Schedule a new round. Admin only.
#[utoipa::path(
    post,
    path = "/rounds",
    tag = "rounds",
    params(
        ("X-User-Id" = String, Header, description = "Caller identifier forwarded by the gateway"),
        ("X-User-Name" = String, Header, description = "Caller display name"),
        ("X-User-Role" = String, Header, description = "Must be ADMIN"),
    ),
    responses(
        (status = 201, description = "Round scheduled", body = CreateRoundResponse),
        (status = 401, description = "Missing or invalid identity"),
        (status = 403, description = "Caller is not an admin"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_round(
    State(state): State<SharedState>,
    Extension(participant): Extension<Participant>,
) -> Result<(StatusCode, Json<CreateRoundResponse>), AppError> {
    if !participant.is_admin() {
        return Err(AppError::Forbidden("only admins can create rounds".into()));
    }

    let round_id = round_service::create_round(&state).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateRoundResponse::created(round_id)),
    ))
}

/// Fetch one round with its live status and the caller's totals.
#[utoipa::path(
    get,
    path = "/rounds/{id}",
    tag = "rounds",
    params(
        ("id" = String, Path, description = "Round identifier"),
        ("X-User-Id" = String, Header, description = "Caller identifier forwarded by the gateway"),
        ("X-User-Name" = String, Header, description = "Caller display name"),
        ("X-User-Role" = String, Header, description = "ADMIN, SURVIVOR or NIKITA"),
    ),
    responses(
        (status = 200, description = "Round found", body = RoundView),
        (status = 404, description = "Unknown round"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn get_round(
    State(state): State<SharedState>,
    Extension(participant): Extension<Participant>,
    Path(id): Path<String>,
) -> Result<Json<RoundView>, AppError> {
    let id = round_service::parse_round_id(&id)?;
    let round = round_service::get_round(&state, id, Some(&participant.id)).await?;
    Ok(Json(round))
}

/// Register one tap for the caller.
#[utoipa::path(
    post,
    path = "/tap",
    tag = "rounds",
    request_body = TapRequest,
    params(
        ("X-User-Id" = String, Header, description = "Caller identifier forwarded by the gateway"),
        ("X-User-Name" = String, Header, description = "Caller display name"),
        ("X-User-Role" = String, Header, description = "ADMIN, SURVIVOR or NIKITA"),
    ),
    responses(
        (status = 200, description = "Tap counted", body = TapResponse),
        (status = 400, description = "Malformed body or round not active"),
        (status = 404, description = "Unknown round"),
        (status = 503, description = "Storage unavailable or too much contention")
    )
)]
pub async fn tap(
    State(state): State<SharedState>,
    Extension(participant): Extension<Participant>,
    payload: Result<Json<TapRequest>, JsonRejection>,
) -> Result<Json<TapResponse>, AppError> {
    let Json(payload) = payload?;
    let round_id = round_service::parse_round_id(&payload.round_id)?;
    let response = round_service::tap(&state, round_id, &participant).await?;
    Ok(Json(response))
}

async fn require_identity(mut req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let participant = Participant::from_headers(req.headers())?;
    req.extensions_mut().insert(participant);
    Ok(next.run(req).await)
}
