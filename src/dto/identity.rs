//! Caller identity resolved by the upstream gateway.

use axum::http::HeaderMap;
use validator::Validate;

use crate::{error::ServiceError, state::scoring::UserRole};

/// Header carrying the caller's stable identifier.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's display name.
pub const USER_NAME_HEADER: &str = "x-user-name";
/// Header carrying the caller's role (`ADMIN`, `SURVIVOR` or `NIKITA`).
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Authenticated caller as seen by the round engine. The engine trusts it as-is.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct Participant {
    /// Stable user identifier.
    #[validate(length(min = 1, max = 128))]
    pub id: String,
    /// Display name, recorded on the ledger at the first tap.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Role deciding scoring and admin rights.
    pub role: UserRole,
}

impl Participant {
    /// Build and validate a participant from the forwarded identity headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServiceError> {
        let id = header(headers, USER_ID_HEADER)?;
        let name = header(headers, USER_NAME_HEADER)?;
        let raw_role = header(headers, USER_ROLE_HEADER)?;
        let role = UserRole::parse(&raw_role)
            .ok_or_else(|| ServiceError::Unauthorized(format!("unknown role `{raw_role}`")))?;

        let participant = Self { id, name, role };
        participant
            .validate()
            .map_err(|err| ServiceError::Unauthorized(format!("invalid identity: {err}")))?;
        Ok(participant)
    }

    /// Whether the caller may administer rounds.
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

fn header(headers: &HeaderMap, name: &'static str) -> Result<String, ServiceError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_owned())
        .ok_or_else(|| ServiceError::Unauthorized(format!("missing identity header `{name}`")))
}
