//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use common::{Actor, ActorId, Role};

use crate::error::ApiError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The caller's identity, taken from headers set by the authenticating
/// proxy in front of this service. The role defaults to staff.
#[derive(Debug, Clone, Copy)]
pub struct RequestActor(pub Actor);

impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        actor_from_headers(&parts.headers).map(RequestActor)
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::BadRequest(format!("{name} is not valid text")))
        })
        .transpose()
}

fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let id = header(headers, ACTOR_ID_HEADER)?
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {ACTOR_ID_HEADER} header")))?;
    let id: ActorId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {ACTOR_ID_HEADER}: {e}")))?;

    let role = match header(headers, ACTOR_ROLE_HEADER)? {
        Some(role) => role
            .parse::<Role>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => Role::default(),
    };

    Ok(Actor::new(id, role))
}
