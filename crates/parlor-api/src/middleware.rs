use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use parlor_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Validate the bearer JWT and stash its claims in request extensions.
/// Resolving the claims to a user is left to handlers, since `/users/sync`
/// must accept identities that have no user yet.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}
