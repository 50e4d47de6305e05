use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::api::handler::AppState;
use crate::auth::verify_token;
use crate::error::AppError;

/// Authenticated caller identity, injected into protected handlers
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

/// Bearer-token middleware for the protected route group.
///
/// Extracts and verifies the JWT, then makes the user id available as a
/// request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Unauthorized)?;

    let user_id = verify_token(token, &state.jwt_secret)?;

    request.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(request).await)
}
