use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use super::models::*;
use crate::{
    auth,
    error::{AppError, AppResult},
    ledger::{models::OrderSubmission, repository::LedgerRepository},
    luhn,
    middleware::auth::AuthUser,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerRepository>,
    pub jwt_secret: String,
}

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Register a new user
/// POST /api/user/register
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<Response> {
    request
        .validate()
        .map_err(|_| AppError::BadRequest("login and password must not be empty".to_string()))?;

    let password_hash = auth::hash_password(&request.password)?;
    let user = state.ledger.create_user(&request.login, &password_hash).await?;
    let token = auth::build_token(user.id, &state.jwt_secret)?;

    info!("User {} registered", user.login);

    Ok((
        StatusCode::OK,
        [(header::AUTHORIZATION, format!("Bearer {}", token))],
    )
        .into_response())
}

/// Authenticate an existing user
/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Response> {
    request
        .validate()
        .map_err(|_| AppError::BadRequest("login and password must not be empty".to_string()))?;

    let user = state
        .ledger
        .get_user_by_login(&request.login)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !auth::verify_password(&request.password, &user.password_hash)? {
        return Err(AppError::InvalidCredentials);
    }

    let token = auth::build_token(user.id, &state.jwt_secret)?;

    Ok((
        StatusCode::OK,
        [(header::AUTHORIZATION, format!("Bearer {}", token))],
    )
        .into_response())
}

/// Submit an order number for accrual
/// POST /api/user/orders
///
/// 202 accepted, 200 already mine, 409 claimed by another user,
/// 422 checksum failure
pub async fn create_order(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    body: String,
) -> AppResult<StatusCode> {
    let number = body.trim();

    if !luhn::is_valid(number) {
        return Err(AppError::InvalidOrderNumber);
    }

    match state.ledger.create_order(user_id, number).await? {
        OrderSubmission::Created => {
            info!("Order {} accepted for user {}", number, user_id);
            Ok(StatusCode::ACCEPTED)
        }
        OrderSubmission::AlreadyMine => Ok(StatusCode::OK),
        OrderSubmission::AlreadyOther => Err(AppError::OrderOwnedByAnother),
    }
}

/// GET /api/user/orders
pub async fn get_orders(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> AppResult<Response> {
    let orders = state.ledger.get_orders_by_user(user_id).await?;

    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(Json(orders).into_response())
}

/// GET /api/user/balance
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> AppResult<Response> {
    let balance = state.ledger.get_balance(user_id).await?;
    Ok(Json(balance).into_response())
}

/// Withdraw points against a (future) order number
/// POST /api/user/balance/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    Json(request): Json<WithdrawRequest>,
) -> AppResult<StatusCode> {
    // The order label is validated for format only - it does not have to
    // match an uploaded order
    if !luhn::is_valid(&request.order) {
        return Err(AppError::InvalidOrderNumber);
    }

    if request.sum <= rust_decimal::Decimal::ZERO {
        return Err(AppError::BadRequest("sum must be positive".to_string()));
    }

    state
        .ledger
        .create_withdrawal(user_id, &request.order, request.sum)
        .await?;

    info!("Withdrawal of {} recorded for user {}", request.sum, user_id);

    Ok(StatusCode::OK)
}

/// GET /api/user/withdrawals
pub async fn get_withdrawals(
    State(state): State<AppState>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> AppResult<Response> {
    let withdrawals = state.ledger.get_withdrawals_by_user(user_id).await?;

    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(Json(withdrawals).into_response())
}
