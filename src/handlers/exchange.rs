use axum::{
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::session::Session,
    services::exchange::Exchange,
    state::AppState,
    validation::exchange::{content_too_large, validate_content},
};

/// The request payload for a deposit.
#[derive(Deserialize, Debug)]
pub struct DepositRequest {
    pub content: Option<String>,
}

/// Query string of a redemption.
#[derive(Deserialize, Debug)]
pub struct RedeemQuery {
    #[serde(rename = "userCode")]
    pub user_code: Option<String>,
}

#[derive(Serialize)]
pub struct DepositResponse {
    pub message: &'static str,
    pub code: String,
}

#[derive(Serialize)]
pub struct RedeemResponse {
    pub message: &'static str,
    pub data: Vec<Session>,
}

fn exchange(state: &AppState) -> Result<&Exchange> {
    state
        .exchange
        .as_ref()
        .ok_or_else(|| AppError::Configuration("session store".to_string()))
}

/// Stores the posted content and answers with its code.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `payload` - The JSON body, or why it could not be read.
///
/// # Returns
///
/// 201 with the generated code.
pub async fn send(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DepositRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let content = match payload {
        Ok(Json(body)) => body.content,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            tracing::debug!("Deposit body over the limit: {}", rejection.body_text());
            return Err(content_too_large(state.config.max_content_bytes));
        }
        Err(rejection) => {
            tracing::debug!("Unreadable deposit body: {}", rejection.body_text());
            None
        }
    };
    let content = validate_content(content, state.config.max_content_bytes)?;

    let session = exchange(&state)?.deposit(content).await?;

    Ok((
        StatusCode::CREATED,
        Json(DepositResponse {
            message: "content was stored in database",
            code: session.code,
        }),
    ))
}

/// Redeems `userCode` for the content stored under it.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `query` - The `userCode` query parameter.
///
/// # Returns
///
/// 200 with a one-element `data` array, 403 for a malformed code, 404 when
/// nothing live matches.
pub async fn receive(
    State(state): State<AppState>,
    Query(query): Query<RedeemQuery>,
) -> Result<impl IntoResponse> {
    let session = exchange(&state)?
        .redeem(query.user_code.as_deref())
        .await?;

    Ok(Json(RedeemResponse {
        message: "here's your data",
        data: vec![session],
    }))
}
