//! REST API endpoints
//!
//! - `POST /api/auth` registers or logs in and returns a bearer token
//! - `GET /api/info` returns balance, inventory and transfer history
//! - `POST /api/sendCoin` transfers coins to another user
//! - `GET /api/buy/{item}` buys one catalog item

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use coin_ledger::{LedgerBackend, LedgerService};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth::{bearer_token, TokenIssuer};
use crate::error::{ApiError, ErrorResponse};

/// Shared state handed to every handler
pub struct AppState<B: LedgerBackend> {
    pub service: Arc<LedgerService<B>>,
    pub tokens: Arc<TokenIssuer>,
    pub request_timeout: Duration,
    pub shutdown: CancellationToken,
}

impl<B: LedgerBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            tokens: self.tokens.clone(),
            request_timeout: self.request_timeout,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<B: LedgerBackend> AppState<B> {
    pub fn new(
        service: Arc<LedgerService<B>>,
        tokens: TokenIssuer,
        request_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self { service, tokens: Arc::new(tokens), request_timeout, shutdown }
    }

    fn deadline(&self) -> RequestDeadline {
        RequestDeadline::start(self.shutdown.child_token(), self.request_timeout)
    }
}

/// Cancellation token that fires after the request budget or on shutdown
struct RequestDeadline {
    cancel: CancellationToken,
    timer: JoinHandle<()>,
}

impl RequestDeadline {
    fn start(cancel: CancellationToken, timeout: Duration) -> Self {
        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        };

        Self { cancel, timer }
    }

    fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for RequestDeadline {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Auth request body
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
}

/// Auth response body
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Send coin request body
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCoinRequest {
    pub to_user: String,
    pub amount: i64,
}

fn reject(err: impl Into<ApiError>) -> Rejection {
    warp::reject::custom(err.into())
}

/// POST /api/auth
pub async fn authenticate<B: LedgerBackend>(
    request: AuthRequest,
    state: AppState<B>,
) -> Result<impl Reply, Rejection> {
    let deadline = state.deadline();

    state
        .service
        .register(deadline.token(), &request.username, &request.password)
        .await
        .map_err(reject)?;

    let token = state.tokens.issue(&request.username).map_err(reject)?;
    Ok(warp::reply::json(&AuthResponse { token }))
}

/// GET /api/info
pub async fn get_info<B: LedgerBackend>(
    username: String,
    state: AppState<B>,
) -> Result<impl Reply, Rejection> {
    let deadline = state.deadline();

    let info = state.service.user_info(deadline.token(), &username).await.map_err(reject)?;
    Ok(warp::reply::json(&info))
}

/// POST /api/sendCoin
pub async fn send_coin<B: LedgerBackend>(
    username: String,
    request: SendCoinRequest,
    state: AppState<B>,
) -> Result<impl Reply, Rejection> {
    let deadline = state.deadline();

    state
        .service
        .send_coins(deadline.token(), &username, &request.to_user, request.amount)
        .await
        .map_err(reject)?;

    Ok(StatusCode::OK)
}

/// GET /api/buy/{item}
pub async fn buy_item<B: LedgerBackend>(
    item: String,
    username: String,
    state: AppState<B>,
) -> Result<impl Reply, Rejection> {
    let deadline = state.deadline();

    state.service.buy_item(deadline.token(), &username, &item).await.map_err(reject)?;

    Ok(StatusCode::OK)
}

/// Filter yielding the authenticated username
fn with_user(
    tokens: Arc<TokenIssuer>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let tokens = tokens.clone();
        async move {
            let token = bearer_token(header.as_deref()).map_err(reject)?;
            let claims = tokens.verify(token).map_err(reject)?;
            Ok::<_, Rejection>(claims.sub)
        }
    })
}

/// Create all API routes
pub fn create_routes<B: LedgerBackend>(
    state: AppState<B>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let tokens = state.tokens.clone();
    let state_filter = warp::any().map(move || state.clone());

    // Auth endpoint
    let auth = warp::path("api")
        .and(warp::path("auth"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(authenticate::<B>);

    // Info endpoint
    let info = warp::path("api")
        .and(warp::path("info"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_user(tokens.clone()))
        .and(state_filter.clone())
        .and_then(get_info::<B>);

    // Send coin endpoint
    let send = warp::path("api")
        .and(warp::path("sendCoin"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_user(tokens.clone()))
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(send_coin::<B>);

    // Buy endpoint
    let buy = warp::path("api")
        .and(warp::path("buy"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_user(tokens))
        .and(state_filter)
        .and_then(buy_item::<B>);

    auth.or(info)
        .or(send)
        .or(buy)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

/// Render rejections as `{"errors": "..."}` with the matching status
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(api_error) = err.find::<ApiError>() {
        if api_error.status() == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", api_error);
        }
        (api_error.status(), api_error.public_message())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid request body: {}", e))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
    };

    Ok(warp::reply::with_status(warp::reply::json(&ErrorResponse { errors: message }), status))
}
