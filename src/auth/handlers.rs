use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, instrument, warn};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, RegisterRequest, TokenPair},
        service::AuthError,
    },
    state::AppState,
    users::dto::PublicUser,
};

/// Cookie carrying the raw refresh token, scoped to the refresh endpoint.
pub const REFRESH_COOKIE: &str = "refreshToken";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

fn auth_error(e: AuthError) -> (StatusCode, String) {
    match &e {
        AuthError::EmailTaken | AuthError::NicknameTaken => (StatusCode::CONFLICT, e.to_string()),
        AuthError::InvalidCredentials | AuthError::InvalidRefreshToken => {
            (StatusCode::UNAUTHORIZED, e.to_string())
        }
        AuthError::Store(err) => {
            error!(error = %err, "user store failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
        }
        AuthError::Internal(err) => {
            error!(error = %err, "auth failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
        }
    }
}

fn refresh_cookie(state: &AppState, pair: &TokenPair) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, pair.refresh_token.clone()))
        .http_only(true)
        .secure(state.config.production)
        .same_site(SameSite::Lax)
        .path("/auth/refresh")
        .max_age(time::Duration::seconds(
            state.auth.keys().refresh_ttl.as_secs() as i64,
        ))
        .build()
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<PublicUser>), (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();
    payload.nickname = payload.nickname.trim().to_string();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err((StatusCode::BAD_REQUEST, "Invalid email".into()));
    }
    if payload.password.len() < 8 {
        warn!("password too short");
        return Err((StatusCode::BAD_REQUEST, "Password too short".into()));
    }
    if payload.nickname.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Nickname must not be empty".into()));
    }

    let user = state
        .auth
        .register(&payload.email, &payload.nickname, &payload.password)
        .await
        .map_err(auth_error)?;

    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(mut payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), (StatusCode, String)> {
    payload.email = payload.email.trim().to_lowercase();

    let pair = state
        .auth
        .login(&payload.email, &payload.password)
        .await
        .map_err(auth_error)?;

    let jar = jar.add(refresh_cookie(&state, &pair));
    Ok((
        jar,
        Json(LoginResponse {
            access_token: pair.access_token,
        }),
    ))
}

#[instrument(skip(state, jar))]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LoginResponse>), (StatusCode, String)> {
    let raw = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Missing refresh token".to_string(),
        ))?;

    let pair = state.auth.refresh(&raw).await.map_err(auth_error)?;

    let jar = jar.add(refresh_cookie(&state, &pair));
    Ok((
        jar,
        Json(LoginResponse {
            access_token: pair.access_token,
        }),
    ))
}
