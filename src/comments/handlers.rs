use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{error, instrument};

use crate::{
    auth::jwt::AuthUser,
    comments::{
        dto::{CommentItem, CommentResponse, CreateCommentRequest},
        repo,
    },
    posts,
    state::AppState,
};

pub fn comment_routes() -> Router<AppState> {
    Router::new().route("/posts/:id/comments", get(list_comments).post(create_comment))
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = %e, "comment query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}

#[instrument(skip(state, payload))]
pub async fn create_comment(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(post_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), (StatusCode, String)> {
    let content = payload.content.trim();
    if content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Content must not be empty".into()));
    }

    // A missing post is a 404 here, not an FK error from the insert.
    posts::repo::find(&state.db, post_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Post not found".to_string()))?;

    let created = repo::create(&state.db, post_id, user_id, content)
        .await
        .map_err(internal)?;

    Ok((
        StatusCode::CREATED,
        Json(CommentResponse {
            id: created.id,
            post_id: created.post_id,
            content: created.content,
            created_at: created.created_at,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<Vec<CommentItem>>, (StatusCode, String)> {
    posts::repo::find(&state.db, post_id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Post not found".to_string()))?;

    let items = repo::list_by_post(&state.db, post_id)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|c| CommentItem {
            id: c.id,
            author: c.author,
            content: c.content,
            created_at: c.created_at,
        })
        .collect();
    Ok(Json(items))
}
