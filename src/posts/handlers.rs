use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument, warn};

use crate::{
    auth::jwt::AuthUser,
    comments::{self, dto::CommentItem},
    posts::{
        dto::{CreatePostRequest, Pagination, PostDetails, PostListItem, PostResponse},
        repo,
    },
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/:id", get(get_post))
}

pub fn write_routes() -> Router<AppState> {
    Router::new().route("/posts", post(create_post))
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    error!(error = %e, "post query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}

#[instrument(skip(state, payload))]
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostResponse>), (StatusCode, String)> {
    let title = payload.title.trim();
    let content = payload.content.trim();
    if title.is_empty() {
        warn!(user_id, "post with empty title");
        return Err((StatusCode::BAD_REQUEST, "Title must not be empty".into()));
    }
    if content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Content must not be empty".into()));
    }

    let created = repo::create(&state.db, user_id, title, content)
        .await
        .map_err(internal)?;

    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            id: created.id,
            title: created.title,
            content: created.content,
            created_at: created.created_at,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn list_posts(
    State(state): State<AppState>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<PostListItem>>, (StatusCode, String)> {
    let posts = repo::list(&state.db, p.limit, p.offset)
        .await
        .map_err(internal)?;

    let items = posts
        .into_iter()
        .map(|p| PostListItem {
            id: p.id,
            author: p.author,
            title: p.title,
            created_at: p.created_at,
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PostDetails>, (StatusCode, String)> {
    let post = repo::find(&state.db, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Post not found".to_string()))?;

    let comments = comments::repo::list_by_post(&state.db, id)
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

    Ok(Json(PostDetails {
        id: post.id,
        author: post.author,
        title: post.title,
        content: post.content,
        created_at: post.created_at,
        comments,
    }))
}
