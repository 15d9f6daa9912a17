use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

/// Post row joined with the author's nickname.
#[derive(Debug, Clone, FromRow)]
pub struct PostWithAuthor {
    pub id: i64,
    pub author: String,
    pub title: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

pub async fn create(
    db: &PgPool,
    user_id: i64,
    title: &str,
    content: &str,
) -> anyhow::Result<Post> {
    let post = sqlx::query_as::<_, Post>(
        r#"
        INSERT INTO posts (user_id, title, content)
        VALUES ($1, $2, $3)
        RETURNING id, title, content, created_at
        "#,
    )
    .bind(user_id)
    .bind(title)
    .bind(content)
    .fetch_one(db)
    .await?;
    Ok(post)
}

pub async fn list(db: &PgPool, limit: i64, offset: i64) -> anyhow::Result<Vec<PostWithAuthor>> {
    let rows = sqlx::query_as::<_, PostWithAuthor>(
        r#"
        SELECT p.id, u.nickname AS author, p.title, p.content, p.created_at
        FROM posts p
        JOIN users u ON u.id = p.user_id
        ORDER BY p.created_at DESC, p.id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn find(db: &PgPool, post_id: i64) -> anyhow::Result<Option<PostWithAuthor>> {
    let post = sqlx::query_as::<_, PostWithAuthor>(
        r#"
        SELECT p.id, u.nickname AS author, p.title, p.content, p.created_at
        FROM posts p
        JOIN users u ON u.id = p.user_id
        WHERE p.id = $1
        "#,
    )
    .bind(post_id)
    .fetch_optional(db)
    .await?;
    Ok(post)
}
