use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

#[derive(Debug, Clone, FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub content: String,
    pub created_at: OffsetDateTime,
}

/// Comment row joined with the author's nickname.
#[derive(Debug, Clone, FromRow)]
pub struct CommentWithAuthor {
    pub id: i64,
    pub author: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

pub async fn create(
    db: &PgPool,
    post_id: i64,
    user_id: i64,
    content: &str,
) -> anyhow::Result<Comment> {
    let comment = sqlx::query_as::<_, Comment>(
        r#"
        INSERT INTO comments (post_id, user_id, content)
        VALUES ($1, $2, $3)
        RETURNING id, post_id, content, created_at
        "#,
    )
    .bind(post_id)
    .bind(user_id)
    .bind(content)
    .fetch_one(db)
    .await?;
    Ok(comment)
}

pub async fn list_by_post(db: &PgPool, post_id: i64) -> anyhow::Result<Vec<CommentWithAuthor>> {
    let rows = sqlx::query_as::<_, CommentWithAuthor>(
        r#"
        SELECT c.id, u.nickname AS author, c.content, c.created_at
        FROM comments c
        JOIN users u ON u.id = c.user_id
        WHERE c.post_id = $1
        ORDER BY c.created_at ASC, c.id ASC
        "#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}
