use anyhow::Result;
use sqlx::postgres::PgRow;
use sqlx::Row;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::post::Post;
use crate::infra::db::Db;

// $1 is always the viewer id (NULL for anonymous reads).
const POST_SELECT: &str = "SELECT p.id, p.author_id, u.username AS author_username, \
            p.title, p.content, p.created_at, p.updated_at, \
            (SELECT COUNT(*) FROM likes l \
              WHERE l.entity_id = p.id AND l.entity_type = 'post') AS likes_count, \
            (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count, \
            EXISTS (SELECT 1 FROM likes l \
              WHERE l.entity_id = p.id AND l.entity_type = 'post' AND l.user_id = $1) AS liked \
     FROM posts p \
     JOIN users u ON u.id = p.author_id";

#[derive(Clone)]
pub struct PostService {
    db: Db,
}

impl PostService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create_post(&self, author_id: Uuid, title: String, content: String) -> Result<Post> {
        let row = sqlx::query(
            "WITH inserted_post AS ( \
                INSERT INTO posts (author_id, title, content) \
                VALUES ($1, $2, $3) \
                RETURNING id, author_id, title, content, created_at, updated_at \
             ) \
             SELECT p.*, u.username AS author_username, \
                    0::bigint AS likes_count, 0::bigint AS comments_count, false AS liked \
             FROM inserted_post p \
             JOIN users u ON u.id = p.author_id",
        )
        .bind(author_id)
        .bind(title)
        .bind(content)
        .fetch_one(self.db.pool())
        .await?;

        Ok(post_from_row(&row, Some(author_id)))
    }

    pub async fn get_post(&self, post_id: Uuid, viewer_id: Option<Uuid>) -> Result<Option<Post>> {
        let row = sqlx::query(&format!("{} WHERE p.id = $2", POST_SELECT))
            .bind(viewer_id)
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|row| post_from_row(&row, viewer_id)))
    }

    pub async fn find_author(&self, post_id: Uuid) -> Result<Option<Uuid>> {
        let author_id = sqlx::query_scalar("SELECT author_id FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(author_id)
    }

    pub async fn update_post(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        title: String,
        content: String,
    ) -> Result<Option<Post>> {
        let row = sqlx::query(
            "WITH updated_post AS ( \
                UPDATE posts \
                SET title = $3, content = $4, updated_at = now() \
                WHERE id = $2 AND author_id = $1 \
                RETURNING id, author_id, title, content, created_at, updated_at \
             ) \
             SELECT p.*, u.username AS author_username, \
                    (SELECT COUNT(*) FROM likes l \
                      WHERE l.entity_id = p.id AND l.entity_type = 'post') AS likes_count, \
                    (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comments_count, \
                    EXISTS (SELECT 1 FROM likes l \
                      WHERE l.entity_id = p.id AND l.entity_type = 'post' AND l.user_id = $1) AS liked \
             FROM updated_post p \
             JOIN users u ON u.id = p.author_id",
        )
        .bind(author_id)
        .bind(post_id)
        .bind(title)
        .bind(content)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| post_from_row(&row, Some(author_id))))
    }

    /// Deletes the post with its likes and the likes on its comments. Comments go by cascade.
    pub async fn delete_post(&self, post_id: Uuid, author_id: Uuid) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            "DELETE FROM likes \
             WHERE (entity_type = 'post' AND entity_id = $1) \
                OR (entity_type = 'comment' AND entity_id IN ( \
                    SELECT id FROM comments WHERE post_id = $1 \
                ))",
        )
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM posts WHERE id = $1 AND author_id = $2")
            .bind(post_id)
            .bind(author_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn list_posts(
        &self,
        viewer_id: Option<Uuid>,
        cursor: Option<(OffsetDateTime, Uuid)>,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let rows = match cursor {
            Some((created_at, post_id)) => {
                sqlx::query(&format!(
                    "{} \
                     WHERE (p.created_at < $2 OR (p.created_at = $2 AND p.id < $3)) \
                     ORDER BY p.created_at DESC, p.id DESC \
                     LIMIT $4",
                    POST_SELECT
                ))
                .bind(viewer_id)
                .bind(created_at)
                .bind(post_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "{} \
                     ORDER BY p.created_at DESC, p.id DESC \
                     LIMIT $2",
                    POST_SELECT
                ))
                .bind(viewer_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| post_from_row(row, viewer_id))
            .collect())
    }
}

fn post_from_row(row: &PgRow, viewer_id: Option<Uuid>) -> Post {
    Post {
        id: row.get("id"),
        author_id: row.get("author_id"),
        author_username: row.get("author_username"),
        title: row.get("title"),
        content: row.get("content"),
        likes_count: row.get("likes_count"),
        comments_count: row.get("comments_count"),
        liked: viewer_id.map(|_| row.get("liked")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
