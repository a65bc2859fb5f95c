use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::engagement::{Comment, EntityType, Like};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct EngagementService {
    db: Db,
}

impl EngagementService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Inserts the like only if its target exists. `None` means there was nothing to like;
    /// a second like by the same user fails on the primary key.
    pub async fn like(
        &self,
        user_id: Uuid,
        entity_id: Uuid,
        entity_type: EntityType,
    ) -> Result<Option<Like>> {
        let row = sqlx::query(
            "INSERT INTO likes (user_id, entity_id, entity_type) \
             SELECT $1, $2, $3 \
             WHERE ($3 = 'post' AND EXISTS (SELECT 1 FROM posts WHERE id = $2)) \
                OR ($3 = 'comment' AND EXISTS (SELECT 1 FROM comments WHERE id = $2)) \
             RETURNING user_id, entity_id, entity_type, created_at",
        )
        .bind(user_id)
        .bind(entity_id)
        .bind(entity_type.as_db())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|row| like_from_row(&row)).transpose()
    }

    pub async fn unlike(
        &self,
        user_id: Uuid,
        entity_id: Uuid,
        entity_type: EntityType,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM likes WHERE user_id = $1 AND entity_id = $2 AND entity_type = $3",
        )
        .bind(user_id)
        .bind(entity_id)
        .bind(entity_type.as_db())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// `None` means the post does not exist.
    pub async fn create_comment(
        &self,
        user_id: Uuid,
        post_id: Uuid,
        content: String,
    ) -> Result<Option<Comment>> {
        let row = sqlx::query(
            "WITH inserted_comment AS ( \
                INSERT INTO comments (post_id, user_id, content) \
                SELECT $2, $1, $3 \
                WHERE EXISTS (SELECT 1 FROM posts WHERE id = $2) \
                RETURNING id, post_id, user_id, content, is_edited, created_at, updated_at \
             ) \
             SELECT c.*, u.username AS author_username, 0::bigint AS likes_count, false AS liked \
             FROM inserted_comment c \
             JOIN users u ON u.id = c.user_id",
        )
        .bind(user_id)
        .bind(post_id)
        .bind(content)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| comment_from_row(&row, Some(user_id))))
    }

    /// Only the author can edit, and only under the post the comment belongs to.
    pub async fn update_comment(
        &self,
        comment_id: Uuid,
        post_id: Uuid,
        user_id: Uuid,
        content: String,
    ) -> Result<Option<Comment>> {
        let row = sqlx::query(
            "WITH updated_comment AS ( \
                UPDATE comments \
                SET content = $4, is_edited = true, updated_at = now() \
                WHERE id = $2 AND post_id = $3 AND user_id = $1 \
                RETURNING id, post_id, user_id, content, is_edited, created_at, updated_at \
             ) \
             SELECT c.*, u.username AS author_username, \
                    (SELECT COUNT(*) FROM likes l \
                      WHERE l.entity_id = c.id AND l.entity_type = 'comment') AS likes_count, \
                    EXISTS (SELECT 1 FROM likes l \
                      WHERE l.entity_id = c.id AND l.entity_type = 'comment' AND l.user_id = $1) AS liked \
             FROM updated_comment c \
             JOIN users u ON u.id = c.user_id",
        )
        .bind(user_id)
        .bind(comment_id)
        .bind(post_id)
        .bind(content)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| comment_from_row(&row, Some(user_id))))
    }

    pub async fn delete_comment(
        &self,
        comment_id: Uuid,
        post_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "DELETE FROM comments WHERE id = $1 AND post_id = $2 AND user_id = $3",
        )
        .bind(comment_id)
        .bind(post_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM likes WHERE entity_type = 'comment' AND entity_id = $1")
            .bind(comment_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Oldest first, with like counters and the viewer's like state.
    pub async fn list_comments(&self, post_id: Uuid, viewer_id: Option<Uuid>) -> Result<Vec<Comment>> {
        let rows = sqlx::query(
            "SELECT c.id, c.post_id, c.user_id, u.username AS author_username, c.content, \
                    c.is_edited, c.created_at, c.updated_at, \
                    (SELECT COUNT(*) FROM likes l \
                      WHERE l.entity_id = c.id AND l.entity_type = 'comment') AS likes_count, \
                    EXISTS (SELECT 1 FROM likes l \
                      WHERE l.entity_id = c.id AND l.entity_type = 'comment' AND l.user_id = $2) AS liked \
             FROM comments c \
             JOIN users u ON u.id = c.user_id \
             WHERE c.post_id = $1 \
             ORDER BY c.created_at ASC, c.id ASC",
        )
        .bind(post_id)
        .bind(viewer_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .iter()
            .map(|row| comment_from_row(row, viewer_id))
            .collect())
    }
}

fn like_from_row(row: &PgRow) -> Result<Like> {
    let entity_type: String = row.get("entity_type");
    let entity_type = EntityType::from_db(&entity_type)
        .ok_or_else(|| anyhow!("unknown entity type: {}", entity_type))?;

    Ok(Like {
        user_id: row.get("user_id"),
        entity_id: row.get("entity_id"),
        entity_type,
        created_at: row.get("created_at"),
    })
}

fn comment_from_row(row: &PgRow, viewer_id: Option<Uuid>) -> Comment {
    Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        user_id: row.get("user_id"),
        author_username: row.get("author_username"),
        content: row.get("content"),
        is_edited: row.get("is_edited"),
        likes_count: row.get("likes_count"),
        liked: viewer_id.map(|_| row.get("liked")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
