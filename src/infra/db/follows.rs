use async_trait::async_trait;

use crate::application::repos::{FollowsRepo, RepoError};
use crate::domain::follows::FollowEdge;
use crate::domain::types::UserId;

use super::{PostgresRepositories, map_sqlx_error};

#[async_trait]
impl FollowsRepo for PostgresRepositories {
    async fn create_follow_edge(&self, edge: FollowEdge) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            INSERT INTO follow_edges (author_id, follower_id)
            VALUES ($1, $2)
            ON CONFLICT (author_id, follower_id) DO NOTHING
            "#,
        )
        .bind(edge.author_id())
        .bind(edge.follower_id())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_follow_edge(&self, edge: FollowEdge) -> Result<bool, RepoError> {
        let result = sqlx::query(
            r#"
            DELETE FROM follow_edges
            WHERE author_id = $1 AND follower_id = $2
            "#,
        )
        .bind(edge.author_id())
        .bind(edge.follower_id())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn query_following_set(&self, follower_id: UserId) -> Result<Vec<UserId>, RepoError> {
        sqlx::query_scalar::<_, UserId>(
            r#"
            SELECT author_id
            FROM follow_edges
            WHERE follower_id = $1
            ORDER BY author_id
            "#,
        )
        .bind(follower_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)
    }
}
