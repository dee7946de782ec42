use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Lookup seam for the donor and wellness-provider records the platform's
/// account service owns. The orchestrator only needs existence checks and a
/// display name, so that is all the trait carries.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn donor_exists(&self, donor_id: Uuid) -> Result<bool, DatabaseError>;

    async fn provider_exists(&self, provider_id: Uuid) -> Result<bool, DatabaseError>;

    async fn provider_name(&self, provider_id: Uuid) -> Result<Option<String>, DatabaseError>;
}

pub struct DirectoryRepository {
    pool: PgPool,
}

impl DirectoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for DirectoryRepository {
    async fn donor_exists(&self, donor_id: Uuid) -> Result<bool, DatabaseError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(donor_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(exists)
    }

    async fn provider_exists(&self, provider_id: Uuid) -> Result<bool, DatabaseError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM wellness_providers WHERE id = $1)")
                .bind(provider_id)
                .fetch_one(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(exists)
    }

    async fn provider_name(&self, provider_id: Uuid) -> Result<Option<String>, DatabaseError> {
        sqlx::query_scalar("SELECT name FROM wellness_providers WHERE id = $1")
            .bind(provider_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
