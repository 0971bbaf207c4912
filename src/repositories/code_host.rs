//! Code host repository
//!
//! Code hosts are created lazily the first time a delivery for a
//! `(kind, url)` pair is attributed, so diagnostic records can reference one.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::code_host::{self, Entity as CodeHost};
use crate::webhooks::CodeHostKind;

#[derive(Debug, Clone)]
pub struct CodeHostRepository {
    pub db: Arc<DatabaseConnection>,
}

impl CodeHostRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(&self, kind: CodeHostKind, url: &str) -> Result<Option<code_host::Model>, DbErr> {
        CodeHost::find()
            .filter(code_host::Column::Kind.eq(kind.as_str()))
            .filter(code_host::Column::Url.eq(url))
            .one(&*self.db)
            .await
    }

    /// Find the code host for `(kind, url)`, creating it if needed.
    ///
    /// Two deliveries racing to create the same host both end up with the
    /// row that won the unique constraint.
    pub async fn ensure(&self, kind: CodeHostKind, url: &str) -> Result<code_host::Model, DbErr> {
        if let Some(existing) = self.find(kind, url).await? {
            return Ok(existing);
        }

        let model = code_host::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(kind.as_str().to_string()),
            url: Set(url.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        match model.insert(&*self.db).await {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => self
                .find(kind, url)
                .await?
                .ok_or_else(|| DbErr::RecordNotFound(format!("code host {kind} {url}"))),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo = CodeHostRepository::new(Arc::new(db));

        let first = repo.ensure(CodeHostKind::GitHub, "https://github.com").await.unwrap();
        let second = repo.ensure(CodeHostKind::GitHub, "https://github.com").await.unwrap();
        assert_eq!(first.id, second.id);

        let other = repo.ensure(CodeHostKind::GitLab, "https://github.com").await.unwrap();
        assert_ne!(first.id, other.id);
    }
}
