//! Webhook registration repository
//!
//! Registrations are looked up by external UUID on every delivery. Secrets
//! are sealed with the configured crypto key before they reach the table.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoError, CryptoKey, open_secret, registration_aad, seal_secret};
use crate::models::webhook_registration::{self, Entity as WebhookRegistration};
use crate::webhooks::CodeHostKind;

#[derive(Debug, Clone)]
pub struct WebhookRegistrationRepository {
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: Option<CryptoKey>,
}

impl WebhookRegistrationRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: Option<CryptoKey>) -> Self {
        Self { db, crypto_key }
    }

    pub async fn find_by_external_id(
        &self,
        external_id: Uuid,
    ) -> Result<Option<webhook_registration::Model>, DbErr> {
        WebhookRegistration::find()
            .filter(webhook_registration::Column::ExternalId.eq(external_id))
            .one(&*self.db)
            .await
    }

    /// Registrations for one code host, oldest first.
    pub async fn list_for_code_host(
        &self,
        kind: CodeHostKind,
        url: &str,
    ) -> Result<Vec<webhook_registration::Model>, DbErr> {
        WebhookRegistration::find()
            .filter(webhook_registration::Column::CodeHostKind.eq(kind.as_str()))
            .filter(webhook_registration::Column::CodeHostUrl.eq(url))
            .order_by_asc(webhook_registration::Column::CreatedAt)
            .all(&*self.db)
            .await
    }

    /// Registrations of one kind across all code hosts, oldest first.
    pub async fn list_by_kind(
        &self,
        kind: CodeHostKind,
    ) -> Result<Vec<webhook_registration::Model>, DbErr> {
        WebhookRegistration::find()
            .filter(webhook_registration::Column::CodeHostKind.eq(kind.as_str()))
            .order_by_asc(webhook_registration::Column::CreatedAt)
            .all(&*self.db)
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<webhook_registration::Model>, DbErr> {
        WebhookRegistration::find()
            .order_by_desc(webhook_registration::Column::CreatedAt)
            .all(&*self.db)
            .await
    }

    /// Create a registration. `url` must already be normalized.
    pub async fn create(
        &self,
        kind: CodeHostKind,
        url: &str,
        secret: Option<&str>,
    ) -> Result<webhook_registration::Model> {
        let external_id = Uuid::new_v4();
        let secret_ciphertext = secret
            .filter(|secret| !secret.is_empty())
            .map(|secret| self.seal(external_id, kind, secret))
            .transpose()
            .map_err(|e| anyhow!("secret encryption failed: {}", e))?;

        let now = Utc::now().fixed_offset();
        let model = webhook_registration::ActiveModel {
            id: Set(Uuid::new_v4()),
            external_id: Set(external_id),
            code_host_kind: Set(kind.as_str().to_string()),
            code_host_url: Set(url.to_string()),
            secret_ciphertext: Set(secret_ciphertext),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&*self.db).await?)
    }

    /// Replace (or clear) the secret of a registration.
    pub async fn rotate_secret(
        &self,
        external_id: Uuid,
        secret: Option<&str>,
    ) -> Result<Option<webhook_registration::Model>> {
        let Some(existing) = self.find_by_external_id(external_id).await? else {
            return Ok(None);
        };
        let kind = crate::webhooks::parse_code_host_kind(&existing.code_host_kind)
            .ok_or_else(|| anyhow!("unsupported code host kind {}", existing.code_host_kind))?;
        let secret_ciphertext = secret
            .filter(|secret| !secret.is_empty())
            .map(|secret| self.seal(external_id, kind, secret))
            .transpose()
            .map_err(|e| anyhow!("secret encryption failed: {}", e))?;

        let mut active: webhook_registration::ActiveModel = existing.into();
        active.secret_ciphertext = Set(secret_ciphertext);
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(Some(active.update(&*self.db).await?))
    }

    pub async fn delete(&self, external_id: Uuid) -> Result<bool, DbErr> {
        let result = WebhookRegistration::delete_many()
            .filter(webhook_registration::Column::ExternalId.eq(external_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    fn seal(
        &self,
        external_id: Uuid,
        kind: CodeHostKind,
        secret: &str,
    ) -> Result<Vec<u8>, CryptoError> {
        seal_secret(
            self.crypto_key.as_ref(),
            &registration_aad(external_id, kind.as_str()),
            secret,
        )
    }

    /// Recover the plaintext secret of a registration, if it has one.
    pub fn secret_of(
        &self,
        registration: &webhook_registration::Model,
    ) -> Result<Option<String>, CryptoError> {
        let Some(stored) = registration.secret_ciphertext.as_deref() else {
            return Ok(None);
        };
        let aad = registration_aad(registration.external_id, &registration.code_host_kind);
        open_secret(self.crypto_key.as_ref(), &aad, stored).map(Some)
    }
}
