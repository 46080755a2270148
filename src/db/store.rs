use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};

use super::entities::{ingestion_config, pdf_metadata, sync_cursor};
use crate::account::{AccountConfig, ConnectionType};
use crate::error::PersistenceError;
use crate::ingest::store::{ConfigStore, CursorStore, MetadataRecorder, StoredAttachment, SyncCursor};

/// sea-orm backed implementation of every store the ingest core needs.
#[derive(Clone)]
pub struct DbStore {
    db: DatabaseConnection,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn account_from_model(model: ingestion_config::Model) -> AccountConfig {
    let connection_type = match model.connection_type.parse::<ConnectionType>() {
        Ok(t) => t,
        Err(never) => match never {},
    };

    AccountConfig {
        id: model.id,
        email_address: model.email_address,
        connection_type,
        host: model.host.filter(|h| !h.trim().is_empty()),
        port: model.port.and_then(|p| u16::try_from(p).ok()),
        tls: model.tls,
        username: model.username,
        password: model.password,
        api_token: model.api_token,
    }
}

#[async_trait]
impl ConfigStore for DbStore {
    async fn list_accounts(&self) -> Result<Vec<AccountConfig>, PersistenceError> {
        let models = ingestion_config::Entity::find()
            .filter(ingestion_config::Column::Enabled.eq(true))
            .order_by_asc(ingestion_config::Column::Id)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(account_from_model).collect())
    }
}

#[async_trait]
impl MetadataRecorder for DbStore {
    async fn record(&self, attachment: &StoredAttachment) -> Result<i32, PersistenceError> {
        let model = pdf_metadata::ActiveModel {
            account_id: Set(attachment.account_id),
            from_address: Set(attachment.from_address.clone()),
            date_received: Set(attachment.date_received),
            subject: Set(attachment.subject.clone()),
            attachment_file_name: Set(attachment.attachment_file_name.clone()),
            file_path: Set(attachment.file_path.clone()),
            content_hash: Set(attachment.content_hash.clone()),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let inserted = model.insert(&self.db).await?;
        Ok(inserted.id)
    }

    async fn contains(&self, account_id: i32, content_hash: &str) -> Result<bool, PersistenceError> {
        let count = pdf_metadata::Entity::find()
            .filter(pdf_metadata::Column::AccountId.eq(account_id))
            .filter(pdf_metadata::Column::ContentHash.eq(content_hash))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl CursorStore for DbStore {
    async fn load(&self, account_id: i32) -> Result<Option<SyncCursor>, PersistenceError> {
        let model = sync_cursor::Entity::find_by_id(account_id)
            .one(&self.db)
            .await?;

        Ok(model.map(|m| SyncCursor {
            validity: m.validity.and_then(|v| u32::try_from(v).ok()),
            position: u64::try_from(m.position).unwrap_or(0),
        }))
    }

    async fn save(&self, account_id: i32, cursor: SyncCursor) -> Result<(), PersistenceError> {
        let position = i64::try_from(cursor.position).map_err(|_| {
            PersistenceError::Database(format!("cursor position {} out of range", cursor.position))
        })?;

        let model = sync_cursor::ActiveModel {
            account_id: Set(account_id),
            validity: Set(cursor.validity.map(i64::from)),
            position: Set(position),
            updated_at: Set(Utc::now()),
        };

        sync_cursor::Entity::insert(model)
            .on_conflict(
                OnConflict::column(sync_cursor::Column::AccountId)
                    .update_columns([
                        sync_cursor::Column::Validity,
                        sync_cursor::Column::Position,
                        sync_cursor::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Migrator;
    use chrono::TimeZone;
    use sea_orm::{ConnectOptions, Database};
    use sea_orm_migration::MigratorTrait;

    async fn memory_store() -> DbStore {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        DbStore::new(db)
    }

    async fn add_account(store: &DbStore, email: &str, connection_type: &str, enabled: bool) -> i32 {
        let model = ingestion_config::ActiveModel {
            email_address: Set(email.to_string()),
            connection_type: Set(connection_type.to_string()),
            host: Set(None),
            port: Set(Some(993)),
            tls: Set(Some(true)),
            username: Set(None),
            password: Set(Some("secret".to_string())),
            api_token: Set(None),
            enabled: Set(enabled),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        model.insert(&store.db).await.unwrap().id
    }

    fn attachment(account_id: i32, hash: &str) -> StoredAttachment {
        StoredAttachment {
            file_path: format!("{}/1709539200000-abc_invoice.pdf", account_id),
            attachment_file_name: "invoice.pdf".to_string(),
            from_address: "billing@vendor.test".to_string(),
            date_received: Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap(),
            subject: "Invoice March".to_string(),
            account_id,
            content_hash: hash.to_string(),
        }
    }

    #[tokio::test]
    async fn test_list_accounts_skips_disabled() {
        let store = memory_store().await;
        let first = add_account(&store, "a@example.com", "IMAP", true).await;
        add_account(&store, "b@example.com", "IMAP", false).await;
        let third = add_account(&store, "c@example.com", "POP3", true).await;

        let accounts = store.list_accounts().await.unwrap();

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].id, first);
        assert_eq!(accounts[0].connection_type, ConnectionType::Imap);
        assert_eq!(accounts[0].port, Some(993));
        assert_eq!(accounts[1].id, third);
        assert_eq!(
            accounts[1].connection_type,
            ConnectionType::Unsupported("POP3".to_string())
        );
    }

    #[tokio::test]
    async fn test_record_and_contains() {
        let store = memory_store().await;
        let account = add_account(&store, "a@example.com", "IMAP", true).await;

        assert!(!store.contains(account, "deadbeef").await.unwrap());
        let id = store.record(&attachment(account, "deadbeef")).await.unwrap();
        assert!(id > 0);
        assert!(store.contains(account, "deadbeef").await.unwrap());

        let row = pdf_metadata::Entity::find_by_id(id)
            .one(&store.db)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.subject, "Invoice March");
        assert_eq!(row.account_id, account);
    }

    #[tokio::test]
    async fn test_duplicate_hash_rejected_per_account() {
        let store = memory_store().await;
        let a = add_account(&store, "a@example.com", "IMAP", true).await;
        let b = add_account(&store, "b@example.com", "IMAP", true).await;

        store.record(&attachment(a, "cafe")).await.unwrap();
        let err = store.record(&attachment(a, "cafe")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Duplicate(_)));

        // Same body in another account is fine.
        store.record(&attachment(b, "cafe")).await.unwrap();
    }

    #[tokio::test]
    async fn test_cursor_upsert() {
        let store = memory_store().await;
        let account = add_account(&store, "a@example.com", "IMAP", true).await;

        assert_eq!(store.load(account).await.unwrap(), None);

        let first = SyncCursor {
            validity: Some(3_000_000_000),
            position: 41,
        };
        store.save(account, first).await.unwrap();
        assert_eq!(store.load(account).await.unwrap(), Some(first));

        let second = SyncCursor {
            validity: None,
            position: 1_709_539_200_000,
        };
        store.save(account, second).await.unwrap();
        assert_eq!(store.load(account).await.unwrap(), Some(second));
    }
}
