use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(Migration001CreateTables)]
    }
}

pub struct Migration001CreateTables;

impl MigrationName for Migration001CreateTables {
    fn name(&self) -> &str {
        "m001_create_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration001CreateTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // email_ingestion_configs table
        manager
            .create_table(
                Table::create()
                    .table(EmailIngestionConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailIngestionConfigs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EmailIngestionConfigs::EmailAddress)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EmailIngestionConfigs::ConnectionType)
                            .string_len(50)
                            .not_null()
                            .default("IMAP"),
                    )
                    .col(ColumnDef::new(EmailIngestionConfigs::Host).string_len(255).null())
                    .col(ColumnDef::new(EmailIngestionConfigs::Port).integer().null())
                    .col(ColumnDef::new(EmailIngestionConfigs::Tls).boolean().null())
                    .col(ColumnDef::new(EmailIngestionConfigs::Username).string_len(255).null())
                    .col(ColumnDef::new(EmailIngestionConfigs::Password).text().null())
                    .col(ColumnDef::new(EmailIngestionConfigs::ApiToken).text().null())
                    .col(
                        ColumnDef::new(EmailIngestionConfigs::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(EmailIngestionConfigs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // pdf_metadata table
        manager
            .create_table(
                Table::create()
                    .table(PdfMetadata::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PdfMetadata::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PdfMetadata::AccountId).integer().not_null())
                    .col(ColumnDef::new(PdfMetadata::FromAddress).string_len(512).not_null())
                    .col(
                        ColumnDef::new(PdfMetadata::DateReceived)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PdfMetadata::Subject).text().not_null())
                    .col(
                        ColumnDef::new(PdfMetadata::AttachmentFileName)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PdfMetadata::FilePath).text().not_null())
                    .col(ColumnDef::new(PdfMetadata::ContentHash).string_len(64).not_null())
                    .col(
                        ColumnDef::new(PdfMetadata::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(PdfMetadata::Table, PdfMetadata::AccountId)
                            .to(EmailIngestionConfigs::Table, EmailIngestionConfigs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One record per distinct attachment body and account
        manager
            .create_index(
                Index::create()
                    .name("idx_pdf_metadata_account_hash")
                    .table(PdfMetadata::Table)
                    .col(PdfMetadata::AccountId)
                    .col(PdfMetadata::ContentHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // sync_cursors table
        manager
            .create_table(
                Table::create()
                    .table(SyncCursors::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncCursors::AccountId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncCursors::Validity).big_integer().null())
                    .col(ColumnDef::new(SyncCursors::Position).big_integer().not_null())
                    .col(
                        ColumnDef::new(SyncCursors::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(SyncCursors::Table, SyncCursors::AccountId)
                            .to(EmailIngestionConfigs::Table, EmailIngestionConfigs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncCursors::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PdfMetadata::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmailIngestionConfigs::Table).to_owned())
            .await?;
        Ok(())
    }
}

// ========== Table identifiers ==========

#[derive(Iden)]
enum EmailIngestionConfigs {
    Table,
    Id,
    EmailAddress,
    ConnectionType,
    Host,
    Port,
    Tls,
    Username,
    Password,
    ApiToken,
    Enabled,
    CreatedAt,
}

#[derive(Iden)]
enum PdfMetadata {
    Table,
    Id,
    AccountId,
    FromAddress,
    DateReceived,
    Subject,
    AttachmentFileName,
    FilePath,
    ContentHash,
    CreatedAt,
}

#[derive(Iden)]
enum SyncCursors {
    Table,
    AccountId,
    Validity,
    Position,
    UpdatedAt,
}
