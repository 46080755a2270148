use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pdf_metadata")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub account_id: i32,
    pub from_address: String,
    pub date_received: chrono::DateTime<chrono::Utc>,
    pub subject: String,
    pub attachment_file_name: String,
    #[sea_orm(column_type = "Text")]
    pub file_path: String,
    pub content_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::ingestion_config::Entity",
        from = "Column::AccountId",
        to = "super::ingestion_config::Column::Id"
    )]
    IngestionConfig,
}

impl Related<super::ingestion_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::IngestionConfig.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
