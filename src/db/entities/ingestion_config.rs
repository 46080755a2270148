use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_ingestion_configs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub email_address: String,
    pub connection_type: String,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub tls: Option<bool>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text", nullable)]
    pub api_token: Option<String>,
    pub enabled: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::pdf_metadata::Entity")]
    PdfMetadata,
}

impl Related<super::pdf_metadata::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PdfMetadata.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
