pub mod entities;
pub mod store;

pub use store::DbStore;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

pub async fn connect(database_url: &str) -> anyhow::Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new(database_url);
    opt.sqlx_logging(false);
    let db = Database::connect(opt).await?;
    tracing::info!("Connected to database");
    Ok(db)
}
