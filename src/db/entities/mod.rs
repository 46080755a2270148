pub mod ingestion_config;
pub mod pdf_metadata;
pub mod sync_cursor;
