pub mod file_store;
pub mod filter;
pub mod hasher;
pub mod orchestrator;
pub mod store;
pub mod synchronizer;

pub use file_store::FileStore;
pub use orchestrator::IngestionOrchestrator;
pub use synchronizer::AccountSynchronizer;
