pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{CatalogSeedDataset, ProcessSeedInfo, SeedResult, VerificationResult};
pub use repositories::{InMemoryWorkflowStore, SqlCatalogRepository};
pub use store::SqlWorkflowStore;
