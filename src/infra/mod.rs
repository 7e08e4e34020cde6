// Infrastructure adapters implementing the application ports

pub mod calamine_reader;
pub mod sqlite_config_store;
pub mod sqlite_warehouse;

pub use calamine_reader::CalamineReader;
pub use sqlite_config_store::SqliteConfigStore;
pub use sqlite_warehouse::SqliteWarehouse;
