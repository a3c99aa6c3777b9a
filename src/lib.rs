pub mod api;
pub mod config;
pub mod errors;
pub mod estimate;
pub mod isbn;
pub mod library;
pub mod logging;
pub mod payload;
pub mod query;
pub mod reports;
pub mod server;
pub mod store;
