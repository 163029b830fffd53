pub mod config;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod monitor;
pub mod observability;
pub mod promoter;
pub mod store;
pub mod wal;
