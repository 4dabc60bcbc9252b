pub mod auth;
pub mod booking;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod schedule;
pub mod store;
pub mod wal;
