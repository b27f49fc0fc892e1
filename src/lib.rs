pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod server;
pub mod types;
pub mod view;

pub use database::{Database, Storage, Table};
pub use error::ApiError;
pub use types::{Method, Operation};
pub use view::{Context, Envelope, Reply, Stage, View, ViewConfig};
