pub mod admin;
pub mod config;
pub mod error;
pub mod loader;
pub mod players;
pub mod query_builder;
pub mod record;
pub mod retry;
pub mod schema;
pub mod source;

// Re-export them for easier access from main.rs
pub use config::*;
pub use error::*;
pub use loader::*;
pub use players::*;
pub use query_builder::*;
pub use record::*;
pub use retry::*;
pub use schema::*;
pub use source::*;
