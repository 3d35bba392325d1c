//! Database layer
//!
//! SQLite access for Coursely: the connection pool, embedded migrations,
//! and one repository per aggregate.
//!
//! # Usage
//!
//! ```ignore
//! use coursely::config::DatabaseConfig;
//! use coursely::db::{create_pool, migrations};
//!
//! let db = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&db).await?;
//! db.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, Database};
