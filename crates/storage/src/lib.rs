//! Device-state storage layer.
//!
//! Diesel-based storage for simulated devices, their installed
//! profiles, payload bookkeeping refs, and keychain items.

mod models;
mod schema;
mod sqlite;
mod traits;

pub use models::*;
pub use sqlite::SqliteStorage;
pub use traits::*;

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
