//! retrace-db - Persistent indexes for Retrace
//!
//! Two embedded stores: a SQLite relational database with FTS5 full-text
//! search over OCR text, and a SQLite-backed vector table with pre-filtered
//! exact nearest-neighbour search over image and text embeddings.

mod error;
mod migrations;
mod queries;
mod schema;
pub mod vector;

pub use error::DatabaseError;
pub use queries::*;
pub use schema::*;
pub use vector::{l2_normalize, VectorHit, VectorRecord, VectorStore};

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Relational store connection wrapper with schema initialization.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory database");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn run_migrations(&self) -> Result<()> {
        migrations::run_all(&self.conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_initializes_schema() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.connection().is_autocommit());
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
