//! Database migrations

use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

const SCHEMA_VERSION: i64 = 1;

pub fn run_all(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < SCHEMA_VERSION {
        info!(
            "running migrations from v{} to v{}",
            current_version, SCHEMA_VERSION
        );

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("applying migration v1: initial schema");

    conn.execute_batch(
        r#"
        -- Full-screen frames. Either image_path points at a JPEG
        -- (lightweight mode) or (video_chunk_id, offset_index) reference
        -- an MP4 chunk.
        CREATE TABLE IF NOT EXISTS frames (
            frame_id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            image_path TEXT NOT NULL,
            device_name TEXT,
            metadata TEXT,
            video_chunk_id INTEGER,
            offset_index INTEGER,
            monitor_id INTEGER DEFAULT 0,
            image_hash INTEGER,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (video_chunk_id) REFERENCES video_chunks(id)
        );

        -- OCR rows belong to a frame XOR a sub-frame.
        CREATE TABLE IF NOT EXISTS ocr_text (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            frame_id TEXT,
            sub_frame_id TEXT,
            text TEXT NOT NULL,
            text_json TEXT,
            ocr_engine TEXT NOT NULL,
            text_length INTEGER NOT NULL,
            confidence REAL DEFAULT 0.0,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (frame_id) REFERENCES frames(frame_id),
            FOREIGN KEY (sub_frame_id) REFERENCES sub_frames(sub_frame_id)
        );

        -- Full-screen MP4 chunks
        CREATE TABLE IF NOT EXISTS video_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            monitor_id INTEGER NOT NULL DEFAULT 0,
            device_name TEXT,
            fps REAL DEFAULT 1.0,
            frame_count INTEGER DEFAULT 0,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );

        -- Per-window MP4 chunks
        CREATE TABLE IF NOT EXISTS window_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            app_name TEXT NOT NULL,
            window_name TEXT NOT NULL,
            monitor_id INTEGER NOT NULL DEFAULT 0,
            fps REAL DEFAULT 1.0,
            frame_count INTEGER DEFAULT 0,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP
        );

        -- Per-window frames
        CREATE TABLE IF NOT EXISTS sub_frames (
            sub_frame_id TEXT PRIMARY KEY,
            window_chunk_id INTEGER,
            offset_index INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            app_name TEXT NOT NULL,
            window_name TEXT NOT NULL,
            process_id INTEGER,
            is_focused INTEGER DEFAULT 0,
            image_hash INTEGER,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (window_chunk_id) REFERENCES window_chunks(id)
        );

        -- Many-to-many frame <-> sub-frame association within a tick
        CREATE TABLE IF NOT EXISTS frame_subframe_mapping (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            frame_id TEXT NOT NULL,
            sub_frame_id TEXT NOT NULL,
            created_at TEXT DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (frame_id) REFERENCES frames(frame_id),
            FOREIGN KEY (sub_frame_id) REFERENCES sub_frames(sub_frame_id),
            UNIQUE(frame_id, sub_frame_id)
        );

        -- Indexes for common queries
        CREATE INDEX IF NOT EXISTS idx_frames_timestamp ON frames(timestamp);
        CREATE INDEX IF NOT EXISTS idx_frames_video_chunk ON frames(video_chunk_id);
        CREATE INDEX IF NOT EXISTS idx_ocr_frame_id ON ocr_text(frame_id);
        CREATE INDEX IF NOT EXISTS idx_ocr_sub_frame_id ON ocr_text(sub_frame_id);
        CREATE INDEX IF NOT EXISTS idx_sub_frames_timestamp ON sub_frames(timestamp);
        CREATE INDEX IF NOT EXISTS idx_sub_frames_window_chunk ON sub_frames(window_chunk_id);
        CREATE INDEX IF NOT EXISTS idx_sub_frames_app ON sub_frames(app_name);
        CREATE INDEX IF NOT EXISTS idx_mapping_frame ON frame_subframe_mapping(frame_id);
        CREATE INDEX IF NOT EXISTS idx_mapping_subframe ON frame_subframe_mapping(sub_frame_id);
    "#,
    )?;

    // FTS5 may be compiled out; the LIKE fallback covers search then.
    let fts = conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS ocr_text_fts
        USING fts5(text, content='ocr_text', content_rowid='id');

        -- The triggers are the only writers of ocr_text_fts.
        CREATE TRIGGER IF NOT EXISTS ocr_text_ai AFTER INSERT ON ocr_text BEGIN
            INSERT INTO ocr_text_fts(rowid, text) VALUES (new.id, new.text);
        END;

        CREATE TRIGGER IF NOT EXISTS ocr_text_ad AFTER DELETE ON ocr_text BEGIN
            INSERT INTO ocr_text_fts(ocr_text_fts, rowid, text)
            VALUES('delete', old.id, old.text);
        END;

        CREATE TRIGGER IF NOT EXISTS ocr_text_au AFTER UPDATE ON ocr_text BEGIN
            INSERT INTO ocr_text_fts(ocr_text_fts, rowid, text)
            VALUES('delete', old.id, old.text);
            INSERT INTO ocr_text_fts(rowid, text) VALUES (new.id, new.text);
        END;
    "#,
    );

    if let Err(e) = fts {
        warn!("FTS5 not available: {}, full-text search falls back to LIKE", e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
