//! Relational store query functions

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use tracing::{debug, warn};

use crate::schema::*;

fn to_iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ========== chunk rows ==========

pub fn insert_video_chunk(conn: &Connection, chunk: &NewVideoChunk) -> Result<i64> {
    conn.execute(
        "INSERT INTO video_chunks (file_path, monitor_id, device_name, fps) VALUES (?1, ?2, ?3, ?4)",
        params![chunk.file_path, chunk.monitor_id, chunk.device_name, chunk.fps],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_window_chunk(conn: &Connection, chunk: &NewWindowChunk) -> Result<i64> {
    conn.execute(
        r#"INSERT INTO window_chunks (file_path, app_name, window_name, monitor_id, fps)
           VALUES (?1, ?2, ?3, ?4, ?5)"#,
        params![
            chunk.file_path,
            chunk.app_name,
            chunk.window_name,
            chunk.monitor_id,
            chunk.fps
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_video_chunk_frame_count(conn: &Connection, chunk_id: i64, count: i64) -> Result<()> {
    conn.execute(
        "UPDATE video_chunks SET frame_count = ?1 WHERE id = ?2",
        params![count, chunk_id],
    )?;
    Ok(())
}

pub fn update_window_chunk_frame_count(conn: &Connection, chunk_id: i64, count: i64) -> Result<()> {
    conn.execute(
        "UPDATE window_chunks SET frame_count = ?1 WHERE id = ?2",
        params![count, chunk_id],
    )?;
    Ok(())
}

pub fn video_chunk_id_for_path(conn: &Connection, file_path: &str) -> Result<Option<i64>> {
    optional_row(conn.query_row(
        "SELECT id FROM video_chunks WHERE file_path = ?1 ORDER BY id DESC LIMIT 1",
        params![file_path],
        |row| row.get(0),
    ))
}

pub fn window_chunk_id_for_path(conn: &Connection, file_path: &str) -> Result<Option<i64>> {
    optional_row(conn.query_row(
        "SELECT id FROM window_chunks WHERE file_path = ?1 ORDER BY id DESC LIMIT 1",
        params![file_path],
        |row| row.get(0),
    ))
}

pub fn latest_video_chunk_id(conn: &Connection, monitor_id: i64) -> Result<Option<i64>> {
    optional_row(conn.query_row(
        "SELECT id FROM video_chunks WHERE monitor_id = ?1 ORDER BY id DESC LIMIT 1",
        params![monitor_id],
        |row| row.get(0),
    ))
}

pub fn latest_window_chunk_id(
    conn: &Connection,
    app_name: &str,
    window_name: &str,
) -> Result<Option<i64>> {
    optional_row(conn.query_row(
        r#"SELECT id FROM window_chunks
           WHERE app_name = ?1 AND window_name = ?2
           ORDER BY id DESC LIMIT 1"#,
        params![app_name, window_name],
        |row| row.get(0),
    ))
}

pub fn get_video_chunk(conn: &Connection, id: i64) -> Result<Option<VideoChunk>> {
    optional_row(conn.query_row(
        r#"SELECT id, file_path, monitor_id, device_name, fps, frame_count, created_at
           FROM video_chunks WHERE id = ?1"#,
        params![id],
        row_to_video_chunk,
    ))
}

pub fn get_window_chunk(conn: &Connection, id: i64) -> Result<Option<WindowChunk>> {
    optional_row(conn.query_row(
        r#"SELECT id, file_path, app_name, window_name, monitor_id, fps, frame_count, created_at
           FROM window_chunks WHERE id = ?1"#,
        params![id],
        |row| {
            Ok(WindowChunk {
                id: row.get(0)?,
                file_path: row.get(1)?,
                app_name: row.get(2)?,
                window_name: row.get(3)?,
                monitor_id: row.get(4)?,
                fps: row.get(5)?,
                frame_count: row.get(6)?,
                created_at: parse_datetime(row, 7)?,
            })
        },
    ))
}

// ========== frames and sub-frames ==========

/// Upsert a frame row; re-running with the same frame_id leaves one row.
pub fn store_frame(conn: &Connection, frame: &NewFrame) -> Result<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO frames
           (frame_id, timestamp, image_path, device_name, metadata,
            video_chunk_id, offset_index, monitor_id, image_hash)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            frame.frame_id,
            to_iso(&frame.timestamp),
            frame.image_path,
            frame.device_name,
            frame.metadata_json,
            frame.video_chunk_id,
            frame.offset_index,
            frame.monitor_id,
            frame.image_hash,
        ],
    )?;
    debug!("stored frame {}", frame.frame_id);
    Ok(())
}

/// Upsert a sub-frame row.
pub fn store_sub_frame(conn: &Connection, sub: &NewSubFrame) -> Result<()> {
    conn.execute(
        r#"INSERT OR REPLACE INTO sub_frames
           (sub_frame_id, window_chunk_id, offset_index, timestamp,
            app_name, window_name, process_id, is_focused, image_hash)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
        params![
            sub.sub_frame_id,
            sub.window_chunk_id,
            sub.offset_index,
            to_iso(&sub.timestamp),
            sub.app_name,
            sub.window_name,
            sub.process_id,
            sub.is_focused as i32,
            sub.image_hash,
        ],
    )?;
    debug!("stored sub_frame {}", sub.sub_frame_id);
    Ok(())
}

/// Insert an OCR row for a frame or a sub-frame. Empty text is skipped.
pub fn insert_ocr_text(conn: &Connection, ocr: &NewOcrText) -> Result<Option<i64>> {
    if ocr.text.is_empty() {
        return Ok(None);
    }

    let (frame_id, sub_frame_id) = match &ocr.parent {
        OcrParent::Frame(id) => (Some(id.as_str()), None),
        OcrParent::SubFrame(id) => (None, Some(id.as_str())),
    };

    conn.execute(
        r#"INSERT INTO ocr_text
           (frame_id, sub_frame_id, text, text_json, ocr_engine, text_length, confidence)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        params![
            frame_id,
            sub_frame_id,
            ocr.text,
            ocr.text_json,
            ocr.ocr_engine,
            ocr.text.chars().count() as i64,
            ocr.confidence,
        ],
    )?;
    Ok(Some(conn.last_insert_rowid()))
}

/// Insert the frame<->sub-frame mappings of one tick in one transaction.
pub fn add_frame_subframe_mappings(
    conn: &Connection,
    frame_id: &str,
    sub_frame_ids: &[String],
) -> Result<()> {
    if sub_frame_ids.is_empty() {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO frame_subframe_mapping (frame_id, sub_frame_id) VALUES (?1, ?2)",
        )?;
        for sub_frame_id in sub_frame_ids {
            stmt.execute(params![frame_id, sub_frame_id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ========== reads ==========

pub fn get_frame(conn: &Connection, frame_id: &str) -> Result<Option<FrameRecord>> {
    optional_row(conn.query_row(
        r#"SELECT frame_id, timestamp, image_path, device_name, metadata,
                  video_chunk_id, offset_index, monitor_id, image_hash
           FROM frames WHERE frame_id = ?1"#,
        params![frame_id],
        row_to_frame,
    ))
}

pub fn get_frame_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM frames", [], |row| row.get(0))?)
}

pub fn get_ocr_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM ocr_text", [], |row| row.get(0))?)
}

/// Frames referencing a given chunk; invariant: equals the chunk's
/// `frame_count` once the chunk is sealed.
pub fn count_frames_for_chunk(conn: &Connection, chunk_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM frames WHERE video_chunk_id = ?1",
        params![chunk_id],
        |row| row.get(0),
    )?)
}

/// Most recent frames with their optional OCR text, newest first.
pub fn get_recent_frames(conn: &Connection, limit: i64) -> Result<Vec<FrameWithOcr>> {
    let mut stmt = conn.prepare(
        r#"SELECT f.frame_id, f.timestamp, f.image_path, f.device_name, f.metadata,
                  o.text, o.confidence
           FROM frames f
           LEFT JOIN ocr_text o ON f.frame_id = o.frame_id
           ORDER BY f.timestamp DESC
           LIMIT ?1"#,
    )?;

    let frames = stmt
        .query_map(params![limit], row_to_frame_with_ocr)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(frames)
}

/// Frames inside `[start, end)`, oldest first.
pub fn get_frames_in_range(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<FrameWithOcr>> {
    let mut stmt = conn.prepare(
        r#"SELECT f.frame_id, f.timestamp, f.image_path, f.device_name, f.metadata,
                  o.text, o.confidence
           FROM frames f
           LEFT JOIN ocr_text o ON f.frame_id = o.frame_id
           WHERE f.timestamp >= ?1 AND f.timestamp < ?2
           ORDER BY f.timestamp ASC
           LIMIT ?3"#,
    )?;

    let frames = stmt
        .query_map(params![to_iso(&start), to_iso(&end), limit], row_to_frame_with_ocr)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(frames)
}

/// Full-text search over OCR text with an optional typed time window.
///
/// FTS5 with BM25 ordering is tried first; if the FTS query fails at
/// runtime the search falls back to a LIKE scan. The time predicate is
/// always bound as parameters, never concatenated.
pub fn search_ocr(
    conn: &Connection,
    query: &str,
    limit: i64,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<OcrSearchHit>> {
    let start_iso = start.map(|t| to_iso(&t));
    let end_iso = end.map(|t| to_iso(&t));

    let fts = try_search_ocr_fts(conn, query, limit, &start_iso, &end_iso);
    match fts {
        Ok(hits) => Ok(hits),
        Err(e) => {
            warn!("FTS search failed ({}), falling back to LIKE", e);
            search_ocr_like(conn, query, limit, &start_iso, &end_iso)
        }
    }
}

fn try_search_ocr_fts(
    conn: &Connection,
    query: &str,
    limit: i64,
    start_iso: &Option<String>,
    end_iso: &Option<String>,
) -> Result<Vec<OcrSearchHit>> {
    let mut stmt = conn.prepare(
        r#"SELECT f.frame_id, f.timestamp, f.image_path, f.device_name,
                  o.text, o.confidence, o.ocr_engine, -fts.rank
           FROM ocr_text_fts fts
           JOIN ocr_text o ON fts.rowid = o.id
           JOIN frames f ON o.frame_id = f.frame_id
           WHERE ocr_text_fts MATCH ?1
             AND (?2 IS NULL OR f.timestamp >= ?2)
             AND (?3 IS NULL OR f.timestamp <= ?3)
           ORDER BY fts.rank
           LIMIT ?4"#,
    )?;

    let hits = stmt
        .query_map(params![query, start_iso, end_iso, limit], row_to_search_hit)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(hits)
}

fn search_ocr_like(
    conn: &Connection,
    query: &str,
    limit: i64,
    start_iso: &Option<String>,
    end_iso: &Option<String>,
) -> Result<Vec<OcrSearchHit>> {
    let pattern = format!("%{}%", query);
    let mut stmt = conn.prepare(
        r#"SELECT f.frame_id, f.timestamp, f.image_path, f.device_name,
                  o.text, o.confidence, o.ocr_engine, 1.0
           FROM ocr_text o
           JOIN frames f ON o.frame_id = f.frame_id
           WHERE o.text LIKE ?1
             AND (?2 IS NULL OR f.timestamp >= ?2)
             AND (?3 IS NULL OR f.timestamp <= ?3)
           ORDER BY f.timestamp DESC
           LIMIT ?4"#,
    )?;

    let hits = stmt
        .query_map(params![pattern, start_iso, end_iso, limit], row_to_search_hit)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(hits)
}

/// Sub-frames mapped to a frame within its tick.
pub fn get_sub_frames_for_frame(conn: &Connection, frame_id: &str) -> Result<Vec<SubFrameRecord>> {
    let mut stmt = conn.prepare(
        r#"SELECT sf.sub_frame_id, sf.window_chunk_id, sf.offset_index, sf.timestamp,
                  sf.app_name, sf.window_name, sf.process_id, sf.is_focused, sf.image_hash
           FROM sub_frames sf
           JOIN frame_subframe_mapping fsm ON sf.sub_frame_id = fsm.sub_frame_id
           WHERE fsm.frame_id = ?1
           ORDER BY sf.app_name, sf.window_name"#,
    )?;

    let subs = stmt
        .query_map(params![frame_id], row_to_sub_frame)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(subs)
}

/// Chunk reference of a frame, for image extraction at query time.
pub fn get_frame_video_info(conn: &Connection, frame_id: &str) -> Result<Option<FrameVideoInfo>> {
    optional_row(conn.query_row(
        r#"SELECT f.frame_id, f.video_chunk_id, f.offset_index, vc.file_path, vc.fps, f.timestamp
           FROM frames f
           JOIN video_chunks vc ON f.video_chunk_id = vc.id
           WHERE f.frame_id = ?1"#,
        params![frame_id],
        |row| {
            Ok(FrameVideoInfo {
                frame_id: row.get(0)?,
                chunk_id: row.get(1)?,
                offset_index: row.get(2)?,
                file_path: row.get(3)?,
                fps: row.get(4)?,
                timestamp: parse_datetime(row, 5)?,
            })
        },
    ))
}

/// Chunk reference of a sub-frame.
pub fn get_sub_frame_video_info(
    conn: &Connection,
    sub_frame_id: &str,
) -> Result<Option<FrameVideoInfo>> {
    optional_row(conn.query_row(
        r#"SELECT sf.sub_frame_id, sf.window_chunk_id, sf.offset_index, wc.file_path, wc.fps, sf.timestamp
           FROM sub_frames sf
           JOIN window_chunks wc ON sf.window_chunk_id = wc.id
           WHERE sf.sub_frame_id = ?1"#,
        params![sub_frame_id],
        |row| {
            Ok(FrameVideoInfo {
                frame_id: row.get(0)?,
                chunk_id: row.get(1)?,
                offset_index: row.get(2)?,
                file_path: row.get(3)?,
                fps: row.get(4)?,
                timestamp: parse_datetime(row, 5)?,
            })
        },
    ))
}

/// Sub-frames of an application, newest first.
pub fn search_sub_frames_by_app(
    conn: &Connection,
    app_name: &str,
    limit: i64,
) -> Result<Vec<SubFrameRecord>> {
    let pattern = format!("%{}%", app_name);
    let mut stmt = conn.prepare(
        r#"SELECT sub_frame_id, window_chunk_id, offset_index, timestamp,
                  app_name, window_name, process_id, is_focused, image_hash
           FROM sub_frames
           WHERE app_name LIKE ?1
           ORDER BY timestamp DESC
           LIMIT ?2"#,
    )?;

    let subs = stmt
        .query_map(params![pattern, limit], row_to_sub_frame)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(subs)
}

pub fn get_stats(conn: &Connection) -> Result<StorageStats> {
    let count = |sql: &str| -> Result<i64> {
        Ok(conn.query_row(sql, [], |row| row.get(0))?)
    };

    Ok(StorageStats {
        total_frames: count("SELECT COUNT(*) FROM frames")?,
        total_ocr_results: count("SELECT COUNT(*) FROM ocr_text")?,
        total_text_length: count("SELECT COALESCE(SUM(text_length), 0) FROM ocr_text")?,
        total_video_chunks: count("SELECT COUNT(*) FROM video_chunks")?,
        total_window_chunks: count("SELECT COUNT(*) FROM window_chunks")?,
        total_sub_frames: count("SELECT COUNT(*) FROM sub_frames")?,
    })
}

/// Remove every row from every table (offline rebuild's clear path).
pub fn clear_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM frame_subframe_mapping;
        DELETE FROM ocr_text;
        DELETE FROM sub_frames;
        DELETE FROM frames;
        DELETE FROM window_chunks;
        DELETE FROM video_chunks;
    "#,
    )?;
    Ok(())
}

// ========== row mappers ==========

fn optional_row<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn row_to_video_chunk(row: &Row) -> rusqlite::Result<VideoChunk> {
    Ok(VideoChunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        monitor_id: row.get(2)?,
        device_name: row.get(3)?,
        fps: row.get(4)?,
        frame_count: row.get(5)?,
        created_at: parse_datetime(row, 6)?,
    })
}

fn row_to_frame(row: &Row) -> rusqlite::Result<FrameRecord> {
    Ok(FrameRecord {
        frame_id: row.get(0)?,
        timestamp: parse_datetime(row, 1)?,
        image_path: row.get(2)?,
        device_name: row.get(3)?,
        metadata_json: row.get(4)?,
        video_chunk_id: row.get(5)?,
        offset_index: row.get(6)?,
        monitor_id: row.get(7)?,
        image_hash: row.get(8)?,
    })
}

fn row_to_sub_frame(row: &Row) -> rusqlite::Result<SubFrameRecord> {
    Ok(SubFrameRecord {
        sub_frame_id: row.get(0)?,
        window_chunk_id: row.get(1)?,
        offset_index: row.get(2)?,
        timestamp: parse_datetime(row, 3)?,
        app_name: row.get(4)?,
        window_name: row.get(5)?,
        process_id: row.get(6)?,
        is_focused: row.get::<_, i64>(7)? != 0,
        image_hash: row.get(8)?,
    })
}

fn row_to_frame_with_ocr(row: &Row) -> rusqlite::Result<FrameWithOcr> {
    Ok(FrameWithOcr {
        frame_id: row.get(0)?,
        timestamp: parse_datetime(row, 1)?,
        image_path: row.get(2)?,
        device_name: row.get(3)?,
        metadata_json: row.get(4)?,
        ocr_text: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        ocr_confidence: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
    })
}

fn row_to_search_hit(row: &Row) -> rusqlite::Result<OcrSearchHit> {
    Ok(OcrSearchHit {
        frame_id: row.get(0)?,
        timestamp: parse_datetime(row, 1)?,
        image_path: row.get(2)?,
        device_name: row.get(3)?,
        text: row.get(4)?,
        confidence: row.get::<_, Option<f64>>(5)?.unwrap_or(0.0),
        ocr_engine: row.get(6)?,
        score: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::TimeZone;

    fn new_frame(frame_id: &str, ts: DateTime<Utc>) -> NewFrame {
        NewFrame {
            frame_id: frame_id.to_string(),
            timestamp: ts,
            image_path: format!("images/{}.jpg", frame_id),
            device_name: Some("monitor_0".to_string()),
            metadata_json: None,
            video_chunk_id: None,
            offset_index: None,
            monitor_id: 0,
            image_hash: Some(42),
        }
    }

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn chunk_roundtrip_and_frame_count_invariant() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let chunk_id = insert_video_chunk(
            conn,
            &NewVideoChunk {
                file_path: "video_chunks/screens/monitor_0/a.mp4".to_string(),
                monitor_id: 0,
                device_name: Some("monitor_0".to_string()),
                fps: 1.0,
            },
        )
        .unwrap();

        for (i, id) in ["20260701_120000_000001", "20260701_120001_000001"].iter().enumerate() {
            let mut frame = new_frame(id, ts(i as u32));
            frame.video_chunk_id = Some(chunk_id);
            frame.offset_index = Some(i as i64);
            store_frame(conn, &frame).unwrap();
        }

        update_video_chunk_frame_count(conn, chunk_id, 2).unwrap();

        let chunk = get_video_chunk(conn, chunk_id).unwrap().unwrap();
        assert_eq!(chunk.frame_count, 2);
        assert_eq!(count_frames_for_chunk(conn, chunk_id).unwrap(), chunk.frame_count);
    }

    #[test]
    fn frame_upsert_keeps_single_row() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let frame = new_frame("20260701_120000_000001", ts(0));
        store_frame(conn, &frame).unwrap();
        store_frame(conn, &frame).unwrap();

        assert_eq!(get_frame_count(conn).unwrap(), 1);
    }

    #[test]
    fn ocr_insert_skips_empty_text() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        store_frame(conn, &new_frame("f1", ts(0))).unwrap();

        let inserted = insert_ocr_text(
            conn,
            &NewOcrText {
                parent: OcrParent::Frame("f1".to_string()),
                text: String::new(),
                text_json: None,
                ocr_engine: "tesseract".to_string(),
                confidence: 0.0,
            },
        )
        .unwrap();
        assert!(inserted.is_none());
        assert_eq!(get_ocr_count(conn).unwrap(), 0);
    }

    #[test]
    fn fts_search_ranks_matching_row_first() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        let texts = [
            ("f1", "error: connection timeout"),
            ("f2", "python pandas dataframe"),
            ("f3", "machine learning tutorial"),
        ];
        for (i, (id, text)) in texts.iter().enumerate() {
            store_frame(conn, &new_frame(id, ts(i as u32))).unwrap();
            insert_ocr_text(
                conn,
                &NewOcrText {
                    parent: OcrParent::Frame(id.to_string()),
                    text: text.to_string(),
                    text_json: None,
                    ocr_engine: "tesseract".to_string(),
                    confidence: 0.9,
                },
            )
            .unwrap();
        }

        let hits = search_ocr(conn, "timeout", 10, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].frame_id, "f1");
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn search_respects_time_window() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        for (i, id) in ["f1", "f2"].iter().enumerate() {
            store_frame(conn, &new_frame(id, ts(i as u32 * 10))).unwrap();
            insert_ocr_text(
                conn,
                &NewOcrText {
                    parent: OcrParent::Frame(id.to_string()),
                    text: "shared keyword".to_string(),
                    text_json: None,
                    ocr_engine: "tesseract".to_string(),
                    confidence: 0.9,
                },
            )
            .unwrap();
        }

        // Window that only contains f1
        let hits = search_ocr(conn, "keyword", 10, Some(ts(0)), Some(ts(5))).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].frame_id, "f1");
    }

    #[test]
    fn empty_database_search_returns_empty() {
        let db = Database::open_in_memory().unwrap();
        let hits = search_ocr(db.connection(), "anything", 10, None, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn mapping_batch_is_unique_per_pair() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        store_frame(conn, &new_frame("f1", ts(0))).unwrap();
        store_sub_frame(
            conn,
            &NewSubFrame {
                sub_frame_id: "s1".to_string(),
                window_chunk_id: None,
                offset_index: 0,
                timestamp: ts(0),
                app_name: "editor".to_string(),
                window_name: "main.rs".to_string(),
                process_id: 7,
                is_focused: true,
                image_hash: None,
            },
        )
        .unwrap();

        let subs = vec!["s1".to_string()];
        add_frame_subframe_mappings(conn, "f1", &subs).unwrap();
        add_frame_subframe_mappings(conn, "f1", &subs).unwrap();

        let mapped = get_sub_frames_for_frame(conn, "f1").unwrap();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].sub_frame_id, "s1");
        assert!(mapped[0].is_focused);
    }

    #[test]
    fn recent_frames_left_join_tolerates_missing_ocr() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        store_frame(conn, &new_frame("f1", ts(0))).unwrap();
        let frames = get_recent_frames(conn, 10).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].ocr_text, "");
    }

    #[test]
    fn frames_in_range_is_inclusive_exclusive() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        for (i, id) in ["f1", "f2", "f3"].iter().enumerate() {
            store_frame(conn, &new_frame(id, ts(i as u32 * 10))).unwrap();
        }

        let frames = get_frames_in_range(conn, ts(0), ts(20), 100).unwrap();
        let ids: Vec<&str> = frames.iter().map(|f| f.frame_id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2"]);
    }

    #[test]
    fn clear_all_empties_every_table() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();

        store_frame(conn, &new_frame("f1", ts(0))).unwrap();
        insert_video_chunk(
            conn,
            &NewVideoChunk {
                file_path: "a.mp4".to_string(),
                monitor_id: 0,
                device_name: None,
                fps: 1.0,
            },
        )
        .unwrap();

        clear_all(conn).unwrap();
        let stats = get_stats(conn).unwrap();
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.total_video_chunks, 0);
    }
}
