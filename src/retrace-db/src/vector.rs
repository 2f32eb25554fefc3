//! Embedded vector store
//!
//! A fixed-dimension vector table over SQLite: one database file holding an
//! image-embedding table (`frames`) and an OCR-text-embedding table
//! (`ocr_text`). Search applies the optional time window as a SQL
//! pre-filter and ranks the surviving rows by exact cosine distance, so
//! `search(q, k, [s, e])` equals the window-restriction of an unbounded
//! search rather than a post-filter of a truncated top-k.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;

const FRAMES_TABLE: &str = "frames";
const OCR_TABLE: &str = "ocr_text";

/// One row to append: vectors must be L2-normalized by the writer.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub vector: Vec<f32>,
    pub ocr_text: String,
    pub metadata: String,
}

/// One search result; `distance` = 1 - cosine similarity, smaller is
/// more similar.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    pub distance: f64,
    pub ocr_text: String,
    pub metadata: String,
}

/// Vector store handle, one per database file.
pub struct VectorStore {
    conn: Connection,
    dim: usize,
}

impl VectorStore {
    pub fn open(path: impl AsRef<Path>, dim: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("opening vector store at {:?} (dim={})", path, dim);

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let store = Self { conn, dim };
        store.create_tables()?;
        Ok(store)
    }

    pub fn open_in_memory(dim: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn, dim };
        store.create_tables()?;
        Ok(store)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn create_tables(&self) -> Result<()> {
        for table in [FRAMES_TABLE, OCR_TABLE] {
            self.conn.execute_batch(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    frame_id TEXT PRIMARY KEY,
                    timestamp TEXT NOT NULL,
                    image_path TEXT NOT NULL,
                    vector BLOB NOT NULL,
                    ocr_text TEXT DEFAULT '',
                    metadata TEXT DEFAULT ''
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_timestamp ON {table}(timestamp);
            "#
            ))?;
        }
        Ok(())
    }

    fn check_dim(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(DatabaseError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            }
            .into());
        }
        Ok(())
    }

    fn upsert(&self, table: &str, record: &VectorRecord) -> Result<()> {
        self.check_dim(&record.vector)?;
        self.conn.execute(
            &format!(
                r#"INSERT OR REPLACE INTO {table}
                   (frame_id, timestamp, image_path, vector, ocr_text, metadata)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#
            ),
            params![
                record.frame_id,
                record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                record.image_path,
                vector_to_blob(&record.vector),
                record.ocr_text,
                record.metadata,
            ],
        )?;
        Ok(())
    }

    /// Upsert a single image-embedding row. Prefer [`store_frames_batch`].
    pub fn store_frame(&self, record: &VectorRecord) -> Result<()> {
        self.upsert(FRAMES_TABLE, record)?;
        debug!("stored vector for frame {}", record.frame_id);
        Ok(())
    }

    /// Upsert a batch of image-embedding rows in one transaction.
    pub fn store_frames_batch(&self, records: &[VectorRecord]) -> Result<()> {
        self.store_batch(FRAMES_TABLE, records)
    }

    /// Upsert an OCR-text embedding. Empty text is skipped.
    pub fn store_ocr_embedding(&self, record: &VectorRecord) -> Result<bool> {
        if record.ocr_text.trim().is_empty() {
            debug!("skipping empty OCR text for frame {}", record.frame_id);
            return Ok(false);
        }
        self.upsert(OCR_TABLE, record)?;
        Ok(true)
    }

    pub fn store_ocr_batch(&self, records: &[VectorRecord]) -> Result<()> {
        let non_empty: Vec<VectorRecord> = records
            .iter()
            .filter(|r| !r.ocr_text.trim().is_empty())
            .cloned()
            .collect();
        self.store_batch(OCR_TABLE, &non_empty)
    }

    fn store_batch(&self, table: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            self.check_dim(&record.vector)?;
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(&format!(
                r#"INSERT OR REPLACE INTO {table}
                   (frame_id, timestamp, image_path, vector, ocr_text, metadata)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#
            ))?;
            for record in records {
                stmt.execute(params![
                    record.frame_id,
                    record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                    record.image_path,
                    vector_to_blob(&record.vector),
                    record.ocr_text,
                    record.metadata,
                ])?;
            }
        }
        tx.commit()?;
        debug!("batch stored {} vector row(s) into {}", records.len(), table);
        Ok(())
    }

    /// Nearest-neighbour search over image embeddings with an optional
    /// time window pushed into the scan as a pre-filter.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<VectorHit>> {
        self.search_table(FRAMES_TABLE, query, top_k, start, end)
    }

    /// Nearest-neighbour search over OCR-text embeddings.
    pub fn search_ocr(
        &self,
        query: &[f32],
        top_k: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<VectorHit>> {
        self.search_table(OCR_TABLE, query, top_k, start, end)
    }

    fn search_table(
        &self,
        table: &str,
        query: &[f32],
        top_k: usize,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<VectorHit>> {
        self.check_dim(query)?;

        let mut query_vec = query.to_vec();
        l2_normalize(&mut query_vec);

        let start_iso = start.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true));
        let end_iso = end.map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true));

        let mut stmt = self.conn.prepare_cached(&format!(
            r#"SELECT frame_id, timestamp, image_path, vector, ocr_text, metadata
               FROM {table}
               WHERE (?1 IS NULL OR timestamp >= ?1)
                 AND (?2 IS NULL OR timestamp <= ?2)"#
        ))?;

        let mut hits: Vec<VectorHit> = Vec::new();
        let mut rows = stmt.query(params![start_iso, end_iso])?;
        while let Some(row) = rows.next()? {
            let frame_id: String = row.get(0)?;
            let ts_str: String = row.get(1)?;
            let image_path: String = row.get(2)?;
            let blob: Vec<u8> = row.get(3)?;
            let ocr_text: String = row.get(4)?;
            let metadata: String = row.get(5)?;

            let timestamp = match DateTime::parse_from_rfc3339(&ts_str) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => {
                    warn!("skipping row {} with bad timestamp: {}", frame_id, e);
                    continue;
                }
            };

            let vector = blob_to_vector(&blob);
            if vector.len() != self.dim {
                warn!("skipping row {} with bad vector length {}", frame_id, vector.len());
                continue;
            }

            let similarity: f64 = query_vec
                .iter()
                .zip(vector.iter())
                .map(|(a, b)| (*a as f64) * (*b as f64))
                .sum();

            hits.push(VectorHit {
                frame_id,
                timestamp,
                image_path,
                distance: 1.0 - similarity,
                ocr_text,
                metadata,
            });
        }

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    pub fn count_rows(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {FRAMES_TABLE}"), [], |r| r.get(0))?)
    }

    pub fn count_ocr_rows(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {OCR_TABLE}"), [], |r| r.get(0))?)
    }

    /// Compact the store: checkpoint the WAL and vacuum the file. Called
    /// periodically by the ingest pipeline and the offline rebuilder.
    pub fn optimize(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .unwrap_or_else(|e| debug!("wal checkpoint skipped: {}", e));
        self.conn.execute_batch("VACUUM;")?;
        info!("vector store optimized");
        Ok(())
    }

    /// Remove every row from both tables.
    pub fn clear(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "DELETE FROM {FRAMES_TABLE}; DELETE FROM {OCR_TABLE};"
        ))?;
        Ok(())
    }
}

/// Normalize a vector to unit L2 norm in place. Zero vectors are left
/// untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const DIM: usize = 8;

    fn ts(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, secs).unwrap()
    }

    fn unit(direction: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[direction % DIM] = 1.0;
        v
    }

    fn record(frame_id: &str, secs: u32, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            frame_id: frame_id.to_string(),
            timestamp: ts(secs),
            image_path: format!("images/{}.jpg", frame_id),
            vector,
            ocr_text: String::new(),
            metadata: String::new(),
        }
    }

    #[test]
    fn blob_roundtrip_preserves_vector() {
        let v = vec![0.25f32, -1.5, 3.0, 0.0];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
    }

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0f32, 4.0, 0.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn empty_store_search_returns_empty() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        let hits = store.search(&unit(0), 5, None, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_orders_by_cosine_distance() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        store.store_frame(&record("exact", 0, unit(0))).unwrap();
        store.store_frame(&record("orthogonal", 1, unit(1))).unwrap();

        let mut nearby = unit(0);
        nearby[1] = 0.3;
        l2_normalize(&mut nearby);
        store.store_frame(&record("close", 2, nearby)).unwrap();

        let hits = store.search(&unit(0), 3, None, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.frame_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close", "orthogonal"]);
        assert!(hits[0].distance < 1e-6);
    }

    #[test]
    fn upsert_keeps_single_row_per_frame_id() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        store.store_frame(&record("f1", 0, unit(0))).unwrap();
        store.store_frame(&record("f1", 1, unit(1))).unwrap();
        assert_eq!(store.count_rows().unwrap(), 1);

        // The surviving row carries the newest vector
        let hits = store.search(&unit(1), 1, None, None).unwrap();
        assert_eq!(hits[0].frame_id, "f1");
        assert!(hits[0].distance < 1e-6);
    }

    #[test]
    fn batch_store_is_equivalent_to_single_stores() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        let records: Vec<VectorRecord> =
            (0..5).map(|i| record(&format!("f{}", i), i, unit(i as usize))).collect();
        store.store_frames_batch(&records).unwrap();
        assert_eq!(store.count_rows().unwrap(), 5);
    }

    #[test]
    fn prefilter_equals_filter_of_unbounded_search() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        for i in 0..6u32 {
            let mut v = unit(0);
            v[1] = i as f32 * 0.1;
            l2_normalize(&mut v);
            store.store_frame(&record(&format!("f{}", i), i * 10, v)).unwrap();
        }

        let window = (Some(ts(10)), Some(ts(40)));
        let filtered = store.search(&unit(0), 100, window.0, window.1).unwrap();

        let unbounded = store.search(&unit(0), 100, None, None).unwrap();
        let manually: Vec<&VectorHit> = unbounded
            .iter()
            .filter(|h| h.timestamp >= ts(10) && h.timestamp <= ts(40))
            .collect();

        assert_eq!(filtered.len(), manually.len());
        for (a, b) in filtered.iter().zip(manually.iter()) {
            assert_eq!(a.frame_id, b.frame_id);
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        let bad = record("f1", 0, vec![1.0; DIM + 1]);
        assert!(store.store_frame(&bad).is_err());
        assert!(store.search(&[1.0; 3], 5, None, None).is_err());
    }

    #[test]
    fn ocr_embeddings_skip_empty_text() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        let mut rec = record("f1", 0, unit(0));
        assert!(!store.store_ocr_embedding(&rec).unwrap());

        rec.ocr_text = "found text".to_string();
        assert!(store.store_ocr_embedding(&rec).unwrap());
        assert_eq!(store.count_ocr_rows().unwrap(), 1);
    }
}
