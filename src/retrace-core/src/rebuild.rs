//! Offline index rebuild
//!
//! Scans a directory tree of images and reconstructs the relational
//! store, the image vector store and the OCR-text vector store from
//! scratch. Given the same tree and fixed models, two runs produce
//! equivalent stores. Per-image errors are logged and skipped.

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use retrace_db::{Database, NewFrame, NewOcrText, OcrParent, VectorRecord, VectorStore};
use retrace_ocr::OcrEngine;
use retrace_retrieval::Encoder;

use crate::frame_id::parse_frame_id;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Rebuild parameters
#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub image_dir: PathBuf,
    pub clear_existing: bool,
    pub with_ocr: bool,
    pub batch_size: usize,
    /// Vector-store optimize cadence, in batches
    pub cleanup_interval: usize,
}

impl RebuildOptions {
    pub fn new(image_dir: PathBuf) -> Self {
        Self {
            image_dir,
            clear_existing: true,
            with_ocr: false,
            batch_size: 32,
            cleanup_interval: 50,
        }
    }
}

/// What a rebuild run did
#[derive(Debug, Default, Clone)]
pub struct RebuildReport {
    pub images_found: usize,
    pub frames_indexed: usize,
    pub ocr_rows: usize,
    pub text_vectors: usize,
    pub errors: usize,
}

/// Rebuild all three indexes from a directory tree of images.
pub async fn rebuild_index(
    db: &Database,
    vector_store: &VectorStore,
    text_vector_store: &VectorStore,
    encoder: &Encoder,
    ocr_engine: &OcrEngine,
    options: &RebuildOptions,
) -> Result<RebuildReport> {
    let mut report = RebuildReport::default();

    if options.clear_existing {
        info!("clearing existing index state");
        retrace_db::clear_all(db.connection())?;
        vector_store.clear()?;
        text_vector_store.clear()?;
    }

    let images = collect_images(&options.image_dir);
    report.images_found = images.len();
    info!("found {} image(s) under {:?}", images.len(), options.image_dir);

    let mut vector_batch: Vec<VectorRecord> = Vec::with_capacity(options.batch_size);
    let mut text_batch: Vec<VectorRecord> = Vec::with_capacity(options.batch_size);
    let mut batches_done = 0usize;

    for image_path in &images {
        match index_one(
            db,
            encoder,
            ocr_engine,
            options.with_ocr,
            image_path,
        )
        .await
        {
            Ok(Indexed {
                record,
                text_record,
                had_ocr,
            }) => {
                report.frames_indexed += 1;
                if had_ocr {
                    report.ocr_rows += 1;
                }
                vector_batch.push(record);
                if let Some(text_record) = text_record {
                    report.text_vectors += 1;
                    text_batch.push(text_record);
                }
            }
            Err(e) => {
                warn!("skipping {:?}: {}", image_path, e);
                report.errors += 1;
                continue;
            }
        }

        if vector_batch.len() >= options.batch_size {
            vector_store.store_frames_batch(&vector_batch)?;
            vector_batch.clear();
            text_vector_store.store_ocr_batch(&text_batch)?;
            text_batch.clear();

            batches_done += 1;
            if options.cleanup_interval > 0 && batches_done % options.cleanup_interval == 0 {
                if let Err(e) = vector_store.optimize() {
                    warn!("vector store optimize failed: {}", e);
                }
            }
        }
    }

    vector_store.store_frames_batch(&vector_batch)?;
    text_vector_store.store_ocr_batch(&text_batch)?;

    info!(
        "rebuild complete: {} indexed, {} ocr rows, {} text vectors, {} error(s)",
        report.frames_indexed, report.ocr_rows, report.text_vectors, report.errors
    );
    Ok(report)
}

struct Indexed {
    record: VectorRecord,
    text_record: Option<VectorRecord>,
    had_ocr: bool,
}

async fn index_one(
    db: &Database,
    encoder: &Encoder,
    ocr_engine: &OcrEngine,
    with_ocr: bool,
    image_path: &Path,
) -> Result<Indexed> {
    let image = image::open(image_path)?;
    let (frame_id, timestamp) = metadata_from_path(image_path);
    let path_str = image_path.to_string_lossy().to_string();

    retrace_db::store_frame(
        db.connection(),
        &NewFrame {
            frame_id: frame_id.clone(),
            timestamp,
            image_path: path_str.clone(),
            device_name: None,
            metadata_json: None,
            video_chunk_id: None,
            offset_index: None,
            monitor_id: 0,
            image_hash: None,
        },
    )?;

    let mut ocr_text = String::new();
    let mut had_ocr = false;
    if with_ocr {
        match ocr_engine.recognize(&image).await {
            Ok(output) if !output.text.is_empty() => {
                let text_json = output.text_json().ok();
                retrace_db::insert_ocr_text(
                    db.connection(),
                    &NewOcrText {
                        parent: OcrParent::Frame(frame_id.clone()),
                        text: output.text.clone(),
                        text_json,
                        ocr_engine: output.engine.clone(),
                        confidence: output.confidence as f64,
                    },
                )?;
                ocr_text = output.text;
                had_ocr = true;
            }
            Ok(_) => {}
            Err(e) => warn!("OCR failed for {:?}: {}", image_path, e),
        }
    }

    let vector = encoder
        .encode_image(&image)
        .await
        .map_err(|e| anyhow::anyhow!("image embedding failed: {e}"))?;
    let record = VectorRecord {
        frame_id: frame_id.clone(),
        timestamp,
        image_path: path_str.clone(),
        vector,
        ocr_text: ocr_text.clone(),
        metadata: String::new(),
    };

    let text_record = if !ocr_text.trim().is_empty() {
        let text_vector = encoder
            .encode_text(&ocr_text)
            .await
            .map_err(|e| anyhow::anyhow!("text embedding failed: {e}"))?;
        Some(VectorRecord {
            frame_id,
            timestamp,
            image_path: path_str,
            vector: text_vector,
            ocr_text,
            metadata: String::new(),
        })
    } else {
        None
    };

    Ok(Indexed {
        record,
        text_record,
        had_ocr,
    })
}

fn collect_images(image_dir: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(image_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    images.sort();
    images
}

/// Derive `(frame_id, timestamp)` from an image path.
///
/// The canonical stem `YYYYMMDD_HHMMSS_ffffff` carries the timestamp;
/// legacy millisecond stems are accepted; anything else falls back to the
/// file's mtime.
fn metadata_from_path(image_path: &Path) -> (String, DateTime<Utc>) {
    let stem = image_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    if let Some(timestamp) = parse_frame_id(&stem) {
        return (stem, timestamp);
    }

    let mtime = std::fs::metadata(image_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| {
            Utc.timestamp_opt(d.as_secs() as i64, d.subsec_nanos())
                .single()
                .unwrap_or_else(Utc::now)
        })
        .unwrap_or_else(Utc::now);
    (stem, mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use retrace_retrieval::HashingEncoder;

    fn write_image(dir: &Path, name: &str, shade: u8) -> PathBuf {
        let path = dir.join(name);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([shade, shade, shade])));
        img.save_with_format(&path, image::ImageFormat::Png).unwrap();
        path
    }

    fn fixtures() -> (Database, VectorStore, VectorStore, Encoder, OcrEngine) {
        (
            Database::open_in_memory().unwrap(),
            VectorStore::open_in_memory(32).unwrap(),
            VectorStore::open_in_memory(32).unwrap(),
            Encoder::Hashing(HashingEncoder::new(32)),
            OcrEngine::from_config("disabled", None, None).unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rebuild_indexes_every_image() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "20260701_100000_000000.png", 10);
        write_image(dir.path(), "20260701_100001_000000.png", 200);
        write_image(dir.path(), "notes.txt.bak", 0); // ignored: no image extension

        let (db, vectors, text_vectors, encoder, ocr) = fixtures();
        let options = RebuildOptions::new(dir.path().to_path_buf());

        let report = rebuild_index(&db, &vectors, &text_vectors, &encoder, &ocr, &options)
            .await
            .unwrap();

        assert_eq!(report.images_found, 2);
        assert_eq!(report.frames_indexed, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(retrace_db::get_frame_count(db.connection()).unwrap(), 2);
        assert_eq!(vectors.count_rows().unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rebuild_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "20260701_100000_000000.png", 64);

        let (db, vectors, text_vectors, encoder, ocr) = fixtures();
        let options = RebuildOptions::new(dir.path().to_path_buf());

        rebuild_index(&db, &vectors, &text_vectors, &encoder, &ocr, &options)
            .await
            .unwrap();
        rebuild_index(&db, &vectors, &text_vectors, &encoder, &ocr, &options)
            .await
            .unwrap();

        assert_eq!(retrace_db::get_frame_count(db.connection()).unwrap(), 1);
        assert_eq!(vectors.count_rows().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn canonical_stems_carry_their_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        write_image(dir.path(), "20260701_130438_750984.png", 32);

        let (db, vectors, text_vectors, encoder, ocr) = fixtures();
        let options = RebuildOptions::new(dir.path().to_path_buf());
        rebuild_index(&db, &vectors, &text_vectors, &encoder, &ocr, &options)
            .await
            .unwrap();

        let frame = retrace_db::get_frame(db.connection(), "20260701_130438_750984")
            .unwrap()
            .unwrap();
        assert_eq!(
            frame.timestamp,
            Utc.with_ymd_and_hms(2026, 7, 1, 13, 4, 38).unwrap()
                + chrono::Duration::microseconds(750_984)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn corrupt_image_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not an image").unwrap();
        write_image(dir.path(), "20260701_100000_000000.png", 50);

        let (db, vectors, text_vectors, encoder, ocr) = fixtures();
        let options = RebuildOptions::new(dir.path().to_path_buf());
        let report = rebuild_index(&db, &vectors, &text_vectors, &encoder, &ocr, &options)
            .await
            .unwrap();

        assert_eq!(report.frames_indexed, 1);
        assert_eq!(report.errors, 1);
    }
}
