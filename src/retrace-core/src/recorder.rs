//! Recording coordinator
//!
//! Drives the per-tick pipeline: capture, per-stream frame-difference
//! checks, chunk encoding, metadata writes, OCR enqueue and embedding
//! batches. All per-frame errors are tolerated; the loop stays live.

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use retrace_capture::{FrameSource, ScreenObject, WindowFrame};
use retrace_db::{Database, NewFrame, NewSubFrame, NewVideoChunk, NewWindowChunk, VectorRecord, VectorStore};
use retrace_ocr::{OcrEngine, OcrTask, OcrTaskTarget, OcrWorker, OcrWorkerHandle};
use retrace_processing::encoder::{ChunkClosedCallback, ChunkCreatedCallback, ChunkStreamType};
use retrace_processing::{FrameDiffEngine, VideoChunkManager};
use retrace_retrieval::Encoder;

use crate::config::{Config, StorageMode};
use crate::frame_id;
use crate::storage_paths;

/// Embedding rows buffered before one batched vector-store write
const VECTOR_BATCH_SIZE: usize = 32;
/// Batches between vector-store optimize passes
const OPTIMIZE_EVERY_N_BATCHES: usize = 50;
/// Capture failures on a stream before the source is rebuilt
const MAX_CONSECUTIVE_CAPTURE_ERRORS: u32 = 10;

/// Recording configuration for one session
#[derive(Debug, Clone)]
pub struct RecordingConfig {
    pub storage_root: PathBuf,
    pub monitor_id: u32,
    pub fps: f64,
    pub chunk_duration_secs: u64,
    pub capture_windows: bool,
    pub capture_unfocused_windows: bool,
    pub screen_diff_threshold: f64,
    pub window_diff_threshold: f64,
    pub run_ocr: bool,
    pub run_embedding: bool,
    /// Whether accepted frames are piped into MP4 chunks
    pub chunked: bool,
    pub max_image_width: u32,
    pub image_quality: u8,
    pub ocr_db_path: PathBuf,
    pub vector_db_path: PathBuf,
    pub images_root: PathBuf,
    pub embedding_dim: usize,
}

impl RecordingConfig {
    pub fn from_config(config: &Config, monitor_id: u32) -> Self {
        Self {
            storage_root: config.storage_root.clone(),
            monitor_id,
            fps: config.fps,
            chunk_duration_secs: config.chunk_duration_secs,
            capture_windows: config.capture_windows,
            capture_unfocused_windows: config.capture_unfocused_windows,
            screen_diff_threshold: config.screen_diff_threshold,
            window_diff_threshold: config.window_diff_threshold,
            run_ocr: config.enable_ocr,
            run_embedding: config.storage_mode == StorageMode::Vector,
            chunked: config.storage_mode == StorageMode::Vector,
            max_image_width: config.max_image_width,
            image_quality: config.image_quality,
            ocr_db_path: config.ocr_db_path.clone(),
            vector_db_path: config.vector_db_path.clone(),
            images_root: config.image_storage_path.clone(),
            embedding_dim: config.embedding_dim,
        }
    }
}

/// Session counters, emitted periodically and at shutdown.
#[derive(Debug, Clone)]
pub struct RecordingStats {
    pub frames_captured: u64,
    pub frames_stored: u64,
    pub windows_captured: u64,
    pub windows_stored: u64,
    pub embeddings_generated: u64,
    pub errors: u64,
    pub started_at: Instant,
}

impl Default for RecordingStats {
    fn default() -> Self {
        Self {
            frames_captured: 0,
            frames_stored: 0,
            windows_captured: 0,
            windows_stored: 0,
            embeddings_generated: 0,
            errors: 0,
            started_at: Instant::now(),
        }
    }
}

/// Invoked after a frame or sub-frame row is persisted, with its diff
/// score.
pub type StoredCallback = Box<dyn Fn(&str, f64) + Send>;

/// What one tick produced
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub frame_id: Option<String>,
    pub sub_frame_ids: Vec<String>,
}

/// One coordinator per recording session.
pub struct RecordingCoordinator {
    config: RecordingConfig,
    source: Box<dyn FrameSource>,
    source_factory: Option<Box<dyn Fn() -> Result<Box<dyn FrameSource>> + Send>>,
    diff_engine: FrameDiffEngine,
    video_manager: Option<VideoChunkManager>,
    db: Database,
    encoder: Option<Arc<Encoder>>,
    vector_store: Option<VectorStore>,
    vector_buffer: Vec<VectorRecord>,
    batches_flushed: usize,
    ocr: Option<OcrWorkerHandle>,
    stats: RecordingStats,
    consecutive_capture_errors: u32,
    on_frame_stored: Option<StoredCallback>,
    on_subframe_stored: Option<StoredCallback>,
}

impl RecordingCoordinator {
    /// Build a coordinator. Must be called inside a tokio runtime when
    /// OCR is enabled (the worker task is spawned here).
    pub fn new(
        config: RecordingConfig,
        source: Box<dyn FrameSource>,
        encoder: Option<Encoder>,
        ocr_engine: Option<OcrEngine>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.storage_root)?;
        let db = Database::open(&config.ocr_db_path)?;

        let video_manager = if config.chunked {
            let (created, closed) = chunk_callbacks(&config)?;
            Some(VideoChunkManager::new(
                config.storage_root.clone(),
                config.fps,
                config.chunk_duration_secs,
                Some(created),
                Some(closed),
            ))
        } else {
            None
        };

        let vector_store = if config.run_embedding {
            Some(VectorStore::open(&config.vector_db_path, config.embedding_dim)?)
        } else {
            None
        };

        let ocr = match (config.run_ocr, ocr_engine) {
            (true, Some(engine)) => {
                Some(OcrWorker::spawn(engine, Database::open(&config.ocr_db_path)?))
            }
            _ => None,
        };

        info!(
            "recording coordinator initialized: monitor={} fps={} chunked={} ocr={} embedding={}",
            config.monitor_id,
            config.fps,
            config.chunked,
            ocr.is_some(),
            config.run_embedding
        );

        Ok(Self {
            diff_engine: FrameDiffEngine::new(
                config.screen_diff_threshold,
                config.window_diff_threshold,
            ),
            video_manager,
            db,
            encoder: encoder.map(Arc::new),
            vector_store,
            vector_buffer: Vec::with_capacity(VECTOR_BATCH_SIZE),
            batches_flushed: 0,
            ocr,
            stats: RecordingStats::default(),
            consecutive_capture_errors: 0,
            on_frame_stored: None,
            on_subframe_stored: None,
            source,
            source_factory: None,
            config,
        })
    }

    /// Factory used to rebuild the source after repeated capture
    /// failures.
    pub fn set_source_factory(
        &mut self,
        factory: Box<dyn Fn() -> Result<Box<dyn FrameSource>> + Send>,
    ) {
        self.source_factory = Some(factory);
    }

    pub fn set_on_frame_stored(&mut self, callback: StoredCallback) {
        self.on_frame_stored = Some(callback);
    }

    pub fn set_on_subframe_stored(&mut self, callback: StoredCallback) {
        self.on_subframe_stored = Some(callback);
    }

    pub fn stats(&self) -> &RecordingStats {
        &self.stats
    }

    /// Run the capture loop until the stop flag flips.
    pub async fn run(&mut self, stop: Arc<AtomicBool>) -> Result<()> {
        let interval = Duration::from_secs_f64(1.0 / self.config.fps.max(0.001));
        info!("starting capture loop, interval {:?}", interval);

        while !stop.load(Ordering::SeqCst) {
            let tick_start = Instant::now();

            if let Err(e) = self.tick().await {
                error!("tick failed: {}", e);
                self.stats.errors += 1;
            }

            if self.stats.frames_captured % 60 == 0 && self.stats.frames_captured > 0 {
                self.log_stats();
            }

            let elapsed = tick_start.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// One capture/process cycle. The ordering inside is load-bearing:
    /// screen frame first, then sub-frames, then the mapping rows.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let screen = match self.source.capture() {
            Ok(screen) => {
                self.consecutive_capture_errors = 0;
                screen
            }
            Err(e) => {
                warn!("capture failed: {}", e);
                self.stats.errors += 1;
                self.consecutive_capture_errors += 1;
                if self.consecutive_capture_errors >= MAX_CONSECUTIVE_CAPTURE_ERRORS {
                    self.reinitialize_source();
                }
                return Ok(TickOutcome::default());
            }
        };

        self.stats.frames_captured += 1;

        // 1. Screen-level decision
        let screen_decision = self.diff_engine.check_screen(&screen);

        // 2. Retire streams whose window left the screen
        let current_keys = screen.window_keys();
        if let Some(manager) = &mut self.video_manager {
            manager.cleanup_inactive_windows(&current_keys);
        }
        self.diff_engine.cleanup_stale_windows(&current_keys);

        let mut outcome = TickOutcome::default();

        // 3. Persist the full screen when accepted
        if screen_decision.should_store {
            match self.store_screen_frame(&screen, screen_decision.diff_score).await {
                Ok(frame_id) => outcome.frame_id = frame_id,
                Err(e) => {
                    error!("failed to store screen frame: {}", e);
                    self.stats.errors += 1;
                }
            }
        }

        // 4. Each window independently
        let windows: Vec<WindowFrame> = screen.windows.clone();
        for window in &windows {
            self.stats.windows_captured += 1;
            let decision = self.diff_engine.check_window(window);
            if !decision.should_store {
                continue;
            }
            match self.store_window_frame(window, decision.diff_score) {
                Ok(Some(sub_frame_id)) => outcome.sub_frame_ids.push(sub_frame_id),
                Ok(None) => {}
                Err(e) => {
                    error!("failed to store window frame: {}", e);
                    self.stats.errors += 1;
                }
            }
        }

        // 5. Associate this tick's frame with its sub-frames
        if let Some(frame_id) = &outcome.frame_id {
            if !outcome.sub_frame_ids.is_empty() {
                if let Err(e) = retrace_db::add_frame_subframe_mappings(
                    self.db.connection(),
                    frame_id,
                    &outcome.sub_frame_ids,
                ) {
                    error!("failed to store frame mappings: {}", e);
                    self.stats.errors += 1;
                }
            }
        }

        Ok(outcome)
    }

    async fn store_screen_frame(
        &mut self,
        screen: &ScreenObject,
        diff_score: f64,
    ) -> Result<Option<String>> {
        let frame_id = frame_id::frame_id_for(screen.timestamp);

        // Chunked mode: the frame must land in a chunk before metadata
        let mut chunk_ref: Option<(i64, i64)> = None;
        if let Some(manager) = &mut self.video_manager {
            let (chunk_path, offset) =
                match manager.write_screen_frame(self.config.monitor_id, &screen.full_screen_image) {
                    Ok(result) => result,
                    Err(e) => {
                        // Encoding failure: drop the frame, write no metadata
                        warn!("screen frame dropped, encoder failed: {}", e);
                        self.stats.errors += 1;
                        return Ok(None);
                    }
                };
            let chunk_id = retrace_db::video_chunk_id_for_path(
                self.db.connection(),
                &chunk_path.to_string_lossy(),
            )?
            .ok_or_else(|| anyhow!("chunk row missing for {:?}", chunk_path))?;
            chunk_ref = Some((chunk_id, offset as i64));
        }

        // A standalone JPEG backs simple mode and the retrieval-side
        // image loads of vector mode.
        let image_path = if !self.config.chunked || self.config.run_embedding {
            let path = storage_paths::image_path_for(
                &self.config.images_root,
                &frame_id,
                screen.timestamp,
            );
            storage_paths::save_jpeg(&screen.full_screen_image, &path, self.config.image_quality)?;
            path.to_string_lossy().to_string()
        } else {
            let (chunk_id, offset) = chunk_ref.unwrap_or((0, 0));
            format!("video_chunk:{}:{}", chunk_id, offset)
        };

        retrace_db::store_frame(
            self.db.connection(),
            &NewFrame {
                frame_id: frame_id.clone(),
                timestamp: screen.timestamp,
                image_path: image_path.clone(),
                device_name: Some(screen.device_name.clone()),
                metadata_json: None,
                video_chunk_id: chunk_ref.map(|(id, _)| id),
                offset_index: chunk_ref.map(|(_, off)| off),
                monitor_id: screen.monitor_id as i64,
                image_hash: Some(screen.full_screen_hash as i64),
            },
        )?;

        if let Some(ocr) = &self.ocr {
            ocr.enqueue(OcrTask {
                image: screen.full_screen_image.clone(),
                target: OcrTaskTarget::Frame(frame_id.clone()),
                timestamp: screen.timestamp,
                image_path: image_path.clone(),
            });
        }

        if self.config.run_embedding {
            if let Err(e) = self.push_embedding(&frame_id, screen, &image_path).await {
                warn!("embedding failed for {}: {}", frame_id, e);
                self.stats.errors += 1;
            }
        }

        self.stats.frames_stored += 1;
        debug!("stored frame {} (diff={:.4})", frame_id, diff_score);
        if let Some(callback) = &self.on_frame_stored {
            callback(&frame_id, diff_score);
        }
        Ok(Some(frame_id))
    }

    fn store_window_frame(&mut self, window: &WindowFrame, diff_score: f64) -> Result<Option<String>> {
        let sub_frame_id = frame_id::generate_sub_frame_id(&window.app_name, window.timestamp);

        let mut chunk_ref: Option<(i64, i64)> = None;
        if let Some(manager) = &mut self.video_manager {
            let (chunk_path, offset) = match manager.write_window_frame(&window.key(), &window.image) {
                Ok(result) => result,
                Err(e) => {
                    warn!("window frame dropped, encoder failed: {}", e);
                    self.stats.errors += 1;
                    return Ok(None);
                }
            };
            let chunk_id = retrace_db::window_chunk_id_for_path(
                self.db.connection(),
                &chunk_path.to_string_lossy(),
            )?
            .ok_or_else(|| anyhow!("window chunk row missing for {:?}", chunk_path))?;
            chunk_ref = Some((chunk_id, offset as i64));
        }

        retrace_db::store_sub_frame(
            self.db.connection(),
            &NewSubFrame {
                sub_frame_id: sub_frame_id.clone(),
                window_chunk_id: chunk_ref.map(|(id, _)| id),
                offset_index: chunk_ref.map(|(_, off)| off).unwrap_or(0),
                timestamp: window.timestamp,
                app_name: window.app_name.clone(),
                window_name: window.window_title.clone(),
                process_id: window.process_id as i64,
                is_focused: window.is_focused,
                image_hash: Some(window.image_hash as i64),
            },
        )?;

        if let Some(ocr) = &self.ocr {
            ocr.enqueue(OcrTask {
                image: window.image.clone(),
                target: OcrTaskTarget::SubFrame(sub_frame_id.clone()),
                timestamp: window.timestamp,
                image_path: String::new(),
            });
        }

        self.stats.windows_stored += 1;
        debug!(
            "stored sub_frame {} ({}/{})",
            sub_frame_id, window.app_name, window.window_title
        );
        if let Some(callback) = &self.on_subframe_stored {
            callback(&sub_frame_id, diff_score);
        }
        Ok(Some(sub_frame_id))
    }

    async fn push_embedding(
        &mut self,
        frame_id: &str,
        screen: &ScreenObject,
        image_path: &str,
    ) -> Result<()> {
        let encoder = match &self.encoder {
            Some(encoder) => encoder.clone(),
            None => return Ok(()),
        };

        let vector = encoder
            .encode_image(&screen.full_screen_image)
            .await
            .map_err(|e| anyhow!("{e}"))?;

        self.vector_buffer.push(VectorRecord {
            frame_id: frame_id.to_string(),
            timestamp: screen.timestamp,
            image_path: image_path.to_string(),
            vector,
            ocr_text: String::new(),
            metadata: String::new(),
        });
        self.stats.embeddings_generated += 1;

        if self.vector_buffer.len() >= VECTOR_BATCH_SIZE {
            self.flush_vectors()?;
        }
        Ok(())
    }

    fn flush_vectors(&mut self) -> Result<()> {
        let store = match &self.vector_store {
            Some(store) => store,
            None => return Ok(()),
        };
        if self.vector_buffer.is_empty() {
            return Ok(());
        }

        store.store_frames_batch(&self.vector_buffer)?;
        debug!("flushed {} embedding(s) to vector store", self.vector_buffer.len());
        self.vector_buffer.clear();

        self.batches_flushed += 1;
        if self.batches_flushed % OPTIMIZE_EVERY_N_BATCHES == 0 {
            if let Err(e) = store.optimize() {
                warn!("vector store optimize failed: {}", e);
            }
        }
        Ok(())
    }

    fn reinitialize_source(&mut self) {
        let factory = match &self.source_factory {
            Some(factory) => factory,
            None => return,
        };
        warn!("too many capture errors, reinitializing source");
        match factory() {
            Ok(source) => {
                self.source = source;
                self.consecutive_capture_errors = 0;
            }
            Err(e) => error!("source reinitialization failed: {}", e),
        }
    }

    fn log_stats(&self) {
        let runtime = self.stats.started_at.elapsed().as_secs_f64();
        info!(
            "stats: captured={} stored={} windows_stored={} embeddings={} ocr_processed={} errors={} runtime={:.0}s",
            self.stats.frames_captured,
            self.stats.frames_stored,
            self.stats.windows_stored,
            self.stats.embeddings_generated,
            self.ocr.as_ref().map(|o| o.processed_count()).unwrap_or(0),
            self.stats.errors,
            runtime
        );
    }

    async fn shutdown(&mut self) {
        info!("shutting down recording session");

        if let Err(e) = self.flush_vectors() {
            warn!("final vector flush failed: {}", e);
        }
        if let Some(manager) = &mut self.video_manager {
            manager.close_all();
        }
        if let Some(ocr) = self.ocr.take() {
            ocr.stop(Duration::from_secs(30)).await;
        }

        self.log_stats();
    }
}

/// Database-writing callbacks for chunk lifecycle events: a chunk row is
/// inserted before any frame references it, and its frame_count is
/// written back when the chunk seals.
fn chunk_callbacks(
    config: &RecordingConfig,
) -> Result<(ChunkCreatedCallback, ChunkClosedCallback)> {
    let db = Arc::new(Mutex::new(Database::open(&config.ocr_db_path)?));
    let fps = config.fps;
    let monitor_id = config.monitor_id as i64;

    let created_db = db.clone();
    let created: ChunkCreatedCallback = Arc::new(move |path, chunk_type, identifier| {
        let db = match created_db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let file_path = path.to_string_lossy().to_string();
        let result = match chunk_type {
            ChunkStreamType::Screen => retrace_db::insert_video_chunk(
                db.connection(),
                &NewVideoChunk {
                    file_path,
                    monitor_id,
                    device_name: Some(identifier.to_string()),
                    fps,
                },
            )
            .map(|_| ()),
            ChunkStreamType::Window => {
                let mut parts = identifier.split("::");
                let app_name = parts.next().unwrap_or("unknown").to_string();
                let window_name = parts.next().unwrap_or("unknown").to_string();
                retrace_db::insert_window_chunk(
                    db.connection(),
                    &NewWindowChunk {
                        file_path,
                        app_name,
                        window_name,
                        monitor_id,
                        fps,
                    },
                )
                .map(|_| ())
            }
        };
        if let Err(e) = result {
            error!("failed to insert chunk row: {}", e);
        }
    });

    let closed_db = db;
    let closed: ChunkClosedCallback = Arc::new(move |path, chunk_type, _identifier, frame_count| {
        let db = match closed_db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let file_path = path.to_string_lossy();
        let result = match chunk_type {
            ChunkStreamType::Screen => {
                match retrace_db::video_chunk_id_for_path(db.connection(), &file_path) {
                    Ok(Some(id)) => retrace_db::update_video_chunk_frame_count(
                        db.connection(),
                        id,
                        frame_count as i64,
                    ),
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            ChunkStreamType::Window => {
                match retrace_db::window_chunk_id_for_path(db.connection(), &file_path) {
                    Ok(Some(id)) => retrace_db::update_window_chunk_frame_count(
                        db.connection(),
                        id,
                        frame_count as i64,
                    ),
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = result {
            error!("failed to update chunk frame count: {}", e);
        }
    });

    Ok((created, closed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use retrace_capture::{image_hash, CaptureError, MonitorInfo};

    /// Source that replays a fixed script of captures.
    struct ScriptedSource {
        info: MonitorInfo,
        script: Vec<Option<ScreenObject>>,
        position: usize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Option<ScreenObject>>) -> Self {
            Self {
                info: MonitorInfo {
                    id: 0,
                    name: "scripted".to_string(),
                    width: 192,
                    height: 108,
                    is_primary: true,
                },
                script,
                position: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn capture(&mut self) -> std::result::Result<ScreenObject, CaptureError> {
            let item = self
                .script
                .get(self.position)
                .cloned()
                .unwrap_or(None);
            self.position += 1;
            item.ok_or(CaptureError::FrameAcquisition("scripted failure".to_string()))
        }

        fn monitor(&self) -> &MonitorInfo {
            &self.info
        }
    }

    fn solid(px: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(192, 108, Rgb(px)))
    }

    /// The S1 fixture: white desktop with a red square in the corner.
    fn red_square_desktop() -> DynamicImage {
        let mut img = RgbImage::from_pixel(192, 108, Rgb([255, 255, 255]));
        for y in 0..20 {
            for x in 0..20 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn screen(image: DynamicImage, secs: u32, windows: Vec<WindowFrame>) -> ScreenObject {
        use chrono::TimeZone;
        let hash = image_hash(&image);
        ScreenObject {
            monitor_id: 0,
            device_name: "scripted".to_string(),
            timestamp: chrono::Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, secs).unwrap(),
            full_screen_image: image,
            full_screen_hash: hash,
            windows,
        }
    }

    fn window(app: &str, title: &str, image: DynamicImage, secs: u32) -> WindowFrame {
        use chrono::TimeZone;
        let hash = image_hash(&image);
        WindowFrame {
            app_name: app.to_string(),
            window_title: title.to_string(),
            process_id: 99,
            is_focused: true,
            image,
            image_hash: hash,
            timestamp: chrono::Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, secs).unwrap(),
        }
    }

    fn test_config(dir: &std::path::Path) -> RecordingConfig {
        RecordingConfig {
            storage_root: dir.to_path_buf(),
            monitor_id: 0,
            fps: 1.0,
            chunk_duration_secs: 60,
            capture_windows: true,
            capture_unfocused_windows: true,
            screen_diff_threshold: 0.006,
            window_diff_threshold: 0.006,
            run_ocr: false,
            run_embedding: false,
            chunked: false,
            max_image_width: 0,
            image_quality: 80,
            ocr_db_path: dir.join("ocr.db"),
            vector_db_path: dir.join("vectors.db"),
            images_root: dir.join("images"),
            embedding_dim: 32,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn silent_desktop_persists_only_the_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![
            Some(screen(red_square_desktop(), 0, vec![])),
            Some(screen(red_square_desktop(), 1, vec![])),
            Some(screen(red_square_desktop(), 2, vec![])),
        ];
        let mut coordinator = RecordingCoordinator::new(
            test_config(dir.path()),
            Box::new(ScriptedSource::new(script)),
            None,
            None,
        )
        .unwrap();

        let first = coordinator.tick().await.unwrap();
        assert!(first.frame_id.is_some());
        assert!(coordinator.tick().await.unwrap().frame_id.is_none());
        assert!(coordinator.tick().await.unwrap().frame_id.is_none());

        let count = retrace_db::get_frame_count(coordinator.db.connection()).unwrap();
        assert_eq!(count, 1);
        assert_eq!(coordinator.stats().errors, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tab_switch_persists_both_frames() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![
            Some(screen(solid([250, 250, 250]), 0, vec![])),
            Some(screen(solid([3, 3, 3]), 1, vec![])),
        ];
        let mut coordinator = RecordingCoordinator::new(
            test_config(dir.path()),
            Box::new(ScriptedSource::new(script)),
            None,
            None,
        )
        .unwrap();

        assert!(coordinator.tick().await.unwrap().frame_id.is_some());
        assert!(coordinator.tick().await.unwrap().frame_id.is_some());
        assert_eq!(retrace_db::get_frame_count(coordinator.db.connection()).unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn accepted_windows_produce_sub_frames_and_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![Some(screen(
            solid([200, 200, 200]),
            0,
            vec![window("editor", "main.rs", solid([40, 40, 40]), 0)],
        ))];
        let mut coordinator = RecordingCoordinator::new(
            test_config(dir.path()),
            Box::new(ScriptedSource::new(script)),
            None,
            None,
        )
        .unwrap();

        let outcome = coordinator.tick().await.unwrap();
        let frame_id = outcome.frame_id.unwrap();
        assert_eq!(outcome.sub_frame_ids.len(), 1);

        let mapped =
            retrace_db::get_sub_frames_for_frame(coordinator.db.connection(), &frame_id).unwrap();
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].app_name, "editor");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn capture_failure_counts_error_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let script = vec![None, Some(screen(solid([100, 100, 100]), 1, vec![]))];
        let mut coordinator = RecordingCoordinator::new(
            test_config(dir.path()),
            Box::new(ScriptedSource::new(script)),
            None,
            None,
        )
        .unwrap();

        let failed = coordinator.tick().await.unwrap();
        assert!(failed.frame_id.is_none());
        assert_eq!(coordinator.stats().errors, 1);

        let ok = coordinator.tick().await.unwrap();
        assert!(ok.frame_id.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn embedding_mode_buffers_and_flushes_vectors() {
        use retrace_retrieval::HashingEncoder;

        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.run_embedding = true;

        // Alternate shades so every tick is accepted
        let script: Vec<Option<ScreenObject>> = (0..3)
            .map(|i| {
                let shade = if i % 2 == 0 { [240, 240, 240] } else { [10, 10, 10] };
                Some(screen(solid(shade), i, vec![]))
            })
            .collect();

        let mut coordinator = RecordingCoordinator::new(
            config,
            Box::new(ScriptedSource::new(script)),
            Some(Encoder::Hashing(HashingEncoder::new(32))),
            None,
        )
        .unwrap();

        for _ in 0..3 {
            coordinator.tick().await.unwrap();
        }
        assert_eq!(coordinator.stats().embeddings_generated, 3);

        // Not yet flushed (batch size 32): force the flush and check rows
        coordinator.flush_vectors().unwrap();
        let rows = coordinator.vector_store.as_ref().unwrap().count_rows().unwrap();
        assert_eq!(rows, 3);
    }
}
