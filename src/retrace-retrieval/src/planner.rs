//! Hybrid query planner
//!
//! RAG path: rewrite -> time pre-filter -> parallel dense + sparse
//! retrieval -> dense-first dedup -> lazy image load -> optional rerank
//! -> VLM answer. A failed branch degrades to empty results; only a fully
//! empty candidate set short-circuits with a user-facing message.

use chrono::{DateTime, Local, Utc};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use retrace_db::{Database, VectorStore};

use crate::encoder::Encoder;
use crate::prompts;
use crate::reranker::VlmReranker;
use crate::rewrite::{QueryRewriter, RewriteOutcome};
use crate::types::{merge_dedup, RetrievedFrame};
use crate::vlm::VlmClient;

/// Where candidates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySource {
    /// Dense retrieval over image embeddings (plus sparse when hybrid)
    Dense,
    /// OCR full-text retrieval only
    OcrOnly,
}

/// How the question is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Retrieve over history, then answer
    Rag,
    /// Current screen plus most recent frames, no retrieval
    Realtime,
}

/// Planner configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub db_path: PathBuf,
    pub vector_db_path: PathBuf,
    pub images_root: PathBuf,
    pub embedding_dim: usize,
    pub enable_hybrid: bool,
    pub enable_rerank: bool,
    pub rerank_top_k: usize,
    pub enable_llm_rewrite: bool,
    pub enable_time_filter: bool,
    pub query_rewrite_num: usize,
    pub max_images_to_load: usize,
}

/// Plans and executes one query end to end.
pub struct QueryPlanner {
    settings: PlannerSettings,
    encoder: Arc<Encoder>,
    vlm: Arc<VlmClient>,
    rewriter: Option<QueryRewriter>,
    reranker: Option<VlmReranker>,
}

impl QueryPlanner {
    pub fn new(
        settings: PlannerSettings,
        encoder: Encoder,
        vlm: VlmClient,
        rewriter: Option<QueryRewriter>,
        reranker: Option<VlmReranker>,
    ) -> Self {
        Self {
            settings,
            encoder: Arc::new(encoder),
            vlm: Arc::new(vlm),
            rewriter,
            reranker,
        }
    }

    /// Entry point used by the REPL. Always returns a user-facing string.
    pub async fn answer(
        &self,
        query: &str,
        source: QuerySource,
        mode: QueryMode,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        current_screen: Option<DynamicImage>,
    ) -> String {
        match (source, mode) {
            (QuerySource::Dense, QueryMode::Rag) => self.rag_dense(query, window).await,
            (QuerySource::OcrOnly, QueryMode::Rag) => self.rag_ocr(query, window).await,
            (QuerySource::Dense, QueryMode::Realtime) => {
                self.realtime_visual(query, current_screen).await
            }
            (QuerySource::OcrOnly, QueryMode::Realtime) => self.realtime_ocr(query).await,
        }
    }

    // ---------- RAG over dense (+ sparse) candidates ----------

    async fn rag_dense(
        &self,
        query: &str,
        explicit_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> String {
        let rewrite = self.run_rewrite(query, explicit_window.is_none()).await;
        let window = normalize_window(explicit_window.or(rewrite.time_range));
        if let Some((start, end)) = window {
            info!("time pre-filter: {} .. {}", start, end);
        }

        let top_k = self.settings.max_images_to_load;

        // Dense branch
        let dense_task = {
            let encoder = self.encoder.clone();
            let vector_db_path = self.settings.vector_db_path.clone();
            let dim = self.settings.embedding_dim;
            let queries = rewrite.dense_queries.clone();
            tokio::spawn(async move {
                let store = VectorStore::open(&vector_db_path, dim)?;
                let mut frames = Vec::new();
                for q in &queries {
                    let embedding = encoder
                        .encode_text(q)
                        .await
                        .map_err(|e| anyhow::anyhow!("encode failed: {e}"))?;
                    for hit in store.search(&embedding, top_k, window.map(|w| w.0), window.map(|w| w.1))? {
                        frames.push(RetrievedFrame {
                            frame_id: hit.frame_id,
                            timestamp: hit.timestamp,
                            image_path: hit.image_path,
                            distance: hit.distance,
                            ocr_text: hit.ocr_text,
                            metadata: hit.metadata,
                            image: None,
                            from_sparse: false,
                            rerank_score: None,
                        });
                    }
                }
                Ok::<_, anyhow::Error>(frames)
            })
        };

        // Sparse branch (FTS over OCR text)
        let sparse_task = {
            let enable = self.settings.enable_hybrid;
            let db_path = self.settings.db_path.clone();
            let queries = rewrite.sparse_queries.clone();
            tokio::spawn(async move {
                if !enable {
                    return Ok::<_, anyhow::Error>(Vec::new());
                }
                let db = Database::open(&db_path)?;
                let mut frames = Vec::new();
                for q in &queries {
                    let hits = retrace_db::search_ocr(
                        db.connection(),
                        q,
                        top_k as i64,
                        window.map(|w| w.0),
                        window.map(|w| w.1),
                    )?;
                    for hit in hits {
                        if hit.score == 0.0 {
                            continue;
                        }
                        frames.push(RetrievedFrame {
                            frame_id: hit.frame_id,
                            timestamp: hit.timestamp,
                            image_path: hit.image_path,
                            // Placeholder; the reranker decides real relevance
                            distance: 1.0,
                            ocr_text: hit.text,
                            metadata: String::new(),
                            image: None,
                            from_sparse: true,
                            rerank_score: None,
                        });
                    }
                }
                Ok(frames)
            })
        };

        let (dense_results, sparse_results) = tokio::join!(dense_task, sparse_task);
        let dense = unwrap_branch(dense_results, "dense");
        let sparse = unwrap_branch(sparse_results, "sparse");

        let mut frames = merge_dedup(dense, sparse);
        if frames.is_empty() {
            return "No relevant screenshots found.".to_string();
        }

        // Images load lazily, only for merged candidates
        self.load_candidate_images(&mut frames);
        let mut frames_with_images: Vec<RetrievedFrame> =
            frames.into_iter().filter(|f| f.has_image()).collect();
        if frames_with_images.is_empty() {
            return "Retrieved images cannot be loaded, check paths or storage.".to_string();
        }
        info!("retrieved {} candidate image(s)", frames_with_images.len());

        if self.settings.enable_rerank {
            if let Some(reranker) = &self.reranker {
                frames_with_images = reranker
                    .rerank(query, frames_with_images, self.settings.rerank_top_k)
                    .await;
                if frames_with_images.is_empty() {
                    return "No images survived reranking.".to_string();
                }
            }
        }

        let images: Vec<(DynamicImage, Option<DateTime<Utc>>)> = frames_with_images
            .iter()
            .filter_map(|f| f.image.clone().map(|img| (img, Some(f.timestamp))))
            .collect();

        let prompt = prompts::rag_user_prompt(query, images.len());
        match self
            .vlm
            .chat_with_images(&prompt, Some(prompts::VISUAL_ASSISTANT_SYSTEM_PROMPT), &images)
            .await
        {
            Ok(answer) => answer,
            Err(e) => format!("VLM call failed: {e}"),
        }
    }

    // ---------- OCR-only RAG ----------

    async fn rag_ocr(
        &self,
        query: &str,
        explicit_window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> String {
        // OCR mode searches with the original query; the LLM is only
        // consulted for the time range.
        let window = if explicit_window.is_some() {
            normalize_window(explicit_window)
        } else if self.settings.enable_time_filter {
            match &self.rewriter {
                Some(rewriter) => {
                    let outcome = rewriter
                        .rewrite_and_time(query, false, true, self.settings.query_rewrite_num)
                        .await;
                    normalize_window(outcome.time_range)
                }
                None => None,
            }
        } else {
            None
        };

        let hits = {
            let db = match Database::open(&self.settings.db_path) {
                Ok(db) => db,
                Err(e) => return format!("Failed to open storage: {e}"),
            };
            match retrace_db::search_ocr(
                db.connection(),
                query,
                20,
                window.map(|w| w.0),
                window.map(|w| w.1),
            ) {
                Ok(hits) => hits,
                Err(e) => {
                    warn!("OCR search failed: {}", e);
                    Vec::new()
                }
            }
        };

        if hits.is_empty() {
            return "No relevant OCR text found.".to_string();
        }

        let snippets = build_ocr_snippets(
            &hits
                .iter()
                .map(|h| (h.timestamp, h.text.clone()))
                .collect::<Vec<_>>(),
        );
        let prompt = prompts::ocr_user_prompt(query, &snippets);

        match self
            .vlm
            .chat_text_only(&prompt, Some(prompts::TEXT_ASSISTANT_SYSTEM_PROMPT))
            .await
        {
            Ok(answer) => answer,
            Err(e) => format!("VLM call failed: {e}"),
        }
    }

    // ---------- real-time modes ----------

    async fn realtime_visual(&self, query: &str, current: Option<DynamicImage>) -> String {
        let mut images: Vec<(DynamicImage, Option<DateTime<Utc>>)> = Vec::new();
        if let Some(current) = current {
            images.push((current, Some(Utc::now())));
        }

        // Recent history from the relational store
        match Database::open(&self.settings.db_path) {
            Ok(db) => match retrace_db::get_recent_frames(db.connection(), 5) {
                Ok(frames) => {
                    for frame in frames {
                        let mut retrieved = RetrievedFrame {
                            frame_id: frame.frame_id,
                            timestamp: frame.timestamp,
                            image_path: frame.image_path,
                            distance: 0.0,
                            ocr_text: frame.ocr_text,
                            metadata: String::new(),
                            image: None,
                            from_sparse: false,
                            rerank_score: None,
                        };
                        load_frame_image(&mut retrieved, &self.settings.images_root);
                        if let Some(image) = retrieved.image {
                            images.push((image, Some(retrieved.timestamp)));
                        }
                    }
                }
                Err(e) => warn!("failed to load recent frames: {}", e),
            },
            Err(e) => warn!("failed to open storage for realtime history: {}", e),
        }

        if images.is_empty() {
            return "Unable to obtain any screenshots.".to_string();
        }

        let prompt = prompts::realtime_user_prompt(query);
        match self
            .vlm
            .chat_with_images(&prompt, Some(prompts::VISUAL_ASSISTANT_SYSTEM_PROMPT), &images)
            .await
        {
            Ok(answer) => answer,
            Err(e) => format!("VLM call failed: {e}"),
        }
    }

    async fn realtime_ocr(&self, query: &str) -> String {
        let snippets = match Database::open(&self.settings.db_path) {
            Ok(db) => match retrace_db::get_recent_frames(db.connection(), 10) {
                Ok(frames) => frames
                    .into_iter()
                    .filter(|f| !f.ocr_text.is_empty())
                    .map(|f| {
                        let local = f.timestamp.with_timezone(&Local);
                        format!(
                            "[{}]\n{}",
                            local.format("%H:%M:%S"),
                            f.ocr_text.chars().take(500).collect::<String>()
                        )
                    })
                    .collect::<Vec<_>>(),
                Err(e) => {
                    warn!("failed to load recent OCR text: {}", e);
                    Vec::new()
                }
            },
            Err(e) => return format!("Failed to open storage: {e}"),
        };

        if snippets.is_empty() {
            return "No OCR text available.".to_string();
        }

        let prompt = prompts::realtime_ocr_user_prompt(query, &snippets);

        match self
            .vlm
            .chat_text_only(&prompt, Some(prompts::TEXT_ASSISTANT_SYSTEM_PROMPT))
            .await
        {
            Ok(answer) => answer,
            Err(e) => format!("VLM call failed: {e}"),
        }
    }

    /// Load candidate images: stored JPEG first, then the canonical
    /// images layout, then extraction from the frame's MP4 chunk.
    fn load_candidate_images(&self, frames: &mut [RetrievedFrame]) {
        let db = Database::open(&self.settings.db_path).ok();
        for frame in frames.iter_mut() {
            load_frame_image(frame, &self.settings.images_root);
            if frame.image.is_some() {
                continue;
            }
            let db = match &db {
                Some(db) => db,
                None => continue,
            };
            if let Ok(Some(info)) =
                retrace_db::get_frame_video_info(db.connection(), &frame.frame_id)
            {
                match retrace_processing::extract_chunk_frame(
                    Path::new(&info.file_path),
                    info.offset_index,
                ) {
                    Ok(image) => frame.image = Some(image),
                    Err(e) => warn!("chunk extraction failed for {}: {}", frame.frame_id, e),
                }
            }
        }
    }

    async fn run_rewrite(&self, query: &str, allow_time: bool) -> RewriteOutcome {
        let enable_rewrite = self.settings.enable_llm_rewrite;
        let enable_time = self.settings.enable_time_filter && allow_time;
        if !(enable_rewrite || enable_time) {
            return RewriteOutcome::passthrough(query);
        }
        match &self.rewriter {
            Some(rewriter) => {
                rewriter
                    .rewrite_and_time(
                        query,
                        enable_rewrite,
                        enable_time,
                        self.settings.query_rewrite_num,
                    )
                    .await
            }
            None => RewriteOutcome::passthrough(query),
        }
    }
}

fn unwrap_branch(
    result: Result<anyhow::Result<Vec<RetrievedFrame>>, tokio::task::JoinError>,
    branch: &str,
) -> Vec<RetrievedFrame> {
    match result {
        Ok(Ok(frames)) => frames,
        Ok(Err(e)) => {
            warn!("{} retrieval failed: {}", branch, e);
            Vec::new()
        }
        Err(e) => {
            warn!("{} retrieval task panicked: {}", branch, e);
            Vec::new()
        }
    }
}

/// Swap a reversed window so `start <= end`.
fn normalize_window(
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    window.map(|(start, end)| if start > end { (end, start) } else { (start, end) })
}

/// Resolve and load a candidate's image from disk.
///
/// Tries the stored `image_path` first; falls back to the canonical
/// `<images_root>/YYYYMMDD/<frame_id>.jpg` layout.
fn load_frame_image(frame: &mut RetrievedFrame, images_root: &Path) {
    if frame.image.is_some() {
        return;
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if !frame.image_path.is_empty() && !frame.image_path.starts_with("video_chunk:") {
        candidates.push(PathBuf::from(&frame.image_path));
    }
    let date_dir = frame.timestamp.format("%Y%m%d").to_string();
    candidates.push(images_root.join(date_dir).join(format!("{}.jpg", frame.frame_id)));

    for path in candidates {
        if path.exists() {
            match image::open(&path) {
                Ok(img) => {
                    frame.image = Some(img);
                    return;
                }
                Err(e) => warn!("failed to load image {:?}: {}", path, e),
            }
        }
    }
    warn!("image not found for frame {}", frame.frame_id);
}

/// Top snippets for the OCR-only prompt: at most 15 entries, 500 chars
/// each, prefixed with their local timestamp.
pub fn build_ocr_snippets(hits: &[(DateTime<Utc>, String)]) -> Vec<String> {
    hits.iter()
        .take(15)
        .enumerate()
        .map(|(i, (ts, text))| {
            let local = ts.with_timezone(&Local);
            format!(
                "[{}] Time: {}\nContent: {}",
                i + 1,
                local.format("%Y-%m-%d %H:%M:%S"),
                text.chars().take(500).collect::<String>()
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::HashingEncoder;
    use crate::vlm::{VlmBackend, VlmSettings};
    use chrono::TimeZone;

    fn planner(dir: &Path) -> QueryPlanner {
        let settings = PlannerSettings {
            db_path: dir.join("ocr.db"),
            vector_db_path: dir.join("vectors.db"),
            images_root: dir.join("images"),
            embedding_dim: 32,
            enable_hybrid: true,
            enable_rerank: false,
            rerank_top_k: 5,
            enable_llm_rewrite: false,
            enable_time_filter: false,
            query_rewrite_num: 3,
            max_images_to_load: 5,
        };
        let vlm = VlmClient::new(VlmSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            model: "test".to_string(),
            backend: VlmBackend::Vllm,
            image_quality: 80,
        });
        QueryPlanner::new(settings, Encoder::Hashing(HashingEncoder::new(32)), vlm, None, None)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_stores_yield_no_results_message() {
        let dir = tempfile::tempdir().unwrap();
        // Materialize empty stores first
        Database::open(dir.path().join("ocr.db")).unwrap();
        VectorStore::open(dir.path().join("vectors.db"), 32).unwrap();

        let planner = planner(dir.path());
        let answer = planner
            .answer("anything", QuerySource::Dense, QueryMode::Rag, None, None)
            .await;
        assert_eq!(answer, "No relevant screenshots found.");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ocr_path_reports_empty_database() {
        let dir = tempfile::tempdir().unwrap();
        Database::open(dir.path().join("ocr.db")).unwrap();

        let planner = planner(dir.path());
        let answer = planner
            .answer("timeout", QuerySource::OcrOnly, QueryMode::Rag, None, None)
            .await;
        assert_eq!(answer, "No relevant OCR text found.");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dense_failure_still_returns_sparse_results_message() {
        // Vector store file path is a directory -> dense branch fails;
        // sparse branch runs against an empty relational store. The
        // planner must degrade, not crash.
        let dir = tempfile::tempdir().unwrap();
        Database::open(dir.path().join("ocr.db")).unwrap();
        std::fs::create_dir_all(dir.path().join("vectors.db")).unwrap();

        let planner = planner(dir.path());
        let answer = planner
            .answer("q", QuerySource::Dense, QueryMode::Rag, None, None)
            .await;
        assert_eq!(answer, "No relevant screenshots found.");
    }

    #[test]
    fn window_normalization_swaps_reversed_bounds() {
        let start = Utc.with_ymd_and_hms(2026, 7, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let (s, e) = normalize_window(Some((start, end))).unwrap();
        assert!(s < e);
    }

    #[test]
    fn snippets_are_capped_and_timestamped() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 1, 9, 30, 0).unwrap();
        let hits: Vec<(DateTime<Utc>, String)> =
            (0..20).map(|i| (ts, format!("text {} {}", i, "x".repeat(600)))).collect();

        let snippets = build_ocr_snippets(&hits);
        assert_eq!(snippets.len(), 15);
        assert!(snippets[0].starts_with("[1] Time: "));
        // 500-char cap applies to the content
        assert!(snippets[0].len() < 600);
    }
}
