//! Retrace - personal visual memory CLI
//!
//! Continuous screen + window capture into deduplicated MP4 chunks and
//! searchable indexes, plus an interactive query REPL over the recorded
//! history.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

mod config;
mod frame_cache;
mod frame_id;
mod logging;
mod rebuild;
mod recorder;
mod storage_paths;

use config::{Config, StorageMode};
use logging::Component;
use recorder::{RecordingConfig, RecordingCoordinator};

use retrace_capture::{FrameSource, XcapSource};
use retrace_ocr::OcrEngine;
use retrace_retrieval::{
    Encoder, HashingEncoder, PlannerSettings, QueryMode, QueryPlanner, QueryRewriter,
    QuerySource, RemoteEncoder, VlmBackend, VlmClient, VlmReranker, VlmSettings,
};

#[derive(Parser)]
#[command(name = "retrace")]
#[command(about = "Personal visual memory: capture, index and query your screen history")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage root (overrides STORAGE_ROOT)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Record screen and windows until Ctrl-C
    Record {
        /// Monitor id to record (default: primary)
        #[arg(short, long)]
        monitor: Option<u32>,
    },

    /// Interactive query REPL
    Query,

    /// Rebuild indexes from a directory tree of images
    Rebuild {
        /// Directory of images to index
        #[arg(short, long)]
        image_dir: Option<PathBuf>,

        /// Keep existing index contents (append mode)
        #[arg(long)]
        no_clear: bool,

        /// Run OCR on each image
        #[arg(long)]
        ocr: bool,
    },

    /// Show index statistics
    Status,

    /// List monitors
    Monitors,

    /// Check external dependencies (ffmpeg, tesseract)
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let component = match &cli.command {
        Commands::Record { .. } => Component::Record,
        Commands::Query => Component::Query,
        Commands::Rebuild { .. } => Component::Rebuild,
        _ => Component::Main,
    };
    logging::init(component, cli.verbose)?;

    let mut config = Config::from_env()?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage_root = data_dir.clone();
        config.ocr_db_path = data_dir.join("ocr.db");
        config.vector_db_path = data_dir.join("vectors.db");
        config.text_vector_db_path = data_dir.join("text_vectors.db");
        config.image_storage_path = data_dir.join("images");
    }

    match cli.command {
        Commands::Record { monitor } => cmd_record(config, monitor).await,
        Commands::Query => cmd_query(config).await,
        Commands::Rebuild {
            image_dir,
            no_clear,
            ocr,
        } => cmd_rebuild(config, image_dir, no_clear, ocr).await,
        Commands::Status => cmd_status(config),
        Commands::Monitors => cmd_monitors(),
        Commands::Check => cmd_check(),
    }
}

// ========== record ==========

async fn cmd_record(config: Config, monitor: Option<u32>) -> Result<()> {
    info!("starting retrace recorder");
    info!("storage root: {:?}", config.storage_root);
    info!("mode: {}, fps: {}", config.storage_mode.as_str(), config.fps);

    if config.storage_mode == StorageMode::Vector && !retrace_processing::check_ffmpeg() {
        error!("ffmpeg not found in PATH - required for chunked recording");
        return Err(anyhow!("ffmpeg not found"));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handle = stop.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        stop_handle.store(true, Ordering::SeqCst);
    })?;

    let monitor_id = resolve_monitor(monitor.or(config.monitor_id))?;
    let mut coordinator = build_coordinator(&config, monitor_id)?;
    coordinator.run(stop).await?;

    info!("recorder stopped");
    Ok(())
}

fn resolve_monitor(requested: Option<u32>) -> Result<u32> {
    let monitors = XcapSource::list_monitors()?;
    if let Some(id) = requested {
        if monitors.iter().any(|m| m.id == id) {
            return Ok(id);
        }
        warn!("monitor {} not found, using primary", id);
    }
    monitors
        .iter()
        .find(|m| m.is_primary)
        .or_else(|| monitors.first())
        .map(|m| m.id)
        .ok_or_else(|| anyhow!("no monitors available"))
}

fn build_coordinator(config: &Config, monitor_id: u32) -> Result<RecordingCoordinator> {
    let recording_config = RecordingConfig::from_config(config, monitor_id);

    let source: Box<dyn FrameSource> = Box::new(XcapSource::new(
        monitor_id,
        config.capture_windows,
        config.capture_unfocused_windows,
        config.max_image_width,
    )?);

    let encoder = if config.storage_mode == StorageMode::Vector {
        Some(build_encoder(config))
    } else {
        None
    };

    let ocr_engine = if config.enable_ocr {
        Some(OcrEngine::from_config(
            &config.ocr_engine_type,
            config.ocr_remote_endpoint.clone(),
            None,
        )?)
    } else {
        None
    };

    let mut coordinator =
        RecordingCoordinator::new(recording_config, source, encoder, ocr_engine)?;

    let capture_windows = config.capture_windows;
    let capture_unfocused = config.capture_unfocused_windows;
    let max_width = config.max_image_width;
    coordinator.set_source_factory(Box::new(move || {
        Ok(Box::new(XcapSource::new(
            monitor_id,
            capture_windows,
            capture_unfocused,
            max_width,
        )?) as Box<dyn FrameSource>)
    }));

    Ok(coordinator)
}

fn build_encoder(config: &Config) -> Encoder {
    match &config.embedding_api_url {
        Some(url) => Encoder::Remote(RemoteEncoder::new(
            url.clone(),
            config.vlm_api_key.clone(),
            config.embedding_model.clone(),
            config.embedding_dim,
        )),
        None => {
            warn!("EMBEDDING_API_URL not set, using the offline hashing encoder");
            Encoder::Hashing(HashingEncoder::new(config.embedding_dim))
        }
    }
}

// ========== query REPL ==========

async fn cmd_query(config: Config) -> Result<()> {
    print_storage_status(&config);

    println!("Select retrieval source: 0=Semantic/Vector retrieval  1=OCR full-text retrieval");
    let source = if prompt_binary("Please enter choice")? == 0 {
        QuerySource::Dense
    } else {
        QuerySource::OcrOnly
    };

    println!("Select work mode: 0=RAG (full database)  1=Real-time Q&A");
    let mode = if prompt_binary("Please enter choice")? == 0 {
        QueryMode::Rag
    } else {
        QueryMode::Realtime
    };

    println!("\n{}", "=".repeat(70));
    println!("User Guide:");
    println!("{}", "=".repeat(70));
    println!("  - Enter your query to search");
    println!("  - Type 'start' to begin recording");
    println!("  - Type 'stop' to stop recording");
    println!("  - Type 'q', 'quit', or 'exit' to exit");
    println!("{}\n", "=".repeat(70));

    let planner = build_planner(&config);
    let mut frame_cache = frame_cache::FrameCache::new(
        config.max_images_to_load,
        config.simple_filter_diff_threshold,
    );
    let mut recording: Option<(Arc<AtomicBool>, std::thread::JoinHandle<()>)> = None;

    loop {
        let line = prompt_line("Please enter your query : ")?;
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        match query.to_lowercase().as_str() {
            "q" | "quit" | "exit" => {
                stop_recording(&mut recording);
                println!("Received exit command, ending.");
                break;
            }
            "start" => {
                start_recording(&config, &mut recording);
                continue;
            }
            "stop" => {
                stop_recording(&mut recording);
                continue;
            }
            _ => {}
        }

        let current_screen = if mode == QueryMode::Realtime && source == QuerySource::Dense {
            capture_current_screen(&config)
        } else {
            None
        };

        // The lightweight mode has no vector store; its RAG path draws
        // from the bounded frame cache instead of dense retrieval.
        let answer = if config.storage_mode == StorageMode::Simple
            && source == QuerySource::Dense
            && mode == QueryMode::Rag
        {
            answer_simple_rag(&config, &mut frame_cache, query).await
        } else {
            planner.answer(query, source, mode, None, current_screen).await
        };
        println!("\n=== Answer ===");
        println!("{}", answer);
        println!("{}", "=".repeat(70));
        println!("query answered, you can continue asking other questions");
        println!("{}", "=".repeat(70));
    }

    Ok(())
}

fn build_planner(config: &Config) -> QueryPlanner {
    let settings = PlannerSettings {
        db_path: config.ocr_db_path.clone(),
        vector_db_path: config.vector_db_path.clone(),
        images_root: config.image_storage_path.clone(),
        embedding_dim: config.embedding_dim,
        enable_hybrid: config.enable_hybrid,
        enable_rerank: config.enable_rerank,
        rerank_top_k: config.rerank_top_k,
        enable_llm_rewrite: config.enable_llm_rewrite,
        enable_time_filter: config.enable_time_filter,
        query_rewrite_num: config.query_rewrite_num,
        max_images_to_load: config.max_images_to_load,
    };

    let vlm = VlmClient::new(VlmSettings {
        base_url: config.vlm_api_uri.clone(),
        api_key: config.vlm_api_key.clone(),
        model: config.vlm_api_model.clone(),
        backend: VlmBackend::from_str_lossy(&config.vlm_backend_type),
        image_quality: config.image_quality,
    });

    let rewriter = if config.enable_llm_rewrite || config.enable_time_filter {
        let (base_url, api_key, model) = config.rewrite_endpoint();
        Some(QueryRewriter::new(base_url, api_key, model))
    } else {
        None
    };

    let reranker = if config.enable_rerank {
        Some(VlmReranker::new(
            config.vlm_api_uri.clone(),
            config.vlm_api_key.clone(),
            config.rerank_model.clone(),
            config.image_quality,
        ))
    } else {
        None
    };

    QueryPlanner::new(settings, build_encoder(config), vlm, rewriter, reranker)
}

/// Lightweight-mode RAG: refresh the frame cache and hand its newest
/// frames to the VLM directly.
async fn answer_simple_rag(
    config: &Config,
    cache: &mut frame_cache::FrameCache,
    query: &str,
) -> String {
    let db = match retrace_db::Database::open(&config.ocr_db_path) {
        Ok(db) => db,
        Err(e) => return format!("Failed to open storage: {e}"),
    };
    if let Err(e) = cache.update(&db, &config.image_storage_path) {
        warn!("frame cache update failed: {}", e);
    }

    let frames = cache.frames();
    if frames.is_empty() {
        return "No relevant screenshots found.".to_string();
    }

    let images: Vec<(image::DynamicImage, Option<chrono::DateTime<chrono::Utc>>)> = frames
        .iter()
        .take(config.max_images_to_load)
        .map(|f| (f.image.clone(), Some(f.timestamp)))
        .collect();

    let vlm = VlmClient::new(VlmSettings {
        base_url: config.vlm_api_uri.clone(),
        api_key: config.vlm_api_key.clone(),
        model: config.vlm_api_model.clone(),
        backend: VlmBackend::from_str_lossy(&config.vlm_backend_type),
        image_quality: config.image_quality,
    });

    let prompt = retrace_retrieval::prompts::rag_user_prompt(query, images.len());
    match vlm
        .chat_with_images(
            &prompt,
            Some(retrace_retrieval::prompts::VISUAL_ASSISTANT_SYSTEM_PROMPT),
            &images,
        )
        .await
    {
        Ok(answer) => answer,
        Err(e) => format!("VLM call failed: {e}"),
    }
}

fn capture_current_screen(config: &Config) -> Option<image::DynamicImage> {
    let monitor_id = resolve_monitor(config.monitor_id).ok()?;
    let mut source = XcapSource::new(monitor_id, false, false, config.max_image_width).ok()?;
    match source.capture() {
        Ok(screen) => Some(screen.full_screen_image),
        Err(e) => {
            warn!("current screen capture failed: {}", e);
            None
        }
    }
}

fn start_recording(
    config: &Config,
    recording: &mut Option<(Arc<AtomicBool>, std::thread::JoinHandle<()>)>,
) {
    if recording.is_some() {
        println!("Recording is already in progress, enter stop to stop.");
        return;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let thread_config = config.clone();

    let handle = std::thread::spawn(move || {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                error!("failed to start recording runtime: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            let monitor_id = match resolve_monitor(thread_config.monitor_id) {
                Ok(id) => id,
                Err(e) => {
                    error!("no monitor to record: {}", e);
                    return;
                }
            };
            match build_coordinator(&thread_config, monitor_id) {
                Ok(mut coordinator) => {
                    if let Err(e) = coordinator.run(thread_stop).await {
                        error!("recording failed: {}", e);
                    }
                }
                Err(e) => error!("failed to start recorder: {}", e),
            }
        });
    });

    *recording = Some((stop, handle));
    println!("Recording started, enter stop to stop.");
}

fn stop_recording(recording: &mut Option<(Arc<AtomicBool>, std::thread::JoinHandle<()>)>) {
    match recording.take() {
        Some((stop, handle)) => {
            stop.store(true, Ordering::SeqCst);
            if handle.join().is_err() {
                warn!("recording thread panicked");
            }
            println!("Recording stopped.");
        }
        None => println!("Not currently recording, enter start to start recording."),
    }
}

// ========== rebuild ==========

async fn cmd_rebuild(
    config: Config,
    image_dir: Option<PathBuf>,
    no_clear: bool,
    with_ocr: bool,
) -> Result<()> {
    let image_dir = image_dir.unwrap_or_else(|| config.image_storage_path.clone());
    if !image_dir.exists() {
        return Err(anyhow!("image directory does not exist: {:?}", image_dir));
    }

    let db = retrace_db::Database::open(&config.ocr_db_path)?;
    let vectors = retrace_db::VectorStore::open(&config.vector_db_path, config.embedding_dim)?;
    let text_vectors =
        retrace_db::VectorStore::open(&config.text_vector_db_path, config.embedding_dim)?;
    let encoder = build_encoder(&config);
    let ocr_engine = OcrEngine::from_config(
        &config.ocr_engine_type,
        config.ocr_remote_endpoint.clone(),
        None,
    )?;

    let mut options = rebuild::RebuildOptions::new(image_dir);
    options.clear_existing = !no_clear;
    options.with_ocr = with_ocr;

    let report =
        rebuild::rebuild_index(&db, &vectors, &text_vectors, &encoder, &ocr_engine, &options)
            .await?;

    println!("rebuild finished:");
    println!("  images found:   {}", report.images_found);
    println!("  frames indexed: {}", report.frames_indexed);
    println!("  ocr rows:       {}", report.ocr_rows);
    println!("  text vectors:   {}", report.text_vectors);
    println!("  errors:         {}", report.errors);
    Ok(())
}

// ========== utility commands ==========

fn cmd_status(config: Config) -> Result<()> {
    if !config.ocr_db_path.exists() {
        println!("status: not initialized");
        println!("database: not found at {:?}", config.ocr_db_path);
        return Ok(());
    }

    let db = retrace_db::Database::open(&config.ocr_db_path)?;
    let stats = retrace_db::get_stats(db.connection())?;

    println!("status: ready");
    println!("database: {:?}", config.ocr_db_path);
    println!("total frames:      {}", stats.total_frames);
    println!("total sub-frames:  {}", stats.total_sub_frames);
    println!("ocr results:       {}", stats.total_ocr_results);
    println!("video chunks:      {}", stats.total_video_chunks);
    println!("window chunks:     {}", stats.total_window_chunks);

    if config.vector_db_path.exists() {
        let vectors = retrace_db::VectorStore::open(&config.vector_db_path, config.embedding_dim)?;
        println!("vector rows:       {}", vectors.count_rows()?);
    }
    Ok(())
}

fn cmd_monitors() -> Result<()> {
    let monitors = XcapSource::list_monitors()?;
    println!("found {} monitor(s):\n", monitors.len());
    for m in &monitors {
        println!(
            "  [{}] {} - {}x{} {}",
            m.id,
            m.name,
            m.width,
            m.height,
            if m.is_primary { "(primary)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_check() -> Result<()> {
    println!("checking dependencies...\n");

    let ffmpeg_ok = retrace_processing::check_ffmpeg();
    println!("  ffmpeg:    {}", if ffmpeg_ok { "OK" } else { "NOT FOUND" });

    let tesseract_ok = retrace_ocr::check_tesseract();
    println!(
        "  tesseract: {}",
        if tesseract_ok { "OK" } else { "not available (OCR disabled or remote only)" }
    );

    match XcapSource::list_monitors() {
        Ok(monitors) => println!("  monitors:  {} found", monitors.len()),
        Err(e) => println!("  monitors:  enumeration failed ({})", e),
    }

    println!();
    if !ffmpeg_ok {
        println!("WARNING: FFmpeg is required for chunked video storage.");
        println!("Download: https://ffmpeg.org/download.html");
    } else {
        println!("all checks passed!");
    }
    Ok(())
}

fn print_storage_status(config: &Config) {
    println!("{}", "=".repeat(60));
    println!("System Status:");
    println!("{}", "-".repeat(60));
    let size = directory_size(&config.storage_root);
    println!("Disk Usage: {} ({:?})", format_size(size), config.storage_root);
    println!("{}", "=".repeat(60));
}

fn directory_size(root: &std::path::Path) -> u64 {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match bytes {
        b if b < KB => format!("{} B", b),
        b if b < MB => format!("{:.1} KB", b as f64 / KB as f64),
        b if b < GB => format!("{:.1} MB", b as f64 / MB as f64),
        b => format!("{:.2} GB", b as f64 / GB as f64),
    }
}

fn prompt_binary(message: &str) -> Result<u8> {
    loop {
        let line = prompt_line(&format!("{} (0/1): ", message))?;
        match line.trim() {
            "0" => return Ok(0),
            "1" => return Ok(1),
            _ => println!("Please enter 0 or 1"),
        }
    }
}

fn prompt_line(message: &str) -> Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line)
}
