//! Background OCR worker
//!
//! A bounded FIFO queue fed by the recording coordinator and drained by a
//! single task. Overflow drops the oldest queued task with a warning --
//! OCR loss is tolerable, backpressure on the capture loop is not.

use chrono::{DateTime, Utc};
use image::DynamicImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use retrace_db::{Database, NewOcrText, OcrParent};

use crate::engine::OcrEngine;

/// Queue capacity before the oldest task is discarded
pub const OCR_QUEUE_CAPACITY: usize = 100;

/// Which row the OCR result attaches to
#[derive(Debug, Clone)]
pub enum OcrTaskTarget {
    Frame(String),
    SubFrame(String),
}

/// One unit of OCR work; the image is cloned at enqueue time.
pub struct OcrTask {
    pub image: DynamicImage,
    pub target: OcrTaskTarget,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
}

struct SharedQueue {
    tasks: Mutex<VecDeque<OcrTask>>,
    notify: Notify,
}

/// Spawns and owns the drainer task.
pub struct OcrWorker;

/// Handle used by the coordinator to feed and stop the worker.
pub struct OcrWorkerHandle {
    queue: Arc<SharedQueue>,
    running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    join: JoinHandle<()>,
}

impl OcrWorker {
    /// Start the worker with its own database handle.
    pub fn spawn(engine: OcrEngine, db: Database) -> OcrWorkerHandle {
        let queue = Arc::new(SharedQueue {
            tasks: Mutex::new(VecDeque::with_capacity(OCR_QUEUE_CAPACITY)),
            notify: Notify::new(),
        });
        let running = Arc::new(AtomicBool::new(true));
        let processed = Arc::new(AtomicU64::new(0));
        let dropped = Arc::new(AtomicU64::new(0));

        let join = tokio::spawn(run_worker(
            engine,
            db,
            queue.clone(),
            running.clone(),
            processed.clone(),
        ));

        info!("OCR worker started (queue capacity {})", OCR_QUEUE_CAPACITY);

        OcrWorkerHandle {
            queue,
            running,
            processed,
            dropped,
            join,
        }
    }
}

impl OcrWorkerHandle {
    /// Enqueue a task. When the queue is full the oldest task is dropped
    /// and the new one still enters the queue.
    pub fn enqueue(&self, task: OcrTask) {
        {
            let mut tasks = match self.queue.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if tasks.len() >= OCR_QUEUE_CAPACITY {
                tasks.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "OCR queue full, dropped oldest task (total dropped: {})",
                    self.dropped.load(Ordering::Relaxed)
                );
            }
            tasks.push_back(task);
        }
        self.queue.notify.notify_one();
    }

    pub fn queued_count(&self) -> usize {
        self.queue.tasks.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the worker, letting it drain the queue for at most
    /// `drain_timeout` before the task is abandoned.
    pub async fn stop(self, drain_timeout: Duration) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.notify.notify_one();

        match tokio::time::timeout(drain_timeout, self.join).await {
            Ok(_) => info!(
                "OCR worker stopped ({} task(s) processed)",
                self.processed.load(Ordering::Relaxed)
            ),
            Err(_) => warn!("OCR worker drain timed out, remaining tasks abandoned"),
        }
    }
}

async fn run_worker(
    engine: OcrEngine,
    db: Database,
    queue: Arc<SharedQueue>,
    running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
) {
    loop {
        let task = {
            let mut tasks = match queue.tasks.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            tasks.pop_front()
        };

        match task {
            Some(task) => {
                process_task(&engine, &db, task).await;
                processed.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                // Wake on enqueue or stop; the timeout guards missed
                // notifications.
                let _ = tokio::time::timeout(
                    Duration::from_millis(500),
                    queue.notify.notified(),
                )
                .await;
            }
        }
    }
    debug!("OCR worker loop exited");
}

async fn process_task(engine: &OcrEngine, db: &Database, task: OcrTask) {
    let output = match engine.recognize(&task.image).await {
        Ok(out) => out,
        Err(e) => {
            warn!("OCR failed for {:?}: {}", target_id(&task.target), e);
            return;
        }
    };

    if output.text.is_empty() {
        debug!("no text recognized for {:?}", target_id(&task.target));
        return;
    }

    let text_json = output.text_json().ok();
    let parent = match &task.target {
        OcrTaskTarget::Frame(id) => OcrParent::Frame(id.clone()),
        OcrTaskTarget::SubFrame(id) => OcrParent::SubFrame(id.clone()),
    };

    let row = NewOcrText {
        parent,
        text: output.text,
        text_json,
        ocr_engine: output.engine,
        confidence: output.confidence as f64,
    };

    if let Err(e) = retrace_db::insert_ocr_text(db.connection(), &row) {
        warn!("failed to store OCR result for {:?}: {}", target_id(&task.target), e);
    }
}

fn target_id(target: &OcrTaskTarget) -> &str {
    match target {
        OcrTaskTarget::Frame(id) => id,
        OcrTaskTarget::SubFrame(id) => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use retrace_db::{NewFrame, OcrParent};

    fn task(n: u32) -> OcrTask {
        OcrTask {
            image: DynamicImage::new_rgb8(4, 4),
            target: OcrTaskTarget::Frame(format!("frame-{}", n)),
            timestamp: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, n).unwrap(),
            image_path: format!("images/frame-{}.jpg", n),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn overflow_drops_oldest_and_keeps_pipeline_alive() {
        // Disabled engine: tasks complete instantly without external calls
        let handle = OcrWorker::spawn(
            OcrEngine::from_config("disabled", None, None).unwrap(),
            Database::open_in_memory().unwrap(),
        );

        for n in 0..(OCR_QUEUE_CAPACITY as u32 + 20) {
            handle.enqueue(task(n));
        }

        // Never exceeds capacity even under burst enqueue
        assert!(handle.queued_count() <= OCR_QUEUE_CAPACITY);
        handle.stop(Duration::from_secs(10)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_drains_queued_tasks() {
        let handle = OcrWorker::spawn(
            OcrEngine::from_config("disabled", None, None).unwrap(),
            Database::open_in_memory().unwrap(),
        );

        for n in 0..10 {
            handle.enqueue(task(n));
        }
        let processed = handle.processed.clone();
        handle.stop(Duration::from_secs(10)).await;

        assert_eq!(processed.load(Ordering::Relaxed), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_text_results_write_no_rows() {
        let db = Database::open_in_memory().unwrap();
        let row = NewOcrText {
            parent: OcrParent::Frame("f".to_string()),
            text: String::new(),
            text_json: None,
            ocr_engine: "disabled".to_string(),
            confidence: 0.0,
        };
        assert!(retrace_db::insert_ocr_text(db.connection(), &row).unwrap().is_none());

        // A frame without OCR is still queryable via LEFT JOIN reads
        retrace_db::store_frame(
            db.connection(),
            &NewFrame {
                frame_id: "f".to_string(),
                timestamp: Utc::now(),
                image_path: "images/f.jpg".to_string(),
                device_name: None,
                metadata_json: None,
                video_chunk_id: None,
                offset_index: None,
                monitor_id: 0,
                image_hash: None,
            },
        )
        .unwrap();
        let frames = retrace_db::get_recent_frames(db.connection(), 5).unwrap();
        assert_eq!(frames.len(), 1);
    }
}
