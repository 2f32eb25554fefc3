//! Query-side frame representation

use chrono::{DateTime, Utc};
use image::DynamicImage;

/// One retrieved candidate frame flowing through the planner.
#[derive(Clone)]
pub struct RetrievedFrame {
    pub frame_id: String,
    pub timestamp: DateTime<Utc>,
    pub image_path: String,
    /// Smaller is more similar; sparse hits carry a placeholder until the
    /// reranker assigns a real score.
    pub distance: f64,
    pub ocr_text: String,
    pub metadata: String,
    pub image: Option<DynamicImage>,
    pub from_sparse: bool,
    pub rerank_score: Option<f64>,
}

impl RetrievedFrame {
    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

impl std::fmt::Debug for RetrievedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievedFrame")
            .field("frame_id", &self.frame_id)
            .field("timestamp", &self.timestamp)
            .field("distance", &self.distance)
            .field("from_sparse", &self.from_sparse)
            .field("has_image", &self.image.is_some())
            .finish()
    }
}

/// Union by frame_id: dense candidates first, then unseen sparse ones,
/// preserving intra-branch order.
pub fn merge_dedup(
    dense: Vec<RetrievedFrame>,
    sparse: Vec<RetrievedFrame>,
) -> Vec<RetrievedFrame> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::with_capacity(dense.len() + sparse.len());

    for frame in dense.into_iter().chain(sparse.into_iter()) {
        if seen.insert(frame.frame_id.clone()) {
            merged.push(frame);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(id: &str, from_sparse: bool) -> RetrievedFrame {
        RetrievedFrame {
            frame_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
            image_path: String::new(),
            distance: 0.5,
            ocr_text: String::new(),
            metadata: String::new(),
            image: None,
            from_sparse,
            rerank_score: None,
        }
    }

    #[test]
    fn merge_keeps_dense_first_and_dedups_by_frame_id() {
        let dense = vec![frame("a", false), frame("b", false)];
        let sparse = vec![frame("b", true), frame("c", true)];

        let merged = merge_dedup(dense, sparse);
        let ids: Vec<&str> = merged.iter().map(|f| f.frame_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        // The duplicate kept is the dense-branch copy
        assert!(!merged[1].from_sparse);
    }

    #[test]
    fn merge_preserves_intra_branch_order() {
        let dense = vec![frame("z", false), frame("a", false)];
        let sparse = vec![frame("m", true), frame("k", true)];
        let merged = merge_dedup(dense, sparse);
        let ids: Vec<&str> = merged.iter().map(|f| f.frame_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "m", "k"]);
    }

    #[test]
    fn merge_with_one_empty_branch_passes_through() {
        let sparse = vec![frame("only", true)];
        let merged = merge_dedup(Vec::new(), sparse);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].frame_id, "only");
    }
}
