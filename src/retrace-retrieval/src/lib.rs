//! retrace-retrieval - Hybrid query planner and model clients
//!
//! Expands a natural-language query, runs dense and sparse retrieval in
//! parallel with time pre-filtering, merges and reranks the candidates,
//! and assembles the VLM request that produces the final answer.

pub mod encoder;
pub mod error;
pub mod planner;
pub mod prompts;
pub mod reranker;
pub mod rewrite;
pub mod types;
pub mod vlm;

pub use encoder::{Encoder, HashingEncoder, RemoteEncoder};
pub use error::RetrievalError;
pub use planner::{PlannerSettings, QueryMode, QueryPlanner, QuerySource};
pub use reranker::VlmReranker;
pub use rewrite::{QueryRewriter, RewriteOutcome};
pub use types::RetrievedFrame;
pub use vlm::{strip_think_tags, VlmBackend, VlmClient, VlmSettings};
