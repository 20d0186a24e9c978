pub mod comparison;
pub mod config;
pub mod enrichment;
pub mod extractor;
pub mod ids;
pub mod layout;
pub mod resolver;
pub mod thread_router;

pub use comparison::*;
pub use config::*;
pub use enrichment::*;
pub use extractor::{
    canonical_column, contains_chart, extract_all, find_cluster_title, normalize_chart,
    ExtractedChart,
};
pub use layout::*;
pub use resolver::{resolve, score_candidates, MatchTier, Resolution, ScoredCandidate};
pub use thread_router::*;
