pub mod analyzer;
pub mod api;
pub mod broadcaster;
pub mod config;
pub mod engine;
pub mod extractor;
pub mod state_machine;
pub mod store;
pub mod types;

pub use analyzer::{Analysis, ContentAnalyzer, HeuristicAnalyzer};
pub use broadcaster::{ProcessEvent, ProgressBroadcaster};
pub use config::{FetchSettings, Settings};
pub use engine::{ProcessEngine, RunProgress};
pub use extractor::{ContentExtractor, ExtractOutcome, HttpExtractor};
pub use store::{ArticleStore, MemoryArticleStore, PgArticleStore};
pub use types::*;
