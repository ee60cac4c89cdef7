//! Autonomous, resumable Points-of-Interest crawler.
//!
//! A session starts from a seed URL and repeatedly takes the next URL from
//! the [`frontier`], fetches it through a [`PageFetcher`], asks the
//! [`ExtractionAgent`] for POI candidates and promising links, merges the
//! candidates into the deduplicated [`PoiLedger`] and checkpoints the whole
//! state so the crawl can resume after a pause or a crash.
//!
//! ```rust,ignore
//! use poi_crawler::{SessionConfig, SessionController, SessionDeps};
//!
//! let mut session = SessionController::start("https://example.com", SessionConfig::new(), deps).await?;
//! let status = session.run().await;
//! println!("{}", session.state().ledger.to_markdown_table());
//! ```

pub mod agent;
pub mod backends;
pub mod config;
pub mod error;
pub mod events;
pub mod fetchers;
pub mod frontier;
pub mod ledger;
pub mod registry;
pub mod session;
pub mod storage;
pub mod testing;
pub mod traits;
pub mod types;

pub use agent::{ExtractionAgent, ExtractionOutcome, ExtractionReport, SessionContext};
pub use backends::OpenAiBackend;
pub use config::SessionConfig;
pub use error::{
    BackendError, FetchError, PersistenceError, Result, ScopeError, SessionError, ValidationError,
};
pub use events::{ChannelEventSink, EventSink, ProgressEvent, SessionEvent, TracingEventSink};
pub use fetchers::HttpFetcher;
pub use frontier::{normalize_url, EnqueueOutcome, FailureOutcome, Frontier, UrlScope};
pub use ledger::{MergeOutcome, PoiLedger, RejectReason};
pub use registry::{SessionRegistry, SessionSnapshot};
pub use session::{new_session_state, SessionController, SessionDeps, StepOutcome};
pub use storage::{FileCheckpointStore, MemoryCheckpointStore};
pub use traits::{CheckpointStore, PageFetcher, Prompt, PromptKind, ReasoningBackend};
pub use types::*;
