//! Secretary Runtime
//!
//! Conversation context, the tool-calling turn loop, and post-turn memory
//! distillation.

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod session;
pub mod summarizer;

pub use config::{load_session_config, ProviderConfig, SessionConfig, SummarizeMode};
pub use context::{ContextSnapshot, ContextStats, ContextStore};
pub use error::RuntimeError;
pub use session::{SessionDriver, TurnOutcome, TurnState};
pub use summarizer::{SummaryOutcome, TurnSummarizer};

pub use secretary_memory as memory;
pub use secretary_providers as providers;
pub use secretary_tools as tools;
