//! Autopilot Agent - LLM-backed conversation understanding
//!
//! Provides the external AI capability used by the outreach engine:
//! - Trait-based LLM backends (OpenAI-compatible, mock)
//! - Intent classification into `{intent, sentiment, buyingSignal, stage}`
//! - Action-specific reply generation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             OutreachAgent               │
//! │        classify()  /  generate()        │
//! └────────────────┬────────────────────────┘
//!                  │
//!                  ▼
//!          ┌───────────────┐
//!          │  LlmBackend   │
//!          │ (OpenAI/Mock) │
//!          └───────────────┘
//! ```

pub mod backend;
pub mod prompt;
pub mod service;
pub mod types;

// Re-export main types for convenience
pub use backend::traits::{CompletionRequest, CompletionResponse, LlmBackend, LlmError};
pub use service::{AgentConfig, AgentError, OutreachAgent};
pub use types::*;
