//! LLM Backend abstraction layer.
//!
//! - OpenAI-compatible (vLLM, Ollama, OpenAI, etc.)
//! - Mock backend for testing

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;
pub use traits::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, LlmBackend, LlmError, TokenUsage,
};
